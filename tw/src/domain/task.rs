//! Task - a unit of work on the queue

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use workstore::{IndexValue, Record, now_ms};

use super::id::generate_id;

/// What kind of work a task carries
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskKind {
    Review,
    Fix,
}

impl std::fmt::Display for TaskKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Review => write!(f, "review"),
            Self::Fix => write!(f, "fix"),
        }
    }
}

/// Task lifecycle state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskState {
    #[default]
    Pending,
    InQueue,
    Processing,
    Completed,
    Failed,
}

impl std::fmt::Display for TaskState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pending => write!(f, "pending"),
            Self::InQueue => write!(f, "in_queue"),
            Self::Processing => write!(f, "processing"),
            Self::Completed => write!(f, "completed"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// A schedulable unit of review or fix work
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier
    pub id: String,

    pub kind: TaskKind,

    /// Kind-specific request payload
    pub payload: serde_json::Value,

    /// Higher runs first
    pub priority: i32,

    pub state: TaskState,

    /// Repository this task operates on, for per-repo serialization of fixes
    #[serde(default)]
    pub repository: Option<String>,

    /// Enqueue timestamp (Unix milliseconds)
    pub enqueued_at: i64,

    /// When processing began, for zombie detection
    #[serde(default)]
    pub processing_started_at: Option<i64>,

    /// Number of processing attempts, including the current one
    #[serde(default)]
    pub attempts: u32,

    /// Failure message for terminal failures
    #[serde(default)]
    pub error: Option<String>,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl Task {
    /// Create a pending task
    pub fn new(kind: TaskKind, label: &str, payload: serde_json::Value) -> Self {
        let now = now_ms();
        Self {
            id: generate_id("task", label),
            kind,
            payload,
            priority: 0,
            state: TaskState::Pending,
            repository: None,
            enqueued_at: now,
            processing_started_at: None,
            attempts: 0,
            error: None,
            updated_at: now,
        }
    }

    /// Set the scheduling priority
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }

    /// Set the target repository
    pub fn with_repository(mut self, repository: impl Into<String>) -> Self {
        self.repository = Some(repository.into());
        self
    }

    /// Transition to a new state
    pub fn set_state(&mut self, state: TaskState) {
        self.state = state;
        self.updated_at = now_ms();
    }

    /// Age in processing, or zero when not processing
    pub fn processing_age_ms(&self, now_ms: i64) -> i64 {
        self.processing_started_at
            .map(|started| (now_ms - started).max(0))
            .unwrap_or(0)
    }

    /// Whether the task reached a terminal state
    pub fn is_terminal(&self) -> bool {
        matches!(self.state, TaskState::Completed | TaskState::Failed)
    }
}

impl Record for Task {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "tasks"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("kind".to_string(), IndexValue::String(self.kind.to_string()));
        fields.insert("state".to_string(), IndexValue::String(self.state.to_string()));
        if let Some(repo) = &self.repository {
            fields.insert("repository".to_string(), IndexValue::String(repo.clone()));
        }
        fields
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_task_new() {
        let task = Task::new(TaskKind::Review, "review api", serde_json::json!({"dir": "/tmp/repo"}));
        assert!(task.id.contains("-task-"));
        assert_eq!(task.state, TaskState::Pending);
        assert_eq!(task.attempts, 0);
        assert!(!task.is_terminal());
    }

    #[test]
    fn test_processing_age() {
        let mut task = Task::new(TaskKind::Fix, "fix", serde_json::json!({}));
        assert_eq!(task.processing_age_ms(now_ms()), 0);

        task.processing_started_at = Some(1_000);
        assert_eq!(task.processing_age_ms(61_000), 60_000);
    }

    #[test]
    fn test_terminal_states() {
        let mut task = Task::new(TaskKind::Review, "r", serde_json::json!({}));
        task.set_state(TaskState::Completed);
        assert!(task.is_terminal());
        task.set_state(TaskState::Failed);
        assert!(task.is_terminal());
    }

    #[test]
    fn test_indexed_fields() {
        let task = Task::new(TaskKind::Fix, "f", serde_json::json!({})).with_repository("org/repo");
        let fields = task.indexed_fields();
        assert_eq!(fields.get("kind"), Some(&IndexValue::String("fix".to_string())));
        assert_eq!(fields.get("repository"), Some(&IndexValue::String("org/repo".to_string())));
    }
}
