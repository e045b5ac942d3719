//! Checkpoint - per-reviewer completion snapshot for resumable reviews

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use workstore::{IndexValue, Record, now_ms};

use super::issue::Issue;
use super::run::ConvergenceStatus;

/// Snapshot of one completed reviewer within a review task
///
/// Written exactly once, when the reviewer's loop reaches a terminal
/// convergence status. Presence means "skip this reviewer on resume and
/// restore its issues verbatim".
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Checkpoint {
    /// `{task_id}:{reviewer}` - one checkpoint per reviewer per task
    pub id: String,

    pub task_id: String,
    pub reviewer: String,

    /// Whether the loop produced a usable result
    pub completed: bool,

    /// Final issues from this reviewer
    pub issues: Vec<Issue>,

    /// Final challenger satisfaction score
    pub satisfaction: Option<u8>,

    /// Iterations the loop used
    pub iterations: u32,

    pub status: ConvergenceStatus,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl Checkpoint {
    /// Create a checkpoint for a terminal reviewer loop
    pub fn new(task_id: impl Into<String>, reviewer: impl Into<String>, status: ConvergenceStatus) -> Self {
        let task_id = task_id.into();
        let reviewer = reviewer.into();
        Self {
            id: format!("{}:{}", task_id, reviewer),
            task_id,
            reviewer,
            completed: status.is_usable(),
            issues: Vec::new(),
            satisfaction: None,
            iterations: 0,
            status,
            created_at: now_ms(),
        }
    }

    /// Attach the reviewer's final issues
    pub fn with_issues(mut self, issues: Vec<Issue>) -> Self {
        self.issues = issues;
        self
    }

    /// Attach the loop outcome numbers
    pub fn with_outcome(mut self, satisfaction: Option<u8>, iterations: u32) -> Self {
        self.satisfaction = satisfaction;
        self.iterations = iterations;
        self
    }
}

impl Record for Checkpoint {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "checkpoints"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task".to_string(), IndexValue::String(self.task_id.clone()));
        fields.insert("reviewer".to_string(), IndexValue::String(self.reviewer.clone()));
        fields
    }
}
