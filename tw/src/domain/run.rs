//! LoopRun - one end-to-end challenger loop instance

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use workstore::{IndexValue, Record, now_ms};

use super::id::generate_id;
use super::invocation::Invocation;

/// Terminal classification of a loop run
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum ConvergenceStatus {
    /// Still iterating
    #[default]
    Running,
    /// Satisfaction score reached the threshold
    ThresholdMet,
    /// Score range over the stagnation window fell below the improvement bar
    Stagnated,
    /// Soft iteration cap hit with an acceptable (sub-threshold) score
    ForcedAcceptance,
    /// Soft iteration cap hit with an unacceptable score
    MaxIterationsReached,
    /// An entire iteration's invocations failed
    Failed,
}

impl ConvergenceStatus {
    /// Whether the run has finished, successfully or not
    pub fn is_terminal(&self) -> bool {
        *self != Self::Running
    }

    /// Whether the caller should use the final primary result
    pub fn is_usable(&self) -> bool {
        matches!(
            self,
            Self::ThresholdMet | Self::ForcedAcceptance | Self::Stagnated | Self::MaxIterationsReached
        )
    }
}

impl std::fmt::Display for ConvergenceStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Running => write!(f, "running"),
            Self::ThresholdMet => write!(f, "threshold_met"),
            Self::Stagnated => write!(f, "stagnated"),
            Self::ForcedAcceptance => write!(f, "forced_acceptance"),
            Self::MaxIterationsReached => write!(f, "max_iterations_reached"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// What a loop run is refining
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LoopScope {
    /// One reviewer role within a review task
    Reviewer { name: String },
    /// One issue batch within a fix task
    Batch { batch_id: String },
}

impl LoopScope {
    /// Short label for ids and logging
    pub fn label(&self) -> &str {
        match self {
            Self::Reviewer { name } => name,
            Self::Batch { batch_id } => batch_id,
        }
    }
}

/// One end-to-end challenger loop for a single reviewer or fix batch
///
/// Owns its invocations (primary and challenger alternating). Terminal once
/// `status` is anything but `Running`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoopRun {
    /// Unique identifier
    pub id: String,

    /// Owning task
    pub task_id: String,

    pub scope: LoopScope,

    /// Iterations completed so far
    pub iteration: u32,

    /// All invocations, in execution order
    pub invocations: Vec<Invocation>,

    /// Most recent challenger satisfaction score
    pub satisfaction: Option<u8>,

    /// Satisfaction score per iteration
    pub history: Vec<u8>,

    pub status: ConvergenceStatus,

    /// Failure description when the loop ended in `Failed`
    #[serde(default)]
    pub error: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,

    /// Last update timestamp (Unix milliseconds)
    pub updated_at: i64,
}

impl LoopRun {
    /// Create a new running loop
    pub fn new(task_id: impl Into<String>, scope: LoopScope) -> Self {
        let now = now_ms();
        Self {
            id: generate_id("run", scope.label()),
            task_id: task_id.into(),
            scope,
            iteration: 0,
            invocations: Vec::new(),
            satisfaction: None,
            history: Vec::new(),
            status: ConvergenceStatus::Running,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Record one iteration's invocations and challenger score
    pub fn record_iteration(&mut self, primary: Invocation, challenger: Option<Invocation>, score: u8) {
        self.iteration += 1;
        self.invocations.push(primary);
        if let Some(challenger) = challenger {
            self.invocations.push(challenger);
        }
        self.satisfaction = Some(score);
        self.history.push(score);
        self.updated_at = now_ms();
    }

    /// Transition to a terminal status
    pub fn finish(&mut self, status: ConvergenceStatus) {
        self.status = status;
        self.updated_at = now_ms();
    }

    /// The most recent primary output, if any iteration completed
    pub fn final_primary(&self) -> Option<&Invocation> {
        self.invocations
            .iter()
            .rev()
            .find(|inv| inv.backend == super::Backend::Primary)
    }
}

impl Record for LoopRun {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.updated_at
    }

    fn collection_name() -> &'static str {
        "runs"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task".to_string(), IndexValue::String(self.task_id.clone()));
        fields.insert("status".to_string(), IndexValue::String(self.status.to_string()));
        fields
    }
}
