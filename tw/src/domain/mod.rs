//! Domain types for the orchestration core
//!
//! Ownership flows downward: a [`Task`] owns its [`LoopRun`]s, a `LoopRun`
//! owns its [`Invocation`]s and optionally produces one [`Checkpoint`].
//! Issues flow upward and are copied, never shared mutably.

mod checkpoint;
mod id;
mod invocation;
mod issue;
mod report;
mod run;
mod task;

pub use checkpoint::Checkpoint;
pub use id::generate_id;
pub use invocation::{ArtifactRefs, Backend, Invocation, TokenEstimate};
pub use issue::{Category, Issue, Severity, normalize_path};
pub use report::{
    BatchSummary, FinalReport, FixOutcome, FixReport, IssueResult, Recommendation, RepoType, ReviewerSummary,
    SeverityCounts,
};
pub use run::{ConvergenceStatus, LoopRun, LoopScope};
pub use task::{Task, TaskKind, TaskState};

// Re-export the store vocabulary alongside the records that implement it
pub use workstore::{Filter, FilterOp, IndexValue, Record};
