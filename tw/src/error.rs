//! Unified failure taxonomy for the orchestration core
//!
//! Module-level errors (`LlmError`, `GitError`, `QueueError`, `StoreError`,
//! `ArtifactError`) fold into [`CoreError`] at the orchestrator boundary.
//! Only scope violations and whole-request cancellations are fatal above the
//! orchestrator; everything else is isolated to the failing reviewer/batch.

use thiserror::Error;

use crate::artifact::ArtifactError;
use crate::git::GitError;
use crate::llm::LlmError;
use crate::queue::QueueError;
use crate::store::StoreError;

/// Top-level failure kinds
#[derive(Debug, Error)]
pub enum CoreError {
    #[error(transparent)]
    Llm(#[from] LlmError),

    #[error("Loop failed for {scope}: {message}")]
    LoopFailed { scope: String, message: String },

    #[error("Workspace scope violation: {file} is outside {workspace}")]
    WorkspaceScopeViolation { file: String, workspace: String },

    #[error(transparent)]
    Git(#[from] GitError),

    #[error(transparent)]
    Queue(#[from] QueueError),

    #[error(transparent)]
    Store(#[from] StoreError),

    #[error(transparent)]
    Artifact(#[from] ArtifactError),

    #[error("Repository context error: {0}")]
    Repo(String),

    #[error("Request canceled")]
    Canceled,
}

impl CoreError {
    /// Whether this failure came from cancellation
    pub fn is_canceled(&self) -> bool {
        matches!(self, CoreError::Canceled | CoreError::Llm(LlmError::Canceled))
    }

    /// Whether this failure is fatal to the whole request rather than one
    /// reviewer or batch
    pub fn is_request_fatal(&self) -> bool {
        matches!(self, CoreError::WorkspaceScopeViolation { .. }) || self.is_canceled()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cancellation_detection() {
        assert!(CoreError::Canceled.is_canceled());
        assert!(CoreError::Llm(LlmError::Canceled).is_canceled());
        assert!(
            !CoreError::LoopFailed {
                scope: "reviewer_a".to_string(),
                message: "x".to_string()
            }
            .is_canceled()
        );
    }

    #[test]
    fn test_request_fatal_kinds() {
        assert!(
            CoreError::WorkspaceScopeViolation {
                file: "packages/web/x.ts".to_string(),
                workspace: "packages/api".to_string()
            }
            .is_request_fatal()
        );
        assert!(CoreError::Canceled.is_request_fatal());
        assert!(
            !CoreError::LoopFailed {
                scope: "batch-1".to_string(),
                message: "x".to_string()
            }
            .is_request_fatal()
        );
    }
}
