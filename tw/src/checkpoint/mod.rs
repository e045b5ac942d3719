//! Checkpoint manager
//!
//! Per-reviewer completion snapshots so an interrupted review resumes
//! without redoing finished reviewers. A checkpoint is written exactly once
//! per reviewer per task, at the moment its loop reaches a terminal
//! convergence status; there is no partial-iteration checkpointing.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, warn};

use crate::domain::Checkpoint;
use crate::store::{Store, StoreError};

/// Store-backed checkpoint operations
#[derive(Clone)]
pub struct CheckpointManager {
    store: Arc<dyn Store>,
}

impl CheckpointManager {
    pub fn new(store: Arc<dyn Store>) -> Self {
        Self { store }
    }

    /// Persist a reviewer's completion snapshot
    ///
    /// Writing the same reviewer twice within a task is a caller bug; the
    /// first snapshot wins and the duplicate is dropped with a warning.
    pub async fn save(&self, checkpoint: Checkpoint) -> Result<(), StoreError> {
        let existing = self.store.load_checkpoints(&checkpoint.task_id).await?;
        if existing.contains_key(&checkpoint.reviewer) {
            warn!(
                task = %checkpoint.task_id,
                reviewer = %checkpoint.reviewer,
                "Checkpoint already exists, keeping the original"
            );
            return Ok(());
        }

        debug!(task = %checkpoint.task_id, reviewer = %checkpoint.reviewer, "Saving checkpoint");
        self.store.save_checkpoint(&checkpoint).await
    }

    /// All checkpoints for a task, keyed by reviewer name
    pub async fn load(&self, task_id: &str) -> Result<HashMap<String, Checkpoint>, StoreError> {
        self.store.load_checkpoints(task_id).await
    }

    /// Remove a task's checkpoints on terminal completion
    pub async fn clear(&self, task_id: &str) -> Result<(), StoreError> {
        debug!(task = %task_id, "Clearing checkpoints");
        self.store.clear_checkpoints(task_id).await
    }
}
