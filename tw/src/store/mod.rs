//! Persistence capability
//!
//! The core persists tasks, loop-run history, checkpoints, and reports
//! through this trait; schema is adapter-local. Writes affecting one task
//! must be serializable (single writer per task) - both shipped adapters
//! guarantee this with a coarse internal lock.

use std::collections::HashMap;

use async_trait::async_trait;
use thiserror::Error;

use crate::domain::{Checkpoint, Filter, FinalReport, FixReport, LoopRun, Task};

/// Errors from persistence operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

impl From<workstore::StoreError> for StoreError {
    fn from(e: workstore::StoreError) -> Self {
        StoreError::Unavailable(e.to_string())
    }
}

/// Persistence operations keyed by task identifier
#[async_trait]
pub trait Store: Send + Sync {
    async fn save_task(&self, task: &Task) -> Result<(), StoreError>;
    async fn load_task(&self, id: &str) -> Result<Option<Task>, StoreError>;

    /// Persist a loop run's terminal state for audit
    async fn save_run(&self, run: &LoopRun) -> Result<(), StoreError>;
    async fn load_runs(&self, task_id: &str) -> Result<Vec<LoopRun>, StoreError>;

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError>;

    /// All checkpoints for a task, keyed by reviewer name
    async fn load_checkpoints(&self, task_id: &str) -> Result<HashMap<String, Checkpoint>, StoreError>;

    /// Remove a task's checkpoints on terminal completion
    async fn clear_checkpoints(&self, task_id: &str) -> Result<(), StoreError>;

    async fn save_report(&self, report: &FinalReport) -> Result<(), StoreError>;
    async fn load_report(&self, task_id: &str) -> Result<Option<FinalReport>, StoreError>;

    async fn save_fix_report(&self, report: &FixReport) -> Result<(), StoreError>;
    async fn load_fix_report(&self, task_id: &str) -> Result<Option<FixReport>, StoreError>;
}

/// Store adapter over a workstore JSONL directory
pub struct JsonlStore {
    inner: std::sync::Mutex<workstore::Store>,
}

impl JsonlStore {
    /// Open the backing store and rebuild indexes for every record type
    pub fn open(path: impl AsRef<std::path::Path>) -> Result<Self, StoreError> {
        let mut store = workstore::Store::open(path)?;
        store.rebuild_indexes::<Task>()?;
        store.rebuild_indexes::<LoopRun>()?;
        store.rebuild_indexes::<Checkpoint>()?;
        store.rebuild_indexes::<FinalReport>()?;
        store.rebuild_indexes::<FixReport>()?;
        Ok(Self {
            inner: std::sync::Mutex::new(store),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, workstore::Store> {
        // Poisoning only happens if a holder panicked; propagate the inner state
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Store for JsonlStore {
    async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
        self.lock().put(task)?;
        Ok(())
    }

    async fn load_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
        Ok(self.lock().get(id)?)
    }

    async fn save_run(&self, run: &LoopRun) -> Result<(), StoreError> {
        self.lock().put(run)?;
        Ok(())
    }

    async fn load_runs(&self, task_id: &str) -> Result<Vec<LoopRun>, StoreError> {
        Ok(self.lock().filter(&[Filter::eq("task", task_id)])?)
    }

    async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
        self.lock().put(checkpoint)?;
        Ok(())
    }

    async fn load_checkpoints(&self, task_id: &str) -> Result<HashMap<String, Checkpoint>, StoreError> {
        let checkpoints: Vec<Checkpoint> = self.lock().filter(&[Filter::eq("task", task_id)])?;
        Ok(checkpoints.into_iter().map(|cp| (cp.reviewer.clone(), cp)).collect())
    }

    async fn clear_checkpoints(&self, task_id: &str) -> Result<(), StoreError> {
        let mut store = self.lock();
        let checkpoints: Vec<Checkpoint> = store.filter(&[Filter::eq("task", task_id)])?;
        for cp in checkpoints {
            store.delete::<Checkpoint>(&cp.id)?;
        }
        Ok(())
    }

    async fn save_report(&self, report: &FinalReport) -> Result<(), StoreError> {
        self.lock().put(report)?;
        Ok(())
    }

    async fn load_report(&self, task_id: &str) -> Result<Option<FinalReport>, StoreError> {
        let mut reports: Vec<FinalReport> = self.lock().filter(&[Filter::eq("task", task_id)])?;
        reports.sort_by_key(|r| r.created_at);
        Ok(reports.pop())
    }

    async fn save_fix_report(&self, report: &FixReport) -> Result<(), StoreError> {
        self.lock().put(report)?;
        Ok(())
    }

    async fn load_fix_report(&self, task_id: &str) -> Result<Option<FixReport>, StoreError> {
        let mut reports: Vec<FixReport> = self.lock().filter(&[Filter::eq("task", task_id)])?;
        reports.sort_by_key(|r| r.created_at);
        Ok(reports.pop())
    }
}

/// In-memory store for tests
pub mod mock {
    use super::*;
    use std::sync::Mutex;

    #[derive(Default)]
    struct MemoryState {
        tasks: HashMap<String, Task>,
        runs: Vec<LoopRun>,
        checkpoints: HashMap<String, Checkpoint>,
        reports: Vec<FinalReport>,
        fix_reports: Vec<FixReport>,
    }

    #[derive(Default)]
    pub struct MemoryStore {
        state: Mutex<MemoryState>,
    }

    impl MemoryStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn report_count(&self) -> usize {
            self.state.lock().unwrap().reports.len()
        }

        pub fn fix_report_count(&self) -> usize {
            self.state.lock().unwrap().fix_reports.len()
        }

        pub fn run_count(&self) -> usize {
            self.state.lock().unwrap().runs.len()
        }
    }

    #[async_trait]
    impl Store for MemoryStore {
        async fn save_task(&self, task: &Task) -> Result<(), StoreError> {
            self.state.lock().unwrap().tasks.insert(task.id.clone(), task.clone());
            Ok(())
        }

        async fn load_task(&self, id: &str) -> Result<Option<Task>, StoreError> {
            Ok(self.state.lock().unwrap().tasks.get(id).cloned())
        }

        async fn save_run(&self, run: &LoopRun) -> Result<(), StoreError> {
            self.state.lock().unwrap().runs.push(run.clone());
            Ok(())
        }

        async fn load_runs(&self, task_id: &str) -> Result<Vec<LoopRun>, StoreError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .runs
                .iter()
                .filter(|r| r.task_id == task_id)
                .cloned()
                .collect())
        }

        async fn save_checkpoint(&self, checkpoint: &Checkpoint) -> Result<(), StoreError> {
            self.state
                .lock()
                .unwrap()
                .checkpoints
                .insert(checkpoint.id.clone(), checkpoint.clone());
            Ok(())
        }

        async fn load_checkpoints(&self, task_id: &str) -> Result<HashMap<String, Checkpoint>, StoreError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .checkpoints
                .values()
                .filter(|cp| cp.task_id == task_id)
                .map(|cp| (cp.reviewer.clone(), cp.clone()))
                .collect())
        }

        async fn clear_checkpoints(&self, task_id: &str) -> Result<(), StoreError> {
            self.state
                .lock()
                .unwrap()
                .checkpoints
                .retain(|_, cp| cp.task_id != task_id);
            Ok(())
        }

        async fn save_report(&self, report: &FinalReport) -> Result<(), StoreError> {
            self.state.lock().unwrap().reports.push(report.clone());
            Ok(())
        }

        async fn load_report(&self, task_id: &str) -> Result<Option<FinalReport>, StoreError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .reports
                .iter()
                .filter(|r| r.task_id == task_id)
                .next_back()
                .cloned())
        }

        async fn save_fix_report(&self, report: &FixReport) -> Result<(), StoreError> {
            self.state.lock().unwrap().fix_reports.push(report.clone());
            Ok(())
        }

        async fn load_fix_report(&self, task_id: &str) -> Result<Option<FixReport>, StoreError> {
            Ok(self
                .state
                .lock()
                .unwrap()
                .fix_reports
                .iter()
                .filter(|r| r.task_id == task_id)
                .next_back()
                .cloned())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::mock::MemoryStore;
    use super::*;
    use crate::domain::{ConvergenceStatus, TaskKind};
    use tempfile::tempdir;

    #[tokio::test]
    async fn test_jsonl_store_task_roundtrip() {
        let temp = tempdir().unwrap();
        let store = JsonlStore::open(temp.path()).unwrap();

        let task = Task::new(TaskKind::Review, "review repo", serde_json::json!({"dir": "/r"}));
        store.save_task(&task).await.unwrap();

        let loaded = store.load_task(&task.id).await.unwrap().unwrap();
        assert_eq!(loaded.id, task.id);
        assert_eq!(loaded.payload, task.payload);
    }

    #[tokio::test]
    async fn test_jsonl_store_checkpoints_by_task() {
        let temp = tempdir().unwrap();
        let store = JsonlStore::open(temp.path()).unwrap();

        let cp_a = Checkpoint::new("task-1", "reviewer_a", ConvergenceStatus::ThresholdMet);
        let cp_b = Checkpoint::new("task-1", "reviewer_b", ConvergenceStatus::Stagnated);
        let cp_other = Checkpoint::new("task-2", "reviewer_a", ConvergenceStatus::ThresholdMet);
        store.save_checkpoint(&cp_a).await.unwrap();
        store.save_checkpoint(&cp_b).await.unwrap();
        store.save_checkpoint(&cp_other).await.unwrap();

        let loaded = store.load_checkpoints("task-1").await.unwrap();
        assert_eq!(loaded.len(), 2);
        assert!(loaded.contains_key("reviewer_a"));
        assert!(loaded.contains_key("reviewer_b"));

        store.clear_checkpoints("task-1").await.unwrap();
        assert!(store.load_checkpoints("task-1").await.unwrap().is_empty());
        assert_eq!(store.load_checkpoints("task-2").await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_jsonl_store_survives_reopen() {
        let temp = tempdir().unwrap();
        let task = Task::new(TaskKind::Fix, "fix", serde_json::json!({}));
        {
            let store = JsonlStore::open(temp.path()).unwrap();
            store.save_task(&task).await.unwrap();
        }

        let store = JsonlStore::open(temp.path()).unwrap();
        assert!(store.load_task(&task.id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_memory_store_checkpoints() {
        let store = MemoryStore::new();
        let cp = Checkpoint::new("task-1", "reviewer_a", ConvergenceStatus::ThresholdMet);
        store.save_checkpoint(&cp).await.unwrap();

        let loaded = store.load_checkpoints("task-1").await.unwrap();
        assert_eq!(loaded.len(), 1);

        store.clear_checkpoints("task-1").await.unwrap();
        assert!(store.load_checkpoints("task-1").await.unwrap().is_empty());
    }
}
