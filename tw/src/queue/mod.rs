//! Task queue
//!
//! Priority-ordered scheduling of review/fix tasks with zombie detection and
//! a per-repository in-flight set that serializes fixes touching the same
//! working tree. Internal state sits behind a single mutex around the heap
//! and processing set. The queue is not durable by itself; durability is the
//! Store's responsibility.

use std::collections::{BinaryHeap, HashMap, HashSet};

use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

use crate::config::QueueConfig;
use crate::domain::{Task, TaskKind, TaskState};
use workstore::now_ms;

/// Errors from queue operations
#[derive(Debug, Error)]
pub enum QueueError {
    #[error("Task not found in queue: {0}")]
    NotFound(String),

    #[error("Task {id} is {state}, expected {expected}")]
    InvalidState {
        id: String,
        state: TaskState,
        expected: TaskState,
    },

    #[error("Task already queued: {0}")]
    Duplicate(String),
}

/// Heap entry: higher priority first, FIFO among equals
#[derive(Debug, Clone, PartialEq, Eq)]
struct HeapEntry {
    priority: i32,
    seq: u64,
    id: String,
}

impl Ord for HeapEntry {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.seq.cmp(&self.seq))
    }
}

impl PartialOrd for HeapEntry {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

/// What policy decided for one zombie
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ZombieOutcome {
    /// Reset to in-queue with the attempt count bumped
    Requeued { id: String, attempts: u32 },
    /// Attempt budget exhausted, task terminally failed
    Failed { id: String },
}

struct QueueInner {
    heap: BinaryHeap<HeapEntry>,
    /// All live (in-queue or processing) tasks by id
    tasks: HashMap<String, Task>,
    /// Ids currently processing
    processing: HashSet<String>,
    /// Repositories with a fix in flight
    repos_in_flight: HashSet<String>,
    seq: u64,
}

/// Priority task queue shared by the orchestrator workers
pub struct TaskQueue {
    config: QueueConfig,
    inner: Mutex<QueueInner>,
}

impl TaskQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(QueueInner {
                heap: BinaryHeap::new(),
                tasks: HashMap::new(),
                processing: HashSet::new(),
                repos_in_flight: HashSet::new(),
                seq: 0,
            }),
        }
    }

    /// Add a pending task; transitions it to in-queue
    pub async fn enqueue(&self, mut task: Task) -> Result<(), QueueError> {
        let mut inner = self.inner.lock().await;
        if inner.tasks.contains_key(&task.id) {
            return Err(QueueError::Duplicate(task.id));
        }

        task.set_state(TaskState::InQueue);
        inner.seq += 1;
        let entry = HeapEntry {
            priority: task.priority,
            seq: inner.seq,
            id: task.id.clone(),
        };
        debug!(id = %task.id, priority = task.priority, "Enqueued task");
        inner.heap.push(entry);
        inner.tasks.insert(task.id.clone(), task);
        Ok(())
    }

    /// Take the highest-priority eligible task, transitioning it to processing
    ///
    /// Fix tasks whose repository already has a fix in flight are held back
    /// and stay queued.
    pub async fn dequeue(&self) -> Option<Task> {
        let mut inner = self.inner.lock().await;
        let mut held_back = Vec::new();
        let mut picked = None;

        while let Some(entry) = inner.heap.pop() {
            // Stale entries survive requeues; skip any that no longer match
            // a live in-queue task.
            let eligible = match inner.tasks.get(&entry.id) {
                Some(task) if task.state == TaskState::InQueue => match (&task.kind, &task.repository) {
                    (TaskKind::Fix, Some(repo)) => !inner.repos_in_flight.contains(repo),
                    _ => true,
                },
                _ => continue,
            };

            if eligible {
                picked = Some(entry.id.clone());
                break;
            }
            held_back.push(entry);
        }

        for entry in held_back {
            inner.heap.push(entry);
        }

        let id = picked?;
        let task = inner.tasks.get_mut(&id)?;
        task.set_state(TaskState::Processing);
        task.processing_started_at = Some(now_ms());
        let task = task.clone();

        if let (TaskKind::Fix, Some(repo)) = (&task.kind, &task.repository) {
            inner.repos_in_flight.insert(repo.clone());
        }
        inner.processing.insert(id);
        debug!(id = %task.id, "Dequeued task for processing");
        Some(task)
    }

    /// Mark a processing task completed
    pub async fn complete(&self, id: &str) -> Result<Task, QueueError> {
        self.finish(id, TaskState::Completed, None).await
    }

    /// Mark a processing task terminally failed
    pub async fn fail(&self, id: &str, error: impl Into<String>) -> Result<Task, QueueError> {
        self.finish(id, TaskState::Failed, Some(error.into())).await
    }

    async fn finish(&self, id: &str, state: TaskState, error: Option<String>) -> Result<Task, QueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.processing.contains(id) {
            let current = inner
                .tasks
                .get(id)
                .map(|t| t.state)
                .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
            return Err(QueueError::InvalidState {
                id: id.to_string(),
                state: current,
                expected: TaskState::Processing,
            });
        }

        inner.processing.remove(id);
        let mut task = inner
            .tasks
            .remove(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        if let (TaskKind::Fix, Some(repo)) = (&task.kind, &task.repository) {
            inner.repos_in_flight.remove(repo);
        }
        task.set_state(state);
        task.error = error;
        debug!(id = %task.id, state = %task.state, "Task finished");
        Ok(task)
    }

    /// Processing tasks older than the configured zombie age
    pub async fn detect_zombies(&self) -> Vec<Task> {
        self.detect_zombies_at(now_ms()).await
    }

    async fn detect_zombies_at(&self, now: i64) -> Vec<Task> {
        let inner = self.inner.lock().await;
        let age_ms = (self.config.zombie_age_seconds * 1000) as i64;
        inner
            .processing
            .iter()
            .filter_map(|id| inner.tasks.get(id))
            .filter(|task| task.processing_age_ms(now) >= age_ms)
            .cloned()
            .collect()
    }

    /// Apply the requeue-or-fail policy to every current zombie
    pub async fn reap_zombies(&self) -> Vec<ZombieOutcome> {
        self.reap_zombies_at(now_ms()).await
    }

    async fn reap_zombies_at(&self, now: i64) -> Vec<ZombieOutcome> {
        let zombies = self.detect_zombies_at(now).await;
        let mut outcomes = Vec::new();

        for zombie in zombies {
            let outcome = if zombie.attempts + 1 >= self.config.max_attempts {
                warn!(id = %zombie.id, attempts = zombie.attempts, "Zombie task out of attempts, failing");
                match self.fail(&zombie.id, "zombie: exceeded max attempts").await {
                    Ok(_) => ZombieOutcome::Failed { id: zombie.id },
                    Err(_) => continue,
                }
            } else {
                match self.requeue(&zombie.id).await {
                    Ok(attempts) => {
                        warn!(id = %zombie.id, attempts, "Requeued zombie task");
                        ZombieOutcome::Requeued { id: zombie.id, attempts }
                    }
                    Err(_) => continue,
                }
            };
            outcomes.push(outcome);
        }
        outcomes
    }

    /// Reset a processing task to in-queue, bumping its attempt count
    ///
    /// Priority is kept; the task re-enters FIFO order at the back of its
    /// priority band.
    pub async fn requeue(&self, id: &str) -> Result<u32, QueueError> {
        let mut inner = self.inner.lock().await;
        if !inner.processing.remove(id) {
            return Err(QueueError::NotFound(id.to_string()));
        }

        inner.seq += 1;
        let seq = inner.seq;
        let task = inner
            .tasks
            .get_mut(id)
            .ok_or_else(|| QueueError::NotFound(id.to_string()))?;
        task.set_state(TaskState::InQueue);
        task.processing_started_at = None;
        task.attempts += 1;
        let attempts = task.attempts;
        let entry = HeapEntry {
            priority: task.priority,
            seq,
            id: id.to_string(),
        };
        let repo = match (&task.kind, &task.repository) {
            (TaskKind::Fix, Some(repo)) => Some(repo.clone()),
            _ => None,
        };
        inner.heap.push(entry);
        if let Some(repo) = repo {
            inner.repos_in_flight.remove(&repo);
        }
        Ok(attempts)
    }

    /// Number of in-queue tasks
    pub async fn queued_len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.tasks.len() - inner.processing.len()
    }

    /// Number of processing tasks
    pub async fn processing_len(&self) -> usize {
        let inner = self.inner.lock().await;
        inner.processing.len()
    }
}
