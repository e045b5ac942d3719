//! Worker pool
//!
//! Parallel workers with cooperative cancellation: each worker dequeues
//! tasks and hands them to a [`TaskRunner`], reporting completion or failure
//! back to the queue. The pool also applies the zombie requeue policy
//! between drain passes.

use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::Task;
use crate::error::CoreError;
use crate::queue::TaskQueue;

/// Executes one dequeued task
#[async_trait]
pub trait TaskRunner: Send + Sync {
    async fn run(&self, task: &Task) -> Result<(), CoreError>;
}

/// Bounded pool draining the task queue
pub struct WorkerPool {
    queue: Arc<TaskQueue>,
    runner: Arc<dyn TaskRunner>,
    workers: usize,
    cancel: CancellationToken,
}

impl WorkerPool {
    pub fn new(queue: Arc<TaskQueue>, runner: Arc<dyn TaskRunner>, workers: usize) -> Self {
        Self {
            queue,
            runner,
            workers: workers.max(1),
            cancel: CancellationToken::new(),
        }
    }

    /// Cancellation handle covering every worker
    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Run workers until the queue is empty (or the pool is canceled)
    pub async fn drain(&self) {
        self.queue.reap_zombies().await;

        let mut handles = Vec::new();
        for worker_id in 0..self.workers {
            let queue = self.queue.clone();
            let runner = self.runner.clone();
            let cancel = self.cancel.clone();
            handles.push(tokio::spawn(async move {
                worker_loop(worker_id, queue, runner, cancel).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "Worker task panicked");
            }
        }
    }
}

async fn worker_loop(worker_id: usize, queue: Arc<TaskQueue>, runner: Arc<dyn TaskRunner>, cancel: CancellationToken) {
    loop {
        if cancel.is_cancelled() {
            debug!(worker_id, "Worker canceled");
            return;
        }

        let Some(task) = queue.dequeue().await else {
            debug!(worker_id, "Queue empty, worker exiting");
            return;
        };

        info!(worker_id, task = %task.id, kind = %task.kind, "Worker picked up task");
        match runner.run(&task).await {
            Ok(()) => {
                if let Err(e) = queue.complete(&task.id).await {
                    warn!(task = %task.id, error = %e, "Failed to mark task complete");
                }
            }
            Err(e) if e.is_canceled() => {
                // Canceled tasks leave the processing set but stay failed so
                // the run is not silently lost
                warn!(task = %task.id, "Task canceled");
                let _ = queue.fail(&task.id, "canceled").await;
                return;
            }
            Err(e) => {
                warn!(task = %task.id, error = %e, "Task failed");
                let _ = queue.fail(&task.id, e.to_string()).await;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::QueueConfig;
    use crate::domain::TaskKind;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingRunner {
        ran: AtomicUsize,
        fail_label: Option<String>,
    }

    #[async_trait]
    impl TaskRunner for CountingRunner {
        async fn run(&self, task: &Task) -> Result<(), CoreError> {
            self.ran.fetch_add(1, Ordering::SeqCst);
            if let Some(label) = &self.fail_label
                && task.id.contains(label.as_str())
            {
                return Err(CoreError::LoopFailed {
                    scope: task.id.clone(),
                    message: "scripted failure".to_string(),
                });
            }
            Ok(())
        }
    }

    #[tokio::test]
    async fn test_drain_runs_all_tasks() {
        let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
        for i in 0..5 {
            queue
                .enqueue(Task::new(TaskKind::Review, &format!("job {}", i), serde_json::json!({})))
                .await
                .unwrap();
        }

        let runner = Arc::new(CountingRunner {
            ran: AtomicUsize::new(0),
            fail_label: None,
        });
        let pool = WorkerPool::new(queue.clone(), runner.clone(), 3);
        pool.drain().await;

        assert_eq!(runner.ran.load(Ordering::SeqCst), 5);
        assert_eq!(queue.queued_len().await, 0);
        assert_eq!(queue.processing_len().await, 0);
    }

    #[tokio::test]
    async fn test_failed_task_marked_failed() {
        let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
        queue
            .enqueue(Task::new(TaskKind::Review, "doomed job", serde_json::json!({})))
            .await
            .unwrap();
        queue
            .enqueue(Task::new(TaskKind::Review, "good job", serde_json::json!({})))
            .await
            .unwrap();

        let runner = Arc::new(CountingRunner {
            ran: AtomicUsize::new(0),
            fail_label: Some("doomed".to_string()),
        });
        let pool = WorkerPool::new(queue, runner.clone(), 1);
        pool.drain().await;

        // Both ran; the failure did not stop the drain
        assert_eq!(runner.ran.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_canceled_pool_stops_early() {
        let queue = Arc::new(TaskQueue::new(QueueConfig::default()));
        queue
            .enqueue(Task::new(TaskKind::Review, "job", serde_json::json!({})))
            .await
            .unwrap();

        let runner = Arc::new(CountingRunner {
            ran: AtomicUsize::new(0),
            fail_label: None,
        });
        let pool = WorkerPool::new(queue, runner.clone(), 1);
        pool.cancel_token().cancel();
        pool.drain().await;

        assert_eq!(runner.ran.load(Ordering::SeqCst), 0);
    }
}
