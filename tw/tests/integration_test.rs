//! End-to-end scenarios over the orchestration core with mock adapters

use std::path::PathBuf;
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::json;

use turbowrap::config::Config;
use turbowrap::domain::{FixOutcome, Recommendation, RepoType, Severity, Task, TaskKind};
use turbowrap::error::CoreError;
use turbowrap::fix::{FixOrchestrator, FixRequest};
use turbowrap::git::mock::MockGit;
use turbowrap::llm::mock::MockInvoker;
use turbowrap::prompts::PromptLoader;
use turbowrap::queue::TaskQueue;
use turbowrap::review::{ReviewOrchestrator, ReviewRequest, ReviewSource};
use turbowrap::store::mock::MemoryStore;
use turbowrap::store::Store;
use turbowrap::worker::{TaskRunner, WorkerPool};
use turbowrap::Issue;

fn verdict(score: u8) -> String {
    format!(r#"{{"satisfaction_score": {}, "feedback": "keep going"}}"#, score)
}

fn issue_output(file: &str, line: u32, severity: &str, category: &str, message: &str) -> String {
    json!({
        "issues": [{
            "file": file,
            "line": line,
            "severity": severity,
            "category": category,
            "message": message
        }]
    })
    .to_string()
}

fn frontend_source() -> ReviewSource {
    ReviewSource::Files {
        root: PathBuf::from("/repo"),
        files: vec!["src/b.ts".to_string(), "src/app.tsx".to_string()],
    }
}

fn serial_config() -> Config {
    let mut config = Config::default();
    config.concurrency.max_reviewers_in_flight = 1;
    config
}

fn review_orchestrator(invoker: Arc<MockInvoker>, store: Arc<MemoryStore>, config: Config) -> ReviewOrchestrator {
    ReviewOrchestrator::new(invoker, store, Arc::new(PromptLoader::embedded_only()), config)
}

struct ReviewRunner {
    orchestrator: ReviewOrchestrator,
    request: ReviewRequest,
}

#[async_trait]
impl TaskRunner for ReviewRunner {
    async fn run(&self, task: &Task) -> Result<(), CoreError> {
        self.orchestrator.review(task, self.request.clone()).await.map(|_| ())
    }
}

/// A review request travels queue -> worker -> orchestrator -> store, and
/// two reviewers flagging the same finding merge with a consensus bonus.
#[tokio::test]
async fn test_review_through_queue_with_consensus_dedup() {
    // Frontend repo: two reviewers, run serially. Both flag the same
    // high/quality issue at src/b.ts:42.
    let invoker = Arc::new(MockInvoker::new(vec![
        &issue_output("src/b.ts", 42, "high", "quality", "duplicated state handling"),
        &verdict(70),
        &issue_output("src/b.ts", 42, "high", "quality", "state handling is duplicated across components"),
        &verdict(75),
    ]));
    let store = Arc::new(MemoryStore::new());
    let orchestrator = review_orchestrator(invoker, store.clone(), serial_config());

    let task = Task::new(TaskKind::Review, "review web app", json!({}));
    let task_id = task.id.clone();

    let queue = Arc::new(TaskQueue::new(serial_config().queue));
    queue.enqueue(task).await.unwrap();

    let runner = Arc::new(ReviewRunner {
        orchestrator,
        request: ReviewRequest::new(frontend_source()),
    });
    WorkerPool::new(queue.clone(), runner, 2).drain().await;

    assert_eq!(queue.processing_len().await, 0);
    let report = store.load_report(&task_id).await.unwrap().expect("report saved");

    assert_eq!(report.repo_type, RepoType::Frontend);
    assert_eq!(report.reviewers.len(), 2);
    // The two findings merged: one issue, two flaggers, consensus bonus
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].flagged_by.len(), 2);
    assert_eq!(report.issues[0].priority, 35);
    // The longer message survived the merge
    assert_eq!(report.issues[0].message, "state handling is duplicated across components");
    assert_eq!(report.overall_score, 9.0);
    assert_eq!(report.recommendation, Recommendation::ApproveWithChanges);
}

/// Resuming a fully completed review replays checkpoints without a single
/// LLM call and reproduces the report.
#[tokio::test]
async fn test_resume_after_completion_is_pure_replay() {
    let store = Arc::new(MemoryStore::new());
    let task = Task::new(TaskKind::Review, "review web app", json!({}));

    // First run: both frontend reviewers complete
    let invoker = Arc::new(MockInvoker::new(vec![
        &issue_output("src/b.ts", 42, "critical", "security", "token leaks into logs"),
        &verdict(80),
        &json!({"issues": []}).to_string(),
        &verdict(85),
    ]));
    let orchestrator = review_orchestrator(invoker, store.clone(), serial_config());
    let original = orchestrator
        .review(&task, ReviewRequest::new(frontend_source()))
        .await
        .unwrap();

    // Second run against the same task: an invoker with no scripted
    // responses would fail loudly if any reviewer actually ran
    let empty_invoker = Arc::new(MockInvoker::new(vec![]));
    let orchestrator = review_orchestrator(empty_invoker.clone(), store.clone(), serial_config());
    let resumed = orchestrator
        .review(&task, ReviewRequest::new(frontend_source()))
        .await
        .unwrap();

    assert_eq!(empty_invoker.call_count(), 0);
    assert_eq!(resumed.issues, original.issues);
    assert_eq!(resumed.overall_score, original.overall_score);
    assert_eq!(resumed.recommendation, original.recommendation);
    assert_eq!(resumed.severity_counts, original.severity_counts);
    assert!(resumed.reviewers.iter().all(|r| r.resumed));
}

/// After a crash mid-review, only the missing reviewer runs; the completed
/// ones are restored verbatim from their checkpoints.
#[tokio::test]
async fn test_resume_after_crash_runs_only_missing_reviewer() {
    let store = Arc::new(MemoryStore::new());
    let task = Task::new(TaskKind::Review, "review web app", json!({}));

    // Simulate the pre-crash run: the first reviewer completed and
    // checkpointed, then the process died
    {
        use turbowrap::domain::{Category, Checkpoint, ConvergenceStatus};
        let issue = Issue::new("src/b.ts", Severity::High, Category::Architecture, "component does too much")
            .with_line(7)
            .with_reviewer("reviewer_fe_architecture");
        let cp = Checkpoint::new(&task.id, "reviewer_fe_architecture", ConvergenceStatus::ThresholdMet)
            .with_issues(vec![issue])
            .with_outcome(Some(77), 2);
        store.save_checkpoint(&cp).await.unwrap();
    }

    // Resume: only reviewer_fe_quality should invoke the backends
    let invoker = Arc::new(MockInvoker::new(vec![
        &json!({"issues": []}).to_string(),
        &verdict(90),
    ]));
    let orchestrator = review_orchestrator(invoker.clone(), store.clone(), serial_config());
    let report = orchestrator
        .review(&task, ReviewRequest::new(frontend_source()))
        .await
        .unwrap();

    // One loop ran: two invocations
    assert_eq!(invoker.call_count(), 2);

    let restored = report
        .reviewers
        .iter()
        .find(|r| r.reviewer == "reviewer_fe_architecture")
        .unwrap();
    assert!(restored.resumed);
    assert_eq!(restored.satisfaction, Some(77));
    assert_eq!(restored.iterations, 2);

    // The checkpointed issue flows through aggregation untouched
    assert_eq!(report.issues.len(), 1);
    assert_eq!(report.issues[0].file, "src/b.ts");
    assert_eq!(report.issues[0].start_line, Some(7));
    assert_eq!(report.issues[0].flagged_by, vec!["reviewer_fe_architecture".to_string()]);
}

/// Fix batching packs {16, 4, 4, 4, 4} into three batches, runs each loop,
/// and produces exactly one commit for all applied edits.
#[tokio::test]
async fn test_fix_batching_end_to_end() {
    fn batch_edit(files: &[&str]) -> String {
        let edits: Vec<_> = files
            .iter()
            .map(|f| json!({"file": f, "content": format!("patched {}", f)}))
            .collect();
        json!({"edits": edits, "notes": "patched"}).to_string()
    }

    // Issue workloads: a=16 (4x4), b..e=4 (4x1) -> batches [a], [b,c,d], [e]
    let issues = vec![
        Issue::new("src/a.go", Severity::High, turbowrap::Category::Performance, "n+1 query").with_estimates(4, 4),
        Issue::new("src/b.go", Severity::Medium, turbowrap::Category::Quality, "dead code").with_estimates(4, 1),
        Issue::new("src/c.go", Severity::Medium, turbowrap::Category::Quality, "long function").with_estimates(4, 1),
        Issue::new("src/d.go", Severity::Medium, turbowrap::Category::Quality, "magic numbers").with_estimates(4, 1),
        Issue::new("src/e.go", Severity::Medium, turbowrap::Category::Quality, "shadowed variable").with_estimates(4, 1),
    ];

    let invoker = Arc::new(MockInvoker::new(vec![
        // Batch 1: the oversize issue
        &batch_edit(&["src/a.go"]),
        &verdict(97),
        // Batch 2: three issues
        &batch_edit(&["src/b.go", "src/c.go", "src/d.go"]),
        &verdict(96),
        // Batch 3: the spillover issue
        &batch_edit(&["src/e.go"]),
        &verdict(98),
    ]));
    let git = Arc::new(MockGit::new());
    let store = Arc::new(MemoryStore::new());
    let orchestrator = FixOrchestrator::new(
        invoker,
        store.clone(),
        git.clone(),
        Arc::new(PromptLoader::embedded_only()),
        Config::default(),
    );

    let task = Task::new(TaskKind::Fix, "fix backend", json!({}));
    let report = orchestrator
        .fix(&task, FixRequest::new("org/api", "/tmp/repo", issues))
        .await
        .unwrap();

    assert_eq!(report.batches.len(), 3);
    assert_eq!(report.batches[0].issue_count, 1);
    assert_eq!(report.batches[1].issue_count, 3);
    assert_eq!(report.batches[2].issue_count, 1);

    // All five issues fixed, exactly one commit
    assert_eq!(report.outcome_count(FixOutcome::Fixed), 5);
    assert_eq!(git.commit_count(), 1);
    assert_eq!(git.commits()[0].files.len(), 5);
    assert!(report.commit.is_some());
    assert!(store.load_fix_report(&task.id).await.unwrap().is_some());

    // Loop run history was persisted for every batch
    assert_eq!(store.run_count(), 3);
}

/// A worker marks its task failed when the orchestrator reports an error,
/// and the failure is visible on the queue side.
#[tokio::test]
async fn test_failed_review_task_fails_on_queue() {
    struct FailingRunner;

    #[async_trait]
    impl TaskRunner for FailingRunner {
        async fn run(&self, task: &Task) -> Result<(), CoreError> {
            Err(CoreError::LoopFailed {
                scope: task.id.clone(),
                message: "all invocations failed".to_string(),
            })
        }
    }

    let queue = Arc::new(TaskQueue::new(Config::default().queue));
    let task = Task::new(TaskKind::Review, "doomed review", json!({}));
    queue.enqueue(task).await.unwrap();

    WorkerPool::new(queue.clone(), Arc::new(FailingRunner), 1).drain().await;

    assert_eq!(queue.queued_len().await, 0);
    assert_eq!(queue.processing_len().await, 0);
}
