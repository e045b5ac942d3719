//! Review orchestrator
//!
//! Plans reviewer loops from the repo-type matrix, fans them out up to the
//! configured concurrency, restores completed reviewers from checkpoints,
//! aggregates every reviewer's issues, and assembles the final report.

mod context;
mod matrix;

pub use context::{RepoContext, ReviewSource, detect_repo_type};
pub use matrix::{ReviewerRole, reviewers_for};

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use serde_json::json;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::aggregate;
use crate::checkpoint::CheckpointManager;
use crate::config::Config;
use crate::domain::{
    Backend, Checkpoint, ConvergenceStatus, FinalReport, Issue, LoopRun, LoopScope, ReviewerSummary, Task,
};
use crate::error::CoreError;
use crate::llm::{InvokeOptions, InvokeRequest, LlmError, LlmInvoker, parse_issues};
use crate::prompts::PromptLoader;
use crate::r#loop::{ChallengerEngine, EngineOptions, LoopParams, LoopPrompts};
use crate::store::Store;

/// A review request at the orchestrator boundary
#[derive(Debug, Clone)]
pub struct ReviewRequest {
    pub source: ReviewSource,

    /// Monorepo path prefix restricting the review
    pub workspace_path: Option<String>,

    /// Include the functional-analyst reviewer
    pub include_functional: bool,

    /// Run the challenger loop; disabled means one primary pass per reviewer
    pub challenger_enabled: bool,

    /// Override the configured satisfaction threshold
    pub satisfaction_threshold: Option<u8>,

    /// Override the configured soft iteration cap
    pub max_iterations: Option<u32>,

    /// Run the single-shot evaluator over the aggregated report
    pub evaluator_enabled: bool,

    /// Request-scoped cancellation handle
    pub cancel: CancellationToken,
}

impl ReviewRequest {
    pub fn new(source: ReviewSource) -> Self {
        Self {
            source,
            workspace_path: None,
            include_functional: false,
            challenger_enabled: true,
            satisfaction_threshold: None,
            max_iterations: None,
            evaluator_enabled: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// One reviewer's terminal result within a review
struct ReviewerOutcome {
    summary: ReviewerSummary,
    issues: Vec<Issue>,
}

/// Orchestrates one review request end to end
pub struct ReviewOrchestrator {
    invoker: Arc<dyn LlmInvoker>,
    store: Arc<dyn Store>,
    checkpoints: CheckpointManager,
    prompts: Arc<PromptLoader>,
    config: Config,
}

impl ReviewOrchestrator {
    pub fn new(invoker: Arc<dyn LlmInvoker>, store: Arc<dyn Store>, prompts: Arc<PromptLoader>, config: Config) -> Self {
        let checkpoints = CheckpointManager::new(store.clone());
        Self {
            invoker,
            store,
            checkpoints,
            prompts,
            config,
        }
    }

    /// Run a review task to a final report
    ///
    /// Reviewer failures are isolated: the report is flagged `partial` and
    /// the remaining reviewers still contribute. Only cancellation aborts
    /// the whole request.
    pub async fn review(&self, task: &Task, request: ReviewRequest) -> Result<FinalReport, CoreError> {
        let ctx = RepoContext::build(&request.source, request.workspace_path.clone(), &self.config.fix)
            .map_err(|e| CoreError::Repo(e.to_string()))?;
        let roles = reviewers_for(ctx.repo_type, request.include_functional);
        info!(
            task = %task.id,
            repo_type = %ctx.repo_type,
            reviewers = roles.len(),
            "Starting review"
        );

        let existing = self.checkpoints.load(&task.id).await?;
        let mut outcomes: Vec<ReviewerOutcome> = Vec::new();

        // Completed reviewers come back verbatim from their checkpoints
        for role in &roles {
            if let Some(cp) = existing.get(role.name) {
                debug!(task = %task.id, reviewer = role.name, "Restoring reviewer from checkpoint");
                outcomes.push(restore_outcome(cp));
            }
        }

        // Remaining reviewers fan out, bounded by the concurrency limit
        let semaphore = Arc::new(Semaphore::new(self.config.concurrency.max_reviewers_in_flight.max(1)));
        let mut jobs = Vec::new();
        for role in roles.iter().filter(|r| !existing.contains_key(r.name)) {
            jobs.push(self.reviewer_job(task, &request, &ctx, *role)?.run(semaphore.clone()));
        }

        for result in join_all(jobs).await {
            match result {
                Ok(outcome) => outcomes.push(outcome),
                Err(e) if e.is_canceled() => {
                    request.cancel.cancel();
                    return Err(CoreError::Canceled);
                }
                Err(e) => return Err(e),
            }
        }

        // Stable report order regardless of completion order
        outcomes.sort_by(|a, b| a.summary.reviewer.cmp(&b.summary.reviewer));

        let all_issues: Vec<Issue> = outcomes.iter().flat_map(|o| o.issues.clone()).collect();
        let aggregated = aggregate::aggregate(all_issues);
        let partial = outcomes.iter().any(|o| o.summary.status == ConvergenceStatus::Failed);

        let mut report = FinalReport::new(&task.id, ctx.root.display().to_string(), ctx.repo_type);
        report.reviewers = outcomes.into_iter().map(|o| o.summary).collect();
        report.severity_counts = aggregated.severity_counts;
        report.overall_score = aggregated.overall_score;
        report.recommendation = aggregated.recommendation;
        report.next_steps = next_steps(&aggregated.severity_counts, partial);
        report.issues = aggregated.issues;
        report.partial = partial;

        if request.evaluator_enabled {
            report.evaluation = self.evaluate(&report, &request.cancel).await?;
        }

        self.store.save_report(&report).await?;
        info!(
            task = %task.id,
            issues = report.issues.len(),
            score = report.overall_score,
            recommendation = %report.recommendation,
            partial = report.partial,
            "Review complete"
        );
        Ok(report)
    }

    fn reviewer_job(
        &self,
        task: &Task,
        request: &ReviewRequest,
        ctx: &RepoContext,
        role: ReviewerRole,
    ) -> Result<ReviewerJob, CoreError> {
        let initial = self
            .prompts
            .render(
                "reviewer-initial",
                &json!({
                    "focus_area": role.focus,
                    "repo_type": ctx.repo_type.to_string(),
                    "repo_map": ctx.file_map(),
                    "workspace_path": ctx.workspace_path,
                }),
            )
            .map_err(|e| CoreError::Repo(e.to_string()))?;
        let refine_template = self
            .prompts
            .load("reviewer-refine")
            .map_err(|e| CoreError::Repo(e.to_string()))?;
        let challenger_template = self
            .prompts
            .load("review-challenger")
            .map_err(|e| CoreError::Repo(e.to_string()))?;

        let mut params = LoopParams::review(&self.config);
        if let Some(threshold) = request.satisfaction_threshold {
            params.satisfaction_threshold = threshold;
        }
        if let Some(max) = request.max_iterations {
            params.max_iterations = max;
        }

        Ok(ReviewerJob {
            invoker: self.invoker.clone(),
            store: self.store.clone(),
            checkpoints: self.checkpoints.clone(),
            task_id: task.id.clone(),
            role_name: role.name.to_string(),
            params,
            prompts: LoopPrompts {
                initial,
                refine_template,
                challenger_template,
            },
            challenger_enabled: request.challenger_enabled,
            invocation_timeout: Duration::from_secs(self.config.timeouts.invocation_seconds),
            reviewer_timeout: Duration::from_secs(self.config.timeouts.reviewer_seconds),
            thinking_budget_tokens: Some(self.config.thinking.budget_tokens),
            cancel: request.cancel.child_token(),
        })
    }

    /// Single-shot qualitative assessment of the aggregated report
    async fn evaluate(&self, report: &FinalReport, cancel: &CancellationToken) -> Result<Option<String>, CoreError> {
        let top_issues: String = report
            .issues
            .iter()
            .take(5)
            .map(|i| {
                format!(
                    "- {}:{} [{}/{}] {}",
                    i.file,
                    i.start_line.map(|l| l.to_string()).unwrap_or_else(|| "?".to_string()),
                    i.severity,
                    i.category,
                    i.message
                )
            })
            .collect::<Vec<_>>()
            .join("\n");

        let prompt = self
            .prompts
            .render(
                "evaluator",
                &json!({
                    "repository": report.repository,
                    "repo_type": report.repo_type.to_string(),
                    "overall_score": format!("{:.1}", report.overall_score),
                    "recommendation": report.recommendation.to_string(),
                    "issue_count": report.issues.len(),
                    "critical_count": report.severity_counts.critical,
                    "high_count": report.severity_counts.high,
                    "top_issues": top_issues,
                }),
            )
            .map_err(|e| CoreError::Repo(e.to_string()))?;

        let options = InvokeOptions {
            timeout: Duration::from_secs(self.config.timeouts.invocation_seconds),
            cancel: cancel.clone(),
            ..InvokeOptions::default()
        };
        match self
            .invoker
            .invoke(InvokeRequest::new(Backend::Primary, "evaluator", prompt).with_options(options))
            .await
        {
            Ok(invocation) => Ok(Some(invocation.output.trim().to_string())),
            Err(LlmError::Canceled) => Err(CoreError::Canceled),
            Err(e) => {
                warn!(error = %e, "Evaluator invocation failed, omitting assessment");
                Ok(None)
            }
        }
    }
}

/// Everything one reviewer loop needs, owned so it can run on its own task
struct ReviewerJob {
    invoker: Arc<dyn LlmInvoker>,
    store: Arc<dyn Store>,
    checkpoints: CheckpointManager,
    task_id: String,
    role_name: String,
    params: LoopParams,
    prompts: LoopPrompts,
    challenger_enabled: bool,
    invocation_timeout: Duration,
    reviewer_timeout: Duration,
    thinking_budget_tokens: Option<u32>,
    cancel: CancellationToken,
}

impl ReviewerJob {
    async fn run(self, semaphore: Arc<Semaphore>) -> Result<ReviewerOutcome, CoreError> {
        let _permit = semaphore
            .acquire_owned()
            .await
            .map_err(|_| CoreError::Canceled)?;

        let run = self.execute_loop().await?;

        // Persist the run history, best effort
        if let Err(e) = self.store.save_run(&run).await {
            warn!(task = %self.task_id, reviewer = %self.role_name, error = %e, "Failed to persist loop run");
        }

        let (issues, parse_error) = if run.status.is_usable() {
            match run.final_primary() {
                Some(primary) => match parse_issues(&primary.output) {
                    Ok(mut issues) => {
                        for issue in &mut issues {
                            issue.flagged_by = vec![self.role_name.clone()];
                        }
                        (issues, None)
                    }
                    Err(e) => {
                        warn!(reviewer = %self.role_name, error = %e, "Reviewer output unparseable");
                        (Vec::new(), Some(format!("unparseable review output: {}", e)))
                    }
                },
                None => (Vec::new(), Some("loop produced no primary output".to_string())),
            }
        } else {
            (Vec::new(), run.error.clone())
        };

        let status = if parse_error.is_some() && run.status.is_usable() {
            ConvergenceStatus::Failed
        } else {
            run.status
        };

        let summary = ReviewerSummary {
            reviewer: self.role_name.clone(),
            status,
            satisfaction: run.satisfaction,
            iterations: run.iteration,
            issue_count: issues.len(),
            resumed: false,
            error: parse_error,
        };

        // Terminal loop -> exactly one checkpoint for this reviewer
        let checkpoint = Checkpoint::new(&self.task_id, &self.role_name, status)
            .with_issues(issues.clone())
            .with_outcome(run.satisfaction, run.iteration);
        if let Err(e) = self.checkpoints.save(checkpoint).await {
            warn!(task = %self.task_id, reviewer = %self.role_name, error = %e, "Failed to save checkpoint");
        }

        Ok(ReviewerOutcome { summary, issues })
    }

    async fn execute_loop(&self) -> Result<LoopRun, CoreError> {
        let scope = LoopScope::Reviewer {
            name: self.role_name.clone(),
        };

        if !self.challenger_enabled {
            return self.single_pass(scope).await;
        }

        let options = EngineOptions {
            invocation_timeout: self.invocation_timeout,
            thinking_budget_tokens: self.thinking_budget_tokens,
            cancel: self.cancel.clone(),
        };
        let engine = ChallengerEngine::new(
            self.invoker.clone(),
            self.params.clone(),
            self.role_name.clone(),
            "review_challenger",
            self.prompts.clone(),
        )
        .with_options(options);

        match tokio::time::timeout(self.reviewer_timeout, engine.run(&self.task_id, scope.clone())).await {
            Ok(Ok(run)) => Ok(run),
            Ok(Err(LlmError::Canceled)) => Err(CoreError::Canceled),
            Ok(Err(e)) => {
                let mut run = LoopRun::new(&self.task_id, scope);
                run.error = Some(e.to_string());
                run.finish(ConvergenceStatus::Failed);
                Ok(run)
            }
            Err(_) => {
                // Per-reviewer timeout cancels this loop only
                warn!(reviewer = %self.role_name, timeout = ?self.reviewer_timeout, "Reviewer timed out");
                self.cancel.cancel();
                let mut run = LoopRun::new(&self.task_id, scope);
                run.error = Some(format!("reviewer timed out after {:?}", self.reviewer_timeout));
                run.finish(ConvergenceStatus::Failed);
                Ok(run)
            }
        }
    }

    /// Challenger disabled: one primary pass, accepted as-is
    async fn single_pass(&self, scope: LoopScope) -> Result<LoopRun, CoreError> {
        let options = InvokeOptions {
            thinking_budget_tokens: self.thinking_budget_tokens,
            timeout: self.invocation_timeout,
            cancel: self.cancel.clone(),
            ..InvokeOptions::default()
        };
        let request =
            InvokeRequest::new(Backend::Primary, self.role_name.clone(), self.prompts.initial.clone()).with_options(options);

        let mut run = LoopRun::new(&self.task_id, scope);
        match self.invoker.invoke(request).await {
            Ok(invocation) => {
                run.iteration = 1;
                run.invocations.push(invocation);
                run.finish(ConvergenceStatus::ThresholdMet);
            }
            Err(LlmError::Canceled) => return Err(CoreError::Canceled),
            Err(e) => {
                run.error = Some(e.to_string());
                run.finish(ConvergenceStatus::Failed);
            }
        }
        Ok(run)
    }
}

fn restore_outcome(cp: &Checkpoint) -> ReviewerOutcome {
    ReviewerOutcome {
        summary: ReviewerSummary {
            reviewer: cp.reviewer.clone(),
            status: cp.status,
            satisfaction: cp.satisfaction,
            iterations: cp.iterations,
            issue_count: cp.issues.len(),
            resumed: true,
            error: None,
        },
        issues: cp.issues.clone(),
    }
}

fn next_steps(counts: &crate::domain::SeverityCounts, partial: bool) -> Vec<String> {
    let mut steps = Vec::new();
    if counts.critical > 0 {
        steps.push(format!("Fix {} critical issue(s) before merging", counts.critical));
    }
    if counts.high > 0 {
        steps.push(format!("Address {} high-severity issue(s)", counts.high));
    }
    if counts.medium + counts.low > 0 {
        steps.push(format!(
            "Schedule {} medium/low issue(s) for cleanup",
            counts.medium + counts.low
        ));
    }
    if partial {
        steps.push("Re-run the review: at least one reviewer failed".to_string());
    }
    if steps.is_empty() {
        steps.push("No blocking issues found".to_string());
    }
    steps
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::{Recommendation, RepoType, TaskKind};
    use crate::llm::mock::MockInvoker;
    use crate::store::mock::MemoryStore;
    use serde_json::json;

    fn orchestrator(invoker: Arc<MockInvoker>, store: Arc<MemoryStore>) -> ReviewOrchestrator {
        ReviewOrchestrator::new(invoker, store, Arc::new(PromptLoader::embedded_only()), Config::default())
    }

    fn backend_source() -> ReviewSource {
        ReviewSource::Files {
            root: std::path::PathBuf::from("/repo"),
            files: vec!["src/main.go".to_string(), "src/db.go".to_string()],
        }
    }

    fn review_task() -> Task {
        Task::new(TaskKind::Review, "review repo", json!({}))
    }

    fn issues_output(file: &str) -> String {
        json!({
            "issues": [{
                "file": file,
                "line": 10,
                "severity": "critical",
                "category": "security",
                "message": "sql injection via string concatenation"
            }]
        })
        .to_string()
    }

    fn verdict(score: u8) -> String {
        format!(r#"{{"satisfaction_score": {}, "feedback": "ok"}}"#, score)
    }

    #[tokio::test]
    async fn test_single_critical_review() {
        // Three backend reviewers; each satisfies the challenger in one
        // iteration. Only the security reviewer reports an issue.
        let invoker = Arc::new(MockInvoker::with_results(vec![
            // Reviewers run sequentially under the mock because each loop
            // consumes two scripted responses in order
            Ok(issues_output("src/a.go")),
            Ok(verdict(55)),
            Ok(json!({"issues": []}).to_string()),
            Ok(verdict(60)),
            Ok(json!({"issues": []}).to_string()),
            Ok(verdict(70)),
        ]));
        let store = Arc::new(MemoryStore::new());
        let task = review_task();

        let mut config = Config::default();
        config.concurrency.max_reviewers_in_flight = 1;
        let orchestrator = ReviewOrchestrator::new(
            invoker,
            store.clone(),
            Arc::new(PromptLoader::embedded_only()),
            config,
        );

        let report = orchestrator
            .review(&task, ReviewRequest::new(backend_source()))
            .await
            .unwrap();

        assert_eq!(report.repo_type, RepoType::Backend);
        assert_eq!(report.reviewers.len(), 3);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].priority, 60);
        assert_eq!(report.overall_score, 8.0);
        assert_eq!(report.recommendation, Recommendation::RequestChanges);
        assert!(!report.partial);
        assert_eq!(store.report_count(), 1);
    }

    #[tokio::test]
    async fn test_reviewer_failure_isolated_and_partial() {
        let invoker = Arc::new(MockInvoker::with_results(vec![
            Ok(issues_output("src/a.go")),
            Ok(verdict(80)),
            // Second reviewer's primary dies outright
            Err(LlmError::Unavailable("backend down".to_string())),
            Ok(json!({"issues": []}).to_string()),
            Ok(verdict(80)),
        ]));
        let store = Arc::new(MemoryStore::new());
        let task = review_task();

        let mut config = Config::default();
        config.concurrency.max_reviewers_in_flight = 1;
        let orchestrator = ReviewOrchestrator::new(
            invoker,
            store.clone(),
            Arc::new(PromptLoader::embedded_only()),
            config,
        );

        let report = orchestrator
            .review(&task, ReviewRequest::new(backend_source()))
            .await
            .unwrap();

        assert!(report.partial);
        assert_eq!(
            report
                .reviewers
                .iter()
                .filter(|r| r.status == ConvergenceStatus::Failed)
                .count(),
            1
        );
        // The surviving reviewers still contribute
        assert_eq!(report.issues.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_skips_checkpointed_reviewers() {
        let store = Arc::new(MemoryStore::new());
        let task = review_task();

        // Two reviewers already completed before the "crash"
        let cp_a = Checkpoint::new(&task.id, "reviewer_be_architecture", ConvergenceStatus::ThresholdMet)
            .with_issues(vec![
                Issue::new("src/x.go", crate::domain::Severity::High, crate::domain::Category::Architecture, "layering")
                    .with_line(3)
                    .with_reviewer("reviewer_be_architecture"),
            ])
            .with_outcome(Some(70), 2);
        let cp_b = Checkpoint::new(&task.id, "reviewer_be_security", ConvergenceStatus::ThresholdMet)
            .with_outcome(Some(65), 1);
        store.save_checkpoint(&cp_a).await.unwrap();
        store.save_checkpoint(&cp_b).await.unwrap();

        // Only the performance reviewer still needs to run
        let invoker = Arc::new(MockInvoker::new(vec![
            &json!({"issues": []}).to_string(),
            &verdict(90),
        ]));
        let orchestrator = orchestrator(invoker.clone(), store.clone());

        let report = orchestrator
            .review(&task, ReviewRequest::new(backend_source()))
            .await
            .unwrap();

        // Exactly one loop (two invocations) ran
        assert_eq!(invoker.call_count(), 2);
        assert_eq!(report.reviewers.len(), 3);
        let resumed: Vec<_> = report.reviewers.iter().filter(|r| r.resumed).collect();
        assert_eq!(resumed.len(), 2);

        // Restored issues flow into the aggregate verbatim
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.issues[0].file, "src/x.go");
    }

    #[tokio::test]
    async fn test_zero_reviewers_yields_clean_report() {
        // A repo with no classifiable files gets the "other" general
        // reviewer; emptying its output still yields a clean report. Zero
        // issues after aggregation must score 10.0 / approve.
        let invoker = Arc::new(MockInvoker::new(vec![
            &json!({"issues": []}).to_string(),
            &verdict(95),
        ]));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(invoker, store);

        let source = ReviewSource::Files {
            root: std::path::PathBuf::from("/repo"),
            files: vec!["README.md".to_string()],
        };
        let report = orchestrator
            .review(&review_task(), ReviewRequest::new(source))
            .await
            .unwrap();

        assert_eq!(report.repo_type, RepoType::Other);
        assert_eq!(report.overall_score, 10.0);
        assert_eq!(report.recommendation, Recommendation::Approve);
    }

    #[tokio::test]
    async fn test_challenger_disabled_single_pass() {
        let invoker = Arc::new(MockInvoker::new(vec![&issues_output("src/a.go")]));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(invoker.clone(), store);

        let source = ReviewSource::Files {
            root: std::path::PathBuf::from("/repo"),
            files: vec!["README.md".to_string()],
        };
        let mut request = ReviewRequest::new(source);
        request.challenger_enabled = false;

        let report = orchestrator.review(&review_task(), request).await.unwrap();
        // One reviewer role ("other" repo), one primary call, no challenger
        assert_eq!(invoker.call_count(), 1);
        assert_eq!(report.issues.len(), 1);
        assert_eq!(report.reviewers[0].satisfaction, None);
    }

    #[tokio::test]
    async fn test_cancellation_aborts_review() {
        let invoker = Arc::new(MockInvoker::new(vec!["unused"]));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(invoker, store);

        let mut request = ReviewRequest::new(backend_source());
        request.cancel.cancel();

        let err = orchestrator.review(&review_task(), request).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_evaluator_appended() {
        let invoker = Arc::new(MockInvoker::new(vec![
            &json!({"issues": []}).to_string(),
            &verdict(95),
            "The codebase is in good shape overall.",
        ]));
        let store = Arc::new(MemoryStore::new());
        let orchestrator = orchestrator(invoker, store);

        let source = ReviewSource::Files {
            root: std::path::PathBuf::from("/repo"),
            files: vec!["README.md".to_string()],
        };
        let mut request = ReviewRequest::new(source);
        request.evaluator_enabled = true;

        let report = orchestrator.review(&review_task(), request).await.unwrap();
        assert_eq!(
            report.evaluation.as_deref(),
            Some("The codebase is in good shape overall.")
        );
    }

    #[test]
    fn test_next_steps_empty_report() {
        let steps = next_steps(&crate::domain::SeverityCounts::default(), false);
        assert_eq!(steps, vec!["No blocking issues found".to_string()]);
    }
}
