//! Fix orchestrator
//!
//! Classifies and batches issues, runs one challenger loop per batch with
//! the fix-tuned parameters, applies surviving edits to the working tree,
//! enforces the workspace scope, and commits everything at once. Exactly
//! zero or one commit per fix request; no intermediate state is visible.

mod batch;

pub use batch::{BatchClass, IssueBatch, build_batches, classify};

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::config::Config;
use crate::domain::{
    BatchSummary, ConvergenceStatus, FixOutcome, FixReport, Issue, IssueResult, LoopScope, Task, normalize_path,
};
use crate::error::CoreError;
use crate::git::GitAdapter;
use crate::llm::{LlmError, LlmInvoker, parse_edits};
use crate::prompts::PromptLoader;
use crate::r#loop::{ChallengerEngine, EngineOptions, LoopParams, LoopPrompts};
use crate::store::Store;

/// Max bytes of current file content included per file in fixer prompts
const MAX_FILE_CONTEXT_BYTES: usize = 24_000;

/// A fix request at the orchestrator boundary
#[derive(Debug, Clone)]
pub struct FixRequest {
    /// Repository identifier (for queue serialization and reporting)
    pub repository: String,

    /// Checked-out working tree the git adapter operates on
    pub repo_root: PathBuf,

    /// Issues to fix, typically straight from a review report
    pub issues: Vec<Issue>,

    /// Monorepo path prefix the fix may not escape
    pub workspace_path: Option<String>,

    /// Push the fix branch after committing
    pub push: bool,

    /// Request-scoped cancellation handle
    pub cancel: CancellationToken,
}

impl FixRequest {
    pub fn new(repository: impl Into<String>, repo_root: impl Into<PathBuf>, issues: Vec<Issue>) -> Self {
        Self {
            repository: repository.into(),
            repo_root: repo_root.into(),
            issues,
            workspace_path: None,
            push: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Result of one batch's challenger loop
struct BatchOutcome {
    summary: BatchSummary,
    /// Edits applied to the working tree for this batch, when it succeeded
    edits: HashMap<String, String>,
    succeeded: bool,
}

/// Orchestrates one fix request end to end
pub struct FixOrchestrator {
    invoker: Arc<dyn LlmInvoker>,
    store: Arc<dyn Store>,
    git: Arc<dyn GitAdapter>,
    prompts: Arc<PromptLoader>,
    config: Config,
}

impl FixOrchestrator {
    pub fn new(
        invoker: Arc<dyn LlmInvoker>,
        store: Arc<dyn Store>,
        git: Arc<dyn GitAdapter>,
        prompts: Arc<PromptLoader>,
        config: Config,
    ) -> Self {
        Self {
            invoker,
            store,
            git,
            prompts,
            config,
        }
    }

    /// Run a fix task to a fix report
    ///
    /// Batch failures are isolated (their issues are independent by
    /// construction); scope violations revert the whole tree and fail every
    /// issue. The commit path runs at most once.
    pub async fn fix(&self, task: &Task, request: FixRequest) -> Result<FixReport, CoreError> {
        let batches = build_batches(request.issues.clone(), &self.config.fix);
        let branch = format!("{}/{}", self.config.fix.branch_prefix, task.id);
        info!(task = %task.id, batches = batches.len(), branch = %branch, "Starting fix");

        let mut report = FixReport::new(&task.id, &branch);
        if batches.is_empty() {
            return Ok(report);
        }

        self.git.create_or_checkout_branch(&branch).await?;

        // Batches run serially so working-tree edits never overlap
        let mut outcomes: Vec<(IssueBatch, BatchOutcome)> = Vec::new();
        for batch in batches {
            let outcome = self.run_batch(task, &request, &batch).await?;
            if outcome.succeeded {
                self.git.apply_edits(&outcome.edits).await?;
            }
            outcomes.push((batch, outcome));
        }

        report.batches = outcomes.iter().map(|(_, o)| o.summary.clone()).collect();

        // Workspace scope: every touched file must sit under the prefix
        if let Some(workspace) = &request.workspace_path
            && let Some(violation) = scope_violation(&outcomes, workspace)
        {
            warn!(task = %task.id, file = %violation, workspace = %workspace, "Workspace scope violation, reverting");
            self.git.revert().await?;
            report.error = Some(format!(
                "workspace scope violation: {} is outside {}",
                violation, workspace
            ));
            report.issues = request
                .issues
                .iter()
                .map(|issue| issue_result(issue, FixOutcome::Failed))
                .collect();
            self.store.save_fix_report(&report).await?;
            return Ok(report);
        }

        let any_succeeded = outcomes.iter().any(|(_, o)| o.succeeded);
        if any_succeeded {
            let message = commit_message(task, &outcomes);
            match self.git.commit_all(&message).await {
                Ok(commit) => {
                    info!(task = %task.id, %commit, "Committed fixes");
                    report.commit = Some(commit);
                    if request.push {
                        self.git.push(&branch).await?;
                        report.pushed = true;
                    }
                }
                Err(e) => {
                    // A failed commit is fatal to the fix: revert so zero
                    // commits also means a clean tree
                    warn!(task = %task.id, error = %e, "Commit failed, reverting");
                    self.git.revert().await?;
                    report.error = Some(format!("commit failed: {}", e));
                    report.issues = request
                        .issues
                        .iter()
                        .map(|issue| issue_result(issue, FixOutcome::Failed))
                        .collect();
                    self.store.save_fix_report(&report).await?;
                    return Ok(report);
                }
            }
        }

        report.issues = issue_outcomes(&outcomes);
        self.store.save_fix_report(&report).await?;
        info!(
            task = %task.id,
            fixed = report.outcome_count(FixOutcome::Fixed),
            failed = report.outcome_count(FixOutcome::Failed),
            committed = report.commit.is_some(),
            "Fix complete"
        );
        Ok(report)
    }

    async fn run_batch(&self, task: &Task, request: &FixRequest, batch: &IssueBatch) -> Result<BatchOutcome, CoreError> {
        debug!(task = %task.id, batch = %batch.id, issues = batch.issues.len(), "Running fix batch");

        let prompts = self.batch_prompts(request, batch).await?;
        let options = EngineOptions {
            invocation_timeout: Duration::from_secs(self.config.timeouts.invocation_seconds),
            thinking_budget_tokens: Some(self.config.thinking.budget_tokens),
            cancel: request.cancel.child_token(),
        };
        let engine = ChallengerEngine::new(
            self.invoker.clone(),
            LoopParams::fix(&self.config),
            "fixer",
            "fix_challenger",
            prompts,
        )
        .with_options(options);

        let scope = LoopScope::Batch {
            batch_id: batch.id.clone(),
        };
        let run = match engine.run(&task.id, scope).await {
            Ok(run) => run,
            Err(LlmError::Canceled) => return Err(CoreError::Canceled),
            Err(e) => return Err(CoreError::Llm(e)),
        };

        if let Err(e) = self.store.save_run(&run).await {
            warn!(task = %task.id, batch = %batch.id, error = %e, "Failed to persist loop run");
        }

        let accepted = accepted_status(run.status, run.satisfaction, &LoopParams::fix(&self.config));
        let mut summary = BatchSummary {
            batch_id: batch.id.clone(),
            status: run.status,
            satisfaction: run.satisfaction,
            issue_count: batch.issues.len(),
        };

        if !accepted {
            debug!(batch = %batch.id, status = %run.status, "Batch rejected");
            return Ok(BatchOutcome {
                summary,
                edits: HashMap::new(),
                succeeded: false,
            });
        }

        let edits = match run.final_primary().map(|inv| parse_edits(&inv.output)) {
            Some(Ok(edits)) if !edits.is_empty() => edits,
            Some(Ok(_)) => {
                warn!(batch = %batch.id, "Fixer produced no edits, marking batch failed");
                summary.status = ConvergenceStatus::Failed;
                return Ok(BatchOutcome {
                    summary,
                    edits: HashMap::new(),
                    succeeded: false,
                });
            }
            Some(Err(e)) => {
                warn!(batch = %batch.id, error = %e, "Fixer output unparseable, marking batch failed");
                summary.status = ConvergenceStatus::Failed;
                return Ok(BatchOutcome {
                    summary,
                    edits: HashMap::new(),
                    succeeded: false,
                });
            }
            None => {
                summary.status = ConvergenceStatus::Failed;
                return Ok(BatchOutcome {
                    summary,
                    edits: HashMap::new(),
                    succeeded: false,
                });
            }
        };

        Ok(BatchOutcome {
            summary,
            edits,
            succeeded: true,
        })
    }

    async fn batch_prompts(&self, request: &FixRequest, batch: &IssueBatch) -> Result<LoopPrompts, CoreError> {
        let issues_json = json!(
            batch
                .issues
                .iter()
                .map(|i| {
                    json!({
                        "file": i.file,
                        "line": i.start_line,
                        "severity": i.severity,
                        "category": i.category,
                        "message": i.message,
                        "suggestion": i.suggestion,
                        "current_code": i.current_code,
                        "suggested_code": i.suggested_code,
                    })
                })
                .collect::<Vec<_>>()
        );

        let mut file_contents = String::new();
        let mut seen = std::collections::HashSet::new();
        for issue in &batch.issues {
            if !seen.insert(issue.file.clone()) {
                continue;
            }
            let path = request.repo_root.join(&issue.file);
            match tokio::fs::read_to_string(&path).await {
                Ok(content) => {
                    let truncated = if content.len() > MAX_FILE_CONTEXT_BYTES {
                        format!("{}\n... [truncated]", &content[..MAX_FILE_CONTEXT_BYTES])
                    } else {
                        content
                    };
                    file_contents.push_str(&format!("=== {} ===\n{}\n\n", issue.file, truncated));
                }
                Err(e) => {
                    debug!(file = %issue.file, error = %e, "Could not read file for fixer context");
                    file_contents.push_str(&format!("=== {} === (unreadable: {})\n\n", issue.file, e));
                }
            }
        }

        let initial = self
            .prompts
            .render(
                "fixer-initial",
                &json!({
                    "workspace_path": request.workspace_path,
                    "issues": serde_json::to_string_pretty(&issues_json).unwrap_or_default(),
                    "file_contents": file_contents,
                }),
            )
            .map_err(|e| CoreError::Repo(e.to_string()))?;
        let refine_template = self
            .prompts
            .load("fixer-refine")
            .map_err(|e| CoreError::Repo(e.to_string()))?;
        let challenger_template = self
            .prompts
            .load("fix-challenger")
            .map_err(|e| CoreError::Repo(e.to_string()))?;

        Ok(LoopPrompts {
            initial,
            refine_template,
            challenger_template,
        })
    }
}

/// Whether a terminal loop status means the batch's edits are applied
///
/// Threshold and forced acceptance always pass; a stagnated loop passes only
/// when its final score reached the forced-acceptance bar.
fn accepted_status(status: ConvergenceStatus, satisfaction: Option<u8>, params: &LoopParams) -> bool {
    match status {
        ConvergenceStatus::ThresholdMet | ConvergenceStatus::ForcedAcceptance => true,
        ConvergenceStatus::Stagnated => {
            satisfaction.unwrap_or(0) >= params.forced_acceptance_threshold
        }
        _ => false,
    }
}

/// First edited file outside the workspace prefix, if any
fn scope_violation(outcomes: &[(IssueBatch, BatchOutcome)], workspace: &str) -> Option<String> {
    let prefix = format!("{}/", workspace.trim_end_matches('/'));
    for (_, outcome) in outcomes {
        for file in outcome.edits.keys() {
            let normalized = normalize_path(file);
            if normalized != workspace && !normalized.starts_with(&prefix) {
                return Some(file.clone());
            }
        }
    }
    None
}

/// Per-issue outcomes: fixed when its batch succeeded and its file was
/// edited, skipped when the batch succeeded without touching the file,
/// failed when the batch failed
fn issue_outcomes(outcomes: &[(IssueBatch, BatchOutcome)]) -> Vec<IssueResult> {
    let mut results = Vec::new();
    for (batch, outcome) in outcomes {
        for issue in &batch.issues {
            let result = if !outcome.succeeded {
                FixOutcome::Failed
            } else if outcome
                .edits
                .keys()
                .any(|f| normalize_path(f) == normalize_path(&issue.file))
            {
                FixOutcome::Fixed
            } else {
                FixOutcome::Skipped
            };
            results.push(issue_result(issue, result));
        }
    }
    results
}

fn issue_result(issue: &Issue, outcome: FixOutcome) -> IssueResult {
    IssueResult {
        file: issue.file.clone(),
        message: issue.message.clone(),
        outcome,
    }
}

fn commit_message(task: &Task, outcomes: &[(IssueBatch, BatchOutcome)]) -> String {
    let fixed: usize = outcomes
        .iter()
        .filter(|(_, o)| o.succeeded)
        .map(|(b, _)| b.issues.len())
        .sum();
    format!("fix: resolve {} reviewed issue(s) ({})", fixed, task.id)
}
