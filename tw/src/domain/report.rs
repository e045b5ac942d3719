//! Final report types for review and fix requests

use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use workstore::{IndexValue, Record, now_ms};

use super::id::generate_id;
use super::issue::{Issue, Severity};
use super::run::ConvergenceStatus;

/// Repository classification from the file-extension census
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RepoType {
    Backend,
    Frontend,
    Fullstack,
    Other,
}

impl std::fmt::Display for RepoType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Frontend => write!(f, "frontend"),
            Self::Fullstack => write!(f, "fullstack"),
            Self::Other => write!(f, "other"),
        }
    }
}

/// Terminal review recommendation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Recommendation {
    Approve,
    ApproveWithChanges,
    RequestChanges,
}

impl std::fmt::Display for Recommendation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Approve => write!(f, "approve"),
            Self::ApproveWithChanges => write!(f, "approve_with_changes"),
            Self::RequestChanges => write!(f, "request_changes"),
        }
    }
}

/// Issue counts per severity
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SeverityCounts {
    pub critical: usize,
    pub high: usize,
    pub medium: usize,
    pub low: usize,
}

impl SeverityCounts {
    /// Tally a list of issues
    pub fn tally(issues: &[Issue]) -> Self {
        let mut counts = Self::default();
        for issue in issues {
            match issue.severity {
                Severity::Critical => counts.critical += 1,
                Severity::High => counts.high += 1,
                Severity::Medium => counts.medium += 1,
                Severity::Low => counts.low += 1,
            }
        }
        counts
    }

    pub fn total(&self) -> usize {
        self.critical + self.high + self.medium + self.low
    }
}

/// Per-reviewer outcome with challenger metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewerSummary {
    pub reviewer: String,
    pub status: ConvergenceStatus,
    pub satisfaction: Option<u8>,
    pub iterations: u32,
    pub issue_count: usize,
    /// Whether this reviewer was restored from a checkpoint instead of run
    #[serde(default)]
    pub resumed: bool,
    #[serde(default)]
    pub error: Option<String>,
}

/// Terminal output of a review request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FinalReport {
    /// Unique identifier
    pub id: String,

    /// Owning task
    pub task_id: String,

    /// Repository descriptor (path or URL from the request)
    pub repository: String,

    pub repo_type: RepoType,

    pub reviewers: Vec<ReviewerSummary>,

    /// Deduplicated issues, sorted by priority descending
    pub issues: Vec<Issue>,

    pub severity_counts: SeverityCounts,

    /// Overall quality score in [0.0, 10.0]
    pub overall_score: f64,

    pub recommendation: Recommendation,

    /// Suggested follow-up actions
    pub next_steps: Vec<String>,

    /// True when at least one reviewer failed
    #[serde(default)]
    pub partial: bool,

    /// Qualitative assessment from the evaluator role, when enabled
    #[serde(default)]
    pub evaluation: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl FinalReport {
    /// Create an empty report shell for a task
    pub fn new(task_id: impl Into<String>, repository: impl Into<String>, repo_type: RepoType) -> Self {
        let repository = repository.into();
        Self {
            id: generate_id("report", &repository),
            task_id: task_id.into(),
            repository,
            repo_type,
            reviewers: Vec::new(),
            issues: Vec::new(),
            severity_counts: SeverityCounts::default(),
            overall_score: 10.0,
            recommendation: Recommendation::Approve,
            next_steps: Vec::new(),
            partial: false,
            evaluation: None,
            created_at: now_ms(),
        }
    }
}

impl Record for FinalReport {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "reports"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task".to_string(), IndexValue::String(self.task_id.clone()));
        fields
    }
}

/// Outcome of one issue within a fix request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FixOutcome {
    Fixed,
    Skipped,
    Failed,
}

impl std::fmt::Display for FixOutcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Fixed => write!(f, "fixed"),
            Self::Skipped => write!(f, "skipped"),
            Self::Failed => write!(f, "failed"),
        }
    }
}

/// Per-issue result line in a fix report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IssueResult {
    pub file: String,
    pub message: String,
    pub outcome: FixOutcome,
}

/// Per-batch result line in a fix report
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchSummary {
    pub batch_id: String,
    pub status: ConvergenceStatus,
    pub satisfaction: Option<u8>,
    pub issue_count: usize,
}

/// Terminal output of a fix request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixReport {
    /// Unique identifier
    pub id: String,

    /// Owning task
    pub task_id: String,

    /// Branch the fixes were applied on
    pub branch: String,

    /// Commit identifier, when any batch succeeded and scope checks passed
    #[serde(default)]
    pub commit: Option<String>,

    #[serde(default)]
    pub pushed: bool,

    pub issues: Vec<IssueResult>,
    pub batches: Vec<BatchSummary>,

    /// Fatal failure description (e.g. a workspace scope violation)
    #[serde(default)]
    pub error: Option<String>,

    /// Creation timestamp (Unix milliseconds)
    pub created_at: i64,
}

impl FixReport {
    /// Create an empty fix report shell
    pub fn new(task_id: impl Into<String>, branch: impl Into<String>) -> Self {
        let task_id = task_id.into();
        Self {
            id: generate_id("fixreport", &task_id),
            task_id,
            branch: branch.into(),
            commit: None,
            pushed: false,
            issues: Vec::new(),
            batches: Vec::new(),
            error: None,
            created_at: now_ms(),
        }
    }

    /// Number of issues per outcome
    pub fn outcome_count(&self, outcome: FixOutcome) -> usize {
        self.issues.iter().filter(|i| i.outcome == outcome).count()
    }
}

impl Record for FixReport {
    fn id(&self) -> &str {
        &self.id
    }

    fn updated_at(&self) -> i64 {
        self.created_at
    }

    fn collection_name() -> &'static str {
        "fix_reports"
    }

    fn indexed_fields(&self) -> HashMap<String, IndexValue> {
        let mut fields = HashMap::new();
        fields.insert("task".to_string(), IndexValue::String(self.task_id.clone()));
        fields
    }
}
