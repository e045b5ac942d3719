//! Command-line interface
//!
//! Thin layer over the orchestration core: parses arguments, builds task
//! payloads, and formats reports. All orchestration logic lives in the
//! library modules.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use serde::{Deserialize, Serialize};

use crate::domain::{FinalReport, FixReport, Issue};

/// TurboWrap - dual-LLM challenger-loop review and fix orchestrator
#[derive(Debug, Parser)]
#[command(name = "tw", version, about)]
pub struct Cli {
    /// Path to a config file (default: .turbowrap.yml, then user config)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Log level (TRACE, DEBUG, INFO, WARN, ERROR)
    #[arg(long, global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Review a repository with challenger-validated reviewers
    Review {
        /// Repository directory to review
        dir: PathBuf,

        /// Monorepo path prefix restricting the review
        #[arg(long)]
        workspace_path: Option<String>,

        /// Include the functional-analyst reviewer
        #[arg(long)]
        include_functional: bool,

        /// Disable the challenger loop (single pass per reviewer)
        #[arg(long)]
        no_challenger: bool,

        /// Append a single-shot qualitative evaluation to the report
        #[arg(long)]
        evaluator: bool,

        /// Override the satisfaction threshold
        #[arg(long)]
        threshold: Option<u8>,

        /// Override the soft iteration cap
        #[arg(long)]
        max_iterations: Option<u32>,

        /// Resume an interrupted review task by id
        #[arg(long)]
        resume: Option<String>,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Fix reviewed issues on a branch, one commit per request
    Fix {
        /// Checked-out repository to fix
        repo_root: PathBuf,

        /// Repository identifier (defaults to the directory path)
        #[arg(long)]
        repository: Option<String>,

        /// JSON file containing the issues to fix
        #[arg(long)]
        issues: PathBuf,

        /// Monorepo path prefix the fix may not escape
        #[arg(long)]
        workspace_path: Option<String>,

        /// Push the fix branch after committing
        #[arg(long)]
        push: bool,

        /// Output format
        #[arg(long, value_enum, default_value_t = OutputFormat::Text)]
        format: OutputFormat,
    },

    /// Print the effective configuration
    Config,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    Text,
    Json,
}

/// Task payload for review requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReviewPayload {
    pub dir: PathBuf,
    #[serde(default)]
    pub workspace_path: Option<String>,
    #[serde(default)]
    pub include_functional: bool,
    #[serde(default = "default_true")]
    pub challenger_enabled: bool,
    #[serde(default)]
    pub satisfaction_threshold: Option<u8>,
    #[serde(default)]
    pub max_iterations: Option<u32>,
    #[serde(default)]
    pub evaluator_enabled: bool,
}

/// Task payload for fix requests
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixPayload {
    pub repository: String,
    pub repo_root: PathBuf,
    pub issues: Vec<Issue>,
    #[serde(default)]
    pub workspace_path: Option<String>,
    #[serde(default)]
    pub push: bool,
}

fn default_true() -> bool {
    true
}

/// Render a final report for the terminal
pub fn format_report(report: &FinalReport) -> String {
    let generated = chrono::DateTime::from_timestamp_millis(report.created_at)
        .map(|t| t.format("%Y-%m-%d %H:%M:%S UTC").to_string())
        .unwrap_or_else(|| report.created_at.to_string());

    let mut out = String::new();
    out.push_str(&format!(
        "Review of {} ({}) at {}\n  score {:.1}/10, recommendation: {}{}\n",
        report.repository,
        report.repo_type,
        generated,
        report.overall_score,
        report.recommendation,
        if report.partial { " [partial]" } else { "" }
    ));

    out.push_str(&format!(
        "  issues: {} critical, {} high, {} medium, {} low\n",
        report.severity_counts.critical,
        report.severity_counts.high,
        report.severity_counts.medium,
        report.severity_counts.low
    ));

    for reviewer in &report.reviewers {
        out.push_str(&format!(
            "  {} -> {} ({} issues, {} iterations{})\n",
            reviewer.reviewer,
            reviewer.status,
            reviewer.issue_count,
            reviewer.iterations,
            if reviewer.resumed { ", resumed" } else { "" }
        ));
    }

    for issue in &report.issues {
        out.push_str(&format!(
            "  [{:>3}] {}:{} {}/{} {}\n",
            issue.priority,
            issue.file,
            issue.start_line.map(|l| l.to_string()).unwrap_or_else(|| "-".to_string()),
            issue.severity,
            issue.category,
            issue.message
        ));
    }

    for step in &report.next_steps {
        out.push_str(&format!("  next: {}\n", step));
    }

    if let Some(evaluation) = &report.evaluation {
        out.push_str(&format!("\n{}\n", evaluation));
    }
    out
}

/// Render a fix report for the terminal
pub fn format_fix_report(report: &FixReport) -> String {
    let mut out = String::new();
    out.push_str(&format!("Fix on branch {}\n", report.branch));
    match &report.commit {
        Some(commit) => out.push_str(&format!("  commit: {}{}\n", commit, if report.pushed { " (pushed)" } else { "" })),
        None => out.push_str("  no commit created\n"),
    }
    if let Some(error) = &report.error {
        out.push_str(&format!("  error: {}\n", error));
    }
    for batch in &report.batches {
        out.push_str(&format!(
            "  batch {} -> {} (satisfaction {})\n",
            batch.batch_id,
            batch.status,
            batch.satisfaction.map(|s| s.to_string()).unwrap_or_else(|| "-".to_string())
        ));
    }
    for issue in &report.issues {
        out.push_str(&format!("  {} {}: {}\n", issue.outcome, issue.file, issue.message));
    }
    out
}
