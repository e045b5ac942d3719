//! Issue classification and workload batching
//!
//! Issues are split into backend and frontend classes by file extension,
//! then packed greedily in descending workload order. A batch never exceeds
//! the issue-count or workload caps unless a single issue alone is over the
//! workload cap, in which case it occupies its own batch.

use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::config::FixConfig;
use crate::domain::Issue;

/// Which side of the stack a batch belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchClass {
    Backend,
    Frontend,
}

impl std::fmt::Display for BatchClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Backend => write!(f, "backend"),
            Self::Frontend => write!(f, "frontend"),
        }
    }
}

/// A group of issues fixed together in one loop
#[derive(Debug, Clone)]
pub struct IssueBatch {
    pub id: String,
    pub class: BatchClass,
    pub issues: Vec<Issue>,
    /// Total workload points (effort x files per issue)
    pub workload: u32,
}

/// Classify an issue by its file extension; unknown extensions are backend
pub fn classify(issue: &Issue, config: &FixConfig) -> BatchClass {
    let ext = Path::new(&issue.file)
        .extension()
        .and_then(|e| e.to_str())
        .map(|e| e.to_lowercase());
    match ext {
        Some(ext) if config.frontend_extensions.iter().any(|e| *e == ext) => BatchClass::Frontend,
        _ => BatchClass::Backend,
    }
}

/// Build fix batches: backend batches first, then frontend
///
/// Within a class, greedy packing in descending workload order: an issue
/// whose workload alone exceeds the cap takes its own batch; otherwise it
/// joins the current batch while both caps hold, else a new batch opens.
pub fn build_batches(issues: Vec<Issue>, config: &FixConfig) -> Vec<IssueBatch> {
    let mut backend = Vec::new();
    let mut frontend = Vec::new();
    for issue in issues {
        match classify(&issue, config) {
            BatchClass::Backend => backend.push(issue),
            BatchClass::Frontend => frontend.push(issue),
        }
    }

    let mut batches = pack(backend, BatchClass::Backend, config);
    batches.extend(pack(frontend, BatchClass::Frontend, config));
    batches
}

fn pack(mut issues: Vec<Issue>, class: BatchClass, config: &FixConfig) -> Vec<IssueBatch> {
    let workload = |issue: &Issue| issue.workload(config.default_effort, config.default_files);
    // Stable sort keeps input order among equal workloads, so batching is
    // deterministic given the inputs
    issues.sort_by(|a, b| workload(b).cmp(&workload(a)));

    let mut batches: Vec<IssueBatch> = Vec::new();
    let mut current: Vec<Issue> = Vec::new();
    let mut current_points = 0u32;
    let mut next_id = 1usize;

    let mut make_id = |n: &mut usize| {
        let id = format!("{}-{}", class_prefix(class), n);
        *n += 1;
        id
    };

    for issue in issues {
        let points = workload(&issue);

        if points > config.max_workload_points {
            // Oversize issues bypass the current batch entirely
            batches.push(IssueBatch {
                id: make_id(&mut next_id),
                class,
                issues: vec![issue],
                workload: points,
            });
            continue;
        }

        if !current.is_empty()
            && (current.len() + 1 > config.max_issues_per_batch || current_points + points > config.max_workload_points)
        {
            batches.push(IssueBatch {
                id: make_id(&mut next_id),
                class,
                issues: std::mem::take(&mut current),
                workload: current_points,
            });
            current_points = 0;
        }

        current_points += points;
        current.push(issue);
    }

    if !current.is_empty() {
        batches.push(IssueBatch {
            id: make_id(&mut next_id),
            class,
            issues: current,
            workload: current_points,
        });
    }
    batches
}

fn class_prefix(class: BatchClass) -> &'static str {
    match class {
        BatchClass::Backend => "be",
        BatchClass::Frontend => "fe",
    }
}
