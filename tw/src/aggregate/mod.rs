//! Issue aggregation pipeline
//!
//! Deduplicates findings across reviewers, scores priority, sorts, and
//! derives the overall score and recommendation. The pipeline is pure and
//! idempotent: running it on its own output yields the same output.

use std::collections::HashMap;

use tracing::debug;

use crate::domain::{Issue, Recommendation, Severity, SeverityCounts};

/// Result of the aggregation pipeline
#[derive(Debug, Clone)]
pub struct AggregateOutput {
    /// Deduplicated issues, priority-scored and sorted
    pub issues: Vec<Issue>,
    pub severity_counts: SeverityCounts,
    pub overall_score: f64,
    pub recommendation: Recommendation,
}

/// Run the full pipeline: dedup, score, sort, summarize
pub fn aggregate(issues: Vec<Issue>) -> AggregateOutput {
    let mut issues = deduplicate(issues);
    for issue in &mut issues {
        issue.priority = score_priority(issue);
    }
    sort_issues(&mut issues);

    let severity_counts = SeverityCounts::tally(&issues);
    let overall_score = overall_score(&issues);
    let recommendation = recommend(&severity_counts);
    debug!(
        issues = issues.len(),
        overall_score,
        recommendation = %recommendation,
        "Aggregation complete"
    );

    AggregateOutput {
        issues,
        severity_counts,
        overall_score,
        recommendation,
    }
}

/// Merge issues sharing a (normalized file, line, category) key
///
/// Stable: output order is first-encounter order of each key, which makes
/// the merge's "first non-empty wins" rules deterministic in reviewer order.
pub fn deduplicate(issues: Vec<Issue>) -> Vec<Issue> {
    let mut order = Vec::new();
    let mut merged: HashMap<(String, Option<u32>, crate::domain::Category), Issue> = HashMap::new();

    for issue in issues {
        let key = issue.dedup_key();
        match merged.get_mut(&key) {
            None => {
                order.push(key.clone());
                merged.insert(key, issue);
            }
            Some(existing) => merge_into(existing, issue),
        }
    }

    order.into_iter().filter_map(|key| merged.remove(&key)).collect()
}

fn merge_into(existing: &mut Issue, incoming: Issue) {
    // Highest severity wins
    if incoming.severity > existing.severity {
        existing.severity = incoming.severity;
    }

    // Union reviewer sets, preserving encounter order
    for reviewer in incoming.flagged_by {
        if !existing.flagged_by.contains(&reviewer) {
            existing.flagged_by.push(reviewer);
        }
    }

    // Longest non-empty text wins
    if incoming.message.len() > existing.message.len() {
        existing.message = incoming.message;
    }
    existing.suggestion = longest_non_empty(existing.suggestion.take(), incoming.suggestion);

    // Code snippets: prefer non-empty, first encountered wins on conflict
    existing.current_code = first_non_empty(existing.current_code.take(), incoming.current_code);
    existing.suggested_code = first_non_empty(existing.suggested_code.take(), incoming.suggested_code);

    // Keep the larger estimates so batching does not undercount work
    existing.effort = existing.effort.max(incoming.effort);
    existing.files_estimate = existing.files_estimate.max(incoming.files_estimate);
    if existing.end_line.is_none() {
        existing.end_line = incoming.end_line;
    }
}

fn longest_non_empty(first: Option<String>, second: Option<String>) -> Option<String> {
    match (first, second) {
        (Some(a), Some(b)) => Some(if b.len() > a.len() { b } else { a }),
        (Some(a), None) => (!a.is_empty()).then_some(a),
        (None, Some(b)) => (!b.is_empty()).then_some(b),
        (None, None) => None,
    }
}

fn first_non_empty(first: Option<String>, second: Option<String>) -> Option<String> {
    match (first, second) {
        (Some(a), _) if !a.is_empty() => Some(a),
        (_, Some(b)) if !b.is_empty() => Some(b),
        _ => None,
    }
}

/// Priority score for one deduplicated issue
///
/// `min(100, round(base * category multiplier + 5 * (flaggers - 1)))`
pub fn score_priority(issue: &Issue) -> u8 {
    let base = issue.severity.base_points() as f64;
    let multiplier = issue.category.multiplier();
    let extra_flaggers = issue.flagged_by.len().saturating_sub(1);
    let bonus = (5 * extra_flaggers) as f64;

    let score = (base * multiplier + bonus).round();
    score.clamp(0.0, 100.0) as u8
}

/// Priority descending; ties break by severity, then path, then line
pub fn sort_issues(issues: &mut [Issue]) {
    issues.sort_by(|a, b| {
        b.priority
            .cmp(&a.priority)
            .then_with(|| b.severity.cmp(&a.severity))
            .then_with(|| a.file.cmp(&b.file))
            .then_with(|| a.start_line.unwrap_or(0).cmp(&b.start_line.unwrap_or(0)))
    });
}

/// Overall quality score: 10.0 minus per-issue deductions, clamped to [0, 10]
pub fn overall_score(issues: &[Issue]) -> f64 {
    let deductions: f64 = issues.iter().map(|i| i.severity.deduction()).sum();
    (10.0 - deductions).clamp(0.0, 10.0)
}

/// Recommendation from the severity tallies
pub fn recommend(counts: &SeverityCounts) -> Recommendation {
    if counts.critical > 0 || counts.high > 3 {
        Recommendation::RequestChanges
    } else if counts.high >= 1 {
        Recommendation::ApproveWithChanges
    } else {
        Recommendation::Approve
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::Category;
    use proptest::prelude::*;

    fn issue(file: &str, line: u32, severity: Severity, category: Category, reviewer: &str) -> Issue {
        Issue::new(file, severity, category, format!("{} issue in {}", category, file))
            .with_line(line)
            .with_reviewer(reviewer)
    }

    #[test]
    fn test_single_critical_security_priority() {
        // critical security flagged once: min(100, 40 * 1.5 + 0) = 60
        let out = aggregate(vec![issue("src/a.go", 10, Severity::Critical, Category::Security, "r1")]);
        assert_eq!(out.issues[0].priority, 60);
        assert_eq!(out.overall_score, 8.0);
        assert_eq!(out.recommendation, Recommendation::RequestChanges);
    }

    #[test]
    fn test_consensus_bonus() {
        // Two reviewers flag the same high/quality issue:
        // min(100, 30 * 1.0 + 5 * 1) = 35
        let out = aggregate(vec![
            issue("src/b.ts", 42, Severity::High, Category::Quality, "r1"),
            issue("src/b.ts", 42, Severity::High, Category::Quality, "r2"),
        ]);

        assert_eq!(out.issues.len(), 1);
        assert_eq!(out.issues[0].priority, 35);
        assert_eq!(out.issues[0].flagged_by, vec!["r1".to_string(), "r2".to_string()]);
    }

    #[test]
    fn test_dedup_keeps_highest_severity_and_longest_message() {
        let mut short = issue("src/a.rs", 5, Severity::Low, Category::Quality, "r1");
        short.message = "short".to_string();
        let mut long = issue("src/a.rs", 5, Severity::High, Category::Quality, "r2");
        long.message = "a much longer explanation".to_string();

        let deduped = deduplicate(vec![short, long]);
        assert_eq!(deduped.len(), 1);
        assert_eq!(deduped[0].severity, Severity::High);
        assert_eq!(deduped[0].message, "a much longer explanation");
    }

    #[test]
    fn test_dedup_code_snippets_first_non_empty_wins() {
        let mut first = issue("src/a.rs", 5, Severity::Low, Category::Quality, "r1");
        first.current_code = Some("original snippet".to_string());
        let mut second = issue("src/a.rs", 5, Severity::Low, Category::Quality, "r2");
        second.current_code = Some("conflicting snippet".to_string());
        second.suggested_code = Some("only the second has this".to_string());

        let deduped = deduplicate(vec![first, second]);
        assert_eq!(deduped[0].current_code.as_deref(), Some("original snippet"));
        assert_eq!(deduped[0].suggested_code.as_deref(), Some("only the second has this"));
    }

    #[test]
    fn test_different_lines_not_merged() {
        let deduped = deduplicate(vec![
            issue("src/a.rs", 5, Severity::Low, Category::Quality, "r1"),
            issue("src/a.rs", 9, Severity::Low, Category::Quality, "r1"),
        ]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_different_categories_not_merged() {
        let deduped = deduplicate(vec![
            issue("src/a.rs", 5, Severity::Low, Category::Quality, "r1"),
            issue("src/a.rs", 5, Severity::Low, Category::Security, "r1"),
        ]);
        assert_eq!(deduped.len(), 2);
    }

    #[test]
    fn test_sort_order() {
        let out = aggregate(vec![
            issue("src/z.rs", 1, Severity::Low, Category::Style, "r1"),
            issue("src/a.rs", 9, Severity::Critical, Category::Security, "r1"),
            issue("src/a.rs", 3, Severity::Critical, Category::Security, "r1"),
            issue("src/m.rs", 1, Severity::High, Category::Performance, "r1"),
        ]);

        let order: Vec<(String, Option<u32>)> = out.issues.iter().map(|i| (i.file.clone(), i.start_line)).collect();
        assert_eq!(
            order,
            vec![
                ("src/a.rs".to_string(), Some(3)),
                ("src/a.rs".to_string(), Some(9)),
                ("src/m.rs".to_string(), Some(1)),
                ("src/z.rs".to_string(), Some(1)),
            ]
        );
    }

    #[test]
    fn test_overall_score_deductions() {
        let out = aggregate(vec![
            issue("a.rs", 1, Severity::Critical, Category::Security, "r1"),
            issue("b.rs", 1, Severity::High, Category::Quality, "r1"),
            issue("c.rs", 1, Severity::Medium, Category::Quality, "r1"),
            issue("d.rs", 1, Severity::Low, Category::Style, "r1"),
        ]);
        // 10 - 2.0 - 1.0 - 0.5 - 0.1
        assert!((out.overall_score - 6.4).abs() < 1e-9);
    }

    #[test]
    fn test_overall_score_clamps_at_zero() {
        let issues: Vec<Issue> = (0..8)
            .map(|i| issue(&format!("f{}.rs", i), 1, Severity::Critical, Category::Security, "r1"))
            .collect();
        assert_eq!(overall_score(&issues), 0.0);
    }

    #[test]
    fn test_empty_input() {
        let out = aggregate(vec![]);
        assert!(out.issues.is_empty());
        assert_eq!(out.overall_score, 10.0);
        assert_eq!(out.recommendation, Recommendation::Approve);
    }

    #[test]
    fn test_recommendation_thresholds() {
        let high = |n: usize| SeverityCounts {
            high: n,
            ..SeverityCounts::default()
        };
        assert_eq!(recommend(&high(0)), Recommendation::Approve);
        assert_eq!(recommend(&high(1)), Recommendation::ApproveWithChanges);
        assert_eq!(recommend(&high(3)), Recommendation::ApproveWithChanges);
        assert_eq!(recommend(&high(4)), Recommendation::RequestChanges);
        assert_eq!(
            recommend(&SeverityCounts {
                critical: 1,
                ..SeverityCounts::default()
            }),
            Recommendation::RequestChanges
        );
    }

    #[test]
    fn test_aggregation_idempotent() {
        let input = vec![
            issue("src/b.ts", 42, Severity::High, Category::Quality, "r1"),
            issue("src/b.ts", 42, Severity::High, Category::Quality, "r2"),
            issue("src/a.go", 10, Severity::Critical, Category::Security, "r1"),
            issue("src/c.rs", 7, Severity::Low, Category::Style, "r3"),
        ];

        let once = aggregate(input);
        let twice = aggregate(once.issues.clone());

        assert_eq!(once.issues, twice.issues);
        assert_eq!(once.overall_score, twice.overall_score);
        assert_eq!(once.recommendation, twice.recommendation);
    }

    fn severity_strategy() -> impl Strategy<Value = Severity> {
        prop_oneof![
            Just(Severity::Low),
            Just(Severity::Medium),
            Just(Severity::High),
            Just(Severity::Critical),
        ]
    }

    fn category_strategy() -> impl Strategy<Value = Category> {
        prop_oneof![
            Just(Category::Security),
            Just(Category::Performance),
            Just(Category::Architecture),
            Just(Category::Quality),
            Just(Category::Style),
            Just(Category::Testing),
            Just(Category::Documentation),
        ]
    }

    fn issue_strategy() -> impl Strategy<Value = Issue> {
        (
            prop_oneof![Just("src/a.rs"), Just("src/b.rs"), Just("src/c.rs")],
            0u32..20,
            severity_strategy(),
            category_strategy(),
            prop_oneof![Just("r1"), Just("r2"), Just("r3")],
        )
            .prop_map(|(file, line, severity, category, reviewer)| {
                issue(file, line, severity, category, reviewer)
            })
    }

    proptest! {
        #[test]
        fn prop_no_duplicate_keys_after_dedup(issues in prop::collection::vec(issue_strategy(), 0..40)) {
            let deduped = deduplicate(issues);
            let mut keys: Vec<_> = deduped.iter().map(|i| i.dedup_key()).collect();
            let before = keys.len();
            keys.sort_by(|a, b| format!("{:?}", a).cmp(&format!("{:?}", b)));
            keys.dedup();
            prop_assert_eq!(before, keys.len());
        }

        #[test]
        fn prop_overall_score_in_range(issues in prop::collection::vec(issue_strategy(), 0..40)) {
            let out = aggregate(issues);
            prop_assert!(out.overall_score >= 0.0);
            prop_assert!(out.overall_score <= 10.0);
        }

        #[test]
        fn prop_priority_in_range(issues in prop::collection::vec(issue_strategy(), 0..40)) {
            let out = aggregate(issues);
            for issue in &out.issues {
                prop_assert!(issue.priority <= 100);
            }
        }

        #[test]
        fn prop_priority_monotonic_in_severity(
            category in category_strategy(),
            line in 0u32..20,
        ) {
            // Fixing category and flagger count, priority must not decrease
            // as severity rises
            let severities = [Severity::Low, Severity::Medium, Severity::High, Severity::Critical];
            let priorities: Vec<u8> = severities
                .iter()
                .map(|s| score_priority(&issue("src/a.rs", line, *s, category, "r1")))
                .collect();
            for pair in priorities.windows(2) {
                prop_assert!(pair[0] <= pair[1]);
            }
        }

        #[test]
        fn prop_aggregate_idempotent(issues in prop::collection::vec(issue_strategy(), 0..40)) {
            let once = aggregate(issues);
            let twice = aggregate(once.issues.clone());
            prop_assert_eq!(once.issues, twice.issues);
        }
    }
}
