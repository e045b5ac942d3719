//! Embedded fallback prompts
//!
//! Compiled into the binary and used when no override file exists. Initial
//! prompts are Handlebars templates rendered once by the orchestrators;
//! refine and challenger templates keep `{{kebab-case}}` placeholders that
//! the loop engine substitutes each iteration.

/// Initial prompt for a reviewer loop
pub const REVIEWER_INITIAL: &str = r#"You are a senior {{focus_area}} reviewer examining a {{repo_type}} repository.

Repository structure:
{{repo_map}}

{{#if workspace_path}}Only review files under: {{workspace_path}}
{{/if}}
Review the code for {{focus_area}} problems. For every finding, report:
- file: path relative to the repository root
- line: the first affected line, when you can pin one down
- severity: one of critical, high, medium, low
- category: one of security, performance, architecture, quality, style, testing, documentation
- message: what is wrong and why it matters
- suggestion: how to fix it
- current_code / suggested_code: minimal snippets where they help
- effort: estimated fix effort from 1 (trivial) to 5 (major)
- files_to_modify: how many files a fix would touch

Output JSON only, no prose:
{"issues": [{"file": "...", "line": 1, "severity": "...", "category": "...", "message": "...", "suggestion": "...", "effort": 2, "files_to_modify": 1}]}
"#;

/// Refinement prompt for reviewer iterations after the first
pub const REVIEWER_REFINE: &str = r#"Your previous review was evaluated by an independent challenger.

Challenger feedback:
{{challenger-feedback}}

Issues the challenger believes you missed:
- {{missed-issues}}

Findings the challenger disputes:
- {{challenges}}

Your previous review:
{{previous-output}}

Produce an improved complete review. Address the feedback: add genuinely missed
issues, drop or correct disputed findings you cannot defend, and keep everything
that holds up. Output the full updated JSON, same shape as before, no prose.
"#;

/// Challenger prompt evaluating a reviewer's output
pub const REVIEW_CHALLENGER: &str = r#"You are a skeptical review validator. Iteration {{iteration}}.

A reviewer produced this output:
{{primary-output}}

Evaluate it critically:
- Are the findings real problems, or noise?
- Are severities and categories justified?
- What did the reviewer miss?

Output JSON only:
{"satisfaction_score": 0-100, "feedback": "what to improve", "missed_issues": ["..."], "challenges": ["findings you dispute"]}
"#;

/// Initial prompt for a fix loop
pub const FIXER_INITIAL: &str = r#"You are a senior engineer fixing a reviewed batch of issues.

{{#if workspace_path}}You may only modify files under: {{workspace_path}}
{{/if}}
Issues to fix in this batch:
{{issues}}

Current file contents:
{{file_contents}}

Fix every issue in the batch. Keep changes minimal and focused; do not
refactor beyond what the fixes require.

Output JSON only:
{"edits": [{"file": "path", "content": "complete new file content"}], "notes": "what you changed and why"}
"#;

/// Refinement prompt for fixer iterations after the first
pub const FIXER_REFINE: &str = r#"Your previous fix was evaluated by an independent challenger.

Challenger feedback:
{{challenger-feedback}}

Problems the challenger found:
- {{missed-issues}}
- {{challenges}}

Your previous fix:
{{previous-output}}

Produce a corrected fix. Output the full updated JSON, same shape as before.
"#;

/// Challenger prompt evaluating a fixer's output
pub const FIX_CHALLENGER: &str = r#"You are a strict fix validator. Iteration {{iteration}}.

A fixer produced these edits:
{{primary-output}}

Verify each claimed fix:
- Does the edit actually resolve the issue it targets?
- Does it introduce new bugs, regressions, or style violations?
- Are any issues in the batch left unfixed?

Be demanding; only near-perfect fixes deserve a high score.

Output JSON only:
{"satisfaction_score": 0-100, "feedback": "what is wrong", "missed_issues": ["unfixed or newly broken"], "challenges": ["edits you dispute"]}
"#;

/// Single-shot evaluator over the aggregated report
pub const EVALUATOR: &str = r#"You are a principal engineer giving a final qualitative assessment of a code review.

Review summary:
- Repository: {{repository}} ({{repo_type}})
- Overall score: {{overall_score}}/10
- Recommendation: {{recommendation}}
- Issues: {{issue_count}} ({{critical_count}} critical, {{high_count}} high)

Top issues:
{{top_issues}}

Write a short assessment (3-6 sentences) of the codebase's health and what the
team should tackle first. Plain text, no JSON.
"#;

/// Look up an embedded template by name
pub fn get_embedded(name: &str) -> Option<&'static str> {
    match name {
        "reviewer-initial" => Some(REVIEWER_INITIAL),
        "reviewer-refine" => Some(REVIEWER_REFINE),
        "review-challenger" => Some(REVIEW_CHALLENGER),
        "fixer-initial" => Some(FIXER_INITIAL),
        "fixer-refine" => Some(FIXER_REFINE),
        "fix-challenger" => Some(FIX_CHALLENGER),
        "evaluator" => Some(EVALUATOR),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_all_templates_resolvable() {
        for name in [
            "reviewer-initial",
            "reviewer-refine",
            "review-challenger",
            "fixer-initial",
            "fixer-refine",
            "fix-challenger",
            "evaluator",
        ] {
            assert!(get_embedded(name).is_some(), "missing embedded template: {}", name);
        }
        assert!(get_embedded("nonexistent").is_none());
    }

    #[test]
    fn test_challenger_templates_carry_engine_placeholders() {
        for name in ["review-challenger", "fix-challenger"] {
            let template = get_embedded(name).unwrap();
            assert!(template.contains("{{primary-output}}"));
            assert!(template.contains("{{iteration}}"));
            assert!(template.contains("satisfaction_score"));
        }
    }

    #[test]
    fn test_refine_templates_carry_engine_placeholders() {
        for name in ["reviewer-refine", "fixer-refine"] {
            let template = get_embedded(name).unwrap();
            assert!(template.contains("{{previous-output}}"));
            assert!(template.contains("{{challenger-feedback}}"));
        }
    }
}
