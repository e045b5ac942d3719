//! Tolerant parsing of LLM-produced JSON
//!
//! Backends wrap JSON in prose, markdown fences, and the occasional trailing
//! comma. Extraction strips the wrapping, scans for the outermost balanced
//! JSON value, and makes one repair pass before failing loud with the raw
//! blob preserved.

use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;

use crate::domain::{Category, Issue, Severity};

/// Structured-output parse failure
#[derive(Debug, Error)]
#[error("{message}")]
pub struct ParseError {
    pub message: String,
}

impl ParseError {
    fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// Extract a JSON value from raw LLM output
///
/// Attempts, in order: the whole trimmed text, the contents of the first
/// fenced code block, the outermost balanced object/array, and finally a
/// trailing-comma repair pass over that candidate.
pub fn extract_json(raw: &str) -> Result<Value, ParseError> {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Err(ParseError::new("empty output"));
    }

    if let Ok(value) = serde_json::from_str(trimmed) {
        return Ok(value);
    }

    if let Some(fenced) = strip_fences(trimmed)
        && let Ok(value) = serde_json::from_str(fenced.trim())
    {
        return Ok(value);
    }

    let candidate = balanced_json_candidate(trimmed)
        .or_else(|| strip_fences(trimmed).and_then(balanced_json_candidate))
        .ok_or_else(|| ParseError::new("no JSON object or array found in output"))?;

    if let Ok(value) = serde_json::from_str(candidate) {
        return Ok(value);
    }

    // One best-effort repair pass
    let repaired = repair_trailing_commas(candidate);
    serde_json::from_str(&repaired).map_err(|e| ParseError::new(format!("JSON parse failed after repair: {}", e)))
}

/// Contents of the first fenced code block, if any
fn strip_fences(text: &str) -> Option<&str> {
    let start = text.find("```")?;
    let after_fence = &text[start + 3..];
    // Skip an optional language tag on the fence line
    let body_start = after_fence.find('\n')?;
    let body = &after_fence[body_start + 1..];
    let end = body.find("```")?;
    Some(&body[..end])
}

/// The outermost balanced `{...}` or `[...]` span, string-aware
fn balanced_json_candidate(text: &str) -> Option<&str> {
    let open_idx = text.find(['{', '['])?;
    let bytes = text.as_bytes();
    let open = bytes[open_idx];
    let close = if open == b'{' { b'}' } else { b']' };

    let mut depth = 0usize;
    let mut in_string = false;
    let mut escaped = false;

    for (i, &b) in bytes.iter().enumerate().skip(open_idx) {
        if in_string {
            if escaped {
                escaped = false;
            } else if b == b'\\' {
                escaped = true;
            } else if b == b'"' {
                in_string = false;
            }
            continue;
        }
        match b {
            b'"' => in_string = true,
            _ if b == open => depth += 1,
            _ if b == close => {
                depth -= 1;
                if depth == 0 {
                    return Some(&text[open_idx..=i]);
                }
            }
            _ => {}
        }
    }
    None
}

/// Remove commas that directly precede a closing brace or bracket
fn repair_trailing_commas(text: &str) -> String {
    let mut out = String::with_capacity(text.len());
    let mut in_string = false;
    let mut escaped = false;

    for c in text.chars() {
        if in_string {
            match c {
                _ if escaped => escaped = false,
                '\\' => escaped = true,
                '"' => in_string = false,
                _ => {}
            }
            out.push(c);
            continue;
        }
        match c {
            '"' => {
                in_string = true;
                out.push(c);
            }
            '}' | ']' => {
                // Drop a comma (plus whitespace) immediately before the close
                while out.ends_with(|p: char| p.is_whitespace()) {
                    out.pop();
                }
                if out.ends_with(',') {
                    out.pop();
                }
                out.push(c);
            }
            _ => out.push(c),
        }
    }
    out
}

/// Structured evaluation returned by the challenger backend
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct ChallengerVerdict {
    /// Satisfaction score, clamped to [0, 100]
    #[serde(deserialize_with = "deserialize_score")]
    pub satisfaction_score: u8,

    #[serde(default)]
    pub feedback: String,

    #[serde(default)]
    pub missed_issues: Vec<String>,

    #[serde(default)]
    pub challenges: Vec<String>,
}

fn deserialize_score<'de, D>(deserializer: D) -> Result<u8, D::Error>
where
    D: serde::Deserializer<'de>,
{
    let raw = f64::deserialize(deserializer)?;
    Ok(raw.clamp(0.0, 100.0).round() as u8)
}

/// Parse a challenger verdict from raw output
pub fn parse_verdict(raw: &str) -> Result<ChallengerVerdict, ParseError> {
    let value = extract_json(raw)?;
    serde_json::from_value(value).map_err(|e| ParseError::new(format!("verdict shape mismatch: {}", e)))
}

/// Lenient issue shape as emitted by reviewer backends
#[derive(Debug, Deserialize)]
struct IssueJson {
    #[serde(default)]
    file: String,
    #[serde(default, alias = "line")]
    start_line: Option<u32>,
    #[serde(default)]
    end_line: Option<u32>,
    #[serde(default)]
    severity: String,
    #[serde(default)]
    category: String,
    #[serde(default, alias = "description")]
    message: String,
    #[serde(default)]
    suggestion: Option<String>,
    #[serde(default)]
    current_code: Option<String>,
    #[serde(default)]
    suggested_code: Option<String>,
    #[serde(default)]
    effort: Option<u8>,
    #[serde(default, alias = "files_to_modify")]
    files_estimate: Option<u32>,
}

impl IssueJson {
    fn into_issue(self) -> Issue {
        let severity = self.severity.parse().unwrap_or(Severity::Medium);
        let category = self.category.parse().unwrap_or(Category::Quality);
        Issue {
            file: self.file,
            start_line: self.start_line,
            end_line: self.end_line,
            severity,
            category,
            message: self.message,
            suggestion: self.suggestion,
            current_code: self.current_code,
            suggested_code: self.suggested_code,
            flagged_by: Vec::new(),
            effort: self.effort,
            files_estimate: self.files_estimate,
            priority: 0,
        }
    }
}

/// Parse a reviewer's issue list from raw output
///
/// Accepts either a bare array or an object with an `issues` array. Unknown
/// severities and categories fall back to medium/quality rather than
/// discarding the finding. Issues without a file path are dropped.
pub fn parse_issues(raw: &str) -> Result<Vec<Issue>, ParseError> {
    let value = extract_json(raw)?;
    let items = match value {
        Value::Array(items) => items,
        Value::Object(mut map) => match map.remove("issues") {
            Some(Value::Array(items)) => items,
            Some(_) => return Err(ParseError::new("'issues' field is not an array")),
            None => return Err(ParseError::new("object output has no 'issues' array")),
        },
        _ => return Err(ParseError::new("output is neither an array nor an object")),
    };

    let mut issues = Vec::new();
    for item in items {
        let parsed: IssueJson =
            serde_json::from_value(item).map_err(|e| ParseError::new(format!("issue shape mismatch: {}", e)))?;
        if parsed.file.trim().is_empty() {
            continue;
        }
        issues.push(parsed.into_issue());
    }
    Ok(issues)
}

/// One file rewrite in a fixer response
#[derive(Debug, Deserialize)]
struct EditJson {
    #[serde(default, alias = "path")]
    file: String,
    #[serde(default, alias = "new_content")]
    content: String,
}

/// Parse a fixer's edits from raw output
///
/// Expects `{"edits": [{"file": "...", "content": "..."}]}`; entries without
/// a file path are dropped.
pub fn parse_edits(raw: &str) -> Result<std::collections::HashMap<String, String>, ParseError> {
    let value = extract_json(raw)?;
    let Some(edits) = value.get("edits").and_then(|e| e.as_array()) else {
        return Err(ParseError::new("fixer output has no 'edits' array"));
    };

    let mut out = std::collections::HashMap::new();
    for edit in edits {
        let parsed: EditJson = serde_json::from_value(edit.clone())
            .map_err(|e| ParseError::new(format!("edit shape mismatch: {}", e)))?;
        if parsed.file.trim().is_empty() {
            continue;
        }
        out.insert(parsed.file, parsed.content);
    }
    Ok(out)
}
