//! Canonical issue representation
//!
//! Issues are produced by reviewer loops, merged by the aggregation
//! pipeline, and consumed by the fix orchestrator. Severity and category are
//! closed enums; priority is computed by aggregation, never supplied.

use serde::{Deserialize, Serialize};

/// Issue severity, ordered Low < Medium < High < Critical
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Low,
    Medium,
    High,
    Critical,
}

impl Severity {
    /// Base points for priority scoring
    pub fn base_points(&self) -> u32 {
        match self {
            Self::Critical => 40,
            Self::High => 30,
            Self::Medium => 20,
            Self::Low => 10,
        }
    }

    /// Deduction from the overall report score
    pub fn deduction(&self) -> f64 {
        match self {
            Self::Critical => 2.0,
            Self::High => 1.0,
            Self::Medium => 0.5,
            Self::Low => 0.1,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Low => write!(f, "low"),
            Self::Medium => write!(f, "medium"),
            Self::High => write!(f, "high"),
            Self::Critical => write!(f, "critical"),
        }
    }
}

impl std::str::FromStr for Severity {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "low" => Ok(Self::Low),
            "medium" => Ok(Self::Medium),
            "high" => Ok(Self::High),
            "critical" => Ok(Self::Critical),
            _ => Err(format!("Unknown severity: {}", s)),
        }
    }
}

/// Issue category
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Category {
    Security,
    Performance,
    Architecture,
    Quality,
    Style,
    Testing,
    Documentation,
}

impl Category {
    /// Priority multiplier applied to the severity base points
    pub fn multiplier(&self) -> f64 {
        match self {
            Self::Security => 1.5,
            Self::Performance => 1.2,
            _ => 1.0,
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Security => write!(f, "security"),
            Self::Performance => write!(f, "performance"),
            Self::Architecture => write!(f, "architecture"),
            Self::Quality => write!(f, "quality"),
            Self::Style => write!(f, "style"),
            Self::Testing => write!(f, "testing"),
            Self::Documentation => write!(f, "documentation"),
        }
    }
}

impl std::str::FromStr for Category {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "security" => Ok(Self::Security),
            "performance" => Ok(Self::Performance),
            "architecture" => Ok(Self::Architecture),
            "quality" => Ok(Self::Quality),
            "style" => Ok(Self::Style),
            "testing" => Ok(Self::Testing),
            "documentation" => Ok(Self::Documentation),
            _ => Err(format!("Unknown category: {}", s)),
        }
    }
}

/// A single code review finding
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Issue {
    /// Path of the affected file, relative to the repository root
    pub file: String,

    /// First affected line, if known
    #[serde(default)]
    pub start_line: Option<u32>,

    /// Last affected line, if known
    #[serde(default)]
    pub end_line: Option<u32>,

    pub severity: Severity,
    pub category: Category,

    /// What is wrong
    pub message: String,

    /// How to fix it, if the reviewer offered one
    #[serde(default)]
    pub suggestion: Option<String>,

    /// The offending snippet as found
    #[serde(default)]
    pub current_code: Option<String>,

    /// The proposed replacement snippet
    #[serde(default)]
    pub suggested_code: Option<String>,

    /// Reviewers that flagged this issue, in encounter order
    #[serde(default)]
    pub flagged_by: Vec<String>,

    /// Estimated fix effort on a 1-5 scale
    #[serde(default)]
    pub effort: Option<u8>,

    /// Estimated number of files a fix will touch
    #[serde(default)]
    pub files_estimate: Option<u32>,

    /// Priority assigned by aggregation (0-100); never supplied by reviewers
    #[serde(default)]
    pub priority: u8,
}

impl Issue {
    /// Create a minimal issue; remaining fields via struct update or builders
    pub fn new(file: impl Into<String>, severity: Severity, category: Category, message: impl Into<String>) -> Self {
        Self {
            file: file.into(),
            start_line: None,
            end_line: None,
            severity,
            category,
            message: message.into(),
            suggestion: None,
            current_code: None,
            suggested_code: None,
            flagged_by: Vec::new(),
            effort: None,
            files_estimate: None,
            priority: 0,
        }
    }

    /// Set the affected line
    pub fn with_line(mut self, line: u32) -> Self {
        self.start_line = Some(line);
        self
    }

    /// Set the flagging reviewer
    pub fn with_reviewer(mut self, reviewer: impl Into<String>) -> Self {
        self.flagged_by = vec![reviewer.into()];
        self
    }

    /// Set the effort/files estimates
    pub fn with_estimates(mut self, effort: u8, files: u32) -> Self {
        self.effort = Some(effort);
        self.files_estimate = Some(files);
        self
    }

    /// Workload points for fix batching: effort x files, with configured defaults
    pub fn workload(&self, default_effort: u8, default_files: u32) -> u32 {
        let effort = self.effort.unwrap_or(default_effort) as u32;
        let files = self.files_estimate.unwrap_or(default_files);
        effort * files
    }

    /// Dedup key: normalized path, line (or none), category
    pub fn dedup_key(&self) -> (String, Option<u32>, Category) {
        (normalize_path(&self.file), self.start_line, self.category)
    }
}

/// Normalize a file path for dedup comparison
pub fn normalize_path(path: &str) -> String {
    path.trim().trim_start_matches("./").replace('\\', "/")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_severity_ordering() {
        assert!(Severity::Low < Severity::Medium);
        assert!(Severity::Medium < Severity::High);
        assert!(Severity::High < Severity::Critical);
    }

    #[test]
    fn test_severity_parse() {
        assert_eq!("critical".parse::<Severity>().unwrap(), Severity::Critical);
        assert_eq!(" HIGH ".parse::<Severity>().unwrap(), Severity::High);
        assert!("urgent".parse::<Severity>().is_err());
    }

    #[test]
    fn test_category_multiplier() {
        assert_eq!(Category::Security.multiplier(), 1.5);
        assert_eq!(Category::Performance.multiplier(), 1.2);
        assert_eq!(Category::Quality.multiplier(), 1.0);
        assert_eq!(Category::Documentation.multiplier(), 1.0);
    }

    #[test]
    fn test_workload_defaults() {
        let issue = Issue::new("src/a.rs", Severity::Low, Category::Quality, "msg");
        assert_eq!(issue.workload(3, 1), 3);

        let issue = issue.with_estimates(4, 2);
        assert_eq!(issue.workload(3, 1), 8);
    }

    #[test]
    fn test_dedup_key_normalizes_path() {
        let a = Issue::new("./src/a.rs", Severity::Low, Category::Quality, "x").with_line(5);
        let b = Issue::new("src\\a.rs", Severity::High, Category::Quality, "y").with_line(5);
        assert_eq!(a.dedup_key(), b.dedup_key());
    }

    #[test]
    fn test_issue_serde_defaults() {
        let json = r#"{"file":"src/a.rs","severity":"high","category":"security","message":"injection"}"#;
        let issue: Issue = serde_json::from_str(json).unwrap();
        assert_eq!(issue.severity, Severity::High);
        assert!(issue.flagged_by.is_empty());
        assert_eq!(issue.priority, 0);
    }
}
