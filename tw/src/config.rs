//! TurboWrap configuration types and loading

use eyre::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

/// Main TurboWrap configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// LLM backend configuration
    pub llm: LlmConfig,

    /// Review challenger loop parameters
    pub challenger: ChallengerConfig,

    /// Fix challenger loop parameters
    #[serde(rename = "fix-challenger")]
    pub fix_challenger: FixChallengerConfig,

    /// Extended-thinking defaults
    pub thinking: ThinkingConfig,

    /// Task queue policy
    pub queue: QueueConfig,

    /// Concurrency limits
    pub concurrency: ConcurrencyConfig,

    /// Fix batching and classification
    pub fix: FixConfig,

    /// Timeouts
    pub timeouts: TimeoutConfig,

    /// Storage locations
    pub storage: StorageConfig,

    /// Prompt template overrides
    pub prompts: PromptsConfig,
}

impl Config {
    /// Load configuration with fallback chain
    pub fn load(config_path: Option<&PathBuf>) -> Result<Self> {
        if let Some(path) = config_path {
            return Self::load_from_file(path).context(format!("Failed to load config from {}", path.display()));
        }

        let local_config = PathBuf::from(".turbowrap.yml");
        if local_config.exists() {
            match Self::load_from_file(&local_config) {
                Ok(config) => return Ok(config),
                Err(e) => {
                    tracing::warn!("Failed to load config from {}: {}", local_config.display(), e);
                }
            }
        }

        if let Some(config_dir) = dirs::config_dir() {
            let user_config = config_dir.join("turbowrap").join("turbowrap.yml");
            if user_config.exists() {
                match Self::load_from_file(&user_config) {
                    Ok(config) => return Ok(config),
                    Err(e) => {
                        tracing::warn!("Failed to load config from {}: {}", user_config.display(), e);
                    }
                }
            }
        }

        tracing::info!("No config file found, using defaults");
        Ok(Self::default())
    }

    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = fs::read_to_string(&path).context("Failed to read config file")?;
        let config: Self = serde_yaml::from_str(&content).context("Failed to parse config file")?;
        tracing::info!("Loaded config from: {}", path.as_ref().display());
        Ok(config)
    }
}

/// One backend's CLI invocation settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Executable name or path
    pub command: String,

    /// Fixed arguments
    pub args: Vec<String>,

    /// Default model
    pub model: Option<String>,

    /// Flag that selects the model
    #[serde(rename = "model-flag")]
    pub model_flag: Option<String>,

    /// Flag that sets the thinking budget
    #[serde(rename = "thinking-flag")]
    pub thinking_flag: Option<String>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        Self {
            command: "claude".to_string(),
            args: vec!["-p".to_string()],
            model: None,
            model_flag: Some("--model".to_string()),
            thinking_flag: None,
        }
    }
}

/// LLM backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LlmConfig {
    /// Primary (reviewer/fixer) backend
    pub primary: BackendConfig,

    /// Challenger (validator) backend
    pub challenger: BackendConfig,
}

impl Default for LlmConfig {
    fn default() -> Self {
        Self {
            primary: BackendConfig::default(),
            challenger: BackendConfig {
                command: "gemini".to_string(),
                args: vec!["-p".to_string()],
                ..BackendConfig::default()
            },
        }
    }
}

/// Review challenger loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChallengerConfig {
    /// Exit bar for the review loop
    #[serde(rename = "satisfaction-threshold")]
    pub satisfaction_threshold: u8,

    /// Soft iteration cap
    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,

    /// Hard iteration cap, never exceeded
    #[serde(rename = "absolute-max-iterations")]
    pub absolute_max_iterations: u32,

    /// Stagnation sensitivity, in percentage points
    #[serde(rename = "min-improvement-threshold")]
    pub min_improvement_threshold: u8,

    /// Iterations compared by the stagnation test
    #[serde(rename = "stagnation-window")]
    pub stagnation_window: usize,

    /// Accept at the soft cap when the score is at least this
    #[serde(rename = "forced-acceptance-threshold")]
    pub forced_acceptance_threshold: u8,
}

impl Default for ChallengerConfig {
    fn default() -> Self {
        Self {
            satisfaction_threshold: 50,
            max_iterations: 5,
            absolute_max_iterations: 10,
            min_improvement_threshold: 2,
            stagnation_window: 3,
            forced_acceptance_threshold: 40,
        }
    }
}

/// Fix challenger loop parameters
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixChallengerConfig {
    #[serde(rename = "satisfaction-threshold")]
    pub satisfaction_threshold: u8,

    #[serde(rename = "max-iterations")]
    pub max_iterations: u32,
}

impl Default for FixChallengerConfig {
    fn default() -> Self {
        Self {
            satisfaction_threshold: 95,
            max_iterations: 3,
        }
    }
}

/// Extended-thinking defaults
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ThinkingConfig {
    /// Thinking budget hint passed to backends, in tokens
    #[serde(rename = "budget-tokens")]
    pub budget_tokens: u32,
}

impl Default for ThinkingConfig {
    fn default() -> Self {
        Self { budget_tokens: 8000 }
    }
}

/// Task queue policy
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    /// Processing age after which a task counts as a zombie
    #[serde(rename = "zombie-age-seconds")]
    pub zombie_age_seconds: u64,

    /// Requeue attempts before a zombie terminally fails
    #[serde(rename = "max-attempts")]
    pub max_attempts: u32,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            zombie_age_seconds: 1800,
            max_attempts: 3,
        }
    }
}

/// Concurrency limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConcurrencyConfig {
    /// Maximum reviewer loops running at once within a review
    #[serde(rename = "max-reviewers-in-flight")]
    pub max_reviewers_in_flight: usize,
}

impl Default for ConcurrencyConfig {
    fn default() -> Self {
        Self {
            max_reviewers_in_flight: 4,
        }
    }
}

/// Fix batching and classification
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FixConfig {
    #[serde(rename = "max-issues-per-batch")]
    pub max_issues_per_batch: usize,

    #[serde(rename = "max-workload-points")]
    pub max_workload_points: u32,

    /// Effort assumed when an issue has no estimate
    #[serde(rename = "default-effort")]
    pub default_effort: u8,

    /// Files-to-modify assumed when an issue has no estimate
    #[serde(rename = "default-files")]
    pub default_files: u32,

    /// Extensions classified as backend
    #[serde(rename = "backend-extensions")]
    pub backend_extensions: Vec<String>,

    /// Extensions classified as frontend
    #[serde(rename = "frontend-extensions")]
    pub frontend_extensions: Vec<String>,

    /// Prefix for fix branches
    #[serde(rename = "branch-prefix")]
    pub branch_prefix: String,
}

impl Default for FixConfig {
    fn default() -> Self {
        Self {
            max_issues_per_batch: 5,
            max_workload_points: 15,
            default_effort: 3,
            default_files: 1,
            backend_extensions: ["go", "rs", "py", "rb", "java", "kt", "cs", "php", "sql", "c", "cpp", "h"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            frontend_extensions: ["ts", "tsx", "js", "jsx", "vue", "svelte", "css", "scss", "html"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            branch_prefix: "turbowrap".to_string(),
        }
    }
}

/// Timeouts
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Per-invocation timeout
    #[serde(rename = "invocation-seconds")]
    pub invocation_seconds: u64,

    /// Total per-reviewer timeout
    #[serde(rename = "reviewer-seconds")]
    pub reviewer_seconds: u64,

    /// Total per-request timeout; unset means unlimited
    #[serde(rename = "request-seconds")]
    pub request_seconds: Option<u64>,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            invocation_seconds: 120,
            reviewer_seconds: 300,
            request_seconds: None,
        }
    }
}

/// Storage locations
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory for the record store
    #[serde(rename = "store-dir")]
    pub store_dir: String,

    /// Directory for the artifact sink
    #[serde(rename = "artifact-dir")]
    pub artifact_dir: String,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            store_dir: ".turbowrap/store".to_string(),
            artifact_dir: ".turbowrap/artifacts".to_string(),
        }
    }
}

/// Prompt template overrides
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PromptsConfig {
    /// Directory of template files overriding the embedded catalog
    pub dir: Option<PathBuf>,
}
