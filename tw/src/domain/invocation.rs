//! Invocation - a single call to one LLM backend

use serde::{Deserialize, Serialize};
use workstore::now_ms;

use super::id::generate_id;

/// Which backend an invocation targets
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// The reviewer/fixer model
    Primary,
    /// The validating model
    Challenger,
}

impl std::fmt::Display for Backend {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Primary => write!(f, "primary"),
            Self::Challenger => write!(f, "challenger"),
        }
    }
}

/// Rough token counts for one invocation
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenEstimate {
    pub prompt_tokens: u64,
    pub output_tokens: u64,
}

impl TokenEstimate {
    /// Estimate from raw text lengths (roughly 4 chars per token)
    pub fn from_text(prompt: &str, output: &str) -> Self {
        Self {
            prompt_tokens: (prompt.len() as u64).div_ceil(4),
            output_tokens: (output.len() as u64).div_ceil(4),
        }
    }
}

/// Pointers into the artifact sink for one invocation's blobs
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ArtifactRefs {
    pub prompt: Option<String>,
    pub output: Option<String>,
    pub thinking: Option<String>,
}

/// A completed call to one LLM backend
///
/// Created by the invoker once the call finishes; immutable afterwards.
/// Owned by a [`super::LoopRun`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invocation {
    /// Unique identifier
    pub id: String,

    pub backend: Backend,

    /// Role identifier, e.g. `reviewer_be_architecture`, `fixer`, `fix_challenger`
    pub role: String,

    /// The rendered prompt sent to the backend
    pub prompt: String,

    /// Raw textual output, unmodified so the parser can do its repair work
    pub output: String,

    /// Extended-thinking trace when the backend produced one
    #[serde(default)]
    pub thinking: Option<String>,

    /// Structured result when the output parsed as JSON
    #[serde(default)]
    pub parsed: Option<serde_json::Value>,

    pub duration_ms: u64,
    pub tokens: TokenEstimate,
    pub artifacts: ArtifactRefs,

    /// Completion timestamp (Unix milliseconds)
    pub completed_at: i64,
}

impl Invocation {
    /// Create a completed invocation record
    pub fn new(backend: Backend, role: impl Into<String>, prompt: impl Into<String>, output: impl Into<String>) -> Self {
        let role = role.into();
        let prompt = prompt.into();
        let output = output.into();
        let tokens = TokenEstimate::from_text(&prompt, &output);
        Self {
            id: generate_id("inv", &role),
            backend,
            role,
            prompt,
            output,
            thinking: None,
            parsed: None,
            duration_ms: 0,
            tokens,
            artifacts: ArtifactRefs::default(),
            completed_at: now_ms(),
        }
    }

    /// Attach the thinking trace
    pub fn with_thinking(mut self, thinking: impl Into<String>) -> Self {
        self.thinking = Some(thinking.into());
        self
    }

    /// Attach the parsed structured result
    pub fn with_parsed(mut self, parsed: serde_json::Value) -> Self {
        self.parsed = Some(parsed);
        self
    }

    /// Set the wall-clock duration
    pub fn with_duration_ms(mut self, duration_ms: u64) -> Self {
        self.duration_ms = duration_ms;
        self
    }

    /// Set the artifact pointers
    pub fn with_artifacts(mut self, artifacts: ArtifactRefs) -> Self {
        self.artifacts = artifacts;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_invocation_new() {
        let inv = Invocation::new(Backend::Primary, "reviewer_be_security", "prompt text", "output text");
        assert!(inv.id.contains("-inv-"));
        assert_eq!(inv.backend, Backend::Primary);
        assert_eq!(inv.role, "reviewer_be_security");
        assert!(inv.parsed.is_none());
    }

    #[test]
    fn test_token_estimate_from_text() {
        let est = TokenEstimate::from_text("aaaa", "aaaaaaaa");
        assert_eq!(est.prompt_tokens, 1);
        assert_eq!(est.output_tokens, 2);

        // Rounds up
        let est = TokenEstimate::from_text("aaaaa", "");
        assert_eq!(est.prompt_tokens, 2);
        assert_eq!(est.output_tokens, 0);
    }

    #[test]
    fn test_backend_display() {
        assert_eq!(Backend::Primary.to_string(), "primary");
        assert_eq!(Backend::Challenger.to_string(), "challenger");
    }
}
