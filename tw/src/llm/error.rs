//! LLM invocation error types

use std::time::Duration;
use thiserror::Error;

/// Errors that can occur while invoking an LLM backend
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Invocation timed out after {0:?}")]
    Timeout(Duration),

    #[error("Backend unavailable: {0}")]
    Unavailable(String),

    #[error("Invalid structured output: {message}")]
    InvalidOutput {
        message: String,
        /// Raw output preserved for diagnosis
        raw: String,
    },

    #[error("Invocation canceled")]
    Canceled,
}

impl LlmError {
    /// Whether retrying the same invocation could succeed
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::Timeout(_) => true,
            LlmError::Unavailable(_) => true,
            LlmError::InvalidOutput { .. } => false,
            LlmError::Canceled => false,
        }
    }

    /// Whether the invocation was canceled
    pub fn is_canceled(&self) -> bool {
        matches!(self, LlmError::Canceled)
    }

    /// Build an invalid-output error preserving the raw blob
    pub fn invalid_output(message: impl Into<String>, raw: impl Into<String>) -> Self {
        LlmError::InvalidOutput {
            message: message.into(),
            raw: raw.into(),
        }
    }
}
