//! Store error types

use thiserror::Error;

/// Errors that can occur during store operations
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    #[error("Record not found: {0}")]
    NotFound(String),

    #[error("Duplicate record id: {0}")]
    Duplicate(String),

    #[error("Corrupt record at {file}:{line}: {message}")]
    Corrupt {
        file: String,
        line: usize,
        message: String,
    },
}

impl StoreError {
    /// Check whether the error indicates a missing record
    pub fn is_not_found(&self) -> bool {
        matches!(self, StoreError::NotFound(_))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_is_not_found() {
        assert!(StoreError::NotFound("x".to_string()).is_not_found());
        assert!(!StoreError::Duplicate("x".to_string()).is_not_found());
    }
}
