//! Artifact recorder
//!
//! Persists prompts, raw outputs, and thinking traces per invocation so runs
//! can be audited and resumed. The sink is append-only from the core's
//! perspective and must tolerate concurrent writers; keys are scoped by
//! invocation id so writers never collide on a path.

use std::path::PathBuf;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use thiserror::Error;
use tracing::{debug, warn};

/// Blob kinds written per invocation
pub const KIND_PROMPT: &str = "prompt";
pub const KIND_OUTPUT: &str = "output";
pub const KIND_THINKING: &str = "thinking";

/// Write attempts before surfacing `Unavailable`
const MAX_WRITE_ATTEMPTS: u32 = 3;

/// Base backoff between write attempts
const RETRY_BACKOFF_MS: u64 = 50;

/// Errors from the artifact sink
#[derive(Debug, Error)]
pub enum ArtifactError {
    #[error("Artifact sink unavailable: {0}")]
    Unavailable(String),

    #[error("Artifact not found: {0}")]
    NotFound(String),
}

/// Opaque blob storage keyed by pointer
#[async_trait]
pub trait ArtifactSink: Send + Sync {
    /// Store a blob; returns the pointer to fetch it back
    async fn put(&self, key: &str, blob: &[u8]) -> Result<String, ArtifactError>;

    /// Fetch a blob by pointer
    async fn get(&self, pointer: &str) -> Result<Vec<u8>, ArtifactError>;
}

/// Build the sink key for one invocation blob
pub fn blob_key(invocation_id: &str, kind: &str) -> String {
    format!("{}/{}", invocation_id, kind)
}

/// Filesystem-backed artifact sink
///
/// Blobs live under `base_dir/<key>`; the pointer is the key itself.
pub struct FsArtifactSink {
    base_dir: PathBuf,
}

impl FsArtifactSink {
    pub fn new(base_dir: impl Into<PathBuf>) -> Self {
        Self {
            base_dir: base_dir.into(),
        }
    }

    fn path_for(&self, key: &str) -> PathBuf {
        self.base_dir.join(key)
    }
}

#[async_trait]
impl ArtifactSink for FsArtifactSink {
    async fn put(&self, key: &str, blob: &[u8]) -> Result<String, ArtifactError> {
        let path = self.path_for(key);
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| ArtifactError::Unavailable(e.to_string()))?;
        }

        let mut last_err = None;
        for attempt in 1..=MAX_WRITE_ATTEMPTS {
            match tokio::fs::write(&path, blob).await {
                Ok(()) => {
                    debug!(%key, bytes = blob.len(), "Stored artifact");
                    return Ok(key.to_string());
                }
                Err(e) => {
                    warn!(%key, attempt, error = %e, "Artifact write failed");
                    last_err = Some(e);
                    if attempt < MAX_WRITE_ATTEMPTS {
                        let jitter = rand::rng().random_range(0..RETRY_BACKOFF_MS);
                        tokio::time::sleep(Duration::from_millis(RETRY_BACKOFF_MS * attempt as u64 + jitter)).await;
                    }
                }
            }
        }

        Err(ArtifactError::Unavailable(
            last_err.map(|e| e.to_string()).unwrap_or_else(|| "unknown".to_string()),
        ))
    }

    async fn get(&self, pointer: &str) -> Result<Vec<u8>, ArtifactError> {
        let path = self.path_for(pointer);
        match tokio::fs::read(&path).await {
            Ok(blob) => Ok(blob),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Err(ArtifactError::NotFound(pointer.to_string())),
            Err(e) => Err(ArtifactError::Unavailable(e.to_string())),
        }
    }
}

/// In-memory sink for tests
pub mod mock {
    use super::*;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Default)]
    pub struct MemorySink {
        blobs: Mutex<HashMap<String, Vec<u8>>>,
    }

    impl MemorySink {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn len(&self) -> usize {
            self.blobs.lock().unwrap().len()
        }

        pub fn is_empty(&self) -> bool {
            self.len() == 0
        }
    }

    #[async_trait]
    impl ArtifactSink for MemorySink {
        async fn put(&self, key: &str, blob: &[u8]) -> Result<String, ArtifactError> {
            self.blobs.lock().unwrap().insert(key.to_string(), blob.to_vec());
            Ok(key.to_string())
        }

        async fn get(&self, pointer: &str) -> Result<Vec<u8>, ArtifactError> {
            self.blobs
                .lock()
                .unwrap()
                .get(pointer)
                .cloned()
                .ok_or_else(|| ArtifactError::NotFound(pointer.to_string()))
        }
    }
}
