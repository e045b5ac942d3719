//! LlmInvoker trait definition
//!
//! Uniform capability for invoking the primary and challenger backends. Each
//! invocation is independent - no conversation state is kept between calls;
//! refinement context travels inside the prompt.

use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::domain::{Backend, Invocation};

use super::LlmError;

/// Per-invocation options
#[derive(Debug, Clone)]
pub struct InvokeOptions {
    /// Model override for this call
    pub model: Option<String>,

    /// Extended-thinking budget hint, in tokens
    pub thinking_budget_tokens: Option<u32>,

    /// Hard per-invocation timeout
    pub timeout: Duration,

    /// Require a parseable structured payload; failure surfaces as
    /// `LlmError::InvalidOutput` with the raw blob preserved
    pub require_structured: bool,

    /// Request-scoped cancellation handle
    pub cancel: CancellationToken,
}

impl Default for InvokeOptions {
    fn default() -> Self {
        Self {
            model: None,
            thinking_budget_tokens: None,
            timeout: Duration::from_secs(120),
            require_structured: false,
            cancel: CancellationToken::new(),
        }
    }
}

/// Everything needed for one backend call
#[derive(Debug, Clone)]
pub struct InvokeRequest {
    pub backend: Backend,

    /// Role identifier, e.g. `reviewer_be_architecture`, `fixer`, `fix_challenger`
    pub role: String,

    /// Fully rendered prompt text
    pub prompt: String,

    pub options: InvokeOptions,
}

impl InvokeRequest {
    pub fn new(backend: Backend, role: impl Into<String>, prompt: impl Into<String>) -> Self {
        Self {
            backend,
            role: role.into(),
            prompt: prompt.into(),
            options: InvokeOptions::default(),
        }
    }

    pub fn with_options(mut self, options: InvokeOptions) -> Self {
        self.options = options;
        self
    }
}

/// Streaming chunk for progress display
#[derive(Debug, Clone)]
pub enum StreamChunk {
    /// Output text being generated
    TextDelta(String),
    /// Thinking-trace text being generated
    ThinkingDelta(String),
    /// Invocation finished
    Done,
}

/// Uniform invocation of reviewer/challenger backends
///
/// Implementations must persist the prompt, raw output, and thinking trace
/// through the artifact sink before the returned [`Invocation`] is complete,
/// so a crash mid-flight leaves either nothing or complete artifacts.
#[async_trait]
pub trait LlmInvoker: Send + Sync {
    /// Invoke a backend and wait for the complete result
    async fn invoke(&self, request: InvokeRequest) -> Result<Invocation, LlmError>;

    /// Invoke a backend, streaming chunks to the sink as they arrive
    ///
    /// Returns the same complete [`Invocation`] as [`invoke`](Self::invoke).
    async fn invoke_streaming(
        &self,
        request: InvokeRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<Invocation, LlmError>;
}

/// Test doubles, public so integration tests can drive the orchestrators
pub mod mock {
    use super::*;
    use std::sync::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    use crate::llm::parser;

    /// Mock invoker that replays scripted outputs in call order
    pub struct MockInvoker {
        responses: Mutex<Vec<Result<String, LlmError>>>,
        call_count: AtomicUsize,
        calls: Mutex<Vec<InvokeRequest>>,
    }

    impl MockInvoker {
        /// Script successful outputs only
        pub fn new(outputs: Vec<&str>) -> Self {
            Self::with_results(outputs.into_iter().map(|s| Ok(s.to_string())).collect())
        }

        /// Script a mix of outputs and errors
        pub fn with_results(responses: Vec<Result<String, LlmError>>) -> Self {
            Self {
                responses: Mutex::new(responses),
                call_count: AtomicUsize::new(0),
                calls: Mutex::new(Vec::new()),
            }
        }

        pub fn call_count(&self) -> usize {
            self.call_count.load(Ordering::SeqCst)
        }

        /// Requests received so far, in order
        pub fn calls(&self) -> Vec<InvokeRequest> {
            self.calls.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl LlmInvoker for MockInvoker {
        async fn invoke(&self, request: InvokeRequest) -> Result<Invocation, LlmError> {
            if request.options.cancel.is_cancelled() {
                return Err(LlmError::Canceled);
            }

            self.call_count.fetch_add(1, Ordering::SeqCst);
            self.calls.lock().unwrap().push(request.clone());

            let output = {
                let mut responses = self.responses.lock().unwrap();
                if responses.is_empty() {
                    return Err(LlmError::Unavailable("no more mock responses".to_string()));
                }
                responses.remove(0)?
            };

            let mut invocation = Invocation::new(request.backend, request.role, request.prompt, output.clone());
            if let Ok(parsed) = parser::extract_json(&output) {
                invocation = invocation.with_parsed(parsed);
            } else if request.options.require_structured {
                return Err(LlmError::invalid_output("mock output is not structured", output));
            }
            Ok(invocation)
        }

        async fn invoke_streaming(
            &self,
            request: InvokeRequest,
            chunk_tx: mpsc::Sender<StreamChunk>,
        ) -> Result<Invocation, LlmError> {
            let invocation = self.invoke(request).await?;
            let _ = chunk_tx.send(StreamChunk::TextDelta(invocation.output.clone())).await;
            let _ = chunk_tx.send(StreamChunk::Done).await;
            Ok(invocation)
        }
    }

}
