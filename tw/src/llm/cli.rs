//! CLI-subprocess invoker
//!
//! Invokes each backend by spawning its configured command line (e.g. the
//! `claude` or `gemini` CLI), writing the prompt to stdin and streaming
//! stdout back. The raw output is returned unchanged so the parser can do
//! its repair work.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use tokio::io::{AsyncBufReadExt, AsyncReadExt, AsyncWriteExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::artifact::{ArtifactSink, KIND_OUTPUT, KIND_PROMPT, KIND_THINKING, blob_key};
use crate::domain::{ArtifactRefs, Backend, Invocation};

use super::parser;
use super::{InvokeRequest, LlmError, LlmInvoker, StreamChunk};

/// How to spawn one backend's CLI
#[derive(Debug, Clone)]
pub struct BackendCommand {
    /// Executable name or path
    pub program: String,

    /// Fixed arguments, before any per-invocation flags
    pub args: Vec<String>,

    /// Flag that selects the model, e.g. `--model`
    pub model_flag: Option<String>,

    /// Default model when the request does not override it
    pub model: Option<String>,

    /// Flag that sets the extended-thinking budget, e.g. `--thinking-budget`
    pub thinking_flag: Option<String>,
}

impl BackendCommand {
    pub fn new(program: impl Into<String>) -> Self {
        Self {
            program: program.into(),
            args: Vec::new(),
            model_flag: None,
            model: None,
            thinking_flag: None,
        }
    }

    fn build(&self, request: &InvokeRequest) -> Command {
        let mut cmd = Command::new(&self.program);
        cmd.args(&self.args);

        let model = request.options.model.as_ref().or(self.model.as_ref());
        if let (Some(flag), Some(model)) = (&self.model_flag, model) {
            cmd.arg(flag).arg(model);
        }
        if let (Some(flag), Some(budget)) = (&self.thinking_flag, request.options.thinking_budget_tokens) {
            cmd.arg(flag).arg(budget.to_string());
        }

        cmd.stdin(Stdio::piped()).stdout(Stdio::piped()).stderr(Stdio::piped());
        cmd.kill_on_drop(true);
        cmd
    }
}

/// Invoker backed by one CLI per backend
pub struct CliInvoker {
    primary: BackendCommand,
    challenger: BackendCommand,
    artifacts: Arc<dyn ArtifactSink>,
}

impl CliInvoker {
    pub fn new(primary: BackendCommand, challenger: BackendCommand, artifacts: Arc<dyn ArtifactSink>) -> Self {
        Self {
            primary,
            challenger,
            artifacts,
        }
    }

    fn command_for(&self, backend: Backend) -> &BackendCommand {
        match backend {
            Backend::Primary => &self.primary,
            Backend::Challenger => &self.challenger,
        }
    }

    async fn run(&self, request: InvokeRequest, chunk_tx: Option<mpsc::Sender<StreamChunk>>) -> Result<Invocation, LlmError> {
        let backend_cmd = self.command_for(request.backend);
        let started = Instant::now();

        debug!(backend = %request.backend, role = %request.role, program = %backend_cmd.program, "Spawning backend CLI");

        let mut child = backend_cmd
            .build(&request)
            .spawn()
            .map_err(|e| LlmError::Unavailable(format!("failed to spawn {}: {}", backend_cmd.program, e)))?;

        // Feed the prompt on stdin and close it so the CLI starts producing
        if let Some(mut stdin) = child.stdin.take() {
            stdin
                .write_all(request.prompt.as_bytes())
                .await
                .map_err(|e| LlmError::Unavailable(format!("failed to write prompt: {}", e)))?;
            drop(stdin);
        }

        let stdout = child
            .stdout
            .take()
            .ok_or_else(|| LlmError::Unavailable("child has no stdout".to_string()))?;

        // Drain stderr concurrently so a chatty CLI cannot fill the pipe
        // and stall
        let stderr_task = child.stderr.take().map(|mut stderr| {
            tokio::spawn(async move {
                let mut buf = String::new();
                let _ = stderr.read_to_string(&mut buf).await;
                buf
            })
        });

        let cancel = request.options.cancel.clone();
        let stdout_text = tokio::select! {
            collected = read_stdout(stdout, chunk_tx.clone()) => collected?,
            _ = cancel.cancelled() => {
                let _ = child.kill().await;
                return Err(LlmError::Canceled);
            }
            _ = tokio::time::sleep(request.options.timeout) => {
                let _ = child.kill().await;
                return Err(LlmError::Timeout(request.options.timeout));
            }
        };

        let status = child
            .wait()
            .await
            .map_err(|e| LlmError::Unavailable(format!("failed to wait for child: {}", e)))?;
        let stderr = match stderr_task {
            Some(task) => task.await.unwrap_or_default(),
            None => String::new(),
        };
        let output = CollectedOutput {
            stdout: stdout_text,
            stderr,
            status_success: status.success(),
            exit_code: status.code().unwrap_or(-1),
        };
        if !output.status_success {
            warn!(code = output.exit_code, "Backend CLI exited nonzero");
            return Err(LlmError::Unavailable(format!(
                "{} exited with {}: {}",
                backend_cmd.program,
                output.exit_code,
                output.stderr.trim()
            )));
        }

        let duration_ms = started.elapsed().as_millis() as u64;
        let mut invocation = Invocation::new(request.backend, request.role.clone(), request.prompt.clone(), output.stdout.clone())
            .with_duration_ms(duration_ms);

        match parser::extract_json(&invocation.output) {
            Ok(parsed) => invocation = invocation.with_parsed(parsed),
            Err(e) if request.options.require_structured => {
                return Err(LlmError::invalid_output(e.to_string(), invocation.output));
            }
            Err(_) => {}
        }

        // Artifacts must be durable before the invocation is reported complete
        let artifacts = self.persist_artifacts(&invocation).await?;
        invocation = invocation.with_artifacts(artifacts);

        if let Some(tx) = chunk_tx {
            let _ = tx.send(StreamChunk::Done).await;
        }

        info!(
            backend = %request.backend,
            role = %request.role,
            duration_ms,
            output_bytes = invocation.output.len(),
            "Invocation complete"
        );
        Ok(invocation)
    }

    async fn persist_artifacts(&self, invocation: &Invocation) -> Result<ArtifactRefs, LlmError> {
        let map_err = |e: crate::artifact::ArtifactError| LlmError::Unavailable(e.to_string());

        let prompt = self
            .artifacts
            .put(&blob_key(&invocation.id, KIND_PROMPT), invocation.prompt.as_bytes())
            .await
            .map_err(map_err)?;
        let output = self
            .artifacts
            .put(&blob_key(&invocation.id, KIND_OUTPUT), invocation.output.as_bytes())
            .await
            .map_err(map_err)?;
        let thinking = match &invocation.thinking {
            Some(trace) => Some(
                self.artifacts
                    .put(&blob_key(&invocation.id, KIND_THINKING), trace.as_bytes())
                    .await
                    .map_err(map_err)?,
            ),
            None => None,
        };

        Ok(ArtifactRefs {
            prompt: Some(prompt),
            output: Some(output),
            thinking,
        })
    }
}

struct CollectedOutput {
    stdout: String,
    stderr: String,
    status_success: bool,
    exit_code: i32,
}

/// Drain stdout line by line, streaming chunks out as they arrive
async fn read_stdout(
    stdout: tokio::process::ChildStdout,
    chunk_tx: Option<mpsc::Sender<StreamChunk>>,
) -> Result<String, LlmError> {
    let mut reader = BufReader::new(stdout).lines();
    let mut collected = String::new();
    while let Some(line) = reader
        .next_line()
        .await
        .map_err(|e| LlmError::Unavailable(format!("failed to read output: {}", e)))?
    {
        if let Some(tx) = &chunk_tx {
            let _ = tx.send(StreamChunk::TextDelta(format!("{}\n", line))).await;
        }
        collected.push_str(&line);
        collected.push('\n');
    }
    Ok(collected)
}

#[async_trait]
impl LlmInvoker for CliInvoker {
    async fn invoke(&self, request: InvokeRequest) -> Result<Invocation, LlmError> {
        self.run(request, None).await
    }

    async fn invoke_streaming(
        &self,
        request: InvokeRequest,
        chunk_tx: mpsc::Sender<StreamChunk>,
    ) -> Result<Invocation, LlmError> {
        self.run(request, Some(chunk_tx)).await
    }
}
