//! TurboWrap CLI entry point
//!
//! Wires the orchestration core to real adapters (CLI backends, git, JSONL
//! store, filesystem artifacts) and drives requests through the task queue.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use clap::Parser;
use eyre::{Context, Result, bail};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use turbowrap::artifact::FsArtifactSink;
use turbowrap::cli::{Cli, Command, FixPayload, OutputFormat, ReviewPayload, format_fix_report, format_report};
use turbowrap::config::Config;
use turbowrap::domain::{Task, TaskKind, TaskState};
use turbowrap::error::CoreError;
use turbowrap::fix::{FixOrchestrator, FixRequest};
use turbowrap::git::CliGitAdapter;
use turbowrap::llm::{BackendCommand, CliInvoker, LlmInvoker};
use turbowrap::prompts::PromptLoader;
use turbowrap::queue::TaskQueue;
use turbowrap::review::{ReviewOrchestrator, ReviewRequest, ReviewSource};
use turbowrap::store::{JsonlStore, Store};
use turbowrap::worker::{TaskRunner, WorkerPool};

fn setup_logging(cli_log_level: Option<&str>) -> Result<()> {
    let log_dir = dirs::data_local_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("turbowrap")
        .join("logs");
    fs::create_dir_all(&log_dir).context("Failed to create log directory")?;

    let level = match cli_log_level.map(|s| s.to_uppercase()) {
        Some(s) => match s.as_str() {
            "TRACE" => tracing::Level::TRACE,
            "DEBUG" => tracing::Level::DEBUG,
            "INFO" => tracing::Level::INFO,
            "WARN" | "WARNING" => tracing::Level::WARN,
            "ERROR" => tracing::Level::ERROR,
            other => {
                eprintln!("Warning: Unknown log-level '{}', defaulting to INFO", other);
                tracing::Level::INFO
            }
        },
        None => tracing::Level::INFO,
    };

    let log_file = fs::File::create(log_dir.join("turbowrap.log")).context("Failed to create log file")?;
    tracing_subscriber::fmt()
        .with_writer(log_file)
        .with_ansi(false)
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()))
        .init();

    info!("Logging initialized (level: {:?})", level);
    Ok(())
}

/// Shared infrastructure built once per process
struct Infra {
    config: Config,
    store: Arc<JsonlStore>,
    invoker: Arc<dyn LlmInvoker>,
    prompts: Arc<PromptLoader>,
    cancel: CancellationToken,
}

impl Infra {
    fn build(config: Config) -> Result<Self> {
        let store = Arc::new(JsonlStore::open(&config.storage.store_dir).context("Failed to open store")?);
        let artifacts = Arc::new(FsArtifactSink::new(&config.storage.artifact_dir));
        let invoker: Arc<dyn LlmInvoker> = Arc::new(CliInvoker::new(
            backend_command(&config.llm.primary),
            backend_command(&config.llm.challenger),
            artifacts,
        ));
        let prompts = Arc::new(PromptLoader::new(config.prompts.dir.as_ref()));

        let cancel = CancellationToken::new();
        let ctrlc_cancel = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("Interrupt received, canceling in-flight work");
                ctrlc_cancel.cancel();
            }
        });

        Ok(Self {
            config,
            store,
            invoker,
            prompts,
            cancel,
        })
    }
}

fn backend_command(config: &turbowrap::config::BackendConfig) -> BackendCommand {
    BackendCommand {
        program: config.command.clone(),
        args: config.args.clone(),
        model_flag: config.model_flag.clone(),
        model: config.model.clone(),
        thinking_flag: config.thinking_flag.clone(),
    }
}

/// Runs dequeued tasks against the orchestrators
struct CliTaskRunner {
    infra: Arc<Infra>,
}

impl CliTaskRunner {
    async fn run_inner(&self, task: &Task) -> Result<(), CoreError> {
        match task.kind {
            TaskKind::Review => {
                let payload: ReviewPayload = serde_json::from_value(task.payload.clone())
                    .map_err(|e| CoreError::Repo(format!("bad review payload: {}", e)))?;

                let mut request = ReviewRequest::new(ReviewSource::Dir(payload.dir));
                request.workspace_path = payload.workspace_path;
                request.include_functional = payload.include_functional;
                request.challenger_enabled = payload.challenger_enabled;
                request.satisfaction_threshold = payload.satisfaction_threshold;
                request.max_iterations = payload.max_iterations;
                request.evaluator_enabled = payload.evaluator_enabled;
                request.cancel = self.infra.cancel.child_token();

                let orchestrator = ReviewOrchestrator::new(
                    self.infra.invoker.clone(),
                    self.infra.store.clone(),
                    self.infra.prompts.clone(),
                    self.infra.config.clone(),
                );
                orchestrator.review(task, request).await.map(|_| ())
            }
            TaskKind::Fix => {
                let payload: FixPayload = serde_json::from_value(task.payload.clone())
                    .map_err(|e| CoreError::Repo(format!("bad fix payload: {}", e)))?;

                let git = Arc::new(CliGitAdapter::new(&payload.repo_root));
                let mut request = FixRequest::new(payload.repository, payload.repo_root, payload.issues);
                request.workspace_path = payload.workspace_path;
                request.push = payload.push;
                request.cancel = self.infra.cancel.child_token();

                let orchestrator = FixOrchestrator::new(
                    self.infra.invoker.clone(),
                    self.infra.store.clone(),
                    git,
                    self.infra.prompts.clone(),
                    self.infra.config.clone(),
                );
                orchestrator.fix(task, request).await.map(|_| ())
            }
        }
    }
}

#[async_trait]
impl TaskRunner for CliTaskRunner {
    async fn run(&self, task: &Task) -> Result<(), CoreError> {
        let result = match self.infra.config.timeouts.request_seconds {
            Some(secs) => match tokio::time::timeout(Duration::from_secs(secs), self.run_inner(task)).await {
                Ok(result) => result,
                Err(_) => {
                    warn!(task = %task.id, "Request timed out, canceling");
                    self.infra.cancel.cancel();
                    Err(CoreError::Canceled)
                }
            },
            None => self.run_inner(task).await,
        };

        // Mirror the terminal state into the store; the queue itself is not
        // durable
        let mut stored = task.clone();
        match &result {
            Ok(()) => stored.set_state(TaskState::Completed),
            Err(e) => {
                stored.set_state(TaskState::Failed);
                stored.error = Some(e.to_string());
            }
        }
        if let Err(e) = self.infra.store.save_task(&stored).await {
            warn!(task = %task.id, error = %e, "Failed to persist task state");
        }

        result
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    setup_logging(cli.log_level.as_deref()).context("Failed to setup logging")?;

    let config = Config::load(cli.config.as_ref()).context("Failed to load configuration")?;
    debug!(command = ?cli.command, "Dispatching command");

    match cli.command {
        Command::Review {
            dir,
            workspace_path,
            include_functional,
            no_challenger,
            evaluator,
            threshold,
            max_iterations,
            resume,
            format,
        } => {
            let payload = ReviewPayload {
                dir: dir.clone(),
                workspace_path,
                include_functional,
                challenger_enabled: !no_challenger,
                satisfaction_threshold: threshold,
                max_iterations,
                evaluator_enabled: evaluator,
            };
            cmd_review(config, payload, resume, format).await
        }
        Command::Fix {
            repo_root,
            repository,
            issues,
            workspace_path,
            push,
            format,
        } => {
            let issues_text = fs::read_to_string(&issues)
                .context(format!("Failed to read issues file {}", issues.display()))?;
            let issues = serde_json::from_str(&issues_text).context("Failed to parse issues file")?;
            let payload = FixPayload {
                repository: repository.unwrap_or_else(|| repo_root.display().to_string()),
                repo_root,
                issues,
                workspace_path,
                push,
            };
            cmd_fix(config, payload, format).await
        }
        Command::Config => {
            println!("{}", serde_yaml::to_string(&config)?);
            Ok(())
        }
    }
}

async fn cmd_review(config: Config, payload: ReviewPayload, resume: Option<String>, format: OutputFormat) -> Result<()> {
    let infra = Arc::new(Infra::build(config)?);

    let task = match resume {
        Some(id) => {
            let Some(mut task) = infra.store.load_task(&id).await? else {
                bail!("No task found to resume: {}", id);
            };
            info!(task = %task.id, "Resuming review task");
            task.set_state(TaskState::Pending);
            task.processing_started_at = None;
            task
        }
        None => {
            let label = payload
                .dir
                .file_name()
                .map(|n| n.to_string_lossy().to_string())
                .unwrap_or_else(|| "repo".to_string());
            Task::new(TaskKind::Review, &format!("review {}", label), serde_json::to_value(&payload)?)
        }
    };
    let task_id = task.id.clone();
    infra.store.save_task(&task).await?;

    drain_single(&infra, task).await?;

    match infra.store.load_report(&task_id).await? {
        Some(report) => {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print!("{}", format_report(&report)),
            }
            Ok(())
        }
        None => {
            let error = infra
                .store
                .load_task(&task_id)
                .await?
                .and_then(|t| t.error)
                .unwrap_or_else(|| "unknown failure".to_string());
            bail!("Review did not produce a report: {}", error);
        }
    }
}

async fn cmd_fix(config: Config, payload: FixPayload, format: OutputFormat) -> Result<()> {
    let infra = Arc::new(Infra::build(config)?);

    let task = Task::new(TaskKind::Fix, &format!("fix {}", payload.repository), serde_json::to_value(&payload)?)
        .with_repository(payload.repository.clone());
    let task_id = task.id.clone();
    infra.store.save_task(&task).await?;

    drain_single(&infra, task).await?;

    match infra.store.load_fix_report(&task_id).await? {
        Some(report) => {
            match format {
                OutputFormat::Json => println!("{}", serde_json::to_string_pretty(&report)?),
                OutputFormat::Text => print!("{}", format_fix_report(&report)),
            }
            if report.error.is_some() {
                bail!("Fix failed: {}", report.error.unwrap_or_default());
            }
            Ok(())
        }
        None => {
            let error = infra
                .store
                .load_task(&task_id)
                .await?
                .and_then(|t| t.error)
                .unwrap_or_else(|| "unknown failure".to_string());
            bail!("Fix did not produce a report: {}", error);
        }
    }
}

/// Enqueue one task and drain the queue with a single worker
async fn drain_single(infra: &Arc<Infra>, task: Task) -> Result<()> {
    let queue = Arc::new(TaskQueue::new(infra.config.queue.clone()));
    queue.enqueue(task).await.map_err(|e| eyre::eyre!(e.to_string()))?;

    let runner = Arc::new(CliTaskRunner { infra: infra.clone() });
    let pool = WorkerPool::new(queue, runner, 1);
    pool.drain().await;
    Ok(())
}
