//! TurboWrap - dual-LLM challenger-loop orchestrator
//!
//! TurboWrap coordinates AI code review and fixing around a challenger
//! pattern: a primary model produces review or fix work, a secondary model
//! scores it, and the loop engine iterates until a satisfaction threshold,
//! stagnation, or an iteration cap ends the run.
//!
//! # Core Concepts
//!
//! - **Challenger loop**: every primary output is validated by an
//!   independent model before it counts
//! - **Checkpointed reviewers**: an interrupted review resumes without
//!   re-running finished reviewers
//! - **Atomic fixes**: a fix request produces exactly one commit or none
//! - **Bounded fan-out**: reviewers run in parallel up to a configured limit
//!
//! # Modules
//!
//! - [`llm`] - invoker capability, CLI adapter, tolerant output parsing
//! - [`r#loop`] - the challenger loop engine
//! - [`aggregate`] - dedup, priority scoring, overall score
//! - [`review`] / [`fix`] - the two orchestrators
//! - [`queue`] / [`worker`] - task scheduling and draining
//! - [`checkpoint`] / [`store`] / [`artifact`] - persistence capabilities

pub mod aggregate;
pub mod artifact;
pub mod checkpoint;
pub mod cli;
pub mod config;
pub mod domain;
pub mod error;
pub mod fix;
pub mod git;
pub mod llm;
pub mod prompts;
pub mod queue;
pub mod review;
pub mod store;
pub mod worker;

// Note: 'loop' is a reserved keyword, so we use r#loop
#[path = "loop/mod.rs"]
pub mod r#loop;

// Re-export commonly used types
pub use config::Config;
pub use domain::{
    Backend, Category, Checkpoint, ConvergenceStatus, FinalReport, FixOutcome, FixReport, Invocation, Issue, LoopRun,
    LoopScope, Recommendation, RepoType, Severity, Task, TaskKind, TaskState,
};
pub use error::CoreError;
pub use fix::{FixOrchestrator, FixRequest};
pub use llm::{CliInvoker, InvokeOptions, InvokeRequest, LlmError, LlmInvoker};
pub use queue::{TaskQueue, ZombieOutcome};
pub use r#loop::{ChallengerEngine, EngineOptions, LoopParams, LoopPrompts};
pub use review::{ReviewOrchestrator, ReviewRequest, ReviewSource};
pub use store::{JsonlStore, Store};
pub use worker::{TaskRunner, WorkerPool};
