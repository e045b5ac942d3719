//! ChallengerEngine - runs one refine-then-validate loop
//!
//! Alternates a primary invocation (review or fix work) with a challenger
//! invocation (structured evaluation), feeding the challenger's feedback
//! back into the next primary prompt until a convergence test ends the run.
//!
//! Convergence tests run in a fixed order after each iteration: threshold,
//! then soft cap (with forced acceptance), then stagnation.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::domain::{Backend, ConvergenceStatus, Invocation, LoopRun, LoopScope};
use crate::llm::{ChallengerVerdict, InvokeOptions, InvokeRequest, LlmError, LlmInvoker, parse_verdict};

use super::LoopParams;

/// Prompt texts the engine cycles through
///
/// The refine and challenger templates use `{{placeholder}}` substitution;
/// see [`ChallengerEngine::render`] for the variables provided.
#[derive(Debug, Clone)]
pub struct LoopPrompts {
    /// Fully rendered prompt for iteration 1's primary invocation
    pub initial: String,

    /// Template for iteration N>1 primary invocations; receives
    /// `previous-output`, `challenger-feedback`, `missed-issues`, `challenges`
    pub refine_template: String,

    /// Template for challenger invocations; receives `primary-output` and
    /// `iteration`
    pub challenger_template: String,
}

/// Engine-level invocation options shared by every call in the loop
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Per-invocation timeout
    pub invocation_timeout: Duration,

    /// Extended-thinking budget hint for primary invocations
    pub thinking_budget_tokens: Option<u32>,

    /// Request-scoped cancellation handle
    pub cancel: CancellationToken,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            invocation_timeout: Duration::from_secs(120),
            thinking_budget_tokens: None,
            cancel: CancellationToken::new(),
        }
    }
}

/// Runs one challenger loop to a terminal convergence status
pub struct ChallengerEngine {
    invoker: Arc<dyn LlmInvoker>,
    params: LoopParams,
    primary_role: String,
    challenger_role: String,
    prompts: LoopPrompts,
    options: EngineOptions,
}

impl ChallengerEngine {
    pub fn new(
        invoker: Arc<dyn LlmInvoker>,
        params: LoopParams,
        primary_role: impl Into<String>,
        challenger_role: impl Into<String>,
        prompts: LoopPrompts,
    ) -> Self {
        Self {
            invoker,
            params,
            primary_role: primary_role.into(),
            challenger_role: challenger_role.into(),
            prompts,
            options: EngineOptions::default(),
        }
    }

    /// Set engine options (timeout, thinking budget, cancellation)
    pub fn with_options(mut self, options: EngineOptions) -> Self {
        self.options = options;
        self
    }

    /// Run the loop for the given scope until a terminal status
    ///
    /// Cancellation propagates as `Err(LlmError::Canceled)`. Every other
    /// outcome, including `Failed`, is reported through the returned run's
    /// convergence status.
    pub async fn run(&self, task_id: &str, scope: LoopScope) -> Result<LoopRun, LlmError> {
        let mut run = LoopRun::new(task_id, scope);
        let label = run.scope.label().to_string();
        info!(run = %run.id, scope = %label, threshold = self.params.satisfaction_threshold, "Starting challenger loop");

        let mut last_feedback: Option<ChallengerVerdict> = None;

        loop {
            if run.iteration + 1 > self.params.absolute_max_iterations {
                warn!(run = %run.id, iterations = run.iteration, "Hard iteration cap reached");
                run.finish(ConvergenceStatus::MaxIterationsReached);
                return Ok(run);
            }
            let iteration = run.iteration + 1;

            // Primary: initial prompt first, refinement prompts after
            let prompt = if iteration == 1 {
                self.prompts.initial.clone()
            } else {
                self.refine_prompt(&run, last_feedback.as_ref())
            };

            let primary = match self.invoke(Backend::Primary, &self.primary_role, prompt, false).await {
                Ok(invocation) => invocation,
                Err(LlmError::Canceled) => return Err(LlmError::Canceled),
                Err(e) => {
                    // The only invocation this iteration ran failed, so the
                    // whole iteration failed
                    warn!(run = %run.id, iteration, error = %e, "Primary invocation failed");
                    run.error = Some(e.to_string());
                    run.finish(ConvergenceStatus::Failed);
                    return Ok(run);
                }
            };

            // Challenger: structured evaluation of the primary output
            let challenger_prompt = self.challenger_prompt(&primary.output, iteration);
            let (challenger, verdict) = match self
                .invoke(Backend::Challenger, &self.challenger_role, challenger_prompt, true)
                .await
            {
                Ok(invocation) => match parse_verdict(&invocation.output) {
                    Ok(verdict) => (Some(invocation), Some(verdict)),
                    Err(e) => {
                        warn!(run = %run.id, iteration, error = %e, "Challenger verdict unparseable, scoring 0");
                        (Some(invocation), None)
                    }
                },
                Err(LlmError::Canceled) => return Err(LlmError::Canceled),
                Err(e) => {
                    // Primary succeeded, so the iteration survives with a
                    // zero score and the loop continues
                    warn!(run = %run.id, iteration, error = %e, "Challenger invocation failed, scoring 0");
                    (None, None)
                }
            };

            let score = verdict.as_ref().map(|v| v.satisfaction_score).unwrap_or(0);
            run.record_iteration(primary, challenger, score);
            last_feedback = verdict;

            debug!(run = %run.id, iteration, score, history = ?run.history, "Iteration scored");

            if let Some(status) = self.convergence_status(score, iteration, &run.history) {
                info!(run = %run.id, iterations = iteration, score, status = %status, "Loop converged");
                run.finish(status);
                return Ok(run);
            }
        }
    }

    /// Convergence tests, in the fixed order: threshold, soft cap, stagnation
    fn convergence_status(&self, score: u8, iteration: u32, history: &[u8]) -> Option<ConvergenceStatus> {
        if score >= self.params.satisfaction_threshold {
            return Some(ConvergenceStatus::ThresholdMet);
        }

        if iteration >= self.params.max_iterations {
            if score >= self.params.forced_acceptance_threshold {
                return Some(ConvergenceStatus::ForcedAcceptance);
            }
            return Some(ConvergenceStatus::MaxIterationsReached);
        }

        if history.len() >= self.params.stagnation_window {
            let window = &history[history.len() - self.params.stagnation_window..];
            let max = *window.iter().max().unwrap_or(&0);
            let min = *window.iter().min().unwrap_or(&0);
            if max - min < self.params.min_improvement_threshold {
                return Some(ConvergenceStatus::Stagnated);
            }
        }

        None
    }

    async fn invoke(
        &self,
        backend: Backend,
        role: &str,
        prompt: String,
        require_structured: bool,
    ) -> Result<Invocation, LlmError> {
        let options = InvokeOptions {
            model: None,
            thinking_budget_tokens: match backend {
                Backend::Primary => self.options.thinking_budget_tokens,
                Backend::Challenger => None,
            },
            timeout: self.options.invocation_timeout,
            require_structured,
            cancel: self.options.cancel.clone(),
        };
        let request = InvokeRequest::new(backend, role, prompt).with_options(options);
        self.invoker.invoke(request).await
    }

    fn refine_prompt(&self, run: &LoopRun, feedback: Option<&ChallengerVerdict>) -> String {
        let previous = run.final_primary().map(|inv| inv.output.as_str()).unwrap_or_default();
        let mut vars = HashMap::new();
        vars.insert("previous-output", previous.to_string());
        vars.insert(
            "challenger-feedback",
            feedback.map(|v| v.feedback.clone()).unwrap_or_default(),
        );
        vars.insert(
            "missed-issues",
            feedback.map(|v| v.missed_issues.join("\n- ")).unwrap_or_default(),
        );
        vars.insert(
            "challenges",
            feedback.map(|v| v.challenges.join("\n- ")).unwrap_or_default(),
        );
        render(&self.prompts.refine_template, &vars)
    }

    fn challenger_prompt(&self, primary_output: &str, iteration: u32) -> String {
        let mut vars = HashMap::new();
        vars.insert("primary-output", primary_output.to_string());
        vars.insert("iteration", iteration.to_string());
        render(&self.prompts.challenger_template, &vars)
    }
}

/// Simple `{{key}}` substitution over a template
fn render(template: &str, vars: &HashMap<&str, String>) -> String {
    let mut result = template.to_string();
    for (key, value) in vars {
        let placeholder = format!("{{{{{}}}}}", key);
        result = result.replace(&placeholder, value);
    }
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::llm::mock::MockInvoker;

    fn prompts() -> LoopPrompts {
        LoopPrompts {
            initial: "review the code".to_string(),
            refine_template: "refine based on: {{challenger-feedback}}\nprevious: {{previous-output}}".to_string(),
            challenger_template: "evaluate iteration {{iteration}}: {{primary-output}}".to_string(),
        }
    }

    fn params() -> LoopParams {
        LoopParams {
            satisfaction_threshold: 50,
            max_iterations: 5,
            absolute_max_iterations: 10,
            min_improvement_threshold: 2,
            stagnation_window: 3,
            forced_acceptance_threshold: 40,
        }
    }

    fn verdict(score: u8) -> String {
        format!(r#"{{"satisfaction_score": {}, "feedback": "push harder"}}"#, score)
    }

    fn scope() -> LoopScope {
        LoopScope::Reviewer {
            name: "reviewer_be_security".to_string(),
        }
    }

    fn engine(invoker: Arc<MockInvoker>, params: LoopParams) -> ChallengerEngine {
        ChallengerEngine::new(invoker, params, "reviewer_be_security", "challenger", prompts())
    }

    #[tokio::test]
    async fn test_threshold_met_on_first_iteration() {
        let invoker = Arc::new(MockInvoker::new(vec!["primary output", &verdict(55)]));
        let run = engine(invoker.clone(), params()).run("task-1", scope()).await.unwrap();

        assert_eq!(run.status, ConvergenceStatus::ThresholdMet);
        assert_eq!(run.iteration, 1);
        assert_eq!(run.history, vec![55]);
        assert_eq!(run.satisfaction, Some(55));
        assert_eq!(invoker.call_count(), 2);
    }

    #[tokio::test]
    async fn test_refinement_prompt_carries_feedback_and_previous_output() {
        let invoker = Arc::new(MockInvoker::new(vec![
            "first draft",
            &verdict(10),
            "second draft",
            &verdict(60),
        ]));
        let run = engine(invoker.clone(), params()).run("task-1", scope()).await.unwrap();
        assert_eq!(run.status, ConvergenceStatus::ThresholdMet);
        assert_eq!(run.iteration, 2);

        let calls = invoker.calls();
        // Third call is the second primary invocation with the refinement prompt
        let refine = &calls[2];
        assert!(refine.prompt.contains("push harder"));
        assert!(refine.prompt.contains("first draft"));
    }

    #[tokio::test]
    async fn test_stagnation_exit() {
        // Scores 30, 31, 32, 32: after iteration 4 the window {31,32,32}
        // spans 1 < 2, so the loop stagnates
        let invoker = Arc::new(MockInvoker::new(vec![
            "p1",
            &verdict(30),
            "p2",
            &verdict(31),
            "p3",
            &verdict(32),
            "p4",
            &verdict(32),
        ]));
        let run = engine(invoker, params()).run("task-1", scope()).await.unwrap();

        assert_eq!(run.status, ConvergenceStatus::Stagnated);
        assert_eq!(run.iteration, 4);
        assert_eq!(run.history, vec![30, 31, 32, 32]);
    }

    #[tokio::test]
    async fn test_forced_acceptance_at_soft_cap() {
        // Keep scores moving enough to dodge stagnation, land in
        // [forced_acceptance, threshold) at iteration 5
        let invoker = Arc::new(MockInvoker::new(vec![
            "p1",
            &verdict(10),
            "p2",
            &verdict(20),
            "p3",
            &verdict(30),
            "p4",
            &verdict(38),
            "p5",
            &verdict(45),
        ]));
        let run = engine(invoker, params()).run("task-1", scope()).await.unwrap();

        assert_eq!(run.status, ConvergenceStatus::ForcedAcceptance);
        assert_eq!(run.iteration, 5);
        assert_eq!(run.satisfaction, Some(45));
    }

    #[tokio::test]
    async fn test_max_iterations_below_forced_acceptance() {
        let invoker = Arc::new(MockInvoker::new(vec![
            "p1",
            &verdict(5),
            "p2",
            &verdict(12),
            "p3",
            &verdict(20),
            "p4",
            &verdict(28),
            "p5",
            &verdict(35),
        ]));
        let run = engine(invoker, params()).run("task-1", scope()).await.unwrap();

        assert_eq!(run.status, ConvergenceStatus::MaxIterationsReached);
        assert_eq!(run.iteration, 5);
    }

    #[tokio::test]
    async fn test_threshold_checked_before_soft_cap() {
        let mut p = params();
        p.max_iterations = 1;
        // Score meets both threshold and soft cap; threshold wins
        let invoker = Arc::new(MockInvoker::new(vec!["p1", &verdict(80)]));
        let run = engine(invoker, p).run("task-1", scope()).await.unwrap();
        assert_eq!(run.status, ConvergenceStatus::ThresholdMet);
    }

    #[tokio::test]
    async fn test_hard_cap_bounds_misconfigured_soft_cap() {
        let mut p = params();
        p.max_iterations = 50;
        p.stagnation_window = 100; // Effectively disabled

        // Scores climb forever but never reach the threshold
        let mut responses = Vec::new();
        for i in 0..20 {
            responses.push(format!("p{}", i));
            responses.push(verdict((i * 4) as u8).to_string());
        }
        let invoker = Arc::new(MockInvoker::with_results(responses.into_iter().map(Ok).collect()));
        let run = engine(invoker, p).run("task-1", scope()).await.unwrap();

        assert_eq!(run.status, ConvergenceStatus::MaxIterationsReached);
        assert_eq!(run.iteration, 10);
    }

    #[tokio::test]
    async fn test_primary_failure_fails_loop() {
        let invoker = Arc::new(MockInvoker::with_results(vec![Err(LlmError::Unavailable(
            "backend down".to_string(),
        ))]));
        let run = engine(invoker, params()).run("task-1", scope()).await.unwrap();

        assert_eq!(run.status, ConvergenceStatus::Failed);
        assert!(run.error.as_deref().unwrap().contains("backend down"));
        assert_eq!(run.iteration, 0);
    }

    #[tokio::test]
    async fn test_challenger_failure_scores_zero_and_continues() {
        let invoker = Arc::new(MockInvoker::with_results(vec![
            Ok("p1".to_string()),
            Err(LlmError::Timeout(Duration::from_secs(120))),
            Ok("p2".to_string()),
            Ok(verdict(70)),
        ]));
        let run = engine(invoker, params()).run("task-1", scope()).await.unwrap();

        assert_eq!(run.status, ConvergenceStatus::ThresholdMet);
        assert_eq!(run.history, vec![0, 70]);
    }

    #[tokio::test]
    async fn test_cancellation_propagates() {
        let invoker = Arc::new(MockInvoker::new(vec!["unused"]));
        let options = EngineOptions::default();
        options.cancel.cancel();

        let engine = ChallengerEngine::new(invoker, params(), "reviewer", "challenger", prompts()).with_options(options);
        let err = engine.run("task-1", scope()).await.unwrap_err();
        assert!(err.is_canceled());
    }

    #[tokio::test]
    async fn test_unparseable_verdict_scores_zero() {
        let invoker = Arc::new(MockInvoker::new(vec![
            "p1",
            "{\"satisfaction_score\": \"not a number\"}",
            "p2",
            &verdict(90),
        ]));
        let run = engine(invoker, params()).run("task-1", scope()).await.unwrap();
        assert_eq!(run.history, vec![0, 90]);
        assert_eq!(run.status, ConvergenceStatus::ThresholdMet);
    }

    #[test]
    fn test_render_substitution() {
        let mut vars = HashMap::new();
        vars.insert("name", "world".to_string());
        assert_eq!(render("hello {{name}}", &vars), "hello world");
        // Unknown placeholders pass through
        assert_eq!(render("hello {{other}}", &vars), "hello {{other}}");
    }
}
