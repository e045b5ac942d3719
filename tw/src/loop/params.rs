//! Loop parameters per loop kind

use crate::config::Config;

/// Convergence knobs for one challenger loop
#[derive(Debug, Clone)]
pub struct LoopParams {
    /// Exit bar: satisfaction at or above this ends the loop
    pub satisfaction_threshold: u8,

    /// Soft iteration cap
    pub max_iterations: u32,

    /// Hard safety cap, never exceeded regardless of configuration
    pub absolute_max_iterations: u32,

    /// Minimum score movement (percentage points) over the window
    pub min_improvement_threshold: u8,

    /// Number of trailing scores compared by the stagnation test
    pub stagnation_window: usize,

    /// Accept at the soft cap when the score is at least this
    pub forced_acceptance_threshold: u8,
}

impl LoopParams {
    /// Parameters for review loops
    pub fn review(config: &Config) -> Self {
        Self {
            satisfaction_threshold: config.challenger.satisfaction_threshold,
            max_iterations: config.challenger.max_iterations,
            absolute_max_iterations: config.challenger.absolute_max_iterations,
            min_improvement_threshold: config.challenger.min_improvement_threshold,
            stagnation_window: config.challenger.stagnation_window,
            forced_acceptance_threshold: config.challenger.forced_acceptance_threshold,
        }
    }

    /// Parameters for fix loops: higher bar, fewer iterations, same hard cap
    pub fn fix(config: &Config) -> Self {
        Self {
            satisfaction_threshold: config.fix_challenger.satisfaction_threshold,
            max_iterations: config.fix_challenger.max_iterations,
            ..Self::review(config)
        }
    }
}

impl Default for LoopParams {
    fn default() -> Self {
        Self::review(&Config::default())
    }
}
