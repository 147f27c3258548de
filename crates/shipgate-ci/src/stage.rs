//! Sequential, fail-fast step recording for one stage.

use shipgate_core::{StageOutcome, StepResult};

use crate::runner::{ExecutionEnv, StepRunner};
use crate::step::StepConfig;

/// Steps executed so far in one stage.
///
/// Once a required step fails, [`StageExecution::can_continue`] turns false
/// and callers skip the remaining required steps.
#[derive(Debug, Clone, Default)]
pub struct StageExecution {
    steps: Vec<StepResult>,
    failed: bool,
}

impl StageExecution {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record a required step. Returns whether it passed.
    pub fn record(&mut self, step: StepResult) -> bool {
        let passed = step.passed();
        if !passed {
            tracing::warn!(step = %step.step_name, exit_code = step.exit_code, "step failed");
            self.failed = true;
        } else {
            tracing::info!(step = %step.step_name, duration_ms = step.duration_ms, "step passed");
        }
        self.steps.push(step);
        passed
    }

    /// Record a step whose result never fails the stage.
    pub fn record_advisory(&mut self, step: StepResult) {
        self.steps.push(step);
    }

    /// Run `config` in `env` and record it as a required step.
    pub async fn run(&mut self, config: &StepConfig, env: &ExecutionEnv) -> bool {
        tracing::info!(step = %config.name, "executing step");
        let result = StepRunner::run_step(config, env).await;
        self.record(result)
    }

    pub fn can_continue(&self) -> bool {
        !self.failed
    }

    /// First failing required step.
    pub fn failed_step(&self) -> Option<&StepResult> {
        if !self.failed {
            return None;
        }
        self.steps.iter().find(|s| !s.passed())
    }

    pub fn outcome(&self) -> StageOutcome {
        if self.failed || self.steps.is_empty() {
            StageOutcome::Failure
        } else {
            StageOutcome::Success
        }
    }

    pub fn steps(&self) -> &[StepResult] {
        &self.steps
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_empty_stage_is_not_success() {
        assert_eq!(StageExecution::new().outcome(), StageOutcome::Failure);
    }

    #[test]
    fn test_failure_stops_continuation() {
        let mut exec = StageExecution::new();
        assert!(exec.record(StepResult::passed_with("checkout", String::new(), 1)));
        assert!(exec.can_continue());
        assert!(!exec.record(StepResult::failed_with("build", "boom".into(), 1)));
        assert!(!exec.can_continue());
        assert_eq!(exec.outcome(), StageOutcome::Failure);
        assert_eq!(exec.failed_step().unwrap().step_name, "build");
    }

    #[test]
    fn test_advisory_step_does_not_fail_stage() {
        let mut exec = StageExecution::new();
        exec.record(StepResult::passed_with("publish", String::new(), 1));
        let mut warning = StepResult::passed_with("save-cache", String::new(), 1);
        warning.stderr = "store unavailable".into();
        exec.record_advisory(warning);
        assert_eq!(exec.outcome(), StageOutcome::Success);
        assert_eq!(exec.steps().len(), 2);
    }

    #[tokio::test]
    async fn test_run_records_process_result() {
        let env = ExecutionEnv::new(std::env::current_dir().unwrap());
        let mut exec = StageExecution::new();
        assert!(exec.run(&StepConfig::shell("ok", "exit 0"), &env).await);
        assert!(!exec.run(&StepConfig::shell("bad", "exit 3"), &env).await);
        assert_eq!(exec.failed_step().unwrap().exit_code, 3);
    }
}
