//! Pipeline runs, stage reports and the run state machine.
//!
//! A [`PipelineRun`] moves through [`RunState`] in one direction only:
//!
//! ```text
//! pending -> building -> (failed | tested)
//! tested  -> publishing -> (failed | published)
//! ```
//!
//! `failed` and `published` are terminal. For CI runs `tested` is terminal too.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::error::{Result, ShipgateError};
use super::event::RepoEvent;

/// Name of the build-and-test stage.
pub const BUILD_AND_TEST_STAGE: &str = "build-and-test";

/// Name of the publish stage.
pub const PUBLISH_STAGE: &str = "publish";

/// Which pipeline a run belongs to.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum PipelineKind {
    /// Tag-triggered build, test and publish.
    Publish,

    /// Push / pull-request build and test.
    Ci,
}

impl PipelineKind {
    pub fn name(&self) -> &'static str {
        match self {
            PipelineKind::Publish => "publish",
            PipelineKind::Ci => "ci",
        }
    }
}

impl fmt::Display for PipelineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Lifecycle state of a run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RunState {
    Pending,
    Building,
    Tested,
    Publishing,
    Published,
    Failed,
}

impl RunState {
    pub fn name(&self) -> &'static str {
        match self {
            RunState::Pending => "pending",
            RunState::Building => "building",
            RunState::Tested => "tested",
            RunState::Publishing => "publishing",
            RunState::Published => "published",
            RunState::Failed => "failed",
        }
    }

    /// Whether `self -> next` is an edge of the state machine.
    pub fn can_transition_to(self, next: RunState) -> bool {
        matches!(
            (self, next),
            (RunState::Pending, RunState::Building)
                | (RunState::Building, RunState::Tested)
                | (RunState::Building, RunState::Failed)
                | (RunState::Tested, RunState::Publishing)
                | (RunState::Publishing, RunState::Published)
                | (RunState::Publishing, RunState::Failed)
        )
    }

    /// Whether no further transition is expected for a run of `kind`.
    pub fn is_terminal(self, kind: PipelineKind) -> bool {
        match self {
            RunState::Failed | RunState::Published => true,
            RunState::Tested => kind == PipelineKind::Ci,
            _ => false,
        }
    }
}

impl fmt::Display for RunState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Outcome of a single stage.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum StageOutcome {
    Pending,
    Running,
    Success,
    Failure,
}

impl fmt::Display for StageOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            StageOutcome::Pending => "pending",
            StageOutcome::Running => "running",
            StageOutcome::Success => "success",
            StageOutcome::Failure => "failure",
        };
        f.write_str(s)
    }
}

/// Result of one step execution.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepResult {
    /// Step name.
    pub step_name: String,

    /// Exit code (0 = success, -1 = the step could not be executed).
    pub exit_code: i32,

    /// Captured stdout.
    pub stdout: String,

    /// Captured stderr.
    pub stderr: String,

    /// Duration in milliseconds.
    pub duration_ms: u64,

    /// Whether execution succeeded.
    pub success: bool,
}

impl StepResult {
    /// A step that finished without running a process.
    pub fn passed_with(step_name: &str, stdout: String, duration_ms: u64) -> Self {
        Self {
            step_name: step_name.to_string(),
            exit_code: 0,
            stdout,
            stderr: String::new(),
            duration_ms,
            success: true,
        }
    }

    /// A step that failed before or without a process exit status.
    pub fn failed_with(step_name: &str, stderr: String, duration_ms: u64) -> Self {
        Self {
            step_name: step_name.to_string(),
            exit_code: -1,
            stdout: String::new(),
            stderr,
            duration_ms,
            success: false,
        }
    }

    /// Whether this step passed (exit code 0).
    pub fn passed(&self) -> bool {
        self.success && self.exit_code == 0
    }

    /// Diagnostic output surfaced to the user when this step fails.
    pub fn diagnostics(&self) -> String {
        match (self.stdout.trim().is_empty(), self.stderr.trim().is_empty()) {
            (true, true) => format!("step '{}' exited with code {}", self.step_name, self.exit_code),
            (true, false) => self.stderr.clone(),
            (false, true) => self.stdout.clone(),
            (false, false) => format!("{}\n{}", self.stdout, self.stderr),
        }
    }
}

/// Report of one stage within a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct StageReport {
    /// Stage name.
    pub name: String,

    /// Stage that must have succeeded before this one may run.
    pub depends_on: Option<String>,

    /// Current outcome.
    pub outcome: StageOutcome,

    /// Executed steps, in order.
    pub steps: Vec<StepResult>,

    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl StageReport {
    pub fn new(name: &str, depends_on: Option<&str>) -> Self {
        Self {
            name: name.to_string(),
            depends_on: depends_on.map(str::to_string),
            outcome: StageOutcome::Pending,
            steps: Vec::new(),
            started_at: None,
            finished_at: None,
        }
    }

    /// First failing step, if any.
    pub fn failed_step(&self) -> Option<&StepResult> {
        self.steps.iter().find(|s| !s.passed())
    }

    /// Look up a step by name.
    pub fn step(&self, name: &str) -> Option<&StepResult> {
        self.steps.iter().find(|s| s.step_name == name)
    }

    pub fn duration_ms(&self) -> u64 {
        self.steps.iter().map(|s| s.duration_ms).sum()
    }
}

/// Why a registry refused a publish.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    /// The version is already present in the registry.
    DuplicateVersion,

    /// The registry refused the package for another reason.
    Rejected,

    /// The registry could not be reached.
    NetworkError,
}

impl fmt::Display for RejectionReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RejectionReason::DuplicateVersion => "duplicate_version",
            RejectionReason::Rejected => "rejected",
            RejectionReason::NetworkError => "network_error",
        };
        f.write_str(s)
    }
}

/// Classification of a run failure.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum FailureKind {
    /// A build, test, login or publish step failed.
    StepFailure,

    /// Build-and-test did not succeed, so publish was never scheduled.
    GateDenied,

    /// The registry refused the publish.
    RegistryRejection { reason: RejectionReason },
}

/// Terminal failure detail of a run.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RunFailure {
    pub kind: FailureKind,

    /// Stage in which the failure happened.
    pub stage: Option<String>,

    /// Step that failed.
    pub step: Option<String>,

    /// Captured diagnostic output of the failing step.
    pub detail: String,
}

impl RunFailure {
    /// Failure of `step` inside `stage`.
    pub fn step(stage: &str, step: &StepResult) -> Self {
        Self {
            kind: FailureKind::StepFailure,
            stage: Some(stage.to_string()),
            step: Some(step.step_name.clone()),
            detail: step.diagnostics(),
        }
    }

    /// Registry refusal surfaced from `step`.
    pub fn registry(stage: &str, step: &StepResult, reason: RejectionReason) -> Self {
        Self {
            kind: FailureKind::RegistryRejection { reason },
            stage: Some(stage.to_string()),
            step: Some(step.step_name.clone()),
            detail: step.diagnostics(),
        }
    }

    /// Gate refusal caused by a failed upstream step; keeps that step's output.
    pub fn gate_denied_by(stage: &str, step: &StepResult) -> Self {
        Self {
            kind: FailureKind::GateDenied,
            stage: Some(stage.to_string()),
            step: Some(step.step_name.clone()),
            detail: step.diagnostics(),
        }
    }

    pub fn gate_denied(reason: &str) -> Self {
        Self {
            kind: FailureKind::GateDenied,
            stage: None,
            step: None,
            detail: reason.to_string(),
        }
    }
}

/// One recorded state change.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transition {
    pub from: RunState,
    pub to: RunState,
    pub at: DateTime<Utc>,
}

/// Record of the release gate decision.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct GateRecord {
    pub open: bool,
    pub reason: Option<String>,
    pub at: DateTime<Utc>,
}

/// A single execution of a pipeline triggered by one event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PipelineRun {
    /// Unique identifier for this run.
    pub id: Uuid,

    /// Pipeline this run executes.
    pub pipeline: PipelineKind,

    /// Event that triggered the run.
    pub trigger: RepoEvent,

    /// Current state.
    pub state: RunState,

    /// Stage reports in scheduling order.
    pub stages: Vec<StageReport>,

    /// Every state change, oldest first.
    pub transitions: Vec<Transition>,

    /// Release gate decision (publish runs only).
    pub gate: Option<GateRecord>,

    /// Set when the run ends in `failed`.
    pub failure: Option<RunFailure>,

    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl PipelineRun {
    /// Create a new run in `pending`.
    pub fn new(pipeline: PipelineKind, trigger: RepoEvent) -> Self {
        Self {
            id: Uuid::new_v4(),
            pipeline,
            trigger,
            state: RunState::Pending,
            stages: Vec::new(),
            transitions: Vec::new(),
            gate: None,
            failure: None,
            started_at: Utc::now(),
            finished_at: None,
        }
    }

    /// Move to `next`, rejecting edges the state machine does not have.
    pub fn transition(&mut self, next: RunState) -> Result<()> {
        if self.state.is_terminal(self.pipeline) || !self.state.can_transition_to(next) {
            return Err(ShipgateError::InvalidTransition {
                from: self.state,
                to: next,
            });
        }
        let now = Utc::now();
        self.transitions.push(Transition {
            from: self.state,
            to: next,
            at: now,
        });
        self.state = next;
        if next.is_terminal(self.pipeline) {
            self.finished_at = Some(now);
        }
        Ok(())
    }

    /// Move to `failed` and record why.
    pub fn fail(&mut self, failure: RunFailure) -> Result<()> {
        self.transition(RunState::Failed)?;
        self.failure = Some(failure);
        Ok(())
    }

    /// Mark `name` as running.
    ///
    /// A stage with a dependency only starts once that dependency succeeded.
    pub fn start_stage(&mut self, name: &str, depends_on: Option<&str>) -> Result<()> {
        if self.stage(name).is_some() {
            return Err(ShipgateError::StageAlreadyStarted(name.to_string()));
        }
        if let Some(dependency) = depends_on {
            let outcome = self
                .stage(dependency)
                .map(|s| s.outcome)
                .unwrap_or(StageOutcome::Pending);
            if outcome != StageOutcome::Success {
                return Err(ShipgateError::DependencyNotSatisfied {
                    stage: name.to_string(),
                    dependency: dependency.to_string(),
                    outcome,
                });
            }
        }
        let mut report = StageReport::new(name, depends_on);
        report.outcome = StageOutcome::Running;
        report.started_at = Some(Utc::now());
        self.stages.push(report);
        Ok(())
    }

    /// Record the steps and final outcome of a running stage.
    pub fn finish_stage(
        &mut self,
        name: &str,
        steps: Vec<StepResult>,
        outcome: StageOutcome,
    ) -> Result<&StageReport> {
        let report = self
            .stages
            .iter_mut()
            .find(|s| s.name == name && s.outcome == StageOutcome::Running)
            .ok_or_else(|| ShipgateError::UnknownStage(name.to_string()))?;
        report.steps = steps;
        report.outcome = outcome;
        report.finished_at = Some(Utc::now());
        Ok(report)
    }

    /// Look up a stage report by name.
    pub fn stage(&self, name: &str) -> Option<&StageReport> {
        self.stages.iter().find(|s| s.name == name)
    }

    /// Whether the run reached a terminal state.
    pub fn is_finished(&self) -> bool {
        self.state.is_terminal(self.pipeline)
    }

    /// Whether the run reached its pipeline's success state.
    pub fn succeeded(&self) -> bool {
        match self.pipeline {
            PipelineKind::Publish => self.state == RunState::Published,
            PipelineKind::Ci => self.state == RunState::Tested,
        }
    }

    pub fn duration_ms(&self) -> u64 {
        let end = self.finished_at.unwrap_or_else(Utc::now);
        (end - self.started_at).num_milliseconds().max(0) as u64
    }
}
