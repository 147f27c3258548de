//! Shipgate Core Library
//!
//! Domain model and orchestration rules shared by the Shipgate crates:
//! - Repository events and trigger routing
//! - Pipeline runs, stage reports and the run state machine
//! - The release gate between build-and-test and publish
//! - Git checkouts, tracing setup, lifecycle logging and counters

pub mod domain;
pub mod gate;
pub mod git;
pub mod metrics;
pub mod obs;
pub mod reporting;
pub mod telemetry;
pub mod trigger;

pub use domain::{
    EventType, FailureKind, GateRecord, PipelineKind, PipelineRun, RejectionReason, RepoEvent,
    Result, RunFailure, RunState, ShipgateError, StageOutcome, StageReport, StepResult,
    Transition, BUILD_AND_TEST_STAGE, PUBLISH_STAGE,
};

pub use gate::{GateDecision, ReleaseGate, UpstreamSuccess};
pub use git::{capture_head_sha, checkout_revision, is_git_repo, resolve_revision};
pub use metrics::METRICS;
pub use obs::{
    emit_cache_warning, emit_gate_evaluated, emit_run_finished, emit_run_started,
    emit_stage_finished, emit_transition, RunSpan,
};
pub use reporting::{render_run_summary, write_run_report};
pub use telemetry::init_tracing;
pub use trigger::{
    PlannedRun, TriggerListener, TriggerRules, DEFAULT_IGNORE_PATHS, DEFAULT_MAIN_BRANCH,
    DEFAULT_TAG_PATTERN,
};

/// Shipgate version
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
