//! Domain models for Shipgate.
//!
//! Canonical definitions for the core entities:
//! - `RepoEvent`: A push or pull-request delivered by the source host
//! - `PipelineRun`: One execution of a pipeline, driven through `RunState`
//! - `StageReport` / `StepResult`: Per-stage and per-step outcomes

pub mod error;
pub mod event;
pub mod run;

// Re-export main types and errors
pub use error::{Result, ShipgateError};
pub use event::{EventType, RepoEvent};
pub use run::{
    FailureKind, GateRecord, PipelineKind, PipelineRun, RejectionReason, RunFailure, RunState,
    StageOutcome, StageReport, StepResult, Transition, BUILD_AND_TEST_STAGE, PUBLISH_STAGE,
};
