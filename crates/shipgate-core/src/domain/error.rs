//! Domain-level error taxonomy for Shipgate.
//!
//! Pipeline failures (a failing build, a denied gate, a registry rejection)
//! are recorded on the run as [`RunFailure`](super::run::RunFailure) data.
//! The variants here cover misuse of the model and infrastructure faults.

use super::run::{RunState, StageOutcome};

/// Shipgate domain errors.
#[derive(Debug, thiserror::Error)]
pub enum ShipgateError {
    #[error("invalid run transition: {from} -> {to}")]
    InvalidTransition { from: RunState, to: RunState },

    #[error("stage '{stage}' cannot start: dependency '{dependency}' is {outcome}")]
    DependencyNotSatisfied {
        stage: String,
        dependency: String,
        outcome: StageOutcome,
    },

    #[error("stage '{0}' was never started")]
    UnknownStage(String),

    #[error("stage '{0}' was already started")]
    StageAlreadyStarted(String),

    #[error("release gate already evaluated for run {0}")]
    GateAlreadyEvaluated(uuid::Uuid),

    #[error("invalid trigger rule: {0}")]
    InvalidTriggerRule(String),

    #[error("git error: {0}")]
    GitError(String),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

/// Result type for Shipgate domain operations.
pub type Result<T> = std::result::Result<T, ShipgateError>;
