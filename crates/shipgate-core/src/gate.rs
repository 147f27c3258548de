//! Release gate: the precondition that restricts publishing to runs whose
//! build-and-test stage succeeded.
//!
//! The gate is evaluated once per run. An open gate yields an
//! [`UpstreamSuccess`] token, the only way to obtain one, which the publish
//! stage takes as an argument. The publish stage therefore never looks at
//! build-and-test state itself; the decision is handed to it as data.

use chrono::Utc;
use uuid::Uuid;

use crate::domain::error::{Result, ShipgateError};
use crate::domain::run::{GateRecord, PipelineRun, StageOutcome, BUILD_AND_TEST_STAGE};

/// Proof that build-and-test succeeded for a given run and revision.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UpstreamSuccess {
    run_id: Uuid,
    revision: String,
}

impl UpstreamSuccess {
    pub fn run_id(&self) -> Uuid {
        self.run_id
    }

    /// Revision build-and-test validated; publish must check out the same one.
    pub fn revision(&self) -> &str {
        &self.revision
    }
}

/// Result of evaluating the release gate.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GateDecision {
    /// Publish may be scheduled.
    Open(UpstreamSuccess),

    /// Publish must not be instantiated.
    Denied { reason: String },
}

impl GateDecision {
    pub fn is_open(&self) -> bool {
        matches!(self, GateDecision::Open(_))
    }
}

/// Release gate evaluation rules.
pub struct ReleaseGate;

impl ReleaseGate {
    /// `canRunPublish(run) = run.stages["build-and-test"].outcome == success`
    pub fn can_run_publish(run: &PipelineRun) -> bool {
        run.stage(BUILD_AND_TEST_STAGE)
            .is_some_and(|s| s.outcome == StageOutcome::Success)
    }

    /// Evaluate the gate for `run` and record the decision on it.
    ///
    /// Returns `GateAlreadyEvaluated` on a second call for the same run.
    pub fn evaluate(run: &mut PipelineRun) -> Result<GateDecision> {
        if run.gate.is_some() {
            return Err(ShipgateError::GateAlreadyEvaluated(run.id));
        }

        let decision = if Self::can_run_publish(run) {
            GateDecision::Open(UpstreamSuccess {
                run_id: run.id,
                revision: run.trigger.revision.clone(),
            })
        } else {
            let outcome = run
                .stage(BUILD_AND_TEST_STAGE)
                .map(|s| s.outcome)
                .unwrap_or(StageOutcome::Pending);
            GateDecision::Denied {
                reason: format!("{BUILD_AND_TEST_STAGE} outcome is {outcome}"),
            }
        };

        run.gate = Some(GateRecord {
            open: decision.is_open(),
            reason: match &decision {
                GateDecision::Denied { reason } => Some(reason.clone()),
                GateDecision::Open(_) => None,
            },
            at: Utc::now(),
        });

        Ok(decision)
    }
}
