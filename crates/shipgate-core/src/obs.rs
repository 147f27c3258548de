//! Structured observability hooks for the pipeline run lifecycle.
//!
//! - [`RunSpan`] tags every log line of a run with its id and pipeline.
//! - `emit_*` functions log the key lifecycle events with a stable
//!   `event = "..."` field so JSON output can be filtered downstream.
//!
//! Nothing here ever receives secret material.

use tracing::{info, warn};

use crate::domain::run::{PipelineKind, RunState, StageOutcome};

/// Run-scoped tracing span.
///
/// ```ignore
/// async { /* every event logged here carries run_id and pipeline */ }
///     .instrument(RunSpan::span(&run.id.to_string(), run.pipeline))
///     .await
/// ```
pub struct RunSpan;

impl RunSpan {
    /// The span for one run, for instrumenting futures that cross await points.
    pub fn span(run_id: &str, pipeline: PipelineKind) -> tracing::Span {
        tracing::info_span!("shipgate.run", run_id = %run_id, pipeline = %pipeline)
    }
}

pub fn emit_run_started(run_id: &str, pipeline: PipelineKind, ref_name: &str, revision: &str) {
    info!(
        event = "run.started",
        run_id = %run_id,
        pipeline = %pipeline,
        ref_name = %ref_name,
        revision = %revision,
    );
}

pub fn emit_transition(run_id: &str, from: RunState, to: RunState) {
    info!(event = "run.transition", run_id = %run_id, from = %from, to = %to);
}

pub fn emit_stage_finished(run_id: &str, stage: &str, outcome: StageOutcome, duration_ms: u64) {
    info!(
        event = "stage.finished",
        run_id = %run_id,
        stage = %stage,
        outcome = %outcome,
        duration_ms = duration_ms,
    );
}

pub fn emit_gate_evaluated(run_id: &str, open: bool, reason: Option<&str>) {
    info!(
        event = "gate.evaluated",
        run_id = %run_id,
        open = open,
        reason = reason.unwrap_or(""),
    );
}

/// Emit event: run reached a terminal state.
pub fn emit_run_finished(run_id: &str, state: RunState, duration_ms: u64, success: bool) {
    info!(
        event = "run.finished",
        run_id = %run_id,
        state = %state,
        duration_ms = duration_ms,
        success = success,
    );
}

/// Emit event: a non-fatal cache problem (warning level).
pub fn emit_cache_warning(run_id: &str, key: &str, error: &dyn std::fmt::Display) {
    warn!(event = "cache.warning", run_id = %run_id, key = %key, error = %error);
}
