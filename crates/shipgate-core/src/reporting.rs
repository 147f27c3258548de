//! Run report artifacts: JSON for machines, plain text for terminals.

use std::fmt::Write as _;
use std::path::Path;

use anyhow::{Context, Result};
use serde::Serialize;

use crate::domain::run::{FailureKind, PipelineRun, StageOutcome};

/// JSON report written by `shipgate dispatch --report`.
#[derive(Debug, Serialize)]
pub struct RunReportArtifact<'a> {
    pub success: bool,
    pub runs: &'a [PipelineRun],
}

/// Write `runs` as pretty JSON to `path`.
pub fn write_run_report(path: &Path, runs: &[PipelineRun]) -> Result<()> {
    let artifact = RunReportArtifact {
        success: runs.iter().all(|r| r.succeeded()),
        runs,
    };
    let content = serde_json::to_string_pretty(&artifact).context("serialize run report")?;
    std::fs::write(path, content).with_context(|| format!("write {:?}", path))?;
    Ok(())
}

/// Render a human-readable summary of one run.
pub fn render_run_summary(run: &PipelineRun) -> String {
    let mut out = String::new();
    let status = if run.succeeded() { "✓" } else { "✗" };
    let _ = writeln!(
        out,
        "{} {} pipeline for {} @ {} -> {} ({}ms)",
        status,
        run.pipeline,
        run.trigger.ref_name,
        run.trigger.short_revision(),
        run.state,
        run.duration_ms()
    );

    for stage in &run.stages {
        let mark = match stage.outcome {
            StageOutcome::Success => "✓",
            StageOutcome::Failure => "✗",
            _ => "…",
        };
        let _ = writeln!(out, "  {} {} ({})", mark, stage.name, stage.outcome);
        for step in &stage.steps {
            let mark = if step.passed() { "✓" } else { "✗" };
            let _ = writeln!(
                out,
                "      {} {} ({}ms, exit code: {})",
                mark, step.step_name, step.duration_ms, step.exit_code
            );
        }
    }

    if let Some(failure) = &run.failure {
        let kind = match failure.kind {
            FailureKind::StepFailure => "step failure".to_string(),
            FailureKind::GateDenied => "release gate denied".to_string(),
            FailureKind::RegistryRejection { reason } => format!("registry rejection ({reason})"),
        };
        let _ = writeln!(out, "  failure: {kind}");
        for line in failure.detail.lines() {
            let _ = writeln!(out, "    | {line}");
        }
    }

    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::domain::event::RepoEvent;
    use crate::domain::run::{PipelineKind, RunFailure, RunState, StepResult};

    fn failed_run() -> PipelineRun {
        let mut run = PipelineRun::new(
            PipelineKind::Publish,
            RepoEvent::tag_push("v1.2.3", "abc123"),
        );
        run.transition(RunState::Building).unwrap();
        run.start_stage("build-and-test", None).unwrap();
        let step = StepResult::failed_with("test", "assertion failed\nleft != right".into(), 5);
        run.finish_stage("build-and-test", vec![step.clone()], StageOutcome::Failure)
            .unwrap();
        run.fail(RunFailure::step("build-and-test", &step)).unwrap();
        run
    }

    #[test]
    fn test_summary_includes_failure_detail() {
        let summary = render_run_summary(&failed_run());
        assert!(summary.contains("publish pipeline for refs/tags/v1.2.3"));
        assert!(summary.contains("-> failed"));
        assert!(summary.contains("step failure"));
        assert!(summary.contains("| left != right"));
    }

    #[test]
    fn test_write_run_report() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("report.json");
        write_run_report(&path, &[failed_run()]).unwrap();

        let value: serde_json::Value =
            serde_json::from_str(&std::fs::read_to_string(&path).unwrap()).unwrap();
        assert_eq!(value["success"], false);
        assert_eq!(value["runs"][0]["state"], "failed");
        assert_eq!(value["runs"][0]["failure"]["kind"]["type"], "step_failure");
    }
}
