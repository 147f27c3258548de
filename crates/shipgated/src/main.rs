//! Shipgate daemon
//!
//! Reads newline-delimited `RepoEvent` JSON from stdin, routes each event and
//! runs the matched pipelines concurrently. Exits once stdin closes and every
//! run has finished; the exit status is non-zero if any run failed.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use shipgate_ci::{Dispatcher, PipelineConfig, PipelineDeps};
use shipgate_core::{PipelineRun, RepoEvent, METRICS};
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::task::JoinSet;
use tracing::{error, info, warn, Level};

#[derive(Parser)]
#[command(name = "shipgated")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Run pipelines for repository events read from stdin", long_about = None)]
struct Args {
    /// Enable verbose output
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long)]
    json: bool,

    /// Pipeline configuration file (JSON)
    #[arg(long, env = "SHIPGATE_CONFIG")]
    config: Option<PathBuf>,
}

/// What happened while serving one event stream.
#[derive(Debug, Default)]
struct DaemonSummary {
    events: usize,
    malformed: usize,
    runs: Vec<PipelineRun>,
    errors: usize,
}

impl DaemonSummary {
    fn failed(&self) -> usize {
        self.errors + self.runs.iter().filter(|r| !r.succeeded()).count()
    }
}

/// Serve events from `reader` until EOF, then wait for every spawned run.
async fn serve<R>(reader: R, dispatcher: Arc<Dispatcher>) -> Result<DaemonSummary>
where
    R: AsyncBufRead + Unpin,
{
    let mut summary = DaemonSummary::default();
    let mut tasks = JoinSet::new();
    let mut lines = reader.lines();

    while let Some(line) = lines.next_line().await.context("read event stream")? {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let event: RepoEvent = match serde_json::from_str(line) {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "Skipping malformed event");
                summary.malformed += 1;
                continue;
            }
        };
        summary.events += 1;

        let planned = dispatcher.route(&event);
        if planned.is_empty() {
            info!(ref_name = %event.ref_name, "No pipeline triggered");
        }
        for plan in planned {
            let dispatcher = dispatcher.clone();
            tasks.spawn(async move { dispatcher.run_planned(&plan).await });
        }
    }

    while let Some(joined) = tasks.join_next().await {
        match joined {
            Ok(Ok(run)) => summary.runs.push(run),
            Ok(Err(e)) => {
                error!(error = %e, "Pipeline run aborted");
                summary.errors += 1;
            }
            Err(e) => {
                error!(error = %e, "Pipeline task panicked");
                summary.errors += 1;
            }
        }
    }

    Ok(summary)
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();
    let level = if args.verbose { Level::DEBUG } else { Level::INFO };
    shipgate_core::init_tracing(args.json, level);

    let config = PipelineConfig::load(args.config.as_deref()).context("Failed to load configuration")?;
    let deps = PipelineDeps::from_config(config)?;
    let dispatcher = Arc::new(Dispatcher::new(&deps)?);

    info!(version = shipgate_core::VERSION, "shipgated reading events from stdin");
    let summary = serve(BufReader::new(tokio::io::stdin()), dispatcher).await?;

    info!(
        events = summary.events,
        malformed = summary.malformed,
        runs = summary.runs.len(),
        failed = summary.failed(),
        "Event stream closed"
    );
    METRICS.flush();

    if summary.failed() > 0 {
        anyhow::bail!("{} pipeline runs failed", summary.failed());
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use shipgate_ci::MemoryRegistry;
    use shipgate_core::{FailureKind, RunState};

    fn dispatcher(repository: &str) -> Arc<Dispatcher> {
        let config = PipelineConfig {
            repository: repository.to_string(),
            ..PipelineConfig::default()
        };
        let deps = PipelineDeps {
            config,
            secrets: Default::default(),
            registry: Arc::new(MemoryRegistry::new("token")),
            cache: None,
            home: None,
        };
        Arc::new(Dispatcher::new(&deps).unwrap())
    }

    #[tokio::test]
    async fn test_skips_malformed_and_ignored_events() {
        let input = concat!(
            "not json\n",
            "\n",
            r#"{"event_type":"push","ref":"refs/heads/main","revision":"abc","changed_paths":["README.md"]}"#,
            "\n",
            r#"{"event_type":"push","ref":"refs/tags/release","revision":"abc","changed_paths":["README.md"]}"#,
            "\n",
        );
        let summary = serve(input.as_bytes(), dispatcher("/nonexistent/shipgate-repo"))
            .await
            .unwrap();

        assert_eq!(summary.events, 2);
        assert_eq!(summary.malformed, 1);
        assert!(summary.runs.is_empty());
        assert_eq!(summary.failed(), 0);
    }

    #[tokio::test]
    async fn test_failed_checkout_counts_as_failed_run() {
        let input = concat!(
            r#"{"event_type":"push","ref":"refs/heads/feature","revision":"abc","changed_paths":["src/lib.rs"]}"#,
            "\n",
        );
        let summary = serve(input.as_bytes(), dispatcher("/nonexistent/shipgate-repo"))
            .await
            .unwrap();

        assert_eq!(summary.runs.len(), 1);
        let run = &summary.runs[0];
        assert_eq!(run.state, RunState::Failed);
        assert_eq!(run.failure.as_ref().unwrap().kind, FailureKind::StepFailure);
        assert_eq!(summary.failed(), 1);
    }
}
