//! Pipeline orchestration: drives each run through the state machine.

use std::path::PathBuf;
use std::sync::Arc;

use futures::future::join_all;
use shipgate_cache::{DependencyCache, FsCacheStore};
use shipgate_core::{
    emit_gate_evaluated, emit_run_finished, emit_run_started, emit_stage_finished,
    emit_transition, GateDecision, PipelineKind, PipelineRun, PlannedRun, ReleaseGate, RepoEvent,
    RunFailure, RunSpan, RunState, StepResult, TriggerListener, BUILD_AND_TEST_STAGE,
    METRICS, PUBLISH_STAGE,
};
use tracing::{info, Instrument};

use crate::build::BuildAndTestStage;
use crate::config::PipelineConfig;
use crate::publish::{CacheSettings, PublishStage, PUBLISH_STEP};
use crate::registry::{CargoRegistry, Registry};
use crate::secret::SecretStore;
use crate::stage::StageExecution;

/// Collaborators shared by every pipeline.
#[derive(Clone)]
pub struct PipelineDeps {
    pub config: PipelineConfig,
    pub secrets: SecretStore,
    pub registry: Arc<dyn Registry>,
    pub cache: Option<DependencyCache>,
    /// Base for `~/` cache paths.
    pub home: Option<PathBuf>,
}

impl PipelineDeps {
    /// Production wiring: credential from the environment, the registry API
    /// for login and `cargo` for publishing, filesystem cache under
    /// `config.cache.dir`.
    pub fn from_config(config: PipelineConfig) -> anyhow::Result<Self> {
        let secrets = SecretStore::from_env(&config.registry.token_env);
        let registry: Arc<dyn Registry> = Arc::new(
            CargoRegistry::new(
                config.registry.registry_name.clone(),
                config.registry.api_url.clone(),
            )?
            .with_timeout(config.step_timeout_secs),
        );
        let cache = if config.cache.enabled {
            let store = FsCacheStore::new(&config.cache.dir)?;
            Some(DependencyCache::new(Arc::new(store)))
        } else {
            None
        };
        let home = std::env::var_os("HOME").map(PathBuf::from);
        Ok(Self {
            config,
            secrets,
            registry,
            cache,
            home,
        })
    }

    fn build_stage(&self) -> BuildAndTestStage {
        BuildAndTestStage::new(
            &self.config.repository,
            self.config.build_step(),
            self.config.test_step(),
            self.secrets.clone(),
        )
    }

    fn publish_stage(&self) -> PublishStage {
        let token_env = &self.config.registry.token_env;
        let cache = self.cache.clone().map(|cache| CacheSettings {
            cache,
            prefix: self.config.cache.prefix.clone(),
            lock_file: self.config.cache.lock_file.clone(),
            paths: self.config.cache.paths.clone(),
            home: self.home.clone(),
        });
        PublishStage::new(
            &self.config.repository,
            self.registry.clone(),
            token_env,
            self.secrets.get(token_env).cloned(),
            cache,
        )
    }
}

fn transition(run: &mut PipelineRun, next: RunState) -> anyhow::Result<()> {
    let from = run.state;
    run.transition(next)?;
    emit_transition(&run.id.to_string(), from, next);
    Ok(())
}

fn fail(run: &mut PipelineRun, failure: RunFailure) -> anyhow::Result<()> {
    let from = run.state;
    run.fail(failure)?;
    emit_transition(&run.id.to_string(), from, RunState::Failed);
    Ok(())
}

fn start(planned: &PlannedRun, expected: PipelineKind) -> anyhow::Result<PipelineRun> {
    anyhow::ensure!(
        planned.pipeline == expected,
        "cannot run a {} plan as a {} pipeline",
        planned.pipeline,
        expected
    );
    let run = planned.clone().into_run();
    METRICS.inc_runs_started();
    emit_run_started(
        &run.id.to_string(),
        run.pipeline,
        &run.trigger.ref_name,
        &run.trigger.revision,
    );
    Ok(run)
}

fn finish(run: &PipelineRun) {
    let success = run.succeeded();
    METRICS.inc_run_finished(success);
    emit_run_finished(&run.id.to_string(), run.state, run.duration_ms(), success);
}

/// `pending → building`, then the build-and-test stage, recorded on `run`.
async fn build_and_test(
    run: &mut PipelineRun,
    stage: &BuildAndTestStage,
) -> anyhow::Result<StageExecution> {
    transition(run, RunState::Building)?;
    run.start_stage(BUILD_AND_TEST_STAGE, None)?;

    let run_id = run.id.to_string();
    let revision = run.trigger.revision.clone();
    let exec = stage.run(&revision).await?;

    let report = run.finish_stage(BUILD_AND_TEST_STAGE, exec.steps().to_vec(), exec.outcome())?;
    emit_stage_finished(
        &run_id,
        &report.name,
        report.outcome,
        report.duration_ms(),
    );
    Ok(exec)
}

fn stage_failure(exec: &StageExecution) -> StepResult {
    exec.failed_step()
        .cloned()
        .unwrap_or_else(|| StepResult::failed_with(BUILD_AND_TEST_STAGE, "stage ran no steps".into(), 0))
}

/// Build-and-test only; terminal at `tested` or `failed`.
#[derive(Clone)]
pub struct CiPipeline {
    build: BuildAndTestStage,
}

impl CiPipeline {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            build: deps.build_stage(),
        }
    }

    pub async fn run(&self, planned: &PlannedRun) -> anyhow::Result<PipelineRun> {
        let mut run = start(planned, PipelineKind::Ci)?;
        let span = RunSpan::span(&run.id.to_string(), run.pipeline);

        async {
            let exec = build_and_test(&mut run, &self.build).await?;
            if exec.can_continue() {
                transition(&mut run, RunState::Tested)?;
            } else {
                let step = stage_failure(&exec);
                fail(&mut run, RunFailure::step(BUILD_AND_TEST_STAGE, &step))?;
            }
            finish(&run);
            anyhow::Ok(())
        }
        .instrument(span)
        .await?;

        Ok(run)
    }
}

/// Build-and-test, release gate, publish.
#[derive(Clone)]
pub struct PublishPipeline {
    build: BuildAndTestStage,
    publish: PublishStage,
}

impl PublishPipeline {
    pub fn new(deps: &PipelineDeps) -> Self {
        Self {
            build: deps.build_stage(),
            publish: deps.publish_stage(),
        }
    }

    pub async fn run(&self, planned: &PlannedRun) -> anyhow::Result<PipelineRun> {
        let mut run = start(planned, PipelineKind::Publish)?;
        let run_id = run.id.to_string();
        let span = RunSpan::span(&run_id, run.pipeline);

        async {
            let build = build_and_test(&mut run, &self.build).await?;

            match ReleaseGate::evaluate(&mut run)? {
                GateDecision::Denied { reason } => {
                    emit_gate_evaluated(&run_id, false, Some(&reason));
                    METRICS.inc_gate_denied();
                    let failure = match build.failed_step() {
                        Some(step) => RunFailure::gate_denied_by(BUILD_AND_TEST_STAGE, step),
                        None => RunFailure::gate_denied(&reason),
                    };
                    fail(&mut run, failure)?;
                }
                GateDecision::Open(upstream) => {
                    emit_gate_evaluated(&run_id, true, None);
                    transition(&mut run, RunState::Tested)?;
                    transition(&mut run, RunState::Publishing)?;
                    run.start_stage(PUBLISH_STAGE, Some(BUILD_AND_TEST_STAGE))?;

                    let exec = self.publish.run(&upstream, &run_id).await?;
                    let report = run.finish_stage(
                        PUBLISH_STAGE,
                        exec.stage.steps().to_vec(),
                        exec.stage.outcome(),
                    )?;
                    emit_stage_finished(&run_id, &report.name, report.outcome, report.duration_ms());

                    match exec.stage.failed_step() {
                        None => transition(&mut run, RunState::Published)?,
                        Some(step) => {
                            let failure = match exec.rejection {
                                Some(reason) if step.step_name == PUBLISH_STEP => {
                                    RunFailure::registry(PUBLISH_STAGE, step, reason)
                                }
                                _ => RunFailure::step(PUBLISH_STAGE, step),
                            };
                            fail(&mut run, failure)?;
                        }
                    }
                }
            }

            finish(&run);
            anyhow::Ok(())
        }
        .instrument(span)
        .await?;

        Ok(run)
    }
}

/// Routes events and runs every matched pipeline.
#[derive(Clone)]
pub struct Dispatcher {
    listener: TriggerListener,
    ci: CiPipeline,
    publish: PublishPipeline,
}

impl Dispatcher {
    pub fn new(deps: &PipelineDeps) -> anyhow::Result<Self> {
        Ok(Self {
            listener: TriggerListener::new(deps.config.trigger_rules()?),
            ci: CiPipeline::new(deps),
            publish: PublishPipeline::new(deps),
        })
    }

    pub fn route(&self, event: &RepoEvent) -> Vec<PlannedRun> {
        self.listener.route(event)
    }

    pub async fn run_planned(&self, planned: &PlannedRun) -> anyhow::Result<PipelineRun> {
        match planned.pipeline {
            PipelineKind::Publish => self.publish.run(planned).await,
            PipelineKind::Ci => self.ci.run(planned).await,
        }
    }

    /// Route `event` and run every matched pipeline concurrently.
    pub async fn dispatch(&self, event: &RepoEvent) -> anyhow::Result<Vec<PipelineRun>> {
        let planned = self.route(event);
        if planned.is_empty() {
            info!(ref_name = %event.ref_name, "No pipeline triggered");
            return Ok(Vec::new());
        }

        let results = join_all(planned.iter().map(|p| self.run_planned(p))).await;
        results.into_iter().collect()
    }
}
