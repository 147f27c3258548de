//! Build-and-test stage: checkout, build, test.

use std::path::Path;

use crate::runner::ExecutionEnv;
use crate::secret::SecretStore;
use crate::stage::StageExecution;
use crate::step::StepConfig;
use crate::workspace::IsolatedCheckout;

/// Compiles and tests one revision in its own checkout.
#[derive(Debug, Clone)]
pub struct BuildAndTestStage {
    source: String,
    build: StepConfig,
    test: StepConfig,
    secrets: SecretStore,
}

impl BuildAndTestStage {
    /// `secrets` lists the credentials that must never reach this stage.
    pub fn new(source: &str, build: StepConfig, test: StepConfig, secrets: SecretStore) -> Self {
        Self {
            source: source.to_string(),
            build,
            test,
            secrets,
        }
    }

    /// Environment for steps running in `workdir`: every known secret removed.
    pub fn execution_env(&self, workdir: &Path) -> ExecutionEnv {
        ExecutionEnv::new(workdir).strip_secrets(&self.secrets)
    }

    /// Run the stage for `revision`. `Err` is reserved for infrastructure
    /// faults; step failures are reported in the returned execution.
    pub async fn run(&self, revision: &str) -> anyhow::Result<StageExecution> {
        let mut exec = StageExecution::new();

        let (checkout, step) = IsolatedCheckout::create(&self.source, revision).await?;
        if !exec.record(step) {
            return Ok(exec);
        }
        let Some(checkout) = checkout else {
            return Ok(exec);
        };

        let env = self.execution_env(checkout.root());
        for config in [&self.build, &self.test] {
            if !exec.run(config, &env).await {
                break;
            }
        }
        Ok(exec)
    }
}
