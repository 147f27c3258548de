//! Step execution as child processes.

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::{Duration, Instant};

use shipgate_core::StepResult;
use tokio::process::Command;

use crate::secret::{Secret, SecretStore};
use crate::step::StepConfig;

/// Inputs a step's process sees: where it runs and which variables it gets.
///
/// Each stage builds its own env. Stripped names are removed from the
/// inherited process environment; injected secrets are added back only where
/// the stage asks for them.
#[derive(Debug, Clone)]
pub struct ExecutionEnv {
    workdir: PathBuf,
    vars: BTreeMap<String, String>,
    secrets: BTreeMap<String, Secret>,
    stripped: BTreeSet<String>,
}

impl ExecutionEnv {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            vars: BTreeMap::new(),
            secrets: BTreeMap::new(),
            stripped: BTreeSet::new(),
        }
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    pub fn with_var(mut self, name: &str, value: &str) -> Self {
        self.vars.insert(name.to_string(), value.to_string());
        self
    }

    /// Remove every secret name known to `store` from the child environment.
    pub fn strip_secrets(mut self, store: &SecretStore) -> Self {
        for name in store.names() {
            self.vars.remove(name);
            self.secrets.remove(name);
            self.stripped.insert(name.to_string());
        }
        self
    }

    /// Expose `secret` to the child under its own name.
    pub fn inject(self, secret: &Secret) -> Self {
        self.inject_as(secret.name(), secret)
    }

    /// Expose `secret` to the child under `var`.
    pub fn inject_as(mut self, var: &str, secret: &Secret) -> Self {
        self.stripped.remove(var);
        self.secrets.insert(var.to_string(), secret.clone());
        self
    }

    pub fn is_stripped(&self, name: &str) -> bool {
        self.stripped.contains(name)
    }

    /// Whether `name` is explicitly provided to the child, as a var or a secret.
    pub fn provides(&self, name: &str) -> bool {
        self.vars.contains_key(name) || self.secrets.contains_key(name)
    }

    fn apply(&self, cmd: &mut Command) {
        cmd.current_dir(&self.workdir);
        for name in &self.stripped {
            cmd.env_remove(name);
        }
        cmd.envs(&self.vars);
        for (var, secret) in &self.secrets {
            cmd.env(var, secret.expose());
        }
    }
}

/// Step runner that executes one command and captures its output.
pub struct StepRunner;

impl StepRunner {
    /// Execute a single step and return the result.
    ///
    /// A non-zero exit is a normal `StepResult`; `Err` means the process could
    /// not be started or exceeded its timeout.
    pub async fn execute_step(config: &StepConfig, env: &ExecutionEnv) -> anyhow::Result<StepResult> {
        let start = Instant::now();

        if config.command.is_empty() {
            anyhow::bail!("Step {} has empty command", config.name);
        }

        let exe = &config.command[0];
        let args = &config.command[1..];

        let mut cmd = Command::new(exe);
        cmd.args(args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        env.apply(&mut cmd);

        let child = cmd
            .spawn()
            .map_err(|e| anyhow::anyhow!("Step {} failed to start `{}`: {}", config.name, exe, e))?;

        let output = match config.timeout_secs {
            Some(secs) if secs > 0 => tokio::time::timeout(
                Duration::from_secs(secs),
                child.wait_with_output(),
            )
            .await
            .map_err(|_| anyhow::anyhow!("Step {} timed out after {} seconds", config.name, secs))??,
            _ => child.wait_with_output().await?,
        };

        let duration_ms = start.elapsed().as_millis() as u64;
        let exit_code = output.status.code().unwrap_or(-1);
        let stdout = String::from_utf8_lossy(&output.stdout).to_string();
        let stderr = String::from_utf8_lossy(&output.stderr).to_string();

        let success = output.status.success();

        Ok(StepResult {
            step_name: config.name.clone(),
            exit_code,
            stdout,
            stderr,
            duration_ms,
            success,
        })
    }

    /// Execute a step, folding start/timeout errors into a failed `StepResult`.
    pub async fn run_step(config: &StepConfig, env: &ExecutionEnv) -> StepResult {
        let start = Instant::now();
        match Self::execute_step(config, env).await {
            Ok(result) => result,
            Err(e) => StepResult::failed_with(
                &config.name,
                e.to_string(),
                start.elapsed().as_millis() as u64,
            ),
        }
    }
}
