//! Publish stage: checkout, restore-cache, login, publish, save-cache.
//!
//! Only reachable with an [`UpstreamSuccess`] token from the release gate.
//! The cache steps are advisory: a miss or a failed save is logged and
//! recorded, never a stage failure.

use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Instant;

use shipgate_cache::{
    os_family, CacheKey, CachePath, DependencyCache, RestoreOutcome, SaveOutcome,
};
use shipgate_core::{emit_cache_warning, RejectionReason, StepResult, UpstreamSuccess, METRICS};

use crate::registry::{PackageManifest, Registry};
use crate::runner::ExecutionEnv;
use crate::secret::Secret;
use crate::stage::StageExecution;
use crate::workspace::IsolatedCheckout;

pub const RESTORE_CACHE_STEP: &str = "restore-cache";
pub const LOGIN_STEP: &str = "login";
pub const PUBLISH_STEP: &str = "publish";
pub const SAVE_CACHE_STEP: &str = "save-cache";

/// Where and what the publish stage caches.
#[derive(Clone)]
pub struct CacheSettings {
    pub cache: DependencyCache,
    pub prefix: String,
    pub lock_file: String,
    pub paths: Vec<String>,
    pub home: Option<PathBuf>,
}

/// Everything the publish stage did.
#[derive(Debug, Clone)]
pub struct PublishExecution {
    pub stage: StageExecution,
    /// Set when the registry refused the publish.
    pub rejection: Option<RejectionReason>,
    pub restore: Option<RestoreOutcome>,
    pub save: Option<SaveOutcome>,
}

/// Publishes one validated revision.
#[derive(Clone)]
pub struct PublishStage {
    source: String,
    registry: Arc<dyn Registry>,
    token_env: String,
    token: Option<Secret>,
    cache: Option<CacheSettings>,
}

impl PublishStage {
    /// `token` is the credential read from `token_env`, if it was set.
    pub fn new(
        source: &str,
        registry: Arc<dyn Registry>,
        token_env: &str,
        token: Option<Secret>,
        cache: Option<CacheSettings>,
    ) -> Self {
        Self {
            source: source.to_string(),
            registry,
            token_env: token_env.to_string(),
            token,
            cache,
        }
    }

    /// Environment for steps running in `workdir`: the credential injected.
    pub fn execution_env(&self, workdir: &Path) -> ExecutionEnv {
        let env = ExecutionEnv::new(workdir);
        match &self.token {
            Some(token) => env.inject(token),
            None => env,
        }
    }

    /// Run the stage for the revision `upstream` vouches for.
    pub async fn run(
        &self,
        upstream: &UpstreamSuccess,
        run_id: &str,
    ) -> anyhow::Result<PublishExecution> {
        let mut exec = PublishExecution {
            stage: StageExecution::new(),
            rejection: None,
            restore: None,
            save: None,
        };

        // Never reuses the build-and-test checkout.
        let (checkout, step) = IsolatedCheckout::create(&self.source, upstream.revision()).await?;
        if !exec.stage.record(step) {
            return Ok(exec);
        }
        let Some(checkout) = checkout else {
            return Ok(exec);
        };
        let root = checkout.root();

        let cached = self.restore_cache(root, run_id, &mut exec).await;

        self.login_and_publish(root, &mut exec).await;

        if let Some((key, paths)) = cached {
            self.save_cache(&key, &paths, run_id, &mut exec).await;
        }

        Ok(exec)
    }

    async fn restore_cache(
        &self,
        root: &Path,
        run_id: &str,
        exec: &mut PublishExecution,
    ) -> Option<(CacheKey, Vec<CachePath>)> {
        let settings = self.cache.as_ref()?;
        let start = Instant::now();

        let key = match CacheKey::for_checkout(root, &settings.lock_file, &settings.prefix) {
            Ok(key) => key,
            Err(e) => {
                emit_cache_warning(run_id, "", &e);
                let mut step = StepResult::passed_with(RESTORE_CACHE_STEP, String::new(), 0);
                step.stderr = format!("cache disabled for this run: {e}");
                exec.stage.record_advisory(step);
                return None;
            }
        };
        let paths = CachePath::resolve_all(&settings.paths, root, settings.home.as_deref());
        let fallback = vec![CacheKey::fallback_prefix(os_family(), &settings.prefix)];

        let outcome = settings.cache.restore(&key, &fallback, &paths).await;
        let summary = match &outcome {
            RestoreOutcome::Exact { key, files } => {
                METRICS.inc_cache_hit();
                format!("cache hit: {key} ({files} files)")
            }
            RestoreOutcome::Fallback { matched, files, .. } => {
                METRICS.inc_cache_fallback();
                format!("cache restored from {matched} ({files} files)")
            }
            RestoreOutcome::Miss { key } => {
                METRICS.inc_cache_miss();
                format!("cache miss: {key}; continuing cold")
            }
        };
        exec.stage.record_advisory(StepResult::passed_with(
            RESTORE_CACHE_STEP,
            summary,
            start.elapsed().as_millis() as u64,
        ));
        exec.restore = Some(outcome);
        Some((key, paths))
    }

    async fn login_and_publish(&self, root: &Path, exec: &mut PublishExecution) {
        let start = Instant::now();
        let Some(token) = &self.token else {
            exec.stage.record(StepResult::failed_with(
                LOGIN_STEP,
                format!("credential {} is not set", self.token_env),
                0,
            ));
            return;
        };
        let env = self.execution_env(root);

        let login = match self.registry.login(token, &env).await {
            Ok(output) => StepResult::passed_with(LOGIN_STEP, output, elapsed_ms(start)),
            Err(e) => StepResult::failed_with(LOGIN_STEP, e.to_string(), elapsed_ms(start)),
        };
        if !exec.stage.record(login) {
            return;
        }

        let start = Instant::now();
        let manifest = match PackageManifest::load(root) {
            Ok(manifest) => manifest,
            Err(e) => {
                exec.stage.record(StepResult::failed_with(
                    PUBLISH_STEP,
                    format!("cannot read package manifest: {e}"),
                    elapsed_ms(start),
                ));
                return;
            }
        };

        match self.registry.publish(&manifest, token, &env).await {
            Ok(receipt) => {
                METRICS.inc_publishes();
                tracing::info!(package = %receipt.package, "published");
                exec.stage.record(StepResult::passed_with(
                    PUBLISH_STEP,
                    receipt.output,
                    elapsed_ms(start),
                ));
            }
            Err(failure) => {
                tracing::warn!(package = %manifest, reason = %failure.reason, "publish refused");
                exec.rejection = Some(failure.reason);
                exec.stage.record(StepResult::failed_with(
                    PUBLISH_STEP,
                    failure.to_string(),
                    elapsed_ms(start),
                ));
            }
        }
    }

    async fn save_cache(
        &self,
        key: &CacheKey,
        paths: &[CachePath],
        run_id: &str,
        exec: &mut PublishExecution,
    ) {
        let Some(settings) = &self.cache else {
            return;
        };
        let start = Instant::now();
        let outcome = settings.cache.save(key, paths).await;

        let mut step = StepResult::passed_with(SAVE_CACHE_STEP, String::new(), 0);
        match &outcome {
            SaveOutcome::Saved { key, files } => {
                step.stdout = format!("cache saved: {key} ({files} files)");
            }
            SaveOutcome::AlreadyExists { key } => {
                step.stdout = format!("cache entry {key} already exists; left unchanged");
            }
            SaveOutcome::Failed { key, reason } => {
                emit_cache_warning(run_id, key.as_str(), reason);
                step.stderr = format!("cache save failed: {reason}");
            }
        }
        step.duration_ms = elapsed_ms(start);
        exec.stage.record_advisory(step);
        exec.save = Some(outcome);
    }
}

fn elapsed_ms(start: Instant) -> u64 {
    start.elapsed().as_millis() as u64
}
