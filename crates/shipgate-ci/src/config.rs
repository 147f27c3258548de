//! Pipeline configuration: JSON file, defaults, environment overrides.

use std::path::{Path, PathBuf};

use anyhow::Context;
use serde::{Deserialize, Serialize};
use shipgate_cache::{DEFAULT_CACHE_PATHS, DEFAULT_KEY_PREFIX, DEFAULT_LOCK_FILE};
use shipgate_core::{TriggerRules, DEFAULT_IGNORE_PATHS, DEFAULT_MAIN_BRANCH, DEFAULT_TAG_PATTERN};

use crate::registry::DEFAULT_REGISTRY_API;
use crate::secret::DEFAULT_TOKEN_ENV;
use crate::step::{BuiltinStep, StepConfig};

/// Repository to clone when none is configured.
pub const DEFAULT_REPOSITORY: &str = ".";

/// Cache store directory when none is configured.
pub const DEFAULT_CACHE_DIR: &str = ".shipgate/cache";

/// Registry settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RegistrySettings {
    /// Environment variable holding the publish credential.
    pub token_env: String,

    /// Alternate registry name; crates.io when unset.
    pub registry_name: Option<String>,

    /// Web API root the credential is checked against at login.
    pub api_url: String,
}

impl Default for RegistrySettings {
    fn default() -> Self {
        Self {
            token_env: DEFAULT_TOKEN_ENV.to_string(),
            registry_name: None,
            api_url: DEFAULT_REGISTRY_API.to_string(),
        }
    }
}

/// Dependency cache settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub dir: PathBuf,
    pub prefix: String,
    pub lock_file: String,
    pub paths: Vec<String>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            dir: PathBuf::from(DEFAULT_CACHE_DIR),
            prefix: DEFAULT_KEY_PREFIX.to_string(),
            lock_file: DEFAULT_LOCK_FILE.to_string(),
            paths: DEFAULT_CACHE_PATHS.iter().map(|p| p.to_string()).collect(),
        }
    }
}

/// Full pipeline configuration. Every field has a default, so `{}` is valid.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Git URL or path cloned for every stage.
    pub repository: String,
    pub tag_pattern: String,
    pub main_branch: String,
    pub ignore_paths: Vec<String>,
    pub build_command: Vec<String>,
    pub test_command: Vec<String>,
    /// Per-step timeout; unset means no timeout.
    pub step_timeout_secs: Option<u64>,
    pub registry: RegistrySettings,
    pub cache: CacheConfig,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            repository: DEFAULT_REPOSITORY.to_string(),
            tag_pattern: DEFAULT_TAG_PATTERN.to_string(),
            main_branch: DEFAULT_MAIN_BRANCH.to_string(),
            ignore_paths: DEFAULT_IGNORE_PATHS.iter().map(|p| p.to_string()).collect(),
            build_command: BuiltinStep::CargoBuild.command(),
            test_command: BuiltinStep::CargoTest.command(),
            step_timeout_secs: None,
            registry: RegistrySettings::default(),
            cache: CacheConfig::default(),
        }
    }
}

impl PipelineConfig {
    /// Read a JSON config file.
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content =
            std::fs::read_to_string(path).with_context(|| format!("read config {:?}", path))?;
        serde_json::from_str(&content).with_context(|| format!("parse config {:?}", path))
    }

    /// Load `path` if given, else defaults; then apply environment overrides.
    pub fn load(path: Option<&Path>) -> anyhow::Result<Self> {
        let config = match path {
            Some(path) => Self::from_file(path)?,
            None => Self::default(),
        };
        Ok(config.with_overrides(|name| std::env::var(name).ok()))
    }

    /// Apply `SHIPGATE_REPOSITORY`, `SHIPGATE_CACHE_DIR`, `SHIPGATE_TOKEN_ENV`
    /// and `SHIPGATE_REGISTRY_API` as looked up by `lookup`.
    pub fn with_overrides(mut self, lookup: impl Fn(&str) -> Option<String>) -> Self {
        if let Some(repository) = lookup("SHIPGATE_REPOSITORY").filter(|v| !v.is_empty()) {
            self.repository = repository;
        }
        if let Some(dir) = lookup("SHIPGATE_CACHE_DIR").filter(|v| !v.is_empty()) {
            self.cache.dir = PathBuf::from(dir);
        }
        if let Some(token_env) = lookup("SHIPGATE_TOKEN_ENV").filter(|v| !v.is_empty()) {
            self.registry.token_env = token_env;
        }
        if let Some(api_url) = lookup("SHIPGATE_REGISTRY_API").filter(|v| !v.is_empty()) {
            self.registry.api_url = api_url;
        }
        self
    }

    pub fn trigger_rules(&self) -> anyhow::Result<TriggerRules> {
        TriggerRules::new(&self.tag_pattern, &self.main_branch, &self.ignore_paths)
            .context("invalid trigger rules")
    }

    pub fn build_step(&self) -> StepConfig {
        StepConfig::custom(BuiltinStep::CargoBuild.name(), self.build_command.clone())
            .with_timeout(self.step_timeout_secs)
    }

    pub fn test_step(&self) -> StepConfig {
        StepConfig::custom(BuiltinStep::CargoTest.name(), self.test_command.clone())
            .with_timeout(self.step_timeout_secs)
    }
}
