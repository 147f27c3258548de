//! Step definitions and configuration.

use serde::{Deserialize, Serialize};

/// Builtin build-and-test steps.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BuiltinStep {
    /// cargo build --verbose
    CargoBuild,

    /// cargo test --verbose
    CargoTest,
}

impl BuiltinStep {
    /// Get the step name as a string.
    pub fn name(&self) -> &'static str {
        match self {
            BuiltinStep::CargoBuild => "build",
            BuiltinStep::CargoTest => "test",
        }
    }

    /// Get the step's command.
    pub fn command(&self) -> Vec<String> {
        let sub = match self {
            BuiltinStep::CargoBuild => "build",
            BuiltinStep::CargoTest => "test",
        };
        vec!["cargo".to_string(), sub.to_string(), "--verbose".to_string()]
    }
}

/// Configuration for one step.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct StepConfig {
    /// Human-readable step name.
    pub name: String,

    /// Command to execute (first element is executable).
    pub command: Vec<String>,

    /// Optional timeout in seconds; unset means the step may run indefinitely.
    pub timeout_secs: Option<u64>,
}

impl StepConfig {
    /// Create a step configuration from a builtin step.
    pub fn from_builtin(step: BuiltinStep) -> Self {
        Self {
            name: step.name().to_string(),
            command: step.command(),
            timeout_secs: None,
        }
    }

    /// Create a custom step configuration.
    pub fn custom(name: &str, command: Vec<String>) -> Self {
        Self {
            name: name.to_string(),
            command,
            timeout_secs: None,
        }
    }

    /// `sh -c <script>`; handy for tests and one-line hooks.
    pub fn shell(name: &str, script: &str) -> Self {
        Self::custom(
            name,
            vec!["sh".to_string(), "-c".to_string(), script.to_string()],
        )
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_step_names() {
        assert_eq!(BuiltinStep::CargoBuild.name(), "build");
        assert_eq!(BuiltinStep::CargoTest.name(), "test");
    }

    #[test]
    fn test_builtin_step_commands() {
        assert_eq!(
            BuiltinStep::CargoBuild.command(),
            vec!["cargo", "build", "--verbose"]
        );
        assert_eq!(
            BuiltinStep::CargoTest.command(),
            vec!["cargo", "test", "--verbose"]
        );
    }

    #[test]
    fn test_step_config_defaults_to_no_timeout() {
        let config = StepConfig::from_builtin(BuiltinStep::CargoBuild);
        assert_eq!(config.name, "build");
        assert_eq!(config.timeout_secs, None);

        let config = config.with_timeout(Some(30));
        assert_eq!(config.timeout_secs, Some(30));
    }

    #[test]
    fn test_shell_step() {
        let config = StepConfig::shell("hook", "echo hi");
        assert_eq!(config.command, vec!["sh", "-c", "echo hi"]);
    }
}
