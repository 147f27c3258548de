//! Shipgate CI - build, test and publish pipelines
//!
//! Provides the pipeline orchestrator that:
//! - Runs build-and-test in an isolated checkout with secrets stripped
//! - Evaluates the release gate and publishes only on upstream success
//! - Restores and saves the dependency cache around publishing
//! - Routes repository events and runs matched pipelines concurrently

pub mod build;
pub mod config;
pub mod fakes;
pub mod pipeline;
pub mod publish;
pub mod registry;
pub mod runner;
pub mod secret;
pub mod stage;
pub mod step;
pub mod workspace;

// Re-export key types
pub use build::BuildAndTestStage;
pub use config::{CacheConfig, PipelineConfig, RegistrySettings};
pub use fakes::MemoryRegistry;
pub use pipeline::{CiPipeline, Dispatcher, PipelineDeps, PublishPipeline};
pub use publish::{CacheSettings, PublishExecution, PublishStage};
pub use registry::{
    classify_publish_error, CargoRegistry, PackageManifest, PublishFailure, PublishReceipt,
    Registry, RegistryError,
};
pub use runner::{ExecutionEnv, StepRunner};
pub use secret::{Secret, SecretStore, DEFAULT_TOKEN_ENV};
pub use stage::StageExecution;
pub use step::{BuiltinStep, StepConfig};
pub use workspace::IsolatedCheckout;
