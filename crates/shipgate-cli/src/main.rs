//! Shipgate - release-gate pipeline orchestrator CLI
//!
//! The `shipgate` command routes repository events to pipelines and runs them.
//!
//! ## Commands
//!
//! - `dispatch`: Route an event and run every matched pipeline
//! - `route`: Show which pipelines an event would start
//! - `publish`: Build, test, gate and publish a version tag
//! - `ci`: Build and test a revision
//! - `cache`: Inspect, restore and save the dependency cache

use std::io::Read;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use shipgate_cache::{os_family, CacheKey, CachePath, DependencyCache, FsCacheStore};
use shipgate_ci::{Dispatcher, PipelineConfig, PipelineDeps};
use shipgate_core::{
    is_git_repo, render_run_summary, resolve_revision, write_run_report, PipelineKind,
    PipelineRun, RepoEvent, TriggerListener, METRICS,
};
use tracing::{info, Level};

#[derive(Parser)]
#[command(name = "shipgate")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Release-gate pipeline orchestrator", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (JSON)
    #[arg(long, global = true, env = "SHIPGATE_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Route a repository event and run every matched pipeline
    Dispatch {
        /// Event JSON file, or `-` for stdin
        #[arg(long)]
        event: String,

        /// Write the finished runs as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Show which pipelines an event would start, without running them
    Route {
        /// Event JSON file, or `-` for stdin
        #[arg(long)]
        event: String,
    },

    /// Run the publish pipeline for a version tag
    Publish {
        /// Tag to publish (e.g. v1.2.3)
        #[arg(long)]
        tag: String,

        /// Revision to build (default: HEAD of the repository)
        #[arg(long)]
        revision: Option<String>,

        /// Write the finished run as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Run the CI pipeline for a revision
    Ci {
        /// Revision to build (default: HEAD of the repository)
        #[arg(long)]
        revision: Option<String>,

        /// Branch the revision was pushed to
        #[arg(long, default_value = "main")]
        branch: String,

        /// Paths changed by the push; omit to always run
        #[arg(long, num_args = 1..)]
        changed: Vec<String>,

        /// Write the finished run as JSON to this file
        #[arg(long)]
        report: Option<PathBuf>,
    },

    /// Dependency cache operations
    Cache {
        #[command(subcommand)]
        action: CacheAction,
    },
}

#[derive(Subcommand)]
enum CacheAction {
    /// Print the cache key for a checkout
    Key {
        /// Checkout directory
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },

    /// List stored cache entries
    List,

    /// Restore the cache into a checkout
    Restore {
        /// Checkout directory
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },

    /// Save a checkout's cached directories
    Save {
        /// Checkout directory
        #[arg(long, default_value = ".")]
        path: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    shipgate_core::init_tracing(cli.json, level);

    let config = PipelineConfig::load(cli.config.as_deref()).context("Failed to load configuration")?;

    match cli.command {
        Commands::Dispatch { event, report } => cmd_dispatch(config, &event, report.as_deref()).await,
        Commands::Route { event } => cmd_route(&config, &event),
        Commands::Publish {
            tag,
            revision,
            report,
        } => cmd_publish(config, &tag, revision.as_deref(), report.as_deref()).await,
        Commands::Ci {
            revision,
            branch,
            changed,
            report,
        } => cmd_ci(config, revision.as_deref(), &branch, changed, report.as_deref()).await,
        Commands::Cache { action } => match action {
            CacheAction::Key { path } => cmd_cache_key(&config, &path),
            CacheAction::List => cmd_cache_list(&config).await,
            CacheAction::Restore { path } => cmd_cache_restore(&config, &path).await,
            CacheAction::Save { path } => cmd_cache_save(&config, &path).await,
        },
    }
}

/// Read a `RepoEvent` from a file, or stdin when `source` is `-`.
fn read_event(source: &str) -> Result<RepoEvent> {
    let content = if source == "-" {
        let mut buf = String::new();
        std::io::stdin()
            .read_to_string(&mut buf)
            .context("Failed to read event from stdin")?;
        buf
    } else {
        std::fs::read_to_string(source).with_context(|| format!("Failed to read event {:?}", source))?
    };
    serde_json::from_str(&content).context("Malformed event JSON")
}

/// Resolve `revision` (default `HEAD`) against a local repository; remote
/// repositories take the revision as given.
fn resolve(config: &PipelineConfig, revision: Option<&str>) -> Result<String> {
    let repo = Path::new(&config.repository);
    match revision {
        Some(rev) if !is_git_repo(repo) => Ok(rev.to_string()),
        rev => {
            let rev = rev.unwrap_or("HEAD");
            resolve_revision(repo, rev)
                .with_context(|| format!("Failed to resolve {} in {}", rev, config.repository))
        }
    }
}

fn print_runs(runs: &[PipelineRun], report: Option<&Path>) -> Result<()> {
    for run in runs {
        print!("{}", render_run_summary(run));
    }
    if let Some(path) = report {
        write_run_report(path, runs)?;
        println!("Report written to {:?}", path);
    }
    METRICS.flush();

    let failed = runs.iter().filter(|r| !r.succeeded()).count();
    if failed > 0 {
        anyhow::bail!("{} of {} runs failed", failed, runs.len());
    }
    Ok(())
}

async fn cmd_dispatch(config: PipelineConfig, source: &str, report: Option<&Path>) -> Result<()> {
    let event = read_event(source)?;
    let deps = PipelineDeps::from_config(config)?;
    let dispatcher = Dispatcher::new(&deps)?;

    let runs = dispatcher.dispatch(&event).await?;
    if runs.is_empty() {
        println!("No pipeline triggered for {}", event.ref_name);
    }
    print_runs(&runs, report)
}

fn cmd_route(config: &PipelineConfig, source: &str) -> Result<()> {
    let event = read_event(source)?;
    let planned = TriggerListener::new(config.trigger_rules()?).route(&event);

    if planned.is_empty() {
        println!("No pipeline triggered for {}", event.ref_name);
    }
    for plan in planned {
        println!("{} ({} @ {})", plan.pipeline, event.ref_name, event.short_revision());
    }
    Ok(())
}

async fn cmd_publish(
    config: PipelineConfig,
    tag: &str,
    revision: Option<&str>,
    report: Option<&Path>,
) -> Result<()> {
    let revision = resolve(&config, revision)?;
    let deps = PipelineDeps::from_config(config)?;
    let dispatcher = Dispatcher::new(&deps)?;

    let event = RepoEvent::tag_push(tag, &revision);
    let plan = dispatcher
        .route(&event)
        .into_iter()
        .find(|p| p.pipeline == PipelineKind::Publish)
        .with_context(|| format!("Tag {} does not match the release tag pattern", tag))?;

    info!(tag = %tag, revision = %revision, "Running publish pipeline");
    let run = dispatcher.run_planned(&plan).await?;
    print_runs(&[run], report)
}

async fn cmd_ci(
    config: PipelineConfig,
    revision: Option<&str>,
    branch: &str,
    changed: Vec<String>,
    report: Option<&Path>,
) -> Result<()> {
    let revision = resolve(&config, revision)?;
    let deps = PipelineDeps::from_config(config)?;
    let dispatcher = Dispatcher::new(&deps)?;

    let changed = (!changed.is_empty()).then_some(changed);
    let event = RepoEvent::branch_push(branch, &revision, changed);
    let Some(plan) = dispatcher
        .route(&event)
        .into_iter()
        .find(|p| p.pipeline == PipelineKind::Ci)
    else {
        println!("CI not triggered: every changed path is ignored");
        return Ok(());
    };

    let run = dispatcher.run_planned(&plan).await?;
    print_runs(&[run], report)
}

fn cache_for(config: &PipelineConfig) -> Result<DependencyCache> {
    let store = FsCacheStore::new(&config.cache.dir)
        .with_context(|| format!("Failed to open cache at {:?}", config.cache.dir))?;
    Ok(DependencyCache::new(Arc::new(store)))
}

fn cache_paths(config: &PipelineConfig, checkout: &Path) -> Vec<CachePath> {
    let home = std::env::var_os("HOME").map(PathBuf::from);
    CachePath::resolve_all(&config.cache.paths, checkout, home.as_deref())
}

fn cache_key(config: &PipelineConfig, checkout: &Path) -> Result<CacheKey> {
    CacheKey::for_checkout(checkout, &config.cache.lock_file, &config.cache.prefix)
        .with_context(|| format!("Failed to compute cache key for {:?}", checkout))
}

fn cmd_cache_key(config: &PipelineConfig, path: &Path) -> Result<()> {
    let key = cache_key(config, path)?;
    println!("Key: {}", key);
    println!(
        "Fallback prefix: {}",
        CacheKey::fallback_prefix(os_family(), &config.cache.prefix)
    );
    Ok(())
}

async fn cmd_cache_list(config: &PipelineConfig) -> Result<()> {
    let cache = cache_for(config)?;
    let entries = cache.store().list().await?;
    if entries.is_empty() {
        println!("No cache entries in {:?}", config.cache.dir);
        return Ok(());
    }
    for meta in entries {
        println!(
            "{}  {}  {} files  {} bytes",
            meta.key,
            meta.saved_at.format("%Y-%m-%d %H:%M:%S"),
            meta.file_count,
            meta.total_bytes
        );
    }
    Ok(())
}

async fn cmd_cache_restore(config: &PipelineConfig, path: &Path) -> Result<()> {
    let key = cache_key(config, path)?;
    let cache = cache_for(config)?;
    let fallback = vec![CacheKey::fallback_prefix(os_family(), &config.cache.prefix)];

    let outcome = cache.restore(&key, &fallback, &cache_paths(config, path)).await;
    match outcome.matched_key() {
        Some(matched) if matched == &key => println!("✓ Restored {}", matched),
        Some(matched) => println!("✓ Restored {} (fallback for {})", matched, key),
        None => println!("✗ Cache miss for {}", key),
    }
    Ok(())
}

async fn cmd_cache_save(config: &PipelineConfig, path: &Path) -> Result<()> {
    let key = cache_key(config, path)?;
    let cache = cache_for(config)?;

    match cache.save(&key, &cache_paths(config, path)).await {
        shipgate_cache::SaveOutcome::Saved { key, files } => {
            println!("✓ Saved {} ({} files)", key, files)
        }
        shipgate_cache::SaveOutcome::AlreadyExists { key } => {
            println!("✓ {} already exists; left unchanged", key)
        }
        shipgate_cache::SaveOutcome::Failed { key, reason } => {
            println!("✗ Failed to save {}: {}", key, reason)
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_ci_with_changed_paths() {
        let cli = Cli::try_parse_from([
            "shipgate", "ci", "--branch", "dev", "--changed", "README.md", "src/lib.rs",
        ])
        .unwrap();
        match cli.command {
            Commands::Ci {
                branch, changed, ..
            } => {
                assert_eq!(branch, "dev");
                assert_eq!(changed, vec!["README.md", "src/lib.rs"]);
            }
            _ => panic!("expected ci command"),
        }
    }

    #[test]
    fn test_parse_cache_subcommands() {
        let cli = Cli::try_parse_from(["shipgate", "--json", "cache", "key", "--path", "/tmp/x"])
            .unwrap();
        assert!(cli.json);
        assert!(matches!(
            cli.command,
            Commands::Cache {
                action: CacheAction::Key { .. }
            }
        ));
    }

    #[test]
    fn test_read_event_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("event.json");
        std::fs::write(
            &path,
            r#"{"event_type": "push", "ref": "refs/tags/v1.2.3", "revision": "abc123"}"#,
        )
        .unwrap();
        let event = read_event(path.to_str().unwrap()).unwrap();
        assert_eq!(event.tag(), Some("v1.2.3"));

        std::fs::write(&path, r#"{"event_type": "push"}"#).unwrap();
        assert!(read_event(path.to_str().unwrap()).is_err());
    }

    #[test]
    fn test_resolve_remote_revision_passthrough() {
        let dir = tempfile::tempdir().unwrap();
        let mut config = PipelineConfig::default();
        config.repository = dir.path().join("not-a-repo").to_string_lossy().into_owned();
        assert_eq!(resolve(&config, Some("abc123")).unwrap(), "abc123");
        assert!(resolve(&config, None).is_err());
    }

    #[tokio::test]
    async fn test_cache_save_then_restore_roundtrip() {
        let work = tempfile::tempdir().unwrap();
        let checkout = work.path().join("checkout");
        std::fs::create_dir_all(checkout.join("target")).unwrap();
        std::fs::write(checkout.join("Cargo.lock"), "version = 3\n").unwrap();
        std::fs::write(checkout.join("target/out"), "built").unwrap();

        let mut config = PipelineConfig::default();
        config.cache.dir = work.path().join("cache");
        config.cache.paths = vec!["target".to_string()];

        cmd_cache_save(&config, &checkout).await.unwrap();
        let other = work.path().join("other");
        std::fs::create_dir_all(&other).unwrap();
        std::fs::write(other.join("Cargo.lock"), "version = 3\n").unwrap();
        cmd_cache_restore(&config, &other).await.unwrap();

        assert_eq!(std::fs::read_to_string(other.join("target/out")).unwrap(), "built");
    }
}
