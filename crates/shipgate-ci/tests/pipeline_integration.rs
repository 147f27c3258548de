//! Integration tests for the pipelines against local git repositories,
//! `MemoryRegistry` and `MemoryCacheStore`.

use std::path::Path;
use std::process::Command;
use std::sync::Arc;

use shipgate_cache::{DependencyCache, MemoryCacheStore};
use shipgate_ci::publish::{LOGIN_STEP, PUBLISH_STEP, RESTORE_CACHE_STEP, SAVE_CACHE_STEP};
use shipgate_ci::{
    BuildAndTestStage, Dispatcher, MemoryRegistry, PipelineConfig, PipelineDeps, PublishStage,
    Secret, SecretStore, StepConfig,
};
use shipgate_core::{
    capture_head_sha, FailureKind, PipelineKind, RejectionReason, RepoEvent, RunState,
    StageOutcome, BUILD_AND_TEST_STAGE, PUBLISH_STAGE,
};
use tempfile::TempDir;

const TOKEN: &str = "cio-test-token";

fn git(dir: &Path, args: &[&str]) {
    let status = Command::new("git")
        .args(["-c", "user.name=Shipgate Test", "-c", "user.email=test@shipgate.dev"])
        .args(args)
        .current_dir(dir)
        .output()
        .expect("run git");
    assert!(status.status.success(), "git {args:?}: {status:?}");
}

fn write(dir: &Path, rel: &str, contents: &str) {
    let path = dir.join(rel);
    std::fs::create_dir_all(path.parent().unwrap()).unwrap();
    std::fs::write(path, contents).unwrap();
}

fn manifest(version: &str) -> String {
    format!("[package]\nname = \"demo\"\nversion = \"{version}\"\nedition = \"2021\"\n")
}

/// A repository with one commit holding a publishable package.
fn package_repo(version: &str) -> (TempDir, String) {
    let dir = TempDir::new().unwrap();
    git(dir.path(), &["init", "-q"]);
    write(dir.path(), "Cargo.toml", &manifest(version));
    write(dir.path(), "Cargo.lock", "version = 3\n");
    write(dir.path(), "src/lib.rs", "pub fn demo() {}\n");
    write(dir.path(), "README.md", "# demo\n");
    git(dir.path(), &["add", "."]);
    git(dir.path(), &["commit", "-q", "-m", "initial"]);
    let sha = capture_head_sha(dir.path()).unwrap();
    (dir, sha)
}

fn commit_change(dir: &Path, rel: &str, contents: &str) -> String {
    write(dir, rel, contents);
    git(dir, &["add", "."]);
    git(dir, &["commit", "-q", "-m", "change"]);
    capture_head_sha(dir).unwrap()
}

fn config(repo: &Path, test_script: &str) -> PipelineConfig {
    let mut config = PipelineConfig::default();
    config.repository = repo.to_string_lossy().into_owned();
    config.build_command = sh("mkdir -p target && echo built > target/out");
    config.test_command = sh(test_script);
    config.cache.paths = vec!["target".to_string()];
    config
}

fn sh(script: &str) -> Vec<String> {
    vec!["sh".to_string(), "-c".to_string(), script.to_string()]
}

struct Harness {
    dispatcher: Dispatcher,
    registry: Arc<MemoryRegistry>,
    store: Arc<MemoryCacheStore>,
}

fn harness(config: PipelineConfig, registry: MemoryRegistry, secrets: SecretStore) -> Harness {
    let registry = Arc::new(registry);
    let store = Arc::new(MemoryCacheStore::new());
    let deps = PipelineDeps {
        config,
        secrets,
        registry: registry.clone(),
        cache: Some(DependencyCache::new(store.clone())),
        home: None,
    };
    Harness {
        dispatcher: Dispatcher::new(&deps).unwrap(),
        registry,
        store,
    }
}

fn token_store() -> SecretStore {
    SecretStore::new().with_secret(Secret::new("CRATES_IO_TOKEN", TOKEN))
}

fn step_names(run: &shipgate_core::PipelineRun, stage: &str) -> Vec<String> {
    run.stage(stage)
        .unwrap()
        .steps
        .iter()
        .map(|s| s.step_name.clone())
        .collect()
}

// ===== publish pipeline =====

#[tokio::test]
async fn test_version_tag_with_passing_build_publishes() {
    let (repo, sha) = package_repo("1.2.3");
    let h = harness(config(repo.path(), "exit 0"), MemoryRegistry::new(TOKEN), token_store());

    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.3", &sha)).await.unwrap();

    assert_eq!(runs.len(), 1);
    let run = &runs[0];
    assert_eq!(run.pipeline, PipelineKind::Publish);
    assert_eq!(run.state, RunState::Published, "{:?}", run.failure);
    assert!(run.succeeded());
    assert!(run.gate.as_ref().unwrap().open);
    assert_eq!(
        step_names(run, BUILD_AND_TEST_STAGE),
        vec!["checkout", "build", "test"]
    );
    assert_eq!(
        step_names(run, PUBLISH_STAGE),
        vec!["checkout", RESTORE_CACHE_STEP, LOGIN_STEP, PUBLISH_STEP, SAVE_CACHE_STEP]
    );

    let published = h.registry.published();
    assert_eq!(published.len(), 1);
    assert_eq!(published[0].name, "demo");
    assert_eq!(published[0].version, "1.2.3");
    assert_eq!(h.store.len(), 1);

    let states: Vec<RunState> = run.transitions.iter().map(|t| t.to).collect();
    assert_eq!(
        states,
        vec![RunState::Building, RunState::Tested, RunState::Publishing, RunState::Published]
    );
}

#[tokio::test]
async fn test_failing_tests_deny_the_gate() {
    let (repo, sha) = package_repo("1.2.3");
    let h = harness(
        config(repo.path(), "echo 'assertion failed: left == right' >&2; exit 101"),
        MemoryRegistry::new(TOKEN),
        token_store(),
    );

    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.3", &sha)).await.unwrap();
    let run = &runs[0];

    assert_eq!(run.state, RunState::Failed);
    assert!(run.stage(PUBLISH_STAGE).is_none(), "publish must never be instantiated");
    assert!(!run.gate.as_ref().unwrap().open);

    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::GateDenied);
    assert_eq!(failure.step.as_deref(), Some("test"));
    assert!(failure.detail.contains("assertion failed"));

    assert_eq!(h.registry.login_attempts(), 0);
    assert_eq!(h.registry.publish_attempts(), 0);
    assert!(h.store.is_empty());
}

#[tokio::test]
async fn test_forced_build_failure_skips_tests_and_publish() {
    let (repo, sha) = package_repo("1.2.3");
    let mut cfg = config(repo.path(), "touch tests-ran");
    cfg.build_command = sh("exit 1");
    let h = harness(cfg, MemoryRegistry::new(TOKEN), token_store());

    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.3", &sha)).await.unwrap();
    let run = &runs[0];

    assert_eq!(run.state, RunState::Failed);
    assert_eq!(step_names(run, BUILD_AND_TEST_STAGE), vec!["checkout", "build"]);
    assert_eq!(
        run.stage(BUILD_AND_TEST_STAGE).unwrap().outcome,
        StageOutcome::Failure
    );
    assert!(run.stage(PUBLISH_STAGE).is_none());
    assert_eq!(h.registry.publish_attempts(), 0);
}

#[tokio::test]
async fn test_duplicate_version_is_registry_rejection_and_cache_still_saves() {
    let (repo, sha) = package_repo("1.2.3");
    let h = harness(
        config(repo.path(), "exit 0"),
        MemoryRegistry::new(TOKEN).with_existing("demo", "1.2.3"),
        token_store(),
    );

    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.3", &sha)).await.unwrap();
    let run = &runs[0];

    assert_eq!(run.state, RunState::Failed);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(
        failure.kind,
        FailureKind::RegistryRejection {
            reason: RejectionReason::DuplicateVersion
        }
    );
    assert_eq!(failure.stage.as_deref(), Some(PUBLISH_STAGE));
    assert!(failure.detail.contains("already uploaded"));

    let publish = run.stage(PUBLISH_STAGE).unwrap();
    assert_eq!(publish.outcome, StageOutcome::Failure);
    assert!(publish.step(SAVE_CACHE_STEP).unwrap().passed());
    assert_eq!(h.store.len(), 1, "cache save runs even after a refused publish");
}

#[tokio::test]
async fn test_network_error_surfaces_without_retry() {
    let (repo, sha) = package_repo("1.2.3");
    let registry = MemoryRegistry::new(TOKEN);
    registry.set_network_down(true);
    let h = harness(config(repo.path(), "exit 0"), registry, token_store());

    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.3", &sha)).await.unwrap();
    let failure = runs[0].failure.as_ref().unwrap();
    assert_eq!(
        failure.kind,
        FailureKind::RegistryRejection {
            reason: RejectionReason::NetworkError
        }
    );
    assert_eq!(h.registry.publish_attempts(), 1);
}

#[tokio::test]
async fn test_missing_credential_fails_login() {
    let (repo, sha) = package_repo("1.2.3");
    let h = harness(config(repo.path(), "exit 0"), MemoryRegistry::new(TOKEN), SecretStore::new());

    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.3", &sha)).await.unwrap();
    let run = &runs[0];

    assert_eq!(run.state, RunState::Failed);
    let failure = run.failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::StepFailure);
    assert_eq!(failure.step.as_deref(), Some(LOGIN_STEP));
    assert!(failure.detail.contains("CRATES_IO_TOKEN"));
    assert_eq!(h.registry.publish_attempts(), 0);
    assert!(run.stage(PUBLISH_STAGE).unwrap().step(SAVE_CACHE_STEP).is_some());
}

#[tokio::test]
async fn test_cache_falls_back_to_previous_lock_file() {
    let (repo, first) = package_repo("1.2.3");
    let h = harness(config(repo.path(), "exit 0"), MemoryRegistry::new(TOKEN), token_store());

    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.3", &first)).await.unwrap();
    assert_eq!(runs[0].state, RunState::Published);
    let restore = runs[0].stage(PUBLISH_STAGE).unwrap().step(RESTORE_CACHE_STEP).unwrap();
    assert!(restore.stdout.contains("cache miss"));

    write(repo.path(), "Cargo.toml", &manifest("1.2.4"));
    let second = commit_change(repo.path(), "Cargo.lock", "version = 3\n# bumped\n");
    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.4", &second)).await.unwrap();
    assert_eq!(runs[0].state, RunState::Published);
    let restore = runs[0].stage(PUBLISH_STAGE).unwrap().step(RESTORE_CACHE_STEP).unwrap();
    assert!(restore.stdout.contains("cache restored from"), "{}", restore.stdout);
    assert_eq!(h.store.len(), 2);
}

// ===== ci pipeline =====

#[tokio::test]
async fn test_readme_only_push_runs_nothing() {
    let (repo, sha) = package_repo("1.2.3");
    let h = harness(config(repo.path(), "exit 0"), MemoryRegistry::new(TOKEN), token_store());

    let event = RepoEvent::branch_push("main", &sha, Some(vec!["README.md".to_string()]));
    assert!(h.dispatcher.dispatch(&event).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_source_change_runs_ci_to_tested() {
    let (repo, sha) = package_repo("1.2.3");
    let h = harness(config(repo.path(), "exit 0"), MemoryRegistry::new(TOKEN), token_store());

    let event = RepoEvent::branch_push(
        "main",
        &sha,
        Some(vec!["README.md".to_string(), "src/lib.rs".to_string()]),
    );
    let runs = h.dispatcher.dispatch(&event).await.unwrap();

    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].pipeline, PipelineKind::Ci);
    assert_eq!(runs[0].state, RunState::Tested);
    assert!(runs[0].succeeded());
    assert!(runs[0].gate.is_none());
    assert_eq!(h.registry.login_attempts(), 0);
}

#[tokio::test]
async fn test_ci_failure_is_step_failure() {
    let (repo, sha) = package_repo("1.2.3");
    let h = harness(config(repo.path(), "exit 2"), MemoryRegistry::new(TOKEN), token_store());

    let event = RepoEvent::pull_request("feature", "main", &sha, None);
    let runs = h.dispatcher.dispatch(&event).await.unwrap();

    assert_eq!(runs[0].state, RunState::Failed);
    let failure = runs[0].failure.as_ref().unwrap();
    assert_eq!(failure.kind, FailureKind::StepFailure);
    assert_eq!(failure.step.as_deref(), Some("test"));
}

#[tokio::test]
async fn test_unknown_revision_fails_checkout() {
    let (repo, _sha) = package_repo("1.2.3");
    let h = harness(config(repo.path(), "exit 0"), MemoryRegistry::new(TOKEN), token_store());

    let event = RepoEvent::branch_push("main", "0123456789abcdef0123456789abcdef01234567", None);
    let runs = h.dispatcher.dispatch(&event).await.unwrap();

    assert_eq!(runs[0].state, RunState::Failed);
    assert_eq!(runs[0].failure.as_ref().unwrap().step.as_deref(), Some("checkout"));
}

#[tokio::test]
async fn test_concurrent_events_run_independently() {
    let (repo, first) = package_repo("1.2.3");
    let second = commit_change(repo.path(), "src/lib.rs", "pub fn demo() -> u8 { 1 }\n");
    let h = harness(config(repo.path(), "exit 0"), MemoryRegistry::new(TOKEN), token_store());

    let a = RepoEvent::branch_push("main", &first, None);
    let b = RepoEvent::branch_push("feature", &second, None);
    let (ra, rb) = tokio::join!(h.dispatcher.dispatch(&a), h.dispatcher.dispatch(&b));
    let (ra, rb) = (ra.unwrap(), rb.unwrap());

    assert_eq!(ra[0].state, RunState::Tested);
    assert_eq!(rb[0].state, RunState::Tested);
    assert_ne!(ra[0].id, rb[0].id);
    assert_eq!(ra[0].trigger.revision, first);
    assert_eq!(rb[0].trigger.revision, second);
}

// ===== isolation =====

#[tokio::test]
async fn test_secret_reaches_publish_but_not_build() {
    const VAR: &str = "SHIPGATE_IT_ISOLATION_TOKEN";
    std::env::set_var(VAR, TOKEN);
    let secrets = SecretStore::from_env(VAR);
    assert!(secrets.get(VAR).is_some());

    let (repo, sha) = package_repo("1.2.3");
    let mut cfg = config(
        repo.path(),
        &format!("if [ -n \"${{{VAR}+x}}\" ]; then echo leaked >&2; exit 1; fi"),
    );
    cfg.registry.token_env = VAR.to_string();
    let h = harness(cfg, MemoryRegistry::new(TOKEN), secrets.clone());

    let runs = h.dispatcher.dispatch(&RepoEvent::tag_push("v1.2.3", &sha)).await.unwrap();
    assert_eq!(runs[0].state, RunState::Published, "{:?}", runs[0].failure);

    let workdir = repo.path();
    let build = BuildAndTestStage::new(
        ".",
        StepConfig::shell("build", "true"),
        StepConfig::shell("test", "true"),
        secrets.clone(),
    );
    let publish = PublishStage::new(
        ".",
        h.registry.clone(),
        VAR,
        secrets.get(VAR).cloned(),
        None,
    );
    assert!(build.execution_env(workdir).is_stripped(VAR));
    assert!(!build.execution_env(workdir).provides(VAR));
    assert!(publish.execution_env(workdir).provides(VAR));
}
