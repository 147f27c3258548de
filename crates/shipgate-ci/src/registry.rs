//! Package registry collaborator: manifest loading, login and publish.

use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::StatusCode;
use serde::{Deserialize, Serialize};
use shipgate_core::RejectionReason;
use thiserror::Error;

use crate::runner::{ExecutionEnv, StepRunner};
use crate::secret::Secret;
use crate::step::StepConfig;

/// Errors from manifest handling and registry login.
#[derive(Error, Debug)]
pub enum RegistryError {
    #[error("Manifest error: {0}")]
    Manifest(String),

    #[error("Login failed: {0}")]
    LoginFailed(String),

    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("TOML parsing error: {0}")]
    Toml(#[from] toml::de::Error),
}

/// Result type for registry operations
pub type Result<T> = std::result::Result<T, RegistryError>;

/// A refused publish, surfaced as-is to the run.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("publish {reason}: {detail}")]
pub struct PublishFailure {
    pub reason: RejectionReason,
    pub detail: String,
}

impl PublishFailure {
    pub fn new(reason: RejectionReason, detail: impl Into<String>) -> Self {
        Self {
            reason,
            detail: detail.into(),
        }
    }
}

/// Name and version of the package being published.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PackageManifest {
    pub name: String,
    pub version: String,
}

#[derive(Deserialize)]
struct CargoToml {
    package: Option<PackageSection>,
}

#[derive(Deserialize)]
struct PackageSection {
    name: String,
    version: Option<toml::Value>,
}

impl PackageManifest {
    /// Read `[package]` from `Cargo.toml` in `root`.
    pub fn load(root: &Path) -> Result<Self> {
        let path = root.join("Cargo.toml");
        let content = std::fs::read_to_string(&path)?;
        Self::parse(&content)
    }

    pub fn parse(content: &str) -> Result<Self> {
        let parsed: CargoToml = toml::from_str(content)?;
        let package = parsed
            .package
            .ok_or_else(|| RegistryError::Manifest("no [package] section".to_string()))?;
        let version = match package.version {
            Some(toml::Value::String(v)) => v,
            Some(_) => {
                return Err(RegistryError::Manifest(
                    "package.version must be a literal string".to_string(),
                ))
            }
            None => return Err(RegistryError::Manifest("package.version is missing".to_string())),
        };
        Ok(Self {
            name: package.name,
            version,
        })
    }
}

impl std::fmt::Display for PackageManifest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}@{}", self.name, self.version)
    }
}

/// Acknowledgement of a successful publish.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PublishReceipt {
    pub package: PackageManifest,
    pub output: String,
}

/// Package-hosting service.
#[async_trait]
pub trait Registry: Send + Sync {
    /// Check `token` against the registry. Returns any output worth keeping
    /// in the report. Must not persist the credential anywhere.
    async fn login(&self, token: &Secret, env: &ExecutionEnv) -> Result<String>;

    /// Publish `manifest` from `env.workdir()`. No retries.
    async fn publish(
        &self,
        manifest: &PackageManifest,
        token: &Secret,
        env: &ExecutionEnv,
    ) -> std::result::Result<PublishReceipt, PublishFailure>;
}

/// Classify a failed publish from the tool's diagnostics.
pub fn classify_publish_error(output: &str) -> RejectionReason {
    let lower = output.to_lowercase();
    const DUPLICATE: &[&str] = &["already uploaded", "already exists"];
    const NETWORK: &[&str] = &[
        "failed to connect",
        "could not connect",
        "connection refused",
        "connection reset",
        "timed out",
        "timeout",
        "could not resolve",
        "failed to resolve",
        "dns error",
        "network",
    ];
    if DUPLICATE.iter().any(|p| lower.contains(p)) {
        RejectionReason::DuplicateVersion
    } else if NETWORK.iter().any(|p| lower.contains(p)) {
        RejectionReason::NetworkError
    } else {
        RejectionReason::Rejected
    }
}

/// API root of crates.io.
pub const DEFAULT_REGISTRY_API: &str = "https://crates.io";

#[derive(Deserialize)]
struct MeResponse {
    user: MeUser,
}

#[derive(Deserialize)]
struct MeUser {
    login: String,
}

/// Registry reached over its web API for login and through `cargo publish`
/// for uploads.
///
/// The token only ever travels in an `Authorization` header or in cargo's
/// token variable on the publish process; nothing is written to
/// `$CARGO_HOME`.
#[derive(Debug, Clone)]
pub struct CargoRegistry {
    registry_name: Option<String>,
    api_url: String,
    timeout_secs: Option<u64>,
    http_client: reqwest::Client,
}

impl CargoRegistry {
    /// crates.io, or the named registry from `.cargo/config.toml` served at
    /// `api_url`.
    pub fn new(registry_name: Option<String>, api_url: impl Into<String>) -> Result<Self> {
        let http_client = reqwest::Client::builder()
            .user_agent(concat!("shipgate/", env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            registry_name,
            api_url: api_url.into().trim_end_matches('/').to_string(),
            timeout_secs: None,
            http_client,
        })
    }

    pub fn with_timeout(mut self, timeout_secs: Option<u64>) -> Self {
        self.timeout_secs = timeout_secs;
        self
    }

    /// Variable cargo reads the publish token from.
    pub fn token_var(&self) -> String {
        match &self.registry_name {
            None => "CARGO_REGISTRY_TOKEN".to_string(),
            Some(name) => format!(
                "CARGO_REGISTRIES_{}_TOKEN",
                name.to_uppercase().replace('-', "_")
            ),
        }
    }

    fn command(&self, sub: &str) -> Vec<String> {
        let mut command = vec!["cargo".to_string(), sub.to_string()];
        if let Some(name) = &self.registry_name {
            command.push("--registry".to_string());
            command.push(name.clone());
        }
        command
    }
}

#[async_trait]
impl Registry for CargoRegistry {
    async fn login(&self, token: &Secret, _env: &ExecutionEnv) -> Result<String> {
        let url = format!("{}/api/v1/me", self.api_url);
        let mut request = self
            .http_client
            .get(&url)
            .header(reqwest::header::AUTHORIZATION, token.expose());
        if let Some(secs) = self.timeout_secs.filter(|secs| *secs > 0) {
            request = request.timeout(Duration::from_secs(secs));
        }

        let response = request
            .send()
            .await
            .map_err(|e| RegistryError::LoginFailed(format!("registry unreachable: {e}")))?;
        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(RegistryError::LoginFailed(format!(
                "credential {} rejected by {} ({status})",
                token.name(),
                self.api_url
            )));
        }
        if !status.is_success() {
            return Err(RegistryError::LoginFailed(format!("{url} returned {status}")));
        }

        match response.json::<MeResponse>().await {
            Ok(me) => Ok(format!("authenticated as {}", me.user.login)),
            Err(_) => Ok("authenticated".to_string()),
        }
    }

    async fn publish(
        &self,
        manifest: &PackageManifest,
        token: &Secret,
        env: &ExecutionEnv,
    ) -> std::result::Result<PublishReceipt, PublishFailure> {
        let config =
            StepConfig::custom("publish", self.command("publish")).with_timeout(self.timeout_secs);
        let env = env.clone().inject_as(&self.token_var(), token);
        tracing::info!(package = %manifest, "running cargo publish");

        let result = StepRunner::execute_step(&config, &env)
            .await
            .map_err(|e| PublishFailure::new(classify_publish_error(&e.to_string()), e.to_string()))?;
        if result.passed() {
            Ok(PublishReceipt {
                package: manifest.clone(),
                output: result.diagnostics(),
            })
        } else {
            let detail = result.diagnostics();
            Err(PublishFailure::new(classify_publish_error(&detail), detail))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_manifest() {
        let manifest = PackageManifest::parse(
            r#"
            [package]
            name = "demo_crate"
            version = "1.2.3"
            edition = "2021"
            "#,
        )
        .unwrap();
        assert_eq!(manifest.name, "demo_crate");
        assert_eq!(manifest.version, "1.2.3");
        assert_eq!(manifest.to_string(), "demo_crate@1.2.3");
    }

    #[test]
    fn test_parse_manifest_errors() {
        assert!(matches!(
            PackageManifest::parse("[workspace]\nmembers = []\n"),
            Err(RegistryError::Manifest(_))
        ));
        assert!(matches!(
            PackageManifest::parse("[package]\nname = \"x\"\nversion.workspace = true\n"),
            Err(RegistryError::Manifest(_))
        ));
        assert!(matches!(
            PackageManifest::parse("not toml ["),
            Err(RegistryError::Toml(_))
        ));
    }

    #[test]
    fn test_classify_publish_error() {
        assert_eq!(
            classify_publish_error("error: crate version `1.2.3` is already uploaded"),
            RejectionReason::DuplicateVersion
        );
        assert_eq!(
            classify_publish_error("error: crate foo@1.2.3 already exists on crates.io index"),
            RejectionReason::DuplicateVersion
        );
        assert_eq!(
            classify_publish_error("[6] Could not resolve hostname (Could not resolve host: crates.io)"),
            RejectionReason::NetworkError
        );
        assert_eq!(
            classify_publish_error("error: failed to verify package tarball"),
            RejectionReason::Rejected
        );
    }

    #[test]
    fn test_token_var() {
        let crates_io = CargoRegistry::new(None, DEFAULT_REGISTRY_API).unwrap();
        assert_eq!(crates_io.token_var(), "CARGO_REGISTRY_TOKEN");
        let named = CargoRegistry::new(Some("my-registry".into()), DEFAULT_REGISTRY_API).unwrap();
        assert_eq!(named.token_var(), "CARGO_REGISTRIES_MY_REGISTRY_TOKEN");
        assert_eq!(
            named.command("publish"),
            vec!["cargo", "publish", "--registry", "my-registry"]
        );
    }

    // ===== login against a local registry API =====

    use crate::secret::SecretStore;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    const VALID: &str = "cio-valid-token";

    /// Serves `GET /api/v1/me`: 200 for `VALID`, 403 for anything else.
    async fn stub_registry() -> String {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        tokio::spawn(async move {
            while let Ok((mut socket, _)) = listener.accept().await {
                let mut buf = Vec::new();
                let mut chunk = [0u8; 1024];
                loop {
                    let n = socket.read(&mut chunk).await.unwrap();
                    buf.extend_from_slice(&chunk[..n]);
                    if n == 0 || buf.windows(4).any(|w| w == b"\r\n\r\n") {
                        break;
                    }
                }
                let request = String::from_utf8_lossy(&buf).to_string();
                let authorized = request.lines().any(|line| {
                    line.split_once(':').is_some_and(|(name, value)| {
                        name.eq_ignore_ascii_case("authorization") && value.trim() == VALID
                    })
                });
                let (status, body) = if !request.starts_with("GET /api/v1/me ") {
                    ("404 Not Found", r#"{"errors":[{"detail":"Not Found"}]}"#)
                } else if authorized {
                    ("200 OK", r#"{"user":{"id":1,"login":"release-bot"}}"#)
                } else {
                    ("403 Forbidden", r#"{"errors":[{"detail":"authentication failed"}]}"#)
                };
                let response = format!(
                    "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
                    body.len()
                );
                socket.write_all(response.as_bytes()).await.unwrap();
                socket.shutdown().await.unwrap();
            }
        });
        format!("http://{addr}")
    }

    #[tokio::test]
    async fn test_login_accepts_valid_token() {
        let registry = CargoRegistry::new(None, stub_registry().await).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let output = registry
            .login(&Secret::new("CRATES_IO_TOKEN", VALID), &ExecutionEnv::new(dir.path()))
            .await
            .unwrap();
        assert_eq!(output, "authenticated as release-bot");
    }

    #[tokio::test]
    async fn test_login_rejects_invalid_token() {
        let registry = CargoRegistry::new(None, stub_registry().await).unwrap();
        let dir = tempfile::tempdir().unwrap();
        let err = registry
            .login(
                &Secret::new("CRATES_IO_TOKEN", "definitely-not-a-valid-token-XYZ"),
                &ExecutionEnv::new(dir.path()),
            )
            .await
            .unwrap_err();
        match err {
            RegistryError::LoginFailed(detail) => {
                assert!(detail.contains("403"));
                assert!(detail.contains("CRATES_IO_TOKEN"));
                assert!(!detail.contains("definitely-not-a-valid-token-XYZ"));
            }
            other => panic!("expected LoginFailed, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_login_unreachable_registry_fails() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        drop(listener);
        let registry = CargoRegistry::new(None, format!("http://{addr}"))
            .unwrap()
            .with_timeout(Some(5));
        let dir = tempfile::tempdir().unwrap();
        let result = registry
            .login(&Secret::new("CRATES_IO_TOKEN", VALID), &ExecutionEnv::new(dir.path()))
            .await;
        assert!(matches!(result, Err(RegistryError::LoginFailed(_))));
    }

    #[tokio::test]
    async fn test_login_leaves_nothing_for_later_steps() {
        let registry = CargoRegistry::new(None, stub_registry().await).unwrap();
        let cargo_home = tempfile::tempdir().unwrap();
        let home = cargo_home.path().to_str().unwrap();
        let token = Secret::new("CRATES_IO_TOKEN", VALID);
        let publish_env = ExecutionEnv::new(cargo_home.path())
            .with_var("CARGO_HOME", home)
            .with_var("HOME", home)
            .inject(&token);
        registry.login(&token, &publish_env).await.unwrap();

        assert!(!cargo_home.path().join("credentials.toml").exists());
        assert!(!cargo_home.path().join("credentials").exists());
        assert_eq!(std::fs::read_dir(cargo_home.path()).unwrap().count(), 0);

        // A build step sharing the same home sees neither a file nor a variable.
        let build_env = ExecutionEnv::new(cargo_home.path())
            .with_var("CARGO_HOME", home)
            .with_var("HOME", home)
            .strip_secrets(&SecretStore::new().with_secret(token.clone()));
        let scan = StepConfig::shell(
            "cargo-test",
            &format!(
                "if grep -rq '{}' \"$CARGO_HOME\" || [ -n \"$CRATES_IO_TOKEN\" ]; then exit 1; fi",
                VALID
            ),
        );
        let result = StepRunner::run_step(&scan, &build_env).await;
        assert!(result.passed(), "{}", result.diagnostics());
    }
}
