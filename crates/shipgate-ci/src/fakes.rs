//! In-memory registry for tests.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Mutex;

use async_trait::async_trait;
use shipgate_core::RejectionReason;

use crate::registry::{PackageManifest, PublishFailure, PublishReceipt, Registry, RegistryError, Result};
use crate::runner::ExecutionEnv;
use crate::secret::Secret;

/// In-memory `Registry` that accepts one token and records what was published.
#[derive(Debug)]
pub struct MemoryRegistry {
    valid_token: String,
    published: Mutex<Vec<PackageManifest>>,
    versions: Mutex<HashSet<(String, String)>>,
    network_down: AtomicBool,
    login_attempts: AtomicUsize,
    publish_attempts: AtomicUsize,
}

impl MemoryRegistry {
    pub fn new(valid_token: &str) -> Self {
        Self {
            valid_token: valid_token.to_string(),
            published: Mutex::new(Vec::new()),
            versions: Mutex::new(HashSet::new()),
            network_down: AtomicBool::new(false),
            login_attempts: AtomicUsize::new(0),
            publish_attempts: AtomicUsize::new(0),
        }
    }

    /// Pretend `name@version` was published earlier.
    pub fn with_existing(self, name: &str, version: &str) -> Self {
        self.versions
            .lock()
            .unwrap()
            .insert((name.to_string(), version.to_string()));
        self
    }

    /// Make every publish fail with a network error.
    pub fn set_network_down(&self, down: bool) {
        self.network_down.store(down, Ordering::SeqCst);
    }

    /// Packages accepted by this registry, in order.
    pub fn published(&self) -> Vec<PackageManifest> {
        self.published.lock().unwrap().clone()
    }

    pub fn login_attempts(&self) -> usize {
        self.login_attempts.load(Ordering::SeqCst)
    }

    pub fn publish_attempts(&self) -> usize {
        self.publish_attempts.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Registry for MemoryRegistry {
    async fn login(&self, token: &Secret, _env: &ExecutionEnv) -> Result<String> {
        self.login_attempts.fetch_add(1, Ordering::SeqCst);
        if token.expose() == self.valid_token {
            Ok("Login token accepted".to_string())
        } else {
            Err(RegistryError::LoginFailed("invalid token".to_string()))
        }
    }

    async fn publish(
        &self,
        manifest: &PackageManifest,
        token: &Secret,
        _env: &ExecutionEnv,
    ) -> std::result::Result<PublishReceipt, PublishFailure> {
        self.publish_attempts.fetch_add(1, Ordering::SeqCst);
        if self.network_down.load(Ordering::SeqCst) {
            return Err(PublishFailure::new(
                RejectionReason::NetworkError,
                "failed to connect to registry",
            ));
        }
        if token.expose() != self.valid_token {
            return Err(PublishFailure::new(
                RejectionReason::Rejected,
                "authentication required",
            ));
        }

        let id = (manifest.name.clone(), manifest.version.clone());
        if !self.versions.lock().unwrap().insert(id) {
            return Err(PublishFailure::new(
                RejectionReason::DuplicateVersion,
                format!("crate version `{}` is already uploaded", manifest.version),
            ));
        }
        self.published.lock().unwrap().push(manifest.clone());
        Ok(PublishReceipt {
            package: manifest.clone(),
            output: format!("Uploaded {manifest}"),
        })
    }
}
