//! Per-stage temporary checkouts.

use std::path::{Path, PathBuf};
use std::time::Instant;

use anyhow::Context;
use shipgate_core::StepResult;
use tempfile::TempDir;

/// Name of the checkout step in every stage.
pub const CHECKOUT_STEP: &str = "checkout";

/// A fresh clone of one revision in its own temporary directory.
///
/// The directory is removed when the value is dropped. Two checkouts never
/// share a working tree, even for the same revision.
#[derive(Debug)]
pub struct IsolatedCheckout {
    _dir: TempDir,
    root: PathBuf,
    revision: String,
}

impl IsolatedCheckout {
    /// Failing here is an infrastructure fault, not a step failure.
    fn allocate() -> anyhow::Result<(TempDir, PathBuf)> {
        let dir = tempfile::Builder::new()
            .prefix("shipgate-")
            .tempdir()
            .context("create checkout directory")?;
        let root = dir.path().join("checkout");
        Ok((dir, root))
    }

    /// Clone `source` into a new temporary directory at `revision`.
    ///
    /// The returned `StepResult` describes the checkout step; on failure no
    /// checkout is returned.
    pub async fn create(
        source: &str,
        revision: &str,
    ) -> anyhow::Result<(Option<IsolatedCheckout>, StepResult)> {
        let start = Instant::now();
        let (dir, root) = Self::allocate()?;

        let clone_source = source.to_string();
        let clone_revision = revision.to_string();
        let clone_root = root.clone();
        let cloned = tokio::task::spawn_blocking(move || {
            shipgate_core::checkout_revision(&clone_source, &clone_revision, &clone_root)
        })
        .await
        .context("checkout task panicked")?;

        let elapsed = start.elapsed().as_millis() as u64;
        match cloned {
            Ok(()) => {
                let step = StepResult::passed_with(
                    CHECKOUT_STEP,
                    format!("checked out {} into {}", revision, root.display()),
                    elapsed,
                );
                let checkout = IsolatedCheckout {
                    _dir: dir,
                    root,
                    revision: revision.to_string(),
                };
                Ok((Some(checkout), step))
            }
            Err(e) => Ok((None, StepResult::failed_with(CHECKOUT_STEP, e.to_string(), elapsed))),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn revision(&self) -> &str {
        &self.revision
    }
}
