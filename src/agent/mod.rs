//! Retry harness for generate-then-verify workflows.
//!
//! A [`Collaborator`] produces candidate files into the workspace and names
//! the commands that verify them. The [`RetryHarness`] wraps each attempt in
//! a workspace transaction: preparation and verification both run inside the
//! transaction scope, so a failed attempt rolls the workspace back to its
//! pre-attempt state before the next try. Attempts are bounded; exhausting
//! them is a normal `false` outcome, not an error.

use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::runtime::DockerSandbox;
use crate::transaction::{Transaction, TxOutcome};

/// A participant that writes candidate work into the workspace and knows how
/// to verify it.
#[async_trait]
pub trait Collaborator: Send {
    /// Write this attempt's candidate files into `workspace`.
    ///
    /// Called once per attempt, always on a workspace rolled back to its
    /// original state.
    async fn prepare(&mut self, workspace: &Path) -> anyhow::Result<()>;

    /// Commands that must all succeed for the attempt to count.
    fn verification(&self) -> Vec<String>;
}

/// Drives a collaborator through bounded, transactional attempts.
pub struct RetryHarness<'a> {
    sandbox: &'a DockerSandbox,
    snapshot_dir: PathBuf,
    timeout: Duration,
    max_attempts: u32,
}

impl<'a> RetryHarness<'a> {
    pub const DEFAULT_MAX_ATTEMPTS: u32 = 3;

    pub fn new(sandbox: &'a DockerSandbox, snapshot_dir: impl Into<PathBuf>) -> Self {
        Self {
            sandbox,
            snapshot_dir: snapshot_dir.into(),
            timeout: Duration::from_secs(15),
            max_attempts: Self::DEFAULT_MAX_ATTEMPTS,
        }
    }

    pub fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    /// Run attempts until one commits or attempts are exhausted.
    ///
    /// Returns `true` when an attempt committed. `Err` is reserved for the
    /// transaction layer itself failing (lock, snapshot, or rollback).
    pub async fn drive(&self, collaborator: &mut dyn Collaborator) -> anyhow::Result<bool> {
        let workspace = self.sandbox.workspace().to_path_buf();

        for attempt in 1..=self.max_attempts {
            let commands = collaborator.verification();
            let outcome = Transaction::scope(&workspace, &self.snapshot_dir, async {
                collaborator.prepare(&workspace).await?;
                let sequence = self.sandbox.run_sequence(&commands, self.timeout).await?;
                match sequence {
                    s if s.ok() => Ok::<(), anyhow::Error>(()),
                    s => anyhow::bail!("verification failed: {s:?}"),
                }
            })
            .await?;

            match outcome {
                TxOutcome::Committed(()) => {
                    info!(attempt, "attempt verified and committed");
                    return Ok(true);
                }
                TxOutcome::RolledBack => {
                    warn!(attempt, max = self.max_attempts, "attempt rolled back");
                }
            }
        }
        Ok(false)
    }
}
