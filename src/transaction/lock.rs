//! Advisory single-writer lock for a workspace.
//!
//! Two transactions rolling back the same workspace concurrently would
//! interleave deletes and restores, so `begin` takes an exclusive advisory
//! file lock keyed by the canonical workspace path before snapshotting. The
//! lock file lives in a fixed location derived from that path alone, so
//! transactions contend on the same file no matter where each one keeps its
//! snapshots. The lock is advisory; it does not stop unrelated tools from
//! touching the workspace.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};

use fs4::FileExt;
use sha2::{Digest, Sha256};
use tracing::warn;

use crate::transaction::TransactionError;

/// Held exclusive lock on a workspace. Released on drop.
#[derive(Debug)]
pub struct WorkspaceLock {
    file: File,
    lock_path: PathBuf,
}

impl WorkspaceLock {
    /// Acquire the exclusive lock for `workspace`, failing immediately if
    /// another holder exists.
    ///
    /// `workspace` should already be canonicalized so every spelling of the
    /// same directory maps to the same lock file.
    pub fn acquire(workspace: &Path) -> Result<Self, TransactionError> {
        let lock_dir = std::env::temp_dir().join("ironbox-locks");
        std::fs::create_dir_all(&lock_dir).map_err(|e| TransactionError::LockIo {
            path: lock_dir.display().to_string(),
            source: e,
        })?;

        let digest = format!(
            "{:x}",
            Sha256::digest(workspace.as_os_str().as_encoded_bytes())
        );
        let lock_path = lock_dir.join(format!("workspace-{}.lock", &digest[..16]));

        let file = OpenOptions::new()
            .create(true)
            .write(true)
            .truncate(false)
            .open(&lock_path)
            .map_err(|e| TransactionError::LockIo {
                path: lock_path.display().to_string(),
                source: e,
            })?;

        file.try_lock_exclusive()
            .map_err(|_| TransactionError::WorkspaceBusy {
                path: workspace.display().to_string(),
            })?;

        Ok(Self { file, lock_path })
    }

    /// Path of the lock file backing this lock.
    pub fn path(&self) -> &Path {
        &self.lock_path
    }
}

impl Drop for WorkspaceLock {
    fn drop(&mut self) {
        // The lock file itself stays in place; removing it would race other
        // acquirers that already opened it.
        if let Err(e) = self.file.unlock() {
            warn!(path = %self.lock_path.display(), error = %e, "failed to release workspace lock");
        }
    }
}
