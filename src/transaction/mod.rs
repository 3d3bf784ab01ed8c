//! Workspace transactions: snapshot, commit, roll back.
//!
//! A transaction brackets a unit of work against a host workspace
//! directory. `begin` takes an exclusive lock on the workspace and archives
//! its full contents to a tar.gz snapshot; `commit` discards the snapshot;
//! `roll_back` restores the workspace to the snapshot byte-for-byte and
//! then discards it. The [`Transaction::scope`] combinator drives the whole
//! cycle around a fallible future and reports which way it went as a
//! [`TxOutcome`] value rather than burying the rollback in error plumbing.
//!
//! Snapshots are plain tar.gz files under a caller-chosen directory, one
//! per transaction, deleted on both commit and rollback.

pub mod lock;

use std::fmt::Display;
use std::path::{Path, PathBuf};

use flate2::Compression;
use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::transaction::lock::WorkspaceLock;

/// Top-level entry name inside every snapshot archive.
const SNAPSHOT_ROOT: &str = "workspace";

/// Errors from the transaction layer.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// Another transaction currently holds the workspace.
    #[error("workspace {path} is locked by another transaction")]
    WorkspaceBusy { path: String },

    #[error("lock file error at {path}: {source}")]
    LockIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("snapshot failed for {path}: {source}")]
    Snapshot {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The workspace could not be restored; it may be in a partial state.
    #[error("rollback failed: {detail}")]
    RollbackFailed { detail: String },
}

/// How a transactional scope ended.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TxOutcome<T> {
    /// The work succeeded; workspace changes were kept.
    Committed(T),
    /// The work failed; the workspace was restored to its snapshot.
    RolledBack,
}

impl<T> TxOutcome<T> {
    pub fn is_committed(&self) -> bool {
        matches!(self, TxOutcome::Committed(_))
    }

    pub fn into_committed(self) -> Option<T> {
        match self {
            TxOutcome::Committed(v) => Some(v),
            TxOutcome::RolledBack => None,
        }
    }
}

/// An open transaction holding a workspace lock and a snapshot.
///
/// Must be consumed by [`Transaction::commit`] or [`Transaction::roll_back`].
#[derive(Debug)]
pub struct Transaction {
    workspace: PathBuf,
    snapshot_path: PathBuf,
    _lock: WorkspaceLock,
}

impl Transaction {
    /// Lock `workspace` and snapshot its contents into `snapshot_dir`.
    pub fn begin(
        workspace: impl AsRef<Path>,
        snapshot_dir: impl AsRef<Path>,
    ) -> Result<Self, TransactionError> {
        let workspace = workspace
            .as_ref()
            .canonicalize()
            .map_err(|e| TransactionError::Snapshot {
                path: workspace.as_ref().display().to_string(),
                source: e,
            })?;
        let snapshot_dir = snapshot_dir.as_ref();
        std::fs::create_dir_all(snapshot_dir).map_err(|e| TransactionError::Snapshot {
            path: snapshot_dir.display().to_string(),
            source: e,
        })?;

        let lock = WorkspaceLock::acquire(&workspace)?;

        let snapshot_path = snapshot_dir.join(format!("ws-{}.tar.gz", Uuid::new_v4()));
        if let Err(e) = archive_tree(&workspace, &snapshot_path) {
            // Don't leave a partial archive behind.
            let _ = std::fs::remove_file(&snapshot_path);
            return Err(TransactionError::Snapshot {
                path: workspace.display().to_string(),
                source: e,
            });
        }
        debug!(
            workspace = %workspace.display(),
            snapshot = %snapshot_path.display(),
            "transaction began"
        );

        Ok(Self {
            workspace,
            snapshot_path,
            _lock: lock,
        })
    }

    /// Path of the snapshot archive backing this transaction.
    pub fn snapshot_path(&self) -> &Path {
        &self.snapshot_path
    }

    /// Keep the workspace as-is and discard the snapshot.
    pub fn commit(self) {
        if let Err(e) = std::fs::remove_file(&self.snapshot_path) {
            warn!(
                snapshot = %self.snapshot_path.display(),
                error = %e,
                "failed to delete snapshot on commit"
            );
        }
        debug!(workspace = %self.workspace.display(), "transaction committed");
    }

    /// Restore the workspace to its snapshot, then discard the snapshot.
    ///
    /// `cause` is recorded in the log line for the rollback. Staging and
    /// snapshot files are cleaned up whether or not the restore succeeds.
    pub fn roll_back(self, cause: &dyn Display) -> Result<(), TransactionError> {
        let staging =
            std::env::temp_dir().join(format!("ironbox-restore-{}", Uuid::new_v4()));

        let restore = restore_tree(&self.snapshot_path, &staging, &self.workspace);

        if let Err(e) = std::fs::remove_dir_all(&staging) {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(staging = %staging.display(), error = %e, "failed to remove restore staging");
            }
        }
        if let Err(e) = std::fs::remove_file(&self.snapshot_path) {
            warn!(
                snapshot = %self.snapshot_path.display(),
                error = %e,
                "failed to delete snapshot after rollback"
            );
        }

        match restore {
            Ok(()) => {
                warn!(
                    workspace = %self.workspace.display(),
                    cause = %cause,
                    "rolled back workspace due to error"
                );
                Ok(())
            }
            Err(e) => Err(TransactionError::RollbackFailed {
                detail: format!("restoring {}: {e}", self.workspace.display()),
            }),
        }
    }

    /// Run `work` inside a transaction on `workspace`.
    ///
    /// `work` is not polled until the lock is held and the snapshot exists,
    /// so an `async` block can be passed directly. On `Ok` the transaction
    /// commits and the value is returned as [`TxOutcome::Committed`]; on
    /// `Err` the workspace is rolled back and [`TxOutcome::RolledBack`] is
    /// returned. Only transaction-layer failures surface as this function's
    /// `Err`.
    pub async fn scope<T, E, Fut>(
        workspace: &Path,
        snapshot_dir: &Path,
        work: Fut,
    ) -> Result<TxOutcome<T>, TransactionError>
    where
        Fut: Future<Output = Result<T, E>>,
        E: Display,
    {
        let tx = Transaction::begin(workspace, snapshot_dir)?;
        match work.await {
            Ok(value) => {
                tx.commit();
                info!(workspace = %workspace.display(), "transaction scope committed");
                Ok(TxOutcome::Committed(value))
            }
            Err(cause) => match tx.roll_back(&cause) {
                Ok(()) => Ok(TxOutcome::RolledBack),
                Err(e) => {
                    error!(workspace = %workspace.display(), error = %e, "rollback failed");
                    Err(e)
                }
            },
        }
    }
}

fn archive_tree(workspace: &Path, snapshot_path: &Path) -> std::io::Result<()> {
    let file = std::fs::File::create(snapshot_path)?;
    let encoder = GzEncoder::new(file, Compression::default());
    let mut builder = tar::Builder::new(encoder);
    builder.append_dir_all(SNAPSHOT_ROOT, workspace)?;
    builder.into_inner()?.finish()?;
    Ok(())
}

fn restore_tree(snapshot_path: &Path, staging: &Path, workspace: &Path) -> std::io::Result<()> {
    std::fs::create_dir_all(staging)?;
    let file = std::fs::File::open(snapshot_path)?;
    let mut archive = tar::Archive::new(GzDecoder::new(file));
    archive.unpack(staging)?;

    clear_dir(workspace)?;
    copy_tree(&staging.join(SNAPSHOT_ROOT), workspace)?;
    Ok(())
}

/// Remove every entry of `dir` without removing `dir` itself.
fn clear_dir(dir: &Path) -> std::io::Result<()> {
    for entry in std::fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        let meta = match std::fs::symlink_metadata(&path) {
            Ok(m) => m,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
            Err(e) => return Err(e),
        };
        let result = if meta.is_dir() {
            std::fs::remove_dir_all(&path)
        } else {
            std::fs::remove_file(&path)
        };
        if let Err(e) = result {
            if e.kind() != std::io::ErrorKind::NotFound {
                return Err(e);
            }
        }
    }
    Ok(())
}

fn copy_tree(src: &Path, dst: &Path) -> std::io::Result<()> {
    if !src.exists() {
        // Snapshot of an empty workspace has no root entry payload.
        return Ok(());
    }
    for entry in std::fs::read_dir(src)? {
        let entry = entry?;
        let from = entry.path();
        let to = dst.join(entry.file_name());
        if entry.file_type()?.is_dir() {
            std::fs::create_dir_all(&to)?;
            copy_tree(&from, &to)?;
        } else {
            std::fs::copy(&from, &to)?;
            // fs::copy carries permissions but not timestamps.
            let modified = entry.metadata()?.modified()?;
            std::fs::File::options()
                .write(true)
                .open(&to)?
                .set_modified(modified)?;
        }
    }
    Ok(())
}
