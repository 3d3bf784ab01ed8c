//! Append-only JSONL audit log.
//!
//! Every execution attempt the runtime makes (success, exit failure, wait
//! error, surfaced creation error, or exhausted limit fallbacks) appends
//! exactly one [`AuditEvent`] to `audit.jsonl` in the configured log
//! directory. The file is the durable record of everything the sandbox ever
//! executed: it is never truncated, rewritten, or reordered.
//!
//! Policy rejections happen before an event is assembled and are not logged
//! here; they never reach the container layer at all.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tokio::io::AsyncWriteExt;
use tracing::trace;
use uuid::Uuid;

/// Errors writing to the audit log.
#[derive(Debug, thiserror::Error)]
pub enum AuditError {
    #[error("failed to open audit log {path}: {source}")]
    Open {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to append audit record: {0}")]
    Write(#[from] std::io::Error),

    #[error("failed to serialize audit record: {0}")]
    Serialize(#[from] serde_json::Error),
}

/// One execution attempt, as recorded in the audit log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    /// Unique id for this attempt.
    pub id: Uuid,
    /// The command string as submitted.
    pub cmd: String,
    /// Wait timeout applied to the container, in seconds.
    pub timeout_secs: u64,
    /// Image the container was created from.
    pub image: String,
    /// Bind-mount destination / working directory inside the container.
    pub mount_dest: String,
    /// When the attempt finished.
    pub ts: DateTime<Utc>,
    /// Whether the command completed with exit code 0.
    pub ok: bool,
    /// Exit code, when the container ran to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i64>,
    /// Captured standard output, when the container ran to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stdout: Option<String>,
    /// Captured standard error, when the container ran to completion.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub stderr: Option<String>,
    /// Diagnostic text for wait/creation failures.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Comma-joined trail of resource limits disabled during creation
    /// (e.g. "pids,memory"), absent when no fallback occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub limits_fallback: Option<String>,
}

/// Append-only sink for [`AuditEvent`]s.
#[derive(Debug, Clone)]
pub struct AuditLog {
    path: PathBuf,
}

impl AuditLog {
    /// File name of the lifetime log inside the log directory.
    pub const FILE_NAME: &'static str = "audit.jsonl";

    /// Create an audit log rooted in `log_dir`, creating the directory if
    /// needed.
    pub fn new(log_dir: impl AsRef<Path>) -> Result<Self, AuditError> {
        let log_dir = log_dir.as_ref();
        std::fs::create_dir_all(log_dir).map_err(|e| AuditError::Open {
            path: log_dir.display().to_string(),
            source: e,
        })?;
        Ok(Self {
            path: log_dir.join(Self::FILE_NAME),
        })
    }

    /// Path of the underlying JSONL file.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append one event as a single JSON line.
    pub async fn append(&self, event: &AuditEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');

        let mut file = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)
            .await
            .map_err(|e| AuditError::Open {
                path: self.path.display().to_string(),
                source: e,
            })?;
        file.write_all(&line).await?;
        file.flush().await?;
        trace!(id = %event.id, path = %self.path.display(), "audit record appended");
        Ok(())
    }
}
