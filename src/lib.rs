//! Locked-down ephemeral Docker sandbox for untrusted, machine-generated code.
//!
//! Each command runs in a fresh container that is force-removed afterwards,
//! with the host workspace bind-mounted read-write and everything else
//! restricted: non-root user, all capabilities dropped, read-only root
//! filesystem, network off by default, cpu/memory/pids ceilings with
//! bounded fallback when the host lacks a cgroup controller.
//!
//! # Architecture
//!
//! - [`policy`]: allowlist/denylist command policy, checked before any
//!   container exists.
//! - [`audit`]: append-only JSONL record of every execution attempt.
//! - [`runtime`]: the [`DockerSandbox`] itself, covering container
//!   lifecycle, limit negotiation, and output capture.
//! - [`transaction`]: snapshot/commit/rollback of the workspace, with an
//!   exclusive per-workspace lock.
//! - [`agent`]: bounded generate-then-verify retry loop built on the
//!   sandbox and transactions.
//!
//! # Example
//!
//! ```no_run
//! use std::time::Duration;
//! use ironbox::DockerSandboxBuilder;
//!
//! # async fn demo() -> anyhow::Result<()> {
//! let sandbox = DockerSandboxBuilder::new("ai-sandbox:py312", "./workspace")
//!     .mem_limit("512m")
//!     .build()?;
//!
//! let result = sandbox.run("python main.py", Duration::from_secs(10)).await?;
//! if let Some(output) = result.output() {
//!     println!("exit {}: {}", output.exit_code, output.stdout);
//! }
//! # Ok(())
//! # }
//! ```

pub mod agent;
pub mod audit;
pub mod error;
pub mod policy;
pub mod runtime;
pub mod transaction;

pub use agent::{Collaborator, RetryHarness};
pub use audit::{AuditEvent, AuditLog};
pub use error::{Error, Result};
pub use policy::{ConfigError, PolicySpec, PolicyViolation, SandboxPolicy};
pub use runtime::{
    CommandOutput, DockerSandbox, DockerSandboxBuilder, ExecutionResult, SandboxError,
    SequenceOutcome,
};
pub use transaction::{Transaction, TransactionError, TxOutcome};
