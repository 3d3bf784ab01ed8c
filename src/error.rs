//! Crate-wide error type.
//!
//! Each layer keeps its own error enum; this umbrella exists for callers
//! that want a single `?`-friendly type across policy, configuration,
//! runtime, transaction, and audit failures.

use crate::audit::AuditError;
use crate::policy::{ConfigError, PolicyViolation};
use crate::runtime::SandboxError;
use crate::transaction::TransactionError;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("Policy error: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    #[error("Sandbox error: {0}")]
    Sandbox(#[from] SandboxError),

    #[error("Transaction error: {0}")]
    Transaction(#[from] TransactionError),

    #[error("Audit error: {0}")]
    Audit(#[from] AuditError),
}

pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_policy_violation_wraps() {
        let err: Error = PolicyViolation::EmptyCommand.into();
        assert!(matches!(err, Error::Policy(_)));
        assert!(err.to_string().starts_with("Policy error:"));
    }

    #[test]
    fn test_transaction_error_wraps() {
        let err: Error = TransactionError::WorkspaceBusy {
            path: "/tmp/ws".to_string(),
        }
        .into();
        assert!(matches!(err, Error::Transaction(_)));
    }

    #[test]
    fn test_sandbox_error_wraps() {
        let err: Error = SandboxError::Config {
            reason: "bad".to_string(),
        }
        .into();
        assert!(err.to_string().contains("Sandbox error"));
    }
}
