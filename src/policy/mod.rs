//! Command execution policy for the sandbox.
//!
//! A [`SandboxPolicy`] combines three independent controls:
//! - an allowlist of base executables (first token of the command, path
//!   prefix stripped), skipped entirely when the allow set is empty,
//! - an ordered denylist of regex patterns scanned against the whole
//!   command string, evaluated even when the allowlist passed,
//! - an allowlist of environment variable names permitted to cross into
//!   the container.
//!
//! The policy is immutable once built and shared read-only by the runtime.
//! `check` is a pure function: no side effects, safe to call repeatedly.

use std::collections::HashSet;
use std::path::Path;

use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::warn;

/// A command was rejected by the sandbox policy.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum PolicyViolation {
    /// The command string was empty or whitespace-only.
    #[error("empty command not allowed")]
    EmptyCommand,

    /// The base executable is not in a non-empty allowlist.
    #[error("executable '{0}' is not in the allowlist")]
    NotAllowlisted(String),

    /// The command string matched a deny pattern.
    #[error("command matches denied pattern: {pattern}")]
    DeniedPattern { pattern: String },
}

/// Errors building a policy from its raw configuration form.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read policy file {path}: {source}")]
    Read {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("failed to parse policy file: {0}")]
    Parse(#[from] serde_yaml::Error),

    #[error("invalid deny pattern '{pattern}': {reason}")]
    InvalidDenyPattern { pattern: String, reason: String },
}

/// Raw, serializable form of a policy, as found in a YAML policy file.
///
/// Compiled into a [`SandboxPolicy`] via [`PolicySpec::build`], which is
/// where deny regexes are validated.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PolicySpec {
    /// Allowed base executables. Empty means the allowlist check is skipped.
    #[serde(default)]
    pub allow: Vec<String>,
    /// Regex patterns that must not appear anywhere in a command string.
    #[serde(default)]
    pub deny_patterns: Vec<String>,
    /// Environment variable names allowed to pass into the container.
    #[serde(default)]
    pub env_allowlist: Vec<String>,
    /// Subdirectory of the workspace mount to use as the working directory.
    #[serde(default)]
    pub working_subdir: String,
}

impl PolicySpec {
    /// Compile the raw spec into an enforceable policy.
    pub fn build(self) -> Result<SandboxPolicy, ConfigError> {
        let deny = self
            .deny_patterns
            .into_iter()
            .map(|pattern| {
                Regex::new(&pattern).map_err(|e| ConfigError::InvalidDenyPattern {
                    pattern: pattern.clone(),
                    reason: e.to_string(),
                })
            })
            .collect::<Result<Vec<_>, _>>()?;

        Ok(SandboxPolicy {
            allow: self.allow.into_iter().collect(),
            deny,
            env_allowlist: self.env_allowlist.into_iter().collect(),
            working_subdir: self.working_subdir,
        })
    }
}

/// Execution policy enforced before any container is created.
#[derive(Debug, Clone)]
pub struct SandboxPolicy {
    /// Allowed base executables.
    allow: HashSet<String>,
    /// Deny patterns, evaluated in declaration order; first match wins.
    deny: Vec<Regex>,
    /// Environment variable names allowed into the container.
    env_allowlist: HashSet<String>,
    /// Subdirectory of the workspace mount used as the working directory.
    working_subdir: String,
}

impl Default for SandboxPolicy {
    fn default() -> Self {
        PolicySpec {
            allow: ["python", "python3", "bash", "sh", "cat", "echo"]
                .into_iter()
                .map(String::from)
                .collect(),
            deny_patterns: vec![
                // Destructive root wipe
                r"rm\s+-rf\s+/".to_string(),
                // Classic fork bomb
                r":\(\)\s*\{\s*:\s*\|\s*:\s*&\s*\};\s*:".to_string(),
            ],
            env_allowlist: vec!["PYTHONUNBUFFERED".to_string()],
            working_subdir: String::new(),
        }
        .build()
        .unwrap_or_else(|_| unreachable!("default deny patterns are valid regexes"))
    }
}

impl SandboxPolicy {
    /// Load a policy from a YAML file.
    ///
    /// Missing keys fall back to empty values, not to the built-in defaults:
    /// a policy file describes the complete rule set.
    pub fn from_yaml_file(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.display().to_string(),
            source: e,
        })?;
        let spec: PolicySpec = serde_yaml::from_str(&raw)?;
        let policy = spec.build()?;
        if policy.allow.is_empty() {
            warn!(
                path = %path.display(),
                "policy allowlist is empty: allowlist check disabled, denylist-only enforcement"
            );
        }
        Ok(policy)
    }

    /// Check a command string against the allowlist and deny patterns.
    ///
    /// The denylist is authoritative: it is scanned even when the allowlist
    /// check passed. When the allow set is empty the allowlist check is
    /// skipped (fail-open by design, for denylist-only deployments).
    pub fn check(&self, command: &str) -> Result<(), PolicyViolation> {
        let stripped = command.trim();
        if stripped.is_empty() {
            return Err(PolicyViolation::EmptyCommand);
        }

        // First whitespace-delimited token, with any path prefix removed.
        let base = stripped.split_whitespace().next().unwrap_or(stripped);
        let exe = Path::new(base)
            .file_name()
            .and_then(|n| n.to_str())
            .unwrap_or(base);

        if !self.allow.is_empty() && !self.allow.contains(exe) {
            return Err(PolicyViolation::NotAllowlisted(exe.to_string()));
        }

        for pattern in &self.deny {
            if pattern.is_match(stripped) {
                return Err(PolicyViolation::DeniedPattern {
                    pattern: pattern.as_str().to_string(),
                });
            }
        }

        Ok(())
    }

    /// Host environment variables whose names appear in the env allowlist.
    ///
    /// These are the only variables injected into containers.
    pub fn whitelisted_env(&self) -> Vec<(String, String)> {
        std::env::vars()
            .filter(|(name, _)| self.env_allowlist.contains(name))
            .collect()
    }

    /// The configured workspace subdirectory (possibly empty).
    pub fn working_subdir(&self) -> &str {
        &self.working_subdir
    }

    /// Whether the allowlist check is active.
    pub fn allowlist_enforced(&self) -> bool {
        !self.allow.is_empty()
    }
}
