//! Resource-limit negotiation with the container host.
//!
//! Hosts vary in which cgroup controllers are mounted or delegated; rootless
//! setups commonly lack the pids or memory controller. Failing hard on the
//! first missing controller would make the sandbox unusable on such hosts,
//! so container creation runs a bounded retry loop: when the daemon's error
//! text indicates a missing controller for a limit we are still requesting,
//! that limit is dropped, the drop is recorded in the fallback trail, and
//! creation is retried.
//!
//! Daemon error wording is an unstable integration point, so the
//! classification lives entirely in [`LimitState::apply_host_error`], a pure
//! transition function over {cpu, memory, pids} x {on, off}. The runtime
//! drives it from a fixed-iteration loop.

use std::fmt;

/// Maximum container-creation attempts within one `run` call, including the
/// initial attempt.
pub const MAX_CREATE_ATTEMPTS: usize = 4;

/// A resource control the sandbox can request from the host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LimitKind {
    Cpu,
    Memory,
    Pids,
}

impl LimitKind {
    /// Name used in the audit fallback trail.
    pub fn as_str(self) -> &'static str {
        match self {
            LimitKind::Cpu => "cpu",
            LimitKind::Memory => "memory",
            LimitKind::Pids => "pids",
        }
    }
}

impl fmt::Display for LimitKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Which resource controls are currently being requested from the host.
///
/// Fresh per `run` call; mutated only by the creation retry loop.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LimitState {
    pub cpu: bool,
    pub memory: bool,
    pub pids: bool,
}

impl Default for LimitState {
    fn default() -> Self {
        Self {
            cpu: true,
            memory: true,
            pids: true,
        }
    }
}

impl LimitState {
    /// Whether a limit is currently requested.
    pub fn is_on(self, kind: LimitKind) -> bool {
        match kind {
            LimitKind::Cpu => self.cpu,
            LimitKind::Memory => self.memory,
            LimitKind::Pids => self.pids,
        }
    }

    fn without(self, kind: LimitKind) -> Self {
        match kind {
            LimitKind::Cpu => Self { cpu: false, ..self },
            LimitKind::Memory => Self {
                memory: false,
                ..self
            },
            LimitKind::Pids => Self {
                pids: false,
                ..self
            },
        }
    }

    /// Classify a daemon creation error and compute the next state.
    ///
    /// Returns the limit to drop together with the new state when the error
    /// text carries a missing-controller marker for a limit that is still
    /// on; markers are checked in pids, memory, cpu order and the first hit
    /// wins. Returns `None` when the error is not a recognized capability
    /// gap, in which case the caller surfaces it unchanged.
    pub fn apply_host_error(self, error_text: &str) -> Option<(LimitKind, LimitState)> {
        let text = error_text.to_lowercase();
        let no_such_file = text.contains("no such file");

        if self.pids
            && (text.contains("pids.max")
                || (text.contains("pids") && no_such_file)
                || text.contains("pids limit"))
        {
            return Some((LimitKind::Pids, self.without(LimitKind::Pids)));
        }
        if self.memory
            && (text.contains("memory.max")
                || (text.contains("memory") && no_such_file)
                || text.contains("memory cgroup"))
        {
            return Some((LimitKind::Memory, self.without(LimitKind::Memory)));
        }
        if self.cpu
            && (text.contains("cpu.max")
                || text.contains("cfs_quota")
                || (text.contains("cpu") && no_such_file))
        {
            return Some((LimitKind::Cpu, self.without(LimitKind::Cpu)));
        }
        None
    }
}

/// Parse a human-readable memory ceiling ("512m", "2g", "1024k", "4096")
/// into bytes.
pub fn parse_mem_limit(value: &str) -> Result<i64, String> {
    let value = value.trim().to_lowercase();
    if value.is_empty() {
        return Err("empty memory limit".to_string());
    }

    let (digits, multiplier) = match value.bytes().last() {
        Some(b'k') => (&value[..value.len() - 1], 1024i64),
        Some(b'm') => (&value[..value.len() - 1], 1024 * 1024),
        Some(b'g') => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        Some(b'b') => (&value[..value.len() - 1], 1),
        _ => (value.as_str(), 1),
    };

    let n: i64 = digits
        .parse()
        .map_err(|_| format!("invalid memory limit '{value}'"))?;
    if n <= 0 {
        return Err(format!("memory limit must be positive, got '{value}'"));
    }
    n.checked_mul(multiplier)
        .ok_or_else(|| format!("memory limit '{value}' overflows"))
}
