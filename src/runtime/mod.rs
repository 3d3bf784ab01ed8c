//! Ephemeral Docker sandbox runtime.
//!
//! [`DockerSandbox`] runs one untrusted shell command per container against
//! a fixed image, with the host workspace bind-mounted read-write and
//! everything else locked down: non-root user, all capabilities dropped,
//! read-only root filesystem, network disabled by default, cpu/memory/pids
//! ceilings. Containers are ephemeral; every call creates a fresh one and
//! force-removes it on the way out, on every path.
//!
//! Container creation negotiates resource limits with the host: when the
//! daemon rejects creation with a recognizable missing-cgroup-controller
//! error, the offending limit is dropped and creation retried, bounded by
//! [`limits::MAX_CREATE_ATTEMPTS`]. Every attempt, including those that
//! needed fallbacks, lands in the append-only audit log exactly once.

pub mod container;
pub mod limits;
pub mod mounts;

use std::fmt;
use std::path::{Path, PathBuf};
use std::time::Duration;

use bollard::Docker;
use bollard::container::Config;
use bollard::errors::Error as DockerError;
use chrono::Utc;
use futures::StreamExt;
use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::audit::{AuditError, AuditEvent, AuditLog};
use crate::policy::{PolicyViolation, SandboxPolicy};
use crate::runtime::container::ContainerSpec;
use crate::runtime::limits::{LimitState, MAX_CREATE_ATTEMPTS, parse_mem_limit};

/// Errors constructing or operating the sandbox.
#[derive(Debug, thiserror::Error)]
pub enum SandboxError {
    #[error("policy violation: {0}")]
    Policy(#[from] PolicyViolation),

    #[error("docker daemon not available: {reason}")]
    DockerNotAvailable { reason: String },

    #[error("invalid sandbox configuration: {reason}")]
    Config { reason: String },

    #[error("workspace {path} unusable: {source}")]
    Workspace {
        path: String,
        #[source]
        source: std::io::Error,
    },

    #[error("audit log failure: {0}")]
    Audit(#[from] AuditError),
}

/// Captured output of a container that ran to completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i64,
    pub stdout: String,
    pub stderr: String,
}

/// Outcome of one execution attempt.
///
/// Distinguishes the command failing (the container ran, exit code nonzero)
/// from the infrastructure failing to run it at all. Policy violations and
/// audit failures are not outcomes; they surface as [`SandboxError`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ExecutionResult {
    /// Container ran to completion with exit code 0.
    Success(CommandOutput),
    /// Container ran to completion with a nonzero exit code.
    CommandFailed(CommandOutput),
    /// The container could not be created, started, or awaited.
    Infrastructure { detail: String },
}

impl ExecutionResult {
    /// True only for a zero exit code.
    pub fn ok(&self) -> bool {
        matches!(self, ExecutionResult::Success(_))
    }

    /// The captured output, when the container ran to completion.
    pub fn output(&self) -> Option<&CommandOutput> {
        match self {
            ExecutionResult::Success(out) | ExecutionResult::CommandFailed(out) => Some(out),
            ExecutionResult::Infrastructure { .. } => None,
        }
    }
}

/// Outcome of running a command sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SequenceOutcome {
    /// Every command succeeded.
    Completed,
    /// A command did not succeed; later commands were not executed.
    Stopped {
        command: String,
        result: ExecutionResult,
    },
}

impl SequenceOutcome {
    pub fn ok(&self) -> bool {
        matches!(self, SequenceOutcome::Completed)
    }
}

/// Builder for [`DockerSandbox`].
pub struct DockerSandboxBuilder {
    image: String,
    workspace: PathBuf,
    policy: SandboxPolicy,
    cpus: f64,
    mem_limit: String,
    pids_limit: i64,
    network_enabled: bool,
    log_dir: PathBuf,
}

impl DockerSandboxBuilder {
    pub fn new(image: impl Into<String>, workspace: impl Into<PathBuf>) -> Self {
        Self {
            image: image.into(),
            workspace: workspace.into(),
            policy: SandboxPolicy::default(),
            cpus: 1.0,
            mem_limit: "512m".to_string(),
            pids_limit: 128,
            network_enabled: false,
            log_dir: PathBuf::from("./logs"),
        }
    }

    pub fn policy(mut self, policy: SandboxPolicy) -> Self {
        self.policy = policy;
        self
    }

    pub fn cpus(mut self, cpus: f64) -> Self {
        self.cpus = cpus;
        self
    }

    /// Memory ceiling in human form, e.g. "512m" or "2g".
    pub fn mem_limit(mut self, limit: impl Into<String>) -> Self {
        self.mem_limit = limit.into();
        self
    }

    pub fn pids_limit(mut self, limit: i64) -> Self {
        self.pids_limit = limit;
        self
    }

    pub fn network_enabled(mut self, enabled: bool) -> Self {
        self.network_enabled = enabled;
        self
    }

    pub fn log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Validate the configuration and connect to the Docker daemon.
    pub fn build(self) -> Result<DockerSandbox, SandboxError> {
        std::fs::create_dir_all(&self.workspace).map_err(|e| SandboxError::Workspace {
            path: self.workspace.display().to_string(),
            source: e,
        })?;
        let workspace = self
            .workspace
            .canonicalize()
            .map_err(|e| SandboxError::Workspace {
                path: self.workspace.display().to_string(),
                source: e,
            })?;

        let memory_bytes =
            parse_mem_limit(&self.mem_limit).map_err(|reason| SandboxError::Config { reason })?;
        if self.cpus <= 0.0 {
            return Err(SandboxError::Config {
                reason: format!("cpus must be positive, got {}", self.cpus),
            });
        }
        if self.pids_limit <= 0 {
            return Err(SandboxError::Config {
                reason: format!("pids limit must be positive, got {}", self.pids_limit),
            });
        }

        let audit = AuditLog::new(&self.log_dir)?;

        let docker = Docker::connect_with_local_defaults().map_err(|e| {
            SandboxError::DockerNotAvailable {
                reason: e.to_string(),
            }
        })?;

        Ok(DockerSandbox {
            docker,
            image: self.image,
            workspace,
            policy: self.policy,
            cpus: self.cpus,
            memory_bytes,
            pids_limit: self.pids_limit,
            network_enabled: self.network_enabled,
            audit,
        })
    }
}

/// The sandbox itself. Cheap to share by reference; all state is immutable
/// after construction.
pub struct DockerSandbox {
    docker: Docker,
    image: String,
    workspace: PathBuf,
    policy: SandboxPolicy,
    cpus: f64,
    memory_bytes: i64,
    pids_limit: i64,
    network_enabled: bool,
    audit: AuditLog,
}

impl fmt::Debug for DockerSandbox {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DockerSandbox")
            .field("image", &self.image)
            .field("workspace", &self.workspace)
            .field("cpus", &self.cpus)
            .field("memory_bytes", &self.memory_bytes)
            .field("pids_limit", &self.pids_limit)
            .field("network_enabled", &self.network_enabled)
            .finish_non_exhaustive()
    }
}

impl DockerSandbox {
    /// Canonicalized host workspace directory.
    pub fn workspace(&self) -> &Path {
        &self.workspace
    }

    pub fn image(&self) -> &str {
        &self.image
    }

    pub fn audit_log(&self) -> &AuditLog {
        &self.audit
    }

    pub fn policy(&self) -> &SandboxPolicy {
        &self.policy
    }

    /// Bind-mount destination inside the container.
    pub fn mount_dest(&self) -> String {
        mounts::mount_dest(self.policy.working_subdir())
    }

    fn container_spec(&self, command: &str) -> ContainerSpec {
        let working_dir = self.mount_dest();
        ContainerSpec {
            image: self.image.clone(),
            command: command.to_string(),
            workspace_bind: mounts::workspace_bind(
                &self.workspace.display().to_string(),
                self.policy.working_subdir(),
            ),
            working_dir,
            env: self
                .policy
                .whitelisted_env()
                .into_iter()
                .map(|(k, v)| format!("{k}={v}"))
                .collect(),
            network_enabled: self.network_enabled,
            cpus: self.cpus,
            memory_bytes: self.memory_bytes,
            pids_limit: self.pids_limit,
        }
    }

    /// Run one command in a fresh container and wait for it to finish.
    ///
    /// The policy check happens first; a rejected command returns `Err`
    /// without touching Docker or the audit log. Every attempt that reaches
    /// the container layer appends exactly one audit event, whatever the
    /// outcome.
    #[instrument(skip(self), fields(image = %self.image))]
    pub async fn run(
        &self,
        command: &str,
        timeout: Duration,
    ) -> Result<ExecutionResult, SandboxError> {
        self.policy.check(command)?;

        let attempt_id = Uuid::new_v4();
        let spec = self.container_spec(command);

        let (created, fallback_trail) = negotiate_create(&spec, attempt_id, |name, config| {
            let docker = self.docker.clone();
            async move { container::create_and_start(&docker, &name, config).await }
        })
        .await;

        let result = match created {
            Ok(id) => {
                debug!(container = %id, "container started");
                self.wait_and_collect(&id, timeout).await
            }
            Err(infra) => infra,
        };

        self.audit
            .append(&self.audit_event(
                attempt_id,
                command,
                timeout,
                &result,
                &fallback_trail,
            ))
            .await?;

        Ok(result)
    }

    /// Run commands in order, stopping at the first that does not succeed.
    pub async fn run_sequence(
        &self,
        commands: &[String],
        timeout: Duration,
    ) -> Result<SequenceOutcome, SandboxError> {
        for command in commands {
            let result = self.run(command, timeout).await?;
            if !result.ok() {
                return Ok(SequenceOutcome::Stopped {
                    command: command.clone(),
                    result,
                });
            }
        }
        Ok(SequenceOutcome::Completed)
    }

    /// Wait for a started container, collect its output, and always remove
    /// it before returning.
    async fn wait_and_collect(&self, id: &str, wait_timeout: Duration) -> ExecutionResult {
        let mut wait_stream = self.docker.wait_container(
            id,
            None::<bollard::container::WaitContainerOptions<String>>,
        );

        let result = match tokio::time::timeout(wait_timeout, wait_stream.next()).await {
            Ok(Some(Ok(response))) => {
                let (stdout, stderr) = container::collect_logs(&self.docker, id).await;
                let output = CommandOutput {
                    exit_code: response.status_code,
                    stdout,
                    stderr,
                };
                if output.exit_code == 0 {
                    ExecutionResult::Success(output)
                } else {
                    ExecutionResult::CommandFailed(output)
                }
            }
            // bollard reports a nonzero exit as an error on the wait stream.
            Ok(Some(Err(DockerError::DockerContainerWaitError { code, .. }))) => {
                let (stdout, stderr) = container::collect_logs(&self.docker, id).await;
                ExecutionResult::CommandFailed(CommandOutput {
                    exit_code: code,
                    stdout,
                    stderr,
                })
            }
            Ok(Some(Err(e))) => self.wait_failure(id, format!("wait_error: {e}")).await,
            Ok(None) => {
                self.wait_failure(id, "wait_error: wait stream ended unexpectedly".to_string())
                    .await
            }
            Err(_) => {
                self.wait_failure(
                    id,
                    format!("wait_error: timed out after {}s", wait_timeout.as_secs()),
                )
                .await
            }
        };

        container::force_remove(&self.docker, id).await;
        result
    }

    /// Build an infrastructure result for a wait failure, appending any
    /// stderr the container managed to produce.
    async fn wait_failure(&self, id: &str, mut detail: String) -> ExecutionResult {
        let (_, stderr) = container::collect_logs(&self.docker, id).await;
        let stderr = stderr.trim();
        if !stderr.is_empty() {
            detail.push_str("; stderr: ");
            detail.push_str(stderr);
        }
        ExecutionResult::Infrastructure { detail }
    }

    fn audit_event(
        &self,
        id: Uuid,
        command: &str,
        timeout: Duration,
        result: &ExecutionResult,
        fallback_trail: &[&'static str],
    ) -> AuditEvent {
        let (ok, code, stdout, stderr, error) = match result {
            ExecutionResult::Success(out) => (
                true,
                Some(out.exit_code),
                Some(out.stdout.clone()),
                Some(out.stderr.clone()),
                None,
            ),
            ExecutionResult::CommandFailed(out) => (
                false,
                Some(out.exit_code),
                Some(out.stdout.clone()),
                Some(out.stderr.clone()),
                None,
            ),
            ExecutionResult::Infrastructure { detail } => {
                (false, None, None, None, Some(detail.clone()))
            }
        };

        AuditEvent {
            id,
            cmd: command.to_string(),
            timeout_secs: timeout.as_secs(),
            image: self.image.clone(),
            mount_dest: self.mount_dest(),
            ts: Utc::now(),
            ok,
            code,
            stdout,
            stderr,
            error,
            limits_fallback: if fallback_trail.is_empty() {
                None
            } else {
                Some(fallback_trail.join(","))
            },
        }
    }
}

/// Drive container creation through the bounded limit-fallback loop.
///
/// `create` is invoked once per attempt with a fresh container name and the
/// config for the current limit state; creation itself is injected so the
/// negotiation can be exercised without a daemon. Returns the started
/// container id or the infrastructure result to report, together with the
/// trail of limits dropped along the way.
async fn negotiate_create<F, Fut>(
    spec: &ContainerSpec,
    attempt_id: Uuid,
    mut create: F,
) -> (Result<String, ExecutionResult>, Vec<&'static str>)
where
    F: FnMut(String, Config<String>) -> Fut,
    Fut: Future<Output = Result<String, DockerError>>,
{
    let mut limit_state = LimitState::default();
    let mut fallback_trail = Vec::new();

    for attempt in 0..MAX_CREATE_ATTEMPTS {
        let name = format!("ironbox-{attempt_id}-{attempt}");
        match create(name, spec.to_config(limit_state)).await {
            Ok(id) => return (Ok(id), fallback_trail),
            Err(e) => {
                let text = e.to_string();
                match limit_state.apply_host_error(&text) {
                    Some((kind, next)) => {
                        warn!(
                            limit = %kind,
                            attempt,
                            error = %text,
                            "host rejected resource limit, retrying without it"
                        );
                        fallback_trail.push(kind.as_str());
                        limit_state = next;
                    }
                    None => {
                        return (
                            Err(ExecutionResult::Infrastructure {
                                detail: format!("docker api error: {text}"),
                            }),
                            fallback_trail,
                        );
                    }
                }
            }
        }
    }
    (
        Err(ExecutionResult::Infrastructure {
            detail: "unable to create container after limit fallbacks".to_string(),
        }),
        fallback_trail,
    )
}
