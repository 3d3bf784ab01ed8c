//! Low-level container plumbing over the Docker API.
//!
//! Everything here deals in bollard types; the runtime in `mod.rs` owns the
//! policy, audit, and retry semantics and calls down into these helpers.

use bollard::Docker;
use bollard::container::{
    Config, CreateContainerOptions, LogOutput, LogsOptions, RemoveContainerOptions,
    StartContainerOptions,
};
use bollard::models::HostConfig;
use futures::StreamExt;
use tracing::warn;

use crate::runtime::limits::LimitState;

/// Non-root uid:gid every sandbox container runs as.
const SANDBOX_USER: &str = "1000:1000";

/// Everything needed to build a container config, resolved once per `run`
/// call before the creation retry loop starts.
#[derive(Debug, Clone)]
pub(crate) struct ContainerSpec {
    pub image: String,
    pub command: String,
    pub workspace_bind: String,
    pub working_dir: String,
    pub env: Vec<String>,
    pub network_enabled: bool,
    pub cpus: f64,
    pub memory_bytes: i64,
    pub pids_limit: i64,
}

impl ContainerSpec {
    /// Build the Docker container config for the current limit state.
    ///
    /// Hardening is unconditional: all capabilities dropped, no privilege
    /// escalation, read-only root filesystem with tmpfs for /tmp and /run.
    /// Only the three resource limits participate in fallback negotiation.
    pub(crate) fn to_config(&self, limits: LimitState) -> Config<String> {
        let mut host_config = HostConfig {
            binds: Some(vec![self.workspace_bind.clone()]),
            cap_drop: Some(vec!["ALL".to_string()]),
            security_opt: Some(vec!["no-new-privileges".to_string()]),
            readonly_rootfs: Some(true),
            tmpfs: Some(
                [
                    ("/tmp".to_string(), String::new()),
                    ("/run".to_string(), String::new()),
                ]
                .into_iter()
                .collect(),
            ),
            ..Default::default()
        };

        if limits.cpu {
            host_config.nano_cpus = Some((self.cpus * 1e9) as i64);
        }
        if limits.memory {
            host_config.memory = Some(self.memory_bytes);
        }
        if limits.pids {
            host_config.pids_limit = Some(self.pids_limit);
        }

        Config {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "bash".to_string(),
                "-lc".to_string(),
                self.command.clone(),
            ]),
            user: Some(SANDBOX_USER.to_string()),
            working_dir: Some(self.working_dir.clone()),
            env: Some(self.env.clone()),
            network_disabled: Some(!self.network_enabled),
            host_config: Some(host_config),
            ..Default::default()
        }
    }
}

/// Create and start a container, returning its id.
///
/// A container that was created but fails to start is force-removed before
/// the error propagates, so no half-started container leaks.
pub(crate) async fn create_and_start(
    docker: &Docker,
    name: &str,
    config: Config<String>,
) -> Result<String, bollard::errors::Error> {
    let created = docker
        .create_container(
            Some(CreateContainerOptions {
                name: name.to_string(),
                platform: None,
            }),
            config,
        )
        .await?;

    if let Err(e) = docker
        .start_container(&created.id, None::<StartContainerOptions<String>>)
        .await
    {
        force_remove(docker, &created.id).await;
        return Err(e);
    }
    Ok(created.id)
}

/// Collect the full stdout and stderr of a finished container.
pub(crate) async fn collect_logs(docker: &Docker, id: &str) -> (String, String) {
    drain_logs(docker, id).await
}

async fn drain_logs(docker: &Docker, id: &str) -> (String, String) {
    let mut stdout = Vec::new();
    let mut stderr = Vec::new();

    let mut stream = docker.logs(
        id,
        Some(LogsOptions::<String> {
            stdout: true,
            stderr: true,
            ..Default::default()
        }),
    );

    while let Some(item) = stream.next().await {
        match item {
            Ok(LogOutput::StdOut { message }) | Ok(LogOutput::Console { message }) => {
                stdout.extend_from_slice(&message);
            }
            Ok(LogOutput::StdErr { message }) => {
                stderr.extend_from_slice(&message);
            }
            Ok(LogOutput::StdIn { .. }) => {}
            Err(e) => {
                warn!(container = id, error = %e, "log stream ended with error");
                break;
            }
        }
    }

    (
        String::from_utf8_lossy(&stdout).into_owned(),
        String::from_utf8_lossy(&stderr).into_owned(),
    )
}

/// Force-remove a container, logging rather than propagating failure.
///
/// Used on every exit path; the container is ephemeral and must not outlive
/// the call that created it.
pub(crate) async fn force_remove(docker: &Docker, id: &str) {
    if let Err(e) = docker
        .remove_container(
            id,
            Some(RemoveContainerOptions {
                force: true,
                ..Default::default()
            }),
        )
        .await
    {
        warn!(container = id, error = %e, "failed to remove container");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::limits::LimitState;

    fn spec() -> ContainerSpec {
        ContainerSpec {
            image: "ai-sandbox:py312".to_string(),
            command: "echo hi".to_string(),
            workspace_bind: "/home/u/ws:/app:rw".to_string(),
            working_dir: "/app".to_string(),
            env: vec!["PYTHONUNBUFFERED=1".to_string()],
            network_enabled: false,
            cpus: 1.0,
            memory_bytes: 512 * 1024 * 1024,
            pids_limit: 128,
        }
    }

    #[test]
    fn test_config_hardening_is_unconditional() {
        let config = spec().to_config(LimitState {
            cpu: false,
            memory: false,
            pids: false,
        });
        let hc = config.host_config.unwrap();
        assert_eq!(hc.cap_drop, Some(vec!["ALL".to_string()]));
        assert_eq!(hc.security_opt, Some(vec!["no-new-privileges".to_string()]));
        assert_eq!(hc.readonly_rootfs, Some(true));
        let tmpfs = hc.tmpfs.unwrap();
        assert!(tmpfs.contains_key("/tmp"));
        assert!(tmpfs.contains_key("/run"));
    }

    #[test]
    fn test_full_limits_applied() {
        let config = spec().to_config(LimitState::default());
        let hc = config.host_config.unwrap();
        assert_eq!(hc.nano_cpus, Some(1_000_000_000));
        assert_eq!(hc.memory, Some(512 * 1024 * 1024));
        assert_eq!(hc.pids_limit, Some(128));
    }

    #[test]
    fn test_disabled_limits_omitted() {
        let config = spec().to_config(LimitState {
            cpu: true,
            memory: false,
            pids: false,
        });
        let hc = config.host_config.unwrap();
        assert!(hc.nano_cpus.is_some());
        assert_eq!(hc.memory, None);
        assert_eq!(hc.pids_limit, None);
    }

    #[test]
    fn test_command_wrapped_in_shell() {
        let config = spec().to_config(LimitState::default());
        assert_eq!(
            config.cmd,
            Some(vec![
                "bash".to_string(),
                "-lc".to_string(),
                "echo hi".to_string()
            ])
        );
    }

    #[test]
    fn test_runs_as_non_root_with_network_disabled() {
        let config = spec().to_config(LimitState::default());
        assert_eq!(config.user, Some("1000:1000".to_string()));
        assert_eq!(config.network_disabled, Some(true));
        assert_eq!(config.working_dir, Some("/app".to_string()));
    }

    #[test]
    fn test_network_can_be_enabled() {
        let mut s = spec();
        s.network_enabled = true;
        let config = s.to_config(LimitState::default());
        assert_eq!(config.network_disabled, Some(false));
    }
}
