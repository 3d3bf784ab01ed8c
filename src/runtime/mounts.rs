//! Workspace bind-mount target resolution.
//!
//! The host workspace is always bind-mounted read-write under a canonical
//! in-container root. The policy's `working_subdir` selects where under that
//! root the mount lands; the resolved target doubles as the container's
//! working directory, so anything the command writes relative to its cwd is
//! visible on the host workspace after the call returns.

/// Canonical in-container root for the workspace bind mount.
pub const WORKSPACE_MOUNT_POINT: &str = "/app";

/// Resolve the bind-mount destination for a `working_subdir`.
///
/// An empty or bare relative marker ("", ".", "./" after trimming) maps to
/// the canonical root; anything else is appended with surrounding slashes
/// normalized.
pub fn mount_dest(working_subdir: &str) -> String {
    let sub = working_subdir.trim();
    if matches!(sub, "" | "." | "./") {
        return WORKSPACE_MOUNT_POINT.to_string();
    }
    format!("{}/{}", WORKSPACE_MOUNT_POINT, sub.trim_matches('/'))
}

/// Bind specification string for the Docker host config ("host:dest:rw").
pub fn workspace_bind(host_workspace: &str, working_subdir: &str) -> String {
    format!("{}:{}:rw", host_workspace, mount_dest(working_subdir))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_empty_subdir_maps_to_root() {
        assert_eq!(mount_dest(""), "/app");
        assert_eq!(mount_dest("   "), "/app");
        assert_eq!(mount_dest("."), "/app");
        assert_eq!(mount_dest("./"), "/app");
    }

    #[test]
    fn test_subdir_appended_under_root() {
        assert_eq!(mount_dest("src"), "/app/src");
        assert_eq!(mount_dest("foo/bar"), "/app/foo/bar");
    }

    #[test]
    fn test_surrounding_slashes_normalized() {
        assert_eq!(mount_dest("/src/"), "/app/src");
        assert_eq!(mount_dest("foo/bar/"), "/app/foo/bar");
    }

    #[test]
    fn test_workspace_bind_format() {
        assert_eq!(workspace_bind("/home/u/ws", ""), "/home/u/ws:/app:rw");
        assert_eq!(
            workspace_bind("/home/u/ws", "src"),
            "/home/u/ws:/app/src:rw"
        );
    }
}
