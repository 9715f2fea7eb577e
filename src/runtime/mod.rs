//! The runtime abstraction shared by both sandbox backends.
//!
//! A [`Runtime`] owns every sandbox of one backend, keyed by session id.
//! The backend is picked once at startup by [`create_runtime`]; callers only
//! ever see `Arc<dyn Runtime>`.

mod docker;
mod emulated;
mod error;
pub mod transfer;
mod types;

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

pub use docker::DockerRuntime;
pub use emulated::EmulatedRuntime;
pub use error::{RuntimeError, RuntimeResult};
pub use types::{
    CommandResult, ContainerInfo, ContainerStatus, DevServerInfo, FileRecord, PortMapping,
    ResourceStats, SandboxSpec,
};

use crate::config::{Backend, Config};

/// Operations every sandbox backend provides.
///
/// Commands that run and exit nonzero are returned as [`CommandResult`]s.
/// Only structural failures (no sandbox, creation failure, timeout, transfer
/// failure) surface as [`RuntimeError`].
#[async_trait]
pub trait Runtime: Send + Sync {
    /// Which backend this is.
    fn backend(&self) -> Backend;

    /// Creates and starts the sandbox for `spec.session_id`. Calling it again
    /// for a live session returns the existing sandbox.
    async fn create_container(&self, spec: &SandboxSpec) -> RuntimeResult<ContainerInfo>;

    /// Runs `command` in the session's sandbox. `timeout` falls back to the
    /// configured default.
    async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> RuntimeResult<CommandResult>;

    /// Writes each file, creating parent directories.
    async fn upload_files(&self, session_id: &str, files: &[FileRecord]) -> RuntimeResult<()>;

    /// Reads each path back.
    async fn download_files(
        &self,
        session_id: &str,
        paths: &[String],
    ) -> RuntimeResult<Vec<FileRecord>>;

    /// Externally reachable URL of the application port.
    async fn container_url(&self, session_id: &str) -> RuntimeResult<String>;

    /// Dev server location, once one has been started.
    async fn dev_server_info(&self, session_id: &str) -> RuntimeResult<Option<DevServerInfo>>;

    /// Point-in-time resource usage.
    async fn container_stats(&self, session_id: &str) -> RuntimeResult<ResourceStats>;

    /// Introspection record for one sandbox.
    async fn container_info(&self, session_id: &str) -> RuntimeResult<ContainerInfo>;

    /// Every sandbox this backend manages.
    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>>;

    /// True if the session has a running sandbox. Never blocks on in-flight
    /// commands.
    async fn is_container_running(&self, session_id: &str) -> bool;

    /// Stops and removes the sandbox. Stopping an unknown or already stopped
    /// session succeeds.
    async fn stop_container(&self, session_id: &str) -> RuntimeResult<()>;

    /// Removes managed sandboxes whose session is not in `live`. Returns how
    /// many were removed.
    async fn cleanup_orphaned(&self, _live: &[String]) -> RuntimeResult<usize> {
        Ok(0)
    }
}

/// Builds the runtime selected by `config.runtime.backend`.
pub async fn create_runtime(config: &Config) -> RuntimeResult<Arc<dyn Runtime>> {
    let runtime: Arc<dyn Runtime> = match config.runtime.backend {
        Backend::Virtual => Arc::new(EmulatedRuntime::new(config)),
        Backend::Docker => Arc::new(DockerRuntime::connect(config).await?),
    };
    info!(backend = %runtime.backend(), "runtime ready");
    Ok(runtime)
}

/// Absolute sandbox path for a [`FileRecord`] path.
pub(crate) fn sandbox_path(workdir: &str, p: &str) -> String {
    crate::vfs::path::resolve(p, workdir)
}

/// Deterministic sandbox name for a session id. Characters Docker rejects in
/// names are replaced with `-`.
pub fn container_name(session_id: &str) -> String {
    let slug: String = session_id
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.') {
                c
            } else {
                '-'
            }
        })
        .take(64)
        .collect();
    format!("shellbox-{slug}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_factory_builds_virtual_backend() {
        let mut config = Config::default();
        config.sandbox.seed_template = false;
        let runtime = create_runtime(&config).await.unwrap();
        assert_eq!(runtime.backend(), Backend::Virtual);
        assert!(runtime.list_containers().await.unwrap().is_empty());
    }

    #[test]
    fn test_container_name_is_deterministic_and_safe() {
        assert_eq!(container_name("s1"), "shellbox-s1");
        assert_eq!(container_name("s1"), container_name("s1"));
        assert_eq!(container_name("user@chat/42"), "shellbox-user-chat-42");
        assert!(container_name(&"x".repeat(200)).len() <= "shellbox-".len() + 64);
    }

    #[test]
    fn test_sandbox_path() {
        assert_eq!(sandbox_path("/app", "src/App.tsx"), "/app/src/App.tsx");
        assert_eq!(sandbox_path("/app", "/etc/hosts"), "/etc/hosts");
    }
}
