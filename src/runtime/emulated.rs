//! In-process backend: one [`VirtualShell`] per session.

use std::collections::{BTreeMap, HashMap};
use std::future::Future;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::{Mutex, RwLock, watch};
use tracing::{debug, info};

use super::{
    CommandResult, ContainerInfo, ContainerStatus, DevServerInfo, FileRecord, PortMapping,
    ResourceStats, Runtime, RuntimeError, RuntimeResult, SandboxSpec, container_name,
    sandbox_path,
};
use crate::config::{Backend, Config};
use crate::shell::{ShellOptions, VirtualShell};
use crate::templates;
use crate::vfs::{FsError, VirtualFs, path};

struct Slot {
    shell: Arc<Mutex<VirtualShell>>,
    /// Flipped to `true` when the sandbox is stopped.
    stopped: watch::Sender<bool>,
    created_at: DateTime<Utc>,
    memory_limit: u64,
}

/// Runs every session's commands in-process over a [`VirtualFs`].
pub struct EmulatedRuntime {
    sessions: RwLock<HashMap<String, Arc<Slot>>>,
    workdir: String,
    env: BTreeMap<String, String>,
    mirror_root: PathBuf,
    forward_unknown: bool,
    seed_template: bool,
    app_port: u16,
    public_host: String,
    command_timeout: Duration,
}

impl EmulatedRuntime {
    pub fn new(config: &Config) -> Self {
        Self {
            sessions: RwLock::new(HashMap::new()),
            workdir: path::normalize(&config.sandbox.workdir),
            env: config.sandbox.env.clone(),
            mirror_root: config.mirror_root(),
            forward_unknown: config.emulated.forward_unknown,
            seed_template: config.sandbox.seed_template,
            app_port: config.sandbox.app_port,
            public_host: config.sandbox.public_host.clone(),
            command_timeout: config.command_timeout(),
        }
    }

    async fn slot(&self, session_id: &str) -> RuntimeResult<Arc<Slot>> {
        self.sessions
            .read()
            .await
            .get(session_id)
            .cloned()
            .ok_or_else(|| RuntimeError::not_found(session_id))
    }

    /// Runs `work` unless it outlives `limit` or the sandbox is stopped first.
    async fn guarded<T>(
        session_id: &str,
        slot: &Slot,
        limit: Duration,
        work: impl Future<Output = T>,
    ) -> RuntimeResult<T> {
        let mut stopped = slot.stopped.subscribe();
        if *stopped.borrow_and_update() {
            return Err(RuntimeError::not_found(session_id));
        }
        tokio::select! {
            result = tokio::time::timeout(limit, work) => {
                result.map_err(|_| RuntimeError::timeout(limit))
            }
            _ = stopped.wait_for(|s| *s) => Err(RuntimeError::cancelled(session_id)),
        }
    }

    fn info(&self, session_id: &str, slot: &Slot) -> ContainerInfo {
        // A busy shell is reported with the configured port.
        let port = slot
            .shell
            .try_lock()
            .ok()
            .and_then(|mut shell| shell.processes().active_port())
            .unwrap_or(self.app_port);
        ContainerInfo {
            name: container_name(session_id),
            status: if *slot.stopped.borrow() {
                ContainerStatus::Stopped
            } else {
                ContainerStatus::Running
            },
            ports: vec![PortMapping {
                internal: port,
                host: Some(port),
            }],
            created_at: slot.created_at,
            session_id: session_id.to_string(),
        }
    }

    fn url(&self, port: u16) -> String {
        format!("http://{}:{port}", self.public_host)
    }
}

/// Writes `files` into `fs`, creating parent directories.
fn write_records(fs: &mut VirtualFs, workdir: &str, files: &[FileRecord]) -> RuntimeResult<()> {
    for file in files {
        let target = sandbox_path(workdir, &file.path);
        write_record(fs, &target, file).map_err(|e| RuntimeError::transfer(&target, e.reason()))?;
    }
    Ok(())
}

fn write_record(fs: &mut VirtualFs, target: &str, file: &FileRecord) -> Result<(), FsError> {
    fs.make_dir(&path::parent(target), true)?;
    fs.write(target, &file.content)?;
    fs.set_mode(target, file.mode)
}

#[async_trait]
impl Runtime for EmulatedRuntime {
    fn backend(&self) -> Backend {
        Backend::Virtual
    }

    async fn create_container(&self, spec: &SandboxSpec) -> RuntimeResult<ContainerInfo> {
        let session_id = spec.session_id.as_str();
        let mut sessions = self.sessions.write().await;
        if let Some(slot) = sessions.get(session_id) {
            debug!(session_id, "reusing virtual sandbox");
            return Ok(self.info(session_id, slot));
        }

        let mut env = self.env.clone();
        env.extend(spec.env.clone());
        let mut shell = VirtualShell::new(ShellOptions {
            workdir: self.workdir.clone(),
            env,
            mirror: Some(self.mirror_root.join(container_name(session_id))),
            forward_unknown: self.forward_unknown,
        });
        if self.seed_template {
            write_records(shell.fs_mut(), &self.workdir, &templates::boilerplate())
                .map_err(|e| RuntimeError::creation(e.to_string()))?;
        }

        let (stopped, _) = watch::channel(false);
        let slot = Arc::new(Slot {
            shell: Arc::new(Mutex::new(shell)),
            stopped,
            created_at: Utc::now(),
            memory_limit: u64::try_from(spec.memory_bytes).unwrap_or_default(),
        });
        let info = self.info(session_id, &slot);
        sessions.insert(session_id.to_string(), slot);
        info!(session_id, "virtual sandbox created");
        Ok(info)
    }

    async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> RuntimeResult<CommandResult> {
        let slot = self.slot(session_id).await?;
        let limit = timeout.unwrap_or(self.command_timeout);
        let shell = Arc::clone(&slot.shell);
        let result = Self::guarded(session_id, &slot, limit, async move {
            let mut shell = shell.lock().await;
            shell.execute(command).await
        })
        .await?;
        if !result.success() {
            debug!(session_id, exit_code = result.exit_code, "command failed");
        }
        Ok(result)
    }

    async fn upload_files(&self, session_id: &str, files: &[FileRecord]) -> RuntimeResult<()> {
        let slot = self.slot(session_id).await?;
        let shell = Arc::clone(&slot.shell);
        Self::guarded(session_id, &slot, self.command_timeout, async move {
            let mut shell = shell.lock().await;
            write_records(shell.fs_mut(), &self.workdir, files)
        })
        .await?
    }

    async fn download_files(
        &self,
        session_id: &str,
        paths: &[String],
    ) -> RuntimeResult<Vec<FileRecord>> {
        let slot = self.slot(session_id).await?;
        let shell = Arc::clone(&slot.shell);
        Self::guarded(session_id, &slot, self.command_timeout, async move {
            let shell = shell.lock().await;
            paths
                .iter()
                .map(|p| -> RuntimeResult<FileRecord> {
                    let target = sandbox_path(&self.workdir, p);
                    let fs = shell.fs();
                    let content = fs
                        .read(&target)
                        .map_err(|e| RuntimeError::transfer(&target, e.reason()))?;
                    let meta = fs
                        .stat(&target)
                        .map_err(|e| RuntimeError::transfer(&target, e.reason()))?;
                    Ok(FileRecord {
                        path: target,
                        content: content.to_vec(),
                        mode: meta.mode,
                        modified: meta.modified,
                    })
                })
                .collect()
        })
        .await?
    }

    async fn container_url(&self, session_id: &str) -> RuntimeResult<String> {
        let slot = self.slot(session_id).await?;
        let shell = Arc::clone(&slot.shell);
        let port = Self::guarded(session_id, &slot, self.command_timeout, async move {
            let mut shell = shell.lock().await;
            shell.processes().active_port()
        })
        .await?;
        Ok(self.url(port.unwrap_or(self.app_port)))
    }

    async fn dev_server_info(&self, session_id: &str) -> RuntimeResult<Option<DevServerInfo>> {
        let slot = self.slot(session_id).await?;
        let shell = Arc::clone(&slot.shell);
        let processes = Self::guarded(session_id, &slot, self.command_timeout, async move {
            let mut shell = shell.lock().await;
            shell.processes().list()
        })
        .await?;
        if processes.is_empty() {
            return Ok(None);
        }
        let port = processes
            .iter()
            .rev()
            .filter(|p| p.running)
            .find_map(|p| p.port)
            .unwrap_or(self.app_port);
        Ok(Some(DevServerInfo {
            url: self.url(port),
            port,
            running: processes.iter().any(|p| p.running),
        }))
    }

    async fn container_stats(&self, session_id: &str) -> RuntimeResult<ResourceStats> {
        let slot = self.slot(session_id).await?;
        let shell = Arc::clone(&slot.shell);
        let usage = Self::guarded(session_id, &slot, self.command_timeout, async move {
            let shell = shell.lock().await;
            shell.fs().total_size()
        })
        .await?;
        let memory_percent = if slot.memory_limit > 0 {
            usage as f64 / slot.memory_limit as f64 * 100.0
        } else {
            0.0
        };
        Ok(ResourceStats {
            memory_usage: usage,
            memory_limit: slot.memory_limit,
            memory_percent,
            ..ResourceStats::default()
        })
    }

    async fn container_info(&self, session_id: &str) -> RuntimeResult<ContainerInfo> {
        let slot = self.slot(session_id).await?;
        Ok(self.info(session_id, &slot))
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        let sessions = self.sessions.read().await;
        let mut infos: Vec<ContainerInfo> = sessions
            .iter()
            .map(|(id, slot)| self.info(id, slot))
            .collect();
        infos.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(infos)
    }

    async fn is_container_running(&self, session_id: &str) -> bool {
        self.sessions
            .read()
            .await
            .get(session_id)
            .is_some_and(|slot| !*slot.stopped.borrow())
    }

    async fn stop_container(&self, session_id: &str) -> RuntimeResult<()> {
        let Some(slot) = self.sessions.write().await.remove(session_id) else {
            debug!(session_id, "stop requested for unknown session");
            return Ok(());
        };
        slot.stopped.send_replace(true);
        // In-flight commands observe the flag and drop their lock.
        slot.shell.lock().await.shutdown();
        info!(session_id, "virtual sandbox stopped");
        Ok(())
    }

    /// Virtual sandboxes die with the process, so there is nothing to reap.
    async fn cleanup_orphaned(&self, _live: &[String]) -> RuntimeResult<usize> {
        Ok(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn runtime(seed: bool) -> (EmulatedRuntime, tempfile::TempDir) {
        let dir = tempfile::tempdir().unwrap();
        let mut config = Config::default();
        config.sandbox.seed_template = seed;
        config.emulated.mirror_dir = Some(dir.path().to_path_buf());
        (EmulatedRuntime::new(&config), dir)
    }

    fn spec(id: &str) -> SandboxSpec {
        Config::default().sandbox_spec(id).unwrap()
    }

    #[tokio::test]
    async fn test_seeded_sandbox_lists_boilerplate() {
        let (rt, _dir) = runtime(true);
        rt.create_container(&spec("s1")).await.unwrap();
        let r = rt.execute_command("s1", "ls -la", None).await.unwrap();
        assert!(r.stdout.contains("package.json"));
        assert!(r.stdout.contains("src"));

        let r = rt
            .execute_command("s1", "grep react package.json", None)
            .await
            .unwrap();
        assert_eq!(r.exit_code, 0);
        assert!(r.stdout.contains("\"react\": \"^18.2.0\""));
    }

    #[tokio::test]
    async fn test_create_is_idempotent() {
        let (rt, _dir) = runtime(false);
        let first = rt.create_container(&spec("s1")).await.unwrap();
        rt.execute_command("s1", "touch marker", None).await.unwrap();
        let second = rt.create_container(&spec("s1")).await.unwrap();
        assert_eq!(first.name, second.name);
        assert_eq!(first.created_at, second.created_at);
        let r = rt.execute_command("s1", "ls", None).await.unwrap();
        assert_eq!(r.stdout, "marker\n");
        assert_eq!(rt.list_containers().await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_sessions_are_isolated() {
        let (rt, _dir) = runtime(false);
        rt.create_container(&spec("a")).await.unwrap();
        rt.create_container(&spec("b")).await.unwrap();
        rt.execute_command("a", "echo only-a > f", None).await.unwrap();
        let r = rt.execute_command("b", "cat f", None).await.unwrap();
        assert_eq!(r.exit_code, 1);
    }

    #[tokio::test]
    async fn test_upload_and_download() {
        let (rt, _dir) = runtime(false);
        rt.create_container(&spec("s1")).await.unwrap();
        let mut script = FileRecord::new("bin/run.sh", "#!/bin/sh\necho hi\n");
        script.mode = 0o755;
        rt.upload_files("s1", &[script]).await.unwrap();

        let files = rt
            .download_files("s1", &["bin/run.sh".to_string()])
            .await
            .unwrap();
        assert_eq!(files[0].path, "/app/bin/run.sh");
        assert_eq!(files[0].content, b"#!/bin/sh\necho hi\n");
        assert_eq!(files[0].mode, 0o755);

        let err = rt
            .download_files("s1", &["missing.txt".to_string()])
            .await
            .unwrap_err();
        assert!(err.is_transfer());
    }

    #[tokio::test]
    async fn test_stop_then_execute_is_not_found() {
        let (rt, _dir) = runtime(false);
        rt.create_container(&spec("s1")).await.unwrap();
        assert!(rt.is_container_running("s1").await);
        rt.stop_container("s1").await.unwrap();
        rt.stop_container("s1").await.unwrap();
        assert!(!rt.is_container_running("s1").await);
        let err = rt.execute_command("s1", "pwd", None).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn test_unknown_session() {
        let (rt, _dir) = runtime(false);
        assert!(rt.container_stats("nope").await.unwrap_err().is_not_found());
        assert!(rt.container_url("nope").await.unwrap_err().is_not_found());
    }

    #[tokio::test]
    async fn test_url_and_stats() {
        let (rt, _dir) = runtime(false);
        rt.create_container(&spec("s1")).await.unwrap();
        assert_eq!(
            rt.container_url("s1").await.unwrap(),
            "http://localhost:3000"
        );
        assert!(rt.dev_server_info("s1").await.unwrap().is_none());

        rt.execute_command("s1", "echo 12345 > f", None).await.unwrap();
        let stats = rt.container_stats("s1").await.unwrap();
        assert!(stats.memory_usage >= 6);
        assert_eq!(stats.memory_limit, 2 * 1024 * 1024 * 1024);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_timeout_leaves_state_accurate() {
        let (rt, _dir) = runtime(false);
        rt.create_container(&spec("s1")).await.unwrap();
        let err = rt
            .execute_command("s1", "sleep 5", Some(Duration::from_millis(200)))
            .await
            .unwrap_err();
        assert!(err.is_timeout());
        assert!(rt.is_container_running("s1").await);
        let r = rt.execute_command("s1", "pwd", None).await.unwrap();
        assert_eq!(r.stdout, "/app\n");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_cancels_in_flight_command() {
        let (rt, _dir) = runtime(false);
        let rt = Arc::new(rt);
        rt.create_container(&spec("s1")).await.unwrap();

        let running = Arc::clone(&rt);
        let pending =
            tokio::spawn(async move { running.execute_command("s1", "sleep 30", None).await });
        tokio::time::sleep(Duration::from_millis(200)).await;

        rt.stop_container("s1").await.unwrap();
        let err = pending.await.unwrap().unwrap_err();
        assert!(err.is_cancelled());
    }

    #[tokio::test]
    async fn test_cleanup_orphaned_leaves_virtual_sandboxes_alone() {
        let (rt, _dir) = runtime(false);
        rt.create_container(&spec("s1")).await.unwrap();
        assert_eq!(rt.cleanup_orphaned(&[]).await.unwrap(), 0);
        assert!(rt.is_container_running("s1").await);
    }
}
