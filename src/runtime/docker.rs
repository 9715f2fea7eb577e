//! Docker backend: one long-lived container per session.
//!
//! Containers are named after the session id and labelled as managed, so a
//! second create for the same session (from this process or another) finds
//! and reuses the existing container. Commands run through the exec API with
//! `sh -c`. Files cross the exec channel base64-encoded (see
//! [`super::transfer`]).

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use async_trait::async_trait;
use bollard::Docker;
use bollard::container::{
    Config as ContainerConfig, CreateContainerOptions, InspectContainerOptions,
    ListContainersOptions, LogOutput, RemoveContainerOptions, Stats, StatsOptions,
    StopContainerOptions,
};
use bollard::errors::Error as BollardError;
use bollard::exec::{CreateExecOptions, StartExecResults};
use bollard::models::{
    ContainerInspectResponse, ContainerStateStatusEnum, ContainerSummary, HostConfig, PortBinding,
    PortMap,
};
use chrono::{DateTime, Utc};
use futures_util::StreamExt;
use tokio::sync::{RwLock, watch};
use tracing::{debug, info, warn};

use super::transfer;
use super::{
    CommandResult, ContainerInfo, ContainerStatus, DevServerInfo, FileRecord, PortMapping,
    ResourceStats, Runtime, RuntimeError, RuntimeResult, SandboxSpec, container_name,
    sandbox_path,
};
use crate::config::{Backend, Config};
use crate::shell::{parser, process};
use crate::templates;

/// Label marking containers this crate created.
const MANAGED_LABEL: &str = "shellbox.managed";

/// Label carrying the owning session id.
const SESSION_LABEL: &str = "shellbox.session";

/// Capabilities kept after dropping everything; enough for file ownership
/// changes during package installs.
const CAPABILITIES: &[&str] = &["CHOWN", "DAC_OVERRIDE", "FOWNER", "SETGID", "SETUID"];

/// Upper bound on processes per container.
const PIDS_LIMIT: i64 = 512;

/// Seconds the engine waits for a graceful stop.
const STOP_GRACE_SECS: i64 = 5;

/// Bound for inspect calls that must not hang.
const INSPECT_TIMEOUT: Duration = Duration::from_secs(5);

/// Where background command output goes inside the container.
const BACKGROUND_LOG: &str = "/tmp/shellbox-background.log";

struct Handle {
    name: String,
    stopped: watch::Sender<bool>,
    background_launched: AtomicBool,
}

impl Handle {
    fn new(name: String) -> Self {
        let (stopped, _) = watch::channel(false);
        Self {
            name,
            stopped,
            background_launched: AtomicBool::new(false),
        }
    }
}

/// Runs each session in its own Docker container.
pub struct DockerRuntime {
    docker: Docker,
    http: reqwest::Client,
    handles: RwLock<HashMap<String, Arc<Handle>>>,
    image: String,
    workdir: String,
    env: BTreeMap<String, String>,
    app_port: u16,
    public_host: String,
    network_mode: String,
    seed_template: bool,
    command_timeout: Duration,
    create_timeout: Duration,
}

impl DockerRuntime {
    /// Connects to the local Docker daemon and checks it responds.
    pub async fn connect(config: &Config) -> RuntimeResult<Self> {
        let docker = Docker::connect_with_local_defaults()
            .map_err(|e| RuntimeError::docker_unavailable(e.to_string()))?;
        docker
            .ping()
            .await
            .map_err(|e| RuntimeError::docker_unavailable(e.to_string()))?;

        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(2))
            .build()
            .map_err(|e| RuntimeError::io(e.to_string()))?;

        Ok(Self {
            docker,
            http,
            handles: RwLock::new(HashMap::new()),
            image: config.sandbox.image.clone(),
            workdir: config.sandbox.workdir.clone(),
            env: config.sandbox.env.clone(),
            app_port: config.sandbox.app_port,
            public_host: config.sandbox.public_host.clone(),
            network_mode: config.sandbox.network_mode.clone(),
            seed_template: config.sandbox.seed_template,
            command_timeout: config.command_timeout(),
            create_timeout: config.create_timeout(),
        })
    }

    /// Handle for a live session. Running containers left by another process
    /// are adopted.
    async fn handle(&self, session_id: &str) -> RuntimeResult<Arc<Handle>> {
        if let Some(handle) = self.handles.read().await.get(session_id) {
            return Ok(Arc::clone(handle));
        }
        let name = container_name(session_id);
        match self.inspect(&name).await {
            Ok(inspect) if is_running(&inspect) => Ok(self.register(session_id, name).await),
            Ok(_) => Err(RuntimeError::not_found(session_id)),
            Err(e) if is_status(&e, 404) => Err(RuntimeError::not_found(session_id)),
            Err(e) => Err(RuntimeError::io(e.to_string())),
        }
    }

    async fn register(&self, session_id: &str, name: String) -> Arc<Handle> {
        let mut handles = self.handles.write().await;
        Arc::clone(
            handles
                .entry(session_id.to_string())
                .or_insert_with(|| Arc::new(Handle::new(name))),
        )
    }

    async fn inspect(&self, name: &str) -> Result<ContainerInspectResponse, BollardError> {
        self.docker
            .inspect_container(name, None::<InspectContainerOptions>)
            .await
    }

    fn container_config(&self, spec: &SandboxSpec) -> ContainerConfig<String> {
        let mut env = self.env.clone();
        env.extend(spec.env.clone());
        let port_key = format!("{}/tcp", self.app_port);

        ContainerConfig {
            image: Some(self.image.clone()),
            cmd: Some(vec![
                "tail".to_string(),
                "-f".to_string(),
                "/dev/null".to_string(),
            ]),
            working_dir: Some(self.workdir.clone()),
            env: Some(env.iter().map(|(k, v)| format!("{k}={v}")).collect()),
            labels: Some(HashMap::from([
                (MANAGED_LABEL.to_string(), "true".to_string()),
                (SESSION_LABEL.to_string(), spec.session_id.clone()),
            ])),
            exposed_ports: Some(HashMap::from([(port_key, HashMap::new())])),
            host_config: Some(host_config(spec, self.app_port, &self.network_mode)),
            ..Default::default()
        }
    }

    /// Creates (or restarts) the container and seeds it. Runs under the
    /// creation timeout.
    async fn provision(&self, spec: &SandboxSpec) -> RuntimeResult<()> {
        let session_id = spec.session_id.as_str();
        let name = container_name(session_id);

        match self.inspect(&name).await {
            Ok(inspect) if is_running(&inspect) => {
                debug!(session_id, container = %name, "reusing running container");
                self.register(session_id, name).await;
                return Ok(());
            }
            Ok(_) => {
                debug!(session_id, container = %name, "starting existing container");
                self.docker
                    .start_container::<String>(&name, None)
                    .await
                    .map_err(|e| RuntimeError::creation(e.to_string()))?;
                self.register(session_id, name).await;
                return Ok(());
            }
            Err(e) if is_status(&e, 404) => {}
            Err(e) => return Err(RuntimeError::creation(e.to_string())),
        }

        if let Err(e) = self.docker.inspect_image(&self.image).await {
            return Err(image_lookup_error(&self.image, e));
        }

        debug!(session_id, container = %name, "creating container");
        let created = self
            .docker
            .create_container(
                Some(CreateContainerOptions {
                    name: name.clone(),
                    platform: None,
                }),
                self.container_config(spec),
            )
            .await;
        match created {
            Ok(_) => {}
            // Lost a race with another creator of the same session.
            Err(e) if is_status(&e, 409) => {
                self.register(session_id, name).await;
                return Ok(());
            }
            Err(e) => return Err(RuntimeError::creation(e.to_string())),
        }

        self.docker
            .start_container::<String>(&name, None)
            .await
            .map_err(|e| RuntimeError::creation(e.to_string()))?;
        self.register(session_id, name.clone()).await;
        info!(session_id, container = %name, "container started");

        if self.seed_template {
            self.upload_files(session_id, &templates::boilerplate())
                .await
                .map_err(|e| RuntimeError::creation(format!("seeding failed: {e}")))?;
        }
        Ok(())
    }

    /// Removes a container, treating "already gone" as success.
    async fn remove(&self, name: &str) -> RuntimeResult<()> {
        match self
            .docker
            .stop_container(name, Some(StopContainerOptions { t: STOP_GRACE_SECS }))
            .await
        {
            Ok(()) => {}
            Err(e) if is_status(&e, 404) || is_status(&e, 304) => {}
            Err(e) => debug!(container = %name, error = %e, "stop failed, forcing removal"),
        }
        match self
            .docker
            .remove_container(
                name,
                Some(RemoveContainerOptions {
                    force: true,
                    ..Default::default()
                }),
            )
            .await
        {
            Ok(()) => Ok(()),
            Err(e) if is_status(&e, 404) || is_status(&e, 409) => Ok(()),
            Err(e) => Err(RuntimeError::io(e.to_string())),
        }
    }

    /// Runs `command` via `sh -c` in the workdir, bounded by `limit` and by
    /// the session being stopped.
    async fn exec(
        &self,
        session_id: &str,
        handle: &Handle,
        command: &str,
        limit: Duration,
    ) -> RuntimeResult<CommandResult> {
        let mut stopped = handle.stopped.subscribe();
        if *stopped.borrow_and_update() {
            return Err(RuntimeError::not_found(session_id));
        }
        tokio::select! {
            result = tokio::time::timeout(limit, self.exec_attached(&handle.name, command)) => {
                match result {
                    Ok(Ok(r)) => Ok(r),
                    Ok(Err(e)) if is_status(&e, 404) || is_status(&e, 409) => {
                        Err(RuntimeError::not_found(session_id))
                    }
                    Ok(Err(e)) => Err(RuntimeError::io(e.to_string())),
                    Err(_) => Err(RuntimeError::timeout(limit)),
                }
            }
            _ = stopped.wait_for(|s| *s) => Err(RuntimeError::cancelled(session_id)),
        }
    }

    async fn exec_attached(
        &self,
        name: &str,
        command: &str,
    ) -> Result<CommandResult, BollardError> {
        let exec = self
            .docker
            .create_exec(
                name,
                CreateExecOptions {
                    cmd: Some(vec!["sh", "-c", command]),
                    attach_stdout: Some(true),
                    attach_stderr: Some(true),
                    working_dir: Some(self.workdir.as_str()),
                    ..Default::default()
                },
            )
            .await?;

        let mut stdout = Vec::new();
        let mut stderr = Vec::new();
        if let StartExecResults::Attached { mut output, .. } =
            self.docker.start_exec(&exec.id, None).await?
        {
            while let Some(chunk) = output.next().await {
                match chunk? {
                    LogOutput::StdOut { message } => stdout.extend_from_slice(&message),
                    LogOutput::StdErr { message } => stderr.extend_from_slice(&message),
                    _ => {}
                }
            }
        }

        let inspect = self.docker.inspect_exec(&exec.id).await?;
        let exit_code = inspect
            .exit_code
            .and_then(|code| i32::try_from(code).ok())
            .unwrap_or(1);
        Ok(CommandResult {
            stdout: String::from_utf8_lossy(&stdout).into_owned(),
            stderr: String::from_utf8_lossy(&stderr).into_owned(),
            exit_code,
        })
    }

    fn host_port(inspect: &ContainerInspectResponse, internal: u16) -> Option<u16> {
        inspect
            .network_settings
            .as_ref()
            .and_then(|n| n.ports.as_ref())
            .and_then(|ports| resolve_host_port(ports, internal))
    }

    async fn url(&self, session_id: &str) -> RuntimeResult<(String, u16)> {
        let handle = self.handle(session_id).await?;
        let inspect = self
            .inspect(&handle.name)
            .await
            .map_err(|e| RuntimeError::io(e.to_string()))?;
        let port = Self::host_port(&inspect, self.app_port)
            .ok_or_else(|| RuntimeError::port_unavailable(session_id))?;
        Ok((format!("http://{}:{port}", self.public_host), port))
    }
}

#[async_trait]
impl Runtime for DockerRuntime {
    fn backend(&self) -> Backend {
        Backend::Docker
    }

    async fn create_container(&self, spec: &SandboxSpec) -> RuntimeResult<ContainerInfo> {
        let session_id = spec.session_id.as_str();
        match tokio::time::timeout(self.create_timeout, self.provision(spec)).await {
            Ok(Ok(())) => {}
            Ok(Err(e)) => {
                warn!(session_id, error = %e, "container creation failed");
                if let Err(cleanup) = self.remove(&container_name(session_id)).await {
                    warn!(session_id, error = %cleanup, "cleanup after failed creation failed");
                }
                self.handles.write().await.remove(session_id);
                return Err(e);
            }
            Err(_) => {
                warn!(session_id, "container creation timed out");
                if let Err(cleanup) = self.remove(&container_name(session_id)).await {
                    warn!(session_id, error = %cleanup, "cleanup after timeout failed");
                }
                self.handles.write().await.remove(session_id);
                return Err(RuntimeError::timeout(self.create_timeout));
            }
        }
        self.container_info(session_id).await
    }

    async fn execute_command(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> RuntimeResult<CommandResult> {
        let handle = self.handle(session_id).await?;
        let limit = timeout.unwrap_or(self.command_timeout);

        let result = if let Some(wrapped) = background_command(command) {
            let r = self.exec(session_id, &handle, &wrapped, limit).await?;
            if r.success() {
                handle.background_launched.store(true, Ordering::SeqCst);
            }
            r
        } else {
            self.exec(session_id, &handle, command, limit).await?
        };
        if !result.success() {
            debug!(session_id, exit_code = result.exit_code, "command failed");
        }
        Ok(result)
    }

    async fn upload_files(&self, session_id: &str, files: &[FileRecord]) -> RuntimeResult<()> {
        let handle = self.handle(session_id).await?;
        for file in files {
            let target = sandbox_path(&self.workdir, &file.path);
            for command in transfer::upload_commands(&target, &file.content, Some(file.mode)) {
                let r = self
                    .exec(session_id, &handle, &command, self.command_timeout)
                    .await?;
                if !r.success() {
                    return Err(RuntimeError::transfer(&target, r.stderr.trim()));
                }
            }

            let r = self
                .exec(
                    session_id,
                    &handle,
                    &transfer::size_command(&target),
                    self.command_timeout,
                )
                .await?;
            let expected = file.content.len() as u64;
            match transfer::parse_size(&r.stdout) {
                Some(size) if size == expected => {}
                got => {
                    return Err(RuntimeError::transfer(
                        &target,
                        format!("size mismatch: expected {expected} bytes, found {got:?}"),
                    ));
                }
            }
            debug!(session_id, path = %target, bytes = expected, "uploaded file");
        }
        Ok(())
    }

    async fn download_files(
        &self,
        session_id: &str,
        paths: &[String],
    ) -> RuntimeResult<Vec<FileRecord>> {
        let handle = self.handle(session_id).await?;
        let mut records = Vec::with_capacity(paths.len());
        for p in paths {
            let target = sandbox_path(&self.workdir, p);
            let r = self
                .exec(
                    session_id,
                    &handle,
                    &transfer::download_command(&target),
                    self.command_timeout,
                )
                .await?;
            if !r.success() {
                return Err(RuntimeError::transfer(&target, r.stderr.trim()));
            }
            let content = transfer::decode_payload(&r.stdout)
                .map_err(|e| RuntimeError::transfer(&target, e.to_string()))?;

            let stat = self
                .exec(
                    session_id,
                    &handle,
                    &transfer::stat_command(&target),
                    self.command_timeout,
                )
                .await?;
            let (mode, modified) = transfer::parse_stat(&stat.stdout)
                .unwrap_or((crate::vfs::FILE_MODE, Utc::now()));
            records.push(FileRecord {
                path: target,
                content,
                mode,
                modified,
            });
        }
        Ok(records)
    }

    async fn container_url(&self, session_id: &str) -> RuntimeResult<String> {
        self.url(session_id).await.map(|(url, _)| url)
    }

    async fn dev_server_info(&self, session_id: &str) -> RuntimeResult<Option<DevServerInfo>> {
        let handle = self.handle(session_id).await?;
        let (url, port) = self.url(session_id).await?;
        let running = self.http.get(&url).send().await.is_ok();
        if !running && !handle.background_launched.load(Ordering::SeqCst) {
            return Ok(None);
        }
        Ok(Some(DevServerInfo { url, port, running }))
    }

    async fn container_stats(&self, session_id: &str) -> RuntimeResult<ResourceStats> {
        let handle = self.handle(session_id).await?;
        let mut stream = self.docker.stats(
            &handle.name,
            Some(StatsOptions {
                stream: false,
                one_shot: false,
            }),
        );
        match stream.next().await {
            Some(Ok(stats)) => Ok(resource_stats(&stats)),
            Some(Err(e)) if is_status(&e, 404) => Err(RuntimeError::not_found(session_id)),
            Some(Err(e)) => Err(RuntimeError::io(e.to_string())),
            None => Err(RuntimeError::io("stats stream closed")),
        }
    }

    async fn container_info(&self, session_id: &str) -> RuntimeResult<ContainerInfo> {
        let name = container_name(session_id);
        let inspect = match self.inspect(&name).await {
            Ok(inspect) => inspect,
            Err(e) if is_status(&e, 404) => return Err(RuntimeError::not_found(session_id)),
            Err(e) => return Err(RuntimeError::io(e.to_string())),
        };
        let status = status_of(
            inspect
                .state
                .as_ref()
                .and_then(|s| s.status.as_ref())
                .cloned()
                .unwrap_or(ContainerStateStatusEnum::EMPTY),
        );
        let created_at = inspect
            .created
            .as_deref()
            .and_then(|c| DateTime::parse_from_rfc3339(c).ok())
            .map_or_else(Utc::now, |t| t.with_timezone(&Utc));
        Ok(ContainerInfo {
            name,
            status,
            ports: vec![PortMapping {
                internal: self.app_port,
                host: Self::host_port(&inspect, self.app_port),
            }],
            created_at,
            session_id: session_id.to_string(),
        })
    }

    async fn list_containers(&self) -> RuntimeResult<Vec<ContainerInfo>> {
        let summaries = self
            .docker
            .list_containers(Some(ListContainersOptions::<String> {
                all: true,
                filters: HashMap::from([(
                    "label".to_string(),
                    vec![format!("{MANAGED_LABEL}=true")],
                )]),
                ..Default::default()
            }))
            .await
            .map_err(|e| RuntimeError::io(e.to_string()))?;
        Ok(summaries.iter().filter_map(summary_info).collect())
    }

    async fn is_container_running(&self, session_id: &str) -> bool {
        if let Some(handle) = self.handles.read().await.get(session_id) {
            if *handle.stopped.borrow() {
                return false;
            }
        }
        let name = container_name(session_id);
        match tokio::time::timeout(INSPECT_TIMEOUT, self.inspect(&name)).await {
            Ok(Ok(inspect)) => is_running(&inspect),
            Ok(Err(_)) => false,
            Err(_) => {
                warn!(session_id, "inspect timed out while checking container state");
                false
            }
        }
    }

    async fn stop_container(&self, session_id: &str) -> RuntimeResult<()> {
        if let Some(handle) = self.handles.write().await.remove(session_id) {
            handle.stopped.send_replace(true);
        }
        let name = container_name(session_id);
        self.remove(&name).await?;
        info!(session_id, container = %name, "container removed");
        Ok(())
    }

    async fn cleanup_orphaned(&self, live: &[String]) -> RuntimeResult<usize> {
        let mut removed = 0;
        for info in self.list_containers().await? {
            if live.contains(&info.session_id) {
                continue;
            }
            match self.stop_container(&info.session_id).await {
                Ok(()) => removed += 1,
                Err(e) => warn!(container = %info.name, error = %e, "failed to remove orphan"),
            }
        }
        Ok(removed)
    }
}

// ---- Pure helpers ----

/// Maps an image inspect failure. Only a 404 means the image is missing.
fn image_lookup_error(image: &str, err: BollardError) -> RuntimeError {
    if is_status(&err, 404) {
        RuntimeError::image_not_found(image)
    } else {
        RuntimeError::docker_unavailable(err.to_string())
    }
}

fn is_status(err: &BollardError, code: u16) -> bool {
    matches!(
        err,
        BollardError::DockerResponseServerError { status_code, .. } if *status_code == code
    )
}

fn is_running(inspect: &ContainerInspectResponse) -> bool {
    inspect
        .state
        .as_ref()
        .and_then(|s| s.running)
        .unwrap_or(false)
}

fn status_of(state: ContainerStateStatusEnum) -> ContainerStatus {
    match state {
        ContainerStateStatusEnum::CREATED => ContainerStatus::Created,
        ContainerStateStatusEnum::RUNNING
        | ContainerStateStatusEnum::RESTARTING
        | ContainerStateStatusEnum::PAUSED => ContainerStatus::Running,
        _ => ContainerStatus::Stopped,
    }
}

/// Resource and security policy for one sandbox container.
fn host_config(spec: &SandboxSpec, app_port: u16, network_mode: &str) -> HostConfig {
    let port_bindings: PortMap = HashMap::from([(
        format!("{app_port}/tcp"),
        Some(vec![PortBinding {
            host_ip: Some("127.0.0.1".to_string()),
            // Empty asks the engine for an ephemeral port.
            host_port: Some(String::new()),
        }]),
    )]);

    HostConfig {
        memory: Some(spec.memory_bytes),
        memory_swap: Some(spec.memory_bytes),
        nano_cpus: Some((spec.cpus * 1_000_000_000.0).round() as i64),
        cpu_shares: Some(spec.cpu_shares),
        pids_limit: Some(PIDS_LIMIT),
        cap_drop: Some(vec!["ALL".to_string()]),
        cap_add: Some(CAPABILITIES.iter().map(ToString::to_string).collect()),
        security_opt: Some(vec!["no-new-privileges:true".to_string()]),
        network_mode: Some(network_mode.to_string()),
        port_bindings: Some(port_bindings),
        ..Default::default()
    }
}

/// Host port the engine published for `internal`.
fn resolve_host_port(ports: &PortMap, internal: u16) -> Option<u16> {
    ports
        .get(&format!("{internal}/tcp"))?
        .as_ref()?
        .iter()
        .find_map(|b| b.host_port.as_deref()?.parse().ok())
}

/// CPU usage over the sampling window, scaled to the number of CPUs.
fn cpu_percent(cpu_delta: u64, system_delta: u64, online_cpus: u64) -> f64 {
    if cpu_delta == 0 || system_delta == 0 {
        return 0.0;
    }
    cpu_delta as f64 / system_delta as f64 * online_cpus.max(1) as f64 * 100.0
}

fn memory_percent(usage: u64, limit: u64) -> f64 {
    if limit == 0 {
        return 0.0;
    }
    usage as f64 / limit as f64 * 100.0
}

fn resource_stats(stats: &Stats) -> ResourceStats {
    let cpu_delta = stats
        .cpu_stats
        .cpu_usage
        .total_usage
        .saturating_sub(stats.precpu_stats.cpu_usage.total_usage);
    let system_delta = stats
        .cpu_stats
        .system_cpu_usage
        .unwrap_or_default()
        .saturating_sub(stats.precpu_stats.system_cpu_usage.unwrap_or_default());
    let online_cpus = stats.cpu_stats.online_cpus.unwrap_or_else(|| {
        stats
            .cpu_stats
            .cpu_usage
            .percpu_usage
            .as_ref()
            .map_or(1, |p| p.len() as u64)
    });

    let memory_usage = stats.memory_stats.usage.unwrap_or_default();
    let memory_limit = stats.memory_stats.limit.unwrap_or_default();
    let (rx, tx) = stats.networks.as_ref().map_or((0, 0), |nets| {
        nets.values()
            .fold((0, 0), |(rx, tx), n| (rx + n.rx_bytes, tx + n.tx_bytes))
    });

    ResourceStats {
        memory_usage,
        memory_limit,
        memory_percent: memory_percent(memory_usage, memory_limit),
        cpu_percent: cpu_percent(cpu_delta, system_delta, online_cpus),
        network_rx_bytes: rx,
        network_tx_bytes: tx,
    }
}

fn summary_info(summary: &ContainerSummary) -> Option<ContainerInfo> {
    let labels = summary.labels.as_ref()?;
    let session_id = labels.get(SESSION_LABEL)?.clone();
    let name = summary
        .names
        .as_ref()
        .and_then(|n| n.first())
        .map_or_else(|| container_name(&session_id), |n| n.trim_start_matches('/').to_string());
    let status = match summary.state.as_deref() {
        Some("created") => ContainerStatus::Created,
        Some("running" | "restarting" | "paused") => ContainerStatus::Running,
        _ => ContainerStatus::Stopped,
    };
    let ports = summary
        .ports
        .iter()
        .flatten()
        .map(|p| PortMapping {
            internal: p.private_port,
            host: p.public_port,
        })
        .collect();
    let created_at = summary
        .created
        .and_then(|secs| DateTime::from_timestamp(secs, 0))
        .unwrap_or_else(Utc::now);
    Some(ContainerInfo {
        name,
        status,
        ports,
        created_at,
        session_id,
    })
}

/// Detached form of a command that launches a long-running process, so the
/// exec returns once the process has started. Prints the new pid.
fn background_command(command: &str) -> Option<String> {
    let steps = parser::parse_script(command).ok()?;
    let last = steps.last()?;
    let argv = shell_words::split(&last.text).ok()?;
    if !last.background && !process::is_dev_server(&argv) {
        return None;
    }
    let trimmed = command.trim();
    let inner = parser::strip_background(trimmed).unwrap_or(trimmed);
    Some(format!(
        "nohup sh -c {} > {BACKGROUND_LOG} 2>&1 & echo $!",
        shell_words::quote(inner)
    ))
}
