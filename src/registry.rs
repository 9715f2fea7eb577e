//! Session registry: maps session ids to sandboxes of one [`Runtime`].
//!
//! Each session id owns a slot with an async lifecycle lock. Creation,
//! liveness checks and teardown for one id run under that lock, so
//! concurrent first requests share one `create_container` call and a removal
//! waits for an in-flight creation instead of racing it. Unrelated ids never
//! wait on each other.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::runtime::{
    CommandResult, ContainerInfo, DevServerInfo, FileRecord, ResourceStats, Runtime, RuntimeError,
    RuntimeResult, SandboxSpec,
};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

struct Slot {
    /// Held while the sandbox is created, checked or torn down.
    lifecycle: tokio::sync::Mutex<()>,
    sandbox: Mutex<Option<ContainerInfo>>,
    /// Set once the slot has left the map. Holders must look it up again.
    retired: AtomicBool,
    created_at: DateTime<Utc>,
    last_activity: Mutex<Instant>,
}

impl Slot {
    fn new() -> Self {
        Self {
            lifecycle: tokio::sync::Mutex::new(()),
            sandbox: Mutex::new(None),
            retired: AtomicBool::new(false),
            created_at: Utc::now(),
            last_activity: Mutex::new(Instant::now()),
        }
    }

    fn current(&self) -> Option<ContainerInfo> {
        lock(&self.sandbox).clone()
    }

    fn set(&self, info: Option<ContainerInfo>) {
        *lock(&self.sandbox) = info;
    }

    fn is_retired(&self) -> bool {
        self.retired.load(Ordering::SeqCst)
    }

    fn touch(&self) {
        *lock(&self.last_activity) = Instant::now();
    }

    fn idle(&self) -> Duration {
        lock(&self.last_activity).elapsed()
    }

    /// Live and untouched for longer than `max_idle`.
    fn is_stale(&self, max_idle: Duration) -> bool {
        self.current().is_some() && self.idle() > max_idle
    }
}

/// A live session as seen by [`SessionRegistry::sessions`].
#[derive(Debug, Clone, PartialEq)]
pub struct SessionSummary {
    pub session_id: String,
    pub container: ContainerInfo,
    pub created_at: DateTime<Utc>,
    pub idle: Duration,
}

struct Inner {
    runtime: Arc<dyn Runtime>,
    template: SandboxSpec,
    sessions: Mutex<HashMap<String, Arc<Slot>>>,
}

/// Shared handle to the session map. Cheap to clone.
#[derive(Clone)]
pub struct SessionRegistry {
    inner: Arc<Inner>,
}

impl SessionRegistry {
    /// `template` supplies resource limits for every new sandbox.
    pub fn new(runtime: Arc<dyn Runtime>, template: SandboxSpec) -> Self {
        Self {
            inner: Arc::new(Inner {
                runtime,
                template,
                sessions: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// The backend behind this registry.
    pub fn runtime(&self) -> &Arc<dyn Runtime> {
        &self.inner.runtime
    }

    fn map(&self) -> MutexGuard<'_, HashMap<String, Arc<Slot>>> {
        lock(&self.inner.sessions)
    }

    /// Slot of a session whose sandbox is up.
    fn live(&self, session_id: &str) -> RuntimeResult<Arc<Slot>> {
        let slot = self
            .map()
            .get(session_id)
            .cloned()
            .filter(|s| s.current().is_some())
            .ok_or_else(|| RuntimeError::not_found(session_id))?;
        slot.touch();
        Ok(slot)
    }

    /// Takes `slot` out of the map if it is still the one registered for
    /// `session_id`. Call with the slot's lifecycle lock held.
    fn retire(&self, session_id: &str, slot: &Arc<Slot>) {
        slot.retired.store(true, Ordering::SeqCst);
        slot.set(None);
        let mut map = self.map();
        if map.get(session_id).is_some_and(|s| Arc::ptr_eq(s, slot)) {
            map.remove(session_id);
        }
    }

    /// Returns the session's sandbox, creating it on first use. A sandbox
    /// that died outside the registry is replaced with a fresh one.
    pub async fn get_or_create(&self, session_id: &str) -> RuntimeResult<ContainerInfo> {
        loop {
            let slot = Arc::clone(
                self.map()
                    .entry(session_id.to_string())
                    .or_insert_with(|| Arc::new(Slot::new())),
            );
            let _lifecycle = slot.lifecycle.lock().await;
            if slot.is_retired() {
                continue;
            }

            if let Some(info) = slot.current() {
                if self.inner.runtime.is_container_running(session_id).await {
                    slot.touch();
                    return Ok(info);
                }
                warn!(session_id, "sandbox is gone, recreating");
                slot.set(None);
                if let Err(e) = self.inner.runtime.stop_container(session_id).await {
                    debug!(session_id, error = %e, "stale sandbox cleanup failed");
                }
            }

            debug!(session_id, "creating sandbox");
            let spec = self.inner.template.for_session(session_id);
            return match self.inner.runtime.create_container(&spec).await {
                Ok(info) => {
                    slot.set(Some(info.clone()));
                    slot.touch();
                    Ok(info)
                }
                Err(e) => {
                    warn!(session_id, error = %e, "sandbox creation failed");
                    self.retire(session_id, &slot);
                    Err(e)
                }
            };
        }
    }

    /// The session's sandbox, without creating one.
    pub fn sandbox(&self, session_id: &str) -> RuntimeResult<ContainerInfo> {
        self.live(session_id)?
            .current()
            .ok_or_else(|| RuntimeError::not_found(session_id))
    }

    pub async fn execute(
        &self,
        session_id: &str,
        command: &str,
        timeout: Option<Duration>,
    ) -> RuntimeResult<CommandResult> {
        self.live(session_id)?;
        self.inner
            .runtime
            .execute_command(session_id, command, timeout)
            .await
    }

    pub async fn upload_files(&self, session_id: &str, files: &[FileRecord]) -> RuntimeResult<()> {
        self.live(session_id)?;
        self.inner.runtime.upload_files(session_id, files).await
    }

    pub async fn download_files(
        &self,
        session_id: &str,
        paths: &[String],
    ) -> RuntimeResult<Vec<FileRecord>> {
        self.live(session_id)?;
        self.inner.runtime.download_files(session_id, paths).await
    }

    pub async fn container_url(&self, session_id: &str) -> RuntimeResult<String> {
        self.live(session_id)?;
        self.inner.runtime.container_url(session_id).await
    }

    pub async fn dev_server_info(&self, session_id: &str) -> RuntimeResult<Option<DevServerInfo>> {
        self.live(session_id)?;
        self.inner.runtime.dev_server_info(session_id).await
    }

    pub async fn container_stats(&self, session_id: &str) -> RuntimeResult<ResourceStats> {
        self.live(session_id)?;
        self.inner.runtime.container_stats(session_id).await
    }

    /// Drops the mapping and stops the sandbox. A creation in flight for the
    /// same id finishes first and is then torn down. Removing an unknown
    /// session succeeds.
    pub async fn remove_container(&self, session_id: &str) -> RuntimeResult<()> {
        self.remove_where(session_id, |_| true).await.map(|_| ())
    }

    /// Stops the session's sandbox if `should_remove` still holds once the
    /// lifecycle lock is taken. Returns whether a registered session was
    /// removed.
    async fn remove_where<F>(&self, session_id: &str, should_remove: F) -> RuntimeResult<bool>
    where
        F: Fn(&Slot) -> bool,
    {
        let Some(slot) = self.map().get(session_id).cloned() else {
            debug!(session_id, "remove requested for unregistered session");
            self.inner.runtime.stop_container(session_id).await?;
            return Ok(false);
        };
        let _lifecycle = slot.lifecycle.lock().await;
        if slot.is_retired() || !should_remove(&slot) {
            return Ok(false);
        }

        // The slot stays mapped until the backend is done, so a concurrent
        // get_or_create queues behind us instead of reviving the old sandbox.
        let stopped = self.inner.runtime.stop_container(session_id).await;
        self.retire(session_id, &slot);
        stopped?;
        info!(session_id, "session removed");
        Ok(true)
    }

    /// Removes the session now, or after `delay` on a background task.
    /// Failures are logged, not returned.
    pub fn cleanup(&self, session_id: &str, delay: Option<Duration>) -> JoinHandle<()> {
        let registry = self.clone();
        let session_id = session_id.to_string();
        tokio::spawn(async move {
            if let Some(delay) = delay {
                debug!(session_id, delay_ms = delay.as_millis() as u64, "cleanup scheduled");
                tokio::time::sleep(delay).await;
            }
            if let Err(e) = registry.remove_container(&session_id).await {
                warn!(session_id, error = %e, "cleanup failed");
            }
        })
    }

    /// Removes every live session idle for longer than `max_idle`. Sessions
    /// still being created are left alone. Returns the removed ids.
    pub async fn reap_idle(&self, max_idle: Duration) -> Vec<String> {
        let candidates: Vec<String> = self
            .map()
            .iter()
            .filter(|(_, s)| s.is_stale(max_idle))
            .map(|(id, _)| id.clone())
            .collect();

        let mut reaped = Vec::new();
        for session_id in candidates {
            match self
                .remove_where(&session_id, |s| s.is_stale(max_idle))
                .await
            {
                Ok(true) => {
                    info!(session_id, "reaped idle session");
                    reaped.push(session_id);
                }
                Ok(false) => {}
                Err(e) => warn!(session_id, error = %e, "failed to reap idle session"),
            }
        }
        reaped
    }

    /// Runs [`Self::reap_idle`] every `interval` until the handle is aborted.
    pub fn spawn_reaper(&self, interval: Duration, max_idle: Duration) -> JoinHandle<()> {
        let registry = self.clone();
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await;
            loop {
                ticker.tick().await;
                registry.reap_idle(max_idle).await;
            }
        })
    }

    /// Removes managed sandboxes that no registered session owns.
    pub async fn cleanup_orphaned(&self) -> RuntimeResult<usize> {
        let live: Vec<String> = self.map().keys().cloned().collect();
        let removed = self.inner.runtime.cleanup_orphaned(&live).await?;
        if removed > 0 {
            info!(removed, "removed orphaned sandboxes");
        }
        Ok(removed)
    }

    /// Live sessions, oldest first.
    pub fn sessions(&self) -> Vec<SessionSummary> {
        let mut summaries: Vec<SessionSummary> = self
            .map()
            .iter()
            .filter_map(|(id, s)| {
                Some(SessionSummary {
                    session_id: id.clone(),
                    container: s.current()?,
                    created_at: s.created_at,
                    idle: s.idle(),
                })
            })
            .collect();
        summaries.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        summaries
    }
}
