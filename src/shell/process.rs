//! Background host processes started from the virtual shell.
//!
//! Long-running commands (`npm run dev &`) are spawned in the on-disk mirror
//! and tracked here so `ps`/`kill` can find them later. Their output is kept
//! in a bounded buffer and scanned for a `localhost:<port>` banner.

use std::collections::BTreeMap;
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, LazyLock, Mutex};

use chrono::{DateTime, Utc};
use regex::Regex;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::process::{Child, Command};
use tracing::{debug, warn};

/// Output kept per process.
const MAX_LOG_BYTES: usize = 64 * 1024;

static ANSI_ESCAPE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"\x1b\[[0-9;?]*[A-Za-z]").expect("valid ansi regex"));

static LISTEN_ADDR: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"(?:localhost|127\.0\.0\.1|0\.0\.0\.0|\[::1?\]):(\d{2,5})")
        .expect("valid port regex")
});

/// Finds the first listening port announced in a line of server output.
pub fn detect_port(line: &str) -> Option<u16> {
    let clean = ANSI_ESCAPE.replace_all(line, "");
    LISTEN_ADDR
        .captures(&clean)
        .and_then(|caps| caps.get(1))
        .and_then(|m| m.as_str().parse().ok())
}

/// True for invocations that start a dev server and never exit on their own.
pub fn is_dev_server(argv: &[String]) -> bool {
    let args: Vec<&str> = argv.iter().map(String::as_str).collect();
    matches!(
        args.as_slice(),
        ["npm" | "pnpm" | "yarn", "run", "dev" | "start" | "preview", ..]
            | ["npm" | "pnpm" | "yarn", "start" | "dev", ..]
            | ["npx" | "pnpx", "vite", ..]
            | ["vite", ..]
    )
}

#[derive(Debug, Default)]
struct Shared {
    log: String,
    port: Option<u16>,
}

#[derive(Debug)]
struct Tracked {
    pid: u32,
    command: String,
    started_at: DateTime<Utc>,
    child: Child,
    shared: Arc<Mutex<Shared>>,
}

/// Snapshot of one tracked process.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSummary {
    /// Host pid.
    pub pid: u32,
    /// Command line as typed.
    pub command: String,
    /// When it was launched.
    pub started_at: DateTime<Utc>,
    /// Still alive.
    pub running: bool,
    /// Port seen in its output, if any.
    pub port: Option<u16>,
}

/// Background processes owned by one shell.
#[derive(Debug, Default)]
pub struct ProcessTable {
    entries: Vec<Tracked>,
}

impl ProcessTable {
    /// Launches `argv` in `dir` without waiting for it. Returns the pid.
    pub fn spawn(
        &mut self,
        argv: &[String],
        command: &str,
        dir: &Path,
        env: &BTreeMap<String, String>,
    ) -> io::Result<u32> {
        let (program, args) = argv
            .split_first()
            .ok_or_else(|| io::Error::new(io::ErrorKind::InvalidInput, "empty command"))?;

        let mut child = Command::new(program)
            .args(args)
            .current_dir(dir)
            .envs(env)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()?;

        let pid = child.id().unwrap_or_default();
        let shared = Arc::new(Mutex::new(Shared::default()));
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(capture(stdout, Arc::clone(&shared)));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(capture(stderr, Arc::clone(&shared)));
        }

        debug!(pid, command, "started background process");
        self.entries.push(Tracked {
            pid,
            command: command.to_string(),
            started_at: Utc::now(),
            child,
            shared,
        });
        Ok(pid)
    }

    /// Lists tracked processes, refreshing their running state. A process
    /// that has exited is reported once and then forgotten.
    pub fn list(&mut self) -> Vec<ProcessSummary> {
        let summaries: Vec<ProcessSummary> = self
            .entries
            .iter_mut()
            .map(|t| {
                let running = matches!(t.child.try_wait(), Ok(None));
                let port = t.shared.lock().ok().and_then(|s| s.port);
                ProcessSummary {
                    pid: t.pid,
                    command: t.command.clone(),
                    started_at: t.started_at,
                    running,
                    port,
                }
            })
            .collect();
        self.entries.retain(|t| summaries.iter().any(|s| s.pid == t.pid && s.running));
        summaries
    }

    /// Kills processes matching `target`: a pid, a `%n` job number, or a
    /// command name. Returns the pids that were signalled.
    pub fn kill(&mut self, target: &str) -> Vec<u32> {
        let job = target
            .strip_prefix('%')
            .and_then(|n| n.parse::<usize>().ok());
        let pid = target.parse::<u32>().ok();

        let mut killed = Vec::new();
        let mut idx = 0;
        self.entries.retain_mut(|t| {
            idx += 1;
            let matched = match (job, pid) {
                (Some(n), _) => n == idx,
                (_, Some(p)) => p == t.pid,
                _ => {
                    t.command == target
                        || t.command.split_whitespace().next() == Some(target)
                }
            };
            if matched {
                if let Err(e) = t.child.start_kill() {
                    debug!(pid = t.pid, error = %e, "background process already gone");
                }
                killed.push(t.pid);
            }
            !matched
        });
        killed
    }

    /// Kills every tracked process.
    pub fn kill_all(&mut self) {
        for mut t in self.entries.drain(..) {
            if let Err(e) = t.child.start_kill() {
                warn!(pid = t.pid, error = %e, "failed to kill background process");
            }
        }
    }

    /// Port of the most recent running process that announced one.
    pub fn active_port(&mut self) -> Option<u16> {
        self.list()
            .into_iter()
            .rev()
            .filter(|p| p.running)
            .find_map(|p| p.port)
    }

    /// Captured output of the process with `pid`.
    pub fn output(&self, pid: u32) -> Option<String> {
        self.entries
            .iter()
            .find(|t| t.pid == pid)
            .and_then(|t| t.shared.lock().ok().map(|s| s.log.clone()))
    }

    /// Number of tracked processes.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True when nothing is tracked.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

async fn capture<R>(stream: R, shared: Arc<Mutex<Shared>>)
where
    R: AsyncRead + Unpin + Send + 'static,
{
    let mut lines = BufReader::new(stream).lines();
    while let Ok(Some(line)) = lines.next_line().await {
        let Ok(mut state) = shared.lock() else { return };
        if state.port.is_none() {
            state.port = detect_port(&line);
        }
        state.log.push_str(&line);
        state.log.push('\n');
        if state.log.len() > MAX_LOG_BYTES {
            let mut cut = state.log.len() - MAX_LOG_BYTES;
            while !state.log.is_char_boundary(cut) {
                cut += 1;
            }
            state.log.drain(..cut);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn argv(list: &[&str]) -> Vec<String> {
        list.iter().map(|s| (*s).to_string()).collect()
    }

    #[test]
    fn test_detect_port_from_vite_banner() {
        assert_eq!(
            detect_port(concat!(
                "  \x1b[32m➜\x1b[39m  Local:   ",
                "\x1b[36mhttp://localhost:\x1b[1m5173\x1b[22m/\x1b[39m",
            )),
            Some(5173)
        );
        assert_eq!(detect_port("listening on 0.0.0.0:3000"), Some(3000));
        assert_eq!(detect_port("ready in 120 ms"), None);
    }

    #[test]
    fn test_is_dev_server() {
        assert!(is_dev_server(&argv(&["npm", "run", "dev"])));
        assert!(is_dev_server(&argv(&["npm", "start"])));
        assert!(is_dev_server(&argv(&["npx", "vite", "--port", "3000"])));
        assert!(!is_dev_server(&argv(&["npm", "install"])));
        assert!(!is_dev_server(&argv(&["npm", "run", "build"])));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_spawn_list_and_kill() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = ProcessTable::default();
        let pid = table
            .spawn(&argv(&["sleep", "30"]), "sleep 30", dir.path(), &BTreeMap::new())
            .unwrap();

        let listed = table.list();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].pid, pid);
        assert!(listed[0].running);

        assert_eq!(table.kill("sleep"), vec![pid]);
        assert!(table.is_empty());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_port_is_captured_from_output() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = ProcessTable::default();
        let pid = table
            .spawn(
                &argv(&["sh", "-c", "echo 'Local: http://localhost:4321/'; sleep 30"]),
                "server",
                dir.path(),
                &BTreeMap::new(),
            )
            .unwrap();

        let mut port = None;
        for _ in 0..50 {
            port = table.active_port();
            if port.is_some() {
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
        }
        assert_eq!(port, Some(4321));
        assert!(table.output(pid).unwrap().contains("4321"));
        table.kill_all();
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_exited_processes_are_forgotten() {
        let dir = tempfile::tempdir().unwrap();
        let mut table = ProcessTable::default();
        let pid = table
            .spawn(&argv(&["true"]), "true", dir.path(), &BTreeMap::new())
            .unwrap();

        let mut forgotten = false;
        for _ in 0..50 {
            if !table.list().iter().any(|p| p.pid == pid) {
                forgotten = true;
                break;
            }
            tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        }
        assert!(forgotten);
        assert!(table.is_empty());
    }
}
