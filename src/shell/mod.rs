//! The virtual shell: a small POSIX-like command interpreter over a
//! [`VirtualFs`].
//!
//! A command line is split into steps (see [`parser`]), each step is
//! tokenized with the environment as it stands at that point, and the command
//! name is looked up in the built-in table. Anything else is forwarded to a
//! host process running inside an on-disk mirror of the tree.

mod args;
mod builtins;
pub mod parser;
pub mod process;

use std::collections::BTreeMap;
use std::io;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Instant;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::{debug, warn};

pub use builtins::is_builtin;
use builtins::{Context, Invocation};
use parser::{Connector, SimpleCommand, StderrTarget, Step};
use process::ProcessTable;

use crate::runtime::CommandResult;
use crate::vfs::{VirtualFs, path};

/// Target that swallows output.
const DEV_NULL: &str = "/dev/null";

/// Variables that name virtual paths and must not leak into host processes.
const VIRTUAL_ONLY_VARS: &[&str] = &["HOME", "PWD", "OLDPWD"];

/// Result of one built-in or forwarded command, before redirection.
#[derive(Debug, Default)]
pub(crate) struct Output {
    pub stdout: Vec<u8>,
    pub stderr: String,
    pub exit_code: i32,
}

impl Output {
    pub fn ok() -> Self {
        Self::default()
    }

    pub fn stdout(bytes: impl Into<Vec<u8>>) -> Self {
        Self {
            stdout: bytes.into(),
            ..Self::default()
        }
    }

    /// A failure with `message` (plus newline) on stderr.
    pub fn error(code: i32, message: impl Into<String>) -> Self {
        let mut out = Self::ok();
        out.fail(code, &message.into());
        out
    }

    /// Records an error line and marks the output failed.
    pub fn fail(&mut self, code: i32, message: &str) {
        if !message.is_empty() {
            self.stderr.push_str(message);
            self.stderr.push('\n');
        }
        self.exit_code = code;
    }

    /// Appends another output, keeping the first failure code.
    pub fn merge(&mut self, other: Output) {
        self.stdout.extend(other.stdout);
        self.stderr.push_str(&other.stderr);
        if self.exit_code == 0 {
            self.exit_code = other.exit_code;
        }
    }
}

impl From<Output> for CommandResult {
    fn from(out: Output) -> Self {
        CommandResult {
            stdout: String::from_utf8_lossy(&out.stdout).into_owned(),
            stderr: out.stderr,
            exit_code: out.exit_code,
        }
    }
}

/// Construction parameters for a [`VirtualShell`].
#[derive(Debug, Clone)]
pub struct ShellOptions {
    /// Starting (and home) directory, created if missing.
    pub workdir: String,
    /// Variables present at the start of every command line.
    pub env: BTreeMap<String, String>,
    /// On-disk mirror used by forwarded commands. `None` disables forwarding.
    pub mirror: Option<PathBuf>,
    /// Whether unknown commands may run as host processes.
    pub forward_unknown: bool,
}

impl Default for ShellOptions {
    fn default() -> Self {
        Self {
            workdir: "/app".to_string(),
            env: BTreeMap::new(),
            mirror: None,
            forward_unknown: false,
        }
    }
}

/// A resolved redirection sink.
struct Sink {
    resolved: String,
    shown: String,
    append: bool,
}

/// One sandbox's shell state.
#[derive(Debug)]
pub struct VirtualShell {
    fs: VirtualFs,
    cwd: String,
    base_env: BTreeMap<String, String>,
    history: Vec<String>,
    processes: ProcessTable,
    mirror: Option<PathBuf>,
    forward_unknown: bool,
}

impl VirtualShell {
    /// Creates a shell with an empty filesystem containing the workdir.
    pub fn new(options: ShellOptions) -> Self {
        let workdir = path::normalize(&options.workdir);
        let mut fs = VirtualFs::new();
        if let Err(e) = fs.make_dir(&workdir, true) {
            warn!(workdir, error = %e, "could not create workdir, starting at /");
        }
        let cwd = if fs.is_dir(&workdir) {
            workdir
        } else {
            path::ROOT.to_string()
        };

        let mut base_env = options.env;
        base_env.insert("HOME".to_string(), cwd.clone());
        base_env.entry("SHELL".to_string()).or_insert_with(|| "/bin/sh".to_string());

        Self {
            fs,
            cwd,
            base_env,
            history: Vec::new(),
            processes: ProcessTable::default(),
            mirror: options.mirror,
            forward_unknown: options.forward_unknown,
        }
    }

    /// The filesystem.
    pub fn fs(&self) -> &VirtualFs {
        &self.fs
    }

    /// Mutable access to the filesystem.
    pub fn fs_mut(&mut self) -> &mut VirtualFs {
        &mut self.fs
    }

    /// Current working directory.
    pub fn cwd(&self) -> &str {
        &self.cwd
    }

    /// Every command line executed so far.
    pub fn history(&self) -> &[String] {
        &self.history
    }

    /// Background processes started by this shell.
    pub fn processes(&mut self) -> &mut ProcessTable {
        &mut self.processes
    }

    /// Runs one command line and returns its combined result. Never fails:
    /// syntax and command errors are reported through the exit code.
    pub async fn execute(&mut self, input: &str) -> CommandResult {
        let started = Instant::now();
        let trimmed = input.trim();
        if !trimmed.is_empty() {
            self.history.push(trimmed.to_string());
        }

        let steps = match parser::parse_script(input) {
            Ok(steps) => steps,
            Err(e) => {
                debug!(error = %e, "parse error");
                return Output::error(2, format!("shellbox: {e}")).into();
            }
        };

        let mut env = self.base_env.clone();
        env.insert("PWD".to_string(), self.cwd.clone());
        let mut combined = Output::ok();
        let mut last = 0;
        for step in &steps {
            if step.connector == Connector::OnSuccess && last != 0 {
                continue;
            }
            let out = self.run_step(step, &mut env, last).await;
            last = out.exit_code;
            combined.stdout.extend(out.stdout);
            combined.stderr.push_str(&out.stderr);
            self.repair_cwd();
        }
        combined.exit_code = last;

        debug!(
            exit_code = last,
            steps = steps.len(),
            elapsed_ms = started.elapsed().as_millis() as u64,
            "executed command line"
        );
        combined.into()
    }

    /// Kills background processes and removes the disk mirror.
    pub fn shutdown(&mut self) {
        self.processes.kill_all();
        if let Some(mirror) = &self.mirror {
            match std::fs::remove_dir_all(mirror) {
                Ok(()) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => warn!(mirror = %mirror.display(), error = %e, "failed to remove mirror"),
            }
        }
    }

    fn resolve(&self, p: &str) -> String {
        path::resolve(p, &self.cwd)
    }

    fn sink(&self, target: &str, append: bool) -> Sink {
        Sink {
            resolved: self.resolve(target),
            shown: target.to_string(),
            append,
        }
    }

    /// Moves the working directory up until it names an existing directory.
    fn repair_cwd(&mut self) {
        while !self.fs.is_dir(&self.cwd) {
            self.cwd = path::parent(&self.cwd);
        }
    }

    async fn run_step(
        &mut self,
        step: &Step,
        env: &mut BTreeMap<String, String>,
        last: i32,
    ) -> Output {
        let cmd = {
            let vars = |name: &str| {
                if name == "?" {
                    Some(last.to_string())
                } else {
                    env.get(name).cloned()
                }
            };
            match parser::tokenize(&step.text, &vars) {
                Ok(cmd) => cmd,
                Err(e) => return Output::error(2, format!("shellbox: {e}")),
            }
        };

        let stdout_sink = cmd.stdout.as_ref().map(|r| self.sink(&r.target, r.append));
        let stderr_route = match &cmd.stderr {
            StderrTarget::Inherit => None,
            StderrTarget::Stdout => Some(None),
            StderrTarget::File(r) => Some(Some(self.sink(&r.target, r.append))),
        };

        let stdin = match (&step.stdin, &cmd.stdin_file) {
            (Some(body), _) => Some(body.clone().into_bytes()),
            (None, Some(file)) => match self.fs.read(&self.resolve(file)) {
                Ok(bytes) => Some(bytes.to_vec()),
                Err(e) => return Output::error(1, format!("shellbox: {file}: {}", e.reason())),
            },
            (None, None) => None,
        };

        let output = if cmd.argv.is_empty() {
            env.extend(cmd.assignments.iter().cloned());
            Output::ok()
        } else {
            self.dispatch(&cmd, step, env, stdin).await
        };
        self.redirect(output, stdout_sink, stderr_route)
    }

    async fn dispatch(
        &mut self,
        cmd: &SimpleCommand,
        step: &Step,
        env: &mut BTreeMap<String, String>,
        stdin: Option<Vec<u8>>,
    ) -> Output {
        let mut scoped;
        let env = if cmd.assignments.is_empty() {
            env
        } else {
            scoped = env.clone();
            scoped.extend(cmd.assignments.iter().cloned());
            &mut scoped
        };

        let name = cmd.argv[0].as_str();
        if let Some(handler) = builtins::lookup(name) {
            let Self {
                fs,
                cwd,
                history,
                processes,
                ..
            } = self;
            let mut ctx = Context {
                fs,
                cwd,
                env,
                history,
                processes,
            };
            return handler(
                &mut ctx,
                &Invocation {
                    name,
                    args: &cmd.argv[1..],
                    stdin: stdin.as_deref(),
                },
            );
        }

        if step.background || process::is_dev_server(&cmd.argv) {
            return self.launch_background(&cmd.argv, &step.text, env);
        }
        self.run_external(&cmd.argv, env, stdin).await
    }

    fn redirect(
        &mut self,
        mut out: Output,
        stdout: Option<Sink>,
        stderr: Option<Option<Sink>>,
    ) -> Output {
        match stderr {
            None => {}
            Some(None) => {
                let merged = std::mem::take(&mut out.stderr);
                out.stdout.extend(merged.into_bytes());
            }
            Some(Some(sink)) => {
                let bytes = std::mem::take(&mut out.stderr).into_bytes();
                if let Err(msg) = self.write_sink(&sink, &bytes) {
                    out.fail(1, &msg);
                }
            }
        }
        if let Some(sink) = stdout {
            let bytes = std::mem::take(&mut out.stdout);
            if let Err(msg) = self.write_sink(&sink, &bytes) {
                out.fail(1, &msg);
            }
        }
        out
    }

    fn write_sink(&mut self, sink: &Sink, bytes: &[u8]) -> Result<(), String> {
        if sink.resolved == DEV_NULL {
            return Ok(());
        }
        let result = if sink.append {
            self.fs.append(&sink.resolved, bytes)
        } else {
            self.fs.write(&sink.resolved, bytes)
        };
        result.map_err(|e| format!("shellbox: {}: {}", sink.shown, e.reason()))
    }

    // ---- Host processes ----

    fn mirror_dir(&self) -> Option<PathBuf> {
        if !self.forward_unknown {
            return None;
        }
        self.mirror.clone()
    }

    fn host_cwd(mirror: &Path, cwd: &str) -> PathBuf {
        mirror.join(cwd.trim_start_matches('/'))
    }

    fn host_env(env: &BTreeMap<String, String>) -> BTreeMap<String, String> {
        env.iter()
            .filter(|(k, _)| !VIRTUAL_ONLY_VARS.contains(&k.as_str()))
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect()
    }

    fn not_found(name: &str) -> Output {
        Output::error(127, format!("{name}: command not found"))
    }

    fn launch_background(
        &mut self,
        argv: &[String],
        text: &str,
        env: &BTreeMap<String, String>,
    ) -> Output {
        let Some(mirror) = self.mirror_dir() else {
            return Self::not_found(&argv[0]);
        };
        if let Err(e) = self.fs.sync_to_disk(&mirror) {
            warn!(error = %e, "mirror sync failed");
            return Output::error(1, format!("shellbox: mirror sync failed: {e}"));
        }
        let dir = Self::host_cwd(&mirror, &self.cwd);
        let command = parser::strip_background(text).unwrap_or(text);
        match self.processes.spawn(argv, command, &dir, &Self::host_env(env)) {
            Ok(pid) => Output::stdout(format!("[{}] {pid}\n", self.processes.len())),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Self::not_found(&argv[0]),
            Err(e) => Output::error(126, format!("{}: {e}", argv[0])),
        }
    }

    async fn run_external(
        &mut self,
        argv: &[String],
        env: &BTreeMap<String, String>,
        stdin: Option<Vec<u8>>,
    ) -> Output {
        let Some(mirror) = self.mirror_dir() else {
            return Self::not_found(&argv[0]);
        };
        if let Err(e) = self.fs.sync_to_disk(&mirror) {
            warn!(error = %e, "mirror sync failed");
            return Output::error(1, format!("shellbox: mirror sync failed: {e}"));
        }

        let started = Instant::now();
        let mut child = match Command::new(&argv[0])
            .args(&argv[1..])
            .current_dir(Self::host_cwd(&mirror, &self.cwd))
            .envs(Self::host_env(env))
            .stdin(if stdin.is_some() { Stdio::piped() } else { Stdio::null() })
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
        {
            Ok(child) => child,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Self::not_found(&argv[0]),
            Err(e) => return Output::error(126, format!("{}: {e}", argv[0])),
        };

        if let (Some(bytes), Some(mut pipe)) = (stdin, child.stdin.take()) {
            tokio::spawn(async move {
                if let Err(e) = pipe.write_all(&bytes).await {
                    debug!(error = %e, "subprocess closed stdin early");
                }
            });
        }

        let out = match child.wait_with_output().await {
            Ok(o) => Output {
                stdout: o.stdout,
                stderr: String::from_utf8_lossy(&o.stderr).into_owned(),
                exit_code: o.status.code().unwrap_or(1),
            },
            Err(e) => Output::error(1, format!("{}: {e}", argv[0])),
        };

        if let Err(e) = self.fs.load_from_disk(&mirror) {
            warn!(error = %e, "mirror reload failed");
        }
        debug!(
            command = %argv[0],
            exit_code = out.exit_code,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "forwarded command finished"
        );
        out
    }
}
