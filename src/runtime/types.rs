//! Records exchanged between callers and runtime backends.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Output of one command execution.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CommandResult {
    pub stdout: String,
    pub stderr: String,
    pub exit_code: i32,
}

impl CommandResult {
    /// True if the command exited 0.
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// The unit of upload and download.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileRecord {
    /// Path inside the sandbox; relative paths are taken from the workdir.
    pub path: String,
    pub content: Vec<u8>,
    /// Permission bits.
    pub mode: u32,
    pub modified: DateTime<Utc>,
}

impl FileRecord {
    /// A regular `0644` file stamped now.
    pub fn new(path: impl Into<String>, content: impl Into<Vec<u8>>) -> Self {
        Self {
            path: path.into(),
            content: content.into(),
            mode: crate::vfs::FILE_MODE,
            modified: Utc::now(),
        }
    }
}

/// Point-in-time resource usage of one sandbox.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ResourceStats {
    pub memory_usage: u64,
    pub memory_limit: u64,
    pub memory_percent: f64,
    pub cpu_percent: f64,
    pub network_rx_bytes: u64,
    pub network_tx_bytes: u64,
}

/// Lifecycle state of a sandbox.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ContainerStatus {
    Created,
    Running,
    Stopped,
}

impl std::fmt::Display for ContainerStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            Self::Created => "created",
            Self::Running => "running",
            Self::Stopped => "stopped",
        };
        f.write_str(s)
    }
}

/// An internal port and where it is published on the host.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PortMapping {
    pub internal: u16,
    pub host: Option<u16>,
}

/// Introspection record for one sandbox.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerInfo {
    pub name: String,
    pub status: ContainerStatus,
    pub ports: Vec<PortMapping>,
    pub created_at: DateTime<Utc>,
    pub session_id: String,
}

/// Where a started dev server can be reached.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DevServerInfo {
    pub url: String,
    pub port: u16,
    pub running: bool,
}

/// Everything a backend needs to create one sandbox.
#[derive(Debug, Clone, PartialEq)]
pub struct SandboxSpec {
    pub session_id: String,
    /// Hard memory ceiling in bytes.
    pub memory_bytes: i64,
    /// CPU quota in whole or fractional CPUs.
    pub cpus: f64,
    /// Relative CPU weight.
    pub cpu_shares: i64,
    pub env: BTreeMap<String, String>,
}

impl SandboxSpec {
    /// Same limits, different session.
    pub fn for_session(&self, session_id: impl Into<String>) -> Self {
        Self {
            session_id: session_id.into(),
            ..self.clone()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_command_result_serializes_with_snake_case_fields() {
        let r = CommandResult {
            stdout: "hi\n".into(),
            stderr: String::new(),
            exit_code: 0,
        };
        let json = serde_json::to_value(&r).unwrap();
        assert_eq!(json["exit_code"], 0);
        assert!(r.success());
    }

    #[test]
    fn test_status_display_matches_serde() {
        assert_eq!(ContainerStatus::Running.to_string(), "running");
        assert_eq!(
            serde_json::to_value(ContainerStatus::Stopped).unwrap(),
            "stopped"
        );
    }

    #[test]
    fn test_spec_for_session_keeps_limits() {
        let spec = SandboxSpec {
            session_id: "template".into(),
            memory_bytes: 1024,
            cpus: 1.5,
            cpu_shares: 512,
            env: BTreeMap::new(),
        };
        let s = spec.for_session("s1");
        assert_eq!(s.session_id, "s1");
        assert_eq!(s.memory_bytes, 1024);
    }
}
