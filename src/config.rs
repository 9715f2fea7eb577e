use anyhow::{Context, Result, bail};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::runtime::SandboxSpec;

/// Config file looked up in the working directory.
pub const CONFIG_FILE: &str = "shellbox.toml";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub runtime: RuntimeConfig,
    #[serde(default)]
    pub sandbox: SandboxConfig,
    #[serde(default, rename = "virtual")]
    pub emulated: EmulatedConfig,
    #[serde(default)]
    pub session: SessionConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Which backend executes commands. Chosen once per process.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum,
)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// In-process shell over an in-memory filesystem
    #[default]
    #[serde(alias = "emulated")]
    #[value(alias = "emulated")]
    Virtual,
    /// One Docker container per session
    Docker,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Virtual => write!(f, "virtual"),
            Self::Docker => write!(f, "docker"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuntimeConfig {
    /// Backend: "virtual" or "docker"
    #[serde(default)]
    pub backend: Backend,

    /// Default bound for one command execution
    #[serde(default = "default_command_timeout")]
    pub command_timeout_secs: u64,

    /// Bound for creating and starting a sandbox
    #[serde(default = "default_create_timeout")]
    pub create_timeout_secs: u64,
}

impl Default for RuntimeConfig {
    fn default() -> Self {
        Self {
            backend: Backend::default(),
            command_timeout_secs: default_command_timeout(),
            create_timeout_secs: default_create_timeout(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SandboxConfig {
    /// Image with the build tooling preinstalled
    #[serde(default = "default_image")]
    pub image: String,

    /// Application root inside the sandbox
    #[serde(default = "default_workdir")]
    pub workdir: String,

    /// Memory ceiling (e.g., "2g", "512m")
    #[serde(default = "default_memory")]
    pub memory: String,

    /// CPU quota (e.g., "1", "0.5")
    #[serde(default = "default_cpus")]
    pub cpus: String,

    /// Relative CPU weight
    #[serde(default = "default_cpu_shares")]
    pub cpu_shares: i64,

    /// Port the application listens on inside the sandbox
    #[serde(default = "default_app_port")]
    pub app_port: u16,

    /// Host name used when building URLs
    #[serde(default = "default_public_host")]
    pub public_host: String,

    /// Docker network mode
    #[serde(default = "default_network_mode")]
    pub network_mode: String,

    /// Populate new sandboxes with the application boilerplate
    #[serde(default = "default_true")]
    pub seed_template: bool,

    /// Environment for every command
    #[serde(default = "default_env")]
    pub env: BTreeMap<String, String>,
}

impl Default for SandboxConfig {
    fn default() -> Self {
        Self {
            image: default_image(),
            workdir: default_workdir(),
            memory: default_memory(),
            cpus: default_cpus(),
            cpu_shares: default_cpu_shares(),
            app_port: default_app_port(),
            public_host: default_public_host(),
            network_mode: default_network_mode(),
            seed_template: true,
            env: default_env(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmulatedConfig {
    /// Where per-session disk mirrors live (default: cache dir)
    #[serde(default)]
    pub mirror_dir: Option<PathBuf>,

    /// Run unknown commands as host processes
    #[serde(default = "default_true")]
    pub forward_unknown: bool,
}

impl Default for EmulatedConfig {
    fn default() -> Self {
        Self {
            mirror_dir: None,
            forward_unknown: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionConfig {
    /// Sessions idle longer than this are reaped (0 disables)
    #[serde(default = "default_idle_timeout")]
    pub idle_timeout_secs: u64,

    /// How often the reaper runs
    #[serde(default = "default_reap_interval")]
    pub reap_interval_secs: u64,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            idle_timeout_secs: default_idle_timeout(),
            reap_interval_secs: default_reap_interval(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Also write JSON logs to this file
    #[serde(default)]
    pub file: Option<PathBuf>,
}

// Default value functions
fn default_true() -> bool {
    true
}

fn default_command_timeout() -> u64 {
    120
}

fn default_create_timeout() -> u64 {
    120
}

fn default_image() -> String {
    "shellbox/node:20".to_string()
}

fn default_workdir() -> String {
    "/app".to_string()
}

fn default_memory() -> String {
    "2g".to_string()
}

fn default_cpus() -> String {
    "1".to_string()
}

fn default_cpu_shares() -> i64 {
    512
}

fn default_app_port() -> u16 {
    3000
}

fn default_public_host() -> String {
    "localhost".to_string()
}

fn default_network_mode() -> String {
    "bridge".to_string()
}

fn default_env() -> BTreeMap<String, String> {
    BTreeMap::from([("NODE_ENV".to_string(), "development".to_string())])
}

fn default_idle_timeout() -> u64 {
    1800
}

fn default_reap_interval() -> u64 {
    60
}

/// Parse memory limit string (e.g., "8g", "512m", "64k") to bytes
pub fn parse_memory_limit(limit: &str) -> Result<i64> {
    let limit = limit.trim().to_lowercase();
    let limit = limit.strip_suffix('b').unwrap_or(&limit);

    let (num, unit) = if let Some(num) = limit.strip_suffix('g') {
        (num, 1024 * 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('m') {
        (num, 1024 * 1024)
    } else if let Some(num) = limit.strip_suffix('k') {
        (num, 1024)
    } else {
        (limit, 1)
    };
    let value: i64 = num
        .parse()
        .with_context(|| format!("Invalid memory limit: {limit}"))?;
    if value <= 0 {
        bail!("Memory limit must be positive: {limit}");
    }
    Ok(value * unit)
}

impl SandboxConfig {
    /// Memory ceiling in bytes.
    pub fn memory_bytes(&self) -> Result<i64> {
        parse_memory_limit(&self.memory)
    }

    /// CPU quota as a fraction of CPUs.
    pub fn cpu_quota(&self) -> Result<f64> {
        let cpus: f64 = self
            .cpus
            .trim()
            .parse()
            .with_context(|| format!("Invalid CPU limit: {}", self.cpus))?;
        if !cpus.is_finite() || cpus <= 0.0 {
            bail!("CPU limit must be a positive number: {}", self.cpus);
        }
        Ok(cpus)
    }
}

impl Config {
    /// Load configuration from `shellbox.toml` in `dir`, using defaults if
    /// not found
    pub fn load(dir: &Path) -> Result<Self> {
        let config_path = dir.join(CONFIG_FILE);
        if !config_path.exists() {
            return Ok(Self::default());
        }
        Self::load_file(&config_path)
    }

    /// Load configuration from an explicit path, which must exist
    pub fn load_file(config_path: &Path) -> Result<Self> {
        let content = fs::read_to_string(config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;

        config.validate()?;
        Ok(config)
    }

    /// Rejects settings that would fail later in a confusing way
    pub fn validate(&self) -> Result<()> {
        if !self.sandbox.workdir.starts_with('/') {
            bail!("sandbox.workdir must be absolute: {}", self.sandbox.workdir);
        }
        if self.sandbox.app_port == 0 {
            bail!("sandbox.app_port must be nonzero");
        }
        self.sandbox.memory_bytes()?;
        self.sandbox.cpu_quota()?;
        Ok(())
    }

    /// Resource template for new sandboxes
    pub fn sandbox_spec(&self, session_id: &str) -> Result<SandboxSpec> {
        Ok(SandboxSpec {
            session_id: session_id.to_string(),
            memory_bytes: self.sandbox.memory_bytes()?,
            cpus: self.sandbox.cpu_quota()?,
            cpu_shares: self.sandbox.cpu_shares,
            env: self.sandbox.env.clone(),
        })
    }

    pub fn command_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.command_timeout_secs)
    }

    pub fn create_timeout(&self) -> Duration {
        Duration::from_secs(self.runtime.create_timeout_secs)
    }

    /// `None` when idle reaping is disabled
    pub fn idle_timeout(&self) -> Option<Duration> {
        (self.session.idle_timeout_secs > 0)
            .then(|| Duration::from_secs(self.session.idle_timeout_secs))
    }

    pub fn reap_interval(&self) -> Duration {
        Duration::from_secs(self.session.reap_interval_secs.max(1))
    }

    /// Parent directory of the per-session disk mirrors
    pub fn mirror_root(&self) -> PathBuf {
        self.emulated.mirror_dir.clone().unwrap_or_else(|| {
            dirs::cache_dir()
                .unwrap_or_else(std::env::temp_dir)
                .join("shellbox")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.runtime.backend, Backend::Virtual);
        assert_eq!(config.sandbox.workdir, "/app");
        assert_eq!(config.sandbox.app_port, 3000);
        assert!(config.sandbox.seed_template);
        assert!(config.emulated.forward_unknown);
        assert_eq!(config.command_timeout(), Duration::from_secs(120));
        assert_eq!(
            config.sandbox.env.get("NODE_ENV").map(String::as_str),
            Some("development")
        );
    }

    #[test]
    fn test_parse_config() {
        let toml = r#"
[runtime]
backend = "docker"
command_timeout_secs = 30

[sandbox]
image = "node:20-slim"
memory = "512m"
cpus = "0.5"
env = { API_URL = "http://localhost:8080" }

[virtual]
mirror_dir = "/tmp/mirrors"
forward_unknown = false

[session]
idle_timeout_secs = 0
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.runtime.backend, Backend::Docker);
        assert_eq!(config.command_timeout(), Duration::from_secs(30));
        assert_eq!(config.sandbox.memory_bytes().unwrap(), 512 * 1024 * 1024);
        assert!((config.sandbox.cpu_quota().unwrap() - 0.5).abs() < f64::EPSILON);
        assert_eq!(config.mirror_root(), PathBuf::from("/tmp/mirrors"));
        assert!(!config.emulated.forward_unknown);
        assert!(config.idle_timeout().is_none());
        assert!(!config.sandbox.env.contains_key("NODE_ENV"));
    }

    #[test]
    fn test_emulated_alias() {
        let config: Config = toml::from_str("[runtime]\nbackend = \"emulated\"\n").unwrap();
        assert_eq!(config.runtime.backend, Backend::Virtual);
    }

    #[test]
    fn test_parse_memory_limit() {
        assert_eq!(parse_memory_limit("8g").unwrap(), 8 * 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("512m").unwrap(), 512 * 1024 * 1024);
        assert_eq!(parse_memory_limit("1G").unwrap(), 1024 * 1024 * 1024);
        assert_eq!(parse_memory_limit("64kb").unwrap(), 64 * 1024);
        assert_eq!(parse_memory_limit("1048576").unwrap(), 1_048_576);
        assert!(parse_memory_limit("lots").is_err());
        assert!(parse_memory_limit("0m").is_err());
    }

    #[test]
    fn test_cpu_quota_rejects_non_finite_values() {
        let mut config = Config::default();
        for bad in ["NaN", "inf", "-inf", "0", "-1", "two"] {
            config.sandbox.cpus = bad.to_string();
            assert!(config.sandbox.cpu_quota().is_err(), "{bad}");
            assert!(config.validate().is_err(), "{bad}");
        }
        config.sandbox.cpus = " 1.5 ".to_string();
        assert!((config.sandbox.cpu_quota().unwrap() - 1.5).abs() < f64::EPSILON);
    }

    #[test]
    fn test_validate_rejects_relative_workdir() {
        let mut config = Config::default();
        config.sandbox.workdir = "app".to_string();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_missing_file_uses_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load(dir.path()).unwrap();
        assert_eq!(config.sandbox.image, "shellbox/node:20");

        fs::write(dir.path().join(CONFIG_FILE), "[sandbox]\nmemory = \"nope\"\n").unwrap();
        assert!(Config::load(dir.path()).is_err());
    }

    #[test]
    fn test_sandbox_spec() {
        let spec = Config::default().sandbox_spec("s1").unwrap();
        assert_eq!(spec.session_id, "s1");
        assert_eq!(spec.memory_bytes, 2 * 1024 * 1024 * 1024);
        assert_eq!(spec.cpu_shares, 512);
    }
}
