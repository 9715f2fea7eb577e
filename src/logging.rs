//! Tracing subscriber setup for the binary.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result, anyhow};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling;
use tracing_subscriber::prelude::*;
use tracing_subscriber::{EnvFilter, fmt};

/// Filter used when `RUST_LOG` is not set.
fn default_directive(verbose: bool) -> &'static str {
    if verbose {
        "shellbox=debug"
    } else {
        "shellbox=warn"
    }
}

/// Installs the global subscriber: human output on stderr, plus JSON lines in
/// `file` when given. Keep the returned guard alive until exit so buffered
/// file output is flushed.
pub fn init(verbose: bool, file: Option<&Path>) -> Result<Option<WorkerGuard>> {
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(default_directive(verbose)));
    let stderr_layer = fmt::layer().with_writer(std::io::stderr).with_target(false);

    let (file_layer, guard) = match file {
        Some(path) => {
            let (directory, file_name) = split_path(path)?;
            fs::create_dir_all(&directory).with_context(|| {
                format!("Failed to create log directory at {}", directory.display())
            })?;
            let (writer, guard) =
                tracing_appender::non_blocking(rolling::never(directory, file_name));
            let layer = fmt::layer()
                .json()
                .with_writer(writer)
                .with_ansi(false);
            (Some(layer), Some(guard))
        }
        None => (None, None),
    };

    tracing_subscriber::registry()
        .with(filter)
        .with(stderr_layer)
        .with(file_layer)
        .try_init()
        .context("Failed to initialize tracing subscriber")?;

    Ok(guard)
}

fn split_path(path: &Path) -> Result<(PathBuf, &str)> {
    let file_name = path
        .file_name()
        .and_then(|n| n.to_str())
        .ok_or_else(|| anyhow!("Invalid log file name: {}", path.display()))?;

    let dir = path
        .parent()
        .filter(|p| !p.as_os_str().is_empty())
        .map_or_else(|| PathBuf::from("."), Path::to_path_buf);

    Ok((dir, file_name))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_directive() {
        assert_eq!(default_directive(true), "shellbox=debug");
        assert_eq!(default_directive(false), "shellbox=warn");
    }

    #[test]
    fn test_split_path() {
        let (dir, name) = split_path(Path::new("logs/shellbox.log")).unwrap();
        assert_eq!(dir, PathBuf::from("logs"));
        assert_eq!(name, "shellbox.log");

        let (dir, name) = split_path(Path::new("shellbox.log")).unwrap();
        assert_eq!(dir, PathBuf::from("."));
        assert_eq!(name, "shellbox.log");

        assert!(split_path(Path::new("/")).is_err());
    }
}
