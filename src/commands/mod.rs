//! CLI command implementations.
//!
//! Each submodule implements one `shellbox` subcommand. Formatting is kept
//! in pure functions so it can be tested without a backend.

pub mod clean;
pub mod exec;
pub mod init;
pub mod shell;
pub mod stats;
pub mod status;
pub mod stop;

use std::sync::Arc;

use anyhow::{Context, Result};

use shellbox::config::Config;
use shellbox::registry::SessionRegistry;
use shellbox::runtime::{self, Runtime};

/// Builds the configured backend.
pub(crate) async fn open_runtime(config: &Config) -> Result<Arc<dyn Runtime>> {
    runtime::create_runtime(config)
        .await
        .with_context(|| format!("Failed to start the {} backend", config.runtime.backend))
}

/// Builds the configured backend wrapped in a session registry.
pub(crate) async fn open_registry(config: &Config) -> Result<SessionRegistry> {
    let runtime = open_runtime(config).await?;
    let template = config.sandbox_spec("template")?;
    Ok(SessionRegistry::new(runtime, template))
}

/// Human-readable byte count.
pub(crate) fn format_bytes(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KiB", "MiB", "GiB", "TiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{value:.1} {}", UNITS[unit])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_bytes() {
        assert_eq!(format_bytes(0), "0 B");
        assert_eq!(format_bytes(1023), "1023 B");
        assert_eq!(format_bytes(1536), "1.5 KiB");
        assert_eq!(format_bytes(2 * 1024 * 1024 * 1024), "2.0 GiB");
    }
}
