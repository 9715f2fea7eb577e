//! Stop and remove one session's sandbox.

use anyhow::{Context, Result};
use colored::Colorize;

use shellbox::config::Config;

/// Stopping a session that has no sandbox succeeds.
pub(crate) async fn run(config: &Config, session: &str) -> Result<()> {
    let runtime = super::open_runtime(config).await?;
    runtime
        .stop_container(session)
        .await
        .with_context(|| format!("Failed to stop session {session}"))?;
    println!("{} Stopped session {}", "✓".green().bold(), session.cyan());
    Ok(())
}
