//! Remove managed sandboxes left behind by earlier runs.

use anyhow::{Context, Result};
use colored::Colorize;

use shellbox::config::Config;

pub(crate) async fn run(config: &Config) -> Result<()> {
    let registry = super::open_registry(config).await?;
    // A fresh registry owns no sessions, so every managed sandbox is orphaned.
    let removed = registry
        .cleanup_orphaned()
        .await
        .context("Failed to remove orphaned sandboxes")?;
    println!("{}", format_result(removed));
    Ok(())
}

fn format_result(removed: usize) -> String {
    match removed {
        0 => format!("{} Nothing to clean.", "ℹ".blue()),
        1 => format!("{} Removed 1 sandbox.", "✓".green().bold()),
        n => format!("{} Removed {n} sandboxes.", "✓".green().bold()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_result() {
        assert!(format_result(0).contains("Nothing to clean."));
        assert!(format_result(1).contains("Removed 1 sandbox."));
        assert!(format_result(3).contains("Removed 3 sandboxes."));
    }
}
