//! Write a default `shellbox.toml` into the current directory.
//!
//! The core takes closures for filesystem access so it can be tested without
//! touching disk.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use shellbox::config::CONFIG_FILE;
use shellbox::templates;

// -----------------------------------------------------------------------------
// Public API
// -----------------------------------------------------------------------------

/// Runs the init command in the current directory.
pub(crate) fn run(force: bool) -> Result<()> {
    let cwd = std::env::current_dir().context("Failed to get current directory")?;
    info!("Initializing shellbox in {}", cwd.display());

    let target = PathBuf::from(CONFIG_FILE);
    let result = init_config(
        &target,
        force,
        |path| cwd.join(path).exists(),
        |path, content| {
            fs::write(cwd.join(path), content)
                .with_context(|| format!("Failed to write {}", path.display()))
        },
    )?;

    print!("{}", format_result(&target, result));
    Ok(())
}

// -----------------------------------------------------------------------------
// Core logic
// -----------------------------------------------------------------------------

/// What happened to the config file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WriteResult {
    Created,
    Overwritten,
    Skipped,
}

fn init_config<E, W>(path: &Path, force: bool, exists: E, mut write_file: W) -> Result<WriteResult>
where
    E: Fn(&Path) -> bool,
    W: FnMut(&Path, &str) -> Result<()>,
{
    let existed = exists(path);
    if existed && !force {
        return Ok(WriteResult::Skipped);
    }
    write_file(path, templates::SHELLBOX_TOML)?;
    Ok(if existed {
        WriteResult::Overwritten
    } else {
        WriteResult::Created
    })
}

fn format_result(path: &Path, result: WriteResult) -> String {
    let mut out = String::new();
    let shown = path.display().to_string();
    let _ = match result {
        WriteResult::Created => writeln!(out, "{} Created {}", "✓".green().bold(), shown.cyan()),
        WriteResult::Overwritten => writeln!(out, "{} Overwrote {}", "↻".blue(), shown.cyan()),
        WriteResult::Skipped => writeln!(
            out,
            "{} {} already exists (use --force to overwrite)",
            "⊘".yellow(),
            shown
        ),
    };
    if result != WriteResult::Skipped {
        let _ = writeln!(
            out,
            "  Run {} to try it out.",
            "shellbox exec --session demo 'ls -la'".green()
        );
    }
    out
}

// -----------------------------------------------------------------------------
// Tests
// -----------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use std::cell::RefCell;

    #[test]
    fn test_creates_when_missing() {
        let written = RefCell::new(Vec::new());
        let result = init_config(Path::new(CONFIG_FILE), false, |_| false, |path, content| {
            written.borrow_mut().push((path.to_path_buf(), content.len()));
            Ok(())
        })
        .unwrap();
        assert_eq!(result, WriteResult::Created);
        assert_eq!(written.borrow().len(), 1);
    }

    #[test]
    fn test_skips_existing_without_force() {
        let result = init_config(Path::new(CONFIG_FILE), false, |_| true, |_, _| {
            panic!("must not write")
        })
        .unwrap();
        assert_eq!(result, WriteResult::Skipped);
        assert!(format_result(Path::new(CONFIG_FILE), result).contains("--force"));
    }

    #[test]
    fn test_force_overwrites() {
        let result =
            init_config(Path::new(CONFIG_FILE), true, |_| true, |_, _| Ok(())).unwrap();
        assert_eq!(result, WriteResult::Overwritten);
    }
}
