//! Interactive line REPL against one session.
//!
//! Input is accumulated until it forms a complete command line, so heredocs
//! and multi-line quotes can be typed naturally.

use std::io::{IsTerminal, Write};

use anyhow::{Context, Result};
use colored::Colorize;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::warn;

use shellbox::config::Config;
use shellbox::shell::parser;

const PROMPT: &str = "shellbox$ ";
const CONTINUATION: &str = "> ";

/// Runs the REPL until EOF or `exit`.
pub(crate) async fn run(config: &Config, session: &str, keep: bool) -> Result<()> {
    let registry = super::open_registry(config).await?;
    registry
        .get_or_create(session)
        .await
        .with_context(|| format!("Failed to create sandbox for session {session}"))?;

    let interactive = std::io::stdin().is_terminal();
    if interactive {
        eprintln!(
            "{} session {} on the {} backend. Type {} to leave.",
            "●".green(),
            session.cyan(),
            config.runtime.backend,
            "exit".yellow()
        );
    }

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut buffer = String::new();
    loop {
        if interactive {
            prompt(if buffer.is_empty() { PROMPT } else { CONTINUATION })?;
        }
        let Some(line) = lines.next_line().await.context("Failed to read input")? else {
            break;
        };
        if buffer.is_empty() && is_exit(&line) {
            break;
        }
        if !buffer.is_empty() {
            buffer.push('\n');
        }
        buffer.push_str(&line);
        if needs_more_input(&buffer) {
            continue;
        }

        let command = std::mem::take(&mut buffer);
        if command.trim().is_empty() {
            continue;
        }
        match registry.execute(session, &command, None).await {
            Ok(result) => super::exec::emit(&result)?,
            Err(e) if e.is_timeout() => eprintln!("{} {e}", "✗".red()),
            Err(e) => {
                eprintln!("{} {e}", "✗".red());
                break;
            }
        }
    }

    if !keep {
        if let Err(e) = registry.remove_container(session).await {
            warn!(session_id = session, error = %e, "failed to stop sandbox");
        }
    }
    Ok(())
}

fn prompt(text: &str) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    write!(stdout, "{text}")?;
    stdout.flush()?;
    Ok(())
}

fn is_exit(line: &str) -> bool {
    matches!(line.trim(), "exit" | "quit" | "logout")
}

/// True while the buffer ends inside a quote or an open heredoc.
fn needs_more_input(buffer: &str) -> bool {
    matches!(parser::parse_script(buffer), Err(e) if e.is_incomplete())
}
