//! Run one or more command lines in a session's sandbox.

use std::io::Write;
use std::time::Duration;

use anyhow::{Context, Result};
use tracing::{debug, warn};

use shellbox::config::Config;
use shellbox::registry::SessionRegistry;
use shellbox::runtime::CommandResult;

/// Runs each command in order and returns the last exit code. The sandbox is
/// stopped afterwards unless `keep` is set.
pub(crate) async fn run(
    config: &Config,
    session: &str,
    keep: bool,
    timeout: Option<u64>,
    commands: &[String],
) -> Result<i32> {
    let registry = super::open_registry(config).await?;
    let outcome = run_all(&registry, session, timeout.map(Duration::from_secs), commands).await;

    if !keep {
        if let Err(e) = registry.remove_container(session).await {
            warn!(session_id = session, error = %e, "failed to stop sandbox");
        }
    }
    outcome
}

async fn run_all(
    registry: &SessionRegistry,
    session: &str,
    timeout: Option<Duration>,
    commands: &[String],
) -> Result<i32> {
    registry
        .get_or_create(session)
        .await
        .with_context(|| format!("Failed to create sandbox for session {session}"))?;

    let mut last = 0;
    for command in commands {
        debug!(session_id = session, command = %command, "executing");
        let result = registry
            .execute(session, command, timeout)
            .await
            .with_context(|| format!("Failed to run: {command}"))?;
        emit(&result)?;
        last = result.exit_code;
    }
    Ok(last)
}

/// Writes a result's streams to our stdout and stderr.
pub(crate) fn emit(result: &CommandResult) -> Result<()> {
    let mut stdout = std::io::stdout().lock();
    stdout.write_all(result.stdout.as_bytes())?;
    stdout.flush()?;
    let mut stderr = std::io::stderr().lock();
    stderr.write_all(result.stderr.as_bytes())?;
    stderr.flush()?;
    Ok(())
}
