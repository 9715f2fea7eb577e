//! Print a resource usage snapshot for one session.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use shellbox::config::Config;
use shellbox::runtime::ResourceStats;

use super::format_bytes;

pub(crate) async fn run(config: &Config, session: &str, json: bool) -> Result<()> {
    let runtime = super::open_runtime(config).await?;
    let stats = runtime
        .container_stats(session)
        .await
        .with_context(|| format!("Failed to read stats for session {session}"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&stats)?);
    } else {
        print!("{}", format_stats(session, &stats));
    }
    Ok(())
}

fn format_stats(session: &str, stats: &ResourceStats) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", format!("Session {session}").bold());
    let _ = writeln!(
        out,
        "  Memory:   {} / {} ({:.1}%)",
        format_bytes(stats.memory_usage),
        format_bytes(stats.memory_limit),
        stats.memory_percent
    );
    let _ = writeln!(out, "  CPU:      {:.1}%", stats.cpu_percent);
    let _ = writeln!(
        out,
        "  Network:  rx {} / tx {}",
        format_bytes(stats.network_rx_bytes),
        format_bytes(stats.network_tx_bytes)
    );
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_format_stats() {
        let stats = ResourceStats {
            memory_usage: 512 * 1024 * 1024,
            memory_limit: 2 * 1024 * 1024 * 1024,
            memory_percent: 25.0,
            cpu_percent: 12.345,
            network_rx_bytes: 2048,
            network_tx_bytes: 0,
        };
        let out = format_stats("s1", &stats);
        assert!(out.contains("512.0 MiB / 2.0 GiB (25.0%)"));
        assert!(out.contains("CPU:      12.3%"));
        assert!(out.contains("rx 2.0 KiB / tx 0 B"));
    }
}
