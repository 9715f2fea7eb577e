//! List the sandboxes the configured backend knows about.

use anyhow::{Context, Result};
use colored::Colorize;
use std::fmt::Write;

use shellbox::config::Config;
use shellbox::runtime::{ContainerInfo, ContainerStatus};

pub(crate) async fn run(config: &Config, json: bool) -> Result<()> {
    let runtime = super::open_runtime(config).await?;
    let containers = runtime
        .list_containers()
        .await
        .context("Failed to list sandboxes")?;

    if json {
        println!("{}", serde_json::to_string_pretty(&containers)?);
    } else {
        print!("{}", format_containers(&containers));
    }
    Ok(())
}

fn format_status(status: ContainerStatus) -> String {
    match status {
        ContainerStatus::Running => status.to_string().green().to_string(),
        ContainerStatus::Created => status.to_string().yellow().to_string(),
        ContainerStatus::Stopped => status.to_string().red().to_string(),
    }
}

fn format_ports(info: &ContainerInfo) -> String {
    let ports: Vec<String> = info
        .ports
        .iter()
        .map(|p| match p.host {
            Some(host) => format!("{host}->{}", p.internal),
            None => p.internal.to_string(),
        })
        .collect();
    if ports.is_empty() {
        "-".to_string()
    } else {
        ports.join(", ")
    }
}

/// Table of sandboxes, or a hint when there are none.
fn format_containers(containers: &[ContainerInfo]) -> String {
    let mut out = String::new();
    if containers.is_empty() {
        let _ = writeln!(out, "{} No sandboxes running.", "ℹ".blue());
        return out;
    }

    let _ = writeln!(
        out,
        "{:<20} {:<28} {:<10} {:<16} {}",
        "SESSION", "NAME", "STATUS", "PORTS", "CREATED"
    );
    for info in containers {
        // Padding is applied before coloring so escape codes don't skew columns.
        let status = format!("{:<10}", info.status.to_string());
        let status = status.replace(&info.status.to_string(), &format_status(info.status));
        let _ = writeln!(
            out,
            "{:<20} {:<28} {} {:<16} {}",
            info.session_id,
            info.name,
            status,
            format_ports(info),
            info.created_at.format("%Y-%m-%d %H:%M:%S UTC")
        );
    }
    out
}
