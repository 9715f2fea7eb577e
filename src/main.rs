use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

use shellbox::config::{Backend, Config};

mod commands;
mod logging;

#[derive(Parser)]
#[command(name = "shellbox")]
#[command(
    author,
    version,
    about = "Throwaway sandboxes for running shell commands per session"
)]
#[command(propagate_version = true)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (default: ./shellbox.toml)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    /// Backend override
    #[arg(long, global = true, value_enum, env = "SHELLBOX_BACKEND")]
    backend: Option<Backend>,
}

#[derive(Subcommand)]
enum Commands {
    /// Write a default shellbox.toml in the current directory
    Init {
        /// Force overwrite an existing file
        #[arg(short, long)]
        force: bool,
    },

    /// Run command lines in a session's sandbox
    Exec {
        /// Session id
        #[arg(short, long)]
        session: String,

        /// Leave the sandbox running afterwards
        #[arg(long)]
        keep: bool,

        /// Per-command timeout in seconds
        #[arg(short, long)]
        timeout: Option<u64>,

        /// Command lines, run in order
        #[arg(required = true)]
        commands: Vec<String>,
    },

    /// Interactive shell in a session's sandbox
    Shell {
        /// Session id (default: a fresh random id)
        #[arg(short, long)]
        session: Option<String>,

        /// Leave the sandbox running afterwards
        #[arg(long)]
        keep: bool,
    },

    /// List sandboxes
    Status {
        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Show resource usage of a session's sandbox
    Stats {
        /// Session id
        session: String,

        /// Print JSON
        #[arg(long)]
        json: bool,
    },

    /// Stop and remove a session's sandbox
    Stop {
        /// Session id
        session: String,
    },

    /// Remove orphaned sandboxes
    Clean,
}

fn load_config(cli: &Cli) -> Result<Config> {
    let mut config = match &cli.config {
        Some(path) => Config::load_file(path)?,
        None => {
            let cwd = std::env::current_dir().context("Failed to get current directory")?;
            Config::load(&cwd)?
        }
    };
    if let Some(backend) = cli.backend {
        config.runtime.backend = backend;
    }
    Ok(config)
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // init must work even when the existing config is broken
    if let Commands::Init { force } = cli.command {
        let _guard = logging::init(cli.verbose, None)?;
        commands::init::run(force)?;
        return Ok(ExitCode::SUCCESS);
    }

    let config = load_config(&cli)?;
    let _guard = logging::init(cli.verbose, config.logging.file.as_deref())?;

    match cli.command {
        Commands::Init { .. } => {}
        Commands::Exec {
            session,
            keep,
            timeout,
            commands,
        } => {
            let code = commands::exec::run(&config, &session, keep, timeout, &commands).await?;
            return Ok(ExitCode::from(u8::try_from(code).unwrap_or(1)));
        }
        Commands::Shell { session, keep } => {
            let session =
                session.unwrap_or_else(|| format!("repl-{}", uuid::Uuid::new_v4().simple()));
            commands::shell::run(&config, &session, keep).await?;
        }
        Commands::Status { json } => {
            commands::status::run(&config, json).await?;
        }
        Commands::Stats { session, json } => {
            commands::stats::run(&config, &session, json).await?;
        }
        Commands::Stop { session } => {
            commands::stop::run(&config, &session).await?;
        }
        Commands::Clean => {
            commands::clean::run(&config).await?;
        }
    }

    Ok(ExitCode::SUCCESS)
}
