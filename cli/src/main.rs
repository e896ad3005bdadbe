// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

//! # AEGIS proxy CLI
//!
//! The `aegis` binary starts the execution proxy described in the core
//! crate: the HTTP surface (`POST /proxy/execute` and the HITL review
//! endpoints) plus the background scheduler (audit flush, secret rotation).
//!
//! ## Commands
//!
//! - `aegis serve` — run the proxy in the foreground (the way it's run
//!   under systemd, Docker, or any other process supervisor).
//! - `aegis daemon start|stop|status` — fork the same binary into the
//!   background, tracked by a PID file and an HTTP health check.
//! - `aegis config show|validate` — inspect the resolved configuration.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use std::path::PathBuf;

mod commands;
mod daemon;

use commands::{ConfigCommand, DaemonCommand};

/// AEGIS execution proxy
#[derive(Parser)]
#[command(name = "aegis")]
#[command(version, about, long_about = None)]
#[command(propagate_version = true)]
struct Cli {
    /// Path to configuration file (overrides discovery)
    #[arg(short, long, global = true, env = "AEGIS_CONFIG_PATH", value_name = "FILE")]
    config: Option<PathBuf>,

    /// HTTP API port (overrides the config file's bind address port)
    #[arg(long, global = true, env = "AEGIS_PORT")]
    port: Option<u16>,

    /// HTTP API host (overrides the config file's bind address host)
    #[arg(long, global = true, env = "AEGIS_HOST")]
    host: Option<String>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, global = true, env = "AEGIS_LOG_LEVEL", default_value = "info")]
    log_level: String,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the proxy in the foreground
    Serve,

    /// Manage the background daemon process
    #[command(subcommand)]
    Daemon(DaemonCommand),

    /// Inspect the resolved configuration
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Best-effort: a missing .env is normal outside development.
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    init_logging(&cli.log_level)?;

    match cli.command {
        Commands::Serve => daemon::run_foreground(cli.config, cli.host, cli.port).await,
        Commands::Daemon(command) => commands::daemon::handle_command(command, cli.config, cli.host, cli.port).await,
        Commands::Config(command) => commands::config::handle_command(command, cli.config).await,
    }
}

fn init_logging(level: &str) -> Result<()> {
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .or_else(|_| tracing_subscriber::EnvFilter::try_new(level))
        .context("failed to create log filter")?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_thread_ids(false)
        .with_file(false)
        .with_line_number(false)
        .compact()
        .init();

    Ok(())
}
