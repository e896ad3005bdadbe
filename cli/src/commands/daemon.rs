// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use clap::Subcommand;

use crate::daemon;

#[derive(Subcommand)]
pub enum DaemonCommand {
    /// Fork the proxy into the background and return once it's listening
    Start,
    /// Send a termination signal to the backgrounded proxy and wait for it
    /// to exit
    Stop,
    /// Report whether the backgrounded proxy is running and healthy
    Status,
}

pub async fn handle_command(
    command: DaemonCommand,
    config_path: Option<PathBuf>,
    host: Option<String>,
    port: Option<u16>,
) -> Result<()> {
    match command {
        DaemonCommand::Start => start(config_path, host, port).await,
        DaemonCommand::Stop => stop().await,
        DaemonCommand::Status => status(config_path, host, port).await,
    }
}

#[cfg(unix)]
async fn start(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    if let Some(pid) = daemon::read_pid() {
        if daemon::process_is_alive(pid) {
            bail!("daemon already running with pid {pid}");
        }
        daemon::remove_pid_file();
    }

    let exe = std::env::current_exe().context("failed to resolve the current executable path")?;
    let mut command = std::process::Command::new(exe);
    command.arg("serve");
    if let Some(path) = &config_path {
        command.arg("--config").arg(path);
    }
    if let Some(host) = &host {
        command.arg("--host").arg(host);
    }
    if let Some(port) = port {
        command.arg("--port").arg(port.to_string());
    }
    command.stdin(std::process::Stdio::null());
    command.stdout(std::process::Stdio::null());
    command.stderr(std::process::Stdio::null());

    let child = command.spawn().context("failed to spawn the background process")?;
    daemon::write_pid(child.id()).context("failed to write pid file")?;
    println!("started daemon with pid {}", child.id());
    Ok(())
}

#[cfg(not(unix))]
async fn start(_config_path: Option<PathBuf>, _host: Option<String>, _port: Option<u16>) -> Result<()> {
    bail!("daemon start/stop is only supported on unix; run `aegis serve` in the foreground instead")
}

#[cfg(unix)]
async fn stop() -> Result<()> {
    let Some(pid) = daemon::read_pid() else {
        bail!("no pid file found; is the daemon running?");
    };
    if !daemon::process_is_alive(pid) {
        daemon::remove_pid_file();
        bail!("pid {pid} is not running; removed stale pid file");
    }
    unsafe {
        libc::kill(pid as libc::pid_t, libc::SIGTERM);
    }
    for _ in 0..50 {
        if !daemon::process_is_alive(pid) {
            daemon::remove_pid_file();
            println!("stopped daemon (pid {pid})");
            return Ok(());
        }
        tokio::time::sleep(Duration::from_millis(100)).await;
    }
    bail!("daemon (pid {pid}) did not exit within 5s")
}

#[cfg(not(unix))]
async fn stop() -> Result<()> {
    bail!("daemon start/stop is only supported on unix; run `aegis serve` in the foreground instead")
}

async fn status(config_path: Option<PathBuf>, host: Option<String>, port: Option<u16>) -> Result<()> {
    #[cfg(unix)]
    let pid = daemon::read_pid();
    #[cfg(not(unix))]
    let pid: Option<u32> = None;

    #[cfg(unix)]
    if let Some(pid) = pid {
        if !daemon::process_is_alive(pid) {
            println!("stopped (stale pid file for {pid})");
            return Ok(());
        }
    }

    let config = aegis_core::application::config::ProxyConfig::load_or_default(config_path)
        .context("failed to load configuration")?;
    let mut bind_addr = config.bind_addr;
    if let (Some(host), Some(port)) = (&host, port) {
        bind_addr = format!("{host}:{port}");
    }

    let healthy = daemon::health_check(&bind_addr, Duration::from_secs(2)).await;
    match (pid, healthy) {
        (Some(pid), true) => println!("running (pid {pid}), healthy at {bind_addr}"),
        (Some(pid), false) => println!("running (pid {pid}), but {bind_addr}/healthz did not respond"),
        (None, true) => println!("no pid file, but {bind_addr}/healthz responded (running in the foreground?)"),
        (None, false) => println!("stopped"),
    }
    Ok(())
}
