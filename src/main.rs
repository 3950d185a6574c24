//! hotkeys: session-isolated hotkey daemon for Windows
//!
//! One binary, three roles:
//! - Service: runs under the service manager, launches the agent into the
//!   active user session and supervises it
//! - Agent: owns a hidden message window, registers the configured hotkeys
//!   and runs their actions, reloading when the config file changes
//! - Installer: `install` / `remove` register or delete the service
//!
//! The privileged service never handles input itself; the two processes only
//! share a one-way control channel.

#![cfg_attr(not(windows), allow(dead_code))]

mod action;
#[cfg(windows)]
mod agent;
mod config;
mod environment;
mod events;
mod hotkey;
mod ipc;
mod lifecycle;
mod reload;
#[cfg(windows)]
mod service;
mod session;
mod state;
#[cfg(windows)]
mod sys;

use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::DEFAULT_CONFIG_PATH;

#[derive(Debug, Parser)]
#[command(
    name = "hotkeys",
    version,
    disable_version_flag = true,
    about = "Binds hotkeys such as CTRL+A to actions defined in a TOML file (hot-reload supported)"
)]
struct Cli {
    /// Config file path
    #[arg(short, long, global = true, default_value = DEFAULT_CONFIG_PATH)]
    config: String,

    /// Log output path (default stdout)
    #[arg(short, long, global = true, default_value = "")]
    log: String,

    /// Print version and exit
    #[arg(short = 'v', long, action = ArgAction::Version)]
    version: Option<bool>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Install the application as a Windows service
    Install,
    /// Remove the Windows service
    Remove,
    /// Print version and exit
    Version,
}

fn main() -> Result<()> {
    let cli = Cli::parse();

    if matches!(cli.command, Some(Command::Version)) {
        println!("{} {}", env!("CARGO_PKG_NAME"), env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let config_path = config::resolve_config_path(&cli.config);
    init_logging(&cli.log)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        ?config_path,
        "hotkeys starting"
    );

    run(cli, config_path)
}

/// Log to `log_path` in append mode, or to stdout when it is empty
fn init_logging(log_path: &str) -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));

    if log_path.is_empty() {
        tracing_subscriber::fmt().with_env_filter(filter).init();
        return Ok(());
    }

    let path = Path::new(log_path);
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
        std::fs::create_dir_all(dir)
            .with_context(|| format!("failed to create log directory {}", dir.display()))?;
    }
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .with_context(|| format!("failed to open log file {}", path.display()))?;

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_ansi(false)
        .with_writer(Mutex::new(file))
        .init();
    Ok(())
}

#[cfg(windows)]
fn run(cli: Cli, config_path: PathBuf) -> Result<()> {
    let config = config_path.to_string_lossy().into_owned();

    match cli.command {
        Some(Command::Install) => {
            service::install(&config, &cli.log).context("install failed")?;
            println!("Service installed.");
            return Ok(());
        }
        Some(Command::Remove) => {
            service::remove().context("remove failed")?;
            println!("Service removed.");
            return Ok(());
        }
        Some(Command::Version) | None => {}
    }

    let args = service::ServiceArgs {
        config_path: config,
        log_path: cli.log,
    };
    if service::run_dispatcher(args)? {
        return Ok(());
    }

    info!("running in console mode");
    agent::run(&config_path)
}

#[cfg(not(windows))]
fn run(_cli: Cli, _config_path: PathBuf) -> Result<()> {
    anyhow::bail!("hotkeys needs the Windows hotkey and service APIs and cannot run on this platform")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_defaults() {
        let cli = Cli::try_parse_from(["hotkeys"]).unwrap();
        assert_eq!(cli.config, DEFAULT_CONFIG_PATH);
        assert_eq!(cli.log, "");
        assert!(cli.command.is_none());
    }

    #[test]
    fn test_cli_short_flags() {
        let cli = Cli::try_parse_from(["hotkeys", "-c", r"C:\h.toml", "-l", r"C:\h.log"]).unwrap();
        assert_eq!(cli.config, r"C:\h.toml");
        assert_eq!(cli.log, r"C:\h.log");
    }

    #[test]
    fn test_cli_install_takes_paths() {
        let cli =
            Cli::try_parse_from(["hotkeys", "install", "--config", "a.toml", "--log", "b.log"])
                .unwrap();
        assert!(matches!(cli.command, Some(Command::Install)));
        assert_eq!(cli.config, "a.toml");
        assert_eq!(cli.log, "b.log");
    }

    #[test]
    fn test_cli_version_flag() {
        let err = Cli::try_parse_from(["hotkeys", "-v"]).unwrap_err();
        assert_eq!(err.kind(), clap::error::ErrorKind::DisplayVersion);
    }

    #[test]
    fn test_cli_rejects_unknown_command() {
        assert!(Cli::try_parse_from(["hotkeys", "frobnicate"]).is_err());
    }
}
