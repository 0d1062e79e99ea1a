//! `blecmd`: send one command to a BLE peripheral, with a hard deadline.

mod cli;
mod commands;
mod config;
mod format;

use std::io;
use std::process::ExitCode;
use std::time::Duration;

use anyhow::Result;
use blecmd_core::{FileTargetStore, TargetStore};
use clap::{CommandFactory, Parser};
use tracing_subscriber::EnvFilter;

use crate::cli::{Cli, Commands};
use crate::commands::{SendArgs, cmd_send, cmd_shutdown, cmd_sleep, cmd_target};
use crate::config::{Config, resolve_timeout};
use crate::format::FormatOptions;

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Handle completions command early (before tracing init)
    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "blecmd", &mut io::stdout());
        return Ok(ExitCode::SUCCESS);
    }

    // When quiet mode is enabled, suppress info-level logging
    let filter = if cli.quiet {
        EnvFilter::new("warn")
    } else if cli.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(io::stderr)
        .init();

    let config = Config::load();
    let opts = FormatOptions::new(cli.no_color || config.no_color);
    let store: Box<dyn TargetStore> = match cli.targets {
        Some(path) => Box::new(FileTargetStore::new(path)),
        None => Box::new(FileTargetStore::open_default()),
    };

    let delivered = match cli.command {
        Commands::Send {
            session,
            service,
            characteristic,
            payload,
            no_response,
        } => {
            let args = SendArgs {
                service,
                characteristic,
                payload,
                no_response,
            };
            cmd_send(session, args, &config, &opts, cli.quiet).await?
        }
        Commands::Sleep { session } => cmd_sleep(session, &config, &opts, cli.quiet).await?,
        Commands::Shutdown { timeout, format } => {
            let timeout = Duration::from_secs(resolve_timeout(timeout, &config));
            cmd_shutdown(store.as_ref(), timeout, format, &opts, cli.quiet).await?
        }
        Commands::Target { action } => {
            print!("{}", cmd_target(action, store.as_ref(), &opts)?);
            true
        }
        Commands::Completions { .. } => {
            // Already handled above
            unreachable!()
        }
    };

    Ok(if delivered {
        ExitCode::SUCCESS
    } else {
        ExitCode::from(2)
    })
}
