//! Shutdown command implementation.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use blecmd_core::{
    BtleTransport, SessionConfig, SessionReport, SharedTransport, ShutdownHook, ShutdownTargets,
    TargetStore,
};

use crate::cli::OutputFormat;
use crate::format::{FormatOptions, format_report_text};

pub async fn cmd_shutdown(
    store: &dyn TargetStore,
    timeout: Duration,
    format: OutputFormat,
    opts: &FormatOptions,
    quiet: bool,
) -> Result<bool> {
    let targets = store.load().context("Failed to load shutdown targets")?;
    if targets.machine.is_none() {
        if !quiet {
            eprintln!("No machine stored. Use `blecmd target set-machine <ADDRESS>` first.");
        }
        return Ok(true);
    }

    let transport: SharedTransport = Arc::new(
        BtleTransport::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );
    let reports = run_hook(transport, &targets, timeout).await;

    match format {
        OutputFormat::Text => {
            for report in &reports {
                print!("{}", format_report_text(report, 1, opts));
            }
        }
        OutputFormat::Json => print!("{}", opts.as_json(&reports)?),
    }
    Ok(reports.iter().all(|r| r.result.is_success()))
}

async fn run_hook(
    transport: SharedTransport,
    targets: &ShutdownTargets,
    timeout: Duration,
) -> Vec<SessionReport> {
    ShutdownHook::new(transport)
        .with_config(SessionConfig::for_current_platform().deadline(timeout))
        .on_task_removed(targets)
        .await
}
