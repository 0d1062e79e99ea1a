//! Send-and-forget commands for host teardown.
//!
//! [`send_shutdown_command`] is the one-call entry point for a teardown
//! path: it never fails and never takes longer than the timeout plus the
//! teardown grace. [`ShutdownHook`] applies it to stored targets.

use std::sync::Arc;
use std::time::Duration;

use tracing::{info, warn};

use blecmd_types::{CommandDescriptor, PeripheralAddress, SessionResult};

use crate::error::Result;
use crate::session::{CommandSession, SessionConfig, SessionReport};
use crate::store::ShutdownTargets;
use crate::transport::SharedTransport;

/// Send one command with a hard timeout and return how it went.
///
/// A zero `timeout` resolves `Timeout` without connecting.
pub async fn send_shutdown_command(
    transport: SharedTransport,
    address: PeripheralAddress,
    command: CommandDescriptor,
    timeout: Duration,
) -> SessionResult {
    CommandSession::new(transport, address, command)
        .deadline(timeout)
        .execute()
        .await
}

/// Blocking form of [`send_shutdown_command`] for synchronous teardown
/// code.
///
/// Runs the session on a private current-thread runtime, so it must not be
/// called from within an async context. `Err` only if that runtime cannot
/// be created.
pub fn send_shutdown_command_blocking(
    transport: SharedTransport,
    address: PeripheralAddress,
    command: CommandDescriptor,
    timeout: Duration,
) -> Result<SessionResult> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()?;
    Ok(runtime.block_on(send_shutdown_command(
        transport, address, command, timeout,
    )))
}

/// Puts stored peripherals to sleep when the host application is removed.
pub struct ShutdownHook {
    transport: SharedTransport,
    config: SessionConfig,
}

impl ShutdownHook {
    pub fn new(transport: SharedTransport) -> Self {
        Self {
            transport,
            config: SessionConfig::default(),
        }
    }

    /// Replace the session timing used for each target.
    #[must_use]
    pub fn with_config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Send the sleep command to the stored machine.
    ///
    /// A stored scale is logged and skipped; no sleep command is defined
    /// for scales. Returns one report per peripheral contacted.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn on_task_removed(&self, targets: &ShutdownTargets) -> Vec<SessionReport> {
        let mut reports = Vec::new();

        match &targets.machine {
            Some(address) => {
                info!(%address, "Sending sleep to machine");
                let report = CommandSession::new(
                    Arc::clone(&self.transport),
                    address.clone(),
                    CommandDescriptor::machine_sleep(),
                )
                .with_config(self.config)
                .run()
                .await;
                reports.push(report);
            }
            None => info!("No machine address stored"),
        }

        if let Some(scale) = &targets.scale {
            info!(
                address = %scale.address,
                scale_type = %scale.scale_type,
                "Leaving scale awake"
            );
        }

        if reports.iter().any(|r| !r.result.is_success()) {
            warn!("Not every peripheral acknowledged the sleep command");
        }
        reports
    }
}
