//! Send and sleep command implementations.

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result, bail};
use blecmd_core::{
    BtleTransport, CommandDescriptor, CommandSession, PeripheralAddress, RetryConfig,
    SessionConfig, SessionReport, SharedTransport, WriteMode, send_with_retry,
};
use blecmd_types::{parse_hex_payload, uuids::parse_uuid};
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::cli::{OutputFormat, SessionArgs};
use crate::config::{Config, resolve_attempts, resolve_device, resolve_timeout};
use crate::format::{FormatOptions, format_report_json, format_report_text};

/// Characteristic write described on the command line.
#[derive(Debug, Clone)]
pub struct SendArgs {
    pub service: String,
    pub characteristic: String,
    pub payload: String,
    pub no_response: bool,
}

impl SendArgs {
    fn to_command(&self) -> Result<CommandDescriptor> {
        let service = parse_uuid(&self.service)
            .with_context(|| format!("Invalid service UUID: {}", self.service))?;
        let characteristic = parse_uuid(&self.characteristic)
            .with_context(|| format!("Invalid characteristic UUID: {}", self.characteristic))?;
        let payload = parse_hex_payload(&self.payload)
            .with_context(|| format!("Invalid payload: {}", self.payload))?;
        let mode = if self.no_response {
            WriteMode::NoResponse
        } else {
            WriteMode::Default
        };
        Ok(CommandDescriptor::new(service, characteristic, payload)?.with_write_mode(mode))
    }
}

pub async fn cmd_send(
    session: SessionArgs,
    args: SendArgs,
    config: &Config,
    opts: &FormatOptions,
    quiet: bool,
) -> Result<bool> {
    let command = args.to_command()?;
    run(session, command, config, opts, quiet).await
}

pub async fn cmd_sleep(
    session: SessionArgs,
    config: &Config,
    opts: &FormatOptions,
    quiet: bool,
) -> Result<bool> {
    run(session, CommandDescriptor::machine_sleep(), config, opts, quiet).await
}

async fn run(
    session: SessionArgs,
    command: CommandDescriptor,
    config: &Config,
    opts: &FormatOptions,
    quiet: bool,
) -> Result<bool> {
    let address = require_address(session.device, config)?;
    let timeout = Duration::from_secs(resolve_timeout(session.timeout, config));
    let attempts = resolve_attempts(session.attempts, config);

    let transport: SharedTransport = Arc::new(
        BtleTransport::new()
            .await
            .context("Failed to open Bluetooth adapter")?,
    );

    if !quiet {
        eprintln!("Sending to {} (timeout {}s)...", address, timeout.as_secs());
    }
    let (report, attempts) = deliver(transport, address, command, timeout, attempts).await?;
    print!("{}", render(&report, attempts, session.format, opts)?);
    Ok(report.result.is_success())
}

/// Run the command, retrying when more than one attempt is allowed.
///
/// A single attempt can be interrupted with Ctrl-C, which resolves it as
/// cancelled and still tears the link down.
pub(crate) async fn deliver(
    transport: SharedTransport,
    address: PeripheralAddress,
    command: CommandDescriptor,
    timeout: Duration,
    attempts: u32,
) -> Result<(SessionReport, u32)> {
    let session = SessionConfig::for_current_platform().deadline(timeout);

    if attempts <= 1 {
        let cancel = CancellationToken::new();
        let interrupt = tokio::spawn({
            let cancel = cancel.clone();
            async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    debug!("Interrupted, cancelling session");
                    cancel.cancel();
                }
            }
        });
        let report = CommandSession::new(transport, address, command)
            .with_config(session)
            .run_with_cancel(cancel)
            .await;
        interrupt.abort();
        return Ok((report, 1));
    }

    let retry = RetryConfig::new(attempts);
    let outcome = send_with_retry(transport, &address, &command, session, &retry).await?;
    Ok((outcome.report, outcome.attempts))
}

pub(crate) fn render(
    report: &SessionReport,
    attempts: u32,
    format: OutputFormat,
    opts: &FormatOptions,
) -> Result<String> {
    match format {
        OutputFormat::Text => Ok(format_report_text(report, attempts, opts)),
        OutputFormat::Json => format_report_json(report, attempts, opts),
    }
}

fn require_address(device: Option<String>, config: &Config) -> Result<PeripheralAddress> {
    let Some(device) = resolve_device(device, config) else {
        bail!("No device specified. Use --device, set BLECMD_DEVICE, or add `device` to the config file");
    };
    PeripheralAddress::new(device).context("Invalid device address")
}

#[cfg(test)]
mod tests {
    use super::*;
    use blecmd_core::{
        DiscoveryBehavior, MockTransport, SessionResult, WriteBehavior,
        uuids::{MACHINE_REQUESTED_STATE, MACHINE_SERVICE},
    };

    fn send_args(service: &str, characteristic: &str, payload: &str) -> SendArgs {
        SendArgs {
            service: service.to_string(),
            characteristic: characteristic.to_string(),
            payload: payload.to_string(),
            no_response: false,
        }
    }

    #[test]
    fn test_short_uuids_match_sleep_command() {
        let command = send_args("A000", "0xA002", "00").to_command().unwrap();
        assert_eq!(command, CommandDescriptor::machine_sleep());
    }

    #[test]
    fn test_no_response_flag() {
        let mut args = send_args("A000", "A002", "0102");
        args.no_response = true;
        let command = args.to_command().unwrap();
        assert_eq!(command.write_mode(), WriteMode::NoResponse);
        assert_eq!(command.payload().as_ref(), &[0x01, 0x02]);
    }

    #[test]
    fn test_invalid_inputs_are_errors() {
        let err = send_args("nope", "A002", "00").to_command().unwrap_err();
        assert!(err.to_string().contains("Invalid service UUID"));

        let err = send_args("A000", "A002", "0g").to_command().unwrap_err();
        assert!(err.to_string().contains("Invalid payload"));

        assert!(send_args("A000", "A002", "").to_command().is_err());
    }

    #[test]
    fn test_require_address() {
        let config = Config {
            device: Some("de1".to_string()),
            ..Default::default()
        };
        assert_eq!(require_address(None, &config).unwrap().as_str(), "de1");
        assert!(require_address(None, &Config::default()).is_err());
    }

    #[tokio::test]
    async fn test_deliver_single_attempt() {
        let transport = Arc::new(MockTransport::machine());
        let (report, attempts) = deliver(
            transport.clone(),
            PeripheralAddress::new("de1").unwrap(),
            CommandDescriptor::machine_sleep(),
            Duration::from_secs(1),
            1,
        )
        .await
        .unwrap();

        assert_eq!(report.result, SessionResult::Success);
        assert_eq!(attempts, 1);
        assert!(report.released);
        assert_eq!(transport.writes()[0].request.service, MACHINE_SERVICE);
        assert_eq!(
            transport.writes()[0].request.characteristic,
            MACHINE_REQUESTED_STATE
        );
    }

    #[tokio::test]
    async fn test_deliver_retries_failed_writes() {
        let transport = Arc::new(
            MockTransport::builder()
                .write(WriteBehavior::Reject)
                .latency(Duration::from_millis(1))
                .build(),
        );
        let (report, attempts) = deliver(
            transport.clone(),
            PeripheralAddress::new("de1").unwrap(),
            CommandDescriptor::machine_sleep(),
            Duration::from_secs(1),
            2,
        )
        .await
        .unwrap();

        assert!(!report.result.is_success());
        assert_eq!(attempts, 2);
        assert_eq!(transport.connect_count(), 2);
    }

    #[tokio::test]
    async fn test_deliver_does_not_retry_missing_service() {
        let transport = Arc::new(
            MockTransport::builder()
                .discovery(DiscoveryBehavior::Report(blecmd_core::GattStatus::SUCCESS))
                .services(Vec::new())
                .build(),
        );
        let (report, attempts) = deliver(
            transport.clone(),
            PeripheralAddress::new("de1").unwrap(),
            CommandDescriptor::machine_sleep(),
            Duration::from_secs(1),
            3,
        )
        .await
        .unwrap();

        assert_eq!(report.result.label(), "service-not-found");
        assert_eq!(attempts, 1);
    }
}
