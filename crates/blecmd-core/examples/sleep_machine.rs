//! Example: Putting an Espresso Machine to Sleep
//!
//! This example connects to a machine, writes the sleep state to its
//! requested-state characteristic and reports how the session ended.
//!
//! Run with: `cargo run --example sleep_machine -- <DEVICE_ADDRESS> [TIMEOUT_SECS]`

use std::env;
use std::sync::Arc;
use std::time::Duration;

use blecmd_core::{BtleTransport, CommandSession, SessionConfig};
use blecmd_types::{CommandDescriptor, PeripheralAddress};

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logging
    tracing_subscriber::fmt::init();

    let args: Vec<String> = env::args().collect();
    let Some(identifier) = args.get(1) else {
        eprintln!("Usage: {} <DEVICE_ADDRESS> [TIMEOUT_SECS]", args[0]);
        eprintln!();
        eprintln!("Example:");
        eprintln!("  {} AA:BB:CC:DD:EE:FF", args[0]);
        std::process::exit(1);
    };
    let timeout = args
        .get(2)
        .map(|s| s.parse::<u64>())
        .transpose()?
        .map(Duration::from_secs)
        .unwrap_or(blecmd_core::DEFAULT_DEADLINE);

    let address = PeripheralAddress::new(identifier.as_str())?;
    let transport = Arc::new(BtleTransport::new().await?);

    println!("Sending sleep to {}...", address);
    let report = CommandSession::new(transport, address, CommandDescriptor::machine_sleep())
        .with_config(SessionConfig::for_current_platform().deadline(timeout))
        .run()
        .await;

    println!();
    println!("Result:   {}", report.result);
    println!("Elapsed:  {:?}", report.elapsed);
    println!("Released: {}", report.released);

    if !report.result.is_success() {
        std::process::exit(2);
    }
    Ok(())
}
