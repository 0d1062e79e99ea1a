//! Deadline-bounded BLE GATT command sessions.
//!
//! This crate delivers a single characteristic write to a Bluetooth Low
//! Energy peripheral (connect, discover services, write, disconnect) and
//! guarantees an answer within a fixed wall-clock budget, even when the
//! peripheral goes silent or the link misbehaves.
//!
//! # Features
//!
//! - **Bounded sessions**: every session resolves within its deadline plus
//!   a short teardown grace
//! - **Exactly-once resolution**: a single-fire gate arbitrates between the
//!   protocol, the deadline and an optional cancellation token
//! - **Pluggable transport**: btleplug in production, a scripted mock in tests
//! - **Shutdown hook**: put a stored espresso machine to sleep on host teardown
//! - **Caller-side retry**: fresh sessions with exponential backoff
//!
//! # Architecture
//!
//! | Module | Role |
//! |--------|------|
//! | [`transport`] | Event-driven link interface |
//! | [`machine`] | Pure connect/discover/write state machine |
//! | [`gate`] | Single-fire completion gate |
//! | [`session`] | Drives the machine against a transport under a deadline |
//! | [`btle`] | btleplug transport |
//! | [`shutdown`], [`store`] | Teardown entry points and stored targets |
//!
//! # Quick Start
//!
//! ```no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use blecmd_core::{BtleTransport, send_shutdown_command};
//! use blecmd_types::{CommandDescriptor, PeripheralAddress};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let transport = Arc::new(BtleTransport::new().await?);
//!     let address = PeripheralAddress::new("AA:BB:CC:DD:EE:FF")?;
//!
//!     let result = send_shutdown_command(
//!         transport,
//!         address,
//!         CommandDescriptor::machine_sleep(),
//!         Duration::from_secs(5),
//!     )
//!     .await;
//!     println!("{result}");
//!     Ok(())
//! }
//! ```

pub mod btle;
pub mod error;
pub mod gate;
pub mod machine;
pub mod mock;
pub mod platform;
pub mod retry;
pub mod session;
pub mod shutdown;
pub mod store;
pub mod transport;

// Core exports
pub use btle::BtleTransport;
pub use error::{Error, Result};
pub use gate::CompletionGate;
pub use machine::{Action, SessionMachine, Step};
pub use session::{
    CommandSession, DEFAULT_DEADLINE, DEFAULT_TEARDOWN_GRACE, SessionConfig, SessionReport,
};
pub use transport::{
    ConnectionHandle, DiscoveredService, EventReceiver, EventSender, LinkState, SharedTransport,
    Transport, TransportCapabilities, TransportEvent, WriteRequest, event_channel,
};

pub use mock::{
    ConnectBehavior, DiscoveryBehavior, MockTransport, MockTransportBuilder, RecordedWrite,
    WriteBehavior,
};
pub use platform::{Platform, PlatformConfig};
pub use retry::{RetryConfig, RetryOutcome, send_with_retry};
pub use shutdown::{ShutdownHook, send_shutdown_command, send_shutdown_command_blocking};
pub use store::{FileTargetStore, MemoryTargetStore, ScaleTarget, ShutdownTargets, TargetStore};

// Re-export from blecmd-types
pub use blecmd_types::uuid as uuids;
pub use blecmd_types::{
    CommandDescriptor, FailureReason, GattStatus, PeripheralAddress, SessionResult, SessionState,
    WriteMode,
};
