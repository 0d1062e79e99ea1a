//! Platform-agnostic types for bounded BLE GATT command writes.
//!
//! This crate provides the values shared by the session engine
//! (blecmd-core) and its front ends (blecmd-cli).
//!
//! # Features
//!
//! - Peripheral addresses and command descriptors
//! - Session results, failure reasons and the session state ladder
//! - Bluetooth base-UUID helpers and espresso-machine constants
//! - Error types for value parsing
//!
//! # Example
//!
//! ```
//! use blecmd_types::{CommandDescriptor, PeripheralAddress, SessionResult};
//!
//! let address = PeripheralAddress::new("AA:BB:CC:DD:EE:FF").unwrap();
//! let command = CommandDescriptor::machine_sleep();
//! assert!(!SessionResult::Timeout.is_success());
//! # let _ = (address, command);
//! ```

pub mod error;
pub mod types;
pub mod uuid;

pub use error::{ParseError, ParseResult};
pub use types::{
    CommandDescriptor, FailureReason, GattStatus, PeripheralAddress, SessionResult, SessionState,
    WriteMode, parse_hex_payload,
};
pub use uuid as uuids;
