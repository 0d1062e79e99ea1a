//! Error types for blecmd-core.
//!
//! Session outcomes are values ([`blecmd_types::SessionResult`]) and never
//! surface through this type. [`Error`] covers the plumbing around a
//! session: transport setup and requests, the target store, and
//! configuration.
//!
//! | Error Type | Where it shows up |
//! |------------|-------------------|
//! | [`Error::Bluetooth`] | btleplug calls while building the transport |
//! | [`Error::AdapterUnavailable`] | no adapter or adapter powered off |
//! | [`Error::UnknownHandle`] | request for a handle the transport no longer tracks |
//! | [`Error::NotConnected`] | request issued before the link is up |
//! | [`Error::Rejected`] | transport refused a request |
//! | [`Error::InvalidConfig`] | zero deadline, bad retry settings |
//! | [`Error::Io`], [`Error::TomlDecode`], [`Error::TomlEncode`] | target store |
//!
//! A transport that fails to *initiate* a connection returns an `Error`
//! from [`crate::Transport::connect`]; the session turns it into
//! `FailureReason::ConnectError` carrying the error's message.

use thiserror::Error;

use crate::transport::ConnectionHandle;

/// Errors that can occur around a GATT command session.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum Error {
    /// Bluetooth Low Energy error.
    #[error("Bluetooth error: {0}")]
    Bluetooth(#[from] btleplug::Error),

    /// No usable Bluetooth adapter.
    #[error("Bluetooth adapter unavailable")]
    AdapterUnavailable,

    /// The transport does not know this handle (already released).
    #[error("Unknown connection handle {0}")]
    UnknownHandle(ConnectionHandle),

    /// Operation attempted while not connected to the peripheral.
    #[error("Not connected to peripheral")]
    NotConnected,

    /// The transport refused to submit a request.
    #[error("Request rejected: {0}")]
    Rejected(String),

    /// Invalid configuration provided.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Invalid value supplied by the caller.
    #[error(transparent)]
    Parse(#[from] blecmd_types::ParseError),

    /// I/O error.
    #[error(transparent)]
    Io(#[from] std::io::Error),

    /// Stored targets could not be decoded.
    #[error("Failed to parse target file: {0}")]
    TomlDecode(#[from] toml::de::Error),

    /// Targets could not be encoded.
    #[error("Failed to encode target file: {0}")]
    TomlEncode(#[from] toml::ser::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn invalid_config(message: impl Into<String>) -> Self {
        Self::InvalidConfig(message.into())
    }

    /// Create a rejection error.
    pub fn rejected(message: impl Into<String>) -> Self {
        Self::Rejected(message.into())
    }
}

/// Result type alias using blecmd-core's Error type.
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::AdapterUnavailable;
        assert_eq!(err.to_string(), "Bluetooth adapter unavailable");

        let err = Error::UnknownHandle(ConnectionHandle::new(7));
        assert!(err.to_string().contains("#7"));

        let err = Error::invalid_config("deadline must be > 0");
        assert_eq!(
            err.to_string(),
            "Invalid configuration: deadline must be > 0"
        );

        let err = Error::rejected("write queue full");
        assert!(err.to_string().contains("write queue full"));
    }

    #[test]
    fn test_btleplug_error_conversion() {
        // btleplug::Error doesn't have public constructors for most variants,
        // but we can verify the From impl exists by checking the type compiles
        fn _assert_from_impl<T: From<btleplug::Error>>() {}
        _assert_from_impl::<Error>();
    }

    #[test]
    fn test_parse_error_conversion() {
        let err: Error = blecmd_types::ParseError::EmptyAddress.into();
        assert!(matches!(err, Error::Parse(_)));
        assert!(err.to_string().contains("must not be empty"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: Error = io_err.into();
        assert!(matches!(err, Error::Io(_)));
        assert!(err.to_string().contains("file not found"));
    }
}
