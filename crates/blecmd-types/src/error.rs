//! Error types for value construction in blecmd-types.

use thiserror::Error;

/// Errors that can occur when building command and address values.
///
/// This error type is platform-agnostic and does not include
/// BLE-specific errors (those belong in blecmd-core).
///
/// This enum is marked `#[non_exhaustive]` to allow adding new error variants
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[non_exhaustive]
pub enum ParseError {
    /// Peripheral address was empty or whitespace.
    #[error("Peripheral address must not be empty")]
    EmptyAddress,

    /// A UUID string could not be parsed.
    #[error("Invalid UUID '{0}'")]
    InvalidUuid(String),

    /// A payload string was not valid hexadecimal.
    #[error("Invalid hex payload '{0}'")]
    InvalidPayload(String),

    /// Commands must carry at least one byte.
    #[error("Command payload must not be empty")]
    EmptyPayload,

    /// Unknown write mode name.
    #[error("Unknown write mode '{0}' (expected 'default' or 'no-response')")]
    UnknownWriteMode(String),
}

/// Result type alias using blecmd-types' ParseError type.
pub type ParseResult<T> = std::result::Result<T, ParseError>;
