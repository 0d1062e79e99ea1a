//! Core value types for GATT command sessions.

use core::fmt;
use core::str::FromStr;

use bytes::Bytes;
#[cfg(feature = "serde")]
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::error::{ParseError, ParseResult};

/// Opaque identifier of the target peripheral.
///
/// On Linux and Windows this is usually the MAC address
/// (`AA:BB:CC:DD:EE:FF`); on macOS it is the CoreBluetooth UUID. The only
/// validation is that the identifier is not empty.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "String", into = "String"))]
pub struct PeripheralAddress(String);

impl PeripheralAddress {
    /// Create an address, rejecting empty or whitespace-only input.
    ///
    /// # Examples
    ///
    /// ```
    /// use blecmd_types::PeripheralAddress;
    ///
    /// let addr = PeripheralAddress::new("AA:BB:CC:DD:EE:FF").unwrap();
    /// assert_eq!(addr.as_str(), "AA:BB:CC:DD:EE:FF");
    /// assert!(PeripheralAddress::new("   ").is_err());
    /// ```
    pub fn new(address: impl Into<String>) -> ParseResult<Self> {
        let address = address.into();
        let trimmed = address.trim();
        if trimmed.is_empty() {
            return Err(ParseError::EmptyAddress);
        }
        if trimmed.len() == address.len() {
            Ok(Self(address))
        } else {
            Ok(Self(trimmed.to_string()))
        }
    }

    /// Borrow the identifier string.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeripheralAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl AsRef<str> for PeripheralAddress {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl FromStr for PeripheralAddress {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl TryFrom<String> for PeripheralAddress {
    type Error = ParseError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<PeripheralAddress> for String {
    fn from(value: PeripheralAddress) -> Self {
        value.0
    }
}

/// How a characteristic write is delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(rename_all = "kebab-case"))]
pub enum WriteMode {
    /// Write with response where the platform supports it.
    #[default]
    Default,
    /// Write without response.
    NoResponse,
}

impl WriteMode {
    /// Name used in configuration and on the command line.
    pub fn as_str(&self) -> &'static str {
        match self {
            WriteMode::Default => "default",
            WriteMode::NoResponse => "no-response",
        }
    }
}

impl fmt::Display for WriteMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WriteMode {
    type Err = ParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "default" => Ok(WriteMode::Default),
            "no-response" | "noresponse" | "no_response" => Ok(WriteMode::NoResponse),
            _ => Err(ParseError::UnknownWriteMode(s.to_string())),
        }
    }
}

/// A single characteristic write: where to write, what, and how.
///
/// Values are immutable once built; use the `with_*` methods to derive
/// a modified copy.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(try_from = "CommandFields"))]
pub struct CommandDescriptor {
    service_id: Uuid,
    characteristic_id: Uuid,
    payload: Bytes,
    #[cfg_attr(feature = "serde", serde(default))]
    write_mode: WriteMode,
}

impl CommandDescriptor {
    /// Build a command with the default write mode.
    pub fn new(
        service_id: Uuid,
        characteristic_id: Uuid,
        payload: impl Into<Bytes>,
    ) -> ParseResult<Self> {
        let payload = payload.into();
        if payload.is_empty() {
            return Err(ParseError::EmptyPayload);
        }
        Ok(Self {
            service_id,
            characteristic_id,
            payload,
            write_mode: WriteMode::Default,
        })
    }

    /// The command that puts an espresso machine to sleep: a single `0x00`
    /// written to the requested-state characteristic.
    ///
    /// # Examples
    ///
    /// ```
    /// use blecmd_types::{CommandDescriptor, WriteMode};
    ///
    /// let cmd = CommandDescriptor::machine_sleep();
    /// assert_eq!(cmd.payload().as_ref(), &[0x00]);
    /// assert_eq!(cmd.write_mode(), WriteMode::Default);
    /// ```
    #[must_use]
    pub fn machine_sleep() -> Self {
        Self {
            service_id: crate::uuid::MACHINE_SERVICE,
            characteristic_id: crate::uuid::MACHINE_REQUESTED_STATE,
            payload: Bytes::from_static(&[crate::uuid::MACHINE_STATE_SLEEP]),
            write_mode: WriteMode::Default,
        }
    }

    /// Return a copy using the given write mode.
    #[must_use]
    pub fn with_write_mode(mut self, write_mode: WriteMode) -> Self {
        self.write_mode = write_mode;
        self
    }

    pub fn service_id(&self) -> Uuid {
        self.service_id
    }

    pub fn characteristic_id(&self) -> Uuid {
        self.characteristic_id
    }

    pub fn payload(&self) -> &Bytes {
        &self.payload
    }

    pub fn write_mode(&self) -> WriteMode {
        self.write_mode
    }
}

/// Wire form of [`CommandDescriptor`], validated through `new` on decode.
#[cfg(feature = "serde")]
#[derive(Deserialize)]
struct CommandFields {
    service_id: Uuid,
    characteristic_id: Uuid,
    payload: Bytes,
    #[serde(default)]
    write_mode: WriteMode,
}

#[cfg(feature = "serde")]
impl TryFrom<CommandFields> for CommandDescriptor {
    type Error = ParseError;

    fn try_from(fields: CommandFields) -> Result<Self, Self::Error> {
        Ok(
            Self::new(fields.service_id, fields.characteristic_id, fields.payload)?
                .with_write_mode(fields.write_mode),
        )
    }
}

/// Parse a hex string such as `00`, `0x0a0b` or `0a 0b` into payload bytes.
pub fn parse_hex_payload(input: &str) -> ParseResult<Bytes> {
    let cleaned: String = input
        .trim()
        .trim_start_matches("0x")
        .trim_start_matches("0X")
        .chars()
        .filter(|c| !c.is_whitespace() && *c != ':' && *c != '-')
        .collect();

    if cleaned.is_empty() {
        return Err(ParseError::EmptyPayload);
    }
    if cleaned.len() % 2 != 0 {
        return Err(ParseError::InvalidPayload(input.to_string()));
    }

    let mut bytes = Vec::with_capacity(cleaned.len() / 2);
    for pair in cleaned.as_bytes().chunks(2) {
        let text =
            core::str::from_utf8(pair).map_err(|_| ParseError::InvalidPayload(input.to_string()))?;
        let byte = u8::from_str_radix(text, 16)
            .map_err(|_| ParseError::InvalidPayload(input.to_string()))?;
        bytes.push(byte);
    }
    Ok(Bytes::from(bytes))
}

/// Status code carried by transport events.
///
/// Zero means success, mirroring the GATT status convention.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
pub struct GattStatus(pub u16);

impl GattStatus {
    pub const SUCCESS: GattStatus = GattStatus(0x00);
    /// Generic failure reported by the stack.
    pub const FAILURE: GattStatus = GattStatus(0x0101);
    pub const WRITE_NOT_PERMITTED: GattStatus = GattStatus(0x03);
    pub const INSUFFICIENT_AUTHENTICATION: GattStatus = GattStatus(0x05);

    pub fn is_success(&self) -> bool {
        *self == Self::SUCCESS
    }
}

impl fmt::Display for GattStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:02X}", self.0)
    }
}

/// Why a session ended without success.
///
/// This enum is marked `#[non_exhaustive]` to allow adding new reasons
/// in future versions without breaking downstream code.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "reason", rename_all = "kebab-case"))]
#[non_exhaustive]
pub enum FailureReason {
    /// The transport could not initiate a connection.
    ConnectError { message: String },
    /// The link dropped before the write completed.
    DisconnectedEarly,
    /// Service discovery reported a non-success status.
    DiscoveryFailed { status: GattStatus },
    /// The target service is absent on the peripheral.
    ServiceNotFound { service: Uuid },
    /// The target characteristic is absent from the service.
    CharacteristicNotFound { characteristic: Uuid },
    /// The write was rejected or completed with a non-success status.
    /// `status` is `None` when the transport refused to submit the write.
    WriteFailed { status: Option<GattStatus> },
    /// An external cancellation source resolved the session.
    Cancelled,
}

impl FailureReason {
    /// Stable kebab-case code for logs and machine-readable output.
    pub fn code(&self) -> &'static str {
        match self {
            FailureReason::ConnectError { .. } => "connect-error",
            FailureReason::DisconnectedEarly => "disconnected-early",
            FailureReason::DiscoveryFailed { .. } => "discovery-failed",
            FailureReason::ServiceNotFound { .. } => "service-not-found",
            FailureReason::CharacteristicNotFound { .. } => "characteristic-not-found",
            FailureReason::WriteFailed { .. } => "write-failed",
            FailureReason::Cancelled => "cancelled",
        }
    }
}

impl fmt::Display for FailureReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureReason::ConnectError { message } => write!(f, "connect error: {}", message),
            FailureReason::DisconnectedEarly => write!(f, "disconnected before write completed"),
            FailureReason::DiscoveryFailed { status } => {
                write!(f, "service discovery failed (status {})", status)
            }
            FailureReason::ServiceNotFound { service } => {
                write!(f, "service {} not found", service)
            }
            FailureReason::CharacteristicNotFound { characteristic } => {
                write!(f, "characteristic {} not found", characteristic)
            }
            FailureReason::WriteFailed { status: Some(status) } => {
                write!(f, "write failed (status {})", status)
            }
            FailureReason::WriteFailed { status: None } => write!(f, "write rejected by transport"),
            FailureReason::Cancelled => write!(f, "cancelled"),
        }
    }
}

/// Final outcome of one command session.
#[derive(Debug, Clone, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(Serialize, Deserialize))]
#[cfg_attr(feature = "serde", serde(tag = "outcome", rename_all = "snake_case"))]
pub enum SessionResult {
    Success,
    Failure(FailureReason),
    Timeout,
}

impl SessionResult {
    pub fn is_success(&self) -> bool {
        matches!(self, SessionResult::Success)
    }

    /// Whether a fresh session has a reasonable chance of a different
    /// outcome. Missing services or characteristics never heal on retry.
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionResult::Success => false,
            SessionResult::Timeout => true,
            SessionResult::Failure(reason) => matches!(
                reason,
                FailureReason::ConnectError { .. }
                    | FailureReason::DisconnectedEarly
                    | FailureReason::WriteFailed { .. }
            ),
        }
    }

    /// Short label: `success`, `timeout`, or the failure code.
    pub fn label(&self) -> &'static str {
        match self {
            SessionResult::Success => "success",
            SessionResult::Timeout => "timeout",
            SessionResult::Failure(reason) => reason.code(),
        }
    }
}

impl fmt::Display for SessionResult {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionResult::Success => write!(f, "success"),
            SessionResult::Failure(reason) => write!(f, "failure: {}", reason),
            SessionResult::Timeout => write!(f, "timeout"),
        }
    }
}

/// Live state of a command session.
///
/// States only move forward: `Idle` → `Connecting` → `Discovering` →
/// `Writing` → `Completed`. Any state may jump straight to `Completed`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum SessionState {
    #[default]
    Idle,
    Connecting,
    Discovering,
    Writing,
    Completed(SessionResult),
}

impl SessionState {
    /// Position of the state in the forward order.
    pub fn stage(&self) -> u8 {
        match self {
            SessionState::Idle => 0,
            SessionState::Connecting => 1,
            SessionState::Discovering => 2,
            SessionState::Writing => 3,
            SessionState::Completed(_) => 4,
        }
    }

    /// Whether moving from `self` to `next` goes strictly forward.
    pub fn can_advance_to(&self, next: &SessionState) -> bool {
        next.stage() > self.stage()
    }

    pub fn is_completed(&self) -> bool {
        matches!(self, SessionState::Completed(_))
    }

    /// The final result, once completed.
    pub fn result(&self) -> Option<&SessionResult> {
        match self {
            SessionState::Completed(result) => Some(result),
            _ => None,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            SessionState::Idle => "idle",
            SessionState::Connecting => "connecting",
            SessionState::Discovering => "discovering",
            SessionState::Writing => "writing",
            SessionState::Completed(_) => "completed",
        }
    }
}
