//! The asynchronous link layer a session drives.
//!
//! A [`Transport`] accepts requests synchronously and reports their outcome
//! later as [`TransportEvent`]s on the channel handed to
//! [`Transport::connect`]. Requests return quickly: `Ok(())` means the
//! request was accepted, not that it succeeded. Events may arrive on any
//! thread, in any order, more than once, or long after the session that
//! asked for them has given up.

use std::fmt;
use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::mpsc;
use uuid::Uuid;

use blecmd_types::{CommandDescriptor, GattStatus, PeripheralAddress, WriteMode};

use crate::error::Result;

/// Identifies one connection attempt on a transport.
///
/// Handles are never reused by a transport, so an event tagged with an old
/// handle can always be told apart from the current link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ConnectionHandle(u64);

impl ConnectionHandle {
    /// Wrap a raw handle id.
    pub const fn new(id: u64) -> Self {
        Self(id)
    }

    /// Raw handle id.
    pub const fn id(&self) -> u64 {
        self.0
    }
}

impl fmt::Display for ConnectionHandle {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

/// Link state reported by a connection-state event.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LinkState {
    Connected,
    Disconnected,
}

/// A service found during discovery, with the characteristics under it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveredService {
    pub uuid: Uuid,
    pub characteristics: Vec<Uuid>,
}

impl DiscoveredService {
    pub fn new(uuid: Uuid, characteristics: impl IntoIterator<Item = Uuid>) -> Self {
        Self {
            uuid,
            characteristics: characteristics.into_iter().collect(),
        }
    }

    /// Whether `characteristic` sits under this service.
    pub fn has_characteristic(&self, characteristic: &Uuid) -> bool {
        self.characteristics.contains(characteristic)
    }
}

/// Notifications delivered by a transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The link went up or down.
    ConnectionStateChanged {
        handle: ConnectionHandle,
        status: GattStatus,
        state: LinkState,
    },
    /// Service discovery finished.
    ServicesDiscovered {
        handle: ConnectionHandle,
        status: GattStatus,
        services: Vec<DiscoveredService>,
    },
    /// A characteristic write finished.
    CharacteristicWriteComplete {
        handle: ConnectionHandle,
        characteristic: Uuid,
        status: GattStatus,
    },
}

impl TransportEvent {
    /// The connection this event belongs to.
    pub fn handle(&self) -> ConnectionHandle {
        match self {
            Self::ConnectionStateChanged { handle, .. }
            | Self::ServicesDiscovered { handle, .. }
            | Self::CharacteristicWriteComplete { handle, .. } => *handle,
        }
    }

    /// Short name for logs.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ConnectionStateChanged {
                state: LinkState::Connected,
                ..
            } => "connected",
            Self::ConnectionStateChanged {
                state: LinkState::Disconnected,
                ..
            } => "disconnected",
            Self::ServicesDiscovered { .. } => "services-discovered",
            Self::CharacteristicWriteComplete { .. } => "write-complete",
        }
    }
}

/// Sending half of a session's event channel.
///
/// Unbounded so a transport callback can post from any thread without
/// awaiting.
pub type EventSender = mpsc::UnboundedSender<TransportEvent>;

/// Receiving half of a session's event channel.
pub type EventReceiver = mpsc::UnboundedReceiver<TransportEvent>;

/// Create a fresh event channel.
pub fn event_channel() -> (EventSender, EventReceiver) {
    mpsc::unbounded_channel()
}

/// A characteristic write as submitted to the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WriteRequest {
    pub service: Uuid,
    pub characteristic: Uuid,
    pub payload: Bytes,
    pub mode: WriteMode,
}

impl From<&CommandDescriptor> for WriteRequest {
    fn from(command: &CommandDescriptor) -> Self {
        Self {
            service: command.service_id(),
            characteristic: command.characteristic_id(),
            payload: command.payload().clone(),
            mode: command.write_mode(),
        }
    }
}

/// What the underlying stack can do, resolved once when the transport is
/// built.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct TransportCapabilities {
    /// The stack reports the peripheral's acknowledgement of a write.
    /// Without it, `WriteMode::Default` falls back to writing without
    /// response and completion means the stack accepted the bytes.
    pub acknowledged_writes: bool,
}

impl TransportCapabilities {
    /// Whether a write in `mode` should wait for the peripheral's
    /// acknowledgement on this stack.
    pub fn expects_acknowledgement(&self, mode: WriteMode) -> bool {
        self.acknowledged_writes && mode == WriteMode::Default
    }
}

impl Default for TransportCapabilities {
    fn default() -> Self {
        Self {
            acknowledged_writes: true,
        }
    }
}

/// An event-driven GATT client.
///
/// Every method must return without waiting on the radio. Results of
/// `connect`, `discover_services`, `write_characteristic` and `disconnect`
/// arrive as events on the sender supplied to `connect`; after `release`
/// the transport drops that sender and must not emit further events for
/// the handle.
pub trait Transport: Send + Sync {
    /// Capabilities of this transport.
    fn capabilities(&self) -> TransportCapabilities;

    /// Start connecting to `address`. An `Err` means the attempt could not
    /// even be initiated.
    fn connect(&self, address: &PeripheralAddress, events: EventSender)
    -> Result<ConnectionHandle>;

    /// Ask for the peripheral's services.
    fn discover_services(&self, handle: ConnectionHandle) -> Result<()>;

    /// Submit a characteristic write. `Err` means the stack refused it.
    fn write_characteristic(&self, handle: ConnectionHandle, request: &WriteRequest) -> Result<()>;

    /// Ask the link to go down.
    fn disconnect(&self, handle: ConnectionHandle);

    /// Free everything held for `handle`.
    fn release(&self, handle: ConnectionHandle);
}

/// Type alias for a transport shared between a caller and its sessions.
pub type SharedTransport = Arc<dyn Transport>;
