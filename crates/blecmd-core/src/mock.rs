//! Mock transport for testing.
//!
//! [`MockTransport`] answers requests the way a scripted peripheral would,
//! posting events from its own threads after a configurable latency so
//! sessions see the same cross-thread delivery as with a real stack.
//!
//! # Features
//!
//! - **Scripted replies**: choose how connect, discovery and write answer
//! - **Failure injection**: refuse requests or report failing statuses
//! - **Silence**: accept requests and never answer
//! - **Call accounting**: count connect, disconnect and release calls
//!
//! # Example
//!
//! ```
//! use std::sync::Arc;
//! use blecmd_core::{CommandSession, MockTransport};
//! use blecmd_types::{CommandDescriptor, PeripheralAddress, SessionResult};
//!
//! #[tokio::main]
//! async fn main() {
//!     let transport = Arc::new(MockTransport::machine());
//!     let address = PeripheralAddress::new("AA:BB:CC:DD:EE:FF").unwrap();
//!
//!     let result = CommandSession::new(transport.clone(), address, CommandDescriptor::machine_sleep())
//!         .execute()
//!         .await;
//!     assert_eq!(result, SessionResult::Success);
//!     assert_eq!(transport.release_count(), 1);
//! }
//! ```

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::debug;

use blecmd_types::{GattStatus, PeripheralAddress, uuids};

use crate::error::{Error, Result};
use crate::transport::{
    ConnectionHandle, DiscoveredService, EventSender, LinkState, Transport,
    TransportCapabilities, TransportEvent, WriteRequest,
};

/// How the mock answers a connect request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConnectBehavior {
    /// Report the link up.
    Connect,
    /// Fail to initiate the connection.
    Refuse(String),
    /// Report a connected event carrying this status.
    Status(GattStatus),
    /// Report the link down instead of up.
    DropLink,
    /// Accept and never answer.
    Silent,
}

/// How the mock answers a discovery request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryBehavior {
    Report(GattStatus),
    Reject,
    Silent,
}

/// How the mock answers a write request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WriteBehavior {
    Complete(GattStatus),
    Reject,
    Silent,
}

/// A write the mock received.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RecordedWrite {
    pub handle: ConnectionHandle,
    pub request: WriteRequest,
    /// Whether the write waited for the peripheral's acknowledgement.
    pub acknowledged: bool,
}

/// A scripted [`Transport`] for tests.
pub struct MockTransport {
    capabilities: TransportCapabilities,
    connect: ConnectBehavior,
    discovery: DiscoveryBehavior,
    write: WriteBehavior,
    services: Vec<DiscoveredService>,
    latency: Duration,
    write_latency: Duration,
    disconnect_reports: u32,
    next_handle: AtomicU64,
    links: Mutex<HashMap<ConnectionHandle, EventSender>>,
    addresses: Mutex<Vec<PeripheralAddress>>,
    writes: Mutex<Vec<RecordedWrite>>,
    connect_count: AtomicU32,
    discover_count: AtomicU32,
    disconnect_count: AtomicU32,
    release_count: AtomicU32,
}

impl std::fmt::Debug for MockTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MockTransport")
            .field("capabilities", &self.capabilities)
            .field("connect", &self.connect)
            .field("discovery", &self.discovery)
            .field("write", &self.write)
            .field("latency", &self.latency)
            .field("connect_count", &self.connect_count.load(Ordering::Relaxed))
            .field("release_count", &self.release_count.load(Ordering::Relaxed))
            .finish()
    }
}

fn locked<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl MockTransport {
    /// A peripheral exposing the espresso machine service that accepts
    /// every request.
    pub fn machine() -> Self {
        MockTransportBuilder::new().build()
    }

    /// A peripheral that accepts the connect request and then says nothing.
    pub fn silent() -> Self {
        MockTransportBuilder::new()
            .connect(ConnectBehavior::Silent)
            .build()
    }

    pub fn builder() -> MockTransportBuilder {
        MockTransportBuilder::new()
    }

    /// Number of connect calls.
    pub fn connect_count(&self) -> u32 {
        self.connect_count.load(Ordering::SeqCst)
    }

    /// Number of discovery requests.
    pub fn discover_count(&self) -> u32 {
        self.discover_count.load(Ordering::SeqCst)
    }

    /// Number of disconnect calls.
    pub fn disconnect_count(&self) -> u32 {
        self.disconnect_count.load(Ordering::SeqCst)
    }

    /// Number of release calls.
    pub fn release_count(&self) -> u32 {
        self.release_count.load(Ordering::SeqCst)
    }

    /// Handles that were connected and not yet released.
    pub fn open_links(&self) -> usize {
        locked(&self.links).len()
    }

    /// Addresses passed to `connect`, in order.
    pub fn connected_addresses(&self) -> Vec<PeripheralAddress> {
        locked(&self.addresses).clone()
    }

    /// Writes the mock accepted, in order.
    pub fn writes(&self) -> Vec<RecordedWrite> {
        locked(&self.writes).clone()
    }

    /// Post an arbitrary event on a live link. Returns `false` once the
    /// handle has been released.
    pub fn inject(&self, event: TransportEvent) -> bool {
        match locked(&self.links).get(&event.handle()) {
            Some(events) => events.send(event).is_ok(),
            None => false,
        }
    }

    fn sender(&self, handle: ConnectionHandle) -> Result<EventSender> {
        locked(&self.links)
            .get(&handle)
            .cloned()
            .ok_or(Error::UnknownHandle(handle))
    }

    /// Deliver `events` from another thread after `delay`.
    fn post(&self, events: EventSender, delay: Duration, batch: Vec<TransportEvent>) {
        std::thread::spawn(move || {
            if !delay.is_zero() {
                std::thread::sleep(delay);
            }
            for event in batch {
                // The session may already be gone.
                let _ = events.send(event);
            }
        });
    }
}

impl Transport for MockTransport {
    fn capabilities(&self) -> TransportCapabilities {
        self.capabilities
    }

    fn connect(
        &self,
        address: &PeripheralAddress,
        events: EventSender,
    ) -> Result<ConnectionHandle> {
        self.connect_count.fetch_add(1, Ordering::SeqCst);
        locked(&self.addresses).push(address.clone());

        if let ConnectBehavior::Refuse(message) = &self.connect {
            return Err(Error::rejected(message.clone()));
        }

        let handle = ConnectionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        locked(&self.links).insert(handle, events.clone());
        debug!(%address, %handle, "Mock connect");

        let reply = match &self.connect {
            ConnectBehavior::Connect => Some((GattStatus::SUCCESS, LinkState::Connected)),
            ConnectBehavior::Status(status) => Some((*status, LinkState::Connected)),
            ConnectBehavior::DropLink => Some((GattStatus::FAILURE, LinkState::Disconnected)),
            ConnectBehavior::Silent | ConnectBehavior::Refuse(_) => None,
        };
        if let Some((status, state)) = reply {
            self.post(
                events,
                self.latency,
                vec![TransportEvent::ConnectionStateChanged {
                    handle,
                    status,
                    state,
                }],
            );
        }
        Ok(handle)
    }

    fn discover_services(&self, handle: ConnectionHandle) -> Result<()> {
        self.discover_count.fetch_add(1, Ordering::SeqCst);
        let events = self.sender(handle)?;
        match &self.discovery {
            DiscoveryBehavior::Reject => Err(Error::rejected("discovery refused")),
            DiscoveryBehavior::Silent => Ok(()),
            DiscoveryBehavior::Report(status) => {
                let services = if status.is_success() {
                    self.services.clone()
                } else {
                    Vec::new()
                };
                self.post(
                    events,
                    self.latency,
                    vec![TransportEvent::ServicesDiscovered {
                        handle,
                        status: *status,
                        services,
                    }],
                );
                Ok(())
            }
        }
    }

    fn write_characteristic(&self, handle: ConnectionHandle, request: &WriteRequest) -> Result<()> {
        let events = self.sender(handle)?;
        if self.write == WriteBehavior::Reject {
            return Err(Error::rejected("write queue full"));
        }

        let acknowledged = self.capabilities.expects_acknowledgement(request.mode);
        locked(&self.writes).push(RecordedWrite {
            handle,
            request: request.clone(),
            acknowledged,
        });

        let status = match (&self.write, acknowledged) {
            (WriteBehavior::Silent, _) => return Ok(()),
            // Unacknowledged writes complete once the stack takes the bytes.
            (_, false) => GattStatus::SUCCESS,
            (WriteBehavior::Complete(status), true) => *status,
            (WriteBehavior::Reject, true) => return Ok(()),
        };
        self.post(
            events,
            self.latency + self.write_latency,
            vec![TransportEvent::CharacteristicWriteComplete {
                handle,
                characteristic: request.characteristic,
                status,
            }],
        );
        Ok(())
    }

    fn disconnect(&self, handle: ConnectionHandle) {
        self.disconnect_count.fetch_add(1, Ordering::SeqCst);
        let Ok(events) = self.sender(handle) else {
            return;
        };
        let reports = (0..self.disconnect_reports)
            .map(|_| TransportEvent::ConnectionStateChanged {
                handle,
                status: GattStatus::SUCCESS,
                state: LinkState::Disconnected,
            })
            .collect::<Vec<_>>();
        if !reports.is_empty() {
            self.post(events, self.latency, reports);
        }
    }

    fn release(&self, handle: ConnectionHandle) {
        self.release_count.fetch_add(1, Ordering::SeqCst);
        locked(&self.links).remove(&handle);
    }
}

/// Builder for [`MockTransport`].
#[derive(Debug, Clone)]
pub struct MockTransportBuilder {
    capabilities: TransportCapabilities,
    connect: ConnectBehavior,
    discovery: DiscoveryBehavior,
    write: WriteBehavior,
    services: Vec<DiscoveredService>,
    latency: Duration,
    write_latency: Duration,
    disconnect_reports: u32,
}

impl Default for MockTransportBuilder {
    fn default() -> Self {
        Self {
            capabilities: TransportCapabilities::default(),
            connect: ConnectBehavior::Connect,
            discovery: DiscoveryBehavior::Report(GattStatus::SUCCESS),
            write: WriteBehavior::Complete(GattStatus::SUCCESS),
            services: vec![
                DiscoveredService::new(uuids::GAP_SERVICE, []),
                DiscoveredService::new(
                    uuids::MACHINE_SERVICE,
                    [
                        uuids::MACHINE_VERSION,
                        uuids::MACHINE_REQUESTED_STATE,
                        uuids::MACHINE_STATE_INFO,
                    ],
                ),
            ],
            latency: Duration::from_millis(5),
            write_latency: Duration::ZERO,
            disconnect_reports: 1,
        }
    }
}

impl MockTransportBuilder {
    /// Create a new builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the reported capabilities.
    #[must_use]
    pub fn capabilities(mut self, capabilities: TransportCapabilities) -> Self {
        self.capabilities = capabilities;
        self
    }

    /// Behave like a stack without acknowledged writes.
    #[must_use]
    pub fn legacy_writes(self) -> Self {
        self.capabilities(TransportCapabilities {
            acknowledged_writes: false,
        })
    }

    #[must_use]
    pub fn connect(mut self, behavior: ConnectBehavior) -> Self {
        self.connect = behavior;
        self
    }

    #[must_use]
    pub fn discovery(mut self, behavior: DiscoveryBehavior) -> Self {
        self.discovery = behavior;
        self
    }

    #[must_use]
    pub fn write(mut self, behavior: WriteBehavior) -> Self {
        self.write = behavior;
        self
    }

    /// Replace the services reported by discovery.
    #[must_use]
    pub fn services(mut self, services: Vec<DiscoveredService>) -> Self {
        self.services = services;
        self
    }

    /// Delay before every reply event.
    #[must_use]
    pub fn latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    /// Extra delay before a write completes.
    #[must_use]
    pub fn write_latency(mut self, latency: Duration) -> Self {
        self.write_latency = latency;
        self
    }

    /// How many link-down events a disconnect produces (0 for none).
    #[must_use]
    pub fn disconnect_reports(mut self, reports: u32) -> Self {
        self.disconnect_reports = reports;
        self
    }

    /// Build the mock transport.
    #[must_use]
    pub fn build(self) -> MockTransport {
        MockTransport {
            capabilities: self.capabilities,
            connect: self.connect,
            discovery: self.discovery,
            write: self.write,
            services: self.services,
            latency: self.latency,
            write_latency: self.write_latency,
            disconnect_reports: self.disconnect_reports,
            next_handle: AtomicU64::new(1),
            links: Mutex::new(HashMap::new()),
            addresses: Mutex::new(Vec::new()),
            writes: Mutex::new(Vec::new()),
            connect_count: AtomicU32::new(0),
            discover_count: AtomicU32::new(0),
            disconnect_count: AtomicU32::new(0),
            release_count: AtomicU32::new(0),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transport::event_channel;
    use blecmd_types::CommandDescriptor;

    fn address() -> PeripheralAddress {
        PeripheralAddress::new("AA:BB:CC:DD:EE:FF").unwrap()
    }

    #[tokio::test]
    async fn test_mock_connect_posts_event() {
        let mock = MockTransport::machine();
        let (tx, mut rx) = event_channel();
        let handle = mock.connect(&address(), tx).unwrap();

        let event = rx.recv().await.unwrap();
        assert_eq!(
            event,
            TransportEvent::ConnectionStateChanged {
                handle,
                status: GattStatus::SUCCESS,
                state: LinkState::Connected,
            }
        );
        assert_eq!(mock.connect_count(), 1);
        assert_eq!(mock.open_links(), 1);
        assert_eq!(mock.connected_addresses(), vec![address()]);
    }

    #[test]
    fn test_mock_refuses_connect() {
        let mock = MockTransport::builder()
            .connect(ConnectBehavior::Refuse("adapter off".into()))
            .build();
        let (tx, _rx) = event_channel();
        let err = mock.connect(&address(), tx).unwrap_err();
        assert!(err.to_string().contains("adapter off"));
        assert_eq!(mock.open_links(), 0);
    }

    #[test]
    fn test_mock_handles_are_unique() {
        let mock = MockTransport::silent();
        let (tx, _rx) = event_channel();
        let a = mock.connect(&address(), tx.clone()).unwrap();
        let b = mock.connect(&address(), tx).unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_mock_unknown_handle() {
        let mock = MockTransport::machine();
        let err = mock
            .discover_services(ConnectionHandle::new(404))
            .unwrap_err();
        assert!(matches!(err, Error::UnknownHandle(_)));
    }

    #[tokio::test]
    async fn test_mock_legacy_write_ignores_peripheral_status() {
        let mock = MockTransport::builder()
            .legacy_writes()
            .write(WriteBehavior::Complete(GattStatus::WRITE_NOT_PERMITTED))
            .build();
        let (tx, mut rx) = event_channel();
        let handle = mock.connect(&address(), tx).unwrap();
        let _connected = rx.recv().await.unwrap();

        let request = WriteRequest::from(&CommandDescriptor::machine_sleep());
        mock.write_characteristic(handle, &request).unwrap();

        let event = rx.recv().await.unwrap();
        assert!(matches!(
            event,
            TransportEvent::CharacteristicWriteComplete {
                status: GattStatus::SUCCESS,
                ..
            }
        ));
        assert!(!mock.writes()[0].acknowledged);
    }

    #[tokio::test]
    async fn test_mock_release_drops_sender() {
        let mock = MockTransport::silent();
        let (tx, mut rx) = event_channel();
        let handle = mock.connect(&address(), tx).unwrap();
        mock.release(handle);

        assert_eq!(mock.open_links(), 0);
        assert!(rx.recv().await.is_none());
        assert!(!mock.inject(TransportEvent::ConnectionStateChanged {
            handle,
            status: GattStatus::SUCCESS,
            state: LinkState::Connected,
        }));
    }
}
