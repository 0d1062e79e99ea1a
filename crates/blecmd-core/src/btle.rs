//! [`Transport`] implementation on top of btleplug.
//!
//! btleplug exposes async calls rather than callbacks, so every request is
//! spawned as a task on the runtime the transport was built on and reports
//! its outcome as a [`TransportEvent`]. A per-link task watches the
//! adapter's event stream for the peripheral dropping off.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use btleplug::api::{
    Central, CentralEvent, Manager as _, Peripheral as _, ScanFilter, WriteType,
};
use btleplug::platform::{Adapter, Manager, Peripheral, PeripheralId};
use futures::StreamExt;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, info, warn};

use blecmd_types::{GattStatus, PeripheralAddress};

use crate::error::{Error, Result};
use crate::platform::PlatformConfig;
use crate::transport::{
    ConnectionHandle, DiscoveredService, EventSender, LinkState, Transport,
    TransportCapabilities, TransportEvent, WriteRequest,
};

/// Get the first available Bluetooth adapter.
pub async fn get_adapter() -> Result<Adapter> {
    let manager = Manager::new().await?;
    let adapters = manager.adapters().await?;

    adapters.into_iter().next().ok_or(Error::AdapterUnavailable)
}

struct Link {
    events: EventSender,
    peripheral: Option<Peripheral>,
    tasks: Vec<JoinHandle<()>>,
}

type Links = Arc<Mutex<HashMap<ConnectionHandle, Link>>>;

fn locked(links: &Links) -> MutexGuard<'_, HashMap<ConnectionHandle, Link>> {
    links.lock().unwrap_or_else(PoisonError::into_inner)
}

/// A btleplug-backed transport.
///
/// Must be built inside a tokio runtime; request tasks run on that runtime
/// even when requests are issued from elsewhere.
pub struct BtleTransport {
    adapter: Adapter,
    runtime: Handle,
    platform: PlatformConfig,
    next_handle: AtomicU64,
    links: Links,
}

impl std::fmt::Debug for BtleTransport {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BtleTransport")
            .field("platform", &self.platform.platform)
            .field("capabilities", &self.platform.capabilities())
            .field("links", &locked(&self.links).len())
            .finish()
    }
}

impl BtleTransport {
    /// Use the first adapter with settings for the current platform.
    #[tracing::instrument(level = "info", skip_all)]
    pub async fn new() -> Result<Self> {
        Self::with_config(PlatformConfig::for_current_platform()).await
    }

    /// Use the first adapter with explicit platform settings.
    pub async fn with_config(platform: PlatformConfig) -> Result<Self> {
        let adapter = get_adapter().await?;
        info!(
            platform = ?platform.platform,
            acknowledged_writes = platform.acknowledged_writes,
            "Bluetooth transport ready"
        );
        Ok(Self {
            adapter,
            runtime: Handle::current(),
            platform,
            next_handle: AtomicU64::new(1),
            links: Arc::new(Mutex::new(HashMap::new())),
        })
    }

    fn peripheral(&self, handle: ConnectionHandle) -> Result<(Peripheral, EventSender)> {
        let links = locked(&self.links);
        let link = links.get(&handle).ok_or(Error::UnknownHandle(handle))?;
        let peripheral = link.peripheral.clone().ok_or(Error::NotConnected)?;
        Ok((peripheral, link.events.clone()))
    }

    fn track(&self, handle: ConnectionHandle, task: JoinHandle<()>) {
        match locked(&self.links).get_mut(&handle) {
            Some(link) => link.tasks.push(task),
            None => task.abort(),
        }
    }
}

impl Transport for BtleTransport {
    fn capabilities(&self) -> TransportCapabilities {
        self.platform.capabilities()
    }

    fn connect(
        &self,
        address: &PeripheralAddress,
        events: EventSender,
    ) -> Result<ConnectionHandle> {
        let handle = ConnectionHandle::new(self.next_handle.fetch_add(1, Ordering::SeqCst));
        locked(&self.links).insert(
            handle,
            Link {
                events: events.clone(),
                peripheral: None,
                tasks: Vec::new(),
            },
        );

        let task = self.runtime.spawn(establish(
            self.adapter.clone(),
            Arc::clone(&self.links),
            handle,
            address.clone(),
            self.platform.clone(),
            events,
        ));
        self.track(handle, task);
        Ok(handle)
    }

    fn discover_services(&self, handle: ConnectionHandle) -> Result<()> {
        let (peripheral, events) = self.peripheral(handle)?;
        let task = self.runtime.spawn(async move {
            let event = match peripheral.discover_services().await {
                Ok(()) => TransportEvent::ServicesDiscovered {
                    handle,
                    status: GattStatus::SUCCESS,
                    services: peripheral
                        .services()
                        .iter()
                        .map(|s| {
                            DiscoveredService::new(s.uuid, s.characteristics.iter().map(|c| c.uuid))
                        })
                        .collect(),
                },
                Err(e) => {
                    warn!(error = %e, %handle, "Service discovery failed");
                    TransportEvent::ServicesDiscovered {
                        handle,
                        status: GattStatus::FAILURE,
                        services: Vec::new(),
                    }
                }
            };
            let _ = events.send(event);
        });
        self.track(handle, task);
        Ok(())
    }

    fn write_characteristic(&self, handle: ConnectionHandle, request: &WriteRequest) -> Result<()> {
        let (peripheral, events) = self.peripheral(handle)?;
        let characteristic = peripheral
            .characteristics()
            .into_iter()
            .find(|c| c.uuid == request.characteristic && c.service_uuid == request.service)
            .ok_or_else(|| {
                Error::rejected(format!(
                    "characteristic {} was not discovered",
                    request.characteristic
                ))
            })?;

        let write_type = if self.capabilities().expects_acknowledgement(request.mode) {
            WriteType::WithResponse
        } else {
            WriteType::WithoutResponse
        };
        let payload = request.payload.clone();
        let task = self.runtime.spawn(async move {
            let status = match peripheral.write(&characteristic, &payload, write_type).await {
                Ok(()) => GattStatus::SUCCESS,
                Err(e) => {
                    warn!(error = %e, %handle, "Characteristic write failed");
                    GattStatus::FAILURE
                }
            };
            let _ = events.send(TransportEvent::CharacteristicWriteComplete {
                handle,
                characteristic: characteristic.uuid,
                status,
            });
        });
        self.track(handle, task);
        Ok(())
    }

    fn disconnect(&self, handle: ConnectionHandle) {
        let Ok((peripheral, events)) = self.peripheral(handle) else {
            debug!(%handle, "Nothing to disconnect");
            return;
        };
        // Not tracked: release must not cancel an outstanding disconnect.
        self.runtime.spawn(async move {
            match peripheral.disconnect().await {
                Ok(()) => {
                    let _ = events.send(TransportEvent::ConnectionStateChanged {
                        handle,
                        status: GattStatus::SUCCESS,
                        state: LinkState::Disconnected,
                    });
                }
                Err(e) => warn!(error = %e, %handle, "Disconnect failed"),
            }
        });
    }

    fn release(&self, handle: ConnectionHandle) {
        if let Some(link) = locked(&self.links).remove(&handle) {
            for task in link.tasks {
                task.abort();
            }
        }
    }
}

/// Locate and connect to `address`, then report the link going down.
async fn establish(
    adapter: Adapter,
    links: Links,
    handle: ConnectionHandle,
    address: PeripheralAddress,
    platform: PlatformConfig,
    events: EventSender,
) {
    let connected = async {
        let peripheral = locate(&adapter, &address, &platform)
            .await?
            .ok_or_else(|| Error::rejected(format!("peripheral {address} not found")))?;
        if let Some(link) = locked(&links).get_mut(&handle) {
            link.peripheral = Some(peripheral.clone());
        }
        // Subscribe before connecting so a fast drop is not missed.
        let stream = adapter.events().await?;
        peripheral.connect().await?;
        Ok::<_, Error>((peripheral.id(), stream))
    }
    .await;

    let (id, mut stream) = match connected {
        Ok(link) => link,
        Err(e) => {
            warn!(error = %e, %address, "Connection failed");
            let _ = events.send(TransportEvent::ConnectionStateChanged {
                handle,
                status: GattStatus::FAILURE,
                state: LinkState::Disconnected,
            });
            return;
        }
    };

    debug!(%address, %handle, "Link up");
    let _ = events.send(TransportEvent::ConnectionStateChanged {
        handle,
        status: GattStatus::SUCCESS,
        state: LinkState::Connected,
    });

    while let Some(event) = stream.next().await {
        if let CentralEvent::DeviceDisconnected(gone) = event
            && gone == id
        {
            debug!(%address, %handle, "Link down");
            let _ = events.send(TransportEvent::ConnectionStateChanged {
                handle,
                status: GattStatus::SUCCESS,
                state: LinkState::Disconnected,
            });
            break;
        }
    }
}

/// Find a known peripheral, scanning briefly if the adapter has not seen it.
async fn locate(
    adapter: &Adapter,
    address: &PeripheralAddress,
    platform: &PlatformConfig,
) -> Result<Option<Peripheral>> {
    let trust_mac = platform.exposes_mac_address;
    if let Some(peripheral) = find_known(adapter, address, trust_mac).await? {
        debug!(%address, "Peripheral already known");
        return Ok(Some(peripheral));
    }

    let scan_duration = platform.lookup_scan_duration;
    debug!(%address, ?scan_duration, "Peripheral not cached, scanning");
    adapter.start_scan(ScanFilter::default()).await?;
    sleep(scan_duration).await;
    adapter.stop_scan().await?;
    find_known(adapter, address, trust_mac).await
}

async fn find_known(
    adapter: &Adapter,
    address: &PeripheralAddress,
    trust_mac: bool,
) -> Result<Option<Peripheral>> {
    for peripheral in adapter.peripherals().await? {
        let mac = match peripheral.properties().await {
            Ok(Some(props)) => Some(props.address.to_string()),
            _ => None,
        };
        let id = format_peripheral_id(&peripheral.id());
        if identifies(address.as_str(), mac.as_deref(), &id, trust_mac) {
            return Ok(Some(peripheral));
        }
    }
    Ok(None)
}

/// Format a peripheral ID as a string.
///
/// On macOS this is the CoreBluetooth UUID; elsewhere a platform path or
/// address.
fn format_peripheral_id(id: &PeripheralId) -> String {
    format!("{:?}", id)
        .trim_start_matches("PeripheralId(")
        .trim_end_matches(')')
        .to_string()
}

/// Whether `wanted` names the peripheral with this MAC and platform id.
///
/// MACs compare case-insensitively with or without separators. When the
/// platform does not expose MACs (`trust_mac` false) only the platform id is
/// compared. An all-zero MAC is a placeholder and never matches.
fn identifies(wanted: &str, mac: Option<&str>, peripheral_id: &str, trust_mac: bool) -> bool {
    let wanted = wanted.to_lowercase();
    if peripheral_id.to_lowercase() == wanted {
        return true;
    }
    match mac {
        Some(mac) if trust_mac && mac != "00:00:00:00:00:00" => {
            let mac = mac.to_lowercase();
            mac == wanted || mac.replace(':', "") == wanted.replace([':', '-'], "")
        }
        _ => false,
    }
}
