//! BlueZ transport built on `bluer`.
//!
//! Adapter power changes, discovery results, characteristic notifications and
//! link loss are forwarded from background tasks onto the event channel.

use std::collections::HashSet;
use std::time::Duration;

use bluer::gatt::remote::Characteristic;
use bluer::{
    Adapter, AdapterEvent, AdapterProperty, Address, Device, DeviceEvent, DeviceProperty,
    DiscoveryFilter, DiscoveryTransport, Session,
};
use futures::StreamExt;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::{Transport, TransportError, TransportEvent, TransportResult};
use crate::types::PeerId;

const SERVICES_RESOLVE_POLL: Duration = Duration::from_millis(250);
const SERVICES_RESOLVE_ATTEMPTS: u32 = 40;

/// [`super::Transport`] backed by the system's default BlueZ adapter.
pub struct BluezTransport {
    _session: Session,
    adapter: Adapter,
    events: mpsc::Sender<TransportEvent>,
    scan_task: Mutex<Option<JoinHandle<()>>>,
    link_tasks: Mutex<Vec<JoinHandle<()>>>,
    radio_task: JoinHandle<()>,
}

impl BluezTransport {
    /// Open a BlueZ session on the default adapter and start reporting its
    /// power state.
    ///
    /// # Errors
    ///
    /// Returns an error if the Bluetooth daemon is unreachable or no adapter
    /// is present.
    pub async fn new(events: mpsc::Sender<TransportEvent>) -> TransportResult<Self> {
        let session = Session::new()
            .await
            .map_err(|e| TransportError::SessionInitFailed {
                message: e.to_string(),
            })?;
        let adapter = session
            .default_adapter()
            .await
            .map_err(|_| TransportError::AdapterNotFound)?;

        let powered = adapter.is_powered().await.map_err(internal)?;
        info!(adapter = adapter.name(), powered, "Using Bluetooth adapter");

        let adapter_events = adapter.events().await.map_err(internal)?;
        let radio_events = events.clone();
        let radio_task = tokio::spawn(async move {
            if radio_events
                .send(TransportEvent::RadioStateChanged { powered })
                .await
                .is_err()
            {
                return;
            }
            let mut adapter_events = Box::pin(adapter_events);
            while let Some(event) = adapter_events.next().await {
                if let AdapterEvent::PropertyChanged(AdapterProperty::Powered(powered)) = event {
                    let event = TransportEvent::RadioStateChanged { powered };
                    if radio_events.send(event).await.is_err() {
                        break;
                    }
                }
            }
        });

        Ok(Self {
            _session: session,
            adapter,
            events,
            scan_task: Mutex::new(None),
            link_tasks: Mutex::new(Vec::new()),
            radio_task,
        })
    }

    async fn wait_for_services(device: &Device) -> TransportResult<()> {
        for _ in 0..SERVICES_RESOLVE_ATTEMPTS {
            if device.is_services_resolved().await.map_err(discovery)? {
                return Ok(());
            }
            tokio::time::sleep(SERVICES_RESOLVE_POLL).await;
        }
        Err(TransportError::DiscoveryFailed {
            message: "services were not resolved in time".into(),
        })
    }

    async fn watch_link(&self, device: &Device) -> TransportResult<()> {
        let device_events = device.events().await.map_err(internal)?;
        let peer = PeerId::new(device.address().to_string());
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut device_events = Box::pin(device_events);
            while let Some(DeviceEvent::PropertyChanged(property)) = device_events.next().await {
                if matches!(property, DeviceProperty::Connected(false)) {
                    let _ = events.send(TransportEvent::Disconnected { peer }).await;
                    break;
                }
            }
        });
        self.link_tasks.lock().await.push(task);
        Ok(())
    }
}

impl Drop for BluezTransport {
    fn drop(&mut self) {
        self.radio_task.abort();
    }
}

impl Transport for BluezTransport {
    type Link = Device;
    type Characteristic = Characteristic;

    async fn start_scan(&self, service: Uuid) -> TransportResult<()> {
        if !self.adapter.is_powered().await.map_err(internal)? {
            return Err(TransportError::AdapterPoweredOff);
        }
        let filter = DiscoveryFilter {
            uuids: HashSet::from([service]),
            transport: DiscoveryTransport::Le,
            ..DiscoveryFilter::default()
        };
        self.adapter
            .set_discovery_filter(filter)
            .await
            .map_err(scan)?;
        let discovered = self.adapter.discover_devices().await.map_err(scan)?;

        let adapter = self.adapter.clone();
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut discovered = Box::pin(discovered);
            while let Some(event) = discovered.next().await {
                let AdapterEvent::DeviceAdded(address) = event else {
                    continue;
                };
                let Ok(device) = adapter.device(address) else {
                    continue;
                };
                let name = device.name().await.ok().flatten();
                let services = device
                    .uuids()
                    .await
                    .ok()
                    .flatten()
                    .map(|uuids| uuids.into_iter().collect())
                    .unwrap_or_default();
                let event = TransportEvent::PeerDiscovered {
                    peer: PeerId::new(address.to_string()),
                    services,
                    name,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });

        if let Some(previous) = self.scan_task.lock().await.replace(task) {
            previous.abort();
        }
        Ok(())
    }

    async fn stop_scan(&self) -> TransportResult<()> {
        // Dropping the discovery stream ends the BlueZ discovery session.
        if let Some(task) = self.scan_task.lock().await.take() {
            task.abort();
        }
        Ok(())
    }

    async fn connect(&self, peer: &PeerId) -> TransportResult<Device> {
        let connect_failed = |message: String| TransportError::ConnectFailed {
            peer: peer.to_string(),
            message,
        };
        let address: Address = peer
            .as_str()
            .parse()
            .map_err(|e: bluer::InvalidAddress| connect_failed(e.to_string()))?;
        let device = self
            .adapter
            .device(address)
            .map_err(|e| connect_failed(e.to_string()))?;
        device
            .connect()
            .await
            .map_err(|e| connect_failed(e.to_string()))?;
        self.watch_link(&device).await?;
        Ok(device)
    }

    async fn discover_characteristics(
        &self,
        link: &Device,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> TransportResult<Vec<(Uuid, Characteristic)>> {
        Self::wait_for_services(link).await?;

        let mut found = Vec::new();
        for remote_service in link.services().await.map_err(discovery)? {
            if remote_service.uuid().await.map_err(discovery)? != service {
                continue;
            }
            for characteristic in remote_service.characteristics().await.map_err(discovery)? {
                let uuid = characteristic.uuid().await.map_err(discovery)?;
                if characteristics.contains(&uuid) {
                    found.push((uuid, characteristic));
                }
            }
        }
        debug!(peer = %link.address(), resolved = found.len(), "Characteristic discovery done");
        Ok(found)
    }

    async fn subscribe(&self, link: &Device, characteristic: &Characteristic) -> TransportResult<()> {
        let notifications = characteristic
            .notify()
            .await
            .map_err(|e| TransportError::SubscribeFailed {
                message: e.to_string(),
            })?;

        let peer = PeerId::new(link.address().to_string());
        let events = self.events.clone();
        let task = tokio::spawn(async move {
            let mut notifications = Box::pin(notifications);
            while let Some(data) = notifications.next().await {
                let event = TransportEvent::Notification {
                    peer: peer.clone(),
                    data,
                };
                if events.send(event).await.is_err() {
                    break;
                }
            }
        });
        self.link_tasks.lock().await.push(task);
        Ok(())
    }

    async fn write(&self, characteristic: &Characteristic, bytes: &[u8]) -> TransportResult<()> {
        characteristic
            .write(bytes)
            .await
            .map_err(|e| TransportError::WriteFailed {
                message: e.to_string(),
            })
    }

    async fn disconnect(&self, link: &Device) -> TransportResult<()> {
        for task in self.link_tasks.lock().await.drain(..) {
            task.abort();
        }
        if !link.is_connected().await.unwrap_or(false) {
            return Ok(());
        }
        if let Err(e) = link.disconnect().await {
            warn!(peer = %link.address(), error = %e, "Disconnect failed");
            return Err(internal(e));
        }
        Ok(())
    }
}

fn internal(e: bluer::Error) -> TransportError {
    TransportError::Internal {
        message: e.to_string(),
    }
}

fn scan(e: bluer::Error) -> TransportError {
    TransportError::ScanFailed {
        message: e.to_string(),
    }
}

fn discovery(e: bluer::Error) -> TransportError {
    TransportError::DiscoveryFailed {
        message: e.to_string(),
    }
}
