//! Lifecycle of the single sensor connection.
//!
//! ```text
//!  PoweredOff --radio on--> Scanning --peer found--> Connecting --setup ok--> Ready
//!      ^                       ^                         |                      |
//!      |                       |                    setup failed            link lost
//!  radio off              rescan timer                   v                      v
//!  (any state)                 +------------------ Disconnected <---------------+
//! ```
//!
//! A lost link, a failed connect and a failed GATT setup all schedule the
//! rescan timer. The exception is a watch that connects but does not expose
//! both characteristics: that attempt is abandoned and stays `Disconnected`
//! until someone calls [`LinkSession::rescan`] or the released link reports
//! its disconnect.
//!
//! The session is driven by one task (see [`crate::device`]), so transitions
//! never interleave. While a GATT operation is awaited the published state
//! keeps its pre-transition value.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, field, info, warn, Span};
use uuid::Uuid;

use crate::codec::{hex, CommandFrame, FrameError};
use crate::config::DeviceConfig;
use crate::device::DeviceCommand;
use crate::publisher::LinkStatePublisher;
use crate::transport::{Transport, TransportError, TransportEvent};
use crate::types::{DeviceIdentity, LinkState, LinkStatus, PeerId};

/// Errors returned by [`LinkSession::send`].
#[derive(Debug, Error)]
pub enum LinkError {
    /// The link is not in the `Ready` state.
    #[error("device link is not ready (state: {state})")]
    NotReady {
        /// State at the time of the call.
        state: LinkState,
    },

    /// The command could not be encoded.
    #[error(transparent)]
    Frame(#[from] FrameError),

    /// The transport rejected the write.
    #[error(transparent)]
    Transport(#[from] TransportError),
}

/// What the device actor has to do after an event was applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionOutcome {
    /// Nothing further.
    Idle,
    /// The link just became ready; streaming must be started.
    Ready,
    /// A notification from the connected watch, to be decoded.
    Frame(Vec<u8>),
}

/// Owner of the link state, device identity and write characteristic.
pub struct LinkSession<T: Transport> {
    transport: Arc<T>,
    device: DeviceConfig,
    state: LinkState,
    radio_on: bool,
    identity: Option<DeviceIdentity>,
    link: Option<T::Link>,
    write_characteristic: Option<T::Characteristic>,
    abandoned: Option<PeerId>,
    status: watch::Sender<LinkStatus>,
    publisher: LinkStatePublisher,
    reconnect: mpsc::Sender<DeviceCommand>,
    reconnect_timer: Option<JoinHandle<()>>,
}

impl<T: Transport> LinkSession<T> {
    /// Create a session in `PoweredOff`.
    ///
    /// `reconnect` is where the rescan timer delivers
    /// [`DeviceCommand::ReconnectDue`].
    pub fn new(
        transport: Arc<T>,
        device: DeviceConfig,
        status: watch::Sender<LinkStatus>,
        publisher: LinkStatePublisher,
        reconnect: mpsc::Sender<DeviceCommand>,
    ) -> Self {
        let session = Self {
            transport,
            device,
            state: LinkState::PoweredOff,
            radio_on: false,
            identity: None,
            link: None,
            write_characteristic: None,
            abandoned: None,
            status,
            publisher,
            reconnect,
            reconnect_timer: None,
        };
        session.publish_status();
        session
    }

    /// Current link state.
    #[must_use]
    pub const fn state(&self) -> LinkState {
        self.state
    }

    /// The connected device, if ready.
    #[must_use]
    pub const fn identity(&self) -> Option<&DeviceIdentity> {
        self.identity.as_ref()
    }

    /// Apply one transport event.
    pub async fn handle_event(&mut self, event: TransportEvent) -> SessionOutcome {
        match event {
            TransportEvent::RadioStateChanged { powered } => {
                self.on_radio_state(powered).await;
                SessionOutcome::Idle
            }
            TransportEvent::PeerDiscovered {
                peer,
                services,
                name,
            } => self.on_peer_discovered(peer, &services, name).await,
            TransportEvent::Notification { peer, data } => self.on_notification(&peer, data),
            TransportEvent::Disconnected { peer } => {
                self.on_disconnected(&peer).await;
                SessionOutcome::Idle
            }
        }
    }

    /// Write a command frame to the watch.
    ///
    /// Nothing is queued: when the link is not ready the frame is rejected
    /// without touching the transport.
    ///
    /// # Errors
    ///
    /// [`LinkError::NotReady`] unless the link is ready, or
    /// [`LinkError::Transport`] if the write fails.
    pub async fn send(&self, frame: &CommandFrame) -> Result<(), LinkError> {
        let not_ready = LinkError::NotReady { state: self.state };
        if self.state != LinkState::Ready {
            return Err(not_ready);
        }
        let Some(characteristic) = self.write_characteristic.as_ref() else {
            return Err(not_ready);
        };

        self.transport
            .write(characteristic, frame.as_bytes())
            .await?;
        debug!(frame = %hex(frame.as_bytes()), "Command sent");
        Ok(())
    }

    /// Manually restart scanning after an abandoned connection attempt.
    ///
    /// Returns `false` (and does nothing) unless the session is
    /// `Disconnected` with the radio on.
    pub async fn rescan(&mut self) -> bool {
        if self.state != LinkState::Disconnected || !self.radio_on {
            debug!(state = %self.state, "Rescan ignored");
            return false;
        }
        self.cancel_reconnect_timer();
        self.begin_scan().await;
        true
    }

    /// The rescan timer fired.
    pub async fn on_reconnect_due(&mut self) {
        self.reconnect_timer = None;
        if self.state != LinkState::Disconnected || !self.radio_on {
            debug!(state = %self.state, "Stale reconnect timer ignored");
            return;
        }
        info!("Rescanning for Vital Watch");
        self.begin_scan().await;
    }

    async fn on_radio_state(&mut self, powered: bool) {
        self.radio_on = powered;
        if powered {
            if self.state == LinkState::PoweredOff {
                info!("Bluetooth powered on, scanning for Vital Watch");
                self.begin_scan().await;
            } else {
                self.publish_status();
            }
            return;
        }

        warn!("Bluetooth is not powered on");
        self.cancel_reconnect_timer();
        let previous = self.state;
        if previous == LinkState::Scanning {
            if let Err(e) = self.transport.stop_scan().await {
                debug!(error = %e, "Stopping scan after power loss failed");
            }
        }
        self.teardown().await;
        self.set_state(LinkState::PoweredOff);
        if previous == LinkState::Ready {
            self.publisher.publish_offline();
        }
    }

    async fn on_peer_discovered(
        &mut self,
        peer: PeerId,
        services: &[Uuid],
        name: Option<String>,
    ) -> SessionOutcome {
        if self.state != LinkState::Scanning {
            debug!(%peer, state = %self.state, "Discovery ignored");
            return SessionOutcome::Idle;
        }
        if !services.contains(&self.device.service_uuid) {
            debug!(%peer, "Peer does not advertise the watch service");
            return SessionOutcome::Idle;
        }

        info!(%peer, name = name.as_deref().unwrap_or("<unnamed>"), "Found Vital Watch");
        Span::current().record("peer", field::display(&peer));
        self.set_state(LinkState::Connecting);
        if let Err(e) = self.transport.stop_scan().await {
            warn!(error = %e, "Failed to stop scan");
        }

        match self.establish(&peer).await {
            Ok((link, write_characteristic)) => {
                self.link = Some(link);
                self.write_characteristic = Some(write_characteristic);
                self.identity = Some(DeviceIdentity { peer, name });
                self.set_state(LinkState::Ready);
                info!("Connected to Vital Watch");
                SessionOutcome::Ready
            }
            Err(e @ TransportError::CharacteristicMissing { .. }) => {
                error!(%peer, error = %e, "Device setup abandoned, rescan manually");
                self.abandoned = Some(peer);
                self.set_state(LinkState::Disconnected);
                SessionOutcome::Idle
            }
            Err(e) => {
                error!(%peer, error = %e, "Failed to connect or set up device");
                self.set_state(LinkState::Disconnected);
                self.schedule_reconnect();
                SessionOutcome::Idle
            }
        }
    }

    fn on_notification(&self, peer: &PeerId, data: Vec<u8>) -> SessionOutcome {
        match (&self.identity, self.state) {
            (Some(identity), LinkState::Ready) if identity.peer == *peer => {
                debug!(frame = %hex(&data), "Data received");
                SessionOutcome::Frame(data)
            }
            _ => {
                debug!(%peer, state = %self.state, "Notification from unexpected peer dropped");
                SessionOutcome::Idle
            }
        }
    }

    async fn on_disconnected(&mut self, peer: &PeerId) {
        if self.state == LinkState::Disconnected && self.abandoned.as_ref() == Some(peer) {
            warn!(%peer, "Abandoned device dropped the link, restarting scan");
            self.abandoned = None;
            self.schedule_reconnect();
            return;
        }

        let connected_peer = self.identity.as_ref().map(|identity| &identity.peer);
        if self.state != LinkState::Ready || connected_peer != Some(peer) {
            debug!(%peer, state = %self.state, "Disconnect ignored");
            return;
        }

        warn!(%peer, "Device disconnected, restarting scan");
        self.teardown().await;
        self.set_state(LinkState::Disconnected);
        self.publisher.publish_offline();
        self.schedule_reconnect();
    }

    /// Connect, resolve both characteristics and subscribe. A half-open link
    /// is released on failure.
    async fn establish(
        &self,
        peer: &PeerId,
    ) -> Result<(T::Link, T::Characteristic), TransportError> {
        let link = self.transport.connect(peer).await?;
        match self.prepare(&link).await {
            Ok(write_characteristic) => Ok((link, write_characteristic)),
            Err(e) => {
                if let Err(disconnect_error) = self.transport.disconnect(&link).await {
                    debug!(error = %disconnect_error, "Releasing half-open link failed");
                }
                Err(e)
            }
        }
    }

    async fn prepare(&self, link: &T::Link) -> Result<T::Characteristic, TransportError> {
        let write_uuid = self.device.write_characteristic_uuid;
        let notify_uuid = self.device.notify_characteristic_uuid;
        let resolved = self
            .transport
            .discover_characteristics(link, self.device.service_uuid, &[write_uuid, notify_uuid])
            .await?;

        let find = |uuid: Uuid| {
            resolved
                .iter()
                .find(|(candidate, _)| *candidate == uuid)
                .map(|(_, characteristic)| characteristic.clone())
                .ok_or(TransportError::CharacteristicMissing { uuid })
        };
        let write_characteristic = find(write_uuid)?;
        let notify_characteristic = find(notify_uuid)?;
        debug!("Found write and notify characteristics");

        self.transport.subscribe(link, &notify_characteristic).await?;
        Ok(write_characteristic)
    }

    async fn begin_scan(&mut self) {
        self.abandoned = None;
        match self.transport.start_scan(self.device.service_uuid).await {
            Ok(()) => self.set_state(LinkState::Scanning),
            Err(e) => {
                error!(error = %e, "Failed to start scan");
                self.set_state(LinkState::Disconnected);
                self.schedule_reconnect();
            }
        }
    }

    async fn teardown(&mut self) {
        self.identity = None;
        self.abandoned = None;
        self.write_characteristic = None;
        if let Some(link) = self.link.take() {
            if let Err(e) = self.transport.disconnect(&link).await {
                debug!(error = %e, "Link teardown failed");
            }
        }
    }

    fn schedule_reconnect(&mut self) {
        self.cancel_reconnect_timer();
        let delay = self.device.reconnect_delay();
        let reconnect = self.reconnect.clone();
        debug!(delay_secs = delay.as_secs(), "Rescan scheduled");
        self.reconnect_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            let _ = reconnect.send(DeviceCommand::ReconnectDue).await;
        }));
    }

    fn cancel_reconnect_timer(&mut self) {
        if let Some(timer) = self.reconnect_timer.take() {
            timer.abort();
        }
    }

    fn set_state(&mut self, state: LinkState) {
        if self.state != state {
            debug!(from = %self.state, to = %state, "Link state changed");
        }
        self.state = state;
        self.publish_status();
    }

    fn publish_status(&self) {
        self.status.send_replace(LinkStatus {
            radio_on: self.radio_on,
            device_connected: self.state == LinkState::Ready,
            device_name: self
                .identity
                .as_ref()
                .and_then(|identity| identity.name.clone()),
            state: self.state,
        });
    }
}

impl<T: Transport> Drop for LinkSession<T> {
    fn drop(&mut self) {
        self.cancel_reconnect_timer();
    }
}
