//! The seam between the protocol layer and the wireless stack.
//!
//! A [`Transport`] performs GATT operations on request. Everything the radio
//! reports on its own (power changes, advertisements, notifications, link
//! loss) is pushed as a [`TransportEvent`] onto a single ordered channel that
//! the device actor consumes.

use std::future::Future;

use thiserror::Error;
use uuid::Uuid;

use crate::types::PeerId;

#[cfg(feature = "bluetooth")]
mod bluez;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
mod mock;

#[cfg(feature = "bluetooth")]
pub use bluez::BluezTransport;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use mock::{MockCall, MockTransport};

/// Bluetooth-specific errors.
#[derive(Debug, Clone, Error)]
pub enum TransportError {
    /// No Bluetooth adapter available.
    #[error("No Bluetooth adapter found")]
    AdapterNotFound,

    /// Bluetooth adapter is powered off.
    #[error("Bluetooth adapter is powered off")]
    AdapterPoweredOff,

    /// Failed to open a session with the Bluetooth daemon.
    #[error("Failed to initialize Bluetooth session: {message}")]
    SessionInitFailed {
        /// Error details.
        message: String,
    },

    /// Starting or stopping discovery failed.
    #[error("Bluetooth scan failed: {message}")]
    ScanFailed {
        /// Error details.
        message: String,
    },

    /// The peer could not be connected.
    #[error("Failed to connect to {peer}: {message}")]
    ConnectFailed {
        /// Peer being connected.
        peer: String,
        /// Error details.
        message: String,
    },

    /// Service or characteristic discovery failed.
    #[error("GATT discovery failed: {message}")]
    DiscoveryFailed {
        /// Error details.
        message: String,
    },

    /// A required characteristic is not exposed by the peer.
    #[error("Characteristic {uuid} not found on the device")]
    CharacteristicMissing {
        /// UUID that could not be resolved.
        uuid: Uuid,
    },

    /// Enabling notifications failed.
    #[error("Failed to subscribe to notifications: {message}")]
    SubscribeFailed {
        /// Error details.
        message: String,
    },

    /// A characteristic write failed.
    #[error("Characteristic write failed: {message}")]
    WriteFailed {
        /// Error details.
        message: String,
    },

    /// Internal error.
    #[error("Bluetooth error: {message}")]
    Internal {
        /// Error details.
        message: String,
    },
}

/// Result type for transport operations.
pub type TransportResult<T> = std::result::Result<T, TransportError>;

/// Something the radio reported without being asked.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The adapter was powered on or off.
    RadioStateChanged {
        /// New power state.
        powered: bool,
    },
    /// An advertising peer was seen during a scan.
    PeerDiscovered {
        /// Peer identifier.
        peer: PeerId,
        /// Service UUIDs in the advertisement.
        services: Vec<Uuid>,
        /// Advertised local name.
        name: Option<String>,
    },
    /// A subscribed characteristic delivered a value.
    Notification {
        /// Sending peer.
        peer: PeerId,
        /// Raw frame.
        data: Vec<u8>,
    },
    /// The link to a peer went down.
    Disconnected {
        /// Peer that dropped.
        peer: PeerId,
    },
}

/// GATT operations the link session needs from the wireless stack.
///
/// Implementations report asynchronous happenings through the event sender
/// handed to them at construction, never through return values.
pub trait Transport: Send + Sync + 'static {
    /// Handle to an established connection.
    type Link: Send + Sync + 'static;

    /// Handle to a resolved characteristic.
    type Characteristic: Clone + Send + Sync + 'static;

    /// Start a passive scan limited to peers advertising `service`.
    fn start_scan(&self, service: Uuid) -> impl Future<Output = TransportResult<()>> + Send;

    /// Stop a running scan. Stopping an idle scanner is not an error.
    fn stop_scan(&self) -> impl Future<Output = TransportResult<()>> + Send;

    /// Connect to a discovered peer.
    fn connect(&self, peer: &PeerId) -> impl Future<Output = TransportResult<Self::Link>> + Send;

    /// Resolve the characteristics in `characteristics` that `service` exposes.
    ///
    /// Missing characteristics are simply absent from the result.
    fn discover_characteristics(
        &self,
        link: &Self::Link,
        service: Uuid,
        characteristics: &[Uuid],
    ) -> impl Future<Output = TransportResult<Vec<(Uuid, Self::Characteristic)>>> + Send;

    /// Enable notifications; values arrive as [`TransportEvent::Notification`].
    fn subscribe(
        &self,
        link: &Self::Link,
        characteristic: &Self::Characteristic,
    ) -> impl Future<Output = TransportResult<()>> + Send;

    /// Write a value to a characteristic.
    fn write(
        &self,
        characteristic: &Self::Characteristic,
        bytes: &[u8],
    ) -> impl Future<Output = TransportResult<()>> + Send;

    /// Tear down a link, e.g. one that failed setup half way.
    fn disconnect(&self, link: &Self::Link) -> impl Future<Output = TransportResult<()>> + Send;
}

/// Expand a 16-bit Bluetooth SIG short UUID (`0xFFF0`) to its 128-bit form.
#[must_use]
pub const fn uuid_from_u16(short: u16) -> Uuid {
    Uuid::from_u128(((short as u128) << 96) | 0x0000_0000_0000_1000_8000_0080_5f9b_34fb)
}
