//! Shared types and OpenAPI schemas.
//!
//! Readings are kept in raw device units (unsigned bytes); no scaling happens
//! anywhere in the core. Payloads that reach the browser dashboard serialize
//! with camelCase keys.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use uuid::Uuid;

/// Connection state of the single device slot.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum LinkState {
    /// The radio is off or its state is not yet known.
    #[default]
    PoweredOff,
    /// Passive scan for the sensor's service is running.
    Scanning,
    /// A connection attempt is in flight.
    Connecting,
    /// Connected, characteristics resolved and notifications subscribed.
    Ready,
    /// The link dropped or a connection attempt was abandoned.
    Disconnected,
}

impl fmt::Display for LinkState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::PoweredOff => "powered_off",
            Self::Scanning => "scanning",
            Self::Connecting => "connecting",
            Self::Ready => "ready",
            Self::Disconnected => "disconnected",
        };
        f.write_str(name)
    }
}

/// Opaque identifier of a BLE peer as reported by the transport.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerId(String);

impl PeerId {
    /// Wrap a transport-specific identifier (a BlueZ address string, for instance).
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// The identifier as text.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for PeerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// The connected sensor. Only exists while the link is ready.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceIdentity {
    /// Peer the link is established with.
    pub peer: PeerId,
    /// Advertised local name, if the device broadcast one.
    pub name: Option<String>,
}

/// Read-only snapshot of the link published to the rest of the system.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "radioOn": true,
    "deviceConnected": true,
    "deviceName": "VitalWatch-7F2A",
    "state": "ready"
}))]
pub struct LinkStatus {
    /// Whether the Bluetooth radio is powered on.
    pub radio_on: bool,

    /// Whether the sensor is connected and streaming.
    pub device_connected: bool,

    /// Advertised name of the connected sensor.
    #[schema(example = "VitalWatch-7F2A")]
    pub device_name: Option<String>,

    /// Current link state.
    pub state: LinkState,
}

/// One real-time reading from the continuous SpO2/blood-pressure stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "heartRate": 72,
    "bloodOxygen": 98,
    "bpSystolic": 118,
    "bpDiastolic": 76,
    "connected": true
}))]
pub struct LiveVitals {
    /// Heart rate in beats per minute.
    pub heart_rate: u8,
    /// Blood oxygen saturation in percent.
    pub blood_oxygen: u8,
    /// Systolic blood pressure in mmHg.
    pub bp_systolic: u8,
    /// Diastolic blood pressure in mmHg.
    pub bp_diastolic: u8,
    /// Always `true` for readings decoded from the device.
    pub connected: bool,
}

/// Result of a completed on-demand comprehensive measurement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
#[schema(example = json!({
    "hrv": 45,
    "vascularAging": 35,
    "heartRate": 70,
    "stress": 20,
    "bpSystolic": 120,
    "bpDiastolic": 80,
    "mood": 50,
    "respirationRate": 16
}))]
pub struct VitalsSnapshot {
    /// Heart-rate variability.
    pub hrv: u8,
    /// Vascular aging index.
    pub vascular_aging: u8,
    /// Heart rate in beats per minute.
    pub heart_rate: u8,
    /// Stress index.
    pub stress: u8,
    /// Systolic blood pressure in mmHg.
    pub bp_systolic: u8,
    /// Diastolic blood pressure in mmHg.
    pub bp_diastolic: u8,
    /// Mood index.
    pub mood: u8,
    /// Breaths per minute.
    pub respiration_rate: u8,
}

/// A snapshot as stored by the persistence layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SnapshotReport {
    /// Unique report identifier.
    pub id: Uuid,

    /// When the report was stored (UTC).
    #[schema(example = "2025-01-15T03:30:00Z")]
    pub created_at_utc: DateTime<Utc>,

    /// The measured values.
    pub snapshot: VitalsSnapshot,
}

impl SnapshotReport {
    /// Stamp a snapshot with a fresh time-ordered id and the current time.
    #[must_use]
    pub fn new(snapshot: VitalsSnapshot) -> Self {
        Self {
            id: Uuid::now_v7(),
            created_at_utc: Utc::now(),
            snapshot,
        }
    }
}

/// Health check response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct HealthResponse {
    /// Service status.
    #[schema(example = "ok")]
    pub status: String,

    /// Service version.
    #[schema(example = "0.1.0")]
    pub version: String,
}
