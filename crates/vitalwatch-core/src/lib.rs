//! # vitalwatch-core
//!
//! Core protocol layer for the vitalwatch gateway, which bridges a Vital Watch
//! wrist sensor to browser dashboards.
//!
//! This crate provides:
//! - A Bluetooth Low Energy link to a single watch, with automatic rescans
//! - The watch's 16-byte command frames and notification decoding
//! - Fan-out of live vitals and measurement results to remote viewers
//! - Persistent storage for completed snapshot reports
//! - Configuration management
//!
//! ## Architecture
//!
//! The crate is organized into the following modules:
//!
//! - [`codec`] - Command frame encoding, checksum and notification decoding
//! - [`transport`] - The BLE central abstraction, with `BlueZ` and mock backends
//! - [`session`] - Connection lifecycle and the `Ready` gate for writes
//! - [`driver`] - Command sequences and frame routing
//! - [`publisher`] - Link status and push fan-out
//! - [`device`] - The task that owns the link, and its handle
//! - [`storage`] - Snapshot report persistence in JSON files
//! - [`config`] - Application configuration loading, saving, and validation
//! - [`error`] - Unified error types for the crate
//! - [`types`] - Shared types and OpenAPI schemas

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]
#![warn(missing_docs)]

pub mod codec;
pub mod config;
pub mod device;
pub mod driver;
pub mod error;
pub mod publisher;
pub mod session;
pub mod storage;
pub mod transport;
pub mod types;

// Re-export primary types for convenience
pub use codec::{decode_notification, encode_command, CommandFrame, DecodedFrame, FrameError};
pub use config::{
    is_valid_origin, Config, ConfigError, ConfigResult, DeviceConfig, LoggingConfig,
    ServerConfig, StorageConfig,
};
pub use device::{DeviceActor, DeviceCommand, DeviceHandle};
pub use driver::{FrameDisposition, ProtocolDriver};
pub use error::{Result, VitalWatchError};
pub use publisher::{BroadcastPush, LinkStatePublisher, PushEvent, PushSink};
pub use session::{LinkError, LinkSession};
pub use storage::{
    default_data_dir, JsonReportStore, MemoryReportStore, SnapshotStore, StoreError,
};
#[cfg(feature = "bluetooth")]
pub use transport::BluezTransport;
#[cfg(any(test, feature = "mock-bluetooth", not(feature = "bluetooth")))]
pub use transport::MockTransport;
pub use transport::{Transport, TransportError, TransportEvent};
pub use types::{
    HealthResponse, LinkState, LinkStatus, LiveVitals, SnapshotReport, VitalsSnapshot,
};
