//! Unified error types for the vitalwatch core library.
//!
//! This module provides a unified error type [`VitalWatchError`] that covers
//! all failure modes across the gateway. Each module also has its own specific
//! error type (`FrameError`, `TransportError`, `LinkError`, `StoreError`,
//! `ConfigError`) for internal use.
//!
//! # Propagation
//!
//! - Transport and frame errors stay inside the core. They are logged and
//!   surface only as the `device_connected` status flag.
//! - `DeviceNotReady` goes back to whoever issued the command.
//! - Persistence errors are logged and never affect live forwarding.
//!
//! # Example
//!
//! ```rust
//! use vitalwatch_core::error::{Result, VitalWatchError};
//!
//! fn ensure_ready(connected: bool) -> Result<()> {
//!     if !connected {
//!         return Err(VitalWatchError::DeviceNotReady);
//!     }
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// The unified error type for all vitalwatch operations.
#[derive(Debug, Error)]
pub enum VitalWatchError {
    // =========================================================================
    // BLUETOOTH ERRORS
    // =========================================================================
    /// No Bluetooth adapter was found on this system.
    #[error(
        "No Bluetooth adapter found. Ensure Bluetooth hardware is present and drivers are loaded."
    )]
    BluetoothAdapterNotFound,

    /// The Bluetooth adapter exists but is powered off.
    #[error("Bluetooth adapter is powered off. Run 'bluetoothctl power on' to enable.")]
    BluetoothAdapterPoweredOff,

    /// A scan, connect, discovery, subscribe or write operation failed.
    #[error("Bluetooth transport failure: {0}")]
    TransportFailed(String),

    /// A command was issued while the watch is not connected and ready.
    #[error("Vital Watch is not connected. Wait for the device to reconnect and try again.")]
    DeviceNotReady,

    /// The device actor has shut down.
    #[error("Device link task is not running")]
    DeviceActorStopped,

    // =========================================================================
    // PROTOCOL ERRORS
    // =========================================================================
    /// A command payload exceeded the frame capacity.
    #[error("Command payload of {len} bytes exceeds the {max}-byte limit")]
    PayloadTooLarge {
        /// Payload length supplied.
        len: usize,
        /// Maximum payload length.
        max: usize,
    },

    /// A notification frame could not be parsed.
    #[error("Malformed notification frame: {0}")]
    MalformedFrame(String),

    // =========================================================================
    // CONFIGURATION ERRORS
    // =========================================================================
    /// The configuration could not be parsed.
    #[error("Failed to parse configuration: {0}")]
    ConfigParseError(String),

    /// The configuration was parsed but contains invalid values.
    #[error("Configuration validation failed: {0}")]
    ConfigValidationError(String),

    // =========================================================================
    // PERSISTENCE ERRORS
    // =========================================================================
    /// An error occurred while persisting or reading snapshot reports.
    #[error("Persistence error: {0}")]
    PersistenceError(String),
}

/// A specialized [`Result`] type for vitalwatch operations.
pub type Result<T> = std::result::Result<T, VitalWatchError>;

impl VitalWatchError {
    /// Returns `true` if this error comes from the Bluetooth link.
    #[inline]
    #[must_use]
    pub const fn is_transport_error(&self) -> bool {
        matches!(
            self,
            Self::BluetoothAdapterNotFound
                | Self::BluetoothAdapterPoweredOff
                | Self::TransportFailed(_)
                | Self::DeviceNotReady
        )
    }

    /// Returns `true` if this error comes from frame encoding or decoding.
    #[inline]
    #[must_use]
    pub const fn is_frame_error(&self) -> bool {
        matches!(self, Self::PayloadTooLarge { .. } | Self::MalformedFrame(_))
    }

    /// Returns `true` if this error is related to configuration.
    #[inline]
    #[must_use]
    pub const fn is_config_error(&self) -> bool {
        matches!(
            self,
            Self::ConfigParseError(_) | Self::ConfigValidationError(_)
        )
    }

    /// Returns `true` if this error is related to report persistence.
    #[inline]
    #[must_use]
    pub const fn is_io_error(&self) -> bool {
        matches!(self, Self::PersistenceError(_))
    }

    /// Returns `true` if the condition clears without user intervention
    /// (the session keeps rescanning on its own).
    #[inline]
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::DeviceNotReady | Self::TransportFailed(_))
    }

    /// Returns an HTTP-appropriate status code for this error.
    #[inline]
    #[must_use]
    pub const fn http_status_code(&self) -> u16 {
        match self {
            // 400 Bad Request - malformed input
            Self::PayloadTooLarge { .. } => 400,

            // 409 Conflict - valid request, wrong link state
            Self::DeviceNotReady => 409,

            // 422 Unprocessable Entity - semantic errors
            Self::ConfigParseError(_) | Self::ConfigValidationError(_) => 422,

            // 500 Internal Server Error - server-side issues
            Self::MalformedFrame(_) | Self::PersistenceError(_) | Self::DeviceActorStopped => 500,

            // 503 Service Unavailable - Bluetooth hardware issues
            Self::BluetoothAdapterNotFound
            | Self::BluetoothAdapterPoweredOff
            | Self::TransportFailed(_) => 503,
        }
    }

    /// Returns a machine-readable error code for API responses.
    #[inline]
    #[must_use]
    pub const fn error_code(&self) -> &'static str {
        match self {
            Self::BluetoothAdapterNotFound => "BLUETOOTH_ADAPTER_NOT_FOUND",
            Self::BluetoothAdapterPoweredOff => "BLUETOOTH_ADAPTER_POWERED_OFF",
            Self::TransportFailed(_) => "TRANSPORT_FAILED",
            Self::DeviceNotReady => "DEVICE_NOT_READY",
            Self::DeviceActorStopped => "DEVICE_ACTOR_STOPPED",
            Self::PayloadTooLarge { .. } => "PAYLOAD_TOO_LARGE",
            Self::MalformedFrame(_) => "MALFORMED_FRAME",
            Self::ConfigParseError(_) => "CONFIG_PARSE_ERROR",
            Self::ConfigValidationError(_) => "CONFIG_VALIDATION_ERROR",
            Self::PersistenceError(_) => "PERSISTENCE_ERROR",
        }
    }
}

// =============================================================================
// CONVERSIONS FROM MODULE-SPECIFIC ERRORS
// =============================================================================

impl From<crate::config::ConfigError> for VitalWatchError {
    fn from(err: crate::config::ConfigError) -> Self {
        use crate::config::ConfigError;
        match err {
            ConfigError::WriteError { path, source } => {
                Self::PersistenceError(format!("Failed to write {path}: {source}"))
            }
            ConfigError::ParseError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::SerializeError(e) => Self::ConfigParseError(e.to_string()),
            ConfigError::ValidationError { field, message } => {
                Self::ConfigValidationError(format!("{field}: {message}"))
            }
            ConfigError::MultipleValidationErrors(errors) => {
                let messages: Vec<String> = errors.into_iter().map(|e| e.to_string()).collect();
                Self::ConfigValidationError(messages.join("; "))
            }
        }
    }
}

impl From<crate::storage::StoreError> for VitalWatchError {
    fn from(err: crate::storage::StoreError) -> Self {
        Self::PersistenceError(err.to_string())
    }
}

impl From<crate::codec::FrameError> for VitalWatchError {
    fn from(err: crate::codec::FrameError) -> Self {
        use crate::codec::FrameError;
        match err {
            FrameError::PayloadTooLarge { len, max } => Self::PayloadTooLarge { len, max },
            e @ FrameError::FrameTooShort { .. } => Self::MalformedFrame(e.to_string()),
        }
    }
}

impl From<crate::transport::TransportError> for VitalWatchError {
    fn from(err: crate::transport::TransportError) -> Self {
        use crate::transport::TransportError;
        match err {
            TransportError::AdapterNotFound => Self::BluetoothAdapterNotFound,
            TransportError::AdapterPoweredOff => Self::BluetoothAdapterPoweredOff,
            other => Self::TransportFailed(other.to_string()),
        }
    }
}

impl From<crate::session::LinkError> for VitalWatchError {
    fn from(err: crate::session::LinkError) -> Self {
        use crate::session::LinkError;
        match err {
            LinkError::NotReady { .. } => Self::DeviceNotReady,
            LinkError::Frame(e) => e.into(),
            LinkError::Transport(e) => e.into(),
        }
    }
}

// =============================================================================
// TESTS
// =============================================================================
