//! Application configuration management.
//!
//! Settings are layered: built-in defaults, then an optional TOML file, then
//! environment variables prefixed with `VITALWATCH__` (sections separated by
//! a double underscore, e.g. `VITALWATCH__SERVER__PORT=8080`).
//!
//! Covers:
//! - The sensor's GATT contract (service and characteristic UUIDs)
//! - Reconnect timing
//! - HTTP listener and CORS origins
//! - Snapshot report storage location
//! - Logging mode

use std::path::{Path, PathBuf};

use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::transport::uuid_from_u16;

/// Prefix for environment overrides.
pub const ENV_PREFIX: &str = "VITALWATCH";

static ORIGIN_RE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://[A-Za-z0-9.-]+(:\d{1,5})?$").expect("origin pattern is valid")
});

/// Configuration errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Writing the configuration file failed.
    #[error("Failed to write {path}: {source}")]
    WriteError {
        /// File path.
        path: String,
        /// Underlying error.
        source: std::io::Error,
    },

    /// The layered sources could not be merged or deserialized.
    #[error("Failed to parse configuration: {0}")]
    ParseError(#[from] config::ConfigError),

    /// The configuration could not be serialized to TOML.
    #[error("Failed to serialize configuration: {0}")]
    SerializeError(#[from] toml::ser::Error),

    /// A single field holds an invalid value.
    #[error("Invalid {field}: {message}")]
    ValidationError {
        /// Dotted field path.
        field: String,
        /// What is wrong with it.
        message: String,
    },

    /// Several fields are invalid.
    #[error("{} configuration errors", .0.len())]
    MultipleValidationErrors(Vec<ConfigError>),
}

/// Result type for configuration operations.
pub type ConfigResult<T> = std::result::Result<T, ConfigError>;

/// Root configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Sensor GATT contract and link behaviour.
    pub device: DeviceConfig,
    /// HTTP gateway.
    pub server: ServerConfig,
    /// Snapshot report storage.
    pub storage: StorageConfig,
    /// Logging.
    pub logging: LoggingConfig,
}

/// The sensor's service/characteristic contract and link timing.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Advertised service the scan is filtered on.
    pub service_uuid: Uuid,
    /// Characteristic commands are written to.
    pub write_characteristic_uuid: Uuid,
    /// Characteristic the device notifies reports on.
    pub notify_characteristic_uuid: Uuid,
    /// Fixed delay before rescanning after the link drops.
    pub reconnect_delay_secs: u64,
    /// Depth of the command queue in front of the device actor.
    pub command_queue_depth: usize,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            service_uuid: uuid_from_u16(0xfff0),
            write_characteristic_uuid: uuid_from_u16(0xfff6),
            notify_characteristic_uuid: uuid_from_u16(0xfff7),
            reconnect_delay_secs: 5,
            command_queue_depth: 32,
        }
    }
}

impl DeviceConfig {
    /// Reconnect delay as a [`std::time::Duration`].
    #[must_use]
    pub const fn reconnect_delay(&self) -> std::time::Duration {
        std::time::Duration::from_secs(self.reconnect_delay_secs)
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Interface to bind.
    pub bind_address: String,
    /// TCP port.
    pub port: u16,
    /// Browser origins allowed by CORS.
    pub cors_origins: Vec<String>,
    /// Number of reports returned by the history endpoint.
    pub report_history_limit: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0".to_string(),
            port: 5000,
            cors_origins: vec!["http://localhost:5173".to_string()],
            report_history_limit: 20,
        }
    }
}

/// Snapshot report storage settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Directory that holds the `reports/` tree.
    pub data_dir: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            data_dir: crate::storage::default_data_dir(),
        }
    }
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// JSON file logs plus compact stdout instead of pretty stdout.
    pub production: bool,
    /// Override for the log directory.
    pub directory: Option<PathBuf>,
    /// Daily log files kept before the oldest is deleted.
    pub retained_files: usize,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            production: false,
            directory: None,
            retained_files: 14,
        }
    }
}

impl Config {
    /// Load configuration from `path` (if it exists) merged over defaults and
    /// under environment overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if a source cannot be parsed or the merged result
    /// fails validation.
    pub fn load_or_default(path: impl AsRef<Path>) -> ConfigResult<Self> {
        let path = path.as_ref();
        let settings = config::Config::builder()
            .add_source(config::Config::try_from(&Self::default())?)
            .add_source(config::File::from(path).required(false))
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("__")
                    .separator("__")
                    .try_parsing(true)
                    .list_separator(",")
                    .with_list_parse_key("server.cors_origins"),
            )
            .build()?;

        let config: Self = settings.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    /// Write the configuration as TOML, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns an error if serialization or the write fails.
    pub fn save(&self, path: impl AsRef<Path>) -> ConfigResult<()> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| ConfigError::WriteError {
                path: parent.display().to_string(),
                source,
            })?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::WriteError {
            path: path.display().to_string(),
            source,
        })
    }

    /// Check every field, reporting all problems at once.
    ///
    /// # Errors
    ///
    /// Returns the single error, or [`ConfigError::MultipleValidationErrors`].
    pub fn validate(&self) -> ConfigResult<()> {
        let mut errors = Vec::new();
        let invalid = |field: &str, message: &str| ConfigError::ValidationError {
            field: field.to_string(),
            message: message.to_string(),
        };

        if self.device.write_characteristic_uuid == self.device.notify_characteristic_uuid {
            errors.push(invalid(
                "device.notify_characteristic_uuid",
                "must differ from the write characteristic",
            ));
        }
        if self.device.reconnect_delay_secs == 0 {
            errors.push(invalid("device.reconnect_delay_secs", "must be at least 1"));
        }
        if self.device.command_queue_depth == 0 {
            errors.push(invalid("device.command_queue_depth", "must be at least 1"));
        }
        if self.logging.retained_files == 0 {
            errors.push(invalid("logging.retained_files", "must be at least 1"));
        }
        if self.server.report_history_limit == 0 {
            errors.push(invalid("server.report_history_limit", "must be at least 1"));
        }
        for origin in &self.server.cors_origins {
            if !is_valid_origin(origin) {
                errors.push(invalid(
                    "server.cors_origins",
                    &format!("'{origin}' is not a scheme://host[:port] origin"),
                ));
            }
        }

        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(ConfigError::MultipleValidationErrors(errors)),
        }
    }
}

/// Returns `true` for a browser origin such as `http://localhost:5173`.
#[must_use]
pub fn is_valid_origin(origin: &str) -> bool {
    ORIGIN_RE.is_match(origin)
}

/// Default configuration file location.
///
/// On Linux: `/etc/vitalwatch/config.toml`; elsewhere the platform config dir.
#[must_use]
pub fn default_config_path() -> PathBuf {
    #[cfg(target_os = "linux")]
    {
        PathBuf::from("/etc/vitalwatch/config.toml")
    }
    #[cfg(not(target_os = "linux"))]
    {
        directories::ProjectDirs::from("", "", "vitalwatch").map_or_else(
            || PathBuf::from("./config.toml"),
            |dirs| dirs.config_dir().join("config.toml"),
        )
    }
}
