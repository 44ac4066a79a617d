//! # vitalwatch-server
//!
//! Gateway between a Vital Watch wrist sensor and browser dashboards.
//!
//! This binary provides:
//! - The Bluetooth link to the watch (or a simulated watch)
//! - A WebSocket push channel for live vitals and snapshot results
//! - REST API for link status, snapshot requests and report history
//! - OpenAPI documentation via Swagger UI
//! - Structured logging to file and stdout
//!
//! ## Running
//!
//! ```bash
//! # Development, no hardware
//! cargo run --package vitalwatch-server --no-default-features --features mock-bluetooth
//!
//! # Production
//! VITALWATCH_CONFIG=/etc/vitalwatch/config.toml ./vitalwatch-server
//! ```

#![forbid(unsafe_code)]
#![warn(clippy::all, clippy::pedantic, clippy::nursery)]

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use axum::http::{HeaderValue, Method};
use tokio::net::TcpListener;
use tokio::sync::mpsc;
use tower::ServiceBuilder;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use vitalwatch_core::config::default_config_path;
use vitalwatch_core::{
    BroadcastPush, Config, DeviceActor, DeviceHandle, ServerConfig, SnapshotStore,
};
use vitalwatch_server::state::AppState;
use vitalwatch_server::{api, logging};

/// Environment variable naming the configuration file.
const CONFIG_PATH_ENV: &str = "VITALWATCH_CONFIG";

/// Undelivered push events kept per WebSocket client.
const PUSH_CAPACITY: usize = 256;

/// Transport events buffered in front of the device loop.
const EVENT_QUEUE_DEPTH: usize = 256;

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config_path = std::env::var_os(CONFIG_PATH_ENV)
        .map_or_else(default_config_path, PathBuf::from);
    let config = Config::load_or_default(&config_path)
        .with_context(|| format!("loading {}", config_path.display()))?;

    logging::init(&config.logging)?;

    info!(
        version = env!("CARGO_PKG_VERSION"),
        config = %config_path.display(),
        "Starting vitalwatch-server"
    );

    let push = BroadcastPush::new(PUSH_CAPACITY);
    let (device, store, device_task) = start_device(&config, &push).await?;

    let state = AppState::shared(device, store, push, config.clone());
    let app = api::create_router(state).layer(
        ServiceBuilder::new()
            .layer(TraceLayer::new_for_http())
            .layer(cors_layer(&config.server)),
    );

    let addr: SocketAddr = format!("{}:{}", config.server.bind_address, config.server.port)
        .parse()
        .context("invalid bind address")?;
    let listener = TcpListener::bind(addr).await?;

    info!("Listening on {}", addr);

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    device_task.abort();
    info!("vitalwatch-server stopped");

    Ok(())
}

/// Connect to BlueZ and start the device loop.
#[cfg(all(feature = "bluetooth", not(feature = "mock-bluetooth")))]
async fn start_device(
    config: &Config,
    push: &BroadcastPush,
) -> anyhow::Result<(DeviceHandle, Arc<dyn SnapshotStore>, tokio::task::JoinHandle<()>)> {
    use vitalwatch_core::{BluezTransport, JsonReportStore};

    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let transport = BluezTransport::new(events_tx)
        .await
        .map_err(vitalwatch_core::VitalWatchError::from)?;
    let store: Arc<dyn SnapshotStore> = Arc::new(JsonReportStore::new(&config.storage.data_dir));
    info!(data_dir = %config.storage.data_dir.display(), "Storing snapshot reports");

    let (actor, device) = DeviceActor::new(
        Arc::new(transport),
        events_rx,
        config.device.clone(),
        Arc::new(push.clone()),
        Arc::clone(&store),
    );
    Ok((device, store, actor.spawn()))
}

/// Start the device loop against a simulated watch.
#[cfg(any(feature = "mock-bluetooth", not(feature = "bluetooth")))]
#[allow(clippy::unused_async)]
async fn start_device(
    config: &Config,
    push: &BroadcastPush,
) -> anyhow::Result<(DeviceHandle, Arc<dyn SnapshotStore>, tokio::task::JoinHandle<()>)> {
    use vitalwatch_core::{MemoryReportStore, MockTransport};

    warn!("Bluetooth disabled, using a simulated Vital Watch");
    let (events_tx, events_rx) = mpsc::channel(EVENT_QUEUE_DEPTH);
    let transport = MockTransport::simulated(events_tx, "VitalWatch-SIM");
    let store: Arc<dyn SnapshotStore> = Arc::new(MemoryReportStore::new());

    let (actor, device) = DeviceActor::new(
        Arc::new(transport),
        events_rx,
        config.device.clone(),
        Arc::new(push.clone()),
        Arc::clone(&store),
    );
    Ok((device, store, actor.spawn()))
}

/// CORS for the configured dashboard origins.
fn cors_layer(server: &ServerConfig) -> CorsLayer {
    let origins: Vec<HeaderValue> = server
        .cors_origins
        .iter()
        .filter_map(|origin| match origin.parse() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(%origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();

    CorsLayer::new()
        .allow_origin(origins)
        .allow_methods([Method::GET, Method::POST])
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        warn!(error = %e, "Failed to listen for Ctrl-C");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
