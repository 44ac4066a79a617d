//! Application state shared across handlers.

use std::sync::Arc;

use vitalwatch_core::{BroadcastPush, Config, DeviceHandle, SnapshotStore};

/// State handed to every handler.
pub type SharedState = Arc<AppState>;

/// Handles to the running device loop and its collaborators.
///
/// Everything here is cheap to share: the device handle and the push channel
/// are clones of channel endpoints, and the store does its own locking.
pub struct AppState {
    /// Entry point to the device loop.
    pub device: DeviceHandle,
    /// Where completed snapshots are kept.
    pub store: Arc<dyn SnapshotStore>,
    /// Push channel the WebSocket clients subscribe to.
    pub push: BroadcastPush,
    /// Configuration the server was started with.
    pub config: Config,
}

impl AppState {
    /// Bundle the state into a [`SharedState`].
    pub fn shared(
        device: DeviceHandle,
        store: Arc<dyn SnapshotStore>,
        push: BroadcastPush,
        config: Config,
    ) -> SharedState {
        Arc::new(Self {
            device,
            store,
            push,
            config,
        })
    }
}
