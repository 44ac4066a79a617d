//! Link status and vitals fan-out.
//!
//! The session owns the `watch::Sender<LinkStatus>`; the publisher only holds
//! the receiving side, so status reads never contend with transitions.
//! Readings go out through a [`PushSink`]. The default sink is a
//! `tokio::sync::broadcast` channel: sending never waits on subscribers, a
//! lagging subscriber loses messages, and nobody gets a replay on subscribe.

use std::sync::Arc;

use serde_json::{json, Value};
use tokio::sync::{broadcast, watch};
use tracing::trace;

use crate::types::{LinkStatus, LiveVitals, VitalsSnapshot};

/// Topic carrying live readings and the offline marker.
pub const TOPIC_LIVE_VITALS: &str = "live-vitals";

/// Topic carrying completed snapshots.
pub const TOPIC_SNAPSHOT_RESULT: &str = "vitals-snapshot-result";

/// A message for remote viewers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PushEvent {
    /// Real-time reading.
    Live(LiveVitals),
    /// The watch went away.
    Offline,
    /// A completed on-demand measurement.
    Snapshot(VitalsSnapshot),
}

impl PushEvent {
    /// Channel topic of this event.
    #[must_use]
    pub const fn topic(&self) -> &'static str {
        match self {
            Self::Live(_) | Self::Offline => TOPIC_LIVE_VITALS,
            Self::Snapshot(_) => TOPIC_SNAPSHOT_RESULT,
        }
    }

    /// JSON payload of this event.
    #[must_use]
    pub fn payload(&self) -> Value {
        match self {
            Self::Live(vitals) => json!(vitals),
            Self::Offline => json!({ "connected": false }),
            Self::Snapshot(snapshot) => json!(snapshot),
        }
    }

    /// Topic and payload as one envelope, the form sent over the WebSocket.
    #[must_use]
    pub fn to_message(&self) -> Value {
        json!({ "topic": self.topic(), "payload": self.payload() })
    }
}

/// One-way delivery to remote viewers. Must not block.
pub trait PushSink: Send + Sync + 'static {
    /// Hand an event to the channel.
    fn emit(&self, event: PushEvent);
}

/// [`PushSink`] over a broadcast channel.
#[derive(Debug, Clone)]
pub struct BroadcastPush {
    tx: broadcast::Sender<PushEvent>,
}

impl BroadcastPush {
    /// Create a channel keeping at most `capacity` undelivered events per
    /// subscriber.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity);
        Self { tx }
    }

    /// Subscribe to events emitted from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<PushEvent> {
        self.tx.subscribe()
    }
}

impl PushSink for BroadcastPush {
    fn emit(&self, event: PushEvent) {
        if self.tx.send(event).is_err() {
            trace!(topic = event.topic(), "No push subscribers");
        }
    }
}

/// Read side of the link status plus the outbound fan-out.
#[derive(Clone)]
pub struct LinkStatePublisher {
    status: watch::Receiver<LinkStatus>,
    push: Arc<dyn PushSink>,
}

impl LinkStatePublisher {
    /// Wire a publisher to the session's status channel and a push sink.
    pub fn new(status: watch::Receiver<LinkStatus>, push: Arc<dyn PushSink>) -> Self {
        Self { status, push }
    }

    /// Current radio/device status.
    #[must_use]
    pub fn current_status(&self) -> LinkStatus {
        self.status.borrow().clone()
    }

    /// A receiver that observes every status change.
    #[must_use]
    pub fn watch_status(&self) -> watch::Receiver<LinkStatus> {
        self.status.clone()
    }

    /// Forward a live reading.
    pub fn publish_live(&self, vitals: LiveVitals) {
        self.push.emit(PushEvent::Live(vitals));
    }

    /// Tell viewers the watch went offline.
    pub fn publish_offline(&self) {
        self.push.emit(PushEvent::Offline);
    }

    /// Forward a completed snapshot.
    pub fn publish_snapshot(&self, snapshot: VitalsSnapshot) {
        self.push.emit(PushEvent::Snapshot(snapshot));
    }
}
