//! WebSocket push channel.
//!
//! Every connected client receives each push event as a text message
//! `{"topic": "...", "payload": {...}}`. Clients send commands as
//! `{"event": "start-vitals-snapshot"}`, `{"event": "start-ecg-stream"}` or
//! `{"event": "stop-ecg-stream"}`. A client that falls behind loses messages
//! rather than slowing the device loop down.

use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use serde::Deserialize;
use tokio::sync::broadcast::error::RecvError;
use tracing::{debug, info, warn};
use vitalwatch_core::{DeviceHandle, Result as CoreResult, VitalWatchError};

use crate::state::SharedState;

/// Creates the push channel router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(push_channel))
}

/// Commands a client may send over the socket.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum ClientEvent {
    /// Request a comprehensive measurement.
    StartVitalsSnapshot,
    /// Start the ECG stream.
    StartEcgStream,
    /// Stop the ECG stream.
    StopEcgStream,
}

impl ClientEvent {
    /// Forward the command to the device loop.
    ///
    /// # Errors
    ///
    /// Whatever the device handle reports, typically
    /// [`VitalWatchError::DeviceNotReady`].
    pub async fn dispatch(self, device: &DeviceHandle) -> CoreResult<()> {
        match self {
            Self::StartVitalsSnapshot => device.request_snapshot().await,
            Self::StartEcgStream => device.start_ecg().await,
            Self::StopEcgStream => device.stop_ecg().await,
        }
    }
}

/// Upgrade to the push channel.
pub async fn push_channel(ws: WebSocketUpgrade, State(state): State<SharedState>) -> Response {
    ws.on_upgrade(move |socket| serve_socket(socket, state))
}

async fn serve_socket(mut socket: WebSocket, state: SharedState) {
    let mut events = state.push.subscribe();
    info!("Push client connected");

    loop {
        tokio::select! {
            incoming = socket.recv() => {
                let Some(Ok(message)) = incoming else { break };
                match message {
                    Message::Text(text) => {
                        if let Some(reply) = handle_client_message(text.as_str(), &state.device).await {
                            if socket.send(Message::Text(reply.into())).await.is_err() {
                                break;
                            }
                        }
                    }
                    Message::Close(_) => break,
                    _ => {}
                }
            }
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        let text = event.to_message().to_string();
                        if socket.send(Message::Text(text.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "Push client lagging, messages dropped");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
        }
    }

    info!("Push client disconnected");
}

/// Run one client message. Returns an error message to send back, if any.
async fn handle_client_message(text: &str, device: &DeviceHandle) -> Option<String> {
    let event = match serde_json::from_str::<ClientEvent>(text) {
        Ok(event) => event,
        Err(e) => {
            debug!(error = %e, "Ignoring unknown client message");
            return None;
        }
    };

    debug!(?event, "Client event");
    match event.dispatch(device).await {
        Ok(()) => None,
        Err(e) => {
            warn!(?event, error = %e, "Client command failed");
            Some(error_message(&e))
        }
    }
}

fn error_message(err: &VitalWatchError) -> String {
    serde_json::json!({
        "topic": "error",
        "payload": {
            "error": err.error_code().to_ascii_lowercase(),
            "message": err.to_string(),
        }
    })
    .to_string()
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;
    use std::time::Duration;

    use axum_test::{TestServer, TestWebSocket};
    use serde_json::Value;
    use tokio::sync::mpsc;
    use vitalwatch_core::types::PeerId;
    use vitalwatch_core::{
        BroadcastPush, Config, DeviceActor, DeviceConfig, LinkState, LiveVitals,
        MemoryReportStore, MockTransport, PushEvent, PushSink, TransportEvent,
    };

    use super::*;
    use crate::state::AppState;

    const WATCH: &str = "C4:7C:8D:6A:11:02";

    struct Channel {
        server: TestServer,
        state: SharedState,
        events: mpsc::Sender<TransportEvent>,
        transport: Arc<MockTransport>,
    }

    fn channel(push_capacity: usize) -> Channel {
        let config = Config::default();
        let (events_tx, events_rx) = mpsc::channel(16);
        let transport = Arc::new(MockTransport::new(events_tx.clone()));
        let push = BroadcastPush::new(push_capacity);
        let store = Arc::new(MemoryReportStore::new());
        let (actor, device) = DeviceActor::new(
            Arc::clone(&transport),
            events_rx,
            config.device.clone(),
            Arc::new(push.clone()),
            store.clone(),
        );
        actor.spawn();

        let state = AppState::shared(device, store, push, config);
        let server = TestServer::builder()
            .http_transport()
            .build(crate::api::create_router(Arc::clone(&state)))
            .unwrap();
        Channel {
            server,
            state,
            events: events_tx,
            transport,
        }
    }

    /// Open `/ws` and wait until the socket is subscribed to push events.
    async fn open_socket(c: &Channel) -> TestWebSocket {
        let mut socket = c.server.get_websocket("/ws").await.into_websocket().await;
        socket.send_text(r#"{"event":"stop-ecg-stream"}"#).await;
        let reply: Value = socket.receive_json().await;
        assert_eq!(reply["payload"]["error"], "device_not_ready");
        socket
    }

    async fn connect_watch(c: &Channel) {
        c.events
            .send(TransportEvent::RadioStateChanged { powered: true })
            .await
            .unwrap();
        c.events
            .send(TransportEvent::PeerDiscovered {
                peer: PeerId::new(WATCH),
                services: vec![c.state.config.device.service_uuid],
                name: Some("VitalWatch-7F2A".into()),
            })
            .await
            .unwrap();
        c.state
            .device
            .watch_status()
            .wait_for(|s| s.state == LinkState::Ready)
            .await
            .unwrap();
    }

    fn live(heart_rate: u8) -> LiveVitals {
        LiveVitals {
            heart_rate,
            blood_oxygen: 98,
            bp_systolic: 118,
            bp_diastolic: 76,
            connected: true,
        }
    }

    fn idle_device() -> DeviceHandle {
        let (events_tx, events_rx) = mpsc::channel(8);
        let (actor, handle) = DeviceActor::new(
            Arc::new(MockTransport::new(events_tx)),
            events_rx,
            DeviceConfig::default(),
            Arc::new(BroadcastPush::new(8)),
            Arc::new(MemoryReportStore::new()),
        );
        actor.spawn();
        handle
    }

    #[test]
    fn test_client_event_parsing() {
        let event: ClientEvent =
            serde_json::from_str(r#"{"event":"start-vitals-snapshot"}"#).unwrap();
        assert_eq!(event, ClientEvent::StartVitalsSnapshot);

        let event: ClientEvent = serde_json::from_str(r#"{"event":"stop-ecg-stream"}"#).unwrap();
        assert_eq!(event, ClientEvent::StopEcgStream);

        assert!(serde_json::from_str::<ClientEvent>(r#"{"event":"reboot"}"#).is_err());
    }

    #[tokio::test]
    async fn test_command_while_disconnected_replies_with_error() {
        let device = idle_device();

        let reply = handle_client_message(r#"{"event":"start-ecg-stream"}"#, &device)
            .await
            .unwrap();

        let reply: serde_json::Value = serde_json::from_str(&reply).unwrap();
        assert_eq!(reply["topic"], "error");
        assert_eq!(reply["payload"]["error"], "device_not_ready");
    }

    #[tokio::test]
    async fn test_live_reading_reaches_socket() {
        let c = channel(16);
        let mut socket = open_socket(&c).await;
        connect_watch(&c).await;

        c.events
            .send(TransportEvent::Notification {
                peer: PeerId::new(WATCH),
                data: vec![0x28, 0x00, 72, 98, 0x00, 0x00, 118, 76],
            })
            .await
            .unwrap();

        let message: Value = socket.receive_json().await;
        assert_eq!(message["topic"], "live-vitals");
        assert_eq!(message["payload"]["heartRate"], 72);
        assert_eq!(message["payload"]["bloodOxygen"], 98);
        assert_eq!(message["payload"]["connected"], true);
    }

    #[tokio::test]
    async fn test_socket_command_writes_snapshot_request() {
        let c = channel(16);
        let mut socket = open_socket(&c).await;
        connect_watch(&c).await;

        socket.send_text(r#"{"event":"start-vitals-snapshot"}"#).await;

        let snapshot_written = || {
            c.transport
                .writes()
                .iter()
                .any(|bytes| bytes.starts_with(&[0x99, 0x00, 0x00]))
        };
        for _ in 0..100 {
            if snapshot_written() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(snapshot_written());
    }

    #[tokio::test]
    async fn test_lagging_socket_keeps_receiving() {
        let c = channel(2);
        let mut socket = open_socket(&c).await;

        // Nothing yields between these, so the socket falls behind.
        for heart_rate in 0..10 {
            c.state.push.emit(PushEvent::Live(live(heart_rate)));
        }

        let first: Value = socket.receive_json().await;
        let second: Value = socket.receive_json().await;
        assert_eq!(first["payload"]["heartRate"], 8);
        assert_eq!(second["payload"]["heartRate"], 9);

        c.state.push.emit(PushEvent::Offline);
        let offline: Value = socket.receive_json().await;
        assert_eq!(offline["topic"], "live-vitals");
        assert_eq!(offline["payload"]["connected"], false);
    }

    #[tokio::test]
    async fn test_unknown_message_is_ignored() {
        let device = idle_device();
        assert!(handle_client_message("not json", &device).await.is_none());
    }
}
