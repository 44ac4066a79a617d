//! HTTP API routes and handlers.
//!
//! This module contains all HTTP endpoint implementations organized by domain:
//! - `health` - Service health checks
//! - `status` - Watch link status
//! - `device` - Snapshot requests and manual rescans
//! - `reports` - Stored snapshot reports
//! - `push` - WebSocket push channel
//! - `error` - API error types
//! - `openapi` - OpenAPI specification generation

use axum::Router;
use utoipa::OpenApi;
use utoipa_swagger_ui::SwaggerUi;

use crate::state::SharedState;

pub mod device;
pub mod error;
pub mod health;
pub mod openapi;
pub mod push;
pub mod reports;
pub mod status;

pub use error::{ApiError, ApiResult, ErrorResponse};
pub use openapi::{get_openapi_json, ApiDoc};

/// Creates the combined API router with all endpoints.
///
/// # Route Structure
///
/// ```text
/// /health                - Health check
/// /ws                    - WebSocket push channel
/// /api
/// ├── /status            - Link status
/// ├── /reports           - Snapshot report history
/// ├── /snapshot          - Request a snapshot (POST)
/// ├── /scan              - Manual rescan (POST)
/// ├── /docs              - Swagger UI
/// └── /openapi.json      - OpenAPI specification
/// ```
pub fn create_router(state: SharedState) -> Router {
    Router::new()
        .nest("/health", health::router())
        .nest("/ws", push::router())
        .nest(
            "/api",
            Router::new()
                .nest("/status", status::router())
                .nest("/reports", reports::router())
                .merge(device::router()),
        )
        .merge(SwaggerUi::new("/api/docs").url("/api/openapi.json", ApiDoc::openapi()))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::http::StatusCode;
    use axum_test::TestServer;
    use tokio::sync::mpsc;
    use vitalwatch_core::types::PeerId;
    use vitalwatch_core::{
        BroadcastPush, Config, DeviceActor, LinkState, LinkStatus, MemoryReportStore,
        MockTransport, SnapshotStore, TransportEvent, VitalsSnapshot,
    };

    use super::*;
    use crate::state::AppState;

    const WATCH: &str = "C4:7C:8D:6A:11:02";

    struct Gateway {
        server: TestServer,
        state: SharedState,
        events: mpsc::Sender<TransportEvent>,
        transport: Arc<MockTransport>,
        store: Arc<MemoryReportStore>,
    }

    fn gateway() -> Gateway {
        let config = Config::default();
        let (events_tx, events_rx) = mpsc::channel(16);
        let transport = Arc::new(MockTransport::new(events_tx.clone()));
        let push = BroadcastPush::new(16);
        let store = Arc::new(MemoryReportStore::new());
        let (actor, device) = DeviceActor::new(
            Arc::clone(&transport),
            events_rx,
            config.device.clone(),
            Arc::new(push.clone()),
            store.clone(),
        );
        actor.spawn();

        let state = AppState::shared(device, store.clone(), push, config);
        let server = TestServer::new(create_router(Arc::clone(&state))).unwrap();
        Gateway {
            server,
            state,
            events: events_tx,
            transport,
            store,
        }
    }

    async fn connect_watch(g: &Gateway) {
        g.events
            .send(TransportEvent::RadioStateChanged { powered: true })
            .await
            .unwrap();
        g.events
            .send(TransportEvent::PeerDiscovered {
                peer: PeerId::new(WATCH),
                services: vec![g.state.config.device.service_uuid],
                name: Some("VitalWatch-7F2A".into()),
            })
            .await
            .unwrap();
        g.state
            .device
            .watch_status()
            .wait_for(|s| s.state == LinkState::Ready)
            .await
            .unwrap();
    }

    fn snapshot(heart_rate: u8) -> VitalsSnapshot {
        VitalsSnapshot {
            hrv: 45,
            vascular_aging: 35,
            heart_rate,
            stress: 20,
            bp_systolic: 120,
            bp_diastolic: 80,
            mood: 50,
            respiration_rate: 16,
        }
    }

    #[tokio::test]
    async fn test_health() {
        let g = gateway();
        let response = g.server.get("/health").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_status_before_and_after_connect() {
        let g = gateway();

        let status: LinkStatus = g.server.get("/api/status").await.json();
        assert_eq!(status.state, LinkState::PoweredOff);
        assert!(!status.device_connected);

        connect_watch(&g).await;

        let body: serde_json::Value = g.server.get("/api/status").await.json();
        assert_eq!(body["deviceConnected"], true);
        assert_eq!(body["radioOn"], true);
        assert_eq!(body["deviceName"], "VitalWatch-7F2A");
    }

    #[tokio::test]
    async fn test_snapshot_request_conflicts_when_disconnected() {
        let g = gateway();

        let response = g.server.post("/api/snapshot").await;

        response.assert_status(StatusCode::CONFLICT);
        let body: ErrorResponse = response.json();
        assert_eq!(body.error, "device_not_ready");
        assert_eq!(body.details.unwrap()["state"], "powered_off");
        assert!(g.transport.writes().is_empty());
    }

    #[tokio::test]
    async fn test_snapshot_request_when_ready() {
        let g = gateway();
        connect_watch(&g).await;

        let response = g.server.post("/api/snapshot").await;

        response.assert_status(StatusCode::ACCEPTED);
        let last = g.transport.writes().pop().unwrap();
        assert_eq!(&last[..3], &[0x99, 0x00, 0x00]);
    }

    #[tokio::test]
    async fn test_rescan_is_noop_while_ready() {
        let g = gateway();
        connect_watch(&g).await;

        let body: device::RescanResponse = g.server.post("/api/scan").await.json();

        assert!(!body.started);
        assert_eq!(body.state, LinkState::Ready);
    }

    #[tokio::test]
    async fn test_reports_newest_first_with_limit() {
        let g = gateway();
        for heart_rate in [60, 61, 62] {
            g.store.save(&snapshot(heart_rate)).unwrap();
        }

        let body: reports::ReportsResponse = g.server.get("/api/reports").await.json();
        assert_eq!(body.count, 3);
        assert_eq!(body.reports[0].snapshot.heart_rate, 62);

        let body: reports::ReportsResponse = g
            .server
            .get("/api/reports")
            .add_query_param("limit", 1)
            .await
            .json();
        assert_eq!(body.count, 1);

        g.server
            .get("/api/reports")
            .add_query_param("limit", 0)
            .await
            .assert_status_bad_request();
    }

    #[tokio::test]
    async fn test_openapi_document_is_served() {
        let g = gateway();
        let response = g.server.get("/api/openapi.json").await;
        response.assert_status_ok();
        let body: serde_json::Value = response.json();
        assert_eq!(body["info"]["title"], "vitalwatch API");
    }
}
