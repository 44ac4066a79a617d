//! Device command endpoints.
//!
//! These mirror the inbound push-channel events for clients that prefer
//! plain HTTP. Results still arrive on the push channel.

use axum::extract::State;
use axum::http::StatusCode;
use axum::routing::post;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::ToSchema;
use vitalwatch_core::{LinkState, VitalWatchError};

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the device command router.
pub fn router() -> Router<SharedState> {
    Router::new()
        .route("/snapshot", post(request_snapshot))
        .route("/scan", post(rescan))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Snapshot request acknowledgement.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "accepted": true,
    "topic": "vitals-snapshot-result"
}))]
pub struct SnapshotRequestResponse {
    /// The command was written to the watch.
    pub accepted: bool,
    /// Push topic the result will be delivered on.
    #[schema(example = "vitals-snapshot-result")]
    pub topic: String,
}

/// Rescan response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
#[schema(example = json!({
    "started": false,
    "state": "ready"
}))]
pub struct RescanResponse {
    /// Whether a new scan was started.
    pub started: bool,
    /// Link state after the request.
    pub state: LinkState,
}

// ============================================================================
// Handlers
// ============================================================================

/// Request a comprehensive measurement.
#[utoipa::path(
    post,
    path = "/api/snapshot",
    tag = "device",
    operation_id = "requestSnapshot",
    summary = "Request a vitals snapshot",
    description = "Asks the watch to take a comprehensive measurement (HRV, vascular aging, \
        heart rate, stress, blood pressure, mood, respiration). The result is published on \
        the `vitals-snapshot-result` push topic and stored. There is no server-side timeout; \
        the watch may never answer.",
    responses(
        (status = 202, description = "Command written to the watch", body = SnapshotRequestResponse),
        (status = 409, description = "Watch not connected", body = crate::api::error::ErrorResponse),
        (status = 503, description = "Bluetooth write failed", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn request_snapshot(
    State(state): State<SharedState>,
) -> ApiResult<(StatusCode, Json<SnapshotRequestResponse>)> {
    match state.device.request_snapshot().await {
        Ok(()) => Ok((
            StatusCode::ACCEPTED,
            Json(SnapshotRequestResponse {
                accepted: true,
                topic: vitalwatch_core::publisher::TOPIC_SNAPSHOT_RESULT.to_string(),
            }),
        )),
        Err(err @ VitalWatchError::DeviceNotReady) => Err(ApiError::Conflict {
            error_code: err.error_code().to_ascii_lowercase(),
            message: err.to_string(),
            state: Some(state.device.status().state.to_string()),
        }),
        Err(err) => Err(err.into()),
    }
}

/// Restart scanning after an abandoned connection attempt.
#[utoipa::path(
    post,
    path = "/api/scan",
    tag = "device",
    operation_id = "rescan",
    summary = "Rescan for the watch",
    description = "A watch that connected without exposing both characteristics is not \
        retried automatically. This starts a new scan when the link is `disconnected`; in any \
        other state it does nothing and reports `started: false`.",
    responses(
        (status = 200, description = "Rescan handled", body = RescanResponse),
        (status = 500, description = "Device loop not running", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn rescan(State(state): State<SharedState>) -> ApiResult<Json<RescanResponse>> {
    let started = state.device.rescan().await?;
    Ok(Json(RescanResponse {
        started,
        state: state.device.status().state,
    }))
}
