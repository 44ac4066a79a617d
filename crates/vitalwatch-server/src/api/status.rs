//! Link status endpoint.

use axum::extract::State;
use axum::routing::get;
use axum::{Json, Router};
use vitalwatch_core::LinkStatus;

use crate::state::SharedState;

/// Creates the status router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_status))
}

/// Get the radio and watch connection status.
#[utoipa::path(
    get,
    path = "/api/status",
    tag = "device",
    operation_id = "getStatus",
    summary = "Get link status",
    description = "Returns whether the Bluetooth radio is on, whether the Vital Watch \
        is connected and ready, its advertised name, and the link state. Never waits \
        on the device.",
    responses(
        (status = 200, description = "Current link status", body = LinkStatus)
    )
)]
pub async fn get_status(State(state): State<SharedState>) -> Json<LinkStatus> {
    Json(state.device.status())
}
