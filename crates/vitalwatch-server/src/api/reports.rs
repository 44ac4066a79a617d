//! Snapshot report history.

use std::sync::Arc;

use axum::extract::{Query, State};
use axum::routing::get;
use axum::{Json, Router};
use serde::{Deserialize, Serialize};
use utoipa::{IntoParams, ToSchema};
use vitalwatch_core::SnapshotReport;

use crate::api::error::{ApiError, ApiResult};
use crate::state::SharedState;

/// Creates the reports router.
pub fn router() -> Router<SharedState> {
    Router::new().route("/", get(get_reports))
}

// ============================================================================
// Request/Response Types
// ============================================================================

/// Query parameters for the report history.
#[derive(Debug, Clone, Default, Deserialize, IntoParams)]
#[into_params(parameter_in = Query)]
pub struct ReportsQuery {
    /// Maximum number of reports. Defaults to, and may not exceed,
    /// `server.report_history_limit`.
    #[param(minimum = 1, example = 10)]
    pub limit: Option<usize>,
}

/// Report history response.
#[derive(Debug, Clone, Serialize, Deserialize, ToSchema)]
pub struct ReportsResponse {
    /// Stored snapshot reports, newest first.
    pub reports: Vec<SnapshotReport>,
    /// Number of reports returned.
    #[schema(example = 1)]
    pub count: usize,
}

// ============================================================================
// Handlers
// ============================================================================

/// Get the most recent snapshot reports.
#[utoipa::path(
    get,
    path = "/api/reports",
    tag = "reports",
    operation_id = "getReports",
    summary = "List snapshot reports",
    description = "Returns the most recently stored comprehensive measurements, newest first.",
    params(ReportsQuery),
    responses(
        (status = 200, description = "Report history", body = ReportsResponse),
        (status = 400, description = "Invalid limit", body = crate::api::error::ErrorResponse),
        (status = 500, description = "Reports could not be read", body = crate::api::error::ErrorResponse)
    )
)]
pub async fn get_reports(
    State(state): State<SharedState>,
    Query(query): Query<ReportsQuery>,
) -> ApiResult<Json<ReportsResponse>> {
    let max = state.config.server.report_history_limit;
    let limit = match query.limit {
        None => max,
        Some(limit) if (1..=max).contains(&limit) => limit,
        Some(_) => {
            return Err(ApiError::BadRequest {
                error_code: "invalid_limit".to_string(),
                message: format!("limit must be between 1 and {max}"),
            })
        }
    };

    let store = Arc::clone(&state.store);
    let reports = tokio::task::spawn_blocking(move || store.recent(limit))
        .await
        .map_err(|e| ApiError::InternalError {
            error_code: "report_task_failed".to_string(),
            message: "Failed to read snapshot reports".to_string(),
            details: Some(e.to_string()),
        })??;

    Ok(Json(ReportsResponse {
        count: reports.len(),
        reports,
    }))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reports_query_defaults() {
        let query: ReportsQuery = serde_json::from_str("{}").unwrap();
        assert!(query.limit.is_none());
    }

    #[test]
    fn test_reports_response_serialization() {
        let response = ReportsResponse {
            reports: Vec::new(),
            count: 0,
        };
        let json = serde_json::to_string(&response).unwrap();
        assert_eq!(json, r#"{"reports":[],"count":0}"#);
    }
}
