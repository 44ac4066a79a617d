//! OpenAPI specification generation for the vitalwatch API.
//!
//! The specification is served at `/api/openapi.json` together with a
//! Swagger UI at `/api/docs`, and written to disk by the `gen-openapi` binary
//! for the dashboard's TypeScript client generation.

use utoipa::OpenApi;
use vitalwatch_core::{
    HealthResponse, LinkState, LinkStatus, LiveVitals, SnapshotReport, VitalsSnapshot,
};

use super::device::{RescanResponse, SnapshotRequestResponse};
use super::error::ErrorResponse;
use super::reports::ReportsResponse;

/// Returns the OpenAPI specification as a string (for writing to file).
///
/// # Errors
///
/// Returns an error if the document cannot be serialized.
pub fn get_openapi_json() -> Result<String, serde_json::Error> {
    ApiDoc::openapi().to_pretty_json()
}

/// Main OpenAPI document structure for vitalwatch.
#[derive(OpenApi)]
#[openapi(
    info(
        title = "vitalwatch API",
        version = "0.1.0",
        description = r#"
# vitalwatch API

vitalwatch bridges a Vital Watch wrist sensor to browser dashboards.

## Overview

The gateway keeps a Bluetooth Low Energy link to one watch and:

1. **Streams live vitals**: heart rate, SpO2 and blood pressure, pushed as they arrive
2. **Takes snapshots**: an on-demand comprehensive measurement, pushed and stored
3. **Reports link status**: radio power, connection state and device name

## Push channel

Live data is not available over REST. Connect a WebSocket to `/ws` and read
text messages of the form `{"topic": "...", "payload": {...}}`:

- `live-vitals`: a `LiveVitals` payload, or `{"connected": false}` when the watch drops
- `vitals-snapshot-result`: a `VitalsSnapshot` payload

Send `{"event": "start-vitals-snapshot"}`, `{"event": "start-ecg-stream"}` or
`{"event": "stop-ecg-stream"}` to control the watch.

## Reconnects

The gateway rescans five seconds after the watch drops or a connection attempt
fails, forever. A watch that connects without exposing both characteristics
is not retried; call `POST /api/scan`.
"#,
        license(name = "MIT", url = "https://opensource.org/licenses/MIT")
    ),
    servers(
        (url = "/", description = "Local vitalwatch gateway")
    ),
    tags(
        (
            name = "system",
            description = "Health checks"
        ),
        (
            name = "device",
            description = "Watch link status and commands"
        ),
        (
            name = "reports",
            description = "Stored snapshot reports"
        )
    ),
    paths(
        super::health::health_check,
        super::status::get_status,
        super::device::request_snapshot,
        super::device::rescan,
        super::reports::get_reports,
    ),
    components(
        schemas(
            // Error types
            ErrorResponse,
            // Health types
            HealthResponse,
            // Device types
            LinkState,
            LinkStatus,
            SnapshotRequestResponse,
            RescanResponse,
            // Vitals types (push payloads)
            LiveVitals,
            VitalsSnapshot,
            // Report types
            SnapshotReport,
            ReportsResponse,
        )
    )
)]
pub struct ApiDoc;
