//! Health check endpoint.
//!
//! Used by load balancers and orchestrators for liveness.

use axum::{Json, http::StatusCode};
use serde::Serialize;

/// Liveness response body.
#[derive(Debug, Serialize, PartialEq, Eq)]
pub struct HealthResponse {
    /// Always `"ok"` while the process is serving requests.
    pub status: &'static str,
}

/// Simple health check endpoint (for basic liveness).
///
/// Does NOT check dependencies (database, broker).
///
/// # Endpoint
///
/// ```text
/// GET /tickets/v1/health
/// ```
///
/// # Response
///
/// ```json
/// { "status": "ok" }
/// ```
#[allow(clippy::unused_async)]
pub async fn health_check() -> (StatusCode, Json<HealthResponse>) {
    (StatusCode::OK, Json(HealthResponse { status: "ok" }))
}
