//! Router configuration for the ticket service.

use super::state::AppState;
use crate::api::instances;
use axum::Router;
use axum::routing::{get, post};
use ticketsync_web::handlers::health::health_check;
use tower_http::trace::TraceLayer;

/// Path prefix of every route.
pub const API_PREFIX: &str = "/tickets/v1";

/// Build the complete Axum router.
///
/// ```text
/// GET  /tickets/v1/health
/// POST /tickets/v1/instances/:id/validate
/// GET  /tickets/v1/instances/:id
/// GET  /tickets/v1/users/:user_id/instances
/// ```
pub fn build_router(state: AppState) -> Router {
    let api_routes = Router::new()
        .route("/health", get(health_check))
        .route("/instances/:id", get(instances::get_instance))
        .route("/instances/:id/validate", post(instances::validate_instance))
        .route("/users/:user_id/instances", get(instances::list_user_instances));

    Router::new()
        .nest(API_PREFIX, api_routes)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}
