//! HTTP server for the ticket service.
//!
//! - Application state shared by handlers
//! - Router configuration under `/tickets/v1`

pub mod routes;
pub mod state;

pub use routes::build_router;
pub use state::AppState;
