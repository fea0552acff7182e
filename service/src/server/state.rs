//! Application state for the HTTP server.

use crate::redemption::Redemption;
use std::sync::Arc;
use ticketsync_core::store::TicketStore;

/// Shared by all handlers; cloned per request.
#[derive(Clone)]
pub struct AppState {
    /// Read access to issued instances
    pub store: Arc<dyn TicketStore>,

    /// Redemption state machine
    pub redemption: Redemption,
}

impl AppState {
    /// Create the application state.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, redemption: Redemption) -> Self {
        Self { store, redemption }
    }
}
