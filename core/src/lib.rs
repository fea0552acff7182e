//! # TicketSync Core
//!
//! Domain types and collaborator traits for the ticket issuance and redemption
//! subsystem.
//!
//! This crate owns no I/O. It defines:
//!
//! - **Ticket types**: [`ticket::TicketInstance`] and the identifiers around it
//! - **Purchase events**: [`ticket::PurchaseCompleted`], the decoded form of a
//!   payment-completion message
//! - **Collaborator traits**: [`store::TicketStore`], [`event_bus::EventBus`],
//!   [`directory::BuyerDirectory`], [`catalog::Catalog`] and
//!   [`dead_letter::DeadLetterSink`]
//! - **Environment**: [`environment::Clock`] for injectable time
//!
//! Adapters live in sibling crates (`ticketsync-postgres`,
//! `ticketsync-redpanda`), in-memory doubles in `ticketsync-testing`.
//!
//! ## Architecture
//!
//! ```text
//! payment topic ──► EventConsumer ──► IssuanceEngine ──► TicketStore
//!                                          │
//!                                          ▼
//!                                 NotificationDispatcher ──► notification topic
//!
//! HTTP validate ──► Redemption ──► TicketStore (compare-and-set)
//! ```

pub use chrono::{DateTime, Utc};

pub mod catalog;
pub mod dead_letter;
pub mod directory;
pub mod event_bus;
pub mod store;
pub mod ticket;

/// Injectable environment dependencies.
pub mod environment {
    use chrono::{DateTime, Utc};

    /// Source of the current time.
    ///
    /// Injected so tests can pin timestamps such as `deactivated_at`.
    pub trait Clock: Send + Sync {
        /// Current instant in UTC.
        fn now(&self) -> DateTime<Utc>;
    }

    /// Wall clock backed by [`Utc::now`].
    #[derive(Debug, Clone, Copy, Default)]
    pub struct SystemClock;

    impl Clock for SystemClock {
        fn now(&self) -> DateTime<Utc> {
            Utc::now()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::environment::{Clock, SystemClock};

    #[test]
    fn system_clock_moves_forward() {
        let clock = SystemClock;
        let first = clock.now();
        let second = clock.now();
        assert!(second >= first);
    }
}
