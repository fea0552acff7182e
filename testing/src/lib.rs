//! # TicketSync Testing
//!
//! Test doubles and helpers for the TicketSync crates.
//!
//! This crate provides:
//! - [`InMemoryEventBus`]: a topic log with committed offsets, honoring the
//!   same ack/retain protocol as the Redpanda bus
//! - [`InMemoryTicketStore`]: compare-and-set store with failure injection
//! - [`MockCatalog`], [`MockBuyerDirectory`], [`InMemoryDeadLetterSink`]
//! - [`FixedClock`] for deterministic time
//! - proptest strategies for domain types
//!
//! ## Example
//!
//! ```ignore
//! use ticketsync_testing::{InMemoryTicketStore, helpers::purchase};
//!
//! #[tokio::test]
//! async fn issues_three_tickets() {
//!     let store = Arc::new(InMemoryTicketStore::new());
//!     let engine = IssuanceEngine::new(store.clone(), allocator, notifier);
//!     engine.issue(&purchase("u1", 7, 3)).await.unwrap();
//!     assert_eq!(store.len(), 3);
//! }
//! ```

use chrono::{DateTime, Utc};
use ticketsync_core::environment::Clock;

mod collaborators;
mod event_bus;
mod ticket_store;

pub use collaborators::{InMemoryDeadLetterSink, MockBuyerDirectory, MockCatalog};
pub use event_bus::InMemoryEventBus;
pub use ticket_store::InMemoryTicketStore;

/// Mock implementations of environment traits.
pub mod mocks {
    use super::{Clock, DateTime, Utc};

    /// Fixed clock for deterministic tests
    ///
    /// Always returns the same time, making tests reproducible.
    ///
    /// # Example
    ///
    /// ```
    /// use ticketsync_testing::mocks::FixedClock;
    /// use ticketsync_core::environment::Clock;
    /// use chrono::Utc;
    ///
    /// let clock = FixedClock::new(Utc::now());
    /// assert_eq!(clock.now(), clock.now());
    /// ```
    #[derive(Debug, Clone)]
    pub struct FixedClock {
        time: DateTime<Utc>,
    }

    impl FixedClock {
        /// Create a new fixed clock with the given time
        #[must_use]
        pub const fn new(time: DateTime<Utc>) -> Self {
            Self { time }
        }
    }

    impl Clock for FixedClock {
        fn now(&self) -> DateTime<Utc> {
            self.time
        }
    }

    /// Create a default fixed clock for tests (2025-01-01 00:00:00 UTC)
    ///
    /// # Panics
    ///
    /// Never in practice; the timestamp is a constant.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn test_clock() -> FixedClock {
        FixedClock::new(
            DateTime::parse_from_rfc3339("2025-01-01T00:00:00Z")
                .expect("hardcoded timestamp should always parse")
                .with_timezone(&Utc),
        )
    }
}

/// Builders for common test data.
pub mod helpers {
    use chrono::{DateTime, TimeZone, Utc};
    use ticketsync_core::ticket::{BuyerId, ProductId, PurchaseCompleted};

    /// Purchase time used by [`purchase`]: 2023-10-01 12:00:00 UTC.
    #[must_use]
    #[allow(clippy::expect_used)]
    pub fn purchase_time() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2023, 10, 1, 12, 0, 0)
            .single()
            .expect("hardcoded timestamp is unambiguous")
    }

    /// A completed purchase of `quantity` units of `product` at 300.0 each.
    #[must_use]
    pub fn purchase(buyer: &str, product: i64, quantity: u32) -> PurchaseCompleted {
        PurchaseCompleted {
            buyer_id: BuyerId::new(buyer),
            product_id: ProductId::new(product),
            quantity,
            unit_amount: 300.0,
            issued_at: purchase_time(),
        }
    }

    /// Install a test-friendly tracing subscriber once per process.
    ///
    /// Honors `RUST_LOG`; output is captured by the test harness.
    pub fn init_tracing() {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    }
}

/// Property-based testing utilities using proptest.
pub mod properties {
    use chrono::{DateTime, TimeZone, Utc};
    use proptest::prelude::*;
    use ticketsync_core::ticket::{BuyerId, ProductId, PurchaseCompleted};

    /// Buyer references as produced by the identity service.
    pub fn buyer_id() -> impl Strategy<Value = BuyerId> {
        "[a-z0-9]{1,24}".prop_map(BuyerId::new)
    }

    /// Purchase instants between 2020 and 2030, second precision.
    pub fn purchase_time() -> impl Strategy<Value = DateTime<Utc>> {
        (1_577_836_800_i64..1_893_456_000_i64)
            .prop_filter_map("valid timestamp", |secs| Utc.timestamp_opt(secs, 0).single())
    }

    /// Valid purchases with `1..=max_quantity` units.
    pub fn purchase(max_quantity: u32) -> impl Strategy<Value = PurchaseCompleted> {
        (
            buyer_id(),
            1_i64..10_000,
            1..=max_quantity,
            0_u32..100_000,
            purchase_time(),
        )
            .prop_map(|(buyer_id, product, quantity, cents, issued_at)| {
                PurchaseCompleted {
                    buyer_id,
                    product_id: ProductId::new(product),
                    quantity,
                    unit_amount: f64::from(cents) / 100.0,
                    issued_at,
                }
            })
    }
}

pub use mocks::{FixedClock, test_clock};
