//! Ticket instance identifier allocation.
//!
//! Identifiers are 12 characters drawn uniformly from `[A-Za-z0-9]` with the
//! operating system CSPRNG. A candidate is checked against the store before it
//! is handed out; the unique constraint on insert remains authoritative,
//! because another consumer may take the same id in between.

use crate::metrics;
use rand::Rng;
use rand::distributions::Alphanumeric;
use rand::rngs::OsRng;
use std::sync::Arc;
use thiserror::Error;
use ticketsync_core::store::{StoreError, TicketStore};
use ticketsync_core::ticket::TicketInstanceId;

/// Default number of candidates tried per allocation.
pub const DEFAULT_MAX_ATTEMPTS: u32 = 5;

/// Errors from [`IdAllocator::allocate`].
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum AllocationError {
    /// Every candidate was already taken.
    #[error("No free ticket id after {attempts} attempts")]
    Exhausted {
        /// Candidates tried
        attempts: u32,
    },

    /// The existence check failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

type CandidateSource = Arc<dyn Fn() -> TicketInstanceId + Send + Sync>;

/// Bounded generate-check-regenerate allocator.
#[derive(Clone)]
pub struct IdAllocator {
    store: Arc<dyn TicketStore>,
    max_attempts: u32,
    candidates: CandidateSource,
}

impl IdAllocator {
    /// Allocator over `store` with the default attempt budget.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>) -> Self {
        Self {
            store,
            max_attempts: DEFAULT_MAX_ATTEMPTS,
            candidates: Arc::new(generate),
        }
    }

    /// Set the attempt budget (at least one attempt is always made).
    #[must_use]
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Replace the candidate generator. Intended for tests that need to
    /// force collisions.
    #[must_use]
    pub fn with_candidates(
        mut self,
        candidates: impl Fn() -> TicketInstanceId + Send + Sync + 'static,
    ) -> Self {
        self.candidates = Arc::new(candidates);
        self
    }

    /// Attempt budget.
    #[must_use]
    pub const fn max_attempts(&self) -> u32 {
        self.max_attempts
    }

    /// Produce an id not currently present in the store.
    ///
    /// One store read per attempt, no writes.
    ///
    /// # Errors
    ///
    /// - [`AllocationError::Exhausted`] when every candidate was taken
    /// - [`AllocationError::Store`] when the existence check fails
    pub async fn allocate(&self) -> Result<TicketInstanceId, AllocationError> {
        for attempt in 1..=self.max_attempts {
            let candidate = (self.candidates)();
            if !self.store.exists(&candidate).await? {
                return Ok(candidate);
            }
            tracing::debug!(attempt, candidate = %candidate, "Ticket id collision, regenerating");
            metrics::record_id_collision();
        }

        tracing::error!(attempts = self.max_attempts, "Ticket id allocation exhausted");
        Err(AllocationError::Exhausted {
            attempts: self.max_attempts,
        })
    }
}

/// Draw a fresh random identifier.
#[must_use]
pub fn generate() -> TicketInstanceId {
    let id: String = OsRng
        .sample_iter(&Alphanumeric)
        .take(TicketInstanceId::LENGTH)
        .map(char::from)
        .collect();
    TicketInstanceId::new(id)
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use ticketsync_testing::InMemoryTicketStore;

    fn scripted(ids: &'static [&'static str]) -> impl Fn() -> TicketInstanceId + Send + Sync {
        let next = AtomicUsize::new(0);
        move || {
            let i = next.fetch_add(1, Ordering::SeqCst);
            ids.get(i).map_or_else(generate, |id| TicketInstanceId::new(*id))
        }
    }

    #[tokio::test]
    async fn first_collision_yields_a_different_id() {
        let store = Arc::new(InMemoryTicketStore::new());
        store.reserve_id("AAAAAAAAAAAA");

        let allocator = IdAllocator::new(store.clone())
            .with_candidates(scripted(&["AAAAAAAAAAAA", "BBBBBBBBBBBB"]));

        let id = allocator.allocate().await.unwrap();
        assert_eq!(id.as_str(), "BBBBBBBBBBBB");
        assert_eq!(store.exists_calls(), 2);
    }

    #[tokio::test]
    async fn budget_is_bounded() {
        let store = Arc::new(InMemoryTicketStore::new());
        store.reserve_id("AAAAAAAAAAAA");

        let allocator = IdAllocator::new(store.clone())
            .with_max_attempts(3)
            .with_candidates(|| TicketInstanceId::new("AAAAAAAAAAAA"));

        let result = allocator.allocate().await;
        assert_eq!(result, Err(AllocationError::Exhausted { attempts: 3 }));
        assert_eq!(store.exists_calls(), 3);
    }

    #[tokio::test]
    async fn store_failure_is_propagated() {
        let store = Arc::new(InMemoryTicketStore::new());
        store.set_unavailable(true);
        let allocator = IdAllocator::new(store);

        assert!(matches!(
            allocator.allocate().await,
            Err(AllocationError::Store(StoreError::Unavailable(_)))
        ));
    }

    #[tokio::test]
    async fn zero_budget_still_tries_once() {
        let store = Arc::new(InMemoryTicketStore::new());
        let allocator = IdAllocator::new(store).with_max_attempts(0);
        assert_eq!(allocator.max_attempts(), 1);
        assert!(allocator.allocate().await.is_ok());
    }

    proptest! {
        #[test]
        fn generated_ids_are_well_formed(_seed in 0u32..256) {
            let id = generate();
            prop_assert!(id.is_well_formed());
        }

        #[test]
        fn never_returns_a_taken_id(taken in proptest::collection::hash_set("[A-Za-z0-9]{12}", 0..20)) {
            let runtime = tokio::runtime::Builder::new_current_thread().build().unwrap();
            let store = Arc::new(InMemoryTicketStore::new());
            for id in &taken {
                store.reserve_id(id.as_str());
            }
            let pool: Vec<String> = taken.iter().cloned().collect();
            let next = AtomicUsize::new(0);
            let allocator = IdAllocator::new(store).with_max_attempts(u32::MAX).with_candidates(move || {
                let i = next.fetch_add(1, Ordering::SeqCst);
                pool.get(i).map_or_else(generate, |id| TicketInstanceId::new(id.clone()))
            });

            let id = runtime.block_on(allocator.allocate()).unwrap();
            prop_assert!(!taken.contains(id.as_str()));
        }
    }

    #[test]
    fn ids_are_distinct_in_practice() {
        let ids: std::collections::HashSet<_> = (0..1_000).map(|_| generate()).collect();
        assert_eq!(ids.len(), 1_000);
    }
}
