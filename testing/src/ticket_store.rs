//! In-memory ticket store.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use chrono::{DateTime, Utc};
use std::collections::{BTreeMap, HashSet};
use std::sync::{Arc, Mutex};
use ticketsync_core::store::{StoreError, StoreFuture, TicketStore};
use ticketsync_core::ticket::{BuyerId, IssuanceKey, TicketInstance, TicketInstanceId};

#[derive(Default)]
struct StoreState {
    tickets: BTreeMap<TicketInstanceId, TicketInstance>,
    keys: HashSet<IssuanceKey>,
    unavailable: bool,
    /// Inserts that may still succeed before the store goes unavailable.
    insert_budget: Option<usize>,
    /// Next inserts that fail as unavailable before the store recovers.
    failing_inserts: usize,
    /// Next inserts that lose an id race despite `exists` saying free.
    forced_collisions: usize,
    /// Ids reported as taken without holding a ticket.
    reserved: HashSet<TicketInstanceId>,
    /// Column width for buyer ids, like `VARCHAR(n)` in the SQL schema.
    buyer_id_width: Option<usize>,
    exists_calls: usize,
}

/// [`TicketStore`] kept in a mutex-guarded map.
///
/// The whole compare-and-set happens under one lock, which gives the same
/// single-winner guarantee the SQL store gets from its conditional update.
#[derive(Clone, Default)]
pub struct InMemoryTicketStore {
    state: Arc<Mutex<StoreState>>,
}

impl InMemoryTicketStore {
    /// Create an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored tickets.
    #[must_use]
    pub fn len(&self) -> usize {
        self.state.lock().unwrap().tickets.len()
    }

    /// Whether the store holds no tickets.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// All stored tickets ordered by id.
    #[must_use]
    pub fn all(&self) -> Vec<TicketInstance> {
        self.state.lock().unwrap().tickets.values().cloned().collect()
    }

    /// Seed a ticket directly.
    pub fn seed(&self, ticket: TicketInstance) {
        let mut state = self.state.lock().unwrap();
        state.keys.insert(ticket.issuance_key.clone());
        state.tickets.insert(ticket.id.clone(), ticket);
    }

    /// Make every operation fail with [`StoreError::Unavailable`].
    pub fn set_unavailable(&self, unavailable: bool) {
        self.state.lock().unwrap().unavailable = unavailable;
    }

    /// Let `n` more inserts succeed, then fail inserts as unavailable.
    pub fn fail_inserts_after(&self, n: usize) {
        self.state.lock().unwrap().insert_budget = Some(n);
    }

    /// Make the next `n` inserts fail with [`StoreError::Unavailable`], after
    /// which inserts work again.
    pub fn fail_next_inserts(&self, n: usize) {
        self.state.lock().unwrap().failing_inserts = n;
    }

    /// Make the next `n` inserts fail with [`StoreError::DuplicateId`].
    pub fn force_id_collisions(&self, n: usize) {
        self.state.lock().unwrap().forced_collisions = n;
    }

    /// Reject inserts whose buyer id is longer than `width` with
    /// [`StoreError::Rejected`].
    pub fn limit_buyer_id_width(&self, width: usize) {
        self.state.lock().unwrap().buyer_id_width = Some(width);
    }

    /// Report `id` as taken by `exists`.
    pub fn reserve_id(&self, id: impl Into<TicketInstanceId>) {
        self.state.lock().unwrap().reserved.insert(id.into());
    }

    /// How many times `exists` was called.
    #[must_use]
    pub fn exists_calls(&self) -> usize {
        self.state.lock().unwrap().exists_calls
    }

    fn unavailable() -> StoreError {
        StoreError::Unavailable("in-memory store marked unavailable".to_string())
    }
}

impl TicketStore for InMemoryTicketStore {
    fn exists(&self, id: &TicketInstanceId) -> StoreFuture<'_, bool> {
        let id = id.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            state.exists_calls += 1;
            if state.unavailable {
                return Err(Self::unavailable());
            }
            Ok(state.tickets.contains_key(&id) || state.reserved.contains(&id))
        })
    }

    fn insert(&self, instance: &TicketInstance) -> StoreFuture<'_, ()> {
        let instance = instance.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.unavailable {
                return Err(Self::unavailable());
            }
            if let Some(budget) = state.insert_budget.as_mut() {
                if *budget == 0 {
                    return Err(Self::unavailable());
                }
                *budget -= 1;
            }
            if state.failing_inserts > 0 {
                state.failing_inserts -= 1;
                return Err(Self::unavailable());
            }
            if let Some(width) = state.buyer_id_width {
                if instance.buyer_id.as_str().len() > width {
                    return Err(StoreError::Rejected(format!(
                        "value too long for type character varying({width})"
                    )));
                }
            }
            if state.forced_collisions > 0 {
                state.forced_collisions -= 1;
                return Err(StoreError::DuplicateId(instance.id));
            }
            if state.tickets.contains_key(&instance.id) || state.reserved.contains(&instance.id) {
                return Err(StoreError::DuplicateId(instance.id));
            }
            if state.keys.contains(&instance.issuance_key) {
                return Err(StoreError::DuplicateIssuance(instance.issuance_key));
            }
            state.keys.insert(instance.issuance_key.clone());
            state.tickets.insert(instance.id.clone(), instance);
            Ok(())
        })
    }

    fn find(&self, id: &TicketInstanceId) -> StoreFuture<'_, Option<TicketInstance>> {
        let id = id.clone();
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if state.unavailable {
                return Err(Self::unavailable());
            }
            Ok(state.tickets.get(&id).cloned())
        })
    }

    fn find_by_buyer(&self, buyer: &BuyerId) -> StoreFuture<'_, Vec<TicketInstance>> {
        let buyer = buyer.clone();
        Box::pin(async move {
            let state = self.state.lock().unwrap();
            if state.unavailable {
                return Err(Self::unavailable());
            }
            let mut tickets: Vec<TicketInstance> = state
                .tickets
                .values()
                .filter(|t| t.buyer_id == buyer)
                .cloned()
                .collect();
            tickets.sort_by(|a, b| a.issued_at.cmp(&b.issued_at).then_with(|| a.id.cmp(&b.id)));
            Ok(tickets)
        })
    }

    fn deactivate(
        &self,
        id: &TicketInstanceId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<TicketInstance>> {
        let id = id.clone();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            if state.unavailable {
                return Err(Self::unavailable());
            }
            Ok(state
                .tickets
                .get_mut(&id)
                .and_then(|ticket| ticket.deactivate(at).then(|| ticket.clone())))
        })
    }
}

#[cfg(test)]
#[allow(clippy::expect_used)]
mod tests {
    use super::*;
    use crate::helpers::purchase;

    fn ticket(id: &str, unit: u32) -> TicketInstance {
        let event = purchase("u1", 7, 3);
        TicketInstance::issue(
            TicketInstanceId::new(id),
            IssuanceKey::for_unit(&event, unit),
            &event,
        )
    }

    #[tokio::test]
    async fn duplicates_are_reported_by_kind() {
        let store = InMemoryTicketStore::new();
        store.insert(&ticket("AAAAAAAAAAAA", 0)).await.expect("insert");

        assert!(matches!(
            store.insert(&ticket("AAAAAAAAAAAA", 1)).await,
            Err(StoreError::DuplicateId(_))
        ));
        assert!(matches!(
            store.insert(&ticket("BBBBBBBBBBBB", 0)).await,
            Err(StoreError::DuplicateIssuance(_))
        ));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn deactivate_has_a_single_winner() {
        let store = InMemoryTicketStore::new();
        store.insert(&ticket("AAAAAAAAAAAA", 0)).await.expect("insert");
        let id = TicketInstanceId::new("AAAAAAAAAAAA");

        let first = store.deactivate(&id, Utc::now()).await.expect("deactivate");
        let second = store.deactivate(&id, Utc::now()).await.expect("deactivate");
        assert!(first.is_some());
        assert!(second.is_none());
    }

    #[tokio::test]
    async fn insert_budget_then_unavailable() {
        let store = InMemoryTicketStore::new();
        store.fail_inserts_after(1);
        store.insert(&ticket("AAAAAAAAAAAA", 0)).await.expect("first insert");
        assert!(matches!(
            store.insert(&ticket("BBBBBBBBBBBB", 1)).await,
            Err(StoreError::Unavailable(_))
        ));
    }

    #[tokio::test]
    async fn over_wide_buyer_id_is_rejected() {
        let store = InMemoryTicketStore::new();
        store.limit_buyer_id_width(2);
        let result = store.insert(&ticket("AAAAAAAAAAAA", 0)).await;
        assert!(result.is_ok());

        let event = purchase("u123", 7, 1);
        let wide = TicketInstance::issue(
            TicketInstanceId::new("BBBBBBBBBBBB"),
            IssuanceKey::for_unit(&event, 0),
            &event,
        );
        let err = store.insert(&wide).await.expect_err("too wide");
        assert!(matches!(err, StoreError::Rejected(_)));
        assert!(!err.is_transient());
        assert_eq!(store.len(), 1);
    }
}
