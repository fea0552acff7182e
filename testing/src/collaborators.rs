//! Mocks for the catalog, identity and dead-letter collaborators.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use std::collections::HashMap;
use std::future::Future;
use std::pin::Pin;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use ticketsync_core::catalog::{Catalog, TicketProduct};
use ticketsync_core::dead_letter::{DeadLetterSink, RejectedMessage};
use ticketsync_core::directory::{Buyer, BuyerDirectory, DirectoryError};
use ticketsync_core::store::{StoreError, StoreFuture};
use ticketsync_core::ticket::{BuyerId, ProductId};

/// Catalog backed by a map.
#[derive(Clone, Default)]
pub struct MockCatalog {
    products: Arc<Mutex<HashMap<ProductId, TicketProduct>>>,
    unavailable: Arc<AtomicBool>,
}

impl MockCatalog {
    /// Empty catalog.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Add an active product.
    #[must_use]
    pub fn with_product(self, id: i64, name: &str, price: f64) -> Self {
        self.products.lock().unwrap().insert(
            ProductId::new(id),
            TicketProduct {
                id: ProductId::new(id),
                name: name.to_string(),
                price,
                active: true,
            },
        );
        self
    }

    /// Make lookups fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl Catalog for MockCatalog {
    fn product(&self, id: ProductId) -> StoreFuture<'_, Option<TicketProduct>> {
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("catalog unavailable".to_string()));
            }
            Ok(self.products.lock().unwrap().get(&id).cloned())
        })
    }
}

/// Identity service double.
#[derive(Clone, Default)]
pub struct MockBuyerDirectory {
    buyers: Arc<Mutex<HashMap<BuyerId, Buyer>>>,
    unavailable: Arc<AtomicBool>,
    lookups: Arc<AtomicUsize>,
}

impl MockBuyerDirectory {
    /// Empty directory.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a buyer.
    #[must_use]
    pub fn with_buyer(self, id: &str, name: &str, email: &str) -> Self {
        self.buyers.lock().unwrap().insert(
            BuyerId::new(id),
            Buyer {
                id: BuyerId::new(id),
                name: name.to_string(),
                email: email.to_string(),
            },
        );
        self
    }

    /// Make lookups fail.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }

    /// Number of lookups performed.
    #[must_use]
    pub fn lookups(&self) -> usize {
        self.lookups.load(Ordering::SeqCst)
    }
}

impl BuyerDirectory for MockBuyerDirectory {
    fn lookup(
        &self,
        id: &BuyerId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Buyer>, DirectoryError>> + Send + '_>> {
        let id = id.clone();
        Box::pin(async move {
            self.lookups.fetch_add(1, Ordering::SeqCst);
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(DirectoryError::Unavailable("identity service down".to_string()));
            }
            Ok(self.buyers.lock().unwrap().get(&id).cloned())
        })
    }
}

/// Dead-letter sink that keeps messages in memory.
#[derive(Clone, Default)]
pub struct InMemoryDeadLetterSink {
    messages: Arc<Mutex<Vec<RejectedMessage>>>,
    unavailable: Arc<AtomicBool>,
}

impl InMemoryDeadLetterSink {
    /// Empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Recorded messages, oldest first.
    #[must_use]
    pub fn messages(&self) -> Vec<RejectedMessage> {
        self.messages.lock().unwrap().clone()
    }

    /// Make `record` fail until reset.
    pub fn set_unavailable(&self, unavailable: bool) {
        self.unavailable.store(unavailable, Ordering::SeqCst);
    }
}

impl DeadLetterSink for InMemoryDeadLetterSink {
    fn record(&self, message: &RejectedMessage) -> StoreFuture<'_, ()> {
        let message = message.clone();
        Box::pin(async move {
            if self.unavailable.load(Ordering::SeqCst) {
                return Err(StoreError::Unavailable("dead-letter table down".to_string()));
            }
            self.messages.lock().unwrap().push(message);
            Ok(())
        })
    }
}
