//! Read-only view of the ticket catalog.

use crate::store::StoreFuture;
use crate::ticket::ProductId;
use serde::{Deserialize, Serialize};

/// A purchasable ticket product.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketProduct {
    /// Catalog id.
    pub id: ProductId,
    /// Display name.
    pub name: String,
    /// Unit price.
    pub price: f64,
    /// Whether the product is currently on sale.
    pub active: bool,
}

/// Product lookup used when composing notifications.
pub trait Catalog: Send + Sync {
    /// Fetch a product; `None` if the catalog has no such id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`](crate::store::StoreError::Unavailable)
    /// if the catalog cannot be queried.
    fn product(&self, id: ProductId) -> StoreFuture<'_, Option<TicketProduct>>;
}
