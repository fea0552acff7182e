//! Read-only access to the ticket catalog.

use crate::store_error;
use sqlx::{PgPool, Row};
use ticketsync_core::catalog::{Catalog, TicketProduct};
use ticketsync_core::store::{StoreError, StoreFuture};
use ticketsync_core::ticket::ProductId;

/// [`Catalog`] backed by the `tickets` table.
#[derive(Clone)]
pub struct PostgresCatalog {
    pool: PgPool,
}

impl PostgresCatalog {
    /// Create a catalog reader over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

impl Catalog for PostgresCatalog {
    fn product(&self, id: ProductId) -> StoreFuture<'_, Option<TicketProduct>> {
        Box::pin(async move {
            let row = sqlx::query("SELECT id, name, price, active FROM tickets WHERE id = $1")
                .bind(id.get())
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| store_error("Failed to load ticket product", &e))?;

            let Some(row) = row else {
                return Ok(None);
            };

            let decode = |e: sqlx::Error| StoreError::InvalidRecord(e.to_string());
            Ok(Some(TicketProduct {
                id: ProductId::new(row.try_get("id").map_err(decode)?),
                name: row.try_get("name").map_err(decode)?,
                price: row.try_get("price").map_err(decode)?,
                active: row.try_get("active").map_err(decode)?,
            }))
        })
    }
}
