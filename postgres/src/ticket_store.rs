//! `PostgreSQL` ticket instance store.

use crate::store_error;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use ticketsync_core::store::{StoreError, StoreFuture, TicketStore};
use ticketsync_core::ticket::{
    BuyerId, IssuanceKey, ProductId, TicketInstance, TicketInstanceId,
};

const ISSUANCE_KEY_CONSTRAINT: &str = "ticket_instances_issuance_key_unique";

const SELECT_COLUMNS: &str =
    "id, user_id, ticket_id, unit_amount, issued_at, is_active, deactivated_at, issuance_key";

/// `PostgreSQL` implementation of [`TicketStore`].
///
/// Uniqueness is enforced by the table constraints, not by the existence
/// check: two allocators racing on the same id both pass `exists`, and the
/// loser gets [`StoreError::DuplicateId`] from `insert`.
#[derive(Clone)]
pub struct PostgresTicketStore {
    pool: PgPool,
}

impl PostgresTicketStore {
    /// Create a store over an existing pool.
    #[must_use]
    pub const fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// The underlying pool.
    #[must_use]
    pub const fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn row_to_instance(row: &PgRow) -> Result<TicketInstance, StoreError> {
        let decode = |e: sqlx::Error| StoreError::InvalidRecord(e.to_string());

        Ok(TicketInstance {
            id: TicketInstanceId::new(row.try_get::<String, _>("id").map_err(decode)?),
            buyer_id: BuyerId::new(row.try_get::<String, _>("user_id").map_err(decode)?),
            product_id: ProductId::new(row.try_get("ticket_id").map_err(decode)?),
            unit_amount: row.try_get("unit_amount").map_err(decode)?,
            issued_at: row.try_get("issued_at").map_err(decode)?,
            is_active: row.try_get("is_active").map_err(decode)?,
            deactivated_at: row.try_get("deactivated_at").map_err(decode)?,
            issuance_key: IssuanceKey::from_stored(
                row.try_get::<String, _>("issuance_key").map_err(decode)?,
            ),
        })
    }

    fn insert_error(instance: &TicketInstance, error: &sqlx::Error) -> StoreError {
        if let sqlx::Error::Database(db_err) = error {
            if db_err.is_unique_violation() {
                return if db_err.constraint() == Some(ISSUANCE_KEY_CONSTRAINT) {
                    StoreError::DuplicateIssuance(instance.issuance_key.clone())
                } else {
                    StoreError::DuplicateId(instance.id.clone())
                };
            }
        }
        store_error("Failed to insert ticket instance", error)
    }
}

impl TicketStore for PostgresTicketStore {
    fn exists(&self, id: &TicketInstanceId) -> StoreFuture<'_, bool> {
        let id = id.clone();

        Box::pin(async move {
            let (exists,): (bool,) =
                sqlx::query_as("SELECT EXISTS (SELECT 1 FROM ticket_instances WHERE id = $1)")
                    .bind(id.as_str())
                    .fetch_one(&self.pool)
                    .await
                    .map_err(|e| store_error("Failed to check ticket id", &e))?;
            Ok(exists)
        })
    }

    fn insert(&self, instance: &TicketInstance) -> StoreFuture<'_, ()> {
        let instance = instance.clone();

        Box::pin(async move {
            sqlx::query(
                r"
                INSERT INTO ticket_instances
                    (id, user_id, ticket_id, unit_amount, issued_at,
                     is_active, deactivated_at, issuance_key)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
                ",
            )
            .bind(instance.id.as_str())
            .bind(instance.buyer_id.as_str())
            .bind(instance.product_id.get())
            .bind(instance.unit_amount)
            .bind(instance.issued_at)
            .bind(instance.is_active)
            .bind(instance.deactivated_at)
            .bind(instance.issuance_key.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| Self::insert_error(&instance, &e))?;

            tracing::debug!(
                ticket_instance_id = %instance.id,
                issuance_key = %instance.issuance_key,
                "Ticket instance inserted"
            );
            Ok(())
        })
    }

    fn find(&self, id: &TicketInstanceId) -> StoreFuture<'_, Option<TicketInstance>> {
        let id = id.clone();

        Box::pin(async move {
            let row = sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM ticket_instances WHERE id = $1"
            ))
            .bind(id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load ticket instance", &e))?;

            row.as_ref().map(Self::row_to_instance).transpose()
        })
    }

    fn find_by_buyer(&self, buyer: &BuyerId) -> StoreFuture<'_, Vec<TicketInstance>> {
        let buyer = buyer.clone();

        Box::pin(async move {
            let rows = sqlx::query(&format!(
                "SELECT {SELECT_COLUMNS} FROM ticket_instances \
                 WHERE user_id = $1 ORDER BY issued_at ASC, id ASC"
            ))
            .bind(buyer.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| store_error("Failed to load buyer tickets", &e))?;

            rows.iter().map(Self::row_to_instance).collect()
        })
    }

    fn deactivate(
        &self,
        id: &TicketInstanceId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<TicketInstance>> {
        let id = id.clone();

        Box::pin(async move {
            // Compare-and-set: only the caller that flips is_active gets a row back
            let row = sqlx::query(&format!(
                "UPDATE ticket_instances \
                 SET is_active = FALSE, deactivated_at = $2 \
                 WHERE id = $1 AND is_active \
                 RETURNING {SELECT_COLUMNS}"
            ))
            .bind(id.as_str())
            .bind(at)
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| store_error("Failed to deactivate ticket instance", &e))?;

            row.as_ref().map(Self::row_to_instance).transpose()
        })
    }
}
