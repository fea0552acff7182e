//! `PostgreSQL` adapters for TicketSync.
//!
//! This crate implements the persistence traits of `ticketsync-core` with sqlx:
//!
//! - [`PostgresTicketStore`]: ticket instances, with unique constraints on the
//!   id and the issuance key and a compare-and-set redemption update
//! - [`PostgresCatalog`]: read-only access to the `tickets` catalog table
//! - [`DeadLetterQueue`]: undecodable payment messages kept for investigation
//!
//! All three share one connection pool. Run [`migrate`] once at startup.
//!
//! # Example
//!
//! ```ignore
//! use ticketsync_postgres::{migrate, PostgresTicketStore};
//!
//! async fn example() -> Result<(), Box<dyn std::error::Error>> {
//!     let pool = sqlx::PgPool::connect("postgres://localhost/tickets").await?;
//!     migrate(&pool).await?;
//!     let store = PostgresTicketStore::new(pool);
//!     Ok(())
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

mod catalog;
mod dead_letter_queue;
mod ticket_store;

pub use catalog::PostgresCatalog;
pub use dead_letter_queue::{DLQStatus, DeadLetterQueue, StoredRejection};
pub use ticket_store::PostgresTicketStore;

use ticketsync_core::store::StoreError;

/// Apply the bundled migrations.
///
/// # Errors
///
/// Returns [`StoreError::Unavailable`] if a migration fails to apply.
pub async fn migrate(pool: &sqlx::PgPool) -> Result<(), StoreError> {
    sqlx::migrate!("./migrations")
        .run(pool)
        .await
        .map_err(|e| StoreError::Unavailable(format!("Migration failed: {e}")))?;
    tracing::info!("Database migrations applied");
    Ok(())
}

/// SQLSTATE classes for data exceptions (22) and integrity constraint
/// violations (23).
const PERMANENT_SQLSTATE_CLASSES: [&str; 2] = ["22", "23"];

/// Map a sqlx error that is not a unique violation.
pub(crate) fn store_error(context: &str, error: &sqlx::Error) -> StoreError {
    match error {
        sqlx::Error::Database(db_err)
            if db_err
                .code()
                .is_some_and(|code| is_permanent_sqlstate(&code)) =>
        {
            StoreError::Rejected(format!("{context}: {error}"))
        },
        sqlx::Error::ColumnDecode { .. }
        | sqlx::Error::ColumnNotFound(_)
        | sqlx::Error::Decode(_)
        | sqlx::Error::TypeNotFound { .. } => {
            StoreError::InvalidRecord(format!("{context}: {error}"))
        },
        _ => StoreError::Unavailable(format!("{context}: {error}")),
    }
}

fn is_permanent_sqlstate(code: &str) -> bool {
    PERMANENT_SQLSTATE_CLASSES
        .iter()
        .any(|class| code.starts_with(class))
}
