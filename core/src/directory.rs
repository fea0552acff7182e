//! Buyer identity lookup.
//!
//! The identity service owns user records; the dispatcher only needs a display
//! name and a contact address to address a ticket-ready notification.

use crate::ticket::BuyerId;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Contact data for a buyer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Buyer {
    /// Buyer reference.
    pub id: BuyerId,
    /// Display name.
    pub name: String,
    /// Delivery address for notifications.
    pub email: String,
}

/// Errors from the identity collaborator.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DirectoryError {
    /// The identity service could not be reached.
    #[error("Identity service unavailable: {0}")]
    Unavailable(String),

    /// The identity service answered with something unusable.
    #[error("Invalid identity response: {0}")]
    InvalidResponse(String),
}

/// Resolves buyers by reference.
pub trait BuyerDirectory: Send + Sync {
    /// Look up a buyer; `None` when the identity service has no record.
    ///
    /// # Errors
    ///
    /// Returns [`DirectoryError`] when the lookup itself fails.
    fn lookup(
        &self,
        id: &BuyerId,
    ) -> Pin<Box<dyn Future<Output = Result<Option<Buyer>, DirectoryError>> + Send + '_>>;
}
