//! Ticket instance persistence.
//!
//! [`TicketStore`] is shared by every consumer instance and by the redemption
//! endpoint, so it is the only place where the races of this subsystem can be
//! closed:
//!
//! - `insert` must enforce uniqueness of both the id and the issuance key and
//!   report violations as [`StoreError::DuplicateId`] /
//!   [`StoreError::DuplicateIssuance`] rather than a generic failure.
//! - `deactivate` must be an atomic compare-and-set on `is_active`.

use crate::ticket::{BuyerId, IssuanceKey, TicketInstance, TicketInstanceId};
use chrono::{DateTime, Utc};
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;

/// Errors returned by ticket stores.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    /// Another instance already uses this id.
    #[error("Ticket instance id already exists: {0}")]
    DuplicateId(TicketInstanceId),

    /// This purchased unit has already been issued.
    #[error("Ticket unit already issued: {0}")]
    DuplicateIssuance(IssuanceKey),

    /// The backing store could not be reached or failed transiently.
    #[error("Store unavailable: {0}")]
    Unavailable(String),

    /// A stored row could not be mapped back to a ticket.
    #[error("Invalid stored record: {0}")]
    InvalidRecord(String),

    /// The store refused the data itself (value out of range, check
    /// violation); writing it again will fail the same way.
    #[error("Record rejected by store: {0}")]
    Rejected(String),
}

impl StoreError {
    /// Whether retrying the same operation later may succeed.
    #[must_use]
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_))
    }
}

/// Boxed future returned by [`TicketStore`] methods.
pub type StoreFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, StoreError>> + Send + 'a>>;

/// Persistence for ticket instances.
pub trait TicketStore: Send + Sync {
    /// Whether an instance with this id exists.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be queried.
    fn exists(&self, id: &TicketInstanceId) -> StoreFuture<'_, bool>;

    /// Insert and commit a new instance.
    ///
    /// # Errors
    ///
    /// - [`StoreError::DuplicateId`] if the id is taken
    /// - [`StoreError::DuplicateIssuance`] if the issuance key is taken
    /// - [`StoreError::Rejected`] if the record violates a column or check constraint
    /// - [`StoreError::Unavailable`] on transient failure
    fn insert(&self, instance: &TicketInstance) -> StoreFuture<'_, ()>;

    /// Fetch an instance by id.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be queried.
    fn find(&self, id: &TicketInstanceId) -> StoreFuture<'_, Option<TicketInstance>>;

    /// All instances owned by `buyer`, oldest first.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] if the store cannot be queried.
    fn find_by_buyer(&self, buyer: &BuyerId) -> StoreFuture<'_, Vec<TicketInstance>>;

    /// Atomically move an active instance to redeemed.
    ///
    /// Returns the updated instance if this call performed the transition,
    /// `None` if no active instance with this id existed at that moment
    /// (absent or already redeemed).
    ///
    /// # Errors
    ///
    /// Returns [`StoreError::Unavailable`] on transient failure.
    fn deactivate(
        &self,
        id: &TicketInstanceId,
        at: DateTime<Utc>,
    ) -> StoreFuture<'_, Option<TicketInstance>>;
}
