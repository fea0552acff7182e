//! Parking place for messages that can never be processed.
//!
//! A payment message that fails to decode is acknowledged (retrying cannot
//! help) but kept here for investigation.

use crate::store::StoreFuture;
use chrono::{DateTime, Utc};

/// A message the consumer gave up on.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RejectedMessage {
    /// Topic it was read from.
    pub topic: String,
    /// Raw body as received.
    pub payload: Vec<u8>,
    /// Why it was rejected.
    pub reason: String,
    /// When it was rejected.
    pub rejected_at: DateTime<Utc>,
}

/// Destination for rejected messages.
pub trait DeadLetterSink: Send + Sync {
    /// Persist a rejected message.
    ///
    /// # Errors
    ///
    /// Returns [`StoreError`](crate::store::StoreError) if it cannot be stored.
    fn record(&self, message: &RejectedMessage) -> StoreFuture<'_, ()>;
}
