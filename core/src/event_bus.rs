//! Event bus abstraction for the payment and notification topics.
//!
//! The issuance subsystem talks to the broker through the [`EventBus`] trait:
//! it consumes payment-completion messages from one topic and publishes
//! ticket-ready notifications on another.
//!
//! # Delivery Semantics
//!
//! **At-least-once with explicit acknowledgment.** A subscription yields
//! [`Delivery`] values one at a time. The transport does not fetch the next
//! message until the current one is settled:
//!
//! - [`Delivery::ack`] commits the message; it will not be seen again by the
//!   same consumer group.
//! - [`Delivery::retain`] (or dropping the delivery) leaves it uncommitted.
//!   The stream then ends, and a fresh subscription resumes from the last
//!   committed position, so the message is redelivered.
//!
//! ```text
//! subscribe ──► Delivery ──► handler ──┬─ ack ──► commit, next message
//!                                      └─ retain ─► stream ends, resubscribe
//!                                                   redelivers from commit
//! ```
//!
//! Payloads are raw bytes; this crate does not pick a wire format. The
//! payment and notification topics both carry JSON.
//!
//! # Implementations
//!
//! - `RedpandaEventBus` (`ticketsync-redpanda`) for production
//! - `InMemoryEventBus` (`ticketsync-testing`) for tests

use futures::Stream;
use std::future::Future;
use std::pin::Pin;
use thiserror::Error;
use tokio::sync::oneshot;

/// Errors that can occur during event bus operations.
#[derive(Error, Debug, Clone)]
pub enum EventBusError {
    /// Failed to connect to the event bus
    #[error("Connection failed: {0}")]
    ConnectionFailed(String),

    /// Failed to publish a message to a topic
    #[error("Publish failed for topic '{topic}': {reason}")]
    PublishFailed {
        /// The topic that failed
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Failed to subscribe to topics
    #[error("Subscription failed for topics {topics:?}: {reason}")]
    SubscriptionFailed {
        /// The topics that failed to subscribe
        topics: Vec<String>,
        /// The reason for failure
        reason: String,
    },

    /// Failed to declare (create) topics
    #[error("Topic declaration failed for {topic}: {reason}")]
    DeclarationFailed {
        /// The topic that could not be declared
        topic: String,
        /// The reason for failure
        reason: String,
    },

    /// Network or transport error
    #[error("Transport error: {0}")]
    TransportError(String),
}

/// A message to publish.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct BusMessage {
    /// Partitioning key; messages with the same key keep their order.
    pub key: Option<String>,
    /// Encoded body.
    pub payload: Vec<u8>,
}

impl BusMessage {
    /// Build a keyed message.
    #[must_use]
    pub fn keyed(key: impl Into<String>, payload: Vec<u8>) -> Self {
        Self {
            key: Some(key.into()),
            payload,
        }
    }
}

/// How a consumer settled a [`Delivery`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum AckDecision {
    /// Processed (or deliberately dropped); commit it.
    Ack,
    /// Not processed; leave uncommitted for redelivery.
    Retain,
}

/// A received message awaiting settlement.
///
/// Exactly one of [`ack`](Self::ack) or [`retain`](Self::retain) should be
/// called. Dropping an unsettled delivery counts as `retain`.
#[derive(Debug)]
pub struct Delivery {
    topic: String,
    key: Option<String>,
    payload: Vec<u8>,
    settle: Option<oneshot::Sender<AckDecision>>,
}

impl Delivery {
    /// Create a delivery whose settlement is reported on `settle`.
    #[must_use]
    pub fn new(
        topic: impl Into<String>,
        key: Option<String>,
        payload: Vec<u8>,
        settle: oneshot::Sender<AckDecision>,
    ) -> Self {
        Self {
            topic: topic.into(),
            key,
            payload,
            settle: Some(settle),
        }
    }

    /// Topic the message came from.
    #[must_use]
    pub fn topic(&self) -> &str {
        &self.topic
    }

    /// Partitioning key, if the producer set one.
    #[must_use]
    pub fn key(&self) -> Option<&str> {
        self.key.as_deref()
    }

    /// Raw message body.
    #[must_use]
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }

    /// Commit the message.
    pub fn ack(mut self) {
        self.settle_with(AckDecision::Ack);
    }

    /// Leave the message uncommitted so the broker redelivers it.
    pub fn retain(mut self) {
        self.settle_with(AckDecision::Retain);
    }

    fn settle_with(&mut self, decision: AckDecision) {
        if let Some(tx) = self.settle.take() {
            // The transport may already be gone (shutdown); nothing to commit then.
            let _ = tx.send(decision);
        }
    }
}

/// Stream of deliveries from a subscription.
pub type DeliveryStream = Pin<Box<dyn Stream<Item = Result<Delivery, EventBusError>> + Send>>;

/// Boxed future returned by [`EventBus`] methods.
pub type BusFuture<'a, T> = Pin<Box<dyn Future<Output = Result<T, EventBusError>> + Send + 'a>>;

/// Publish/subscribe access to the broker.
///
/// # Dyn Compatibility
///
/// Methods return boxed futures so the bus can be shared as
/// `Arc<dyn EventBus>` between the consumer and the notification dispatcher.
pub trait EventBus: Send + Sync {
    /// Make sure `topics` exist (durable), creating the missing ones.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::DeclarationFailed`] if a topic cannot be created.
    fn declare_topics(&self, topics: &[&str]) -> BusFuture<'_, ()>;

    /// Publish a message to a topic.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::PublishFailed`] if the broker rejects or times
    /// out the send.
    fn publish(&self, topic: &str, message: &BusMessage) -> BusFuture<'_, ()>;

    /// Subscribe to `topics` and receive deliveries one at a time.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::SubscriptionFailed`] if the subscription
    /// cannot be established.
    fn subscribe(&self, topics: &[&str]) -> BusFuture<'_, DeliveryStream>;
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn ack_reports_decision() {
        let (tx, rx) = oneshot::channel();
        let delivery = Delivery::new("payments", None, b"{}".to_vec(), tx);
        assert_eq!(delivery.topic(), "payments");
        delivery.ack();
        assert_eq!(rx.await.unwrap(), AckDecision::Ack);
    }

    #[tokio::test]
    async fn dropping_unsettled_delivery_closes_channel() {
        let (tx, rx) = oneshot::channel();
        let delivery = Delivery::new("payments", Some("k".into()), vec![], tx);
        assert_eq!(delivery.key(), Some("k"));
        drop(delivery);
        assert!(rx.await.is_err());
    }

    #[test]
    fn keyed_message() {
        let message = BusMessage::keyed("abc", vec![1, 2]);
        assert_eq!(message.key.as_deref(), Some("abc"));
        assert_eq!(message.payload, vec![1, 2]);
    }
}
