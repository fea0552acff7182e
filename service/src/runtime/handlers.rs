//! Handlers deciding how each delivery is settled.
//!
//! The [`EventConsumer`](super::EventConsumer) owns the subscription; a
//! handler only looks at the bytes and answers [`AckDecision::Ack`] or
//! [`AckDecision::Retain`].
//!
//! | Payment message outcome          | Decision | Side effect              |
//! |----------------------------------|----------|--------------------------|
//! | issued (or already issued)       | Ack      |                          |
//! | other event type                 | Ack      |                          |
//! | malformed body                   | Ack      | dead-lettered            |
//! | invalid quantity or amount       | Ack      | dead-lettered            |
//! | unit permanently rejected        | Ack      | dead-lettered            |
//! | incomplete after retries         | Retain   | redelivered on reconnect |
//! | dead-letter write failed         | Retain   | redelivered on reconnect |

use crate::events::{PaymentMessage, decode_payment};
use crate::issuance::{IssuanceEngine, IssuanceError};
use crate::metrics;
use crate::retry::{RetryPolicy, retry_with_predicate};
use async_trait::async_trait;
use std::sync::Arc;
use ticketsync_core::dead_letter::{DeadLetterSink, RejectedMessage};
use ticketsync_core::environment::Clock;
use ticketsync_core::event_bus::AckDecision;
use tracing::{debug, error, info, warn};

/// Processes the raw payload of one delivery.
///
/// Implementors must finish their side effects before returning: the
/// decision is applied to the broker right after.
#[async_trait]
pub trait EventHandler: Send + Sync + 'static {
    /// Handle one message from `topic`.
    async fn handle(&self, topic: &str, payload: &[u8]) -> AckDecision;
}

/// Issues tickets for payment-completion messages.
pub struct PaymentHandler {
    engine: Arc<IssuanceEngine>,
    dead_letters: Arc<dyn DeadLetterSink>,
    clock: Arc<dyn Clock>,
    retry: RetryPolicy,
}

impl PaymentHandler {
    /// Create a handler.
    #[must_use]
    pub fn new(
        engine: Arc<IssuanceEngine>,
        dead_letters: Arc<dyn DeadLetterSink>,
        clock: Arc<dyn Clock>,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            engine,
            dead_letters,
            clock,
            retry,
        }
    }

    async fn reject(&self, topic: &str, payload: &[u8], reason: String) -> AckDecision {
        let rejected = RejectedMessage {
            topic: topic.to_string(),
            payload: payload.to_vec(),
            reason,
            rejected_at: self.clock.now(),
        };

        match self.dead_letters.record(&rejected).await {
            Ok(()) => {
                metrics::record_payment_event("rejected");
                AckDecision::Ack
            },
            Err(e) => {
                error!(
                    topic,
                    error = %e,
                    "Failed to dead-letter rejected message, leaving it for redelivery"
                );
                metrics::record_payment_event("retained");
                AckDecision::Retain
            },
        }
    }
}

#[async_trait]
impl EventHandler for PaymentHandler {
    async fn handle(&self, topic: &str, payload: &[u8]) -> AckDecision {
        let purchase = match decode_payment(payload) {
            Ok(PaymentMessage::Completed(purchase)) => purchase,
            Ok(PaymentMessage::Ignored(event)) => {
                debug!(topic, event = %event, "Ignoring non-checkout payment event");
                metrics::record_payment_event("ignored");
                return AckDecision::Ack;
            },
            Err(e) => {
                warn!(topic, error = %e, "Undecodable payment message");
                return self.reject(topic, payload, e.to_string()).await;
            },
        };

        let outcome = retry_with_predicate(
            &self.retry,
            || self.engine.issue(&purchase),
            IssuanceError::is_retryable,
        )
        .await;

        match outcome {
            Ok(report) => {
                info!(
                    buyer_id = %purchase.buyer_id,
                    issued = report.issued.len(),
                    duplicates = report.duplicates,
                    "Payment processed"
                );
                metrics::record_payment_event("processed");
                AckDecision::Ack
            },
            Err(e @ IssuanceError::InvalidEvent(_)) => {
                warn!(buyer_id = %purchase.buyer_id, error = %e, "Rejected payment event");
                metrics::record_payment_event("invalid");
                self.reject(topic, payload, e.to_string()).await
            },
            Err(e @ IssuanceError::Incomplete { .. }) if !e.is_retryable() => {
                error!(
                    buyer_id = %purchase.buyer_id,
                    error = %e,
                    "Store rejected part of the purchase, dead-lettering"
                );
                metrics::record_payment_event("unissuable");
                self.reject(topic, payload, e.to_string()).await
            },
            Err(e @ IssuanceError::Incomplete { .. }) => {
                error!(
                    buyer_id = %purchase.buyer_id,
                    error = %e,
                    "Issuance still incomplete after retries, leaving message for redelivery"
                );
                metrics::record_payment_event("retained");
                AckDecision::Retain
            },
        }
    }
}
