//! Fan-out of a completed purchase into ticket instances.
//!
//! Each unit is allocated, inserted and committed on its own, then handed to
//! the notifier before the next unit starts. There is no atomicity across
//! units: a failure in unit 2 of 3 leaves unit 1 committed. Re-running the
//! same purchase is safe because every unit carries a deterministic
//! [`IssuanceKey`] that the store keeps unique.
//!
//! Notification is at most once per unit. A unit found already issued is
//! skipped without notifying, so if a process stops between committing a
//! unit and publishing its notification, that notification is not sent on
//! redelivery. The buyer still owns the ticket and sees it through
//! `GET /tickets/v1/users/{user_id}/instances`. Delivering it would need a
//! notified marker on the instance row, written after a successful publish.

use crate::allocator::{AllocationError, IdAllocator};
use crate::metrics;
use crate::notification::TicketNotifier;
use std::sync::Arc;
use std::time::Instant;
use thiserror::Error;
use ticketsync_core::store::{StoreError, TicketStore};
use ticketsync_core::ticket::{
    InvalidPurchase, IssuanceKey, PurchaseCompleted, TicketInstance, TicketInstanceId,
};

/// What happened to one purchase.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IssuanceReport {
    /// Ids committed by this run, in unit order.
    pub issued: Vec<TicketInstanceId>,
    /// Units an earlier delivery had already issued.
    pub duplicates: u32,
    /// Units whose notification failed (the ticket itself is committed).
    pub notification_failures: u32,
    /// Units that could not be issued, with the reason.
    pub failed_units: Vec<UnitFailure>,
}

impl IssuanceReport {
    /// Whether every unit is now issued, by this run or an earlier one.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.failed_units.is_empty()
    }
}

/// A unit that could not be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnitFailure {
    /// Zero-based unit index.
    pub unit: u32,
    /// Rendered cause.
    pub reason: String,
    /// Whether issuing the unit again may succeed.
    pub transient: bool,
}

/// Errors from [`IssuanceEngine::issue`].
#[derive(Error, Debug, Clone, PartialEq)]
pub enum IssuanceError {
    /// Rejected before any write.
    #[error("Invalid purchase event: {0}")]
    InvalidEvent(#[from] InvalidPurchase),

    /// Some units failed; the rest were attempted and committed.
    #[error("{} of {quantity} units could not be issued", .report.failed_units.len())]
    Incomplete {
        /// Units requested
        quantity: u32,
        /// Partial outcome
        report: IssuanceReport,
    },
}

impl IssuanceError {
    /// Whether running the same purchase again may succeed.
    ///
    /// An incomplete batch is retryable only if every failed unit failed
    /// transiently; one permanently rejected unit makes the whole message
    /// terminal.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        match self {
            Self::InvalidEvent(_) => false,
            Self::Incomplete { report, .. } => report.failed_units.iter().all(|f| f.transient),
        }
    }
}

enum UnitOutcome {
    Issued(TicketInstance),
    Duplicate,
}

#[derive(Debug, Error)]
enum UnitError {
    #[error(transparent)]
    Allocation(#[from] AllocationError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

impl UnitError {
    const fn is_transient(&self) -> bool {
        match self {
            Self::Allocation(AllocationError::Exhausted { .. }) => true,
            Self::Allocation(AllocationError::Store(e)) | Self::Store(e) => e.is_transient(),
        }
    }
}

/// Issues ticket instances for completed purchases.
pub struct IssuanceEngine {
    store: Arc<dyn TicketStore>,
    allocator: IdAllocator,
    notifier: Arc<dyn TicketNotifier>,
}

impl IssuanceEngine {
    /// Create an engine.
    #[must_use]
    pub fn new(
        store: Arc<dyn TicketStore>,
        allocator: IdAllocator,
        notifier: Arc<dyn TicketNotifier>,
    ) -> Self {
        Self {
            store,
            allocator,
            notifier,
        }
    }

    /// Issue `event.quantity` ticket instances.
    ///
    /// # Errors
    ///
    /// - [`IssuanceError::InvalidEvent`] before any write for a zero quantity
    ///   or an unusable amount
    /// - [`IssuanceError::Incomplete`] if at least one unit failed
    #[tracing::instrument(
        skip(self, event),
        fields(buyer_id = %event.buyer_id, product_id = %event.product_id, quantity = event.quantity)
    )]
    pub async fn issue(&self, event: &PurchaseCompleted) -> Result<IssuanceReport, IssuanceError> {
        event.validate()?;
        let started = Instant::now();
        let mut report = IssuanceReport::default();

        for unit in 0..event.quantity {
            match self.issue_unit(event, unit).await {
                Ok(UnitOutcome::Issued(ticket)) => {
                    metrics::record_ticket_issued();
                    if let Err(e) = self.notifier.notify(&ticket).await {
                        tracing::warn!(
                            ticket_instance_id = %ticket.id,
                            error = %e,
                            "Notification failed; ticket remains issued"
                        );
                        report.notification_failures += 1;
                    }
                    report.issued.push(ticket.id);
                },
                Ok(UnitOutcome::Duplicate) => {
                    metrics::record_duplicate_unit();
                    report.duplicates += 1;
                },
                Err(e) => {
                    tracing::error!(unit, error = %e, "Failed to issue ticket unit");
                    report.failed_units.push(UnitFailure {
                        unit,
                        reason: e.to_string(),
                        transient: e.is_transient(),
                    });
                },
            }
        }

        metrics::record_issuance_duration(started.elapsed().as_secs_f64());

        if report.is_complete() {
            tracing::info!(
                issued = report.issued.len(),
                duplicates = report.duplicates,
                "Purchase issued"
            );
            Ok(report)
        } else {
            Err(IssuanceError::Incomplete {
                quantity: event.quantity,
                report,
            })
        }
    }

    async fn issue_unit(
        &self,
        event: &PurchaseCompleted,
        unit: u32,
    ) -> Result<UnitOutcome, UnitError> {
        let key = IssuanceKey::for_unit(event, unit);

        // Bounded by the allocator budget: a lost insert race costs one attempt
        for _ in 0..self.allocator.max_attempts() {
            let id = self.allocator.allocate().await?;
            let ticket = TicketInstance::issue(id, key.clone(), event);

            match self.store.insert(&ticket).await {
                Ok(()) => {
                    tracing::debug!(unit, ticket_instance_id = %ticket.id, "Ticket unit committed");
                    return Ok(UnitOutcome::Issued(ticket));
                },
                Err(StoreError::DuplicateId(id)) => {
                    tracing::debug!(unit, ticket_instance_id = %id, "Lost id race on insert, retrying");
                    metrics::record_id_collision();
                },
                Err(StoreError::DuplicateIssuance(key)) => {
                    tracing::info!(unit, issuance_key = %key, "Unit already issued, skipping");
                    return Ok(UnitOutcome::Duplicate);
                },
                Err(e) => return Err(e.into()),
            }
        }

        Err(AllocationError::Exhausted {
            attempts: self.allocator.max_attempts(),
        }
        .into())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::notification::NotifyError;
    use async_trait::async_trait;
    use std::sync::Mutex;
    use ticketsync_core::event_bus::EventBusError;
    use ticketsync_testing::InMemoryTicketStore;
    use ticketsync_testing::helpers::purchase;

    #[derive(Default)]
    struct RecordingNotifier {
        seen: Mutex<Vec<TicketInstanceId>>,
        fail: bool,
    }

    #[async_trait]
    impl TicketNotifier for RecordingNotifier {
        async fn notify(&self, ticket: &TicketInstance) -> Result<(), NotifyError> {
            self.seen.lock().unwrap().push(ticket.id.clone());
            if self.fail {
                return Err(NotifyError::Publish(EventBusError::TransportError(
                    "broker down".to_string(),
                )));
            }
            Ok(())
        }
    }

    fn engine(store: &Arc<InMemoryTicketStore>, notifier: &Arc<RecordingNotifier>) -> IssuanceEngine {
        IssuanceEngine::new(
            store.clone(),
            IdAllocator::new(store.clone()),
            notifier.clone(),
        )
    }

    #[tokio::test]
    async fn lost_insert_race_retries_with_new_id() {
        let store = Arc::new(InMemoryTicketStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        store.force_id_collisions(2);

        let report = engine(&store, &notifier).issue(&purchase("u1", 7, 1)).await.unwrap();
        assert_eq!(report.issued.len(), 1);
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn endless_insert_races_fail_the_unit() {
        let store = Arc::new(InMemoryTicketStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        store.force_id_collisions(100);

        let err = engine(&store, &notifier).issue(&purchase("u1", 7, 2)).await.unwrap_err();
        let IssuanceError::Incomplete { quantity, report } = err else {
            unreachable!("allocation exhaustion makes the batch incomplete");
        };
        assert_eq!(quantity, 2);
        assert_eq!(report.failed_units.len(), 2);
        assert!(store.is_empty());
        assert!(notifier.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn notification_failure_does_not_stop_later_units() {
        let store = Arc::new(InMemoryTicketStore::new());
        let notifier = Arc::new(RecordingNotifier {
            fail: true,
            ..RecordingNotifier::default()
        });

        let report = engine(&store, &notifier).issue(&purchase("u1", 7, 3)).await.unwrap();
        assert_eq!(report.issued.len(), 3);
        assert_eq!(report.notification_failures, 3);
        assert_eq!(store.len(), 3);
        assert_eq!(notifier.seen.lock().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn redelivery_skips_issued_units_without_notifying() {
        let store = Arc::new(InMemoryTicketStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(&store, &notifier);
        let event = purchase("u1", 7, 2);

        engine.issue(&event).await.unwrap();
        let report = engine.issue(&event).await.unwrap();
        assert!(report.issued.is_empty());
        assert_eq!(report.duplicates, 2);
        assert_eq!(store.len(), 2);
        assert_eq!(notifier.seen.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn invalid_events_write_nothing() {
        let store = Arc::new(InMemoryTicketStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        let engine = engine(&store, &notifier);

        let zero = purchase("u1", 7, 0);
        assert_eq!(
            engine.issue(&zero).await,
            Err(IssuanceError::InvalidEvent(InvalidPurchase::ZeroQuantity(0)))
        );

        let mut negative = purchase("u1", 7, 1);
        negative.unit_amount = -5.0;
        assert!(matches!(
            engine.issue(&negative).await,
            Err(IssuanceError::InvalidEvent(InvalidPurchase::InvalidAmount(_)))
        ));
        assert!(store.is_empty());
        assert_eq!(store.exists_calls(), 0);
    }

    #[test]
    fn only_transient_incomplete_batches_are_retryable() {
        let failure = |transient| UnitFailure {
            unit: 0,
            reason: "boom".to_string(),
            transient,
        };
        let incomplete = |failed_units| IssuanceError::Incomplete {
            quantity: 2,
            report: IssuanceReport {
                failed_units,
                ..IssuanceReport::default()
            },
        };

        assert!(incomplete(vec![failure(true), failure(true)]).is_retryable());
        assert!(!incomplete(vec![failure(true), failure(false)]).is_retryable());
        assert!(!IssuanceError::InvalidEvent(InvalidPurchase::ZeroQuantity(0)).is_retryable());
    }

    #[tokio::test]
    async fn rejected_unit_is_not_transient() {
        let store = Arc::new(InMemoryTicketStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        store.limit_buyer_id_width(50);

        let buyer = "x".repeat(51);
        let err = engine(&store, &notifier).issue(&purchase(&buyer, 7, 2)).await.unwrap_err();
        let IssuanceError::Incomplete { report, .. } = &err else {
            unreachable!("a rejected unit makes the batch incomplete");
        };
        assert_eq!(report.failed_units.len(), 2);
        assert!(report.failed_units.iter().all(|f| !f.transient));
        assert!(!err.is_retryable());
        assert!(store.is_empty());
    }

    #[tokio::test]
    async fn outage_is_transient() {
        let store = Arc::new(InMemoryTicketStore::new());
        let notifier = Arc::new(RecordingNotifier::default());
        store.fail_next_inserts(1);

        let err = engine(&store, &notifier).issue(&purchase("u1", 7, 2)).await.unwrap_err();
        assert!(err.is_retryable());
        assert_eq!(store.len(), 1);
    }
}
