//! Ticket-ready notifications.
//!
//! The issuance engine only sees the [`TicketNotifier`] trait. The production
//! implementation, [`NotificationDispatcher`], enriches the ticket with buyer
//! contact data and catalog data and publishes a [`TicketReady`] message.

use crate::events::TicketReady;
use crate::metrics;
use async_trait::async_trait;
use std::sync::Arc;
use thiserror::Error;
use ticketsync_core::catalog::Catalog;
use ticketsync_core::directory::{BuyerDirectory, DirectoryError};
use ticketsync_core::event_bus::{BusMessage, EventBus, EventBusError};
use ticketsync_core::store::StoreError;
use ticketsync_core::ticket::TicketInstance;

/// Why a notification could not be sent.
#[derive(Error, Debug)]
pub enum NotifyError {
    /// Buyer lookup failed.
    #[error("Buyer lookup failed: {0}")]
    Directory(#[from] DirectoryError),

    /// Catalog lookup failed.
    #[error("Catalog lookup failed: {0}")]
    Catalog(#[from] StoreError),

    /// The notification could not be serialized.
    #[error("Failed to encode notification: {0}")]
    Encode(#[from] serde_json::Error),

    /// The broker rejected the publish.
    #[error("Failed to publish notification: {0}")]
    Publish(#[from] EventBusError),
}

/// Receives every freshly committed ticket instance.
#[async_trait]
pub trait TicketNotifier: Send + Sync {
    /// Announce `ticket`. `Ok` also covers deliberately skipped notifications.
    ///
    /// # Errors
    ///
    /// Returns [`NotifyError`] if the notification could not be sent.
    async fn notify(&self, ticket: &TicketInstance) -> Result<(), NotifyError>;
}

/// Publishes [`TicketReady`] messages on the notification topic.
pub struct NotificationDispatcher {
    event_bus: Arc<dyn EventBus>,
    directory: Arc<dyn BuyerDirectory>,
    catalog: Arc<dyn Catalog>,
    topic: String,
}

impl NotificationDispatcher {
    /// Create a dispatcher publishing on `topic`.
    #[must_use]
    pub fn new(
        event_bus: Arc<dyn EventBus>,
        directory: Arc<dyn BuyerDirectory>,
        catalog: Arc<dyn Catalog>,
        topic: impl Into<String>,
    ) -> Self {
        Self {
            event_bus,
            directory,
            catalog,
            topic: topic.into(),
        }
    }

    async fn dispatch(&self, ticket: &TicketInstance) -> Result<bool, NotifyError> {
        let Some(buyer) = self.directory.lookup(&ticket.buyer_id).await? else {
            tracing::warn!(
                ticket_instance_id = %ticket.id,
                buyer_id = %ticket.buyer_id,
                "Buyer not found, skipping notification"
            );
            return Ok(false);
        };

        let Some(product) = self.catalog.product(ticket.product_id).await? else {
            tracing::warn!(
                ticket_instance_id = %ticket.id,
                product_id = %ticket.product_id,
                "Ticket product not found, skipping notification"
            );
            return Ok(false);
        };

        let ready = TicketReady {
            user_name: buyer.name,
            ticket_id: ticket.id.to_string(),
            ticket_name: product.name,
            ticket_price: product.price,
            to_email: buyer.email,
        };
        let payload = serde_json::to_vec(&ready)?;

        self.event_bus
            .publish(
                &self.topic,
                &BusMessage::keyed(ticket.buyer_id.as_str(), payload),
            )
            .await?;

        tracing::info!(
            ticket_instance_id = %ticket.id,
            topic = %self.topic,
            "Ticket-ready notification published"
        );
        Ok(true)
    }
}

#[async_trait]
impl TicketNotifier for NotificationDispatcher {
    async fn notify(&self, ticket: &TicketInstance) -> Result<(), NotifyError> {
        match self.dispatch(ticket).await {
            Ok(true) => {
                metrics::record_notification("sent");
                Ok(())
            },
            Ok(false) => {
                metrics::record_notification("skipped");
                Ok(())
            },
            Err(e) => {
                metrics::record_notification("failed");
                Err(e)
            },
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use ticketsync_core::ticket::{IssuanceKey, TicketInstanceId};
    use ticketsync_testing::helpers::purchase;
    use ticketsync_testing::{InMemoryEventBus, MockBuyerDirectory, MockCatalog};

    const TOPIC: &str = "tickets.notifications";

    fn ticket() -> TicketInstance {
        let event = purchase("u1", 7, 1);
        TicketInstance::issue(
            TicketInstanceId::new("AbCdEf123456"),
            IssuanceKey::for_unit(&event, 0),
            &event,
        )
    }

    fn dispatcher(
        bus: &InMemoryEventBus,
        directory: MockBuyerDirectory,
        catalog: MockCatalog,
    ) -> NotificationDispatcher {
        NotificationDispatcher::new(
            Arc::new(bus.clone()),
            Arc::new(directory),
            Arc::new(catalog),
            TOPIC,
        )
    }

    #[tokio::test]
    async fn publishes_enriched_notification() {
        let bus = InMemoryEventBus::new();
        let dispatcher = dispatcher(
            &bus,
            MockBuyerDirectory::new().with_buyer("u1", "Ada", "ada@example.com"),
            MockCatalog::new().with_product(7, "Home Game", 300.0),
        );

        dispatcher.notify(&ticket()).await.expect("notify");

        let published = bus.published(TOPIC);
        assert_eq!(published.len(), 1);
        assert_eq!(published[0].key.as_deref(), Some("u1"));
        let ready: TicketReady = serde_json::from_slice(&published[0].payload).unwrap();
        assert_eq!(
            ready,
            TicketReady {
                user_name: "Ada".to_string(),
                ticket_id: "AbCdEf123456".to_string(),
                ticket_name: "Home Game".to_string(),
                ticket_price: 300.0,
                to_email: "ada@example.com".to_string(),
            }
        );
    }

    #[tokio::test]
    async fn unknown_buyer_is_skipped() {
        let bus = InMemoryEventBus::new();
        let dispatcher = dispatcher(
            &bus,
            MockBuyerDirectory::new(),
            MockCatalog::new().with_product(7, "Home Game", 300.0),
        );

        dispatcher.notify(&ticket()).await.expect("skip is not an error");
        assert!(bus.published(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn unknown_product_is_skipped() {
        let bus = InMemoryEventBus::new();
        let dispatcher = dispatcher(
            &bus,
            MockBuyerDirectory::new().with_buyer("u1", "Ada", "ada@example.com"),
            MockCatalog::new(),
        );

        dispatcher.notify(&ticket()).await.expect("skip is not an error");
        assert!(bus.published(TOPIC).is_empty());
    }

    #[tokio::test]
    async fn publish_failure_is_reported() {
        let bus = InMemoryEventBus::new();
        bus.fail_publishes(true);
        let dispatcher = dispatcher(
            &bus,
            MockBuyerDirectory::new().with_buyer("u1", "Ada", "ada@example.com"),
            MockCatalog::new().with_product(7, "Home Game", 300.0),
        );

        assert!(matches!(
            dispatcher.notify(&ticket()).await,
            Err(NotifyError::Publish(_))
        ));
    }

    #[tokio::test]
    async fn identity_outage_is_reported() {
        let bus = InMemoryEventBus::new();
        let directory = MockBuyerDirectory::new();
        directory.set_unavailable(true);
        let dispatcher = dispatcher(&bus, directory, MockCatalog::new());

        assert!(matches!(
            dispatcher.notify(&ticket()).await,
            Err(NotifyError::Directory(_))
        ));
    }
}
