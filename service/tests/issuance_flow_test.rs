//! End-to-end issuance through the payment consumer, over in-memory
//! collaborators.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use chrono::{TimeZone, Utc};
use serde_json::json;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use ticketsync_core::ticket::{BuyerId, ProductId};
use ticketsync_service::events::TicketReady;
use ticketsync_service::{Collaborators, Config, Services};
use ticketsync_testing::helpers::init_tracing;
use ticketsync_testing::{
    InMemoryDeadLetterSink, InMemoryEventBus, InMemoryTicketStore, MockBuyerDirectory,
    MockCatalog, test_clock,
};
use tokio::sync::broadcast;
use tokio::task::JoinHandle;

struct Harness {
    config: Config,
    bus: InMemoryEventBus,
    store: Arc<InMemoryTicketStore>,
    dead_letters: InMemoryDeadLetterSink,
    shutdown: broadcast::Sender<()>,
    consumer: JoinHandle<()>,
}

impl Harness {
    fn start() -> Self {
        init_tracing();
        let mut config = Config::from_env();
        config.issuance.max_retries = 0;
        config.redpanda.reconnect_delay = 1;

        let bus = InMemoryEventBus::new();
        let store = Arc::new(InMemoryTicketStore::new());
        let dead_letters = InMemoryDeadLetterSink::new();

        let services = Services::wire(
            Collaborators {
                store: store.clone(),
                catalog: Arc::new(MockCatalog::new().with_product(7, "Home Game", 300.0)),
                dead_letters: Arc::new(dead_letters.clone()),
                event_bus: Arc::new(bus.clone()),
                directory: Arc::new(
                    MockBuyerDirectory::new().with_buyer("u1", "Ada", "ada@example.com"),
                ),
                clock: Arc::new(test_clock()),
            },
            &config,
        );

        let (shutdown, _) = broadcast::channel(1);
        let consumer = services
            .payment_consumer(Arc::new(bus.clone()), shutdown.subscribe(), &config)
            .spawn();

        Self {
            config,
            bus,
            store,
            dead_letters,
            shutdown,
            consumer,
        }
    }

    fn payments(&self) -> &str {
        &self.config.redpanda.payment_topic
    }

    fn notifications(&self) -> Vec<TicketReady> {
        self.bus
            .published(&self.config.redpanda.notification_topic)
            .iter()
            .map(|m| serde_json::from_slice(&m.payload).unwrap())
            .collect()
    }

    fn publish(&self, body: &serde_json::Value) {
        self.bus.inject(self.payments(), body.to_string().into_bytes());
    }

    async fn until_committed(&self, count: usize) {
        let topic = self.payments().to_string();
        tokio::time::timeout(Duration::from_secs(5), async {
            while self.bus.committed(&topic) < count {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await
        .expect("messages were not acknowledged in time");
    }

    async fn stop(self) {
        self.shutdown.send(()).unwrap();
        self.consumer.await.unwrap();
    }
}

fn checkout(quantity: u32) -> serde_json::Value {
    json!({
        "event": "checkout.session.completed",
        "user_id": "u1",
        "ticket_id": 7,
        "quantity": quantity,
        "unit_amount": 300.0,
        "created_at": "2023-10-01T12:00:00"
    })
}

#[tokio::test]
async fn three_units_become_three_instances_and_notifications() {
    let harness = Harness::start();
    harness.publish(&checkout(3));
    harness.until_committed(1).await;

    let tickets = harness.store.all();
    assert_eq!(tickets.len(), 3);
    let purchased_at = Utc.with_ymd_and_hms(2023, 10, 1, 12, 0, 0).unwrap();
    for ticket in &tickets {
        assert_eq!(ticket.buyer_id, BuyerId::new("u1"));
        assert_eq!(ticket.product_id, ProductId::new(7));
        assert!((ticket.unit_amount - 300.0).abs() < f64::EPSILON);
        assert_eq!(ticket.issued_at, purchased_at);
        assert!(ticket.is_active);
        assert!(ticket.deactivated_at.is_none());
        assert!(ticket.id.is_well_formed());
    }
    let ids: HashSet<_> = tickets.iter().map(|t| t.id.to_string()).collect();
    assert_eq!(ids.len(), 3);

    let notifications = harness.notifications();
    assert_eq!(notifications.len(), 3);
    let notified: HashSet<_> = notifications.iter().map(|n| n.ticket_id.clone()).collect();
    assert_eq!(notified, ids);
    for notification in &notifications {
        assert_eq!(notification.user_name, "Ada");
        assert_eq!(notification.to_email, "ada@example.com");
        assert_eq!(notification.ticket_name, "Home Game");
    }

    harness.stop().await;
}

#[tokio::test]
async fn redelivered_event_issues_nothing_new() {
    let harness = Harness::start();
    harness.publish(&checkout(2));
    harness.publish(&checkout(2));
    harness.until_committed(2).await;

    assert_eq!(harness.store.len(), 2);
    assert_eq!(harness.notifications().len(), 2);

    harness.stop().await;
}

#[tokio::test]
async fn other_events_are_acknowledged_without_issuing() {
    let harness = Harness::start();
    harness.publish(&json!({"event": "payment_intent.created", "id": "pi_1"}));
    harness.publish(&checkout(1));
    harness.until_committed(2).await;

    assert_eq!(harness.store.len(), 1);
    assert!(harness.dead_letters.messages().is_empty());

    harness.stop().await;
}

#[tokio::test]
async fn malformed_payload_is_acknowledged_and_dead_lettered() {
    let harness = Harness::start();
    harness.bus.inject(harness.payments(), b"\x00not json".to_vec());
    harness.publish(&json!({
        "event": "checkout.session.completed",
        "user_id": "u1",
        "ticket_id": 7,
        "quantity": 1,
        "unit_amount": 300.0,
        "created_at": "yesterday"
    }));
    harness.until_committed(2).await;

    assert!(harness.store.is_empty());
    let rejected = harness.dead_letters.messages();
    assert_eq!(rejected.len(), 2);
    assert!(rejected.iter().all(|r| r.topic == harness.payments()));

    harness.stop().await;
}

#[tokio::test]
async fn incomplete_batch_stays_unacknowledged_until_store_recovers() {
    let harness = Harness::start();
    harness.store.set_unavailable(true);
    harness.publish(&checkout(2));

    tokio::time::timeout(Duration::from_secs(5), async {
        while harness.store.exists_calls() == 0 {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("consumer never attempted issuance");
    assert_eq!(harness.bus.committed(harness.payments()), 0);
    assert_eq!(harness.bus.pending(harness.payments()), 1);

    harness.store.set_unavailable(false);
    harness.until_committed(1).await;
    assert_eq!(harness.store.len(), 2);
    assert!(harness.bus.subscriptions() >= 2);

    harness.stop().await;
}
