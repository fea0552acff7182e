//! Redemption through the service graph and over HTTP.

#![allow(clippy::unwrap_used, clippy::expect_used)]

use axum::http::StatusCode;
use axum_test::TestServer;
use serde_json::Value;
use std::sync::Arc;
use ticketsync_core::ticket::TicketInstanceId;
use ticketsync_service::{Collaborators, Config, RedemptionError, Services};
use ticketsync_testing::helpers::purchase;
use ticketsync_testing::{
    InMemoryDeadLetterSink, InMemoryEventBus, InMemoryTicketStore, MockBuyerDirectory,
    MockCatalog, test_clock,
};

fn services(store: &Arc<InMemoryTicketStore>) -> Services {
    Services::wire(
        Collaborators {
            store: store.clone(),
            catalog: Arc::new(MockCatalog::new()),
            dead_letters: Arc::new(InMemoryDeadLetterSink::new()),
            event_bus: Arc::new(InMemoryEventBus::new()),
            directory: Arc::new(MockBuyerDirectory::new()),
            clock: Arc::new(test_clock()),
        },
        &Config::from_env(),
    )
}

async fn issue_one(services: &Services) -> TicketInstanceId {
    let report = services.engine.issue(&purchase("u1", 7, 1)).await.unwrap();
    report.issued[0].clone()
}

#[tokio::test]
async fn redeem_twice_then_already_redeemed() {
    let store = Arc::new(InMemoryTicketStore::new());
    let services = services(&store);
    let id = issue_one(&services).await;

    let redeemed = services.redemption.redeem(&id).await.unwrap();
    assert!(!redeemed.is_active);
    let first_deactivation = redeemed.deactivated_at;

    assert_eq!(
        services.redemption.redeem(&id).await,
        Err(RedemptionError::AlreadyRedeemed(id.clone()))
    );
    let stored = store.all().pop().unwrap();
    assert_eq!(stored.deactivated_at, first_deactivation);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_redemptions_have_one_winner() {
    let store = Arc::new(InMemoryTicketStore::new());
    let services = services(&store);
    let id = issue_one(&services).await;

    let attempts: Vec<_> = (0..16)
        .map(|_| {
            let redemption = services.redemption.clone();
            let id = id.clone();
            tokio::spawn(async move { redemption.redeem(&id).await })
        })
        .collect();

    let mut winners = 0;
    for attempt in attempts {
        match attempt.await.unwrap() {
            Ok(_) => winners += 1,
            Err(e) => assert_eq!(e, RedemptionError::AlreadyRedeemed(id.clone())),
        }
    }
    assert_eq!(winners, 1);
}

#[tokio::test]
async fn unknown_id_changes_nothing() {
    let store = Arc::new(InMemoryTicketStore::new());
    let services = services(&store);
    issue_one(&services).await;

    let unknown = TicketInstanceId::new("Unknown00000");
    assert_eq!(
        services.redemption.redeem(&unknown).await,
        Err(RedemptionError::NotFound(unknown))
    );
    assert!(store.all().iter().all(|t| t.is_active));
}

#[tokio::test]
async fn validate_endpoint_round_trip() {
    let store = Arc::new(InMemoryTicketStore::new());
    let services = services(&store);
    let id = issue_one(&services).await;
    let server = TestServer::new(services.router()).unwrap();

    let listed: Vec<Value> = server.get("/tickets/v1/users/u1/instances").await.json();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0]["id"], id.as_str());

    let path = format!("/tickets/v1/instances/{id}/validate");
    let response = server.post(&path).await;
    response.assert_status_ok();
    let body: Value = response.json();
    assert_eq!(body["is_active"], false);
    assert_eq!(body["deactivated_at"], "2025-01-01T00:00:00Z");
    assert!(body.get("issuance_key").is_none());

    let again = server.post(&path).await;
    again.assert_status(StatusCode::BAD_REQUEST);
    let body: Value = again.json();
    assert_eq!(body["code"], "TICKET_ALREADY_REDEEMED");
    assert!(body["message"].as_str().unwrap().contains(id.as_str()));

    let fetched: Value = server.get(&format!("/tickets/v1/instances/{id}")).await.json();
    assert_eq!(fetched["is_active"], false);
}
