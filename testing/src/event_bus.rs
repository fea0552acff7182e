//! In-memory event bus with broker-like acknowledgment.
//!
//! Every topic is an append-only log. A single committed offset per topic
//! plays the role of the consumer group: `ack` advances it, `retain` (or
//! dropping the delivery) ends the subscription, and the next `subscribe`
//! starts again from the committed offset.

#![allow(clippy::unwrap_used)] // Test infrastructure uses unwrap for simplicity
#![allow(clippy::missing_panics_doc)]

use futures::StreamExt;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use ticketsync_core::event_bus::{
    AckDecision, BusFuture, BusMessage, Delivery, DeliveryStream, EventBus, EventBusError,
};
use tokio::sync::{Notify, mpsc, oneshot};

#[derive(Default)]
struct BusState {
    logs: HashMap<String, Vec<BusMessage>>,
    committed: HashMap<String, usize>,
    declared: Vec<String>,
    fail_publishes: bool,
    fail_subscribes: bool,
    subscriptions: usize,
}

/// In-memory [`EventBus`] for tests.
///
/// # Example
///
/// ```
/// use ticketsync_testing::InMemoryEventBus;
/// use ticketsync_core::event_bus::{BusMessage, EventBus};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = InMemoryEventBus::new();
/// bus.publish("tickets.notifications", &BusMessage::keyed("u1", b"{}".to_vec())).await?;
/// assert_eq!(bus.published("tickets.notifications").len(), 1);
/// # Ok(())
/// # }
/// ```
#[derive(Clone, Default)]
pub struct InMemoryEventBus {
    state: Arc<Mutex<BusState>>,
    notify: Arc<Notify>,
}

impl InMemoryEventBus {
    /// Create an empty bus.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a raw message without going through the async trait.
    pub fn inject(&self, topic: &str, payload: impl Into<Vec<u8>>) {
        self.append(
            topic,
            BusMessage {
                key: None,
                payload: payload.into(),
            },
        );
    }

    /// Every message ever published to `topic`, committed or not.
    #[must_use]
    pub fn published(&self, topic: &str) -> Vec<BusMessage> {
        self.state
            .lock()
            .unwrap()
            .logs
            .get(topic)
            .cloned()
            .unwrap_or_default()
    }

    /// Committed offset of `topic`.
    #[must_use]
    pub fn committed(&self, topic: &str) -> usize {
        self.state
            .lock()
            .unwrap()
            .committed
            .get(topic)
            .copied()
            .unwrap_or(0)
    }

    /// Messages on `topic` not yet acknowledged.
    #[must_use]
    pub fn pending(&self, topic: &str) -> usize {
        let state = self.state.lock().unwrap();
        let len = state.logs.get(topic).map_or(0, Vec::len);
        len - state.committed.get(topic).copied().unwrap_or(0)
    }

    /// Topics declared so far, in order.
    #[must_use]
    pub fn declared(&self) -> Vec<String> {
        self.state.lock().unwrap().declared.clone()
    }

    /// Number of successful `subscribe` calls.
    #[must_use]
    pub fn subscriptions(&self) -> usize {
        self.state.lock().unwrap().subscriptions
    }

    /// Make `publish` fail until reset.
    pub fn fail_publishes(&self, fail: bool) {
        self.state.lock().unwrap().fail_publishes = fail;
    }

    /// Make `subscribe` fail until reset.
    pub fn fail_subscribes(&self, fail: bool) {
        self.state.lock().unwrap().fail_subscribes = fail;
    }

    fn append(&self, topic: &str, message: BusMessage) {
        self.state
            .lock()
            .unwrap()
            .logs
            .entry(topic.to_string())
            .or_default()
            .push(message);
        self.notify.notify_waiters();
    }

    /// Next uncommitted message on any of `topics`, scanning in order.
    fn next_from(
        &self,
        topics: &[String],
        cursors: &HashMap<String, usize>,
    ) -> Option<(String, usize, BusMessage)> {
        let state = self.state.lock().unwrap();
        topics.iter().find_map(|topic| {
            let offset = cursors.get(topic).copied().unwrap_or(0);
            state
                .logs
                .get(topic)
                .and_then(|log| log.get(offset))
                .map(|message| (topic.clone(), offset, message.clone()))
        })
    }

    fn commit(&self, topic: &str, offset: usize) {
        self.state
            .lock()
            .unwrap()
            .committed
            .insert(topic.to_string(), offset + 1);
    }
}

impl EventBus for InMemoryEventBus {
    fn declare_topics(&self, topics: &[&str]) -> BusFuture<'_, ()> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        Box::pin(async move {
            let mut state = self.state.lock().unwrap();
            for topic in topics {
                state.logs.entry(topic.clone()).or_default();
                if !state.declared.contains(&topic) {
                    state.declared.push(topic);
                }
            }
            Ok(())
        })
    }

    fn publish(&self, topic: &str, message: &BusMessage) -> BusFuture<'_, ()> {
        let topic = topic.to_string();
        let message = message.clone();
        Box::pin(async move {
            if self.state.lock().unwrap().fail_publishes {
                return Err(EventBusError::PublishFailed {
                    topic,
                    reason: "injected failure".to_string(),
                });
            }
            self.append(&topic, message);
            Ok(())
        })
    }

    fn subscribe(&self, topics: &[&str]) -> BusFuture<'_, DeliveryStream> {
        let topics: Vec<String> = topics.iter().map(|t| (*t).to_string()).collect();
        Box::pin(async move {
            let mut cursors = {
                let mut state = self.state.lock().unwrap();
                if state.fail_subscribes {
                    return Err(EventBusError::SubscriptionFailed {
                        topics: topics.clone(),
                        reason: "injected failure".to_string(),
                    });
                }
                state.subscriptions += 1;
                topics
                    .iter()
                    .map(|t| (t.clone(), state.committed.get(t).copied().unwrap_or(0)))
                    .collect::<HashMap<_, _>>()
            };

            let (tx, rx) = mpsc::channel::<Result<Delivery, EventBusError>>(1);
            let bus = self.clone();

            // Settlement is awaited here, not in the stream, so an ack is
            // committed even if the stream is dropped right after.
            tokio::spawn(async move {
                loop {
                    let notified = bus.notify.notified();
                    let Some((topic, offset, message)) = bus.next_from(&topics, &cursors) else {
                        tokio::select! {
                            () = notified => {},
                            () = tx.closed() => return,
                        }
                        continue;
                    };

                    let (settle_tx, settle_rx) = oneshot::channel();
                    let delivery =
                        Delivery::new(topic.clone(), message.key, message.payload, settle_tx);
                    if tx.send(Ok(delivery)).await.is_err() {
                        return;
                    }

                    match settle_rx.await {
                        Ok(AckDecision::Ack) => {
                            bus.commit(&topic, offset);
                            cursors.insert(topic, offset + 1);
                        },
                        Ok(AckDecision::Retain) | Err(_) => return,
                    }
                }
            });

            Ok(into_stream(rx))
        })
    }
}

fn into_stream(mut rx: mpsc::Receiver<Result<Delivery, EventBusError>>) -> DeliveryStream {
    async_stream::stream! {
        while let Some(item) = rx.recv().await {
            yield item;
        }
    }
    .boxed()
}
