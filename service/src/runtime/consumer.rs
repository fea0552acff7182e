//! Event bus consumer with explicit acknowledgment and reconnection.
//!
//! ```text
//! loop {
//!     subscribe (consumer group resumes at last commit)
//!     for each delivery:
//!         decision = handler.handle(..)     // never cancelled
//!         Ack    → commit, next delivery
//!         Retain → leave uncommitted, drop subscription
//!     wait retry_delay, resubscribe         // retained message comes back
//! }
//! ```
//!
//! Shutdown is observed only between deliveries, so the message in flight is
//! always settled before the subscription is released.

use super::EventHandler;
use futures::StreamExt;
use std::sync::Arc;
use std::time::Duration;
use ticketsync_core::event_bus::{AckDecision, DeliveryStream, EventBus};
use tokio::sync::broadcast;
use tracing::{error, info, warn};

/// Default pause before resubscribing.
pub const DEFAULT_RETRY_DELAY: Duration = Duration::from_secs(5);

/// Why a subscription was given up.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum StreamEnd {
    Shutdown,
    Retained,
    Closed,
}

/// Consumes one set of topics with one handler.
pub struct EventConsumer {
    /// Consumer name (for logging)
    name: String,

    /// Topics to subscribe to
    topics: Vec<String>,

    /// Event bus to consume from
    event_bus: Arc<dyn EventBus>,

    /// Decides ack or retain for each delivery
    handler: Arc<dyn EventHandler>,

    /// Shutdown signal receiver
    shutdown: broadcast::Receiver<()>,

    /// Pause before resubscribing
    retry_delay: Duration,
}

impl EventConsumer {
    /// Create a consumer with the default retry delay.
    #[must_use]
    pub fn new(
        name: impl Into<String>,
        topics: Vec<String>,
        event_bus: Arc<dyn EventBus>,
        handler: Arc<dyn EventHandler>,
        shutdown: broadcast::Receiver<()>,
    ) -> Self {
        Self {
            name: name.into(),
            topics,
            event_bus,
            handler,
            shutdown,
            retry_delay: DEFAULT_RETRY_DELAY,
        }
    }

    /// Set the pause before resubscribing.
    #[must_use]
    pub const fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Consumer name.
    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    /// Run the consumer on a background task until shutdown.
    #[must_use]
    pub fn spawn(mut self) -> tokio::task::JoinHandle<()> {
        tokio::spawn(async move {
            self.run().await;
        })
    }

    async fn run(&mut self) {
        info!(consumer = %self.name, topics = ?self.topics, "Event consumer started");

        loop {
            let topics: Vec<&str> = self.topics.iter().map(String::as_str).collect();

            let subscribed = tokio::select! {
                _ = self.shutdown.recv() => break,
                result = self.event_bus.subscribe(&topics) => result,
            };

            match subscribed {
                Ok(stream) => {
                    info!(consumer = %self.name, "Subscribed to event bus");
                    match self.process_stream(stream).await {
                        StreamEnd::Shutdown => break,
                        StreamEnd::Retained => warn!(
                            consumer = %self.name,
                            retry_delay = ?self.retry_delay,
                            "Message left unacknowledged, resubscribing for redelivery"
                        ),
                        StreamEnd::Closed => warn!(
                            consumer = %self.name,
                            retry_delay = ?self.retry_delay,
                            "Event stream ended, resubscribing"
                        ),
                    }
                },
                Err(e) => {
                    error!(
                        consumer = %self.name,
                        error = %e,
                        retry_delay = ?self.retry_delay,
                        "Failed to subscribe to event bus"
                    );
                },
            }

            tokio::select! {
                _ = self.shutdown.recv() => break,
                () = tokio::time::sleep(self.retry_delay) => {},
            }
        }

        info!(consumer = %self.name, "Event consumer stopped");
    }

    async fn process_stream(&mut self, mut stream: DeliveryStream) -> StreamEnd {
        loop {
            let next = tokio::select! {
                biased;
                _ = self.shutdown.recv() => return StreamEnd::Shutdown,
                next = stream.next() => next,
            };

            let delivery = match next {
                Some(Ok(delivery)) => delivery,
                Some(Err(e)) => {
                    error!(consumer = %self.name, error = %e, "Error receiving from event stream");
                    return StreamEnd::Closed;
                },
                None => return StreamEnd::Closed,
            };

            // Runs to completion even if shutdown arrives meanwhile
            let decision = self
                .handler
                .handle(delivery.topic(), delivery.payload())
                .await;

            match decision {
                AckDecision::Ack => delivery.ack(),
                AckDecision::Retain => {
                    delivery.retain();
                    return StreamEnd::Retained;
                },
            }
        }
    }
}
