//! Redpanda event bus for TicketSync.
//!
//! This crate implements the [`EventBus`] trait from `ticketsync-core` on top of
//! rdkafka, so it works against Redpanda, Apache Kafka, or any other
//! Kafka-compatible broker.
//!
//! # Topology
//!
//! The issuance service uses two durable topics:
//!
//! ```text
//! ┌──────────────┐  tickets.payments   ┌──────────────────┐
//! │ payment svc  │ ──────────────────► │ issuance service │  (consumer group
//! └──────────────┘                     └────────┬─────────┘   = durable queue)
//!                                               │ tickets.notifications
//!                                               ▼
//!                                        ┌────────────┐
//!                                        │   mailer   │
//!                                        └────────────┘
//! ```
//!
//! [`EventBus::declare_topics`] creates missing topics at startup.
//!
//! # Delivery Semantics
//!
//! **At-least-once with handler-driven commits**:
//! - A subscription hands out one [`Delivery`] at a time and waits for it to
//!   be settled before polling the next message
//! - `ack` commits the offset synchronously
//! - `retain` (or dropping the delivery) stops the subscription WITHOUT
//!   committing; the next subscription of the same consumer group restarts
//!   from the last committed offset, which redelivers the message
//!
//! # Example
//!
//! ```no_run
//! use ticketsync_redpanda::RedpandaEventBus;
//! use ticketsync_core::event_bus::{BusMessage, EventBus};
//! use futures::StreamExt;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let bus = RedpandaEventBus::builder()
//!     .brokers("localhost:9092")
//!     .consumer_group("tickets-issuance")
//!     .build()?;
//!
//! bus.declare_topics(&["tickets.payments"]).await?;
//! bus.publish("tickets.payments", &BusMessage::keyed("u1", b"{}".to_vec())).await?;
//!
//! let mut stream = bus.subscribe(&["tickets.payments"]).await?;
//! while let Some(result) = stream.next().await {
//!     match result {
//!         Ok(delivery) => delivery.ack(),
//!         Err(e) => eprintln!("Error: {e}"),
//!     }
//! }
//! # Ok(())
//! # }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs)]

use rdkafka::admin::{AdminClient, AdminOptions, NewTopic, TopicReplication};
use rdkafka::client::DefaultClientContext;
use rdkafka::config::ClientConfig;
use rdkafka::consumer::{CommitMode, Consumer, StreamConsumer};
use rdkafka::error::RDKafkaErrorCode;
use rdkafka::message::Message;
use rdkafka::producer::{FutureProducer, FutureRecord};
use rdkafka::util::Timeout;
use std::time::Duration;
use ticketsync_core::event_bus::{
    AckDecision, BusFuture, BusMessage, Delivery, DeliveryStream, EventBus, EventBusError,
};
use tokio::sync::{mpsc, oneshot};

/// SASL credentials for authenticated clusters.
#[derive(Clone, Debug)]
struct SaslCredentials {
    mechanism: String,
    username: String,
    password: String,
}

/// Redpanda event bus implementation.
///
/// Built once at process start and shared as `Arc<dyn EventBus>` between the
/// payment consumer and the notification dispatcher.
///
/// # Configuration
///
/// - **Broker addresses**: Bootstrap servers (required)
/// - **Producer settings**: Acks, compression, timeout
/// - **Consumer group**: The durable queue name; instances sharing it split
///   the partitions between them
/// - **Offset reset**: Where a brand new group starts reading (default: "earliest")
/// - **Topic declaration**: Partitions and replication for created topics
/// - **Security**: Protocol plus optional SASL credentials
pub struct RedpandaEventBus {
    /// Kafka producer for publishing messages
    producer: FutureProducer,
    /// Admin client for topic declaration
    admin: AdminClient<DefaultClientContext>,
    /// Shared client settings (brokers + security) reused for consumers
    client_config: ClientConfig,
    /// Broker addresses
    brokers: String,
    /// Producer timeout
    timeout: Duration,
    /// Consumer group ID (if explicitly set)
    consumer_group: Option<String>,
    /// Auto offset reset policy
    auto_offset_reset: String,
    /// Consumer session timeout
    session_timeout_ms: u32,
    /// Partitions for declared topics
    topic_partitions: i32,
    /// Replication factor for declared topics
    replication_factor: i32,
}

impl RedpandaEventBus {
    /// Create a new Redpanda event bus with default configuration.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if the clients cannot be
    /// created from the given broker list.
    pub fn new(brokers: &str) -> Result<Self, EventBusError> {
        Self::builder().brokers(brokers).build()
    }

    /// Create a new builder for configuring the event bus.
    #[must_use]
    pub fn builder() -> RedpandaEventBusBuilder {
        RedpandaEventBusBuilder::default()
    }

    /// Get a reference to the brokers string.
    #[must_use]
    pub fn brokers(&self) -> &str {
        &self.brokers
    }

    /// Flush queued producer messages, waiting at most `timeout`.
    ///
    /// Called during shutdown so notifications accepted by `publish` are not
    /// lost when the process exits.
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::TransportError`] if the flush times out.
    pub fn flush(&self, timeout: Duration) -> Result<(), EventBusError> {
        use rdkafka::producer::Producer;

        self.producer
            .flush(Timeout::After(timeout))
            .map_err(|e| EventBusError::TransportError(format!("Producer flush failed: {e}")))
    }

    fn consumer_group_for(&self, topics: &[String]) -> String {
        self.consumer_group.clone().unwrap_or_else(|| {
            // Sort topics for deterministic consumer group naming
            let mut sorted = topics.to_vec();
            sorted.sort();
            format!("ticketsync-{}", sorted.join("-"))
        })
    }
}

/// Builder for configuring a [`RedpandaEventBus`].
///
/// # Example
///
/// ```no_run
/// use ticketsync_redpanda::RedpandaEventBus;
/// use std::time::Duration;
///
/// # fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let bus = RedpandaEventBus::builder()
///     .brokers("localhost:9092,localhost:9093")
///     .producer_acks("all")
///     .compression("lz4")
///     .timeout(Duration::from_secs(10))
///     .consumer_group("tickets-issuance")
///     .build()?;
/// # Ok(())
/// # }
/// ```
#[derive(Default)]
pub struct RedpandaEventBusBuilder {
    brokers: Option<String>,
    producer_acks: Option<String>,
    compression: Option<String>,
    timeout: Option<Duration>,
    consumer_group: Option<String>,
    auto_offset_reset: Option<String>,
    session_timeout_ms: Option<u32>,
    security_protocol: Option<String>,
    sasl: Option<SaslCredentials>,
    ssl_ca_location: Option<String>,
    topic_partitions: Option<i32>,
    replication_factor: Option<i32>,
}

impl RedpandaEventBusBuilder {
    /// Set the broker addresses (comma-separated).
    #[must_use]
    pub fn brokers(mut self, brokers: impl Into<String>) -> Self {
        self.brokers = Some(brokers.into());
        self
    }

    /// Set the producer acknowledgment mode: "0", "1" or "all".
    ///
    /// Default: "all"
    #[must_use]
    pub fn producer_acks(mut self, acks: impl Into<String>) -> Self {
        self.producer_acks = Some(acks.into());
        self
    }

    /// Set the compression codec: "none", "gzip", "snappy", "lz4", "zstd".
    ///
    /// Default: "none"
    #[must_use]
    pub fn compression(mut self, compression: impl Into<String>) -> Self {
        self.compression = Some(compression.into());
        self
    }

    /// Set the producer send timeout.
    ///
    /// Default: 5 seconds
    #[must_use]
    pub const fn timeout(mut self, timeout: Duration) -> Self {
        self.timeout = Some(timeout);
        self
    }

    /// Set the consumer group ID (the durable queue name).
    ///
    /// If not set, the group is derived from the subscribed topics.
    #[must_use]
    pub fn consumer_group(mut self, consumer_group: impl Into<String>) -> Self {
        self.consumer_group = Some(consumer_group.into());
        self
    }

    /// Set where a new consumer group starts: "earliest", "latest" or "error".
    ///
    /// Default: "earliest", so payments published before the first deploy
    /// are still issued.
    #[must_use]
    pub fn auto_offset_reset(mut self, policy: impl Into<String>) -> Self {
        self.auto_offset_reset = Some(policy.into());
        self
    }

    /// Set the consumer session timeout in milliseconds.
    ///
    /// Default: 45000
    #[must_use]
    pub const fn session_timeout_ms(mut self, timeout_ms: u32) -> Self {
        self.session_timeout_ms = Some(timeout_ms);
        self
    }

    /// Set the security protocol: plaintext, ssl, `sasl_plaintext`, `sasl_ssl`.
    #[must_use]
    pub fn security_protocol(mut self, protocol: impl Into<String>) -> Self {
        self.security_protocol = Some(protocol.into());
        self
    }

    /// Set SASL credentials.
    #[must_use]
    pub fn sasl(
        mut self,
        mechanism: impl Into<String>,
        username: impl Into<String>,
        password: impl Into<String>,
    ) -> Self {
        self.sasl = Some(SaslCredentials {
            mechanism: mechanism.into(),
            username: username.into(),
            password: password.into(),
        });
        self
    }

    /// Set the CA certificate used for SSL connections.
    #[must_use]
    pub fn ssl_ca_location(mut self, path: impl Into<String>) -> Self {
        self.ssl_ca_location = Some(path.into());
        self
    }

    /// Set the partition count and replication factor of declared topics.
    ///
    /// Default: 3 partitions, replication 1
    #[must_use]
    pub const fn topic_layout(mut self, partitions: i32, replication_factor: i32) -> Self {
        self.topic_partitions = Some(partitions);
        self.replication_factor = Some(replication_factor);
        self
    }

    /// Build the [`RedpandaEventBus`].
    ///
    /// # Errors
    ///
    /// Returns [`EventBusError::ConnectionFailed`] if:
    /// - Brokers not set
    /// - Cannot create producer or admin client
    /// - Invalid configuration
    pub fn build(self) -> Result<RedpandaEventBus, EventBusError> {
        let brokers = self.brokers.ok_or_else(|| {
            EventBusError::ConnectionFailed("Brokers not configured".to_string())
        })?;

        // Settings shared by producer, admin and consumers
        let mut client_config = ClientConfig::new();
        client_config.set("bootstrap.servers", &brokers);
        if let Some(protocol) = &self.security_protocol {
            client_config.set("security.protocol", protocol);
        }
        if let Some(sasl) = &self.sasl {
            client_config
                .set("sasl.mechanism", &sasl.mechanism)
                .set("sasl.username", &sasl.username)
                .set("sasl.password", &sasl.password);
        }
        if let Some(ca) = &self.ssl_ca_location {
            client_config.set("ssl.ca.location", ca);
        }

        let acks = self.producer_acks.as_deref().unwrap_or("all");
        let compression = self.compression.as_deref().unwrap_or("none");

        let producer: FutureProducer = client_config
            .clone()
            .set("message.timeout.ms", "5000")
            .set("acks", acks)
            .set("compression.type", compression)
            .create()
            .map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create producer: {e}"))
            })?;

        let admin: AdminClient<DefaultClientContext> =
            client_config.create().map_err(|e| {
                EventBusError::ConnectionFailed(format!("Failed to create admin client: {e}"))
            })?;

        let auto_offset_reset = self
            .auto_offset_reset
            .unwrap_or_else(|| "earliest".to_string());

        tracing::info!(
            brokers = %brokers,
            acks,
            compression,
            consumer_group = ?self.consumer_group,
            auto_offset_reset = %auto_offset_reset,
            "RedpandaEventBus created successfully"
        );

        Ok(RedpandaEventBus {
            producer,
            admin,
            client_config,
            brokers,
            timeout: self.timeout.unwrap_or(Duration::from_secs(5)),
            consumer_group: self.consumer_group,
            auto_offset_reset,
            session_timeout_ms: self.session_timeout_ms.unwrap_or(45_000),
            topic_partitions: self.topic_partitions.unwrap_or(3),
            replication_factor: self.replication_factor.unwrap_or(1),
        })
    }
}

impl EventBus for RedpandaEventBus {
    fn declare_topics(&self, topics: &[&str]) -> BusFuture<'_, ()> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();

        Box::pin(async move {
            let new_topics: Vec<NewTopic<'_>> = topics
                .iter()
                .map(|name| {
                    NewTopic::new(
                        name,
                        self.topic_partitions,
                        TopicReplication::Fixed(self.replication_factor),
                    )
                })
                .collect();

            let options = AdminOptions::new().operation_timeout(Some(Timeout::After(self.timeout)));

            let results = self
                .admin
                .create_topics(&new_topics, &options)
                .await
                .map_err(|e| EventBusError::DeclarationFailed {
                    topic: topics.join(","),
                    reason: e.to_string(),
                })?;

            for result in results {
                match result {
                    Ok(topic) => tracing::info!(topic = %topic, "Topic created"),
                    Err((topic, RDKafkaErrorCode::TopicAlreadyExists)) => {
                        tracing::debug!(topic = %topic, "Topic already exists");
                    },
                    Err((topic, code)) => {
                        return Err(EventBusError::DeclarationFailed {
                            topic,
                            reason: code.to_string(),
                        });
                    },
                }
            }

            Ok(())
        })
    }

    fn publish(&self, topic: &str, message: &BusMessage) -> BusFuture<'_, ()> {
        let topic = topic.to_string();
        let message = message.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let mut record = FutureRecord::to(&topic).payload(&message.payload);
            if let Some(key) = &message.key {
                record = record.key(key);
            }

            match self.producer.send(record, Timeout::After(timeout)).await {
                Ok((partition, offset)) => {
                    tracing::debug!(
                        topic = %topic,
                        partition,
                        offset,
                        key = ?message.key,
                        "Message published"
                    );
                    Ok(())
                },
                Err((kafka_error, _)) => {
                    tracing::error!(
                        topic = %topic,
                        error = %kafka_error,
                        "Failed to publish message"
                    );
                    Err(EventBusError::PublishFailed {
                        topic,
                        reason: kafka_error.to_string(),
                    })
                },
            }
        })
    }

    #[allow(clippy::too_many_lines)] // Poll, hand off, await settlement, commit
    fn subscribe(&self, topics: &[&str]) -> BusFuture<'_, DeliveryStream> {
        let topics: Vec<String> = topics.iter().map(|s| (*s).to_string()).collect();
        let consumer_group_id = self.consumer_group_for(&topics);

        Box::pin(async move {
            // Manual commit: offsets only move when the handler acks
            let consumer: StreamConsumer = self
                .client_config
                .clone()
                .set("group.id", &consumer_group_id)
                .set("enable.auto.commit", "false")
                .set("auto.offset.reset", &self.auto_offset_reset)
                .set("session.timeout.ms", self.session_timeout_ms.to_string())
                .set("enable.partition.eof", "false")
                .create()
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to create consumer: {e}"),
                })?;

            let topic_refs: Vec<&str> = topics.iter().map(String::as_str).collect();
            consumer
                .subscribe(&topic_refs)
                .map_err(|e| EventBusError::SubscriptionFailed {
                    topics: topics.clone(),
                    reason: format!("Failed to subscribe to topics: {e}"),
                })?;

            tracing::info!(
                topics = ?topics,
                consumer_group = %consumer_group_id,
                auto_offset_reset = %self.auto_offset_reset,
                "Subscribed to topics"
            );

            // Capacity 1: at most one unsettled delivery in flight
            let (tx, rx) = mpsc::channel(1);

            tokio::spawn(async move {
                use futures::StreamExt;

                let mut stream = consumer.stream();

                while let Some(msg_result) = stream.next().await {
                    let message = match msg_result {
                        Ok(message) => message,
                        Err(e) => {
                            let err = EventBusError::TransportError(format!(
                                "Failed to receive message: {e}"
                            ));
                            if tx.send(Err(err)).await.is_err() {
                                break; // Receiver dropped
                            }
                            continue;
                        },
                    };

                    let key = message
                        .key()
                        .map(|k| String::from_utf8_lossy(k).into_owned());
                    let payload = message.payload().map(<[u8]>::to_vec).unwrap_or_default();

                    tracing::trace!(
                        topic = message.topic(),
                        partition = message.partition(),
                        offset = message.offset(),
                        "Received message"
                    );

                    let (settle_tx, settle_rx) = oneshot::channel();
                    let delivery = Delivery::new(message.topic(), key, payload, settle_tx);

                    if tx.send(Ok(delivery)).await.is_err() {
                        tracing::debug!("Subscriber dropped, exiting consumer task");
                        break; // Exit WITHOUT committing
                    }

                    match settle_rx.await {
                        Ok(AckDecision::Ack) => {
                            if let Err(e) = consumer.commit_message(&message, CommitMode::Sync) {
                                // Uncommitted means a duplicate later, never a loss
                                tracing::warn!(
                                    topic = message.topic(),
                                    partition = message.partition(),
                                    offset = message.offset(),
                                    error = %e,
                                    "Failed to commit offset (message may be redelivered)"
                                );
                            }
                        },
                        Ok(AckDecision::Retain) | Err(_) => {
                            tracing::warn!(
                                topic = message.topic(),
                                partition = message.partition(),
                                offset = message.offset(),
                                "Message retained, closing subscription for redelivery"
                            );
                            break;
                        },
                    }
                }

                tracing::debug!("Consumer task exiting");
            });

            let stream = async_stream::stream! {
                let mut rx = rx;
                while let Some(result) = rx.recv().await {
                    yield result;
                }
            };

            Ok(Box::pin(stream) as DeliveryStream)
        })
    }
}
