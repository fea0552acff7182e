//! Wiring of infrastructure and services.
//!
//! ```text
//! Config ──► Resources::from_config   Postgres pool + migrations, Redpanda
//!                │                    bus + topic declaration, identity client
//!                ▼
//!            Services::wire           store, allocator, dispatcher, engine,
//!                │                    redemption, payment handler
//!                ▼
//!            Application              HTTP router + payment consumer
//! ```
//!
//! [`Services::wire`] only takes trait objects, so tests assemble the same
//! graph over in-memory doubles.

use crate::allocator::IdAllocator;
use crate::config::Config;
use crate::identity::HttpBuyerDirectory;
use crate::issuance::IssuanceEngine;
use crate::notification::NotificationDispatcher;
use crate::redemption::Redemption;
use crate::runtime::{Application, EventConsumer, PaymentHandler};
use crate::server::{AppState, build_router};
use anyhow::Context;
use sqlx::PgPool;
use sqlx::postgres::PgPoolOptions;
use std::sync::Arc;
use std::time::Duration;
use ticketsync_core::catalog::Catalog;
use ticketsync_core::dead_letter::DeadLetterSink;
use ticketsync_core::directory::BuyerDirectory;
use ticketsync_core::environment::{Clock, SystemClock};
use ticketsync_core::event_bus::EventBus;
use ticketsync_core::store::TicketStore;
use ticketsync_postgres::{DeadLetterQueue, PostgresCatalog, PostgresTicketStore};
use ticketsync_redpanda::RedpandaEventBus;
use tokio::sync::broadcast;
use tracing::info;

/// Producer flush budget at shutdown.
const FLUSH_TIMEOUT: Duration = Duration::from_secs(10);

/// Infrastructure clients, connected and ready.
pub struct Resources {
    /// Postgres pool shared by store, catalog and dead-letter queue
    pub pool: PgPool,
    /// Broker client
    pub event_bus: Arc<RedpandaEventBus>,
    /// Identity service client
    pub directory: Arc<HttpBuyerDirectory>,
}

impl Resources {
    /// Connect everything the service needs.
    ///
    /// # Errors
    ///
    /// Returns an error if the database is unreachable, migrations fail, the
    /// broker client cannot be built or topics cannot be declared.
    pub async fn from_config(config: &Config) -> anyhow::Result<Self> {
        info!("Connecting to PostgreSQL...");
        let pool = PgPoolOptions::new()
            .max_connections(config.postgres.max_connections)
            .min_connections(config.postgres.min_connections)
            .acquire_timeout(Duration::from_secs(config.postgres.connect_timeout))
            .connect(&config.postgres.url)
            .await
            .context("Failed to connect to PostgreSQL")?;

        if config.postgres.run_migrations {
            ticketsync_postgres::migrate(&pool)
                .await
                .context("Failed to apply migrations")?;
        }

        info!(brokers = %config.redpanda.brokers, "Connecting to Redpanda...");
        let redpanda = &config.redpanda;
        let mut builder = RedpandaEventBus::builder()
            .brokers(&redpanda.brokers)
            .consumer_group(&redpanda.consumer_group)
            .security_protocol(&redpanda.security_protocol)
            .session_timeout_ms(redpanda.session_timeout_ms)
            .topic_layout(redpanda.topic_partitions, redpanda.replication_factor);
        if let (Some(mechanism), Some(username), Some(password)) = (
            &redpanda.sasl_mechanism,
            &redpanda.sasl_username,
            &redpanda.sasl_password,
        ) {
            builder = builder.sasl(mechanism, username, password);
        }
        if let Some(ca) = &redpanda.ssl_ca_location {
            builder = builder.ssl_ca_location(ca);
        }
        let event_bus = Arc::new(builder.build().context("Failed to build event bus")?);

        event_bus
            .declare_topics(&config.all_topics())
            .await
            .context("Failed to declare topics")?;
        info!(topics = ?config.all_topics(), "Topics declared");

        let directory = Arc::new(
            HttpBuyerDirectory::new(
                &config.identity.base_url,
                Duration::from_secs(config.identity.timeout),
            )
            .context("Failed to build identity client")?,
        );

        Ok(Self {
            pool,
            event_bus,
            directory,
        })
    }
}

/// The service graph.
pub struct Services {
    /// Ticket persistence
    pub store: Arc<dyn TicketStore>,
    /// Purchase fan-out
    pub engine: Arc<IssuanceEngine>,
    /// Redemption state machine
    pub redemption: Redemption,
    /// Settles payment messages
    pub payment_handler: Arc<PaymentHandler>,
}

/// Collaborators [`Services::wire`] builds on.
pub struct Collaborators {
    /// Ticket persistence
    pub store: Arc<dyn TicketStore>,
    /// Product names and prices
    pub catalog: Arc<dyn Catalog>,
    /// Parking place for undecodable messages
    pub dead_letters: Arc<dyn DeadLetterSink>,
    /// Broker
    pub event_bus: Arc<dyn EventBus>,
    /// Buyer contact data
    pub directory: Arc<dyn BuyerDirectory>,
    /// Time source
    pub clock: Arc<dyn Clock>,
}

impl Services {
    /// Assemble the services from their collaborators.
    #[must_use]
    pub fn wire(collaborators: Collaborators, config: &Config) -> Self {
        let Collaborators {
            store,
            catalog,
            dead_letters,
            event_bus,
            directory,
            clock,
        } = collaborators;

        let allocator = IdAllocator::new(store.clone())
            .with_max_attempts(config.issuance.max_allocation_attempts);
        let dispatcher = NotificationDispatcher::new(
            event_bus,
            directory,
            catalog,
            config.redpanda.notification_topic.clone(),
        );
        let engine = Arc::new(IssuanceEngine::new(
            store.clone(),
            allocator,
            Arc::new(dispatcher),
        ));
        let redemption = Redemption::new(store.clone(), clock.clone());
        let payment_handler = Arc::new(PaymentHandler::new(
            engine.clone(),
            dead_letters,
            clock,
            config.issuance.retry_policy(),
        ));

        Self {
            store,
            engine,
            redemption,
            payment_handler,
        }
    }

    /// Build the payment consumer.
    #[must_use]
    pub fn payment_consumer(
        &self,
        event_bus: Arc<dyn EventBus>,
        shutdown: broadcast::Receiver<()>,
        config: &Config,
    ) -> EventConsumer {
        EventConsumer::new(
            "payment-issuance",
            vec![config.redpanda.payment_topic.clone()],
            event_bus,
            self.payment_handler.clone(),
            shutdown,
        )
        .with_retry_delay(Duration::from_secs(config.redpanda.reconnect_delay))
    }

    /// Build the HTTP router.
    #[must_use]
    pub fn router(&self) -> axum::Router {
        build_router(AppState::new(self.store.clone(), self.redemption.clone()))
    }
}

/// Connect, wire and bind the whole service.
///
/// # Errors
///
/// Returns an error if any resource cannot be set up or the HTTP port
/// cannot be bound.
pub async fn build_application(config: &Config) -> anyhow::Result<Application> {
    let resources = Resources::from_config(config).await?;

    let services = Services::wire(
        Collaborators {
            store: Arc::new(PostgresTicketStore::new(resources.pool.clone())),
            catalog: Arc::new(PostgresCatalog::new(resources.pool.clone())),
            dead_letters: Arc::new(DeadLetterQueue::new(resources.pool.clone())),
            event_bus: resources.event_bus.clone(),
            directory: resources.directory.clone(),
            clock: Arc::new(SystemClock),
        },
        config,
    );

    let (shutdown_tx, _) = broadcast::channel(1);
    let consumer = services.payment_consumer(
        resources.event_bus.clone(),
        shutdown_tx.subscribe(),
        config,
    );

    let address = format!("{}:{}", config.server.host, config.server.port);
    let listener = tokio::net::TcpListener::bind(&address)
        .await
        .with_context(|| format!("Failed to bind {address}"))?;

    let event_bus = resources.event_bus;
    Ok(Application::new(
        listener,
        services.router(),
        vec![consumer],
        shutdown_tx,
        config.shutdown_timeout(),
    )
    .on_drained(move || {
        if let Err(e) = event_bus.flush(FLUSH_TIMEOUT) {
            tracing::warn!(error = %e, "Notifications may not have been delivered");
        }
    }))
}
