//! Application lifecycle and graceful shutdown.
//!
//! When a shutdown signal is received (Ctrl+C or SIGTERM):
//! 1. HTTP server stops accepting new connections
//! 2. Shutdown signal broadcast to all consumers
//! 3. Consumers settle the message in flight and stop (bounded by the
//!    shutdown timeout)
//! 4. Drain hooks run, e.g. flushing the broker producer
//! 5. Clean exit

use crate::runtime::EventConsumer;
use std::future::Future;
use std::time::Duration;
use tokio::sync::broadcast;
use tracing::{error, info, warn};

type DrainHook = Box<dyn FnOnce() + Send>;

/// A configured application ready to run.
pub struct Application {
    /// TCP listener for HTTP server
    listener: tokio::net::TcpListener,

    /// Axum router with all HTTP routes
    router: axum::Router,

    /// Background consumers
    consumers: Vec<EventConsumer>,

    /// Shutdown signal broadcaster
    shutdown_tx: broadcast::Sender<()>,

    /// Time each consumer gets to stop
    shutdown_timeout: Duration,

    /// Run after consumers stopped
    drain_hooks: Vec<DrainHook>,
}

impl Application {
    /// Create an application.
    ///
    /// `shutdown_tx` must be the sender the consumers' receivers were
    /// subscribed from.
    #[must_use]
    pub fn new(
        listener: tokio::net::TcpListener,
        router: axum::Router,
        consumers: Vec<EventConsumer>,
        shutdown_tx: broadcast::Sender<()>,
        shutdown_timeout: Duration,
    ) -> Self {
        Self {
            listener,
            router,
            consumers,
            shutdown_tx,
            shutdown_timeout,
            drain_hooks: Vec::new(),
        }
    }

    /// Register work to run once every consumer has stopped.
    #[must_use]
    pub fn on_drained(mut self, hook: impl FnOnce() + Send + 'static) -> Self {
        self.drain_hooks.push(Box::new(hook));
        self
    }

    /// Run until Ctrl+C or SIGTERM.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run(self) -> std::io::Result<()> {
        self.run_until(shutdown_signal()).await
    }

    /// Run until `signal` completes.
    ///
    /// # Errors
    ///
    /// Returns an error if the HTTP server fails.
    pub async fn run_until(
        self,
        signal: impl Future<Output = ()> + Send + 'static,
    ) -> std::io::Result<()> {
        let Self {
            listener,
            router,
            consumers,
            shutdown_tx,
            shutdown_timeout,
            drain_hooks,
        } = self;

        info!(consumer_count = consumers.len(), "Starting event consumers");
        let consumer_handles: Vec<_> = consumers
            .into_iter()
            .map(|consumer| {
                let name = consumer.name().to_string();
                (name, consumer.spawn())
            })
            .collect();

        if let Ok(address) = listener.local_addr() {
            info!(%address, "HTTP server listening for requests");
        }
        let served = axum::serve(listener, router)
            .with_graceful_shutdown(signal)
            .await;

        info!("HTTP server stopped, initiating graceful shutdown");
        let _ = shutdown_tx.send(());

        for (name, handle) in consumer_handles {
            match tokio::time::timeout(shutdown_timeout, handle).await {
                Ok(Ok(())) => info!(consumer = %name, "Consumer stopped gracefully"),
                Ok(Err(e)) => warn!(consumer = %name, error = %e, "Consumer task failed"),
                Err(_) => warn!(consumer = %name, "Consumer shutdown timed out"),
            }
        }

        for hook in drain_hooks {
            hook();
        }

        if let Err(e) = &served {
            error!(error = %e, "HTTP server failed");
        }
        info!("Graceful shutdown complete");
        served
    }
}

/// Wait for Ctrl+C or SIGTERM.
///
/// A signal handler that cannot be installed never fires; the other one
/// still does.
pub async fn shutdown_signal() {
    use tokio::signal;

    let ctrl_c = async {
        if let Err(e) = signal::ctrl_c().await {
            error!(error = %e, "Failed to install Ctrl+C handler");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match signal::unix::signal(signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            },
            Err(e) => {
                error!(error = %e, "Failed to install SIGTERM handler");
                std::future::pending::<()>().await;
            },
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        () = ctrl_c => info!("Received Ctrl+C signal"),
        () = terminate => info!("Received SIGTERM signal"),
    }
}
