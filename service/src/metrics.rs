//! Business metrics for ticket issuance and redemption.
//!
//! # Exported Metrics
//!
//! ## Counters
//! - `tickets_issued_total` - Ticket instances committed
//! - `tickets_duplicate_units_total` - Units skipped because a previous delivery issued them
//! - `tickets_redeemed_total{outcome}` - Redemption attempts by outcome
//!   (`redeemed`, `not_found`, `already_redeemed`, `error`)
//! - `ticket_notifications_total{outcome}` - Notifications by outcome
//!   (`sent`, `skipped`, `failed`)
//! - `payment_events_total{outcome}` - Payment messages by outcome
//!   (`processed`, `ignored`, `invalid`, `rejected`, `retained`)
//! - `ticket_id_collisions_total` - Allocator candidates already taken
//!
//! ## Histograms
//! - `ticket_issuance_duration_seconds` - Time to issue one payment event

use metrics::{describe_counter, describe_histogram};
use metrics_exporter_prometheus::{BuildError, Matcher, PrometheusBuilder};
use std::net::SocketAddr;

/// Install the Prometheus recorder and serve `/metrics` on `addr`.
///
/// Must be called from within a Tokio runtime, once per process.
///
/// # Errors
///
/// Returns [`BuildError`] if the recorder is already installed or the
/// listener cannot be set up.
pub fn install_exporter(addr: SocketAddr) -> Result<(), BuildError> {
    PrometheusBuilder::new()
        .with_http_listener(addr)
        .set_buckets_for_metric(
            Matcher::Suffix("duration_seconds".to_string()),
            &[0.001, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0],
        )?
        .install()?;

    register_business_metrics();
    tracing::info!(%addr, "Metrics exporter listening at http://{addr}/metrics");
    Ok(())
}

/// Register metric descriptions. Call once at startup, after installing the
/// recorder.
pub fn register_business_metrics() {
    describe_counter!("tickets_issued_total", "Ticket instances committed");
    describe_counter!(
        "tickets_duplicate_units_total",
        "Units skipped because an earlier delivery already issued them"
    );
    describe_counter!(
        "tickets_redeemed_total",
        "Redemption attempts by outcome (redeemed, not_found, already_redeemed, error)"
    );
    describe_counter!(
        "ticket_notifications_total",
        "Ticket-ready notifications by outcome (sent, skipped, failed)"
    );
    describe_counter!(
        "payment_events_total",
        "Payment messages by outcome (processed, ignored, invalid, unissuable, rejected, retained)"
    );
    describe_counter!(
        "ticket_id_collisions_total",
        "Identifier candidates that were already taken"
    );
    describe_histogram!(
        "ticket_issuance_duration_seconds",
        "Time taken to issue all units of one payment event"
    );

    tracing::info!("Business metrics registered");
}

/// Record one committed ticket instance.
pub fn record_ticket_issued() {
    metrics::counter!("tickets_issued_total").increment(1);
}

/// Record a unit skipped as already issued.
pub fn record_duplicate_unit() {
    metrics::counter!("tickets_duplicate_units_total").increment(1);
}

/// Record a redemption attempt.
pub fn record_redemption(outcome: &'static str) {
    metrics::counter!("tickets_redeemed_total", "outcome" => outcome).increment(1);
}

/// Record a notification attempt.
pub fn record_notification(outcome: &'static str) {
    metrics::counter!("ticket_notifications_total", "outcome" => outcome).increment(1);
}

/// Record how a payment message was settled.
pub fn record_payment_event(outcome: &'static str) {
    metrics::counter!("payment_events_total", "outcome" => outcome).increment(1);
}

/// Record an allocator collision.
pub fn record_id_collision() {
    metrics::counter!("ticket_id_collisions_total").increment(1);
}

/// Record the duration of one issuance run.
pub fn record_issuance_duration(duration_secs: f64) {
    metrics::histogram!("ticket_issuance_duration_seconds").record(duration_secs);
}
