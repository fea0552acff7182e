//! Wire formats of the payment and notification topics.

use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use ticketsync_core::ticket::{BuyerId, ProductId, PurchaseCompleted};

/// The only payment event type that issues tickets.
pub const CHECKOUT_COMPLETED: &str = "checkout.session.completed";

/// Why a payment message could not be decoded.
#[derive(Error, Debug)]
pub enum DecodeError {
    /// Not JSON, or missing/mistyped fields.
    #[error("Malformed payment message: {0}")]
    Json(#[from] serde_json::Error),

    /// `created_at` is neither RFC 3339 nor a naive ISO timestamp.
    #[error("Invalid created_at timestamp: {0}")]
    InvalidTimestamp(String),
}

/// A decoded payment message.
#[derive(Debug, Clone, PartialEq)]
pub enum PaymentMessage {
    /// A completed checkout to issue tickets for.
    Completed(PurchaseCompleted),
    /// Any other event type; carries the type for logging.
    Ignored(String),
}

#[derive(Deserialize)]
struct Envelope {
    event: String,
}

/// Inbound payment-completion body.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckoutCompleted {
    /// Event type, `checkout.session.completed`
    pub event: String,
    /// Purchasing user
    pub user_id: String,
    /// Catalog ticket id
    pub ticket_id: i64,
    /// Units bought
    pub quantity: u32,
    /// Price of one unit
    pub unit_amount: f64,
    /// Purchase time, RFC 3339 or naive ISO (UTC)
    pub created_at: String,
}

impl CheckoutCompleted {
    /// Convert into the engine's input.
    ///
    /// # Errors
    ///
    /// Returns [`DecodeError::InvalidTimestamp`] for an unparsable `created_at`.
    pub fn into_purchase(self) -> Result<PurchaseCompleted, DecodeError> {
        Ok(PurchaseCompleted {
            buyer_id: BuyerId::new(self.user_id),
            product_id: ProductId::new(self.ticket_id),
            quantity: self.quantity,
            unit_amount: self.unit_amount,
            issued_at: parse_timestamp(&self.created_at)?,
        })
    }
}

/// Decode a raw payment message.
///
/// The event type is read first, so non-checkout events are ignored even if
/// the rest of their body has a different shape.
///
/// # Errors
///
/// Returns [`DecodeError`] if the body is not a well-formed payment message.
pub fn decode_payment(payload: &[u8]) -> Result<PaymentMessage, DecodeError> {
    let envelope: Envelope = serde_json::from_slice(payload)?;
    if envelope.event != CHECKOUT_COMPLETED {
        return Ok(PaymentMessage::Ignored(envelope.event));
    }

    let body: CheckoutCompleted = serde_json::from_slice(payload)?;
    Ok(PaymentMessage::Completed(body.into_purchase()?))
}

/// Parse RFC 3339, or a naive `YYYY-MM-DDTHH:MM:SS[.fff]` taken as UTC.
///
/// # Errors
///
/// Returns [`DecodeError::InvalidTimestamp`] if neither form matches.
pub fn parse_timestamp(raw: &str) -> Result<DateTime<Utc>, DecodeError> {
    if let Ok(ts) = DateTime::parse_from_rfc3339(raw) {
        return Ok(ts.with_timezone(&Utc));
    }
    ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"]
        .iter()
        .find_map(|format| NaiveDateTime::parse_from_str(raw, format).ok())
        .map(|naive| naive.and_utc())
        .ok_or_else(|| DecodeError::InvalidTimestamp(raw.to_string()))
}

/// Outbound "ticket ready" notification.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TicketReady {
    /// Buyer display name
    pub user_name: String,
    /// Issued ticket instance id
    pub ticket_id: String,
    /// Catalog product name
    pub ticket_name: String,
    /// Catalog unit price
    pub ticket_price: f64,
    /// Delivery address
    pub to_email: String,
}
