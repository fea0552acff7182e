//! Ticket instance types.
//!
//! A [`TicketInstance`] is one individually redeemable unit minted from a
//! purchase. Its lifecycle has exactly two states:
//!
//! ```text
//! Active ──redeem──► Redeemed (terminal)
//! ```
//!
//! `is_active` only ever moves `true → false`, and `deactivated_at` is set in
//! the same step. [`TicketInstance::deactivate`] is the single place that
//! performs the transition for in-process stores; SQL stores express the same
//! rule as a compare-and-set `UPDATE`.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;

/// Opaque identifier of a ticket instance.
///
/// Freshly minted ids are [`TicketInstanceId::LENGTH`] alphanumeric characters.
/// Ids supplied from outside (redemption requests) are kept verbatim: a lookup
/// uses exactly the string the caller sent.
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TicketInstanceId(String);

impl TicketInstanceId {
    /// Length of every allocated identifier.
    pub const LENGTH: usize = 12;

    /// Wrap an identifier without validation.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw identifier.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether the id has the shape of an allocated identifier.
    #[must_use]
    pub fn is_well_formed(&self) -> bool {
        self.0.len() == Self::LENGTH && self.0.bytes().all(|b| b.is_ascii_alphanumeric())
    }
}

impl fmt::Display for TicketInstanceId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for TicketInstanceId {
    fn from(id: &str) -> Self {
        Self::new(id)
    }
}

/// Reference to the purchasing user (opaque to this subsystem).
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BuyerId(String);

impl BuyerId {
    /// Wrap a buyer reference.
    #[must_use]
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Borrow the raw reference.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BuyerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Catalog identifier of the ticket product that was purchased.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ProductId(i64);

impl ProductId {
    /// Wrap a catalog id.
    #[must_use]
    pub const fn new(id: i64) -> Self {
        Self(id)
    }

    /// The numeric catalog id.
    #[must_use]
    pub const fn get(self) -> i64 {
        self.0
    }
}

impl fmt::Display for ProductId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Deterministic key of one purchased unit.
///
/// Derived from the purchase event and the unit index, so redelivery of the
/// same payment event maps onto the same keys. Stores enforce uniqueness on
/// it, which is what keeps redelivered events from minting extra tickets.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IssuanceKey(String);

impl IssuanceKey {
    /// Key for unit `unit` (zero based) of `event`.
    #[must_use]
    pub fn for_unit(event: &PurchaseCompleted, unit: u32) -> Self {
        Self(format!(
            "{}:{}:{}:{unit}",
            event.product_id,
            event.buyer_id,
            event.issued_at.to_rfc3339(),
        ))
    }

    /// Rebuild a key read back from storage.
    #[must_use]
    pub fn from_stored(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Borrow the raw key.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for IssuanceKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Why a purchase event cannot be issued.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum InvalidPurchase {
    /// Quantity must be at least one.
    #[error("Quantity must be at least 1, got {0}")]
    ZeroQuantity(u32),

    /// Unit amount is negative, NaN or infinite.
    #[error("Unit amount must be a finite non-negative number, got {0}")]
    InvalidAmount(f64),
}

/// A completed purchase, ready to be fanned out into ticket instances.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PurchaseCompleted {
    /// Who paid.
    pub buyer_id: BuyerId,
    /// What was bought.
    pub product_id: ProductId,
    /// How many units.
    pub quantity: u32,
    /// Price of one unit.
    pub unit_amount: f64,
    /// When the purchase completed; becomes `issued_at` on every instance.
    pub issued_at: DateTime<Utc>,
}

impl PurchaseCompleted {
    /// Check the event can be issued at all.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidPurchase`] for a zero quantity or an unusable amount.
    pub fn validate(&self) -> Result<(), InvalidPurchase> {
        if self.quantity == 0 {
            return Err(InvalidPurchase::ZeroQuantity(self.quantity));
        }
        if !self.unit_amount.is_finite() || self.unit_amount < 0.0 {
            return Err(InvalidPurchase::InvalidAmount(self.unit_amount));
        }
        Ok(())
    }
}

/// One issued, individually redeemable ticket.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct TicketInstance {
    /// Globally unique opaque id.
    pub id: TicketInstanceId,
    /// Purchasing user.
    #[serde(rename = "user_id")]
    pub buyer_id: BuyerId,
    /// Purchased product.
    #[serde(rename = "ticket_id")]
    pub product_id: ProductId,
    /// Amount paid for this unit.
    pub unit_amount: f64,
    /// Creation time, immutable.
    pub issued_at: DateTime<Utc>,
    /// `true` until redeemed.
    pub is_active: bool,
    /// Set once, when `is_active` becomes `false`.
    pub deactivated_at: Option<DateTime<Utc>>,
    /// Deterministic per-unit key used for idempotent issuance.
    pub issuance_key: IssuanceKey,
}

impl TicketInstance {
    /// Mint an active instance for one unit of `event`.
    #[must_use]
    pub fn issue(id: TicketInstanceId, issuance_key: IssuanceKey, event: &PurchaseCompleted) -> Self {
        Self {
            id,
            buyer_id: event.buyer_id.clone(),
            product_id: event.product_id,
            unit_amount: event.unit_amount,
            issued_at: event.issued_at,
            is_active: true,
            deactivated_at: None,
            issuance_key,
        }
    }

    /// Perform the one-time `active → redeemed` transition.
    ///
    /// Returns `false` and leaves the instance untouched if it was already
    /// redeemed.
    pub fn deactivate(&mut self, at: DateTime<Utc>) -> bool {
        if !self.is_active {
            return false;
        }
        self.is_active = false;
        self.deactivated_at = Some(at);
        true
    }

    /// Whether the instance has been redeemed.
    #[must_use]
    pub const fn is_redeemed(&self) -> bool {
        !self.is_active
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn purchase(quantity: u32, unit_amount: f64) -> PurchaseCompleted {
        PurchaseCompleted {
            buyer_id: BuyerId::new("u1"),
            product_id: ProductId::new(7),
            quantity,
            unit_amount,
            issued_at: Utc.with_ymd_and_hms(2023, 10, 1, 12, 0, 0).unwrap(),
        }
    }

    #[test]
    fn issuance_key_is_stable_per_unit() {
        let event = purchase(3, 300.0);
        assert_eq!(IssuanceKey::for_unit(&event, 1), IssuanceKey::for_unit(&event, 1));
        assert_ne!(IssuanceKey::for_unit(&event, 0), IssuanceKey::for_unit(&event, 1));
        assert_eq!(
            IssuanceKey::for_unit(&event, 2).as_str(),
            "7:u1:2023-10-01T12:00:00+00:00:2"
        );
    }

    #[test]
    fn validate_rejects_zero_quantity_and_bad_amounts() {
        assert_eq!(purchase(0, 1.0).validate(), Err(InvalidPurchase::ZeroQuantity(0)));
        assert!(purchase(1, -1.0).validate().is_err());
        assert!(purchase(1, f64::NAN).validate().is_err());
        assert!(purchase(1, f64::INFINITY).validate().is_err());
        assert!(purchase(2, 0.0).validate().is_ok());
    }

    #[test]
    fn deactivate_is_one_way() {
        let event = purchase(1, 10.0);
        let mut ticket = TicketInstance::issue(
            TicketInstanceId::new("AbCdEf123456"),
            IssuanceKey::for_unit(&event, 0),
            &event,
        );
        assert!(ticket.is_active);
        assert!(ticket.deactivated_at.is_none());

        let first = Utc.with_ymd_and_hms(2024, 1, 1, 0, 0, 0).unwrap();
        let later = Utc.with_ymd_and_hms(2024, 6, 1, 0, 0, 0).unwrap();

        assert!(ticket.deactivate(first));
        assert!(!ticket.deactivate(later));
        assert!(ticket.is_redeemed());
        assert_eq!(ticket.deactivated_at, Some(first));
    }

    #[test]
    fn well_formed_ids() {
        assert!(TicketInstanceId::new("AbCdEf123456").is_well_formed());
        assert!(!TicketInstanceId::new("AbCdEf12345").is_well_formed());
        assert!(!TicketInstanceId::new("AbCdEf12345-").is_well_formed());
    }

    #[test]
    fn instance_serializes_with_wire_names() {
        let event = purchase(1, 300.0);
        let ticket = TicketInstance::issue(
            TicketInstanceId::new("AbCdEf123456"),
            IssuanceKey::for_unit(&event, 0),
            &event,
        );
        let json = serde_json::to_value(&ticket).unwrap();
        assert_eq!(json["user_id"], "u1");
        assert_eq!(json["ticket_id"], 7);
        assert_eq!(json["is_active"], true);
        assert!(json["deactivated_at"].is_null());
    }
}
