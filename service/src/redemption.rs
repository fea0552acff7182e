//! One-time redemption of ticket instances.
//!
//! ```text
//! Active ──redeem──► Redeemed (terminal)
//! ```
//!
//! The transition is a compare-and-set in the store, so concurrent redeemers
//! of the same id see exactly one success.

use crate::metrics;
use std::sync::Arc;
use thiserror::Error;
use ticketsync_core::environment::Clock;
use ticketsync_core::store::{StoreError, TicketStore};
use ticketsync_core::ticket::{TicketInstance, TicketInstanceId};

/// Why a redemption did not happen.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RedemptionError {
    /// No instance has this id.
    #[error("Ticket instance {0} not found")]
    NotFound(TicketInstanceId),

    /// The instance was redeemed before.
    #[error("Ticket instance {0} has already been redeemed")]
    AlreadyRedeemed(TicketInstanceId),

    /// The store failed.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Performs the `active → redeemed` transition.
#[derive(Clone)]
pub struct Redemption {
    store: Arc<dyn TicketStore>,
    clock: Arc<dyn Clock>,
}

impl Redemption {
    /// Create a redemption service.
    #[must_use]
    pub fn new(store: Arc<dyn TicketStore>, clock: Arc<dyn Clock>) -> Self {
        Self { store, clock }
    }

    /// Redeem `id`, used exactly as supplied.
    ///
    /// # Errors
    ///
    /// - [`RedemptionError::NotFound`] if no instance has this id
    /// - [`RedemptionError::AlreadyRedeemed`] if it was redeemed before
    /// - [`RedemptionError::Store`] if the store failed
    pub async fn redeem(&self, id: &TicketInstanceId) -> Result<TicketInstance, RedemptionError> {
        let result = self.try_redeem(id).await;
        metrics::record_redemption(match &result {
            Ok(_) => "redeemed",
            Err(RedemptionError::NotFound(_)) => "not_found",
            Err(RedemptionError::AlreadyRedeemed(_)) => "already_redeemed",
            Err(RedemptionError::Store(_)) => "error",
        });
        result
    }

    async fn try_redeem(&self, id: &TicketInstanceId) -> Result<TicketInstance, RedemptionError> {
        let Some(current) = self.store.find(id).await? else {
            return Err(RedemptionError::NotFound(id.clone()));
        };
        if current.is_redeemed() {
            return Err(RedemptionError::AlreadyRedeemed(id.clone()));
        }

        if let Some(redeemed) = self.store.deactivate(id, self.clock.now()).await? {
            tracing::info!(ticket_instance_id = %id, "Ticket redeemed");
            return Ok(redeemed);
        }

        // Lost the compare-and-set; tell the caller what the row looks like now
        match self.store.find(id).await? {
            None => Err(RedemptionError::NotFound(id.clone())),
            Some(_) => Err(RedemptionError::AlreadyRedeemed(id.clone())),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use ticketsync_core::ticket::IssuanceKey;
    use ticketsync_testing::helpers::purchase;
    use ticketsync_testing::{InMemoryTicketStore, test_clock};

    fn seeded() -> (Arc<InMemoryTicketStore>, Redemption) {
        let store = Arc::new(InMemoryTicketStore::new());
        let event = purchase("u1", 7, 1);
        store.seed(TicketInstance::issue(
            TicketInstanceId::new("AbCdEf123456"),
            IssuanceKey::for_unit(&event, 0),
            &event,
        ));
        let redemption = Redemption::new(store.clone(), Arc::new(test_clock()));
        (store, redemption)
    }

    #[tokio::test]
    async fn redeem_twice() {
        let (store, redemption) = seeded();
        let id = TicketInstanceId::new("AbCdEf123456");

        let redeemed = redemption.redeem(&id).await.unwrap();
        assert!(!redeemed.is_active);
        assert_eq!(redeemed.deactivated_at, Some(test_clock().now()));

        assert_eq!(
            redemption.redeem(&id).await,
            Err(RedemptionError::AlreadyRedeemed(id.clone()))
        );
        let stored = store.all().pop().unwrap();
        assert_eq!(stored.deactivated_at, Some(test_clock().now()));
    }

    #[tokio::test]
    async fn unknown_id_is_not_found() {
        let (store, redemption) = seeded();
        let id = TicketInstanceId::new("NoSuchTicket");

        assert_eq!(
            redemption.redeem(&id).await,
            Err(RedemptionError::NotFound(id))
        );
        assert!(store.all().iter().all(|t| t.is_active));
    }

    #[tokio::test]
    async fn id_is_not_truncated() {
        let (_store, redemption) = seeded();
        let longer = TicketInstanceId::new("AbCdEf123456XYZ");

        assert!(matches!(
            redemption.redeem(&longer).await,
            Err(RedemptionError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn store_outage_is_reported() {
        let (store, redemption) = seeded();
        store.set_unavailable(true);

        assert!(matches!(
            redemption.redeem(&TicketInstanceId::new("AbCdEf123456")).await,
            Err(RedemptionError::Store(StoreError::Unavailable(_)))
        ));
    }
}
