//! # TicketSync Service
//!
//! Turns completed payments into individually redeemable ticket instances
//! and redeems them exactly once.
//!
//! ```text
//! payment topic ──► EventConsumer ──► PaymentHandler ──► IssuanceEngine
//!                    (ack/retain)      (decode, retry,     │  IdAllocator
//!                                       dead-letter)       │  TicketStore
//!                                                          ▼
//!                                           NotificationDispatcher ──► notification topic
//!
//! POST /tickets/v1/instances/:id/validate ──► Redemption ──► TicketStore (compare-and-set)
//! ```
//!
//! # Delivery guarantees
//!
//! Payment messages are processed at least once: a message is acknowledged
//! only after issuance finished. Every unit carries a deterministic issuance
//! key that storage keeps unique, so a redelivered message issues nothing
//! new. Redemption is a single conditional update, so concurrent redeemers
//! see exactly one success.

#![forbid(unsafe_code)]
#![warn(missing_docs)]

pub mod allocator;
pub mod api;
pub mod bootstrap;
pub mod config;
pub mod events;
pub mod identity;
pub mod issuance;
pub mod metrics;
pub mod notification;
pub mod redemption;
pub mod retry;
pub mod runtime;
pub mod server;

pub use bootstrap::{Collaborators, Services, build_application};
pub use config::Config;
pub use issuance::{IssuanceEngine, IssuanceError, IssuanceReport};
pub use redemption::{Redemption, RedemptionError};
