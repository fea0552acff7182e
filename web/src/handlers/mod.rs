//! HTTP request handlers shared by TicketSync services.

pub mod health;

pub use health::health_check;
