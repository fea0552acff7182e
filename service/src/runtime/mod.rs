//! Background runtime: the payment consumer and the application lifecycle.
//!
//! - **`consumer`**: subscribe, settle each delivery, reconnect for redelivery
//! - **`handlers`**: the [`EventHandler`] seam and the payment handler
//! - **`lifecycle`**: HTTP server plus consumers with graceful shutdown

pub mod consumer;
pub mod handlers;
pub mod lifecycle;

pub use consumer::EventConsumer;
pub use handlers::{EventHandler, PaymentHandler};
pub use lifecycle::Application;
