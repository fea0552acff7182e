//! Axum integration for TicketSync.
//!
//! Domain errors stay explicit enums inside the service; this crate is where
//! they become HTTP responses.
//!
//! # Request Flow
//!
//! 1. **HTTP Request** arrives at an Axum handler
//! 2. **Extract** the path/body
//! 3. **Call** the domain operation (redemption, lookup)
//! 4. **Map** the domain result or error to [`AppError`]
//! 5. **Return** a JSON response
//!
//! # Example
//!
//! ```ignore
//! use ticketsync_web::AppError;
//! use axum::{Json, extract::Path};
//!
//! async fn validate(Path(id): Path<String>) -> Result<Json<TicketInstance>, AppError> {
//!     let ticket = redemption.redeem(&id.as_str().into()).await?;
//!     Ok(Json(ticket))
//! }
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod error;
pub mod handlers;

pub use error::AppError;

/// Result type alias for web handlers.
pub type WebResult<T> = Result<T, AppError>;
