//! HTTP API handlers.
//!
//! - Instances: redemption and read queries over issued ticket instances

pub mod instances;

pub use instances::{TicketInstanceResponse, get_instance, list_user_instances, validate_instance};
