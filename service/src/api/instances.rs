//! Ticket instance endpoints.
//!
//! - `POST /tickets/v1/instances/:id/validate` redeems an instance
//! - `GET /tickets/v1/instances/:id` reads one instance
//! - `GET /tickets/v1/users/:user_id/instances` lists a buyer's instances

use crate::redemption::RedemptionError;
use crate::server::AppState;
use axum::Json;
use axum::extract::{Path, State};
use chrono::{DateTime, Utc};
use serde::Serialize;
use ticketsync_core::store::StoreError;
use ticketsync_core::ticket::{BuyerId, ProductId, TicketInstance, TicketInstanceId};
use ticketsync_web::{AppError, WebResult};

const RESOURCE: &str = "Ticket instance";

/// Ticket instance as returned over HTTP.
#[derive(Debug, Clone, Serialize)]
pub struct TicketInstanceResponse {
    /// Instance id
    pub id: TicketInstanceId,
    /// Owning user
    pub user_id: BuyerId,
    /// Purchased product
    pub ticket_id: ProductId,
    /// Amount paid for this unit
    pub unit_amount: f64,
    /// Issue time
    pub issued_at: DateTime<Utc>,
    /// `false` once redeemed
    pub is_active: bool,
    /// Redemption time
    pub deactivated_at: Option<DateTime<Utc>>,
}

impl From<TicketInstance> for TicketInstanceResponse {
    fn from(ticket: TicketInstance) -> Self {
        Self {
            id: ticket.id,
            user_id: ticket.buyer_id,
            ticket_id: ticket.product_id,
            unit_amount: ticket.unit_amount,
            issued_at: ticket.issued_at,
            is_active: ticket.is_active,
            deactivated_at: ticket.deactivated_at,
        }
    }
}

impl From<RedemptionError> for AppError {
    fn from(err: RedemptionError) -> Self {
        match err {
            RedemptionError::NotFound(id) => {
                Self::not_found(RESOURCE, id).with_code("TICKET_NOT_FOUND")
            },
            RedemptionError::AlreadyRedeemed(id) => {
                Self::bad_request(format!("Ticket instance {id} has already been redeemed"))
                    .with_code("TICKET_ALREADY_REDEEMED")
            },
            RedemptionError::Store(e) => store_error(e),
        }
    }
}

fn store_error(err: StoreError) -> AppError {
    if err.is_transient() {
        AppError::unavailable("Ticket store unavailable").with_source(err.into())
    } else {
        AppError::internal("An internal error occurred").with_source(err.into())
    }
}

/// Redeem a ticket instance.
///
/// ```bash
/// curl -X POST http://localhost:8080/tickets/v1/instances/AbCdEf123456/validate
/// ```
///
/// # Errors
///
/// - `404 TICKET_NOT_FOUND` for an unknown id
/// - `400 TICKET_ALREADY_REDEEMED` for a second redemption
/// - `503` if the store is unavailable
pub async fn validate_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> WebResult<Json<TicketInstanceResponse>> {
    let ticket = state.redemption.redeem(&TicketInstanceId::new(id)).await?;
    Ok(Json(ticket.into()))
}

/// Fetch one ticket instance.
///
/// # Errors
///
/// `404 TICKET_NOT_FOUND` for an unknown id, `503` if the store is
/// unavailable.
pub async fn get_instance(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> WebResult<Json<TicketInstanceResponse>> {
    let id = TicketInstanceId::new(id);
    state
        .store
        .find(&id)
        .await
        .map_err(store_error)?
        .map(|ticket| Json(ticket.into()))
        .ok_or_else(|| AppError::not_found(RESOURCE, &id).with_code("TICKET_NOT_FOUND"))
}

/// List the ticket instances a buyer owns, oldest first.
///
/// # Errors
///
/// `503` if the store is unavailable.
pub async fn list_user_instances(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> WebResult<Json<Vec<TicketInstanceResponse>>> {
    let tickets = state
        .store
        .find_by_buyer(&BuyerId::new(user_id))
        .await
        .map_err(store_error)?;
    Ok(Json(tickets.into_iter().map(Into::into).collect()))
}
