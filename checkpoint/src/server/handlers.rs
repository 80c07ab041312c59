//! Ticket API handlers.

use super::error::AppError;
use super::state::AppState;
use crate::engine::ValidationOutcome;
use crate::store::rest::{ConditionalUpdateRequest, ConditionalUpdateResponse};
use crate::store::UpdateOutcome;
use crate::types::{Ticket, TicketId};
use axum::{
    extract::{Path, State},
    http::{HeaderMap, StatusCode},
    Json,
};
use serde::Deserialize;

/// Header carrying the operator name for server-side scans.
pub const OPERATOR_HEADER: &str = "x-operator";

/// `GET /api/tickets/:id`
///
/// # Errors
///
/// 404 if the ticket does not exist, 503 if the store is unreachable.
pub async fn get_ticket(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
) -> Result<Json<Ticket>, AppError> {
    let id = TicketId::parse(&raw_id).ok_or_else(|| AppError::not_found("Ticket", &raw_id))?;

    state
        .store()
        .get(&id)
        .await?
        .map(Json)
        .ok_or_else(|| AppError::not_found("Ticket", &id))
}

/// `POST /api/tickets/:id/conditional-update`
///
/// 200 with the stored ticket when applied, 409 with the current record otherwise.
///
/// # Errors
///
/// 503 if the store is unreachable.
pub async fn conditional_update(
    State(state): State<AppState>,
    Path(raw_id): Path<String>,
    Json(request): Json<ConditionalUpdateRequest>,
) -> Result<(StatusCode, Json<ConditionalUpdateResponse>), AppError> {
    let Some(id) = TicketId::parse(&raw_id) else {
        return Ok((
            StatusCode::CONFLICT,
            Json(UpdateOutcome::ConditionFailed(None).into()),
        ));
    };

    let outcome = state
        .store()
        .conditional_update(&id, &request.expected_status, &request.update)
        .await?;

    let status = match outcome {
        UpdateOutcome::Applied(_) => StatusCode::OK,
        UpdateOutcome::ConditionFailed(_) => {
            tracing::info!(ticket_id = %id, expected = %request.expected_status, "Conditional update rejected");
            StatusCode::CONFLICT
        },
    };

    Ok((status, Json(outcome.into())))
}

/// Body of `POST /api/scan`.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ScanRequest {
    /// Scanned code
    #[serde(default)]
    pub ticket_id: Option<String>,
}

/// `POST /api/scan`: validate and check in on behalf of a terminal.
///
/// Store failures are reported in the outcome (`SYSTEM_ERROR`), not as HTTP errors.
///
/// # Errors
///
/// 400 if `ticketId` is missing or blank.
pub async fn scan_ticket(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ScanRequest>,
) -> Result<Json<ValidationOutcome>, AppError> {
    let raw = request
        .ticket_id
        .filter(|id| !id.trim().is_empty())
        .ok_or_else(|| AppError::bad_request("ticketId is required"))?;

    let operator = headers
        .get(OPERATOR_HEADER)
        .and_then(|value| value.to_str().ok())
        .map(str::trim)
        .filter(|value| !value.is_empty());

    Ok(Json(state.engine.validate(&raw, operator).await))
}
