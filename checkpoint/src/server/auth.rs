//! Bearer token check for `/api/*`.

use super::error::AppError;
use super::state::AppState;
use axum::{
    extract::{Request, State},
    http::header::AUTHORIZATION,
    middleware::Next,
    response::Response,
};

/// Reject requests without `Authorization: Bearer <token>` when a token is configured.
///
/// # Errors
///
/// 401 if the header is missing or does not carry the configured token.
pub async fn require_api_token(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, AppError> {
    let Some(expected) = state.api_token.as_deref() else {
        return Ok(next.run(request).await);
    };

    let presented = request
        .headers()
        .get(AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .map(str::trim);

    let verdict = match presented {
        Some(token) if constant_time_eq::constant_time_eq(token.as_bytes(), expected.as_bytes()) => {
            Ok(())
        },
        Some(_) => Err(AppError::unauthorized("Invalid API token")),
        None => Err(AppError::unauthorized("Missing bearer token")),
    };

    match verdict {
        Ok(()) => Ok(next.run(request).await),
        Err(error) => {
            tracing::warn!(path = %request.uri().path(), "Rejected unauthenticated API request");
            Err(error)
        },
    }
}
