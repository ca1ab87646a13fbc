//! Operator key check for the hub's `/admin/*` routes.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;
use tracing::warn;

use tmon_sync::api::header_value;
use tmon_sync::credentials::{secrets_match, ADMIN_HEADER};
use tmon_sync::ApiError;

use crate::AppState;

/// Requires `X-TMON-ADMIN` to match `hub.operator_key`.
///
/// With no operator key configured every operator call is refused.
pub async fn require_operator(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let Some(expected) = state.operator_key.as_deref() else {
        warn!(path = %request.uri().path(), "hub.operator_key not set; operator routes are disabled");
        return Err(ApiError::forbidden("operator access is not configured"));
    };

    if !secrets_match(header_value(request.headers(), ADMIN_HEADER), Some(expected)) {
        warn!(path = %request.uri().path(), "Operator key rejected");
        return Err(ApiError::forbidden("invalid operator key"));
    }
    Ok(next.run(request).await)
}
