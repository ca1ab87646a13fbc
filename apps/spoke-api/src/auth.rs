//! Shared-secret checks for the admin and count routes.
//!
//! Both run as route layers, so a rejected request never reaches a handler
//! or the database rows behind it.

use axum::extract::{Request, State};
use axum::middleware::Next;
use axum::response::Response;

use tmon_sync::api::header_value;
use tmon_sync::credentials::{ADMIN_HEADER, HUB_HEADER, READ_HEADER};
use tmon_sync::ApiError;

use crate::AppState;

/// Requires `X-TMON-ADMIN` to match the key this spoke gave its hub.
pub async fn require_admin(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    state
        .pairing
        .verify_admin(header_value(request.headers(), ADMIN_HEADER))
        .await?;
    Ok(next.run(request).await)
}

/// Requires `X-TMON-READ` (read token) or `X-TMON-HUB` (hub key).
pub async fn require_read(
    State(state): State<AppState>,
    request: Request,
    next: Next,
) -> Result<Response, ApiError> {
    let headers = request.headers();
    state
        .pairing
        .verify_read(header_value(headers, READ_HEADER), header_value(headers, HUB_HEADER))
        .await?;
    Ok(next.run(request).await)
}
