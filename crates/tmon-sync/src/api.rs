//! # HTTP Error Mapping
//!
//! Turns a [`SyncError`] into the JSON error body both servers return.
//!
//! ```text
//!   SyncError ──kind()──► status      body
//!   Validation            400         {"code":"VALIDATION","message":"..."}
//!   Auth                  403         {"code":"FORBIDDEN","message":"..."}
//!   NotFound              404         {"code":"NOT_FOUND","message":"..."}
//!   Conflict              409         {"code":"CONFLICT","message":"..."}
//!   Remote                502         {"code":"REMOTE","message":"..."}
//!   Storage/Config/...    500         {"code":"INTERNAL","message":"internal error"}
//! ```
//!
//! Server-side failures are logged with their detail and answered with a
//! generic message. Bodies and query strings that fail to parse come back
//! as 400 `VALIDATION` through [`ApiJson`] and [`ApiQuery`], so callers see
//! one error shape.

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{FromRequest, FromRequestParts, Query, Request};
use axum::http::request::Parts;
use axum::http::{HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::{error, warn};

use crate::error::{ErrorKind, SyncError};

/// JSON body of every error response.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorBody {
    pub code: String,
    pub message: String,
}

/// Error returned from a handler.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    body: ErrorBody,
}

/// Handler result with a JSON body.
pub type ApiResult<T> = Result<Json<T>, ApiError>;

impl ApiError {
    pub fn new(status: StatusCode, code: &str, message: impl Into<String>) -> Self {
        ApiError {
            status,
            body: ErrorBody {
                code: code.to_string(),
                message: message.into(),
            },
        }
    }

    pub fn forbidden(message: impl Into<String>) -> Self {
        ApiError::new(StatusCode::FORBIDDEN, "FORBIDDEN", message)
    }

    pub fn status(&self) -> StatusCode {
        self.status
    }

    pub fn body(&self) -> &ErrorBody {
        &self.body
    }
}

impl From<SyncError> for ApiError {
    fn from(err: SyncError) -> Self {
        match err.kind() {
            ErrorKind::Validation => ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION", err.to_string()),
            ErrorKind::Auth => {
                warn!(error = %err, "Request rejected");
                ApiError::forbidden(err.to_string())
            }
            ErrorKind::NotFound => ApiError::new(StatusCode::NOT_FOUND, "NOT_FOUND", err.to_string()),
            ErrorKind::Conflict => ApiError::new(StatusCode::CONFLICT, "CONFLICT", err.to_string()),
            ErrorKind::Remote => {
                warn!(error = %err, "Remote call failed");
                ApiError::new(StatusCode::BAD_GATEWAY, "REMOTE", err.to_string())
            }
            ErrorKind::Storage | ErrorKind::Config | ErrorKind::Internal => {
                error!(error = %err, "Request failed");
                ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL", "internal error")
            }
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(self.body)).into_response()
    }
}

impl From<JsonRejection> for ApiError {
    fn from(rejection: JsonRejection) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION", rejection.body_text())
    }
}

impl From<QueryRejection> for ApiError {
    fn from(rejection: QueryRejection) -> Self {
        ApiError::new(StatusCode::BAD_REQUEST, "VALIDATION", rejection.body_text())
    }
}

// =============================================================================
// Extractors
// =============================================================================

/// JSON request body; parse failures are answered as [`ApiError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiJson<T>(pub T);

impl<T, S> FromRequest<S> for ApiJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let Json(value) = Json::<T>::from_request(req, state).await?;
        Ok(ApiJson(value))
    }
}

/// Query string; parse failures are answered as [`ApiError`].
#[derive(Debug, Clone, Copy, Default)]
pub struct ApiQuery<T>(pub T);

impl<T, S> FromRequestParts<S> for ApiQuery<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = ApiError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let Query(value) = Query::<T>::from_request_parts(parts, state).await?;
        Ok(ApiQuery(value))
    }
}

/// Reads a header as trimmed UTF-8; missing, blank or non-UTF-8 is `None`.
pub fn header_value<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .map(str::trim)
        .filter(|v| !v.is_empty())
}
