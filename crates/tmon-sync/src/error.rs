//! # Sync Error Types
//!
//! Error types for service operations and outbound hub/spoke calls.
//!
//! ## Error Categories
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                       Error Kinds → HTTP                                │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Validation 400 │  │    Auth  403    │  │   NotFound  404         │ │
//! │  │  bad field      │  │  missing/wrong  │  │  unit / command /       │ │
//! │  │  bad settings   │  │  shared secret  │  │  pairing / staged       │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! │                                                                         │
//! │  ┌─────────────────┐  ┌─────────────────┐  ┌─────────────────────────┐ │
//! │  │  Conflict  409  │  │   Remote  502   │  │ Storage/Config/Internal │ │
//! │  │  duplicate key  │  │  paired site    │  │          500            │ │
//! │  │  not paired     │  │  failed / !2xx  │  │                         │ │
//! │  └─────────────────┘  └─────────────────┘  └─────────────────────────┘ │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! `Remote` errors are caught per site by the aggregator and by relays;
//! everything else propagates to the caller.

use thiserror::Error;

use tmon_core::{CoreError, ValidationError};
use tmon_db::DbError;

/// Result type alias for service operations.
pub type SyncResult<T> = Result<T, SyncError>;

/// Longest remote body kept in an error.
pub const MAX_REMOTE_BODY_CHARS: usize = 512;

/// Coarse error classification used for HTTP mapping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    Validation,
    Auth,
    NotFound,
    Storage,
    Remote,
    Conflict,
    Config,
    Internal,
}

/// Service and protocol errors.
#[derive(Debug, Error)]
pub enum SyncError {
    // =========================================================================
    // Configuration Errors
    // =========================================================================
    /// Invalid configuration value.
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// Failed to load config file.
    #[error("Failed to load config: {0}")]
    ConfigLoadFailed(String),

    /// Failed to save config file.
    #[error("Failed to save config: {0}")]
    ConfigSaveFailed(String),

    // =========================================================================
    // Request Errors
    // =========================================================================
    /// Bad or missing input.
    #[error("{0}")]
    Validation(#[from] ValidationError),

    /// Missing or mismatched shared secret.
    ///
    /// The message never includes the presented or expected secret.
    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    /// Unknown unit, command, pairing, ...
    #[error("{entity} not found: {id}")]
    NotFound { entity: String, id: String },

    /// State conflict (duplicate machine id, disallowed transition).
    #[error("Conflict: {0}")]
    Conflict(String),

    /// Operation needs a completed pairing.
    #[error("Not paired with a hub")]
    NotPaired,

    // =========================================================================
    // Storage Errors
    // =========================================================================
    /// Persistence failure.
    #[error("Storage error: {0}")]
    Storage(String),

    // =========================================================================
    // Remote Errors
    // =========================================================================
    /// Outbound call failed or returned non-2xx.
    ///
    /// `status` is `None` for transport failures (timeout, refused).
    #[error("Remote call to {url} failed{}: {body}", status_suffix(.status))]
    Remote {
        url: String,
        status: Option<u16>,
        body: String,
    },

    // =========================================================================
    // Internal Errors
    // =========================================================================
    /// Failed to encode or decode JSON.
    #[error("Serialization failed: {0}")]
    Serialization(String),

    /// Internal error.
    #[error("Internal error: {0}")]
    Internal(String),
}

impl SyncError {
    pub fn unauthorized(reason: impl Into<String>) -> Self {
        SyncError::Unauthorized(reason.into())
    }

    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        SyncError::NotFound {
            entity: entity.into(),
            id: id.into(),
        }
    }

    /// Builds a `Remote` error, truncating `body`.
    pub fn remote(url: impl Into<String>, status: Option<u16>, body: &str) -> Self {
        SyncError::Remote {
            url: url.into(),
            status,
            body: truncate_body(body),
        }
    }

    /// Maps a transport failure into a `Remote` error.
    pub fn from_transport(url: impl Into<String>, err: &reqwest::Error) -> Self {
        let reason = if err.is_timeout() {
            "request timed out".to_string()
        } else if err.is_connect() {
            "connection failed".to_string()
        } else {
            err.to_string()
        };
        SyncError::remote(url, err.status().map(|s| s.as_u16()), &reason)
    }

    /// Classifies the error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            SyncError::InvalidConfig(_)
            | SyncError::ConfigLoadFailed(_)
            | SyncError::ConfigSaveFailed(_) => ErrorKind::Config,
            SyncError::Validation(_) => ErrorKind::Validation,
            SyncError::Unauthorized(_) => ErrorKind::Auth,
            SyncError::NotFound { .. } => ErrorKind::NotFound,
            SyncError::Conflict(_) | SyncError::NotPaired => ErrorKind::Conflict,
            SyncError::Storage(_) => ErrorKind::Storage,
            SyncError::Remote { .. } => ErrorKind::Remote,
            SyncError::Serialization(_) | SyncError::Internal(_) => ErrorKind::Internal,
        }
    }

    /// Returns true if a later attempt could succeed.
    ///
    /// Transport failures, 408, 429 and 5xx from a remote site.
    pub fn is_retryable(&self) -> bool {
        match self {
            SyncError::Remote { status: None, .. } => true,
            SyncError::Remote {
                status: Some(status),
                ..
            } => matches!(status, 408 | 429 | 500..=599),
            _ => false,
        }
    }

    /// HTTP status of a remote failure, if the remote answered.
    pub fn remote_status(&self) -> Option<u16> {
        match self {
            SyncError::Remote { status, .. } => *status,
            _ => None,
        }
    }
}

fn status_suffix(status: &Option<u16>) -> String {
    status
        .map(|s| format!(" with HTTP {}", s))
        .unwrap_or_default()
}

/// Keeps at most [`MAX_REMOTE_BODY_CHARS`] characters, marking the cut.
pub fn truncate_body(body: &str) -> String {
    let mut preview: String = body.chars().take(MAX_REMOTE_BODY_CHARS).collect();
    if body.chars().count() > MAX_REMOTE_BODY_CHARS {
        preview.push_str("...");
    }
    preview
}

// =============================================================================
// Error Conversions
// =============================================================================

impl From<DbError> for SyncError {
    fn from(err: DbError) -> Self {
        match err {
            DbError::NotFound { entity, id } => SyncError::NotFound { entity, id },
            DbError::UniqueViolation { field, value } => {
                SyncError::Conflict(format!("{} '{}' already in use", field, value))
            }
            other => SyncError::Storage(other.to_string()),
        }
    }
}

impl From<CoreError> for SyncError {
    fn from(err: CoreError) -> Self {
        match err {
            CoreError::UnitNotFound(unit_id) => SyncError::not_found("Unit", unit_id),
            CoreError::CommandNotFound(id) => SyncError::not_found("Command", id.to_string()),
            CoreError::NothingStaged(unit_id) => SyncError::not_found("Staged settings", unit_id),
            err @ CoreError::InvalidTransition { .. } => SyncError::Conflict(err.to_string()),
            CoreError::Validation(v) => SyncError::Validation(v),
        }
    }
}

impl From<serde_json::Error> for SyncError {
    fn from(err: serde_json::Error) -> Self {
        SyncError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for SyncError {
    fn from(err: std::io::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::de::Error> for SyncError {
    fn from(err: toml::de::Error) -> Self {
        SyncError::ConfigLoadFailed(err.to_string())
    }
}

impl From<toml::ser::Error> for SyncError {
    fn from(err: toml::ser::Error) -> Self {
        SyncError::ConfigSaveFailed(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmon_core::CommandStatus;

    #[test]
    fn test_kinds() {
        assert_eq!(SyncError::unauthorized("missing header").kind(), ErrorKind::Auth);
        assert_eq!(SyncError::NotPaired.kind(), ErrorKind::Conflict);
        assert_eq!(
            SyncError::remote("https://a.example", Some(500), "boom").kind(),
            ErrorKind::Remote
        );
        assert_eq!(
            SyncError::from(ValidationError::required("unit_id")).kind(),
            ErrorKind::Validation
        );
    }

    #[test]
    fn test_retryable_errors() {
        assert!(SyncError::remote("u", None, "timed out").is_retryable());
        assert!(SyncError::remote("u", Some(503), "").is_retryable());
        assert!(!SyncError::remote("u", Some(403), "").is_retryable());
        assert!(!SyncError::Storage("disk full".into()).is_retryable());
    }

    #[test]
    fn test_remote_body_truncated() {
        let body = "x".repeat(2_000);
        let err = SyncError::remote("https://a.example/x", Some(500), &body);
        match err {
            SyncError::Remote { body, .. } => {
                assert_eq!(body.chars().count(), MAX_REMOTE_BODY_CHARS + 3);
                assert!(body.ends_with("..."));
            }
            other => panic!("unexpected {other:?}"),
        }
    }

    #[test]
    fn test_remote_display() {
        let err = SyncError::remote("https://a.example/x", Some(502), "bad gateway");
        assert_eq!(
            err.to_string(),
            "Remote call to https://a.example/x failed with HTTP 502: bad gateway"
        );
        let err = SyncError::remote("https://a.example/x", None, "request timed out");
        assert_eq!(
            err.to_string(),
            "Remote call to https://a.example/x failed: request timed out"
        );
    }

    #[test]
    fn test_db_and_core_conversions() {
        let err: SyncError = DbError::duplicate("devices.machine_id", "mac-1").into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: SyncError = DbError::PoolExhausted.into();
        assert_eq!(err.kind(), ErrorKind::Storage);

        let err: SyncError = CoreError::InvalidTransition {
            id: 1,
            from: CommandStatus::Claimed,
            to: CommandStatus::Queued,
        }
        .into();
        assert_eq!(err.kind(), ErrorKind::Conflict);

        let err: SyncError = CoreError::NothingStaged("U1".into()).into();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
