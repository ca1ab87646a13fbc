//! # Error Types
//!
//! Domain-specific error types for tmon-core.
//!
//! ## Error Hierarchy
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Error Types                                     │
//! │                                                                         │
//! │  tmon-core errors (this file)                                          │
//! │  ├── CoreError        - Domain rule violations                         │
//! │  └── ValidationError  - Input validation failures                      │
//! │                                                                         │
//! │  tmon-db errors                                                        │
//! │  └── DbError          - Persistence failures                           │
//! │                                                                         │
//! │  tmon-sync errors                                                      │
//! │  └── SyncError        - Service + remote call failures                 │
//! │                                                                         │
//! │  hub-api / spoke-api                                                   │
//! │  └── ApiError         - JSON body + HTTP status                        │
//! │                                                                         │
//! │  Flow: ValidationError → CoreError → SyncError → ApiError → client     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use thiserror::Error;

use crate::types::CommandStatus;

// =============================================================================
// Core Error
// =============================================================================

/// Domain rule violations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// Unit is not known to this site.
    #[error("Unit not found: {0}")]
    UnitNotFound(String),

    /// Command id is not known to this site.
    #[error("Command not found: {0}")]
    CommandNotFound(i64),

    /// A command status change that the state machine does not allow.
    ///
    /// ## When This Occurs
    /// - Deleting a command that a device already claimed
    /// - Claiming a command that is already terminal
    #[error("Command {id} is {from}, cannot move to {to}")]
    InvalidTransition {
        id: i64,
        from: CommandStatus,
        to: CommandStatus,
    },

    /// Nothing is staged for the unit.
    #[error("No staged settings for unit {0}")]
    NothingStaged(String),

    /// Validation error (wraps ValidationError).
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),
}

// =============================================================================
// Validation Error
// =============================================================================

/// Input validation errors.
///
/// Raised before any storage access; surfaced to callers as HTTP 400.
#[derive(Debug, Error)]
pub enum ValidationError {
    /// A required field is missing or empty.
    #[error("{field} is required")]
    Required { field: String },

    /// Field value is too long.
    #[error("{field} must be at most {max} characters")]
    TooLong { field: String, max: usize },

    /// Numeric value is out of range.
    #[error("{field} must be between {min} and {max}")]
    OutOfRange { field: String, min: i64, max: i64 },

    /// Invalid format (bad URL, non-hex secret, ...).
    #[error("{field} has invalid format: {reason}")]
    InvalidFormat { field: String, reason: String },

    /// Settings payload is not a JSON object.
    #[error("settings must be a JSON object")]
    NotAnObject,

    /// A known settings key carries a value of the wrong kind.
    #[error("setting {key} must be {expected}")]
    WrongSettingKind { key: String, expected: String },

    /// Settings keys outside the registry while the policy is `reject`.
    #[error("unknown settings keys: {keys:?}")]
    UnknownSettingKeys { keys: Vec<String> },
}

impl ValidationError {
    /// Shorthand for [`ValidationError::Required`].
    pub fn required(field: impl Into<String>) -> Self {
        ValidationError::Required {
            field: field.into(),
        }
    }

    /// Shorthand for [`ValidationError::InvalidFormat`].
    pub fn invalid_format(field: impl Into<String>, reason: impl Into<String>) -> Self {
        ValidationError::InvalidFormat {
            field: field.into(),
            reason: reason.into(),
        }
    }
}

// =============================================================================
// Result Type Alias
// =============================================================================

/// Convenience type alias for Results with CoreError.
pub type CoreResult<T> = Result<T, CoreError>;
