//! # Validation Module
//!
//! Input validation for values that cross a site boundary: unit ids from
//! devices, command names from operators, site URLs and shared secrets
//! from the pairing handshake.
//!
//! ## Validation Layers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                      Validation Layers                                  │
//! │                                                                         │
//! │  Layer 1: axum extractors (spoke-api / hub-api)                        │
//! │  └── JSON shape (deserialization)                                      │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 2: THIS MODULE                                                  │
//! │  ├── Required / length / charset                                       │
//! │  └── Site URL normalization (pairing key)                              │
//! │           │                                                             │
//! │           ▼                                                             │
//! │  Layer 3: SQLite                                                       │
//! │  ├── PRIMARY KEY / UNIQUE (site_url, machine_id)                       │
//! │  └── CHECK (status IN ...)                                             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Usage
//! ```rust
//! use tmon_core::validation::{normalize_site_url, validate_unit_id};
//!
//! assert_eq!(validate_unit_id("  U-100 ").unwrap(), "U-100");
//! assert_eq!(
//!     normalize_site_url("HTTPS://Spoke.Example.com/farm/?x=1").unwrap(),
//!     "https://spoke.example.com/farm"
//! );
//! ```

use url::Url;

use crate::error::ValidationError;
use crate::{DEFAULT_POLL_MAX_COMMANDS, MAX_POLL_COMMANDS, MIN_SECRET_BYTES};

/// Result type for validation operations.
pub type ValidationResult<T> = Result<T, ValidationError>;

const MAX_UNIT_ID_LEN: usize = 64;
const MAX_MACHINE_ID_LEN: usize = 128;
const MAX_COMMAND_LEN: usize = 64;

// =============================================================================
// Identifiers
// =============================================================================

/// Validates and trims a unit id.
///
/// ## Rules
/// - Must not be empty after trimming
/// - At most 64 characters
/// - ASCII letters, digits, `-`, `_`, `.` and `:` only
pub fn validate_unit_id(unit_id: &str) -> ValidationResult<String> {
    let unit_id = unit_id.trim();

    if unit_id.is_empty() {
        return Err(ValidationError::required("unit_id"));
    }

    if unit_id.len() > MAX_UNIT_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "unit_id".to_string(),
            max: MAX_UNIT_ID_LEN,
        });
    }

    if !unit_id
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '-' | '_' | '.' | ':'))
    {
        return Err(ValidationError::invalid_format(
            "unit_id",
            "only letters, digits, '-', '_', '.' and ':' are allowed",
        ));
    }

    Ok(unit_id.to_string())
}

/// Trims an optional machine id; blank values count as absent.
pub fn validate_machine_id(machine_id: Option<&str>) -> ValidationResult<Option<String>> {
    let Some(machine_id) = machine_id.map(str::trim).filter(|m| !m.is_empty()) else {
        return Ok(None);
    };

    if machine_id.len() > MAX_MACHINE_ID_LEN {
        return Err(ValidationError::TooLong {
            field: "machine_id".to_string(),
            max: MAX_MACHINE_ID_LEN,
        });
    }

    Ok(Some(machine_id.to_string()))
}

/// Validates a command name and returns it lowercased.
///
/// Command names are enum-like (`reboot`, `relay_toggle`, `file_update`).
pub fn validate_command_name(command: &str) -> ValidationResult<String> {
    let command = command.trim().to_lowercase();

    if command.is_empty() {
        return Err(ValidationError::required("command"));
    }

    if command.len() > MAX_COMMAND_LEN {
        return Err(ValidationError::TooLong {
            field: "command".to_string(),
            max: MAX_COMMAND_LEN,
        });
    }

    if !command
        .chars()
        .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit() || matches!(c, '_' | '-' | '.'))
    {
        return Err(ValidationError::invalid_format(
            "command",
            "only lowercase letters, digits, '_', '-' and '.' are allowed",
        ));
    }

    Ok(command)
}

/// Resolves the number of commands a poll may claim.
///
/// `None` means the configured default.
pub fn validate_max_count(max: Option<u32>, default: u32) -> ValidationResult<u32> {
    let max = max.unwrap_or(if default == 0 {
        DEFAULT_POLL_MAX_COMMANDS
    } else {
        default
    });

    if max == 0 || max > MAX_POLL_COMMANDS {
        return Err(ValidationError::OutOfRange {
            field: "max".to_string(),
            min: 1,
            max: MAX_POLL_COMMANDS as i64,
        });
    }

    Ok(max)
}

// =============================================================================
// Site URLs
// =============================================================================

/// Normalizes a site URL so it can key a pairing.
///
/// ## Rules
/// - `http` or `https` only, host required
/// - Scheme and host lowercased, default port dropped
/// - Credentials, query and fragment dropped
/// - Trailing `/` removed from the path
pub fn normalize_site_url(raw: &str) -> ValidationResult<String> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(ValidationError::required("site_url"));
    }

    let url = Url::parse(raw)
        .map_err(|e| ValidationError::invalid_format("site_url", e.to_string()))?;

    if !matches!(url.scheme(), "http" | "https") {
        return Err(ValidationError::invalid_format(
            "site_url",
            format!("unsupported scheme '{}'", url.scheme()),
        ));
    }

    let host = url
        .host_str()
        .filter(|h| !h.is_empty())
        .ok_or_else(|| ValidationError::invalid_format("site_url", "missing host"))?;

    let mut normalized = format!("{}://{}", url.scheme(), host.to_lowercase());
    if let Some(port) = url.port() {
        normalized.push_str(&format!(":{}", port));
    }
    normalized.push_str(url.path().trim_end_matches('/'));

    Ok(normalized)
}

// =============================================================================
// Shared Secrets
// =============================================================================

/// Checks that a shared secret is hex and carries enough entropy.
pub fn validate_secret(field: &str, secret: &str) -> ValidationResult<()> {
    if secret.is_empty() {
        return Err(ValidationError::required(field));
    }

    if secret.len() < MIN_SECRET_BYTES * 2 {
        return Err(ValidationError::invalid_format(
            field,
            format!("must be at least {} hex characters", MIN_SECRET_BYTES * 2),
        ));
    }

    if !secret.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(ValidationError::invalid_format(field, "must be hex encoded"));
    }

    Ok(())
}
