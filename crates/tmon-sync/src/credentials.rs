//! # Shared Secrets
//!
//! Secret generation and comparison for hub/spoke authentication.
//!
//! ## Headers
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Cross-site Authentication                            │
//! │                                                                         │
//! │  spoke ──► hub     X-TMON-HUB    hub_key   (check-in)                  │
//! │  hub   ──► spoke   X-TMON-ADMIN  uc_key    (settings, commands, purge) │
//! │  hub   ──► spoke   X-TMON-READ   read_token (count probes)             │
//! │                                                                         │
//! │  Secrets: 32 random bytes from the OS RNG, hex encoded (64 chars).     │
//! │  Comparison: constant time; absent or empty never matches.             │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use rand::rngs::OsRng;
use rand::RngCore;
use subtle::ConstantTimeEq;

/// Spoke → hub secret header.
pub const HUB_HEADER: &str = "x-tmon-hub";

/// Hub → spoke admin header (also used for the hub's own operator key).
pub const ADMIN_HEADER: &str = "x-tmon-admin";

/// Hub → spoke read-only header.
pub const READ_HEADER: &str = "x-tmon-read";

const SECRET_BYTES: usize = 32;

/// Generates a fresh hex-encoded secret.
pub fn generate_secret() -> String {
    let mut bytes = [0u8; SECRET_BYTES];
    OsRng.fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// Compares a presented secret against the stored one in constant time.
///
/// Returns false when either side is missing or empty.
pub fn secrets_match(presented: Option<&str>, expected: Option<&str>) -> bool {
    match (presented, expected) {
        (Some(presented), Some(expected)) if !presented.is_empty() && !expected.is_empty() => {
            presented.as_bytes().ct_eq(expected.as_bytes()).into()
        }
        _ => false,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tmon_core::validation::validate_secret;

    #[test]
    fn test_generated_secret_shape() {
        let secret = generate_secret();
        assert_eq!(secret.len(), 64);
        assert!(validate_secret("uc_key", &secret).is_ok());
        assert_ne!(secret, generate_secret());
    }

    #[test]
    fn test_secrets_match() {
        assert!(secrets_match(Some("abc"), Some("abc")));
        assert!(!secrets_match(Some("abc"), Some("abd")));
        assert!(!secrets_match(Some("abc"), Some("abcd")));
        assert!(!secrets_match(None, Some("abc")));
        assert!(!secrets_match(Some("abc"), None));
        assert!(!secrets_match(Some(""), Some("")));
    }
}
