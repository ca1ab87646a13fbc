//! # tmon-core: Pure Domain Logic for TMON
//!
//! Domain types and rules shared by the TMON hub ("TMON Admin") and every
//! spoke ("Unit Connector"). Nothing in here touches a socket, a file or a
//! database.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          TMON Architecture                              │
//! │                                                                         │
//! │   Field units ──poll──► spoke-api ◄──pairing/relay──► hub-api           │
//! │                             │                            │              │
//! │  ┌──────────────────────────▼────────────────────────────▼──────────┐  │
//! │  │                     tmon-sync (services)                         │  │
//! │  └──────────────────────────┬───────────────────────────────────────┘  │
//! │                             │                                           │
//! │  ┌──────────────────────────▼───────────────────────────────────────┐  │
//! │  │               ★ tmon-core (THIS CRATE) ★                         │  │
//! │  │                                                                  │  │
//! │  │   ┌───────────┐  ┌───────────┐  ┌───────────┐                    │  │
//! │  │   │   types   │  │ settings  │  │ validation│                    │  │
//! │  │   │  Command  │  │  schema   │  │ unit ids  │                    │  │
//! │  │   │  Device   │  │  registry │  │ site urls │                    │  │
//! │  │   │  Pairing  │  │           │  │ secrets   │                    │  │
//! │  │   └───────────┘  └───────────┘  └───────────┘                    │  │
//! │  │                                                                  │  │
//! │  │   NO I/O • NO DATABASE • NO NETWORK • PURE FUNCTIONS             │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! │                             │                                           │
//! │  ┌──────────────────────────▼───────────────────────────────────────┐  │
//! │  │                tmon-db (SQLite repositories)                     │  │
//! │  └──────────────────────────────────────────────────────────────────┘  │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Modules
//!
//! - [`types`] - Domain types (Device, Command, StagedSettings, Pairing, ...)
//! - [`settings`] - Registry of known device settings keys and their kinds
//! - [`validation`] - Input validation and site URL normalization
//! - [`error`] - Domain error types
//!
//! ## Example Usage
//!
//! ```rust
//! use tmon_core::CommandStatus;
//!
//! assert!(CommandStatus::Queued.can_transition_to(CommandStatus::Claimed));
//! assert!(!CommandStatus::Done.can_transition_to(CommandStatus::Claimed));
//! ```

pub mod error;
pub mod settings;
pub mod types;
pub mod validation;

// =============================================================================
// Re-exports for Convenience
// =============================================================================

pub use error::{CoreError, ValidationError};
pub use settings::{SettingKind, SettingsSchema, UnknownKeyPolicy, ValidatedSettings};
pub use types::*;

// =============================================================================
// Crate-Level Constants
// =============================================================================

/// Claimed commands older than this are eligible for re-queue.
pub const DEFAULT_CLAIM_TIMEOUT_SECS: u64 = 300;

/// Number of commands handed to a device per poll when it does not ask.
pub const DEFAULT_POLL_MAX_COMMANDS: u32 = 10;

/// Upper bound on commands handed out in a single poll.
pub const MAX_POLL_COMMANDS: u32 = 100;

/// Minimum entropy for generated shared secrets.
pub const MIN_SECRET_BYTES: usize = 24;

/// Hub/spoke API version advertised at pairing time.
///
/// Version 2 spokes expose the dedicated device-count path, so the hub can
/// skip candidate probing for them.
pub const API_VERSION: u32 = 2;

/// Command name used for firmware / file update jobs.
pub const FILE_UPDATE_COMMAND: &str = "file_update";

/// Command name used when an operator pushes staged settings out of band.
pub const APPLY_SETTINGS_COMMAND: &str = "apply_settings";
