//! # tmon-db: Database Layer for TMON
//!
//! SQLite persistence for hub and spoke nodes, built on sqlx.
//!
//! ## Architecture Position
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TMON Data Flow                                   │
//! │                                                                         │
//! │  tmon-sync service (CommandQueue::poll_and_claim)                      │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  ┌─────────────────────────────────────────────────────────────────┐   │
//! │  │                     tmon-db (THIS CRATE)                        │   │
//! │  │                                                                 │   │
//! │  │   ┌───────────────┐    ┌──────────────────┐    ┌────────────┐  │   │
//! │  │   │   Database    │    │  Repositories    │    │ Migrations │  │   │
//! │  │   │   (pool.rs)   │    │                  │    │ (embedded) │  │   │
//! │  │   │               │    │ DeviceRepo       │    │            │  │   │
//! │  │   │ SqlitePool    │◄───│ CommandRepo      │    │ 001_init   │  │   │
//! │  │   │               │    │ StagedRepo       │    │            │  │   │
//! │  │   │               │    │ PairingRepo ...  │    │            │  │   │
//! │  │   └───────────────┘    └──────────────────┘    └────────────┘  │   │
//! │  └─────────────────────────────────────────────────────────────────┘   │
//! │       │                                                                 │
//! │       ▼                                                                 │
//! │  SQLite file ([database] path in tmon.toml)                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`pool`] - Connection pool creation and configuration
//! - [`migrations`] - Embedded database migrations
//! - [`error`] - Database error types
//! - [`repository`] - Typed repositories, one per table
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tmon_db::{Database, DbConfig};
//!
//! let db = Database::new(DbConfig::new("spoke.db")).await?;
//! let id = db.commands().enqueue("U1", "reboot", &serde_json::json!({})).await?.id;
//! let claimed = db.commands().claim("U1", 10).await?;
//! ```

// =============================================================================
// Module Declarations
// =============================================================================

pub mod error;
pub mod migrations;
pub mod pool;
pub mod repository;

// =============================================================================
// Re-exports
// =============================================================================

pub use error::{DbError, DbResult};
pub use pool::{Database, DbConfig};

pub use repository::audit::AuditRepository;
pub use repository::command::CommandRepository;
pub use repository::device::DeviceRepository;
pub use repository::hub_link::HubLinkRepository;
pub use repository::pairing::PairingRepository;
pub use repository::site_status::SiteStatusRepository;
pub use repository::staged::StagedSettingsRepository;
