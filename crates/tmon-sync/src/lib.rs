//! # tmon-sync: Services and Hub/Spoke Protocol for TMON
//!
//! The layer between the HTTP routers and the database: the command
//! queue, settings stager, device poll bundle, pairing protocol, hub
//! aggregator, timer jobs, and every outbound hub ↔ spoke call.
//!
//! ## Architecture Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TMON Service Layer                               │
//! │                                                                         │
//! │  SPOKE (Unit Connector)                HUB (TMON Admin)                 │
//! │  ┌────────────────┐                    ┌────────────────┐               │
//! │  │ PollService    │◄── device poll     │ HubPairing     │◄── /uc/pair   │
//! │  │  applied       │                    │  pair/rotate/  │               │
//! │  │  staged        │                    │  revoke/unpair │               │
//! │  │  claim ──┐     │                    └───────┬────────┘               │
//! │  └──────────┼─────┘                            │                        │
//! │  ┌──────────▼─────┐  ┌───────────────┐  ┌──────▼────────┐ ┌───────────┐ │
//! │  │ CommandQueue   │  │SettingsStager │  │ HubAggregator │ │ SiteRelay │ │
//! │  │ enqueue/claim/ │  │ stage/apply/  │  │ count probes  │ │ operator  │ │
//! │  │ complete/reap  │  │ clear/recon.  │  │ per site      │ │ → spoke   │ │
//! │  └────────────────┘  └───────────────┘  └──────┬────────┘ └─────┬─────┘ │
//! │  ┌────────────────┐  ┌───────────────┐         │                │       │
//! │  │ DeviceRegistry │  │ SpokePairing  │──┐      │                │       │
//! │  │ ingest/purge   │  │ hub link, auth│  │      │                │       │
//! │  └────────────────┘  └───────────────┘  │      │                │       │
//! │                                         ▼      ▼                ▼       │
//! │                                  ┌────────────────────────────────────┐ │
//! │                                  │ SiteClient (reqwest, timeouts)     │ │
//! │                                  └────────────────────────────────────┘ │
//! │                                                                         │
//! │  scheduler: claim-reaper, hub-check-in, count-refresh (JobGuard)        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Module Organization
//!
//! - [`api`] - Error → HTTP response mapping for both servers
//! - [`config`] - Node configuration (TOML + `TMON_*` env)
//! - [`error`] - Service error type and HTTP classification
//! - [`credentials`] - Secret generation and constant-time comparison
//! - [`protocol`] - Paths, request/response bodies, count parsing
//! - [`client`] - Outbound HTTP calls
//! - [`queue`] - Command queue
//! - [`stager`] - Settings stager
//! - [`registry`] - Device registry
//! - [`poll`] - Device poll bundle
//! - [`pairing`] - Pairing protocol, hub and spoke side
//! - [`relay`] - Hub operator relays to spokes
//! - [`aggregator`] - Hub device count refresh
//! - [`scheduler`] - Non-overlapping timer jobs
//!
//! ## Usage
//!
//! ```rust,ignore
//! use tmon_sync::{CommandQueue, PollService, TmonConfig};
//! use tmon_db::{Database, DbConfig};
//!
//! let config = TmonConfig::load(None)?;
//! let db = Database::new(DbConfig::new(&config.database.path)).await?;
//!
//! let queue = CommandQueue::new(db.clone(), config.queue.poll_max_commands);
//! queue.enqueue("U1", "reboot", serde_json::json!({})).await?;
//!
//! let poll = PollService::new(db, queue);
//! let bundle = poll.get_poll_bundle("U1", None).await?;
//! assert_eq!(bundle.commands.len(), 1);
//! ```

pub mod aggregator;
pub mod api;
pub mod client;
pub mod config;
pub mod credentials;
pub mod error;
pub mod pairing;
pub mod poll;
pub mod protocol;
pub mod queue;
pub mod registry;
pub mod relay;
pub mod scheduler;
pub mod stager;

// =============================================================================
// Re-exports
// =============================================================================

pub use aggregator::HubAggregator;
pub use api::{ApiError, ApiJson, ApiQuery, ApiResult};
pub use client::SiteClient;
pub use config::{NodeRole, TmonConfig};
pub use error::{ErrorKind, SyncError, SyncResult};
pub use pairing::{HubPairing, SpokePairing};
pub use poll::PollService;
pub use queue::CommandQueue;
pub use registry::DeviceRegistry;
pub use relay::SiteRelay;
pub use scheduler::{JobGuard, JobHandle};
pub use stager::{SettingsStager, StageOutcome};
