//! # Repository Module
//!
//! One repository per table, each a thin handle over the shared pool.
//!
//! ## Repository Layout
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                    Repositories by Node Role                            │
//! │                                                                         │
//! │  SPOKE                                HUB                               │
//! │  ├── DeviceRepository   devices       ├── PairingRepository  pairings   │
//! │  ├── CommandRepository  commands      └── SiteStatusRepository          │
//! │  ├── StagedSettingsRepository                                           │
//! │  └── HubLinkRepository  hub_links     BOTH                              │
//! │                                       └── AuditRepository   audit_log   │
//! │                                                                         │
//! │  Each repository owns its consistency rules: upserts by key, single-   │
//! │  statement status changes, multi-table deletes in one transaction.     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod audit;
pub mod command;
pub mod device;
pub mod hub_link;
pub mod pairing;
pub mod site_status;
pub mod staged;
