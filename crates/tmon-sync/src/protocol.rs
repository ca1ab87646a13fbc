//! # Wire Protocol
//!
//! Paths and JSON bodies exchanged between devices, spokes and the hub.
//!
//! ## Protocol Overview
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        TMON Wire Protocol                               │
//! │                                                                         │
//! │  DEVICE POLL (unit → spoke, unauthenticated)                           │
//! │  ───────────────────────────────────────────                           │
//! │  unit  ───► POST /device/commands { unit_id, max? }                    │
//! │  spoke ◄─── { unit_id, commands: [...] }          (claims them)        │
//! │  unit  ───► POST /device/command-complete { job_id, ok, result }       │
//! │  unit  ───► GET  /device/staged-settings?unit_id=  (poll bundle)       │
//! │                                                                         │
//! │  PAIRING (spoke → hub, bootstrap)                                      │
//! │  ────────────────────────────────                                      │
//! │  spoke ───► POST /uc/pair { site_url, uc_key, api_version }            │
//! │  hub   ◄─── { hub_key, read_token, api_version }                       │
//! │                                                                         │
//! │  HUB → SPOKE (X-TMON-ADMIN / X-TMON-READ)                              │
//! │  ─────────────────────────────────────────                             │
//! │  hub   ───► POST /admin/device/settings, /admin/device/command, ...    │
//! │  hub   ───► POST /admin/read-token { read_token | null }               │
//! │  hub   ───► GET  /admin/v2/site/devices/count, then legacy paths       │
//! │                                                                         │
//! │  SPOKE → HUB (X-TMON-HUB)                                              │
//! │  ────────────────────────                                              │
//! │  spoke ───► POST /hub/check-in { site_url, device_count }              │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Count Probing
//! Spokes are versioned independently. A spoke that advertised
//! `api_version >= 2` at pairing time is probed on the versioned path
//! first; the legacy candidates are always tried afterwards, in order.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use tmon_core::{Command, Device, PurgeReport};

/// Version reported by spokes that do not advertise one.
pub const LEGACY_API_VERSION: u32 = 1;

// =============================================================================
// Paths
// =============================================================================

pub mod paths {
    pub const HEALTH: &str = "/health";

    // Device-facing (spoke)
    pub const DEVICE_CHECK_IN: &str = "/device/check-in";
    pub const DEVICE_COMMANDS: &str = "/device/commands";
    pub const DEVICE_COMMAND_COMPLETE: &str = "/device/command-complete";
    pub const DEVICE_STAGED_SETTINGS: &str = "/device/staged-settings";

    // Admin (spoke, X-TMON-ADMIN)
    pub const ADMIN_DEVICE_SETTINGS: &str = "/admin/device/settings";
    pub const ADMIN_SETTINGS_APPLY: &str = "/admin/device/settings/apply";
    pub const ADMIN_SETTINGS_CLEAR: &str = "/admin/device/settings/clear";
    pub const ADMIN_SETTINGS_RECONCILE: &str = "/admin/device/settings/reconcile";
    pub const ADMIN_DEVICE_COMMAND: &str = "/admin/device/command";
    pub const ADMIN_COMMAND_DELETE: &str = "/admin/device/command/delete";
    pub const ADMIN_PROVISION: &str = "/admin/device/provision";
    pub const ADMIN_SUSPEND: &str = "/admin/device/suspend";
    pub const ADMIN_FIRMWARE_JOB: &str = "/admin/firmware-job";
    pub const ADMIN_READ_TOKEN: &str = "/admin/read-token";
    pub const ADMIN_PURGE_ALL: &str = "/admin/purge/all";
    pub const ADMIN_PURGE_UNIT: &str = "/admin/purge/unit";

    // Count probes (spoke, X-TMON-READ or X-TMON-HUB)
    pub const SITE_DEVICES: &str = "/admin/site/devices";
    pub const SITE_DEVICES_COUNT_V2: &str = "/admin/v2/site/devices/count";

    // Hub
    pub const UC_PAIR: &str = "/uc/pair";
    pub const HUB_CHECK_IN: &str = "/hub/check-in";
    pub const HUB_SITES: &str = "/admin/sites";
    pub const HUB_SITES_ROTATE: &str = "/admin/sites/rotate";
    pub const HUB_SITES_REVOKE: &str = "/admin/sites/revoke";
    pub const HUB_SITES_UNPAIR: &str = "/admin/sites/unpair";
    pub const HUB_REFRESH: &str = "/admin/refresh";
    pub const HUB_RELAY_SETTINGS: &str = "/admin/relay/settings";
    pub const HUB_RELAY_APPLY: &str = "/admin/relay/apply";
    pub const HUB_RELAY_CLEAR: &str = "/admin/relay/clear";
    pub const HUB_RELAY_COMMAND: &str = "/admin/relay/command";
    pub const HUB_RELAY_FIRMWARE_JOB: &str = "/admin/relay/firmware-job";
}

/// Count endpoints exposed by older spokes, in probe order.
pub const LEGACY_COUNT_PATHS: [&str; 6] = [
    paths::SITE_DEVICES,
    "/admin/devices/count",
    "/admin/devices",
    "/devices/count",
    "/site/devices",
    "/devices",
];

/// Paths to probe for a spoke that advertised `api_version`.
pub fn count_probe_paths(api_version: u32) -> Vec<&'static str> {
    let mut candidates = Vec::with_capacity(LEGACY_COUNT_PATHS.len() + 1);
    if api_version >= 2 {
        candidates.push(paths::SITE_DEVICES_COUNT_V2);
    }
    candidates.extend(LEGACY_COUNT_PATHS);
    candidates
}

/// Extracts a device count from any of the shapes spokes have returned.
///
/// ## Accepted Shapes
/// - `42` or `"42"` (numeric-only body)
/// - `[...]` (length of a bare array)
/// - `{"count": 42}` / `{"total": 42}` (number or numeric string)
/// - `{"devices": [...]}` (length)
pub fn parse_device_count(body: &str) -> Option<u64> {
    let body = body.trim();
    if let Ok(count) = body.parse::<u64>() {
        return Some(count);
    }

    let value: Value = serde_json::from_str(body).ok()?;
    match &value {
        Value::Array(items) => Some(items.len() as u64),
        Value::Object(map) => ["count", "total"]
            .iter()
            .find_map(|key| map.get(*key).and_then(count_from_value))
            .or_else(|| {
                map.get("devices")
                    .and_then(Value::as_array)
                    .map(|devices| devices.len() as u64)
            }),
        other => count_from_value(other),
    }
}

fn count_from_value(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

// =============================================================================
// Device-facing Bodies
// =============================================================================

/// `POST /device/check-in`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckInRequest {
    pub unit_id: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    /// The device's currently applied settings.
    #[serde(default)]
    pub settings: Option<Value>,
}

/// `POST /device/commands`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimRequest {
    pub unit_id: String,
    #[serde(default)]
    pub max: Option<u32>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClaimResponse {
    pub unit_id: String,
    pub commands: Vec<Command>,
}

/// `POST /device/command-complete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteRequest {
    #[serde(alias = "command_id")]
    pub job_id: i64,
    pub ok: bool,
    #[serde(default)]
    pub result: Option<Value>,
}

impl CompleteRequest {
    /// Result as stored: strings verbatim, anything else as JSON text.
    pub fn result_text(&self) -> Option<String> {
        match &self.result {
            None | Some(Value::Null) => None,
            Some(Value::String(s)) => Some(s.clone()),
            Some(other) => Some(other.to_string()),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CompleteResponse {
    pub command: Command,
    /// True when the command was already done/failed and nothing changed.
    pub already_terminal: bool,
}

/// `GET /device/staged-settings?unit_id=&max=`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PollQuery {
    pub unit_id: String,
    #[serde(default)]
    pub max: Option<u32>,
}

// =============================================================================
// Spoke Admin Bodies
// =============================================================================

/// `POST /admin/device/settings`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageRequest {
    pub unit_id: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    pub settings: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResponse {
    pub unit_id: String,
    pub staged_at: DateTime<Utc>,
    /// Keys outside the settings registry that were kept anyway.
    pub unknown_keys: Vec<String>,
}

/// Any request addressing a single unit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitRequest {
    pub unit_id: String,
}

/// `GET /admin/device/settings?unit_id=`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UnitQuery {
    pub unit_id: String,
}

/// Response of clear and reconcile.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClearedResponse {
    pub unit_id: String,
    pub cleared: bool,
}

/// `POST /admin/device/provision`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProvisionRequest {
    pub unit_id: String,
    #[serde(default)]
    pub machine_id: Option<String>,
}

/// `POST /admin/device/suspend`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SuspendRequest {
    pub unit_id: String,
    #[serde(default = "default_true")]
    pub suspended: bool,
}

fn default_true() -> bool {
    true
}

/// `POST /admin/device/command`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EnqueueRequest {
    pub unit_id: String,
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

/// `POST /admin/device/command/delete`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCommandRequest {
    pub command_id: i64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteCommandResponse {
    pub command_id: i64,
    pub deleted: bool,
}

/// `POST /admin/firmware-job`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FirmwareJobRequest {
    pub unit_ids: Vec<String>,
    #[serde(default)]
    pub params: Value,
}

/// `POST /admin/read-token`; `null` revokes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadTokenPush {
    pub read_token: Option<String>,
}

/// `GET /admin/v2/site/devices/count`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceCountResponse {
    pub count: u64,
}

/// `GET /admin/site/devices`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteDevicesResponse {
    pub count: u64,
    pub devices: Vec<Device>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PurgeResponse {
    pub purged: PurgeReport,
}

// =============================================================================
// Pairing and Hub Bodies
// =============================================================================

/// `POST /uc/pair`
#[derive(Clone, Serialize, Deserialize)]
pub struct PairRequest {
    pub site_url: String,
    pub uc_key: String,
    #[serde(default = "legacy_api_version")]
    pub api_version: u32,
}

fn legacy_api_version() -> u32 {
    LEGACY_API_VERSION
}

impl std::fmt::Debug for PairRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairRequest")
            .field("site_url", &self.site_url)
            .field("uc_key", &"<redacted>")
            .field("api_version", &self.api_version)
            .finish()
    }
}

#[derive(Clone, Serialize, Deserialize)]
pub struct PairResponse {
    pub hub_key: String,
    pub read_token: String,
    pub api_version: u32,
}

impl std::fmt::Debug for PairResponse {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairResponse")
            .field("hub_key", &"<redacted>")
            .field("read_token", &"<redacted>")
            .field("api_version", &self.api_version)
            .finish()
    }
}

/// `POST /hub/check-in`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubCheckInRequest {
    pub site_url: String,
    #[serde(default)]
    pub device_count: Option<u64>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HubCheckInResponse {
    pub site_url: String,
    pub last_seen: DateTime<Utc>,
}

/// Operator request addressing one paired site.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SiteRequest {
    pub site_url: String,
}

/// One row of `GET /admin/sites`: pairing joined with its last refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteView {
    pub site_url: String,
    pub api_version: u32,
    pub paired_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub has_read_token: bool,
    pub device_count: Option<u64>,
    pub probe_path: Option<String>,
    pub last_error: Option<String>,
    pub last_status: Option<u16>,
    pub refreshed_at: Option<DateTime<Utc>>,
}

/// Result of rotate/revoke: stored locally, pushed best effort.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TokenPushReport {
    pub site_url: String,
    pub pushed: bool,
    pub push_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UnpairResponse {
    pub site_url: String,
    pub removed: bool,
}

// =============================================================================
// Relays (hub operator → spoke)
// =============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelaySettingsRequest {
    pub site_url: String,
    pub unit_id: String,
    #[serde(default)]
    pub machine_id: Option<String>,
    pub settings: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayUnitRequest {
    pub site_url: String,
    pub unit_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayCommandRequest {
    pub site_url: String,
    pub unit_id: String,
    pub command: String,
    #[serde(default)]
    pub params: Value,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RelayFirmwareRequest {
    pub site_url: String,
    pub unit_ids: Vec<String>,
    #[serde(default)]
    pub params: Value,
}

/// What the spoke answered to a relayed call.
///
/// A non-2xx answer is not an error here; `ok` is false and `status`
/// carries the spoke's code.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RelayResponse {
    pub site_url: String,
    pub path: String,
    pub status: u16,
    pub ok: bool,
    pub body: Value,
}

// =============================================================================
// Aggregator Report
// =============================================================================

/// Per-site result of a count refresh.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "result", rename_all = "snake_case")]
pub enum SiteOutcome {
    Count { count: u64, path: String },
    Error { message: String, status: Option<u16> },
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteRefresh {
    pub site_url: String,
    #[serde(flatten)]
    pub outcome: SiteOutcome,
}

/// Result of one aggregator pass: every site appears exactly once.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RefreshReport {
    pub sites: Vec<SiteRefresh>,
    pub succeeded: usize,
    pub failed: usize,
}

impl RefreshReport {
    pub fn from_sites(sites: Vec<SiteRefresh>) -> Self {
        let succeeded = sites
            .iter()
            .filter(|s| matches!(s.outcome, SiteOutcome::Count { .. }))
            .count();
        RefreshReport {
            failed: sites.len() - succeeded,
            succeeded,
            sites,
        }
    }

    pub fn outcome_for(&self, site_url: &str) -> Option<&SiteOutcome> {
        self.sites
            .iter()
            .find(|s| s.site_url == site_url)
            .map(|s| &s.outcome)
    }
}

/// `GET /health`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
    pub role: String,
    pub api_version: u32,
    pub database: bool,
}
