//! # Domain Types
//!
//! Core domain types shared by hub and spokes.
//!
//! ## Type Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Domain Types                                    │
//! │                                                                         │
//! │  SPOKE SIDE                              HUB SIDE                       │
//! │  ┌─────────────────┐  ┌──────────────┐   ┌─────────────────┐           │
//! │  │     Device      │  │   Command    │   │    Pairing      │           │
//! │  │  unit_id (PK)   │  │  id (seq)    │   │  site_url (PK)  │           │
//! │  │  machine_id     │  │  device_id   │   │  uc_key         │           │
//! │  │  status         │  │  status ─────┼─┐ │  hub_key        │           │
//! │  │  settings       │  │  params      │ │ │  read_token     │           │
//! │  └─────────────────┘  └──────────────┘ │ └─────────────────┘           │
//! │  ┌─────────────────┐  ┌──────────────┐ │ ┌─────────────────┐           │
//! │  │ StagedSettings  │  │   HubLink    │ │ │   SiteStatus    │           │
//! │  │  staged (JSON)  │  │  admin_key   │ │ │  device_count   │           │
//! │  │  staged_at      │  │  hub_key     │ │ │  last_error     │           │
//! │  └─────────────────┘  └──────────────┘ │ └─────────────────┘           │
//! │                                        ▼                                │
//! │                 queued ──► claimed ──► done | failed                    │
//! │                    ▲          │                                         │
//! │                    └── reap ──┘                                         │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use ts_rs::TS;

use crate::error::ValidationError;

// =============================================================================
// Device
// =============================================================================

/// Lifecycle status of a field unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum DeviceStatus {
    /// Explicitly provisioned by an operator.
    Provisioned,
    /// Observed through ingest but never provisioned.
    Pending,
    /// Operator suspended the unit.
    Suspended,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::Provisioned => "provisioned",
            DeviceStatus::Pending => "pending",
            DeviceStatus::Suspended => "suspended",
        }
    }
}

impl fmt::Display for DeviceStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A physical monitoring unit as seen by one spoke.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Device {
    /// Operator-assigned, stable identifier.
    pub unit_id: String,

    /// Hardware-derived identifier, unique when present.
    pub machine_id: Option<String>,

    pub status: DeviceStatus,

    pub suspended: bool,

    /// Last settings the device reported as applied.
    #[ts(type = "Record<string, unknown> | null")]
    pub settings: Option<Value>,

    #[ts(as = "Option<String>")]
    pub last_seen: Option<DateTime<Utc>>,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,
}

// =============================================================================
// Command
// =============================================================================

/// Status of a queued command.
///
/// ## State Machine
/// ```text
///            claim                complete(ok)
///  queued ───────────► claimed ─────────────────► done
///    ▲                   │   │
///    │   reap (timeout)  │   │ complete(!ok)
///    └───────────────────┘   └──────────────────► failed
///
///  queued ──complete──► done | failed   (device finished a reaped claim)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, TS)]
#[cfg_attr(feature = "sqlx", derive(sqlx::Type))]
#[cfg_attr(feature = "sqlx", sqlx(rename_all = "lowercase"))]
#[ts(export)]
#[serde(rename_all = "snake_case")]
pub enum CommandStatus {
    Queued,
    Claimed,
    Done,
    Failed,
}

impl CommandStatus {
    /// Returns true once the command can no longer change.
    #[inline]
    pub fn is_terminal(&self) -> bool {
        matches!(self, CommandStatus::Done | CommandStatus::Failed)
    }

    /// Whether the state machine allows `self → next`.
    pub fn can_transition_to(&self, next: CommandStatus) -> bool {
        use CommandStatus::*;
        matches!(
            (self, next),
            (Queued, Claimed)
                | (Claimed, Queued)
                | (Claimed, Done)
                | (Claimed, Failed)
                | (Queued, Done)
                | (Queued, Failed)
        )
    }

    /// Terminal status for a completion report.
    pub fn from_outcome(ok: bool) -> Self {
        if ok {
            CommandStatus::Done
        } else {
            CommandStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            CommandStatus::Queued => "queued",
            CommandStatus::Claimed => "claimed",
            CommandStatus::Done => "done",
            CommandStatus::Failed => "failed",
        }
    }
}

impl fmt::Display for CommandStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for CommandStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "queued" => Ok(CommandStatus::Queued),
            "claimed" => Ok(CommandStatus::Claimed),
            "done" => Ok(CommandStatus::Done),
            "failed" => Ok(CommandStatus::Failed),
            other => Err(ValidationError::invalid_format(
                "status",
                format!("unknown command status '{}'", other),
            )),
        }
    }
}

/// A pending or finished action for one device.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct Command {
    /// Monotonic id; insertion order equals id order.
    #[ts(type = "number")]
    pub id: i64,

    /// `unit_id` of the target device.
    pub device_id: String,

    /// Enum-like command name (`reboot`, `relay_toggle`, `file_update`, ...).
    pub command: String,

    /// Opaque parameters, never inspected by the queue.
    #[ts(type = "Record<string, unknown>")]
    pub params: Value,

    pub status: CommandStatus,

    #[ts(as = "String")]
    pub created_at: DateTime<Utc>,

    #[ts(as = "String")]
    pub updated_at: DateTime<Utc>,

    #[ts(as = "Option<String>")]
    pub executed_at: Option<DateTime<Utc>>,

    pub executed_result: Option<String>,
}

/// Result of a completion report.
///
/// Completing a command that is already `done`/`failed` is not an error:
/// devices retry after a dropped ack, so the stored row is returned as-is.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionOutcome {
    /// The report moved the command into a terminal status.
    Completed(Command),
    /// The command was already terminal; nothing changed.
    AlreadyTerminal(Command),
}

impl CompletionOutcome {
    pub fn command(&self) -> &Command {
        match self {
            CompletionOutcome::Completed(cmd) | CompletionOutcome::AlreadyTerminal(cmd) => cmd,
        }
    }

    pub fn into_command(self) -> Command {
        match self {
            CompletionOutcome::Completed(cmd) | CompletionOutcome::AlreadyTerminal(cmd) => cmd,
        }
    }

    pub fn was_applied(&self) -> bool {
        matches!(self, CompletionOutcome::Completed(_))
    }
}

// =============================================================================
// Settings
// =============================================================================

/// Desired-but-unconfirmed configuration for one unit.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StagedSettings {
    pub unit_id: String,
    pub machine_id: Option<String>,
    pub staged: Value,
    pub staged_at: DateTime<Utc>,
}

/// Applied vs staged view of one unit's settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct EffectiveSettings {
    pub unit_id: String,

    /// Mirrored from the device's last reported settings.
    #[ts(type = "Record<string, unknown> | null")]
    pub applied: Option<Value>,

    #[ts(type = "Record<string, unknown> | null")]
    pub staged: Option<Value>,

    #[ts(as = "Option<String>")]
    pub staged_at: Option<DateTime<Utc>>,
}

impl EffectiveSettings {
    /// True when every staged key is present in `applied` with an equal value.
    ///
    /// Nothing staged counts as reconciled.
    pub fn is_reconciled(&self) -> bool {
        let Some(staged) = self.staged.as_ref().and_then(Value::as_object) else {
            return true;
        };
        let Some(applied) = self.applied.as_ref().and_then(Value::as_object) else {
            return staged.is_empty();
        };
        staged
            .iter()
            .all(|(key, value)| applied.get(key) == Some(value))
    }
}

/// Everything a device needs from one poll round trip.
///
/// Building a bundle CLAIMS the returned commands; it is not a pure read.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, TS)]
#[ts(export)]
pub struct PollBundle {
    pub unit_id: String,

    #[ts(type = "Record<string, unknown> | null")]
    pub applied: Option<Value>,

    #[ts(type = "Record<string, unknown> | null")]
    pub staged: Option<Value>,

    #[ts(as = "Option<String>")]
    pub staged_at: Option<DateTime<Utc>>,

    pub suspended: bool,

    pub commands: Vec<Command>,
}

// =============================================================================
// Pairing
// =============================================================================

/// Hub-side record of one paired spoke.
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct Pairing {
    /// Normalized spoke URL (unique).
    pub site_url: String,

    /// Spoke's own admin key; the hub presents it as `X-TMON-ADMIN`.
    pub uc_key: String,

    /// Spoke → hub secret (`X-TMON-HUB`).
    pub hub_key: String,

    /// Hub → spoke read-only secret (`X-TMON-READ`); `None` once revoked.
    pub read_token: Option<String>,

    /// API version the spoke advertised when pairing.
    pub api_version: u32,

    pub paired_at: DateTime<Utc>,
    pub last_seen: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl fmt::Debug for Pairing {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pairing")
            .field("site_url", &self.site_url)
            .field("uc_key", &"<redacted>")
            .field("hub_key", &"<redacted>")
            .field("read_token", &self.read_token.as_ref().map(|_| "<redacted>"))
            .field("api_version", &self.api_version)
            .field("paired_at", &self.paired_at)
            .field("last_seen", &self.last_seen)
            .finish()
    }
}

/// Pairing state of a spoke with its hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PairingState {
    Unpaired,
    PairingRequested,
    Paired,
}

/// Spoke-side view of its hub: the inverse of [`Pairing`].
#[derive(Clone, PartialEq, Serialize, Deserialize)]
pub struct HubLink {
    /// Normalized hub URL.
    pub hub_url: String,

    /// Locally generated secret, sent to the hub as `uc_key`.
    pub admin_key: String,

    /// Received from the hub; authenticates spoke → hub calls.
    pub hub_key: Option<String>,

    /// Received from the hub; authenticates hub read polls.
    pub read_token: Option<String>,

    pub hub_api_version: Option<u32>,
    pub paired_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

impl HubLink {
    pub fn pairing_state(&self) -> PairingState {
        if self.hub_key.is_some() {
            PairingState::Paired
        } else {
            PairingState::PairingRequested
        }
    }
}

impl fmt::Debug for HubLink {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HubLink")
            .field("hub_url", &self.hub_url)
            .field("admin_key", &"<redacted>")
            .field("hub_key", &self.hub_key.as_ref().map(|_| "<redacted>"))
            .field("read_token", &self.read_token.as_ref().map(|_| "<redacted>"))
            .field("hub_api_version", &self.hub_api_version)
            .field("paired_at", &self.paired_at)
            .finish()
    }
}

/// Hub-side aggregate view of one spoke, refreshed by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SiteStatus {
    pub site_url: String,
    pub device_count: Option<u64>,
    /// Path that answered the last successful probe.
    pub probe_path: Option<String>,
    pub last_error: Option<String>,
    pub last_status: Option<u16>,
    pub refreshed_at: DateTime<Utc>,
}

// =============================================================================
// Multi-target Reports
// =============================================================================

/// Outcome of one target in a fan-out operation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TargetOutcome {
    pub unit_id: String,
    pub ok: bool,
    pub command_id: Option<i64>,
    pub error: Option<String>,
}

/// Per-target outcomes plus a tally; fan-outs are never atomic.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct BatchReport {
    pub job_id: String,
    pub succeeded: usize,
    pub failed: usize,
    pub outcomes: Vec<TargetOutcome>,
}

impl BatchReport {
    pub fn from_outcomes(job_id: impl Into<String>, outcomes: Vec<TargetOutcome>) -> Self {
        let succeeded = outcomes.iter().filter(|o| o.ok).count();
        BatchReport {
            job_id: job_id.into(),
            succeeded,
            failed: outcomes.len() - succeeded,
            outcomes,
        }
    }
}

/// Row counts removed by a purge.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeReport {
    pub devices: u64,
    pub commands: u64,
    pub staged: u64,
}

/// One audit log line.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub subject: String,
    pub detail: Value,
    pub created_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_command_transitions() {
        use CommandStatus::*;
        assert!(Queued.can_transition_to(Claimed));
        assert!(Claimed.can_transition_to(Done));
        assert!(Claimed.can_transition_to(Failed));
        assert!(Claimed.can_transition_to(Queued));
        assert!(Queued.can_transition_to(Done));

        assert!(!Done.can_transition_to(Queued));
        assert!(!Failed.can_transition_to(Done));
        assert!(!Claimed.can_transition_to(Claimed));
    }

    #[test]
    fn test_status_parse_and_display() {
        assert_eq!("claimed".parse::<CommandStatus>().unwrap(), CommandStatus::Claimed);
        assert_eq!(" DONE ".parse::<CommandStatus>().unwrap(), CommandStatus::Done);
        assert!("running".parse::<CommandStatus>().is_err());
        assert_eq!(CommandStatus::Failed.to_string(), "failed");
        assert_eq!(CommandStatus::from_outcome(true), CommandStatus::Done);
        assert_eq!(CommandStatus::from_outcome(false), CommandStatus::Failed);
    }

    #[test]
    fn test_status_serializes_snake_case() {
        assert_eq!(serde_json::to_string(&CommandStatus::Queued).unwrap(), "\"queued\"");
        assert_eq!(
            serde_json::to_string(&DeviceStatus::Provisioned).unwrap(),
            "\"provisioned\""
        );
    }

    #[test]
    fn test_reconciled_when_staged_subset_of_applied() {
        let view = EffectiveSettings {
            unit_id: "U1".into(),
            applied: Some(json!({"GPS_LAT": 1.5, "UNIT_NAME": "north"})),
            staged: Some(json!({"GPS_LAT": 1.5})),
            staged_at: None,
        };
        assert!(view.is_reconciled());

        let pending = EffectiveSettings {
            staged: Some(json!({"GPS_LAT": 2.0})),
            ..view.clone()
        };
        assert!(!pending.is_reconciled());

        let nothing_staged = EffectiveSettings { staged: None, ..view };
        assert!(nothing_staged.is_reconciled());
    }

    #[test]
    fn test_batch_report_tally() {
        let report = BatchReport::from_outcomes(
            "job-1",
            vec![
                TargetOutcome {
                    unit_id: "A".into(),
                    ok: true,
                    command_id: Some(1),
                    error: None,
                },
                TargetOutcome {
                    unit_id: "".into(),
                    ok: false,
                    command_id: None,
                    error: Some("unit_id is required".into()),
                },
            ],
        );
        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
    }

    #[test]
    fn test_pairing_debug_redacts_secrets() {
        let now = Utc::now();
        let pairing = Pairing {
            site_url: "https://spoke.example".into(),
            uc_key: "uc-secret".into(),
            hub_key: "hub-secret".into(),
            read_token: Some("read-secret".into()),
            api_version: 2,
            paired_at: now,
            last_seen: None,
            updated_at: now,
        };
        let debug = format!("{:?}", pairing);
        assert!(!debug.contains("uc-secret"));
        assert!(!debug.contains("hub-secret"));
        assert!(!debug.contains("read-secret"));
    }

    #[test]
    fn test_hub_link_pairing_state() {
        let mut link = HubLink {
            hub_url: "https://hub.example".into(),
            admin_key: "k".into(),
            hub_key: None,
            read_token: None,
            hub_api_version: None,
            paired_at: None,
            updated_at: Utc::now(),
        };
        assert_eq!(link.pairing_state(), PairingState::PairingRequested);
        link.hub_key = Some("h".into());
        assert_eq!(link.pairing_state(), PairingState::Paired);
    }
}
