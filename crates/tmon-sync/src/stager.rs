//! # Settings Stager
//!
//! Desired (`staged`) vs last-confirmed (`applied`) configuration per unit.
//!
//! ## Settings Flow
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         Settings Staging                                │
//! │                                                                         │
//! │  operator ──stage(patch)──► schema check ──► staged_settings (replace) │
//! │                                                   │                     │
//! │                         ┌─────────────────────────┤                     │
//! │                         ▼                         ▼                     │
//! │            next device poll sees it      apply(): enqueue              │
//! │            (authoritative path)          "apply_settings" (nudge)      │
//! │                                                                         │
//! │  device ──check-in(settings)──► devices.settings  (= applied)          │
//! │                                                                         │
//! │  staged is only removed by clear(), or by reconcile() once applied     │
//! │  contains every staged key with an equal value.                        │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use std::sync::Arc;

use serde_json::json;
use tracing::{debug, info};

use tmon_core::validation::{validate_machine_id, validate_unit_id};
use tmon_core::{
    Command, CoreError, EffectiveSettings, SettingsSchema, StagedSettings, UnknownKeyPolicy,
    APPLY_SETTINGS_COMMAND,
};
use tmon_db::Database;

use crate::error::SyncResult;
use crate::queue::CommandQueue;

/// Result of a successful stage.
#[derive(Debug, Clone, PartialEq)]
pub struct StageOutcome {
    pub staged: StagedSettings,
    /// Keys outside the registry that were kept.
    pub unknown_keys: Vec<String>,
}

/// Settings stager service.
#[derive(Debug, Clone)]
pub struct SettingsStager {
    db: Database,
    queue: CommandQueue,
    schema: Arc<SettingsSchema>,
    policy: UnknownKeyPolicy,
}

impl SettingsStager {
    pub fn new(db: Database, queue: CommandQueue, schema: SettingsSchema, policy: UnknownKeyPolicy) -> Self {
        SettingsStager {
            db,
            queue,
            schema: Arc::new(schema),
            policy,
        }
    }

    /// Replaces the unit's staged settings with `patch`.
    ///
    /// ## Errors
    /// `Validation` when `patch` is not an object, a known key has the
    /// wrong kind, or an unknown key is present under the reject policy.
    pub async fn stage(
        &self,
        unit_id: &str,
        machine_id: Option<&str>,
        patch: &serde_json::Value,
    ) -> SyncResult<StageOutcome> {
        let unit_id = validate_unit_id(unit_id)?;
        let machine_id = validate_machine_id(machine_id)?;
        let validated = self.schema.validate_patch(patch, self.policy)?;

        let staged = self
            .db
            .staged_settings()
            .stage(&unit_id, machine_id.as_deref(), &validated.settings)
            .await?;

        if !validated.unknown_keys.is_empty() {
            debug!(unit_id = %unit_id, keys = ?validated.unknown_keys, "Unknown settings keys warehoused");
        }
        info!(unit_id = %unit_id, "Settings staged");

        Ok(StageOutcome {
            staged,
            unknown_keys: validated.unknown_keys,
        })
    }

    /// Returns the applied and staged views. Unknown units yield empty views.
    pub async fn get_effective(&self, unit_id: &str) -> SyncResult<EffectiveSettings> {
        let unit_id = validate_unit_id(unit_id)?;
        let applied = self
            .db
            .devices()
            .get(&unit_id)
            .await?
            .and_then(|device| device.settings);
        let staged = self.db.staged_settings().get(&unit_id).await?;

        Ok(EffectiveSettings {
            unit_id,
            applied,
            staged_at: staged.as_ref().map(|s| s.staged_at),
            staged: staged.map(|s| s.staged),
        })
    }

    /// Discards staged settings. Returns whether anything was staged.
    pub async fn clear(&self, unit_id: &str) -> SyncResult<bool> {
        let unit_id = validate_unit_id(unit_id)?;
        let cleared = self.db.staged_settings().clear(&unit_id).await?;
        if cleared {
            info!(unit_id = %unit_id, "Staged settings cleared");
        }
        Ok(cleared)
    }

    /// Enqueues an `apply_settings` command carrying the staged object.
    ///
    /// The staged row stays in place; the poll path still delivers it.
    ///
    /// ## Errors
    /// `NotFound` when nothing is staged.
    pub async fn apply(&self, unit_id: &str) -> SyncResult<Command> {
        let unit_id = validate_unit_id(unit_id)?;
        let staged = self
            .db
            .staged_settings()
            .get(&unit_id)
            .await?
            .ok_or_else(|| CoreError::NothingStaged(unit_id.clone()))?;

        let params = json!({
            "settings": staged.staged,
            "staged_at": staged.staged_at,
        });
        self.queue.enqueue(&unit_id, APPLY_SETTINGS_COMMAND, params).await
    }

    /// Clears staged settings once the device reports them applied.
    ///
    /// Returns true when the staged row was removed.
    pub async fn reconcile(&self, unit_id: &str) -> SyncResult<bool> {
        let effective = self.get_effective(unit_id).await?;
        let Some(staged_at) = effective.staged_at else {
            return Ok(false);
        };

        if !effective.is_reconciled() {
            debug!(unit_id = %effective.unit_id, "Applied settings differ from staged");
            return Ok(false);
        }

        let cleared = self
            .db
            .staged_settings()
            .clear_if_staged_at(&effective.unit_id, staged_at)
            .await?;
        if cleared {
            info!(unit_id = %effective.unit_id, "Staged settings reconciled");
        }
        Ok(cleared)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use serde_json::json;
    use tmon_core::CommandStatus;
    use tmon_db::DbConfig;

    async fn stager(policy: UnknownKeyPolicy) -> (SettingsStager, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let queue = CommandQueue::new(db.clone(), 10);
        (SettingsStager::new(db.clone(), queue, SettingsSchema::default(), policy), db)
    }

    #[tokio::test]
    async fn test_stage_overwrites_wholesale() {
        let (stager, _db) = stager(UnknownKeyPolicy::Warehouse).await;
        stager.stage("U1", None, &json!({"GPS_LAT": 1.0, "UNIT_NAME": "a"})).await.unwrap();
        stager.stage("U1", None, &json!({"UNIT_NAME": "b"})).await.unwrap();

        let effective = stager.get_effective("U1").await.unwrap();
        assert_eq!(effective.staged, Some(json!({"UNIT_NAME": "b"})));
        assert!(effective.applied.is_none());
    }

    #[tokio::test]
    async fn test_unknown_keys_by_policy() {
        let (warehouse, _db) = stager(UnknownKeyPolicy::Warehouse).await;
        let outcome = warehouse
            .stage("U1", Some("mac-1"), &json!({"X": 1, "ENABLE_RELAY1": true}))
            .await
            .unwrap();
        assert_eq!(outcome.unknown_keys, vec!["X".to_string()]);
        assert_eq!(outcome.staged.staged["X"], 1);
        assert_eq!(outcome.staged.machine_id.as_deref(), Some("mac-1"));

        let (reject, _db) = stager(UnknownKeyPolicy::Reject).await;
        let err = reject.stage("U1", None, &json!({"X": 1})).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_non_object_patch_rejected() {
        let (stager, _db) = stager(UnknownKeyPolicy::Warehouse).await;
        let err = stager.stage("U1", None, &json!("nope")).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_apply_enqueues_without_clearing() {
        let (stager, db) = stager(UnknownKeyPolicy::Warehouse).await;
        assert_eq!(stager.apply("U1").await.unwrap_err().kind(), ErrorKind::NotFound);

        stager.stage("U1", None, &json!({"SAMPLE_INTERVAL_S": 30})).await.unwrap();
        let cmd = stager.apply("U1").await.unwrap();
        assert_eq!(cmd.command, APPLY_SETTINGS_COMMAND);
        assert_eq!(cmd.status, CommandStatus::Queued);
        assert_eq!(cmd.params["settings"], json!({"SAMPLE_INTERVAL_S": 30}));

        assert!(db.staged_settings().get("U1").await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_clear() {
        let (stager, _db) = stager(UnknownKeyPolicy::Warehouse).await;
        assert!(!stager.clear("U1").await.unwrap());
        stager.stage("U1", None, &json!({})).await.unwrap();
        assert!(stager.clear("U1").await.unwrap());
        assert!(stager.get_effective("U1").await.unwrap().staged.is_none());
    }

    #[tokio::test]
    async fn test_reconcile_only_when_applied_matches() {
        let (stager, db) = stager(UnknownKeyPolicy::Warehouse).await;
        assert!(!stager.reconcile("U1").await.unwrap());

        stager
            .stage("U1", None, &json!({"ENABLE_RELAY1": true, "UNIT_NAME": "barn"}))
            .await
            .unwrap();

        db.devices()
            .check_in("U1", None, Some(&json!({"ENABLE_RELAY1": true, "UNIT_NAME": "old"})))
            .await
            .unwrap();
        assert!(!stager.reconcile("U1").await.unwrap());

        db.devices()
            .check_in(
                "U1",
                None,
                Some(&json!({"ENABLE_RELAY1": true, "UNIT_NAME": "barn", "GPS_LAT": 1.5})),
            )
            .await
            .unwrap();
        assert!(stager.reconcile("U1").await.unwrap());
        assert!(stager.get_effective("U1").await.unwrap().staged.is_none());
    }
}
