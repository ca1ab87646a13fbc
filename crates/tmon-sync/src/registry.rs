//! # Device Registry
//!
//! Spoke-side unit lifecycle: ingest, provisioning, suspension and purge.
//!
//! ```text
//!   check_in (first seen) ──► PENDING ──provision──► PROVISIONED
//!                                                      │   ▲
//!                                        suspend(true) ▼   │ suspend(false)
//!                                                    SUSPENDED
//! ```

use serde_json::{json, Value};
use tracing::{info, warn};

use tmon_core::validation::{validate_machine_id, validate_unit_id};
use tmon_core::{CoreError, Device, PurgeReport};
use tmon_db::Database;

use crate::error::SyncResult;

/// Device registry service.
#[derive(Debug, Clone)]
pub struct DeviceRegistry {
    db: Database,
}

impl DeviceRegistry {
    pub fn new(db: Database) -> Self {
        DeviceRegistry { db }
    }

    /// Records a device report: creates the unit on first sight, mirrors
    /// `settings` as the applied view when given.
    ///
    /// ## Errors
    /// `Conflict` when `machine_id` already belongs to another unit.
    pub async fn check_in(
        &self,
        unit_id: &str,
        machine_id: Option<&str>,
        settings: Option<&Value>,
    ) -> SyncResult<Device> {
        let unit_id = validate_unit_id(unit_id)?;
        let machine_id = validate_machine_id(machine_id)?;
        if let Some(settings) = settings {
            if !settings.is_object() {
                return Err(tmon_core::ValidationError::NotAnObject.into());
            }
        }

        Ok(self
            .db
            .devices()
            .check_in(&unit_id, machine_id.as_deref(), settings)
            .await?)
    }

    /// Creates or promotes a unit to `provisioned`.
    pub async fn provision(&self, unit_id: &str, machine_id: Option<&str>) -> SyncResult<Device> {
        let unit_id = validate_unit_id(unit_id)?;
        let machine_id = validate_machine_id(machine_id)?;

        let device = self.db.devices().provision(&unit_id, machine_id.as_deref()).await?;
        info!(unit_id = %unit_id, "Unit provisioned");
        Ok(device)
    }

    pub async fn set_suspended(&self, unit_id: &str, suspended: bool) -> SyncResult<Device> {
        let unit_id = validate_unit_id(unit_id)?;
        let device = self
            .db
            .devices()
            .set_suspended(&unit_id, suspended)
            .await?
            .ok_or_else(|| CoreError::UnitNotFound(unit_id.clone()))?;

        info!(unit_id = %unit_id, suspended, "Unit suspension changed");
        Ok(device)
    }

    pub async fn get(&self, unit_id: &str) -> SyncResult<Device> {
        let unit_id = validate_unit_id(unit_id)?;
        self.db
            .devices()
            .get(&unit_id)
            .await?
            .ok_or_else(|| CoreError::UnitNotFound(unit_id).into())
    }

    pub async fn list(&self) -> SyncResult<Vec<Device>> {
        Ok(self.db.devices().list().await?)
    }

    pub async fn count(&self) -> SyncResult<u64> {
        let count = self.db.devices().count().await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    /// Deletes one unit with its commands and staged settings.
    pub async fn purge_unit(&self, unit_id: &str, actor: &str) -> SyncResult<PurgeReport> {
        let unit_id = validate_unit_id(unit_id)?;
        let report = self.db.devices().purge_unit(&unit_id).await?;
        self.audit(actor, "purge_unit", &unit_id, &report).await;
        Ok(report)
    }

    /// Deletes every unit, command and staged row on this spoke.
    pub async fn purge_all(&self, actor: &str) -> SyncResult<PurgeReport> {
        let report = self.db.devices().purge_all().await?;
        self.audit(actor, "purge_all", "*", &report).await;
        Ok(report)
    }

    async fn audit(&self, actor: &str, action: &str, subject: &str, report: &PurgeReport) {
        let detail = json!({
            "devices": report.devices,
            "commands": report.commands,
            "staged": report.staged,
        });
        if let Err(e) = self.db.audit().record(actor, action, subject, &detail).await {
            warn!(action, error = %e, "Failed to write audit entry");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use tmon_core::DeviceStatus;
    use tmon_db::DbConfig;

    async fn registry() -> (DeviceRegistry, Database) {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        (DeviceRegistry::new(db.clone()), db)
    }

    #[tokio::test]
    async fn test_check_in_then_provision_then_suspend() {
        let (registry, _db) = registry().await;

        let device = registry.check_in("U1", Some("mac-1"), None).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Pending);

        let device = registry.provision("U1", None).await.unwrap();
        assert_eq!(device.status, DeviceStatus::Provisioned);
        assert_eq!(device.machine_id.as_deref(), Some("mac-1"));

        let device = registry.set_suspended("U1", true).await.unwrap();
        assert!(device.suspended);
        assert_eq!(device.status, DeviceStatus::Suspended);

        let err = registry.set_suspended("U404", true).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }

    #[tokio::test]
    async fn test_machine_id_conflict() {
        let (registry, _db) = registry().await;
        registry.check_in("U1", Some("mac-1"), None).await.unwrap();
        let err = registry.check_in("U2", Some("mac-1"), None).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Conflict);
    }

    #[tokio::test]
    async fn test_settings_must_be_object() {
        let (registry, _db) = registry().await;
        let err = registry
            .check_in("U1", None, Some(&json!([1])))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Validation);
    }

    #[tokio::test]
    async fn test_purge_unit_is_audited() {
        let (registry, db) = registry().await;
        registry.check_in("U1", None, None).await.unwrap();
        registry.check_in("U2", None, None).await.unwrap();
        db.commands().enqueue("U1", "reboot", &json!({})).await.unwrap();

        let report = registry.purge_unit("U1", "operator").await.unwrap();
        assert_eq!(report.devices, 1);
        assert_eq!(report.commands, 1);
        assert_eq!(registry.count().await.unwrap(), 1);

        let audit = db.audit().recent(1).await.unwrap();
        assert_eq!(audit[0].action, "purge_unit");
        assert_eq!(audit[0].subject, "U1");

        let report = registry.purge_all("operator").await.unwrap();
        assert_eq!(report.devices, 1);
        assert!(registry.list().await.unwrap().is_empty());
    }
}
