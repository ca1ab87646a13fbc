//! # Device Registry Repository
//!
//! Field units known to a spoke, plus the purge operations that remove a
//! unit together with its queue and staged rows.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::{debug, info};

use crate::error::{DbError, DbResult};
use tmon_core::{Device, DeviceStatus, PurgeReport};

const DEVICE_COLUMNS: &str =
    "unit_id, machine_id, status, suspended, settings, last_seen, created_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct DeviceRow {
    unit_id: String,
    machine_id: Option<String>,
    status: DeviceStatus,
    suspended: bool,
    settings: Option<String>,
    last_seen: Option<DateTime<Utc>>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<DeviceRow> for Device {
    type Error = DbError;

    fn try_from(row: DeviceRow) -> Result<Self, Self::Error> {
        let settings = row
            .settings
            .as_deref()
            .map(serde_json::from_str::<Value>)
            .transpose()?;

        Ok(Device {
            unit_id: row.unit_id,
            machine_id: row.machine_id,
            status: row.status,
            suspended: row.suspended,
            settings,
            last_seen: row.last_seen,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

/// Repository for the device registry.
#[derive(Debug, Clone)]
pub struct DeviceRepository {
    pool: SqlitePool,
}

impl DeviceRepository {
    /// Creates a new DeviceRepository.
    pub fn new(pool: SqlitePool) -> Self {
        DeviceRepository { pool }
    }

    /// Gets a device by unit id.
    pub async fn get(&self, unit_id: &str) -> DbResult<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE unit_id = ?1"
        ))
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Device::try_from).transpose()
    }

    /// Gets a device by hardware id.
    pub async fn get_by_machine_id(&self, machine_id: &str) -> DbResult<Option<Device>> {
        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices WHERE machine_id = ?1"
        ))
        .bind(machine_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Device::try_from).transpose()
    }

    /// Records that a unit was observed.
    ///
    /// New units start out `pending`. Existing units get `last_seen`
    /// bumped; `machine_id` and the applied `settings` are only replaced
    /// when given.
    ///
    /// ## Errors
    /// `UniqueViolation` when `machine_id` belongs to another unit.
    pub async fn check_in(
        &self,
        unit_id: &str,
        machine_id: Option<&str>,
        settings: Option<&Value>,
    ) -> DbResult<Device> {
        let now = Utc::now();
        let settings_json = settings.map(serde_json::to_string).transpose()?;

        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            r#"
            INSERT INTO devices (unit_id, machine_id, status, suspended, settings, last_seen, created_at, updated_at)
            VALUES (?1, ?2, 'pending', 0, ?3, ?4, ?4, ?4)
            ON CONFLICT (unit_id) DO UPDATE SET
                machine_id = COALESCE(excluded.machine_id, devices.machine_id),
                settings = COALESCE(excluded.settings, devices.settings),
                last_seen = excluded.last_seen,
                updated_at = excluded.updated_at
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(unit_id)
        .bind(machine_id)
        .bind(settings_json)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| machine_conflict(e, machine_id))?;

        debug!(unit_id = %unit_id, "Device checked in");
        row.try_into()
    }

    /// Creates a unit as `provisioned`, or promotes an existing one.
    ///
    /// Provisioning also lifts a suspension.
    pub async fn provision(&self, unit_id: &str, machine_id: Option<&str>) -> DbResult<Device> {
        let now = Utc::now();

        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            r#"
            INSERT INTO devices (unit_id, machine_id, status, suspended, created_at, updated_at)
            VALUES (?1, ?2, 'provisioned', 0, ?3, ?3)
            ON CONFLICT (unit_id) DO UPDATE SET
                machine_id = COALESCE(excluded.machine_id, devices.machine_id),
                status = 'provisioned',
                suspended = 0,
                updated_at = excluded.updated_at
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(unit_id)
        .bind(machine_id)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| machine_conflict(e, machine_id))?;

        info!(unit_id = %unit_id, "Device provisioned");
        row.try_into()
    }

    /// Suspends or resumes a unit. Returns `None` if the unit is unknown.
    pub async fn set_suspended(&self, unit_id: &str, suspended: bool) -> DbResult<Option<Device>> {
        let now = Utc::now();
        let status = if suspended {
            DeviceStatus::Suspended
        } else {
            DeviceStatus::Provisioned
        };

        let row = sqlx::query_as::<_, DeviceRow>(&format!(
            r#"
            UPDATE devices SET suspended = ?2, status = ?3, updated_at = ?4
            WHERE unit_id = ?1
            RETURNING {DEVICE_COLUMNS}
            "#
        ))
        .bind(unit_id)
        .bind(suspended)
        .bind(status)
        .bind(now)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Device::try_from).transpose()
    }

    /// Lists all units ordered by unit id.
    pub async fn list(&self) -> DbResult<Vec<Device>> {
        let rows = sqlx::query_as::<_, DeviceRow>(&format!(
            "SELECT {DEVICE_COLUMNS} FROM devices ORDER BY unit_id ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(Device::try_from).collect()
    }

    /// Counts known units.
    pub async fn count(&self) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM devices")
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }

    /// Deletes one unit with its commands and staged settings.
    ///
    /// All three deletes run in one transaction.
    pub async fn purge_unit(&self, unit_id: &str) -> DbResult<PurgeReport> {
        let mut tx = self.pool.begin().await?;

        let commands = sqlx::query("DELETE FROM device_commands WHERE device_id = ?1")
            .bind(unit_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let staged = sqlx::query("DELETE FROM staged_settings WHERE unit_id = ?1")
            .bind(unit_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let devices = sqlx::query("DELETE FROM devices WHERE unit_id = ?1")
            .bind(unit_id)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        info!(unit_id = %unit_id, devices, commands, staged, "Unit purged");
        Ok(PurgeReport {
            devices,
            commands,
            staged,
        })
    }

    /// Deletes every unit, command and staged row.
    pub async fn purge_all(&self) -> DbResult<PurgeReport> {
        let mut tx = self.pool.begin().await?;

        let commands = sqlx::query("DELETE FROM device_commands")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let staged = sqlx::query("DELETE FROM staged_settings")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        let devices = sqlx::query("DELETE FROM devices")
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        info!(devices, commands, staged, "All device data purged");
        Ok(PurgeReport {
            devices,
            commands,
            staged,
        })
    }
}

/// Adds the offending machine id to a UNIQUE violation.
fn machine_conflict(err: sqlx::Error, machine_id: Option<&str>) -> DbError {
    match DbError::from(err) {
        DbError::UniqueViolation { field, .. } => {
            DbError::duplicate(field, machine_id.unwrap_or("unknown"))
        }
        other => other,
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
