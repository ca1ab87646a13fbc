//! # Staged Settings Repository
//!
//! One row per unit holding the desired-but-unconfirmed settings object.
//! Staging replaces the row wholesale; there is no merge.

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tmon_core::StagedSettings;

#[derive(Debug, sqlx::FromRow)]
struct StagedRow {
    unit_id: String,
    machine_id: Option<String>,
    staged: String,
    staged_at: DateTime<Utc>,
}

impl TryFrom<StagedRow> for StagedSettings {
    type Error = DbError;

    fn try_from(row: StagedRow) -> Result<Self, Self::Error> {
        Ok(StagedSettings {
            unit_id: row.unit_id,
            machine_id: row.machine_id,
            staged: serde_json::from_str(&row.staged)?,
            staged_at: row.staged_at,
        })
    }
}

/// Repository for staged settings.
#[derive(Debug, Clone)]
pub struct StagedSettingsRepository {
    pool: SqlitePool,
}

impl StagedSettingsRepository {
    /// Creates a new StagedSettingsRepository.
    pub fn new(pool: SqlitePool) -> Self {
        StagedSettingsRepository { pool }
    }

    /// Stores `staged` for a unit, overwriting any previous value.
    pub async fn stage(
        &self,
        unit_id: &str,
        machine_id: Option<&str>,
        staged: &Value,
    ) -> DbResult<StagedSettings> {
        let now = Utc::now();
        let staged_json = serde_json::to_string(staged)?;

        let row = sqlx::query_as::<_, StagedRow>(
            r#"
            INSERT INTO staged_settings (unit_id, machine_id, staged, staged_at)
            VALUES (?1, ?2, ?3, ?4)
            ON CONFLICT (unit_id) DO UPDATE SET
                machine_id = COALESCE(excluded.machine_id, staged_settings.machine_id),
                staged = excluded.staged,
                staged_at = excluded.staged_at
            RETURNING unit_id, machine_id, staged, staged_at
            "#,
        )
        .bind(unit_id)
        .bind(machine_id)
        .bind(staged_json)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!(unit_id = %unit_id, "Settings staged");
        row.try_into()
    }

    /// Gets the staged settings for a unit.
    pub async fn get(&self, unit_id: &str) -> DbResult<Option<StagedSettings>> {
        let row = sqlx::query_as::<_, StagedRow>(
            "SELECT unit_id, machine_id, staged, staged_at FROM staged_settings WHERE unit_id = ?1",
        )
        .bind(unit_id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(StagedSettings::try_from).transpose()
    }

    /// Discards staged settings. Returns whether a row existed.
    pub async fn clear(&self, unit_id: &str) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM staged_settings WHERE unit_id = ?1")
            .bind(unit_id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Discards staged settings only if they were staged at `staged_at`.
    ///
    /// A concurrent `stage` bumps `staged_at`, so a reconcile computed
    /// against the old value leaves the new one in place.
    pub async fn clear_if_staged_at(&self, unit_id: &str, staged_at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM staged_settings WHERE unit_id = ?1 AND staged_at = ?2")
            .bind(unit_id)
            .bind(staged_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }
}
