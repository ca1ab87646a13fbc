//! # Command Queue Repository
//!
//! Durable per-device FIFO of pending actions.
//!
//! ## Status Changes Are Single Statements
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │  claim     UPDATE ... SET status='claimed'                              │
//! │            WHERE status='queued' AND id IN (oldest N for device)        │
//! │            RETURNING *                                                  │
//! │                                                                         │
//! │  complete  UPDATE ... SET status='done'|'failed'                        │
//! │            WHERE id=? AND status IN ('queued','claimed')                │
//! │            RETURNING *                                                  │
//! │                                                                         │
//! │  reap      UPDATE ... SET status='queued'                               │
//! │            WHERE status='claimed' AND updated_at < cutoff               │
//! │                                                                         │
//! │  Two pollers racing for the same device can never both see a row:      │
//! │  the second UPDATE re-checks status='queued' under the write lock.      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;
use tracing::debug;

use crate::error::{DbError, DbResult};
use tmon_core::{Command, CommandStatus, CompletionOutcome};

const COMMAND_COLUMNS: &str = "id, device_id, command, params, status, created_at, updated_at, \
                               executed_at, executed_result";

/// Raw `device_commands` row; `params` is JSON text.
#[derive(Debug, sqlx::FromRow)]
struct CommandRow {
    id: i64,
    device_id: String,
    command: String,
    params: String,
    status: CommandStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    executed_at: Option<DateTime<Utc>>,
    executed_result: Option<String>,
}

impl TryFrom<CommandRow> for Command {
    type Error = DbError;

    fn try_from(row: CommandRow) -> Result<Self, Self::Error> {
        Ok(Command {
            id: row.id,
            device_id: row.device_id,
            command: row.command,
            params: serde_json::from_str(&row.params)?,
            status: row.status,
            created_at: row.created_at,
            updated_at: row.updated_at,
            executed_at: row.executed_at,
            executed_result: row.executed_result,
        })
    }
}

fn into_commands(rows: Vec<CommandRow>) -> DbResult<Vec<Command>> {
    rows.into_iter().map(Command::try_from).collect()
}

/// Repository for the command queue.
#[derive(Debug, Clone)]
pub struct CommandRepository {
    pool: SqlitePool,
}

impl CommandRepository {
    /// Creates a new CommandRepository.
    pub fn new(pool: SqlitePool) -> Self {
        CommandRepository { pool }
    }

    /// Appends a command to the tail of the device's queue.
    pub async fn enqueue(&self, device_id: &str, command: &str, params: &Value) -> DbResult<Command> {
        let now = Utc::now();
        let params_json = serde_json::to_string(params)?;

        let row = sqlx::query_as::<_, CommandRow>(&format!(
            r#"
            INSERT INTO device_commands (device_id, command, params, status, created_at, updated_at)
            VALUES (?1, ?2, ?3, 'queued', ?4, ?4)
            RETURNING {COMMAND_COLUMNS}
            "#
        ))
        .bind(device_id)
        .bind(command)
        .bind(params_json)
        .bind(now)
        .fetch_one(&self.pool)
        .await?;

        debug!(command_id = row.id, device_id = %device_id, command = %command, "Command queued");
        row.try_into()
    }

    /// Claims up to `max` oldest queued commands for a device.
    ///
    /// Selection and the `queued → claimed` transition happen in one
    /// statement. Results are sorted by id since `RETURNING` order is
    /// unspecified.
    pub async fn claim(&self, device_id: &str, max: u32) -> DbResult<Vec<Command>> {
        let now = Utc::now();

        let rows = sqlx::query_as::<_, CommandRow>(&format!(
            r#"
            UPDATE device_commands
            SET status = 'claimed',
                claimed_at = ?1,
                updated_at = ?1,
                version = version + 1
            WHERE status = 'queued'
              AND id IN (
                  SELECT id FROM device_commands
                  WHERE device_id = ?2 AND status = 'queued'
                  ORDER BY id ASC
                  LIMIT ?3
              )
            RETURNING {COMMAND_COLUMNS}
            "#
        ))
        .bind(now)
        .bind(device_id)
        .bind(i64::from(max))
        .fetch_all(&self.pool)
        .await?;

        let mut commands = into_commands(rows)?;
        commands.sort_by_key(|c| c.id);
        Ok(commands)
    }

    /// Records a completion report.
    ///
    /// Returns `None` when the id is unknown. A command that is already
    /// terminal is returned unchanged as [`CompletionOutcome::AlreadyTerminal`].
    pub async fn complete(
        &self,
        id: i64,
        ok: bool,
        result: Option<&str>,
    ) -> DbResult<Option<CompletionOutcome>> {
        let now = Utc::now();
        let status = CommandStatus::from_outcome(ok);

        let updated = sqlx::query_as::<_, CommandRow>(&format!(
            r#"
            UPDATE device_commands
            SET status = ?2,
                executed_at = ?3,
                executed_result = ?4,
                updated_at = ?3,
                version = version + 1
            WHERE id = ?1 AND status IN ('queued', 'claimed')
            RETURNING {COMMAND_COLUMNS}
            "#
        ))
        .bind(id)
        .bind(status)
        .bind(now)
        .bind(result)
        .fetch_optional(&self.pool)
        .await?;

        if let Some(row) = updated {
            return Ok(Some(CompletionOutcome::Completed(row.try_into()?)));
        }

        Ok(self.get(id).await?.map(CompletionOutcome::AlreadyTerminal))
    }

    /// Reverts claims last touched before `cutoff` to `queued`.
    pub async fn requeue_stale(&self, cutoff: DateTime<Utc>) -> DbResult<u64> {
        let now = Utc::now();

        let result = sqlx::query(
            r#"
            UPDATE device_commands
            SET status = 'queued',
                claimed_at = NULL,
                updated_at = ?1,
                version = version + 1
            WHERE status = 'claimed' AND updated_at < ?2
            "#,
        )
        .bind(now)
        .bind(cutoff)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    /// Gets a command by id.
    pub async fn get(&self, id: i64) -> DbResult<Option<Command>> {
        let row = sqlx::query_as::<_, CommandRow>(&format!(
            "SELECT {COMMAND_COLUMNS} FROM device_commands WHERE id = ?1"
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await?;

        row.map(Command::try_from).transpose()
    }

    /// Lists a device's commands in queue order, optionally by status.
    pub async fn list_for_device(
        &self,
        device_id: &str,
        status: Option<CommandStatus>,
    ) -> DbResult<Vec<Command>> {
        let rows = sqlx::query_as::<_, CommandRow>(&format!(
            r#"
            SELECT {COMMAND_COLUMNS} FROM device_commands
            WHERE device_id = ?1 AND (?2 IS NULL OR status = ?2)
            ORDER BY id ASC
            "#
        ))
        .bind(device_id)
        .bind(status)
        .fetch_all(&self.pool)
        .await?;

        into_commands(rows)
    }

    /// Deletes a command only while it is still `queued`.
    pub async fn delete_queued(&self, id: i64) -> DbResult<bool> {
        let result = sqlx::query("DELETE FROM device_commands WHERE id = ?1 AND status = 'queued'")
            .bind(id)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Counts commands in a given status.
    pub async fn count_by_status(&self, status: CommandStatus) -> DbResult<i64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM device_commands WHERE status = ?1")
            .bind(status)
            .fetch_one(&self.pool)
            .await?;

        Ok(count)
    }
}

// =============================================================================
// Unit Tests
// =============================================================================
