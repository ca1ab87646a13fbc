//! # Audit Log Repository
//!
//! Append-only record of security- and data-relevant actions (pairing,
//! rotation, revocation, purges, firmware jobs).

use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::SqlitePool;

use crate::error::{DbError, DbResult};
use tmon_core::AuditEntry;

#[derive(Debug, sqlx::FromRow)]
struct AuditRow {
    id: i64,
    actor: String,
    action: String,
    subject: String,
    detail: String,
    created_at: DateTime<Utc>,
}

impl TryFrom<AuditRow> for AuditEntry {
    type Error = DbError;

    fn try_from(row: AuditRow) -> Result<Self, Self::Error> {
        Ok(AuditEntry {
            id: row.id,
            actor: row.actor,
            action: row.action,
            subject: row.subject,
            detail: serde_json::from_str(&row.detail)?,
            created_at: row.created_at,
        })
    }
}

/// Repository for the audit log.
#[derive(Debug, Clone)]
pub struct AuditRepository {
    pool: SqlitePool,
}

impl AuditRepository {
    /// Creates a new AuditRepository.
    pub fn new(pool: SqlitePool) -> Self {
        AuditRepository { pool }
    }

    /// Appends an entry and returns its id.
    pub async fn record(&self, actor: &str, action: &str, subject: &str, detail: &Value) -> DbResult<i64> {
        let id: i64 = sqlx::query_scalar(
            r#"
            INSERT INTO audit_log (actor, action, subject, detail, created_at)
            VALUES (?1, ?2, ?3, ?4, ?5)
            RETURNING id
            "#,
        )
        .bind(actor)
        .bind(action)
        .bind(subject)
        .bind(serde_json::to_string(detail)?)
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await?;

        Ok(id)
    }

    /// Most recent entries first.
    pub async fn recent(&self, limit: u32) -> DbResult<Vec<AuditEntry>> {
        let rows = sqlx::query_as::<_, AuditRow>(
            r#"
            SELECT id, actor, action, subject, detail, created_at
            FROM audit_log
            ORDER BY id DESC
            LIMIT ?1
            "#,
        )
        .bind(i64::from(limit))
        .fetch_all(&self.pool)
        .await?;

        rows.into_iter().map(AuditEntry::try_from).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use serde_json::json;

    #[tokio::test]
    async fn test_record_and_recent() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.audit();

        repo.record("hub", "pair", "https://a.example", &json!({"api_version": 2}))
            .await
            .unwrap();
        repo.record("operator", "purge_unit", "U1", &json!({"devices": 1}))
            .await
            .unwrap();

        let entries = repo.recent(10).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].action, "purge_unit");
        assert_eq!(entries[1].detail, json!({"api_version": 2}));
        assert_eq!(repo.recent(1).await.unwrap().len(), 1);
    }
}
