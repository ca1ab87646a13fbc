//! # Site Status Repository (hub)
//!
//! The hub's aggregate view of each spoke, written by the aggregator and
//! by spoke check-ins. A failed refresh keeps the last known count.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;

use crate::error::DbResult;
use tmon_core::SiteStatus;

#[derive(Debug, sqlx::FromRow)]
struct SiteStatusRow {
    site_url: String,
    device_count: Option<i64>,
    probe_path: Option<String>,
    last_error: Option<String>,
    last_status: Option<i64>,
    refreshed_at: DateTime<Utc>,
}

impl From<SiteStatusRow> for SiteStatus {
    fn from(row: SiteStatusRow) -> Self {
        SiteStatus {
            site_url: row.site_url,
            device_count: row.device_count.and_then(|c| u64::try_from(c).ok()),
            probe_path: row.probe_path,
            last_error: row.last_error,
            last_status: row.last_status.and_then(|s| u16::try_from(s).ok()),
            refreshed_at: row.refreshed_at,
        }
    }
}

/// Repository for hub-side site status.
#[derive(Debug, Clone)]
pub struct SiteStatusRepository {
    pool: SqlitePool,
}

impl SiteStatusRepository {
    /// Creates a new SiteStatusRepository.
    pub fn new(pool: SqlitePool) -> Self {
        SiteStatusRepository { pool }
    }

    /// Stores a successful device count and clears the last error.
    pub async fn record_success(&self, site_url: &str, device_count: u64, probe_path: &str) -> DbResult<()> {
        let count = i64::try_from(device_count).unwrap_or(i64::MAX);

        sqlx::query(
            r#"
            INSERT INTO site_status (site_url, device_count, probe_path, last_error, last_status, refreshed_at)
            VALUES (?1, ?2, ?3, NULL, 200, ?4)
            ON CONFLICT (site_url) DO UPDATE SET
                device_count = excluded.device_count,
                probe_path = excluded.probe_path,
                last_error = NULL,
                last_status = excluded.last_status,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(site_url)
        .bind(count)
        .bind(probe_path)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    /// Stores a failed refresh; the previous count is kept.
    pub async fn record_failure(&self, site_url: &str, error: &str, status: Option<u16>) -> DbResult<()> {
        sqlx::query(
            r#"
            INSERT INTO site_status (site_url, device_count, probe_path, last_error, last_status, refreshed_at)
            VALUES (?1, NULL, NULL, ?2, ?3, ?4)
            ON CONFLICT (site_url) DO UPDATE SET
                last_error = excluded.last_error,
                last_status = excluded.last_status,
                refreshed_at = excluded.refreshed_at
            "#,
        )
        .bind(site_url)
        .bind(error)
        .bind(status.map(i64::from))
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    pub async fn get(&self, site_url: &str) -> DbResult<Option<SiteStatus>> {
        let row = sqlx::query_as::<_, SiteStatusRow>(
            r#"
            SELECT site_url, device_count, probe_path, last_error, last_status, refreshed_at
            FROM site_status WHERE site_url = ?1
            "#,
        )
        .bind(site_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(SiteStatus::from))
    }

    pub async fn list(&self) -> DbResult<Vec<SiteStatus>> {
        let rows = sqlx::query_as::<_, SiteStatusRow>(
            r#"
            SELECT site_url, device_count, probe_path, last_error, last_status, refreshed_at
            FROM site_status ORDER BY site_url ASC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(SiteStatus::from).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};

    #[tokio::test]
    async fn test_failure_keeps_last_count() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.site_status();

        repo.record_success("https://a.example", 7, "/admin/site/devices")
            .await
            .unwrap();
        repo.record_failure("https://a.example", "timed out", None)
            .await
            .unwrap();

        let status = repo.get("https://a.example").await.unwrap().unwrap();
        assert_eq!(status.device_count, Some(7));
        assert_eq!(status.last_error.as_deref(), Some("timed out"));
        assert_eq!(status.last_status, None);

        repo.record_success("https://a.example", 8, "/admin/v2/site/devices/count")
            .await
            .unwrap();
        let status = repo.get("https://a.example").await.unwrap().unwrap();
        assert_eq!(status.device_count, Some(8));
        assert!(status.last_error.is_none());
    }

    #[tokio::test]
    async fn test_first_failure_has_no_count() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        db.site_status()
            .record_failure("https://b.example", "HTTP 500", Some(500))
            .await
            .unwrap();

        let all = db.site_status().list().await.unwrap();
        assert_eq!(all.len(), 1);
        assert_eq!(all[0].device_count, None);
        assert_eq!(all[0].last_status, Some(500));
    }
}
