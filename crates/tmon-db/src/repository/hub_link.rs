//! # Hub Link Repository (spoke)
//!
//! The spoke's credential store for its hub. A spoke talks to at most one
//! hub, so saving a link replaces any other row.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;
use tmon_core::HubLink;

const LINK_COLUMNS: &str =
    "hub_url, admin_key, hub_key, read_token, hub_api_version, paired_at, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct HubLinkRow {
    hub_url: String,
    admin_key: String,
    hub_key: Option<String>,
    read_token: Option<String>,
    hub_api_version: Option<i64>,
    paired_at: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<HubLinkRow> for HubLink {
    fn from(row: HubLinkRow) -> Self {
        HubLink {
            hub_url: row.hub_url,
            admin_key: row.admin_key,
            hub_key: row.hub_key,
            read_token: row.read_token,
            hub_api_version: row.hub_api_version.and_then(|v| u32::try_from(v).ok()),
            paired_at: row.paired_at,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for the spoke's hub link.
#[derive(Debug, Clone)]
pub struct HubLinkRepository {
    pool: SqlitePool,
}

impl HubLinkRepository {
    /// Creates a new HubLinkRepository.
    pub fn new(pool: SqlitePool) -> Self {
        HubLinkRepository { pool }
    }

    /// Returns the current link, if any.
    pub async fn current(&self) -> DbResult<Option<HubLink>> {
        let row = sqlx::query_as::<_, HubLinkRow>(&format!(
            "SELECT {LINK_COLUMNS} FROM hub_links ORDER BY updated_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(HubLink::from))
    }

    /// Stores `link` as the only hub link.
    pub async fn save(&self, link: &HubLink) -> DbResult<()> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM hub_links WHERE hub_url <> ?1")
            .bind(&link.hub_url)
            .execute(&mut *tx)
            .await?;

        sqlx::query(
            r#"
            INSERT INTO hub_links (hub_url, admin_key, hub_key, read_token, hub_api_version, paired_at, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT (hub_url) DO UPDATE SET
                admin_key = excluded.admin_key,
                hub_key = excluded.hub_key,
                read_token = excluded.read_token,
                hub_api_version = excluded.hub_api_version,
                paired_at = excluded.paired_at,
                updated_at = excluded.updated_at
            "#,
        )
        .bind(&link.hub_url)
        .bind(&link.admin_key)
        .bind(&link.hub_key)
        .bind(&link.read_token)
        .bind(link.hub_api_version.map(i64::from))
        .bind(link.paired_at)
        .bind(link.updated_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;

        info!(hub_url = %link.hub_url, "Hub link saved");
        Ok(())
    }

    /// Replaces (or clears) the read token on the current link.
    ///
    /// Returns false when there is no link.
    pub async fn set_read_token(&self, read_token: Option<&str>) -> DbResult<bool> {
        let result = sqlx::query("UPDATE hub_links SET read_token = ?1, updated_at = ?2")
            .bind(read_token)
            .bind(Utc::now())
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Forgets the hub entirely.
    pub async fn clear(&self) -> DbResult<u64> {
        let result = sqlx::query("DELETE FROM hub_links")
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::{Database, DbConfig};
    use tmon_core::PairingState;

    fn link(hub_url: &str) -> HubLink {
        HubLink {
            hub_url: hub_url.to_string(),
            admin_key: "ad".repeat(24),
            hub_key: None,
            read_token: None,
            hub_api_version: None,
            paired_at: None,
            updated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_replaces_previous_hub() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.hub_links();
        assert!(repo.current().await.unwrap().is_none());

        repo.save(&link("https://hub-a.example")).await.unwrap();
        repo.save(&link("https://hub-b.example")).await.unwrap();

        let current = repo.current().await.unwrap().unwrap();
        assert_eq!(current.hub_url, "https://hub-b.example");
        assert_eq!(current.pairing_state(), PairingState::PairingRequested);
    }

    #[tokio::test]
    async fn test_set_read_token() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let repo = db.hub_links();
        assert!(!repo.set_read_token(Some("t")).await.unwrap());

        let mut paired = link("https://hub.example");
        paired.hub_key = Some("hb".repeat(24));
        paired.hub_api_version = Some(2);
        repo.save(&paired).await.unwrap();

        assert!(repo.set_read_token(Some("new-token")).await.unwrap());
        let current = repo.current().await.unwrap().unwrap();
        assert_eq!(current.read_token.as_deref(), Some("new-token"));
        assert_eq!(current.hub_api_version, Some(2));
        assert_eq!(current.pairing_state(), PairingState::Paired);

        assert_eq!(repo.clear().await.unwrap(), 1);
    }
}
