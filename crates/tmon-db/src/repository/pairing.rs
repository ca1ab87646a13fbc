//! # Pairing Repository (hub)
//!
//! One row per paired spoke, keyed by normalized site URL. Rows hold the
//! shared secrets in plain text; callers must never log them.

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use tracing::info;

use crate::error::DbResult;
use tmon_core::Pairing;

const PAIRING_COLUMNS: &str =
    "site_url, uc_key, hub_key, read_token, api_version, paired_at, last_seen, updated_at";

#[derive(Debug, sqlx::FromRow)]
struct PairingRow {
    site_url: String,
    uc_key: String,
    hub_key: String,
    read_token: Option<String>,
    api_version: i64,
    paired_at: DateTime<Utc>,
    last_seen: Option<DateTime<Utc>>,
    updated_at: DateTime<Utc>,
}

impl From<PairingRow> for Pairing {
    fn from(row: PairingRow) -> Self {
        Pairing {
            site_url: row.site_url,
            uc_key: row.uc_key,
            hub_key: row.hub_key,
            read_token: row.read_token,
            api_version: u32::try_from(row.api_version).unwrap_or(1),
            paired_at: row.paired_at,
            last_seen: row.last_seen,
            updated_at: row.updated_at,
        }
    }
}

/// Repository for hub-side pairings.
#[derive(Debug, Clone)]
pub struct PairingRepository {
    pool: SqlitePool,
}

impl PairingRepository {
    /// Creates a new PairingRepository.
    pub fn new(pool: SqlitePool) -> Self {
        PairingRepository { pool }
    }

    /// Gets the pairing for a normalized site URL.
    pub async fn get(&self, site_url: &str) -> DbResult<Option<Pairing>> {
        let row = sqlx::query_as::<_, PairingRow>(&format!(
            "SELECT {PAIRING_COLUMNS} FROM pairings WHERE site_url = ?1"
        ))
        .bind(site_url)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Pairing::from))
    }

    /// Lists every pairing ordered by site URL.
    pub async fn list(&self) -> DbResult<Vec<Pairing>> {
        let rows = sqlx::query_as::<_, PairingRow>(&format!(
            "SELECT {PAIRING_COLUMNS} FROM pairings ORDER BY site_url ASC"
        ))
        .fetch_all(&self.pool)
        .await?;

        Ok(rows.into_iter().map(Pairing::from).collect())
    }

    /// Inserts a first pairing. Returns false if the site is already paired.
    pub async fn insert_new(&self, pairing: &Pairing) -> DbResult<bool> {
        let result = sqlx::query(
            r#"
            INSERT INTO pairings (site_url, uc_key, hub_key, read_token, api_version, paired_at, last_seen, updated_at)
            VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            ON CONFLICT (site_url) DO NOTHING
            "#,
        )
        .bind(&pairing.site_url)
        .bind(&pairing.uc_key)
        .bind(&pairing.hub_key)
        .bind(&pairing.read_token)
        .bind(i64::from(pairing.api_version))
        .bind(pairing.paired_at)
        .bind(pairing.last_seen)
        .bind(pairing.updated_at)
        .execute(&self.pool)
        .await?;

        let inserted = result.rows_affected() > 0;
        if inserted {
            info!(site_url = %pairing.site_url, "Pairing created");
        }
        Ok(inserted)
    }

    /// Re-pairs a site under the key it is already paired with.
    ///
    /// Issues the new read token and API version only while the stored
    /// `uc_key` still equals `uc_key`. Returns the updated pairing, or
    /// `None` when the site is unpaired or held under another key.
    pub async fn update_repair(
        &self,
        site_url: &str,
        uc_key: &str,
        read_token: &str,
        api_version: u32,
    ) -> DbResult<Option<Pairing>> {
        let row = sqlx::query_as::<_, PairingRow>(&format!(
            r#"
            UPDATE pairings
            SET read_token = ?3, api_version = ?4, updated_at = ?5
            WHERE site_url = ?1 AND uc_key = ?2
            RETURNING {PAIRING_COLUMNS}
            "#
        ))
        .bind(site_url)
        .bind(uc_key)
        .bind(read_token)
        .bind(i64::from(api_version))
        .bind(Utc::now())
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(Pairing::from))
    }

    /// Replaces (or clears) the read token. Returns false if unpaired.
    pub async fn set_read_token(&self, site_url: &str, read_token: Option<&str>) -> DbResult<bool> {
        let result = sqlx::query(
            "UPDATE pairings SET read_token = ?2, updated_at = ?3 WHERE site_url = ?1",
        )
        .bind(site_url)
        .bind(read_token)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Records contact with the spoke.
    pub async fn touch(&self, site_url: &str, seen_at: DateTime<Utc>) -> DbResult<bool> {
        let result = sqlx::query("UPDATE pairings SET last_seen = ?2 WHERE site_url = ?1")
            .bind(site_url)
            .bind(seen_at)
            .execute(&self.pool)
            .await?;

        Ok(result.rows_affected() > 0)
    }

    /// Deletes a pairing and its aggregated status in one transaction.
    pub async fn delete(&self, site_url: &str) -> DbResult<bool> {
        let mut tx = self.pool.begin().await?;

        sqlx::query("DELETE FROM site_status WHERE site_url = ?1")
            .bind(site_url)
            .execute(&mut *tx)
            .await?;

        let removed = sqlx::query("DELETE FROM pairings WHERE site_url = ?1")
            .bind(site_url)
            .execute(&mut *tx)
            .await?
            .rows_affected();

        tx.commit().await?;

        info!(site_url = %site_url, removed, "Pairing deleted");
        Ok(removed > 0)
    }
}
