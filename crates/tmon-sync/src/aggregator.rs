//! # Hub Aggregator
//!
//! Pulls a device count from every paired spoke and records the result in
//! the hub's `site_status` view.
//!
//! ## Refresh Pass
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                        Device Count Refresh                             │
//! │                                                                         │
//! │  pairings ──┬──► site A ──► v2 path ✓ 12 ─────────► Count(12)           │
//! │             │                                                           │
//! │             ├──► site B ──► timeout ──────────────► Error(timed out)    │
//! │             │              (transport failure: stop probing this site)  │
//! │             │                                                           │
//! │             └──► site C ──► /admin/site/devices 404                     │
//! │                            /admin/devices/count 404                     │
//! │                            /admin/devices ✓ [..] ► Count(2)             │
//! │                                                                         │
//! │  Sites are probed concurrently. Each probe sends X-TMON-READ (read     │
//! │  token) and X-TMON-HUB (hub key). A failing site is recorded and the   │
//! │  pass continues; the report carries a success/failure tally.           │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Every clone shares one `count-refresh` [`JobGuard`], so the timer job and
//! an operator's manual refresh never run a pass at the same time.

use chrono::Utc;
use futures_util::future::join_all;
use tracing::{debug, info, warn};

use tmon_core::Pairing;
use tmon_db::Database;

use crate::client::SiteClient;
use crate::error::{SyncError, SyncResult};
use crate::protocol::{count_probe_paths, RefreshReport, SiteOutcome, SiteRefresh};
use crate::scheduler::JobGuard;

/// Name of the refresh job guard.
pub const COUNT_REFRESH_JOB: &str = "count-refresh";

/// Hub-side device count aggregator.
#[derive(Debug, Clone)]
pub struct HubAggregator {
    db: Database,
    client: SiteClient,
    guard: JobGuard,
}

impl HubAggregator {
    pub fn new(db: Database, client: SiteClient) -> Self {
        HubAggregator {
            db,
            client,
            guard: JobGuard::new(COUNT_REFRESH_JOB),
        }
    }

    /// Guard shared by every refresh entry point.
    pub fn guard(&self) -> &JobGuard {
        &self.guard
    }

    /// Runs a refresh pass unless one is already in flight.
    ///
    /// ## Errors
    /// - `Conflict` while another pass holds the guard
    pub async fn refresh_now(&self) -> SyncResult<RefreshReport> {
        match self.guard.run(|| self.refresh_device_counts()).await {
            Some(result) => result,
            None => Err(SyncError::Conflict(
                "device count refresh already in progress".to_string(),
            )),
        }
    }

    /// Refreshes every paired site without taking the guard.
    ///
    /// Only a failure to list pairings is an error; per-site failures end
    /// up in the report.
    pub async fn refresh_device_counts(&self) -> SyncResult<RefreshReport> {
        let pairings = self.db.pairings().list().await?;
        debug!(sites = pairings.len(), "Refreshing device counts");

        let sites = join_all(pairings.iter().map(|p| self.refresh_site(p))).await;
        let report = RefreshReport::from_sites(sites);

        info!(
            succeeded = report.succeeded,
            failed = report.failed,
            "Device count refresh finished"
        );
        Ok(report)
    }

    async fn refresh_site(&self, pairing: &Pairing) -> SiteRefresh {
        let outcome = match self.probe(pairing).await {
            Ok((count, path)) => {
                if let Err(e) = self
                    .db
                    .site_status()
                    .record_success(&pairing.site_url, count, path)
                    .await
                {
                    warn!(site_url = %pairing.site_url, error = %e, "Failed to store site status");
                }
                if let Err(e) = self.db.pairings().touch(&pairing.site_url, Utc::now()).await {
                    warn!(site_url = %pairing.site_url, error = %e, "Failed to update last_seen");
                }
                SiteOutcome::Count {
                    count,
                    path: path.to_string(),
                }
            }
            Err(e) => {
                let status = e.remote_status();
                let message = e.to_string();
                warn!(site_url = %pairing.site_url, error = %message, "Site refresh failed");
                if let Err(store_err) = self
                    .db
                    .site_status()
                    .record_failure(&pairing.site_url, &message, status)
                    .await
                {
                    warn!(site_url = %pairing.site_url, error = %store_err, "Failed to store site status");
                }
                SiteOutcome::Error { message, status }
            }
        };

        SiteRefresh {
            site_url: pairing.site_url.clone(),
            outcome,
        }
    }

    /// Tries each candidate path until one yields a count.
    async fn probe(&self, pairing: &Pairing) -> SyncResult<(u64, &'static str)> {
        let mut last_error = None;

        for path in count_probe_paths(pairing.api_version) {
            match self
                .client
                .probe_count(
                    &pairing.site_url,
                    path,
                    pairing.read_token.as_deref(),
                    Some(&pairing.hub_key),
                )
                .await
            {
                Ok(count) => {
                    debug!(site_url = %pairing.site_url, path, count, "Count probe answered");
                    return Ok((count, path));
                }
                // The host is unreachable; other paths will not fare better
                Err(e @ SyncError::Remote { status: None, .. }) => return Err(e),
                Err(e) => {
                    debug!(site_url = %pairing.site_url, path, error = %e, "Count probe missed");
                    last_error = Some(e);
                }
            }
        }

        Err(last_error.unwrap_or_else(|| {
            SyncError::remote(&pairing.site_url, None, "no count endpoint candidates")
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use crate::credentials::generate_secret;
    use crate::protocol::{paths, LEGACY_API_VERSION};
    use serde_json::json;
    use std::time::Duration;
    use tmon_db::DbConfig;
    use tokio::sync::oneshot;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn pair(db: &Database, site_url: &str, api_version: u32) -> Pairing {
        let now = Utc::now();
        let pairing = Pairing {
            site_url: site_url.to_string(),
            uc_key: generate_secret(),
            hub_key: generate_secret(),
            read_token: Some(generate_secret()),
            api_version,
            paired_at: now,
            last_seen: None,
            updated_at: now,
        };
        assert!(db.pairings().insert_new(&pairing).await.unwrap());
        pairing
    }

    fn aggregator(db: Database) -> HubAggregator {
        let client = SiteClient::new(&HttpSettings {
            connect_timeout_secs: 1,
            request_timeout_secs: 1,
        })
        .unwrap();
        HubAggregator::new(db, client)
    }

    #[tokio::test]
    async fn test_three_sites_with_one_timeout() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();

        let site1 = MockServer::start().await;
        let site2 = MockServer::start().await;
        let site3 = MockServer::start().await;

        let p1 = pair(&db, &site1.uri(), 2).await;
        pair(&db, &site2.uri(), 2).await;
        pair(&db, &site3.uri(), LEGACY_API_VERSION).await;

        Mock::given(method("GET"))
            .and(path(paths::SITE_DEVICES_COUNT_V2))
            .and(header("x-tmon-hub", p1.hub_key.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 12})))
            .mount(&site1)
            .await;

        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"count": 99}))
                    .set_delay(Duration::from_secs(3)),
            )
            .mount(&site2)
            .await;

        // Legacy spoke: only the third candidate exists
        Mock::given(method("GET"))
            .and(path("/admin/devices"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"unit_id": "A"}, {"unit_id": "B"}])))
            .mount(&site3)
            .await;

        let report = aggregator(db.clone()).refresh_device_counts().await.unwrap();
        assert_eq!(report.sites.len(), 3);
        assert_eq!(report.succeeded, 2);
        assert_eq!(report.failed, 1);

        assert_eq!(
            report.outcome_for(&site1.uri()),
            Some(&SiteOutcome::Count {
                count: 12,
                path: paths::SITE_DEVICES_COUNT_V2.into()
            })
        );
        assert!(matches!(
            report.outcome_for(&site2.uri()),
            Some(SiteOutcome::Error { status: None, .. })
        ));
        assert_eq!(
            report.outcome_for(&site3.uri()),
            Some(&SiteOutcome::Count {
                count: 2,
                path: "/admin/devices".into()
            })
        );

        let status2 = db.site_status().get(&site2.uri()).await.unwrap().unwrap();
        assert!(status2.last_error.is_some());
        assert!(status2.device_count.is_none());

        let pairing1 = db.pairings().get(&site1.uri()).await.unwrap().unwrap();
        assert!(pairing1.last_seen.is_some());
    }

    #[tokio::test]
    async fn test_all_paths_rejected_records_last_status() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let site = MockServer::start().await;
        pair(&db, &site.uri(), LEGACY_API_VERSION).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&site)
            .await;

        let report = aggregator(db.clone()).refresh_device_counts().await.unwrap();
        assert_eq!(report.failed, 1);
        assert!(matches!(
            report.outcome_for(&site.uri()),
            Some(SiteOutcome::Error { status: Some(403), .. })
        ));

        let requests = site.received_requests().await.unwrap();
        assert_eq!(requests.len(), 6);
    }

    #[tokio::test]
    async fn test_failed_refresh_keeps_previous_count() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let site = MockServer::start().await;
        pair(&db, &site.uri(), 2).await;
        db.site_status()
            .record_success(&site.uri(), 7, paths::SITE_DEVICES)
            .await
            .unwrap();

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&site)
            .await;

        aggregator(db.clone()).refresh_device_counts().await.unwrap();
        let status = db.site_status().get(&site.uri()).await.unwrap().unwrap();
        assert_eq!(status.device_count, Some(7));
        assert_eq!(status.last_status, Some(500));
    }

    #[tokio::test]
    async fn test_no_sites_is_empty_report() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let report = aggregator(db).refresh_device_counts().await.unwrap();
        assert!(report.sites.is_empty());
        assert_eq!(report.succeeded + report.failed, 0);
    }

    #[tokio::test]
    async fn test_refresh_now_rejected_while_pass_in_flight() {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let site = MockServer::start().await;
        pair(&db, &site.uri(), 2).await;

        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 4})))
            .mount(&site)
            .await;

        let aggregator = aggregator(db);
        let (release_tx, release_rx) = oneshot::channel::<()>();
        let (started_tx, started_rx) = oneshot::channel::<()>();

        // The timer job would hold this same guard
        let held = {
            let guard = aggregator.guard().clone();
            tokio::spawn(async move {
                guard
                    .run(|| async move {
                        let _ = started_tx.send(());
                        let _ = release_rx.await;
                    })
                    .await
            })
        };
        started_rx.await.unwrap();

        let err = aggregator.refresh_now().await.unwrap_err();
        assert!(matches!(err, SyncError::Conflict(_)));
        assert!(site.received_requests().await.unwrap().is_empty());

        release_tx.send(()).unwrap();
        held.await.unwrap();

        let report = aggregator.refresh_now().await.unwrap();
        assert_eq!(report.succeeded, 1);
        assert!(aggregator.guard().last_run().await.is_some());
    }
}
