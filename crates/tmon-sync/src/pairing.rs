//! # Pairing Protocol
//!
//! Establishes and maintains the shared secrets between one hub and its
//! spokes.
//!
//! ## Handshake
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Pairing Handshake                              │
//! │                                                                         │
//! │  SPOKE                                         HUB                      │
//! │  ─────                                         ───                      │
//! │  1. ensure_local_key()                                                  │
//! │     admin_key = existing or random 32 bytes                             │
//! │     hub_links: PairingRequested                                         │
//! │                                                                         │
//! │  2. POST /uc/pair {site_url, uc_key, api_version} ──►                   │
//! │                                                                         │
//! │                               3. accept_pair_request()                  │
//! │                                  new site: hub_key = random             │
//! │                                  known site, same uc_key: keep hub_key  │
//! │                                  known site, other uc_key: 403          │
//! │                                  read_token = random (always new)       │
//! │                                  insert-if-absent, else update          │
//! │                                  WHERE site_url AND uc_key match        │
//! │                                                                         │
//! │  ◄── {hub_key, read_token, api_version}                                 │
//! │                                                                         │
//! │  4. hub_links: hub_key + read_token → Paired                            │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Rotation
//! `rotate` and `revoke` store the new token on the hub first and then push
//! it to the spoke. A failed push is reported, not retried: until the
//! operator rotates again, the spoke keeps accepting the old token.

use chrono::Utc;
use serde_json::json;
use tracing::{info, warn};

use tmon_core::validation::{normalize_site_url, validate_secret};
use tmon_core::{HubLink, Pairing, PairingState, SiteStatus, API_VERSION};
use tmon_db::Database;

use crate::client::SiteClient;
use crate::credentials::{generate_secret, secrets_match};
use crate::error::{SyncError, SyncResult};
use crate::protocol::{
    HubCheckInRequest, HubCheckInResponse, PairRequest, PairResponse, SiteView, TokenPushReport,
};

/// Probe path recorded when a count arrives by spoke check-in.
pub const CHECK_IN_SOURCE: &str = "check-in";

// =============================================================================
// Hub Side
// =============================================================================

/// Hub-side pairing service.
#[derive(Debug, Clone)]
pub struct HubPairing {
    db: Database,
    client: SiteClient,
}

impl HubPairing {
    pub fn new(db: Database, client: SiteClient) -> Self {
        HubPairing { db, client }
    }

    /// Handles `POST /uc/pair`.
    ///
    /// ## Errors
    /// - `Validation` for a malformed URL or a weak `uc_key`
    /// - `Unauthorized` when the site is paired under a different `uc_key`
    pub async fn accept_pair_request(&self, request: &PairRequest) -> SyncResult<PairResponse> {
        let site_url = normalize_site_url(&request.site_url)?;
        validate_secret("uc_key", &request.uc_key)?;

        let now = Utc::now();
        let read_token = generate_secret();
        let fresh = Pairing {
            site_url: site_url.clone(),
            uc_key: request.uc_key.clone(),
            hub_key: generate_secret(),
            read_token: Some(read_token.clone()),
            api_version: request.api_version,
            paired_at: now,
            last_seen: None,
            updated_at: now,
        };

        // Of two racing requests for one site, exactly one uc_key is stored
        let pairing = if self.db.pairings().insert_new(&fresh).await? {
            fresh
        } else {
            let repaired = self
                .db
                .pairings()
                .update_repair(&site_url, &request.uc_key, &read_token, request.api_version)
                .await?;
            match repaired {
                Some(pairing) => pairing,
                None => {
                    warn!(site_url = %site_url, "Re-pair attempt with a different uc_key");
                    return Err(SyncError::unauthorized(
                        "site is already paired under a different key",
                    ));
                }
            }
        };

        self.audit("pair", &site_url, json!({"api_version": pairing.api_version}))
            .await;
        info!(site_url = %site_url, api_version = pairing.api_version, "Site paired");

        let read_token = pairing.read_token.clone().unwrap_or_default();
        Ok(PairResponse {
            hub_key: pairing.hub_key,
            read_token,
            api_version: API_VERSION,
        })
    }

    /// Looks up a pairing by (unnormalized) URL.
    pub async fn pairing(&self, site_url: &str) -> SyncResult<Pairing> {
        let site_url = normalize_site_url(site_url)?;
        self.db
            .pairings()
            .get(&site_url)
            .await?
            .ok_or_else(|| SyncError::not_found("Pairing", site_url))
    }

    /// Issues a new read token, stores it, then pushes it to the spoke.
    pub async fn rotate(&self, site_url: &str) -> SyncResult<TokenPushReport> {
        let pairing = self.pairing(site_url).await?;
        let token = generate_secret();

        self.db
            .pairings()
            .set_read_token(&pairing.site_url, Some(&token))
            .await?;
        self.audit("rotate", &pairing.site_url, json!({})).await;

        Ok(self.push_token(&pairing, Some(&token)).await)
    }

    /// Clears the read token locally and on the spoke.
    pub async fn revoke(&self, site_url: &str) -> SyncResult<TokenPushReport> {
        let pairing = self.pairing(site_url).await?;

        self.db
            .pairings()
            .set_read_token(&pairing.site_url, None)
            .await?;
        self.audit("revoke", &pairing.site_url, json!({})).await;

        Ok(self.push_token(&pairing, None).await)
    }

    async fn push_token(&self, pairing: &Pairing, token: Option<&str>) -> TokenPushReport {
        match self
            .client
            .push_read_token(&pairing.site_url, &pairing.uc_key, token)
            .await
        {
            Ok(()) => {
                info!(site_url = %pairing.site_url, revoked = token.is_none(), "Read token pushed");
                TokenPushReport {
                    site_url: pairing.site_url.clone(),
                    pushed: true,
                    push_error: None,
                }
            }
            Err(e) => {
                warn!(site_url = %pairing.site_url, error = %e, "Read token push failed; spoke keeps old token");
                TokenPushReport {
                    site_url: pairing.site_url.clone(),
                    pushed: false,
                    push_error: Some(e.to_string()),
                }
            }
        }
    }

    /// Forgets a site and its aggregate status.
    pub async fn unpair(&self, site_url: &str) -> SyncResult<bool> {
        let site_url = normalize_site_url(site_url)?;
        let removed = self.db.pairings().delete(&site_url).await?;
        if removed {
            self.audit("unpair", &site_url, json!({})).await;
            info!(site_url = %site_url, "Site unpaired");
        }
        Ok(removed)
    }

    /// Checks `X-TMON-HUB` for a spoke-originated call.
    ///
    /// Unknown sites are reported as unauthorized, not as missing.
    pub async fn verify_hub_key(&self, site_url: &str, presented: Option<&str>) -> SyncResult<Pairing> {
        let site_url = normalize_site_url(site_url)?;
        let pairing = self.db.pairings().get(&site_url).await?;

        match pairing {
            Some(p) if secrets_match(presented, Some(&p.hub_key)) => Ok(p),
            _ => Err(SyncError::unauthorized("invalid hub key")),
        }
    }

    /// Handles `POST /hub/check-in`.
    pub async fn record_check_in(
        &self,
        request: &HubCheckInRequest,
        presented: Option<&str>,
    ) -> SyncResult<HubCheckInResponse> {
        let pairing = self.verify_hub_key(&request.site_url, presented).await?;
        let now = Utc::now();

        self.db.pairings().touch(&pairing.site_url, now).await?;
        if let Some(count) = request.device_count {
            self.db
                .site_status()
                .record_success(&pairing.site_url, count, CHECK_IN_SOURCE)
                .await?;
        }

        Ok(HubCheckInResponse {
            site_url: pairing.site_url,
            last_seen: now,
        })
    }

    /// Pairings joined with their last refresh result.
    pub async fn list_sites(&self) -> SyncResult<Vec<SiteView>> {
        let pairings = self.db.pairings().list().await?;
        let statuses = self.db.site_status().list().await?;

        Ok(pairings
            .into_iter()
            .map(|p| {
                let status: Option<&SiteStatus> = statuses.iter().find(|s| s.site_url == p.site_url);
                SiteView {
                    has_read_token: p.read_token.is_some(),
                    device_count: status.and_then(|s| s.device_count),
                    probe_path: status.and_then(|s| s.probe_path.clone()),
                    last_error: status.and_then(|s| s.last_error.clone()),
                    last_status: status.and_then(|s| s.last_status),
                    refreshed_at: status.map(|s| s.refreshed_at),
                    site_url: p.site_url,
                    api_version: p.api_version,
                    paired_at: p.paired_at,
                    last_seen: p.last_seen,
                }
            })
            .collect())
    }

    async fn audit(&self, action: &str, subject: &str, detail: serde_json::Value) {
        if let Err(e) = self.db.audit().record("hub", action, subject, &detail).await {
            warn!(action, error = %e, "Failed to write audit entry");
        }
    }
}

// =============================================================================
// Spoke Side
// =============================================================================

/// Spoke-side pairing service and credential checks.
#[derive(Debug, Clone)]
pub struct SpokePairing {
    db: Database,
    client: SiteClient,
    site_url: Option<String>,
}

impl SpokePairing {
    /// `site_url` is this spoke's public URL, sent to the hub when pairing.
    pub fn new(db: Database, client: SiteClient, site_url: Option<String>) -> Self {
        SpokePairing {
            db,
            client,
            site_url,
        }
    }

    pub async fn link(&self) -> SyncResult<Option<HubLink>> {
        Ok(self.db.hub_links().current().await?)
    }

    pub async fn state(&self) -> SyncResult<PairingState> {
        Ok(self
            .link()
            .await?
            .map(|l| l.pairing_state())
            .unwrap_or(PairingState::Unpaired))
    }

    /// Returns the link for `hub_url`, creating one with a fresh admin key
    /// if this spoke has none for that hub.
    pub async fn ensure_local_key(&self, hub_url: &str) -> SyncResult<HubLink> {
        let hub_url = normalize_site_url(hub_url)?;

        if let Some(link) = self.link().await? {
            if link.hub_url == hub_url {
                return Ok(link);
            }
            warn!(old = %link.hub_url, new = %hub_url, "Replacing hub link");
        }

        let link = HubLink {
            hub_url,
            admin_key: generate_secret(),
            hub_key: None,
            read_token: None,
            hub_api_version: None,
            paired_at: None,
            updated_at: Utc::now(),
        };
        self.db.hub_links().save(&link).await?;
        Ok(link)
    }

    /// Runs the handshake against `hub_url` and stores the credentials.
    pub async fn pair_with_hub(&self, hub_url: &str) -> SyncResult<HubLink> {
        let site_url = self
            .site_url
            .as_deref()
            .ok_or_else(|| SyncError::InvalidConfig("node.site_url is required to pair".into()))?;
        let site_url = normalize_site_url(site_url)?;

        let link = self.ensure_local_key(hub_url).await?;
        let response = self
            .client
            .pair(
                &link.hub_url,
                &PairRequest {
                    site_url,
                    uc_key: link.admin_key.clone(),
                    api_version: API_VERSION,
                },
            )
            .await?;

        validate_secret("hub_key", &response.hub_key)?;
        validate_secret("read_token", &response.read_token)?;

        let now = Utc::now();
        let link = HubLink {
            hub_key: Some(response.hub_key),
            read_token: Some(response.read_token),
            hub_api_version: Some(response.api_version),
            paired_at: Some(now),
            updated_at: now,
            ..link
        };
        self.db.hub_links().save(&link).await?;

        if let Err(e) = self
            .db
            .audit()
            .record("spoke", "pair", &link.hub_url, &json!({"api_version": response.api_version}))
            .await
        {
            warn!(error = %e, "Failed to write audit entry");
        }
        info!(hub_url = %link.hub_url, "Paired with hub");
        Ok(link)
    }

    /// Stores a read token pushed by the hub (`None` revokes).
    pub async fn accept_read_token_push(&self, read_token: Option<&str>) -> SyncResult<()> {
        if let Some(token) = read_token {
            validate_secret("read_token", token)?;
        }
        if !self.db.hub_links().set_read_token(read_token).await? {
            return Err(SyncError::NotPaired);
        }
        info!(revoked = read_token.is_none(), "Read token updated by hub");
        Ok(())
    }

    /// Checks `X-TMON-ADMIN` against the local admin key.
    pub async fn verify_admin(&self, presented: Option<&str>) -> SyncResult<()> {
        let link = self.link().await?;
        if secrets_match(presented, link.as_ref().map(|l| l.admin_key.as_str())) {
            Ok(())
        } else {
            Err(SyncError::unauthorized("invalid admin key"))
        }
    }

    /// Accepts either `X-TMON-READ` (read token) or `X-TMON-HUB` (hub key).
    pub async fn verify_read(&self, read_token: Option<&str>, hub_key: Option<&str>) -> SyncResult<()> {
        let link = self.link().await?;
        let link = link.as_ref();
        if secrets_match(read_token, link.and_then(|l| l.read_token.as_deref()))
            || secrets_match(hub_key, link.and_then(|l| l.hub_key.as_deref()))
        {
            Ok(())
        } else {
            Err(SyncError::unauthorized("invalid read token"))
        }
    }

    /// Reports this spoke's device count to the hub.
    ///
    /// Returns false without calling out when not paired.
    pub async fn check_in_with_hub(&self) -> SyncResult<bool> {
        let Some(link) = self.link().await? else {
            return Ok(false);
        };
        let (Some(hub_key), Some(site_url)) = (link.hub_key.as_deref(), self.site_url.as_deref()) else {
            return Ok(false);
        };

        let count = self.db.devices().count().await?;
        let request = HubCheckInRequest {
            site_url: normalize_site_url(site_url)?,
            device_count: u64::try_from(count).ok(),
        };
        self.client.hub_check_in(&link.hub_url, hub_key, &request).await?;
        Ok(true)
    }
}
