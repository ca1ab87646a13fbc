//! # Operator Relays
//!
//! Hub operator actions forwarded to a paired spoke's admin endpoints
//! with that spoke's `X-TMON-ADMIN` key.
//!
//! ```text
//!   operator ──► hub /admin/relay/settings ──► spoke /admin/device/settings
//!                    /admin/relay/apply    ──►       /admin/device/settings/apply
//!                    /admin/relay/clear    ──►       /admin/device/settings/clear
//!                    /admin/relay/command  ──►       /admin/device/command
//!                    /admin/relay/firmware-job ──►   /admin/firmware-job
//! ```
//!
//! The spoke's answer comes back verbatim with its HTTP status. Only a
//! transport failure is an error. None of this touches the spoke's poll
//! path; a unit still picks staged settings up on its next poll.

use serde_json::{json, Value};
use tracing::info;

use crate::client::SiteClient;
use crate::error::SyncResult;
use crate::pairing::HubPairing;
use crate::protocol::{
    paths, RelayCommandRequest, RelayFirmwareRequest, RelayResponse, RelaySettingsRequest,
    RelayUnitRequest,
};

/// Forwards operator calls to spokes.
#[derive(Debug, Clone)]
pub struct SiteRelay {
    pairing: HubPairing,
    client: SiteClient,
}

impl SiteRelay {
    pub fn new(pairing: HubPairing, client: SiteClient) -> Self {
        SiteRelay { pairing, client }
    }

    async fn forward(&self, site_url: &str, path: &str, body: Value) -> SyncResult<RelayResponse> {
        let pairing = self.pairing.pairing(site_url).await?;
        let response = self
            .client
            .relay(&pairing.site_url, &pairing.uc_key, path, &body)
            .await?;
        info!(site_url = %pairing.site_url, path, status = response.status, "Relayed to spoke");
        Ok(response)
    }

    pub async fn stage_settings(&self, request: &RelaySettingsRequest) -> SyncResult<RelayResponse> {
        let body = json!({
            "unit_id": request.unit_id,
            "machine_id": request.machine_id,
            "settings": request.settings,
        });
        self.forward(&request.site_url, paths::ADMIN_DEVICE_SETTINGS, body).await
    }

    pub async fn apply_settings(&self, request: &RelayUnitRequest) -> SyncResult<RelayResponse> {
        self.forward(
            &request.site_url,
            paths::ADMIN_SETTINGS_APPLY,
            json!({"unit_id": request.unit_id}),
        )
        .await
    }

    pub async fn clear_settings(&self, request: &RelayUnitRequest) -> SyncResult<RelayResponse> {
        self.forward(
            &request.site_url,
            paths::ADMIN_SETTINGS_CLEAR,
            json!({"unit_id": request.unit_id}),
        )
        .await
    }

    pub async fn command(&self, request: &RelayCommandRequest) -> SyncResult<RelayResponse> {
        let body = json!({
            "unit_id": request.unit_id,
            "command": request.command,
            "params": request.params,
        });
        self.forward(&request.site_url, paths::ADMIN_DEVICE_COMMAND, body).await
    }

    pub async fn firmware_job(&self, request: &RelayFirmwareRequest) -> SyncResult<RelayResponse> {
        let body = json!({
            "unit_ids": request.unit_ids,
            "params": request.params,
        });
        self.forward(&request.site_url, paths::ADMIN_FIRMWARE_JOB, body).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::HttpSettings;
    use crate::credentials::generate_secret;
    use crate::error::ErrorKind;
    use crate::protocol::PairRequest;
    use tmon_db::{Database, DbConfig};
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    async fn relay_for(server: &MockServer, uc_key: &str) -> SiteRelay {
        let client = SiteClient::new(&HttpSettings {
            connect_timeout_secs: 1,
            request_timeout_secs: 2,
        })
        .unwrap();
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let pairing = HubPairing::new(db, client.clone());
        pairing
            .accept_pair_request(&PairRequest {
                site_url: server.uri(),
                uc_key: uc_key.to_string(),
                api_version: 2,
            })
            .await
            .unwrap();
        SiteRelay::new(pairing, client)
    }

    #[tokio::test]
    async fn test_stage_relay_uses_site_admin_key() {
        let server = MockServer::start().await;
        let uc_key = generate_secret();
        Mock::given(method("POST"))
            .and(path(paths::ADMIN_DEVICE_SETTINGS))
            .and(header("x-tmon-admin", uc_key.as_str()))
            .and(body_json(json!({"unit_id": "U1", "machine_id": null, "settings": {"X": 1}})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"unit_id": "U1"})))
            .expect(1)
            .mount(&server)
            .await;

        let relay = relay_for(&server, &uc_key).await;
        let response = relay
            .stage_settings(&RelaySettingsRequest {
                site_url: server.uri(),
                unit_id: "U1".into(),
                machine_id: None,
                settings: json!({"X": 1}),
            })
            .await
            .unwrap();
        assert!(response.ok);
        assert_eq!(response.status, 200);
        assert_eq!(response.path, paths::ADMIN_DEVICE_SETTINGS);
    }

    #[tokio::test]
    async fn test_spoke_error_surfaces_as_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(paths::ADMIN_SETTINGS_APPLY))
            .respond_with(ResponseTemplate::new(404).set_body_json(json!({"code": "NOT_FOUND"})))
            .mount(&server)
            .await;

        let relay = relay_for(&server, &generate_secret()).await;
        let response = relay
            .apply_settings(&RelayUnitRequest {
                site_url: server.uri(),
                unit_id: "U1".into(),
            })
            .await
            .unwrap();
        assert!(!response.ok);
        assert_eq!(response.status, 404);
    }

    #[tokio::test]
    async fn test_unknown_site_is_not_found() {
        let server = MockServer::start().await;
        let relay = relay_for(&server, &generate_secret()).await;
        let err = relay
            .clear_settings(&RelayUnitRequest {
                site_url: "https://nowhere.example.com".into(),
                unit_id: "U1".into(),
            })
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
