//! # Site Client
//!
//! Outbound HTTP calls between hub and spokes.
//!
//! ## Call Map
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                         SiteClient Calls                                │
//! │                                                                         │
//! │  HUB SIDE                               SPOKE SIDE                      │
//! │  ├── probe_count      GET  (READ+HUB)   ├── pair          POST /uc/pair │
//! │  ├── push_read_token  POST (ADMIN)      └── hub_check_in  POST (HUB)    │
//! │  └── relay            POST (ADMIN)                                      │
//! │                                                                         │
//! │  Every call is bounded by [http] connect/request timeouts.             │
//! │  Transport failures and non-2xx answers become SyncError::Remote with  │
//! │  the status code and a truncated body. relay() is the exception: a     │
//! │  non-2xx answer is returned to the operator as-is.                     │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

use reqwest::StatusCode;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::{debug, warn};

use crate::config::HttpSettings;
use crate::credentials::{ADMIN_HEADER, HUB_HEADER, READ_HEADER};
use crate::error::{truncate_body, SyncError, SyncResult};
use crate::protocol::{
    paths, parse_device_count, HubCheckInRequest, PairRequest, PairResponse, ReadTokenPush,
    RelayResponse,
};

/// HTTP client for hub ↔ spoke calls.
#[derive(Debug, Clone)]
pub struct SiteClient {
    http: reqwest::Client,
}

impl SiteClient {
    /// Builds a client with the configured timeouts.
    pub fn new(settings: &HttpSettings) -> SyncResult<Self> {
        let http = reqwest::Client::builder()
            .connect_timeout(settings.connect_timeout())
            .timeout(settings.request_timeout())
            .user_agent(concat!("tmon/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|e| SyncError::Internal(format!("Failed to build HTTP client: {}", e)))?;

        Ok(SiteClient { http })
    }

    fn url(base: &str, path: &str) -> String {
        format!("{}{}", base.trim_end_matches('/'), path)
    }

    /// Sends a request and returns status plus body text.
    async fn execute(&self, request: reqwest::RequestBuilder, url: &str) -> SyncResult<(StatusCode, String)> {
        let response = request
            .send()
            .await
            .map_err(|e| SyncError::from_transport(url, &e))?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| SyncError::from_transport(url, &e))?;

        debug!(url = %url, status = status.as_u16(), body = %truncate_body(&body), "Remote response");
        Ok((status, body))
    }

    /// Like `execute`, but non-2xx is an error.
    async fn execute_ok(&self, request: reqwest::RequestBuilder, url: &str) -> SyncResult<String> {
        let (status, body) = self.execute(request, url).await?;
        if !status.is_success() {
            return Err(SyncError::remote(url, Some(status.as_u16()), &body));
        }
        Ok(body)
    }

    fn parse_json<T: DeserializeOwned>(url: &str, status: StatusCode, body: &str) -> SyncResult<T> {
        serde_json::from_str(body).map_err(|e| {
            warn!(url = %url, error = %e, "Unparseable remote response");
            SyncError::remote(url, Some(status.as_u16()), &format!("invalid response body: {}", e))
        })
    }

    // =========================================================================
    // Hub → Spoke
    // =========================================================================

    /// Asks one candidate path for the spoke's device count.
    ///
    /// Both the read token and the hub key are sent; spokes accept either.
    pub async fn probe_count(
        &self,
        site_url: &str,
        path: &str,
        read_token: Option<&str>,
        hub_key: Option<&str>,
    ) -> SyncResult<u64> {
        let url = Self::url(site_url, path);
        let mut request = self.http.get(&url);
        if let Some(token) = read_token {
            request = request.header(READ_HEADER, token);
        }
        if let Some(key) = hub_key {
            request = request.header(HUB_HEADER, key);
        }

        let body = self.execute_ok(request, &url).await?;
        parse_device_count(&body).ok_or_else(|| {
            SyncError::remote(&url, Some(StatusCode::OK.as_u16()), &format!("no device count in body: {}", body))
        })
    }

    /// Pushes a rotated (or revoked, `None`) read token to the spoke.
    pub async fn push_read_token(&self, site_url: &str, uc_key: &str, read_token: Option<&str>) -> SyncResult<()> {
        let url = Self::url(site_url, paths::ADMIN_READ_TOKEN);
        let request = self
            .http
            .post(&url)
            .header(ADMIN_HEADER, uc_key)
            .json(&ReadTokenPush {
                read_token: read_token.map(str::to_string),
            });

        self.execute_ok(request, &url).await?;
        Ok(())
    }

    /// Forwards an operator call to a spoke admin endpoint.
    pub async fn relay(&self, site_url: &str, uc_key: &str, path: &str, body: &Value) -> SyncResult<RelayResponse> {
        let url = Self::url(site_url, path);
        let request = self.http.post(&url).header(ADMIN_HEADER, uc_key).json(body);

        let (status, text) = self.execute(request, &url).await?;
        if !status.is_success() {
            warn!(url = %url, status = status.as_u16(), "Spoke rejected relayed call");
        }

        let body = serde_json::from_str(&text).unwrap_or_else(|_| Value::String(truncate_body(&text)));
        Ok(RelayResponse {
            site_url: site_url.to_string(),
            path: path.to_string(),
            status: status.as_u16(),
            ok: status.is_success(),
            body,
        })
    }

    // =========================================================================
    // Spoke → Hub
    // =========================================================================

    /// Sends the bootstrap pairing request.
    pub async fn pair(&self, hub_url: &str, request: &PairRequest) -> SyncResult<PairResponse> {
        let url = Self::url(hub_url, paths::UC_PAIR);
        let (status, body) = self.execute(self.http.post(&url).json(request), &url).await?;
        if !status.is_success() {
            return Err(SyncError::remote(&url, Some(status.as_u16()), &body));
        }
        Self::parse_json(&url, status, &body)
    }

    /// Reports liveness and the local device count to the hub.
    pub async fn hub_check_in(&self, hub_url: &str, hub_key: &str, request: &HubCheckInRequest) -> SyncResult<()> {
        let url = Self::url(hub_url, paths::HUB_CHECK_IN);
        let request = self.http.post(&url).header(HUB_HEADER, hub_key).json(request);
        self.execute_ok(request, &url).await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use wiremock::matchers::{body_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn client() -> SiteClient {
        SiteClient::new(&HttpSettings {
            connect_timeout_secs: 1,
            request_timeout_secs: 1,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_probe_count_sends_both_headers() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(paths::SITE_DEVICES))
            .and(header("x-tmon-read", "read-1"))
            .and(header("x-tmon-hub", "hub-1"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 12})))
            .mount(&server)
            .await;

        let count = client()
            .probe_count(&server.uri(), paths::SITE_DEVICES, Some("read-1"), Some("hub-1"))
            .await
            .unwrap();
        assert_eq!(count, 12);
    }

    #[tokio::test]
    async fn test_probe_count_non_2xx_is_remote_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(403).set_body_string("forbidden"))
            .mount(&server)
            .await;

        let err = client()
            .probe_count(&server.uri(), paths::SITE_DEVICES, Some("bad"), None)
            .await
            .unwrap_err();
        assert_eq!(err.remote_status(), Some(403));
        assert!(err.to_string().contains("forbidden"));
    }

    #[tokio::test]
    async fn test_probe_count_unparseable_body() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("<html></html>"))
            .mount(&server)
            .await;

        let err = client()
            .probe_count(&server.uri(), "/devices", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { status: Some(200), .. }));
    }

    #[tokio::test]
    async fn test_timeout_is_remote_error_without_status() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_string("1")
                    .set_delay(std::time::Duration::from_secs(3)),
            )
            .mount(&server)
            .await;

        let err = client()
            .probe_count(&server.uri(), "/devices", None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, SyncError::Remote { status: None, .. }));
        assert!(err.is_retryable());
    }

    #[tokio::test]
    async fn test_push_read_token() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(paths::ADMIN_READ_TOKEN))
            .and(header("x-tmon-admin", "uc-1"))
            .and(body_json(json!({"read_token": null})))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&server)
            .await;

        client()
            .push_read_token(&server.uri(), "uc-1", None)
            .await
            .unwrap();
    }

    #[tokio::test]
    async fn test_relay_surfaces_spoke_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(paths::ADMIN_DEVICE_SETTINGS))
            .respond_with(
                ResponseTemplate::new(400).set_body_json(json!({"code": "VALIDATION", "message": "bad"})),
            )
            .mount(&server)
            .await;

        let relayed = client()
            .relay(&server.uri(), "uc-1", paths::ADMIN_DEVICE_SETTINGS, &json!({"unit_id": "U1"}))
            .await
            .unwrap();
        assert!(!relayed.ok);
        assert_eq!(relayed.status, 400);
        assert_eq!(relayed.body["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn test_pair_parses_response() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path(paths::UC_PAIR))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "hub_key": "h".repeat(64),
                "read_token": "r".repeat(64),
                "api_version": 2
            })))
            .mount(&server)
            .await;

        let response = client()
            .pair(
                &server.uri(),
                &PairRequest {
                    site_url: "https://farm.example.com".into(),
                    uc_key: "u".repeat(64),
                    api_version: 2,
                },
            )
            .await
            .unwrap();
        assert_eq!(response.api_version, 2);
        assert_eq!(response.hub_key.len(), 64);
    }
}
