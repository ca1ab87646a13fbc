//! # TMON Hub API
//!
//! HTTP surface of TMON Admin, the central node spokes pair with.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                           Hub Routes                                    │
//! │                                                                         │
//! │  OPEN                                                                   │
//! │  GET  /health                                                           │
//! │  POST /uc/pair                 spoke offers uc_key, gets hub_key +     │
//! │                                read_token                              │
//! │                                                                         │
//! │  X-TMON-HUB                                                             │
//! │  POST /hub/check-in            liveness + self-reported device count   │
//! │                                                                         │
//! │  X-TMON-ADMIN (hub.operator_key)                                        │
//! │  GET  /admin/sites             pairings + last refresh result          │
//! │  POST /admin/sites/{rotate,revoke,unpair}                               │
//! │  POST /admin/refresh           count refresh across all sites          │
//! │  POST /admin/relay/{settings,apply,clear,command,firmware-job}          │
//! │                                forwarded to the spoke; answers with    │
//! │                                the spoke's status                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```

pub mod auth;
pub mod handlers;

use std::sync::Arc;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use tmon_db::Database;
use tmon_sync::protocol::paths;
use tmon_sync::{HubAggregator, HubPairing, NodeRole, SiteClient, SiteRelay, SyncResult, TmonConfig};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub role: NodeRole,
    pub pairing: HubPairing,
    pub aggregator: HubAggregator,
    pub relay: SiteRelay,
    pub operator_key: Option<Arc<str>>,
}

impl AppState {
    pub fn new(db: Database, config: &TmonConfig) -> SyncResult<Self> {
        let client = SiteClient::new(&config.http)?;
        let pairing = HubPairing::new(db.clone(), client.clone());

        Ok(AppState {
            role: config.role(),
            aggregator: HubAggregator::new(db.clone(), client.clone()),
            relay: SiteRelay::new(pairing.clone(), client),
            operator_key: config.hub.operator_key.as_deref().map(Arc::from),
            pairing,
            db,
        })
    }
}

/// Builds the hub router.
pub fn build_router(state: AppState) -> Router {
    let operator = Router::new()
        .route(paths::HUB_SITES, get(handlers::list_sites))
        .route(paths::HUB_SITES_ROTATE, post(handlers::rotate))
        .route(paths::HUB_SITES_REVOKE, post(handlers::revoke))
        .route(paths::HUB_SITES_UNPAIR, post(handlers::unpair))
        .route(paths::HUB_REFRESH, post(handlers::refresh))
        .route(paths::HUB_RELAY_SETTINGS, post(handlers::relay_settings))
        .route(paths::HUB_RELAY_APPLY, post(handlers::relay_apply))
        .route(paths::HUB_RELAY_CLEAR, post(handlers::relay_clear))
        .route(paths::HUB_RELAY_COMMAND, post(handlers::relay_command))
        .route(paths::HUB_RELAY_FIRMWARE_JOB, post(handlers::relay_firmware_job))
        .route_layer(from_fn_with_state(state.clone(), auth::require_operator));

    Router::new()
        .route(paths::HEALTH, get(handlers::health))
        .route(paths::UC_PAIR, post(handlers::pair))
        .route(paths::HUB_CHECK_IN, post(handlers::check_in))
        .merge(operator)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use serde_json::{json, Value};
    use tmon_db::DbConfig;
    use tower::ServiceExt;
    use wiremock::matchers::{header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const OPERATOR_KEY: &str = "operator-secret";

    async fn app(operator_key: Option<&str>) -> Router {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        let mut config = TmonConfig::default();
        config.node.role = NodeRole::Hub;
        config.hub.operator_key = operator_key.map(str::to_string);
        config.http.connect_timeout_secs = 1;
        config.http.request_timeout_secs = 2;
        build_router(AppState::new(db, &config).unwrap())
    }

    async fn send(
        app: &Router,
        method: &str,
        uri: &str,
        headers: &[(&str, &str)],
        body: Option<Value>,
    ) -> (StatusCode, Value) {
        let mut builder = Request::builder().method(method).uri(uri);
        for (name, value) in headers {
            builder = builder.header(*name, *value);
        }
        let request = match body {
            Some(body) => builder
                .header("content-type", "application/json")
                .body(Body::from(body.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };

        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
        (status, value)
    }

    fn operator() -> [(&'static str, &'static str); 1] {
        [("x-tmon-admin", OPERATOR_KEY)]
    }

    fn uc_key(fill: char) -> String {
        std::iter::repeat(fill).take(64).collect()
    }

    async fn pair(app: &Router, site_url: &str, uc_key: &str) -> Value {
        let (status, body) = send(
            app,
            "POST",
            "/uc/pair",
            &[],
            Some(json!({"site_url": site_url, "uc_key": uc_key, "api_version": 2})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        body
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(None).await;
        let (status, body) = send(&app, "GET", "/health", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["role"], "hub");
    }

    #[tokio::test]
    async fn test_pair_then_check_in() {
        let app = app(Some(OPERATOR_KEY)).await;
        let site = "https://site-a.example.com";
        let paired = pair(&app, site, &uc_key('a')).await;
        let hub_key = paired["hub_key"].as_str().unwrap().to_string();
        assert!(paired["read_token"].is_string());

        let (status, body) = send(
            &app,
            "POST",
            "/hub/check-in",
            &[("x-tmon-hub", hub_key.as_str())],
            Some(json!({"site_url": site, "device_count": 4})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["site_url"], site);

        let (_, sites) = send(&app, "GET", "/admin/sites", &operator(), None).await;
        assert_eq!(sites[0]["device_count"], 4);
        assert!(sites[0]["last_seen"].is_string());

        let (status, _) = send(
            &app,
            "POST",
            "/hub/check-in",
            &[("x-tmon-hub", uc_key('a').as_str())],
            Some(json!({"site_url": site})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_repair_with_other_key_rejected() {
        let app = app(None).await;
        let site = "https://site-a.example.com";
        pair(&app, site, &uc_key('a')).await;

        let (status, _) = send(
            &app,
            "POST",
            "/uc/pair",
            &[],
            Some(json!({"site_url": site, "uc_key": uc_key('b')})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_operator_routes_require_configured_key() {
        let disabled = app(None).await;
        let (status, _) = send(&disabled, "GET", "/admin/sites", &operator(), None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);

        let app = app(Some(OPERATOR_KEY)).await;
        let (status, _) = send(&app, "GET", "/admin/sites", &[("x-tmon-admin", "wrong")], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, body) = send(&app, "GET", "/admin/sites", &operator(), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!([]));
    }

    #[tokio::test]
    async fn test_refresh_counts_from_spoke() {
        let spoke = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(paths::SITE_DEVICES_COUNT_V2))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"count": 3})))
            .mount(&spoke)
            .await;

        let app = app(Some(OPERATOR_KEY)).await;
        pair(&app, &spoke.uri(), &uc_key('a')).await;

        let (status, report) = send(&app, "POST", "/admin/refresh", &operator(), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["succeeded"], 1);
        assert_eq!(report["sites"][0]["result"], "count");
        assert_eq!(report["sites"][0]["count"], 3);
    }

    #[tokio::test]
    async fn test_relay_surfaces_spoke_status() {
        let spoke = MockServer::start().await;
        let key = uc_key('c');
        Mock::given(method("POST"))
            .and(path(paths::ADMIN_SETTINGS_APPLY))
            .and(header("x-tmon-admin", key.as_str()))
            .respond_with(
                ResponseTemplate::new(404).set_body_json(json!({"code": "NOT_FOUND", "message": "nothing staged"})),
            )
            .mount(&spoke)
            .await;

        let app = app(Some(OPERATOR_KEY)).await;
        pair(&app, &spoke.uri(), &key).await;

        let (status, body) = send(
            &app,
            "POST",
            "/admin/relay/apply",
            &operator(),
            Some(json!({"site_url": spoke.uri(), "unit_id": "U1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        assert_eq!(body["ok"], false);
        assert_eq!(body["body"]["code"], "NOT_FOUND");

        let (status, _) = send(
            &app,
            "POST",
            "/admin/relay/apply",
            &operator(),
            Some(json!({"site_url": "https://unknown.example.com", "unit_id": "U1"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_rotate_pushes_token() {
        let spoke = MockServer::start().await;
        let key = uc_key('d');
        Mock::given(method("POST"))
            .and(path(paths::ADMIN_READ_TOKEN))
            .and(header("x-tmon-admin", key.as_str()))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({"ok": true})))
            .expect(1)
            .mount(&spoke)
            .await;

        let app = app(Some(OPERATOR_KEY)).await;
        let paired = pair(&app, &spoke.uri(), &key).await;

        let (status, report) = send(
            &app,
            "POST",
            "/admin/sites/rotate",
            &operator(),
            Some(json!({"site_url": spoke.uri()})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["pushed"], true);
        assert!(paired["read_token"].is_string());

        let (_, removed) = send(
            &app,
            "POST",
            "/admin/sites/unpair",
            &operator(),
            Some(json!({"site_url": spoke.uri()})),
        )
        .await;
        assert_eq!(removed["removed"], true);
    }

    #[tokio::test]
    async fn test_concurrent_refresh_runs_once() {
        let spoke = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path(paths::SITE_DEVICES_COUNT_V2))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({"count": 5}))
                    .set_delay(std::time::Duration::from_millis(300)),
            )
            .mount(&spoke)
            .await;

        let app = app(Some(OPERATOR_KEY)).await;
        pair(&app, &spoke.uri(), &uc_key('e')).await;

        let (headers_a, headers_b) = (operator(), operator());
        let (first, second) = tokio::join!(
            send(&app, "POST", "/admin/refresh", &headers_a, None),
            send(&app, "POST", "/admin/refresh", &headers_b, None),
        );
        let mut statuses = [first.0, second.0];
        statuses.sort();
        assert_eq!(statuses, [StatusCode::OK, StatusCode::CONFLICT]);

        let rejected = if first.0 == StatusCode::CONFLICT { first.1 } else { second.1 };
        assert_eq!(rejected["code"], "CONFLICT");
        assert_eq!(spoke.received_requests().await.unwrap().len(), 1);

        // The guard is released once the pass finishes
        let (status, report) = send(&app, "POST", "/admin/refresh", &operator(), None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["sites"][0]["count"], 5);
    }

    #[tokio::test]
    async fn test_malformed_bodies_are_validation_errors() {
        let app = app(Some(OPERATOR_KEY)).await;

        let missing_key = json!({"site_url": "https://a.example"});
        let (status, body) = send(&app, "POST", "/uc/pair", &[], Some(missing_key)).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, body) =
            send(&app, "POST", "/admin/sites/rotate", &operator(), Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, body) = send(&app, "POST", "/admin/relay/apply", &operator(), None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");
    }
}
