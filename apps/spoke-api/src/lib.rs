//! # TMON Spoke API
//!
//! HTTP surface of a Unit Connector site.
//!
//! ## Routes
//! ```text
//! ┌─────────────────────────────────────────────────────────────────────────┐
//! │                          Spoke Routes                                   │
//! │                                                                         │
//! │  OPEN                                                                   │
//! │  GET  /health                                                           │
//! │  POST /device/check-in            unit reports applied settings        │
//! │  POST /device/commands            claim queued commands                │
//! │  POST /device/command-complete    report a result                      │
//! │  GET  /device/staged-settings     poll bundle (claims commands)        │
//! │                                                                         │
//! │  X-TMON-ADMIN                                                           │
//! │  GET/POST /admin/device/settings  effective view / stage               │
//! │  POST /admin/device/settings/{apply,clear,reconcile}                    │
//! │  POST /admin/device/command       enqueue                               │
//! │  POST /admin/device/command/delete                                      │
//! │  POST /admin/device/{provision,suspend}                                 │
//! │  POST /admin/firmware-job         batch enqueue with job_id             │
//! │  POST /admin/read-token           hub pushes a new read token          │
//! │  POST /admin/purge/{all,unit}                                           │
//! │                                                                         │
//! │  X-TMON-READ or X-TMON-HUB                                              │
//! │  GET  /admin/site/devices         count + device list                  │
//! │  GET  /admin/v2/site/devices/count                                      │
//! └─────────────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Device routes carry no credential; units are identified by `unit_id`
//! alone.

pub mod auth;
pub mod handlers;

use axum::middleware::from_fn_with_state;
use axum::routing::{get, post};
use axum::Router;

use tmon_core::SettingsSchema;
use tmon_db::Database;
use tmon_sync::protocol::paths;
use tmon_sync::{
    CommandQueue, DeviceRegistry, NodeRole, PollService, SettingsStager, SiteClient, SpokePairing,
    SyncResult, TmonConfig,
};

/// Shared application state.
#[derive(Clone)]
pub struct AppState {
    pub db: Database,
    pub role: NodeRole,
    pub registry: DeviceRegistry,
    pub queue: CommandQueue,
    pub stager: SettingsStager,
    pub poll: PollService,
    pub pairing: SpokePairing,
}

impl AppState {
    pub fn new(db: Database, config: &TmonConfig) -> SyncResult<Self> {
        let client = SiteClient::new(&config.http)?;
        let queue = CommandQueue::new(db.clone(), config.queue.poll_max_commands);

        Ok(AppState {
            role: config.role(),
            registry: DeviceRegistry::new(db.clone()),
            stager: SettingsStager::new(
                db.clone(),
                queue.clone(),
                SettingsSchema::default(),
                config.settings.unknown_keys,
            ),
            poll: PollService::new(db.clone(), queue.clone()),
            pairing: SpokePairing::new(db.clone(), client, config.site_url()),
            queue,
            db,
        })
    }
}

/// Builds the spoke router.
pub fn build_router(state: AppState) -> Router {
    let device = Router::new()
        .route(paths::DEVICE_CHECK_IN, post(handlers::device_check_in))
        .route(paths::DEVICE_COMMANDS, post(handlers::device_commands))
        .route(paths::DEVICE_COMMAND_COMPLETE, post(handlers::device_command_complete))
        .route(paths::DEVICE_STAGED_SETTINGS, get(handlers::device_staged_settings));

    let admin = Router::new()
        .route(
            paths::ADMIN_DEVICE_SETTINGS,
            get(handlers::get_settings).post(handlers::stage_settings),
        )
        .route(paths::ADMIN_SETTINGS_APPLY, post(handlers::apply_settings))
        .route(paths::ADMIN_SETTINGS_CLEAR, post(handlers::clear_settings))
        .route(paths::ADMIN_SETTINGS_RECONCILE, post(handlers::reconcile_settings))
        .route(paths::ADMIN_DEVICE_COMMAND, post(handlers::enqueue_command))
        .route(paths::ADMIN_COMMAND_DELETE, post(handlers::delete_command))
        .route(paths::ADMIN_PROVISION, post(handlers::provision))
        .route(paths::ADMIN_SUSPEND, post(handlers::suspend))
        .route(paths::ADMIN_FIRMWARE_JOB, post(handlers::firmware_job))
        .route(paths::ADMIN_READ_TOKEN, post(handlers::read_token))
        .route(paths::ADMIN_PURGE_ALL, post(handlers::purge_all))
        .route(paths::ADMIN_PURGE_UNIT, post(handlers::purge_unit))
        .route_layer(from_fn_with_state(state.clone(), auth::require_admin));

    let read = Router::new()
        .route(paths::SITE_DEVICES, get(handlers::site_devices))
        .route(paths::SITE_DEVICES_COUNT_V2, get(handlers::device_count))
        .route_layer(from_fn_with_state(state.clone(), auth::require_read));

    Router::new()
        .route(paths::HEALTH, get(handlers::health))
        .merge(device)
        .merge(admin)
        .merge(read)
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request, StatusCode};
    use chrono::Utc;
    use serde_json::{json, Value};
    use tmon_core::HubLink;
    use tmon_db::DbConfig;
    use tower::ServiceExt;

    const ADMIN_KEY: &str = "a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1a1";
    const HUB_KEY: &str = "b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2b2";
    const READ_TOKEN: &str = "c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3c3";

    async fn app(paired: bool) -> Router {
        let db = Database::new(DbConfig::in_memory()).await.unwrap();
        if paired {
            let now = Utc::now();
            db.hub_links()
                .save(&HubLink {
                    hub_url: "https://hub.example.com".into(),
                    admin_key: ADMIN_KEY.into(),
                    hub_key: Some(HUB_KEY.into()),
                    read_token: Some(READ_TOKEN.into()),
                    hub_api_version: Some(2),
                    paired_at: Some(now),
                    updated_at: now,
                })
                .await
                .unwrap();
        }
        let state = AppState::new(db, &TmonConfig::default()).unwrap();
        build_router(state)
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

    fn admin() -> [(&'static str, &'static str); 1] {
        [("x-tmon-admin", ADMIN_KEY)]
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(false).await;
        let (status, body) = send(&app, "GET", "/health", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
        assert_eq!(body["role"], "spoke");
        assert_eq!(body["database"], true);
    }

    #[tokio::test]
    async fn test_admin_routes_require_key() {
        let unpaired = app(false).await;
        let (status, body) = send(
            &unpaired,
            "POST",
            "/admin/device/settings",
            &admin(),
            Some(json!({"unit_id": "U1", "settings": {"UNIT_NAME": "x"}})),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert_eq!(body["code"], "FORBIDDEN");

        let app = app(true).await;
        let (status, _) = send(&app, "POST", "/admin/purge/all", &[], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        let (status, _) = send(&app, "POST", "/admin/purge/all", &[("x-tmon-admin", HUB_KEY)], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_stage_apply_poll_complete() {
        let app = app(true).await;

        let (status, body) = send(
            &app,
            "POST",
            "/admin/device/settings",
            &admin(),
            Some(json!({"unit_id": "U1", "settings": {"UNIT_NAME": "North", "CUSTOM": 1}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["unknown_keys"], json!(["CUSTOM"]));

        let (status, command) = send(
            &app,
            "POST",
            "/admin/device/settings/apply",
            &admin(),
            Some(json!({"unit_id": "U1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(command["command"], "apply_settings");

        let (status, bundle) = send(&app, "GET", "/device/staged-settings?unit_id=U1", &[], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(bundle["staged"]["UNIT_NAME"], "North");
        assert_eq!(bundle["commands"].as_array().unwrap().len(), 1);
        assert_eq!(bundle["commands"][0]["status"], "claimed");

        // Already claimed by the poll above
        let (_, claimed) = send(&app, "POST", "/device/commands", &[], Some(json!({"unit_id": "U1"}))).await;
        assert!(claimed["commands"].as_array().unwrap().is_empty());

        let job_id = command["id"].as_i64().unwrap();
        let (status, done) = send(
            &app,
            "POST",
            "/device/command-complete",
            &[],
            Some(json!({"job_id": job_id, "ok": true, "result": {"applied": 2}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(done["already_terminal"], false);
        assert_eq!(done["command"]["status"], "done");

        let (_, again) = send(
            &app,
            "POST",
            "/device/command-complete",
            &[],
            Some(json!({"job_id": job_id, "ok": false})),
        )
        .await;
        assert_eq!(again["already_terminal"], true);
        assert_eq!(again["command"]["status"], "done");
    }

    #[tokio::test]
    async fn test_error_statuses() {
        let app = app(true).await;

        let (status, body) = send(
            &app,
            "POST",
            "/admin/device/settings",
            &admin(),
            Some(json!({"unit_id": "U1", "settings": [1, 2]})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, _) = send(
            &app,
            "POST",
            "/device/command-complete",
            &[],
            Some(json!({"job_id": 999, "ok": true})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        let (status, _) = send(
            &app,
            "POST",
            "/admin/device/settings/apply",
            &admin(),
            Some(json!({"unit_id": "U9"})),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_malformed_device_requests_are_validation_errors() {
        let app = app(true).await;

        let (status, body) = send(&app, "POST", "/device/commands", &[], Some(json!({}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");
        assert!(body["message"].is_string());

        let (status, body) = send(
            &app,
            "POST",
            "/device/command-complete",
            &[],
            Some(json!({"ok": true})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, body) = send(&app, "POST", "/device/check-in", &[], None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, body) = send(&app, "GET", "/device/staged-settings?max=2", &[], None).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");

        let (status, body) = send(
            &app,
            "POST",
            "/admin/device/command",
            &admin(),
            Some(json!({"unit_id": "U1", "command": 7})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["code"], "VALIDATION");
    }

    #[tokio::test]
    async fn test_count_routes_accept_read_token_or_hub_key() {
        let app = app(true).await;
        for unit in ["U1", "U2"] {
            send(&app, "POST", "/device/check-in", &[], Some(json!({"unit_id": unit}))).await;
        }

        let (status, body) = send(
            &app,
            "GET",
            "/admin/v2/site/devices/count",
            &[("x-tmon-read", READ_TOKEN)],
            None,
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);

        let (status, body) = send(&app, "GET", "/admin/site/devices", &[("x-tmon-hub", HUB_KEY)], None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["count"], 2);
        assert_eq!(body["devices"].as_array().unwrap().len(), 2);

        let (status, _) = send(&app, "GET", "/admin/site/devices", &[("x-tmon-read", ADMIN_KEY)], None).await;
        assert_eq!(status, StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn test_read_token_push_replaces_token() {
        let app = app(true).await;
        let new_token = "d4".repeat(32);

        let (status, _) = send(
            &app,
            "POST",
            "/admin/read-token",
            &admin(),
            Some(json!({"read_token": new_token})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);

        let uri = "/admin/v2/site/devices/count";
        let (old, _) = send(&app, "GET", uri, &[("x-tmon-read", READ_TOKEN)], None).await;
        assert_eq!(old, StatusCode::FORBIDDEN);
        let (new, _) = send(&app, "GET", uri, &[("x-tmon-read", new_token.as_str())], None).await;
        assert_eq!(new, StatusCode::OK);
    }

    #[tokio::test]
    async fn test_suspended_unit_gets_no_commands() {
        let app = app(true).await;
        send(&app, "POST", "/device/check-in", &[], Some(json!({"unit_id": "U1"}))).await;
        send(
            &app,
            "POST",
            "/admin/device/command",
            &admin(),
            Some(json!({"unit_id": "U1", "command": "reboot"})),
        )
        .await;

        let (status, device) = send(
            &app,
            "POST",
            "/admin/device/suspend",
            &admin(),
            Some(json!({"unit_id": "U1"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(device["suspended"], true);

        let (_, bundle) = send(&app, "GET", "/device/staged-settings?unit_id=U1", &[], None).await;
        assert_eq!(bundle["suspended"], true);
        assert!(bundle["commands"].as_array().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_firmware_job_then_purge_unit() {
        let app = app(true).await;

        let (status, report) = send(
            &app,
            "POST",
            "/admin/firmware-job",
            &admin(),
            Some(json!({"unit_ids": ["U1", "U2", "bad id"], "params": {"url": "https://fw/1.bin"}})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(report["succeeded"], 2);
        assert_eq!(report["failed"], 1);
        let job_id = report["job_id"].as_str().unwrap().to_string();

        let (_, bundle) = send(&app, "GET", "/device/staged-settings?unit_id=U1", &[], None).await;
        assert_eq!(bundle["commands"][0]["command"], "file_update");
        assert_eq!(bundle["commands"][0]["params"]["job_id"], job_id.as_str());

        let (status, purged) = send(
            &app,
            "POST",
            "/admin/purge/unit",
            &admin(),
            Some(json!({"unit_id": "U2"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(purged["purged"]["commands"], 1);
    }
}
