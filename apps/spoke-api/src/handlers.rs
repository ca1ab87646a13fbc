//! Route handlers.
//!
//! Handlers only unpack the request and call the service; validation,
//! state transitions and audit writes live in tmon-sync.

use axum::extract::State;
use axum::Json;
use serde_json::{json, Value};

use tmon_core::{BatchReport, Command, Device, EffectiveSettings, PollBundle, API_VERSION};
use tmon_sync::protocol::{
    CheckInRequest, ClaimRequest, ClaimResponse, ClearedResponse, CompleteRequest, CompleteResponse,
    DeleteCommandRequest, DeleteCommandResponse, DeviceCountResponse, EnqueueRequest,
    FirmwareJobRequest, HealthResponse, PollQuery, ProvisionRequest, PurgeResponse, ReadTokenPush,
    SiteDevicesResponse, StageRequest, StageResponse, SuspendRequest, UnitQuery, UnitRequest,
};
use tmon_sync::{ApiJson, ApiQuery, ApiResult};

use crate::AppState;

/// Audit actor for admin-key callers.
const ADMIN_ACTOR: &str = "admin";

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        role: state.role.to_string(),
        api_version: API_VERSION,
        database: state.db.health_check().await,
    })
}

// =============================================================================
// Device Routes
// =============================================================================

pub async fn device_check_in(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CheckInRequest>,
) -> ApiResult<Device> {
    let device = state
        .registry
        .check_in(&req.unit_id, req.machine_id.as_deref(), req.settings.as_ref())
        .await?;
    Ok(Json(device))
}

pub async fn device_commands(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ClaimRequest>,
) -> ApiResult<ClaimResponse> {
    let commands = state.queue.poll_and_claim(&req.unit_id, req.max).await?;
    Ok(Json(ClaimResponse {
        unit_id: req.unit_id,
        commands,
    }))
}

pub async fn device_command_complete(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<CompleteRequest>,
) -> ApiResult<CompleteResponse> {
    let result = req.result_text();
    let outcome = state.queue.complete(req.job_id, req.ok, result.as_deref()).await?;
    let already_terminal = !outcome.was_applied();
    Ok(Json(CompleteResponse {
        command: outcome.into_command(),
        already_terminal,
    }))
}

pub async fn device_staged_settings(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<PollQuery>,
) -> ApiResult<PollBundle> {
    let bundle = state.poll.get_poll_bundle(&query.unit_id, query.max).await?;
    Ok(Json(bundle))
}

// =============================================================================
// Admin Routes (X-TMON-ADMIN)
// =============================================================================

pub async fn get_settings(
    State(state): State<AppState>,
    ApiQuery(query): ApiQuery<UnitQuery>,
) -> ApiResult<EffectiveSettings> {
    Ok(Json(state.stager.get_effective(&query.unit_id).await?))
}

pub async fn stage_settings(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<StageRequest>,
) -> ApiResult<StageResponse> {
    let outcome = state
        .stager
        .stage(&req.unit_id, req.machine_id.as_deref(), &req.settings)
        .await?;
    Ok(Json(StageResponse {
        unit_id: outcome.staged.unit_id,
        staged_at: outcome.staged.staged_at,
        unknown_keys: outcome.unknown_keys,
    }))
}

pub async fn apply_settings(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UnitRequest>,
) -> ApiResult<Command> {
    Ok(Json(state.stager.apply(&req.unit_id).await?))
}

pub async fn clear_settings(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UnitRequest>,
) -> ApiResult<ClearedResponse> {
    let cleared = state.stager.clear(&req.unit_id).await?;
    Ok(Json(ClearedResponse {
        unit_id: req.unit_id,
        cleared,
    }))
}

pub async fn reconcile_settings(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UnitRequest>,
) -> ApiResult<ClearedResponse> {
    let cleared = state.stager.reconcile(&req.unit_id).await?;
    Ok(Json(ClearedResponse {
        unit_id: req.unit_id,
        cleared,
    }))
}

pub async fn enqueue_command(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<EnqueueRequest>,
) -> ApiResult<Command> {
    Ok(Json(state.queue.enqueue(&req.unit_id, &req.command, req.params).await?))
}

pub async fn delete_command(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<DeleteCommandRequest>,
) -> ApiResult<DeleteCommandResponse> {
    let deleted = state.queue.delete(req.command_id).await?;
    Ok(Json(DeleteCommandResponse {
        command_id: req.command_id,
        deleted,
    }))
}

pub async fn provision(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ProvisionRequest>,
) -> ApiResult<Device> {
    Ok(Json(
        state.registry.provision(&req.unit_id, req.machine_id.as_deref()).await?,
    ))
}

pub async fn suspend(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SuspendRequest>,
) -> ApiResult<Device> {
    Ok(Json(state.registry.set_suspended(&req.unit_id, req.suspended).await?))
}

pub async fn firmware_job(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<FirmwareJobRequest>,
) -> ApiResult<BatchReport> {
    Ok(Json(state.queue.enqueue_batch(&req.unit_ids, req.params).await?))
}

pub async fn read_token(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<ReadTokenPush>,
) -> ApiResult<Value> {
    state.pairing.accept_read_token_push(req.read_token.as_deref()).await?;
    Ok(Json(json!({"ok": true})))
}

pub async fn purge_all(State(state): State<AppState>) -> ApiResult<PurgeResponse> {
    let purged = state.registry.purge_all(ADMIN_ACTOR).await?;
    Ok(Json(PurgeResponse { purged }))
}

pub async fn purge_unit(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<UnitRequest>,
) -> ApiResult<PurgeResponse> {
    let purged = state.registry.purge_unit(&req.unit_id, ADMIN_ACTOR).await?;
    Ok(Json(PurgeResponse { purged }))
}

// =============================================================================
// Count Routes (X-TMON-READ or X-TMON-HUB)
// =============================================================================

pub async fn site_devices(State(state): State<AppState>) -> ApiResult<SiteDevicesResponse> {
    let devices = state.registry.list().await?;
    Ok(Json(SiteDevicesResponse {
        count: devices.len() as u64,
        devices,
    }))
}

pub async fn device_count(State(state): State<AppState>) -> ApiResult<DeviceCountResponse> {
    Ok(Json(DeviceCountResponse {
        count: state.registry.count().await?,
    }))
}
