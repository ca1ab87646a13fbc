//! Route handlers.

use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::Json;

use tmon_core::API_VERSION;
use tmon_sync::api::header_value;
use tmon_sync::credentials::HUB_HEADER;
use tmon_sync::protocol::{
    HealthResponse, HubCheckInRequest, HubCheckInResponse, PairRequest, PairResponse, RefreshReport,
    RelayCommandRequest, RelayFirmwareRequest, RelayResponse, RelaySettingsRequest, RelayUnitRequest,
    SiteRequest, SiteView, TokenPushReport, UnpairResponse,
};
use tmon_sync::{ApiError, ApiJson, ApiResult};

use crate::AppState;

/// A relayed call answers with the spoke's own status.
type RelayResult = Result<(StatusCode, Json<RelayResponse>), ApiError>;

fn relayed(response: RelayResponse) -> (StatusCode, Json<RelayResponse>) {
    let status = StatusCode::from_u16(response.status).unwrap_or(StatusCode::BAD_GATEWAY);
    (status, Json(response))
}

pub async fn health(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok".to_string(),
        role: state.role.to_string(),
        api_version: API_VERSION,
        database: state.db.health_check().await,
    })
}

// =============================================================================
// Spoke-Facing Routes
// =============================================================================

pub async fn pair(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<PairRequest>,
) -> ApiResult<PairResponse> {
    Ok(Json(state.pairing.accept_pair_request(&req).await?))
}

pub async fn check_in(
    State(state): State<AppState>,
    headers: HeaderMap,
    ApiJson(req): ApiJson<HubCheckInRequest>,
) -> ApiResult<HubCheckInResponse> {
    let response = state
        .pairing
        .record_check_in(&req, header_value(&headers, HUB_HEADER))
        .await?;
    Ok(Json(response))
}

// =============================================================================
// Operator Routes (X-TMON-ADMIN = hub.operator_key)
// =============================================================================

pub async fn list_sites(State(state): State<AppState>) -> ApiResult<Vec<SiteView>> {
    Ok(Json(state.pairing.list_sites().await?))
}

pub async fn rotate(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SiteRequest>,
) -> ApiResult<TokenPushReport> {
    Ok(Json(state.pairing.rotate(&req.site_url).await?))
}

pub async fn revoke(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SiteRequest>,
) -> ApiResult<TokenPushReport> {
    Ok(Json(state.pairing.revoke(&req.site_url).await?))
}

pub async fn unpair(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<SiteRequest>,
) -> ApiResult<UnpairResponse> {
    let removed = state.pairing.unpair(&req.site_url).await?;
    Ok(Json(UnpairResponse {
        site_url: req.site_url,
        removed,
    }))
}

/// Answers 409 while the periodic refresh (or another manual one) runs.
pub async fn refresh(State(state): State<AppState>) -> ApiResult<RefreshReport> {
    Ok(Json(state.aggregator.refresh_now().await?))
}

pub async fn relay_settings(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RelaySettingsRequest>,
) -> RelayResult {
    Ok(relayed(state.relay.stage_settings(&req).await?))
}

pub async fn relay_apply(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RelayUnitRequest>,
) -> RelayResult {
    Ok(relayed(state.relay.apply_settings(&req).await?))
}

pub async fn relay_clear(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RelayUnitRequest>,
) -> RelayResult {
    Ok(relayed(state.relay.clear_settings(&req).await?))
}

pub async fn relay_command(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RelayCommandRequest>,
) -> RelayResult {
    Ok(relayed(state.relay.command(&req).await?))
}

pub async fn relay_firmware_job(
    State(state): State<AppState>,
    ApiJson(req): ApiJson<RelayFirmwareRequest>,
) -> RelayResult {
    Ok(relayed(state.relay.firmware_job(&req).await?))
}
