use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::Json,
};
use serde::{Deserialize, Serialize};

use crate::{
    constants::is_valid_user_id,
    error::CoreError,
    models::{Coordinates, DiscoveryFilters, Notification, UserId},
    services::{BuzzOutcome, DiscoveryResult, LikeOutcome, MeetSnapshot},
    state::AppState,
};

const RECENT_NOTIFICATIONS_LIMIT: usize = 50;

#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub code: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub retry_after_ms: Option<u64>,
}

pub type ApiResult<T> = Result<Json<T>, (StatusCode, Json<ErrorResponse>)>;

pub fn error_response(err: CoreError) -> (StatusCode, Json<ErrorResponse>) {
    let status = match &err {
        CoreError::Validation(_) => StatusCode::BAD_REQUEST,
        CoreError::Conflict(_) => StatusCode::CONFLICT,
        CoreError::Cooldown { .. } => StatusCode::TOO_MANY_REQUESTS,
        CoreError::NotFound(_) => StatusCode::NOT_FOUND,
        CoreError::UpstreamUnavailable(_) => StatusCode::BAD_GATEWAY,
        CoreError::Storage(e) => {
            tracing::error!("Storage failure: {}", e);
            StatusCode::INTERNAL_SERVER_ERROR
        }
    };
    let retry_after_ms = match &err {
        CoreError::Cooldown { retry_after } => Some(retry_after.as_millis() as u64),
        _ => None,
    };
    let error = match &err {
        // Database details stay in the logs
        CoreError::Storage(_) => "Internal error".to_string(),
        other => other.to_string(),
    };

    (
        status,
        Json(ErrorResponse {
            error,
            code: err.code().to_string(),
            retry_after_ms,
        }),
    )
}

fn require_user_id(id: &str) -> Result<(), (StatusCode, Json<ErrorResponse>)> {
    if is_valid_user_id(id) {
        Ok(())
    } else {
        Err(error_response(CoreError::validation(format!("invalid user id '{}'", id))))
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DiscoverRequest {
    pub user_id: UserId,
    #[serde(default)]
    pub filters: DiscoveryFilters,
    pub coords: Option<Coordinates>,
}

/// Acting user plus the other side of the pair
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PairRequest {
    pub user_id: UserId,
    pub target_id: UserId,
}

#[derive(Debug, Serialize)]
pub struct RemovedResponse {
    pub removed: bool,
}

#[derive(Debug, Serialize)]
pub struct BlockedResponse {
    pub blocked: bool,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceResponse {
    pub user_id: UserId,
    pub online: bool,
}

pub async fn discover(
    State(state): State<AppState>,
    Json(req): Json<DiscoverRequest>,
) -> ApiResult<DiscoveryResult> {
    require_user_id(&req.user_id)?;
    state
        .discovery
        .discover(&req.user_id, &req.filters, req.coords)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn like(State(state): State<AppState>, Json(req): Json<PairRequest>) -> ApiResult<LikeOutcome> {
    state
        .relationships
        .like(&req.user_id, &req.target_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn unmatch(
    State(state): State<AppState>,
    Json(req): Json<PairRequest>,
) -> ApiResult<RemovedResponse> {
    let removed = state
        .relationships
        .unmatch(&req.user_id, &req.target_id)
        .await
        .map_err(error_response)?;
    Ok(Json(RemovedResponse { removed }))
}

pub async fn block(
    State(state): State<AppState>,
    Json(req): Json<PairRequest>,
) -> ApiResult<BlockedResponse> {
    let blocked = state
        .relationships
        .block(&req.user_id, &req.target_id)
        .await
        .map_err(error_response)?;
    Ok(Json(BlockedResponse { blocked }))
}

pub async fn buzz(State(state): State<AppState>, Json(req): Json<PairRequest>) -> ApiResult<BuzzOutcome> {
    state
        .relationships
        .buzz_matched(&req.user_id, &req.target_id)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn presence(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<PresenceResponse> {
    require_user_id(&user_id)?;
    let online = state.presence.is_online(&user_id);
    Ok(Json(PresenceResponse { user_id, online }))
}

pub async fn meet_session(
    State(state): State<AppState>,
    Path((user_id, peer_id)): Path<(UserId, UserId)>,
) -> ApiResult<MeetSnapshot> {
    state
        .meet
        .session(&user_id, &peer_id)
        .map(Json)
        .map_err(error_response)
}

pub async fn notifications(
    State(state): State<AppState>,
    Path(user_id): Path<UserId>,
) -> ApiResult<Vec<Notification>> {
    require_user_id(&user_id)?;
    state
        .notifier
        .recent(&user_id, RECENT_NOTIFICATIONS_LIMIT)
        .await
        .map(Json)
        .map_err(error_response)
}

pub async fn health_check() -> &'static str {
    "OK"
}
