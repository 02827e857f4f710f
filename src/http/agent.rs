//! Agent-facing endpoints.

use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::Json;
use serde_json::{Map, Value};

use crate::compiler::CompiledDocument;
use crate::http::error::ApiResult;
use crate::http::request::BearerToken;
use crate::http::server::AppState;
use crate::model::NodeId;
use crate::sync::{
    ConfigResponse, HeartbeatRequest, HeartbeatResponse, RegisterRequest, RegisterResponse,
    StatsRequest, StatsResponse,
};

/// `POST /api/v1/agent/register`, authorized by an enrollment key.
pub async fn register(
    State(state): State<AppState>,
    BearerToken(enrollment_key): BearerToken,
    Json(request): Json<RegisterRequest>,
) -> ApiResult<(StatusCode, Json<RegisterResponse>)> {
    let response = state.sync.register(&enrollment_key, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `POST /api/v1/agent/heartbeat`
pub async fn heartbeat(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(request): Json<HeartbeatRequest>,
) -> ApiResult<(StatusCode, Json<HeartbeatResponse>)> {
    let response = state.sync.heartbeat(&token, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `GET /api/v1/agent/config/{node_id}`
pub async fn fetch_config(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Path(node_id): Path<NodeId>,
) -> ApiResult<Json<ConfigResponse>> {
    let document = state.sync.fetch_config(&token, node_id).await?;
    Ok(Json(config_response(&document)))
}

/// `POST /api/v1/agent/stats`
pub async fn report_stats(
    State(state): State<AppState>,
    BearerToken(token): BearerToken,
    Json(request): Json<StatsRequest>,
) -> ApiResult<(StatusCode, Json<StatsResponse>)> {
    let response = state.sync.report_stats(&token, request).await?;
    Ok((StatusCode::CREATED, Json(response)))
}

/// `version` is reserved for the content version; a section by that name is dropped.
fn config_response(document: &CompiledDocument) -> ConfigResponse {
    let mut config = match &document.body {
        Value::Object(sections) => sections.clone(),
        _ => Map::new(),
    };
    if config.remove("version").is_some() {
        tracing::warn!(
            node_id = %document.node_id,
            "Dropped top-level version key shadowing the config version"
        );
    }
    ConfigResponse {
        version: document.version.clone(),
        config,
    }
}
