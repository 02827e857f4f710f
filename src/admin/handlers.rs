use axum::{
    extract::{Path, State},
    Json,
};
use serde::{Deserialize, Serialize};

use crate::http::error::ApiResult;
use crate::http::server::AppState;
use crate::liveness::NodeStatus;
use crate::model::{Node, NodeId, TenantId};
use crate::stats::{UsageTotal, WindowRecord};
use crate::sync::SyncResponse;

#[derive(Debug, Serialize, Deserialize)]
pub struct SystemStatus {
    pub version: String,
    pub status: String,
    pub uptime_secs: u64,
    pub nodes: usize,
    pub online: usize,
    pub offline: usize,
    pub maintenance: usize,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct MaintenanceRequest {
    pub enabled: bool,
}

#[derive(Debug, Serialize)]
pub struct UsageReport {
    pub node_id: NodeId,
    pub windows: Vec<WindowRecord>,
    pub totals: Vec<UsageTotal>,
}

pub async fn get_status(State(state): State<AppState>) -> ApiResult<Json<SystemStatus>> {
    let nodes = state.sync.nodes().await?;
    let count = |status: NodeStatus| nodes.iter().filter(|n| n.status == status).count();
    Ok(Json(SystemStatus {
        version: env!("CARGO_PKG_VERSION").to_string(),
        status: "operational".to_string(),
        uptime_secs: state.started_at.elapsed().as_secs(),
        nodes: nodes.len(),
        online: count(NodeStatus::Online),
        offline: count(NodeStatus::Offline),
        maintenance: count(NodeStatus::Maintenance),
    }))
}

pub async fn list_nodes(State(state): State<AppState>) -> ApiResult<Json<Vec<Node>>> {
    let mut nodes = state.sync.nodes().await?;
    nodes.sort_by(|a, b| (&a.tenant_id, &a.node_key).cmp(&(&b.tenant_id, &b.node_key)));
    Ok(Json(nodes))
}

pub async fn force_sync(
    State(state): State<AppState>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<Json<SyncResponse>> {
    Ok(Json(state.sync.force_sync(node_id).await?))
}

pub async fn set_maintenance(
    State(state): State<AppState>,
    Path(node_id): Path<NodeId>,
    Json(request): Json<MaintenanceRequest>,
) -> ApiResult<Json<Node>> {
    Ok(Json(state.sync.set_maintenance(node_id, request.enabled).await?))
}

pub async fn get_usage(
    State(state): State<AppState>,
    Path(node_id): Path<NodeId>,
) -> ApiResult<Json<UsageReport>> {
    let (windows, totals) = state.sync.usage(node_id).await?;
    Ok(Json(UsageReport {
        node_id,
        windows,
        totals,
    }))
}

/// Nodes of a tenant that may take new client traffic.
pub async fn dispatchable_nodes(
    State(state): State<AppState>,
    Path(tenant): Path<String>,
) -> ApiResult<Json<Vec<Node>>> {
    Ok(Json(state.sync.dispatchable_nodes(&TenantId::new(tenant)).await?))
}
