use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};
use serde_json::json;
use tracing::info;

use fleet_core::models::{DeregisterNodeRequest, HeartbeatRequest, RegisterNodeRequest};

use crate::error::ApiResult;
use crate::response::{ok, success};
use crate::routes::CoordinatorState;

pub async fn register_node(
    State(state): State<CoordinatorState>,
    payload: Result<Json<RegisterNodeRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    state.coordinator.register_node(request).await?;
    Ok(ok())
}

/// 未知节点同样返回成功
pub async fn deregister_node(
    State(state): State<CoordinatorState>,
    payload: Result<Json<DeregisterNodeRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let reassigned = state.coordinator.deregister_node(&request.node_id).await;
    if !reassigned.is_empty() {
        info!(node_id = %request.node_id, "节点注销，回收 {} 个任务", reassigned.len());
    }
    Ok(success(json!({ "reassigned": reassigned })))
}

pub async fn heartbeat(
    State(state): State<CoordinatorState>,
    payload: Result<Json<HeartbeatRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    state.coordinator.heartbeat(request).await?;
    Ok(ok())
}

pub async fn list_nodes(State(state): State<CoordinatorState>) -> impl IntoResponse {
    success(state.coordinator.list_nodes().await)
}

pub async fn get_node(
    State(state): State<CoordinatorState>,
    Path(node_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let detail = state.coordinator.get_node(&node_id).await?;
    Ok(success(detail))
}
