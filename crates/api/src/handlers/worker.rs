use axum::{
    extract::{rejection::JsonRejection, State},
    response::IntoResponse,
    Json,
};

use fleet_core::models::{AssignTaskRequest, StopTaskRequest};

use crate::error::ApiResult;
use crate::response::ok;
use crate::routes::WorkerState;

pub async fn assign_task(
    State(state): State<WorkerState>,
    payload: Result<Json<AssignTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    state.worker.assign_task(request).await?;
    Ok(ok())
}

/// 本地未持有的任务返回 404
pub async fn stop_task(
    State(state): State<WorkerState>,
    payload: Result<Json<StopTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    state.worker.stop_task(&request.task_id).await?;
    Ok(ok())
}
