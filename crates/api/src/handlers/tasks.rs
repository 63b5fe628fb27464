use axum::{
    extract::{rejection::JsonRejection, Path, State},
    response::IntoResponse,
    Json,
};

use fleet_core::models::{SubmitTaskRequest, SubmitTaskResponse, UpdateTaskRequest};

use crate::error::ApiResult;
use crate::response::{ok, success};
use crate::routes::CoordinatorState;

/// 提交任务，返回（可能新生成的）任务 ID
pub async fn submit_task(
    State(state): State<CoordinatorState>,
    payload: Result<Json<SubmitTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    let task_id = state.coordinator.submit_task(request).await?;
    Ok(success(SubmitTaskResponse { task_id }))
}

pub async fn update_task(
    State(state): State<CoordinatorState>,
    payload: Result<Json<UpdateTaskRequest>, JsonRejection>,
) -> ApiResult<impl IntoResponse> {
    let Json(request) = payload?;
    state.coordinator.update_task(request).await?;
    Ok(ok())
}

pub async fn list_tasks(State(state): State<CoordinatorState>) -> impl IntoResponse {
    success(state.coordinator.list_tasks().await)
}

pub async fn get_task(
    State(state): State<CoordinatorState>,
    Path(task_id): Path<String>,
) -> ApiResult<impl IntoResponse> {
    let task = state.coordinator.get_task(&task_id).await?;
    Ok(success(task))
}
