use axum::{extract::State, response::IntoResponse};

use crate::response::success;
use crate::routes::{CoordinatorState, WorkerState};

/// 协调器健康检查，附带节点和任务统计
pub async fn coordinator_health(State(state): State<CoordinatorState>) -> impl IntoResponse {
    success(state.coordinator.stats().await)
}

pub async fn worker_health(State(state): State<WorkerState>) -> impl IntoResponse {
    success(state.worker.status().await)
}
