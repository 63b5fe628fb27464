use axum::{
    routing::{get, post},
    Router,
};
use std::sync::Arc;

use fleet_coordinator::Coordinator;
use fleet_worker::WorkerNode;

use crate::handlers::{
    health::{coordinator_health, worker_health},
    nodes::{deregister_node, get_node, heartbeat, list_nodes, register_node},
    tasks::{get_task, list_tasks, submit_task, update_task},
    worker::{assign_task, stop_task},
};

/// 协调器 API 状态
#[derive(Clone)]
pub struct CoordinatorState {
    pub coordinator: Arc<Coordinator>,
}

/// Worker API 状态
#[derive(Clone)]
pub struct WorkerState {
    pub worker: Arc<WorkerNode>,
}

/// 协调器 RPC 路由
pub fn coordinator_routes(state: CoordinatorState) -> Router {
    Router::new()
        .route("/health", get(coordinator_health))
        // 节点
        .route("/nodes", get(list_nodes))
        .route("/nodes/{id}", get(get_node))
        .route("/nodes/register", post(register_node))
        .route("/nodes/deregister", post(deregister_node))
        .route("/nodes/heartbeat", post(heartbeat))
        // 任务
        .route("/tasks", get(list_tasks))
        .route("/tasks/{id}", get(get_task))
        .route("/tasks/submit", post(submit_task))
        .route("/tasks/update", post(update_task))
        .with_state(state)
}

/// Worker RPC 路由
pub fn worker_routes(state: WorkerState) -> Router {
    Router::new()
        .route("/health", get(worker_health))
        .route("/tasks/assign", post(assign_task))
        .route("/tasks/stop", post(stop_task))
        .with_state(state)
}
