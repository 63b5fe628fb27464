//! # Fleet API
//!
//! 协调器和 Worker 两种角色的 HTTP RPC 接口。
//!
//! ## 协调器端点
//! - `POST /nodes/register`、`/nodes/deregister`、`/nodes/heartbeat`
//! - `GET /nodes`、`/nodes/{id}`
//! - `POST /tasks/submit`、`/tasks/update`
//! - `GET /tasks`、`/tasks/{id}`
//! - `GET /health`
//!
//! ## Worker 端点
//! - `POST /tasks/assign`、`/tasks/stop`
//! - `GET /health`
//!
//! 成功响应为 `{"status": "success", "data": ..., "timestamp": ...}`，错误响应为
//! `{"status": "error", "code": ..., "message": ..., "timestamp": ...}`。

pub mod error;
pub mod handlers;
pub mod middleware;
pub mod response;
pub mod routes;

use axum::Router;
use std::sync::Arc;
use tower::ServiceBuilder;

use fleet_coordinator::Coordinator;
use fleet_worker::WorkerNode;

use middleware::{request_logging, trace_layer};
use routes::{coordinator_routes, worker_routes, CoordinatorState, WorkerState};

pub use error::{ApiError, ApiResult};
pub use response::ApiResponse;

/// 创建协调器 HTTP 应用
pub fn create_coordinator_app(coordinator: Arc<Coordinator>) -> Router {
    coordinator_routes(CoordinatorState { coordinator }).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}

/// 创建 Worker HTTP 应用
pub fn create_worker_app(worker: Arc<WorkerNode>) -> Router {
    worker_routes(WorkerState { worker }).layer(
        ServiceBuilder::new()
            .layer(trace_layer())
            .layer(axum::middleware::from_fn(request_logging)),
    )
}
