pub mod coordinator_client;
pub mod heartbeat_manager;
pub mod task_execution;
pub mod worker_lifecycle;

pub use coordinator_client::{CoordinatorClient, HttpCoordinatorClient};
pub use heartbeat_manager::{HeartbeatManager, ResourceSampler};
pub use task_execution::{LocalTask, TaskExecutionManager};
pub use worker_lifecycle::{WorkerNode, WorkerStatus};
