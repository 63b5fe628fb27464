pub mod components;
pub mod executors;

pub use components::{
    CoordinatorClient, HeartbeatManager, HttpCoordinatorClient, LocalTask, ResourceSampler,
    TaskExecutionManager, WorkerNode, WorkerStatus,
};
pub use executors::{ExecutionState, ProcessExecutor, TaskExecutor};
