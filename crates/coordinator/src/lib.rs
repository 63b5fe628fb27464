//! 协调器：节点注册表、优先级任务队列、调度循环与节点健康检查

pub mod client;
pub mod coordinator;
pub mod health_monitor;
pub mod placement;
pub mod queue;
pub mod registry;
pub mod scheduler;

pub use client::{HttpWorkerClient, WorkerClient};
pub use coordinator::Coordinator;
pub use health_monitor::HealthMonitor;
pub use placement::{LeastLoadedStrategy, PlacementStrategy};
pub use queue::{QueueEntry, TaskQueue};
pub use registry::{Assignment, CoordinatorStats, Placement, Registry, RegistryState};
pub use scheduler::{ScheduleReport, TaskScheduler};
