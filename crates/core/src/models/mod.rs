//! # 数据模型
//!
//! 协调器、Worker与弹性层共享的核心数据结构。
//!
//! ## 核心模型
//!
//! ### NodeInfo / NodeState - 节点信息
//! `NodeInfo` 描述节点的地址、能力和实时负载；`NodeState` 是协调器持有的
//! 注册表条目，额外记录已分配任务集合和健康状态。
//!
//! ### TaskInfo - 任务记录
//! 一次脚本执行，带优先级、资源需求和生命周期状态。任务记录永不删除，
//! 作为历史保留。
//!
//! ## 状态流转
//!
//! ### 任务状态
//! ```text
//! Pending ──(Worker开始执行)──> Running ──> Completed | Failed | Stopped
//!    ↑  │
//!    └──┘ 节点失效/注销时重新入队
//! ```
//!
//! ### 节点健康状态
//! ```text
//! Healthy ──(心跳超时)──> Unhealthy
//! ```
//! 只有重新注册才会回到 Healthy。

pub mod node;
pub mod protocol;
pub mod task;

pub use node::{
    HealthStatus, NodeAddress, NodeCapabilities, NodeDetail, NodeInfo, NodeState, NodeSummary,
};
pub use protocol::{
    AssignTaskRequest, DeregisterNodeRequest, HeartbeatRequest, RegisterNodeRequest,
    StopTaskRequest, SubmitTaskRequest, SubmitTaskResponse, UpdateTaskRequest,
};
pub use task::{TaskInfo, TaskRequirements, TaskStatus};
