//! 节点注册表与任务表
//!
//! 所有节点、任务和队列状态放在同一个 `RegistryState` 中，由 `Registry`
//! 的一把互斥锁保护；每个逻辑操作在持锁期间完成，RPC 调用不持锁。

use std::collections::BTreeMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::{Mutex, MutexGuard};
use tracing::{debug, info, warn};

use fleet_core::models::{
    AssignTaskRequest, HealthStatus, HeartbeatRequest, NodeAddress, NodeDetail, NodeInfo,
    NodeState, NodeSummary, RegisterNodeRequest, SubmitTaskRequest, TaskInfo, TaskStatus,
    UpdateTaskRequest,
};
use fleet_core::{FleetError, FleetResult};

use crate::placement::PlacementStrategy;
use crate::queue::TaskQueue;

/// 一次成功的节点选择，RPC 推送前的暂定分配
#[derive(Debug, Clone)]
pub struct Assignment {
    pub task_id: String,
    pub node_id: String,
    pub address: NodeAddress,
    pub request: AssignTaskRequest,
}

#[derive(Debug, Clone)]
pub enum Placement {
    Assigned(Assignment),
    /// 没有满足需求的节点，任务已出队
    NoCandidate { task_id: String },
}

/// 协调器运行状态快照
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CoordinatorStats {
    pub nodes_total: usize,
    pub nodes_healthy: usize,
    pub nodes_unhealthy: usize,
    pub queue_depth: usize,
    pub tasks_total: usize,
    pub tasks_by_status: BTreeMap<String, usize>,
}

#[derive(Debug, Default)]
pub struct RegistryState {
    nodes: BTreeMap<String, NodeState>,
    tasks: BTreeMap<String, TaskInfo>,
    queue: TaskQueue,
}

impl RegistryState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &BTreeMap<String, NodeState> {
        &self.nodes
    }

    pub fn tasks(&self) -> &BTreeMap<String, TaskInfo> {
        &self.tasks
    }

    pub fn queue_depth(&self) -> usize {
        self.queue.len()
    }

    pub fn is_queued(&self, task_id: &str) -> bool {
        self.queue.contains(task_id)
    }

    /// 注册节点；已存在的同ID节点被直接覆盖
    ///
    /// 旧记录持有的任务不会被回收，仍指向该节点ID。
    pub fn register_node(&mut self, request: RegisterNodeRequest) -> FleetResult<()> {
        request.validate()?;
        let info = NodeInfo::new(
            request.node_id.clone(),
            request.host,
            request.port,
            request.capabilities,
        );
        if let Some(previous) = self.nodes.insert(request.node_id.clone(), NodeState::new(info)) {
            warn!(
                node_id = %request.node_id,
                orphaned_tasks = previous.tasks.len(),
                "节点重复注册，覆盖原有记录"
            );
        } else {
            info!(node_id = %request.node_id, "节点注册成功");
        }
        Ok(())
    }

    /// 注销节点：先回收其未结束的任务再删除节点；未知节点返回 None
    pub fn deregister_node(&mut self, node_id: &str) -> Option<Vec<String>> {
        if !self.nodes.contains_key(node_id) {
            debug!(node_id, "注销未知节点，忽略");
            return None;
        }
        let reassigned = self.reassign_node_tasks(node_id);
        self.nodes.remove(node_id);
        info!(node_id, reassigned = reassigned.len(), "节点已注销");
        Some(reassigned)
    }

    pub fn heartbeat(&mut self, request: HeartbeatRequest) -> FleetResult<()> {
        request.validate()?;
        let node = self
            .nodes
            .get_mut(&request.node_id)
            .ok_or_else(|| FleetError::node_not_found(&request.node_id))?;
        node.info.load = request.load;
        node.info.available_memory = request.available_memory;
        node.info.status = request.status;
        node.info.last_heartbeat = Utc::now();
        debug!(
            node_id = %request.node_id,
            load = request.load,
            available_memory = request.available_memory,
            "收到心跳"
        );
        Ok(())
    }

    /// 提交任务并入队，返回任务ID
    pub fn submit_task(&mut self, request: SubmitTaskRequest) -> FleetResult<String> {
        request.validate()?;
        let task_id = request
            .task_id
            .unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
        if self.tasks.contains_key(&task_id) {
            return Err(FleetError::Validation(format!("任务ID已存在: {task_id}")));
        }

        let task = TaskInfo::new(
            task_id.clone(),
            request.script_id,
            request.priority,
            request.requirements,
        );
        self.queue.push(&task_id, task.priority);
        info!(task_id = %task_id, priority = task.priority, "任务已提交");
        self.tasks.insert(task_id.clone(), task);
        Ok(task_id)
    }

    /// Worker 上报任务状态
    pub fn update_task(&mut self, request: UpdateTaskRequest) -> FleetResult<()> {
        let task = self
            .tasks
            .get_mut(&request.task_id)
            .ok_or_else(|| FleetError::task_not_found(&request.task_id))?;

        if task.is_terminal() {
            return Err(FleetError::InvalidTransition {
                task_id: request.task_id,
                from: task.status.to_string(),
                to: request.status.to_string(),
            });
        }

        let now = Utc::now();
        task.status = request.status;
        match request.status {
            TaskStatus::Running => {
                if task.started_at.is_none() {
                    task.started_at = Some(now);
                }
            }
            TaskStatus::Completed | TaskStatus::Failed => task.completed_at = Some(now),
            TaskStatus::Pending | TaskStatus::Stopped => {}
        }
        if request.result.is_some() {
            task.result = request.result;
        }
        if request.error.is_some() {
            task.error = request.error;
        }

        info!(task_id = %task.task_id, status = %task.status, "任务状态更新");
        Ok(())
    }

    pub fn get_task(&self, task_id: &str) -> FleetResult<TaskInfo> {
        self.tasks
            .get(task_id)
            .cloned()
            .ok_or_else(|| FleetError::task_not_found(task_id))
    }

    pub fn get_node(&self, node_id: &str) -> FleetResult<NodeDetail> {
        self.nodes
            .get(node_id)
            .map(NodeState::detail)
            .ok_or_else(|| FleetError::node_not_found(node_id))
    }

    pub fn list_nodes(&self) -> Vec<NodeSummary> {
        self.nodes.values().map(NodeState::summary).collect()
    }

    pub fn list_tasks(&self) -> Vec<TaskInfo> {
        self.tasks.values().cloned().collect()
    }

    pub fn stats(&self) -> CoordinatorStats {
        let nodes_healthy = self.nodes.values().filter(|n| n.is_healthy()).count();
        let mut tasks_by_status = BTreeMap::new();
        for task in self.tasks.values() {
            *tasks_by_status
                .entry(task.status.as_str().to_string())
                .or_insert(0) += 1;
        }
        CoordinatorStats {
            nodes_total: self.nodes.len(),
            nodes_healthy,
            nodes_unhealthy: self.nodes.len() - nodes_healthy,
            queue_depth: self.queue.len(),
            tasks_total: self.tasks.len(),
            tasks_by_status,
        }
    }

    /// 心跳超时的健康节点
    pub fn expired_nodes(&self, now: DateTime<Utc>, timeout: Duration) -> Vec<String> {
        self.nodes
            .values()
            .filter(|node| node.is_healthy() && node.is_heartbeat_expired(now, timeout))
            .map(|node| node.info.id.clone())
            .collect()
    }

    /// 标记节点失效并回收其任务，返回被回收的任务ID
    pub fn mark_unhealthy(&mut self, node_id: &str) -> Vec<String> {
        match self.nodes.get_mut(node_id) {
            Some(node) => node.health_status = HealthStatus::Unhealthy,
            None => return Vec::new(),
        }
        self.reassign_node_tasks(node_id)
    }

    /// 把节点上所有未结束的任务重置为 pending 并按原优先级重新入队
    fn reassign_node_tasks(&mut self, node_id: &str) -> Vec<String> {
        let Some(node) = self.nodes.get_mut(node_id) else {
            return Vec::new();
        };

        let mut reassigned = Vec::new();
        let held: Vec<String> = node.tasks.iter().cloned().collect();
        for task_id in held {
            let Some(task) = self.tasks.get_mut(&task_id) else {
                node.tasks.remove(&task_id);
                continue;
            };
            if task.is_terminal() {
                continue;
            }
            node.tasks.remove(&task_id);
            if task.node_id.as_deref() != Some(node_id) {
                continue;
            }
            task.reset_for_reassignment();
            self.queue.push(&task_id, task.priority);
            info!(task_id = %task_id, node_id, "任务已重新入队");
            reassigned.push(task_id);
        }
        reassigned
    }

    /// 出队一个任务并尝试选择节点；成功时写入暂定分配
    pub fn place_next(&mut self, strategy: &dyn PlacementStrategy) -> Option<Placement> {
        loop {
            let entry = self.queue.pop()?;
            let Some(task) = self.tasks.get_mut(&entry.task_id) else {
                continue;
            };
            if task.is_terminal() || task.node_id.is_some() {
                debug!(task_id = %entry.task_id, "跳过无需调度的任务");
                continue;
            }

            let Some(node_id) = strategy.select_node(&task.requirements, &self.nodes) else {
                return Some(Placement::NoCandidate {
                    task_id: entry.task_id,
                });
            };
            let Some(node) = self.nodes.get_mut(&node_id) else {
                return Some(Placement::NoCandidate {
                    task_id: entry.task_id,
                });
            };

            task.node_id = Some(node_id.clone());
            node.tasks.insert(entry.task_id.clone());
            return Some(Placement::Assigned(Assignment {
                task_id: entry.task_id.clone(),
                node_id,
                address: node.info.address.clone(),
                request: AssignTaskRequest {
                    task_id: entry.task_id,
                    script_id: task.script_id.clone(),
                    requirements: task.requirements.clone(),
                },
            }));
        }
    }

    /// 撤销暂定分配；任务已被其他路径回收或已结束时返回 false
    pub fn rollback_assignment(&mut self, task_id: &str, node_id: &str) -> bool {
        let Some(task) = self.tasks.get_mut(task_id) else {
            return false;
        };
        if task.is_terminal() || task.node_id.as_deref() != Some(node_id) {
            return false;
        }
        task.reset_for_reassignment();
        if let Some(node) = self.nodes.get_mut(node_id) {
            node.tasks.remove(task_id);
        }
        true
    }

    /// 未分配且未结束的任务重新入队
    pub fn requeue(&mut self, task_id: &str) -> bool {
        match self.tasks.get(task_id) {
            Some(task) if !task.is_terminal() && task.node_id.is_none() => {
                self.queue.push(task_id, task.priority)
            }
            _ => false,
        }
    }

    /// 找回既未分配又不在队列中的待调度任务，返回重新入队的任务ID
    ///
    /// 调度轮次中途异常退出时，已出队但尚未分配的任务只能由此恢复。
    pub fn requeue_stranded(&mut self) -> Vec<String> {
        let mut recovered = Vec::new();
        for (task_id, task) in &self.tasks {
            if task.is_terminal() || task.node_id.is_some() {
                continue;
            }
            if self.queue.push(task_id, task.priority) {
                recovered.push(task_id.clone());
            }
        }
        recovered
    }
}

/// 共享注册表
#[derive(Debug, Default)]
pub struct Registry {
    state: Mutex<RegistryState>,
}

impl Registry {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self) -> MutexGuard<'_, RegistryState> {
        self.state.lock().await
    }
}
