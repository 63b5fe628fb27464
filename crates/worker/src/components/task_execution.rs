use std::collections::BTreeMap;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use fleet_core::models::{AssignTaskRequest, TaskRequirements, TaskStatus, UpdateTaskRequest};
use fleet_core::{FleetError, FleetResult};

use crate::executors::{ExecutionState, TaskExecutor};

/// Worker 本地跟踪的任务
#[derive(Debug, Clone, Serialize)]
pub struct LocalTask {
    pub task_id: String,
    pub script_id: String,
    pub requirements: TaskRequirements,
    pub status: TaskStatus,
    pub assigned_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
}

impl LocalTask {
    fn from_assignment(request: AssignTaskRequest) -> Self {
        Self {
            task_id: request.task_id,
            script_id: request.script_id,
            requirements: request.requirements,
            status: TaskStatus::Pending,
            assigned_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
        }
    }

    fn status_update(&self) -> UpdateTaskRequest {
        UpdateTaskRequest {
            task_id: self.task_id.clone(),
            status: self.status,
            result: self.result.clone(),
            error: self.error.clone(),
        }
    }

    fn finish(&mut self, status: TaskStatus, result: Option<serde_json::Value>, error: Option<String>) {
        self.status = status;
        self.result = result;
        self.error = error;
        self.completed_at = Some(Utc::now());
        metrics::counter!("fleet_worker_tasks_completed_total", "status" => status.as_str())
            .increment(1);
    }
}

/// 本地任务表与执行器之间的桥梁
///
/// 结束的任务一直保留到协调器确认状态上报为止。
pub struct TaskExecutionManager {
    node_id: String,
    executor: Arc<dyn TaskExecutor>,
    tasks: Mutex<BTreeMap<String, LocalTask>>,
}

impl TaskExecutionManager {
    pub fn new(node_id: String, executor: Arc<dyn TaskExecutor>) -> Self {
        Self {
            node_id,
            executor,
            tasks: Mutex::new(BTreeMap::new()),
        }
    }

    pub fn executor_name(&self) -> &str {
        self.executor.name()
    }

    /// 接收协调器推送的任务，总是以 pending 开始本地跟踪
    pub async fn accept(&self, request: AssignTaskRequest) -> FleetResult<()> {
        if request.task_id.trim().is_empty() || request.script_id.trim().is_empty() {
            return Err(FleetError::Validation(
                "task_id and script_id are required".to_string(),
            ));
        }

        let mut tasks = self.tasks.lock().await;
        if let Some(existing) = tasks.get(&request.task_id) {
            debug!(
                task_id = %request.task_id,
                status = %existing.status,
                "Task already tracked, ignoring duplicate assignment"
            );
            return Ok(());
        }
        info!(node_id = %self.node_id, task_id = %request.task_id, "Task accepted");
        tasks.insert(request.task_id.clone(), LocalTask::from_assignment(request));
        Ok(())
    }

    /// 推进所有本地任务一步，返回需要上报的状态
    ///
    /// pending 任务交给执行器并转为 running；running 任务查询执行器是否完成；
    /// 尚未确认的终止状态每次都会再次返回。
    pub async fn advance(&self) -> Vec<UpdateTaskRequest> {
        let mut tasks = self.tasks.lock().await;
        let mut updates = Vec::new();

        for task in tasks.values_mut() {
            match task.status {
                TaskStatus::Pending => {
                    match self
                        .executor
                        .execute(&task.task_id, &task.script_id, &task.requirements)
                        .await
                    {
                        Ok(()) => {
                            task.status = TaskStatus::Running;
                            task.started_at = Some(Utc::now());
                            info!(task_id = %task.task_id, script_id = %task.script_id, "Task started");
                        }
                        Err(e) => {
                            error!(task_id = %task.task_id, "Failed to start task: {}", e);
                            task.finish(TaskStatus::Failed, None, Some(e.to_string()));
                        }
                    }
                    updates.push(task.status_update());
                }
                TaskStatus::Running => match self.executor.poll(&task.task_id).await {
                    Ok(ExecutionState::Running) => {}
                    Ok(ExecutionState::Completed(result)) => {
                        info!(task_id = %task.task_id, "Task completed");
                        task.finish(TaskStatus::Completed, Some(result), None);
                        updates.push(task.status_update());
                    }
                    Ok(ExecutionState::Failed(message)) => {
                        warn!(task_id = %task.task_id, "Task failed: {}", message);
                        task.finish(TaskStatus::Failed, None, Some(message));
                        updates.push(task.status_update());
                    }
                    Err(e) => {
                        error!(task_id = %task.task_id, "Failed to poll task: {}", e);
                        task.finish(TaskStatus::Failed, None, Some(e.to_string()));
                        updates.push(task.status_update());
                    }
                },
                TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped => {
                    updates.push(task.status_update());
                }
            }
        }
        updates
    }

    /// 协调器已确认终止状态，停止本地跟踪
    pub async fn acknowledge(&self, task_id: &str) -> bool {
        let mut tasks = self.tasks.lock().await;
        match tasks.get(task_id) {
            Some(task) if task.status.is_terminal() => {
                tasks.remove(task_id);
                debug!(task_id, "Task report acknowledged");
                true
            }
            _ => false,
        }
    }

    /// 取消任务并转为 stopped，返回需要上报的状态
    ///
    /// 任务与其他终止任务一样保留到协调器确认为止；已结束但未确认的任务
    /// 保持原状态，返回其待上报的状态。
    pub async fn stop(&self, task_id: &str) -> FleetResult<UpdateTaskRequest> {
        let mut tasks = self.tasks.lock().await;
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| FleetError::task_not_found(task_id))?;
        if task.status.is_terminal() {
            // already finished, the pending report stands
            return Ok(task.status_update());
        }

        if task.status == TaskStatus::Running {
            if let Err(e) = self.executor.cancel(task_id).await {
                warn!(task_id, "Executor cancel failed: {}", e);
            }
        }
        task.finish(TaskStatus::Stopped, None, None);
        info!(node_id = %self.node_id, task_id, "Task stopped");
        Ok(task.status_update())
    }

    pub async fn get(&self, task_id: &str) -> Option<LocalTask> {
        self.tasks.lock().await.get(task_id).cloned()
    }

    pub async fn list(&self) -> Vec<LocalTask> {
        self.tasks.lock().await.values().cloned().collect()
    }

    /// 尚未结束的任务数
    pub async fn active_count(&self) -> usize {
        self.tasks
            .lock()
            .await
            .values()
            .filter(|task| !task.status.is_terminal())
            .count()
    }

    /// 取消所有执行中的任务
    pub async fn cancel_all(&self) {
        let tasks = self.tasks.lock().await;
        for task in tasks.values().filter(|t| t.status == TaskStatus::Running) {
            if let Err(e) = self.executor.cancel(&task.task_id).await {
                warn!(task_id = %task.task_id, "Executor cancel failed: {}", e);
            }
        }
    }
}
