use std::collections::BTreeSet;
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::FleetError;

/// 任务状态
///
/// `Completed`、`Failed`、`Stopped` 为终止状态，进入后不再变化。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskStatus {
    Pending,
    Running,
    Completed,
    Failed,
    Stopped,
}

impl TaskStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Stopped
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Completed => "completed",
            TaskStatus::Failed => "failed",
            TaskStatus::Stopped => "stopped",
        }
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = FleetError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "pending" => Ok(TaskStatus::Pending),
            "running" => Ok(TaskStatus::Running),
            "completed" => Ok(TaskStatus::Completed),
            "failed" => Ok(TaskStatus::Failed),
            "stopped" => Ok(TaskStatus::Stopped),
            other => Err(FleetError::Validation(format!("未知的任务状态: {other}"))),
        }
    }
}

/// 任务对节点的要求：能力标签和最小可用内存
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TaskRequirements {
    #[serde(default)]
    pub capabilities: BTreeSet<String>,
    #[serde(default)]
    pub memory: f64,
}

impl TaskRequirements {
    pub fn new(memory: f64, capabilities: &[&str]) -> Self {
        Self {
            capabilities: capabilities.iter().map(|c| c.to_string()).collect(),
            memory,
        }
    }
}

/// 任务记录
///
/// 提交时创建，由调度器和Worker状态上报原地更新，永不删除。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskInfo {
    pub task_id: String,
    pub script_id: String,
    pub node_id: Option<String>,
    pub status: TaskStatus,
    pub priority: i64,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
    pub result: Option<serde_json::Value>,
    pub error: Option<String>,
    pub requirements: TaskRequirements,
}

impl TaskInfo {
    pub fn new(
        task_id: impl Into<String>,
        script_id: impl Into<String>,
        priority: i64,
        requirements: TaskRequirements,
    ) -> Self {
        Self {
            task_id: task_id.into(),
            script_id: script_id.into(),
            node_id: None,
            status: TaskStatus::Pending,
            priority,
            created_at: Utc::now(),
            started_at: None,
            completed_at: None,
            result: None,
            error: None,
            requirements,
        }
    }

    pub fn is_terminal(&self) -> bool {
        self.status.is_terminal()
    }

    /// 重置为待调度状态（节点失效或注销时的任务回收）
    pub fn reset_for_reassignment(&mut self) {
        self.node_id = None;
        self.status = TaskStatus::Pending;
        self.started_at = None;
    }
}
