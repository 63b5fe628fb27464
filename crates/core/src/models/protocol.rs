//! RPC请求体定义，协调器与Worker两端共用

use serde::{Deserialize, Serialize};

use super::node::NodeCapabilities;
use super::task::{TaskRequirements, TaskStatus};
use crate::{FleetError, FleetResult};

fn require_non_empty(value: &str, field: &str) -> FleetResult<()> {
    if value.trim().is_empty() {
        return Err(FleetError::Validation(format!("{field} 不能为空")));
    }
    Ok(())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RegisterNodeRequest {
    pub node_id: String,
    pub host: String,
    pub port: u16,
    #[serde(default)]
    pub capabilities: NodeCapabilities,
}

impl RegisterNodeRequest {
    pub fn validate(&self) -> FleetResult<()> {
        require_non_empty(&self.node_id, "node_id")?;
        require_non_empty(&self.host, "host")?;
        if self.port == 0 {
            return Err(FleetError::Validation("port 不能为0".to_string()));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeregisterNodeRequest {
    pub node_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatRequest {
    pub node_id: String,
    pub load: f64,
    pub available_memory: f64,
    pub status: String,
}

impl HeartbeatRequest {
    pub fn validate(&self) -> FleetResult<()> {
        require_non_empty(&self.node_id, "node_id")?;
        if !self.load.is_finite() || self.load < 0.0 {
            return Err(FleetError::Validation(format!("无效的负载值: {}", self.load)));
        }
        if !self.available_memory.is_finite() || self.available_memory < 0.0 {
            return Err(FleetError::Validation(format!(
                "无效的可用内存: {}",
                self.available_memory
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskRequest {
    #[serde(default)]
    pub task_id: Option<String>,
    pub script_id: String,
    #[serde(default)]
    pub priority: i64,
    #[serde(default)]
    pub requirements: TaskRequirements,
}

impl SubmitTaskRequest {
    pub fn validate(&self) -> FleetResult<()> {
        if let Some(task_id) = &self.task_id {
            require_non_empty(task_id, "task_id")?;
        }
        require_non_empty(&self.script_id, "script_id")?;
        if !self.requirements.memory.is_finite() || self.requirements.memory < 0.0 {
            return Err(FleetError::Validation(format!(
                "无效的内存需求: {}",
                self.requirements.memory
            )));
        }
        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SubmitTaskResponse {
    pub task_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UpdateTaskRequest {
    pub task_id: String,
    pub status: TaskStatus,
    #[serde(default)]
    pub result: Option<serde_json::Value>,
    #[serde(default)]
    pub error: Option<String>,
}

/// 协调器推送给Worker的任务描述
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignTaskRequest {
    pub task_id: String,
    pub script_id: String,
    #[serde(default)]
    pub requirements: TaskRequirements,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StopTaskRequest {
    pub task_id: String,
}
