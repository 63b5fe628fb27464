use std::collections::{BTreeMap, BTreeSet};

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use super::task::TaskRequirements;

/// 节点网络地址
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeAddress {
    pub host: String,
    pub port: u16,
}

impl NodeAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// HTTP base URL of the node's RPC server.
    pub fn base_url(&self) -> String {
        format!("http://{}:{}", self.host, self.port)
    }
}

/// 节点能力描述
///
/// `max_load` 和 `memory` 是调度器识别的数值上限，`features` 是能力标签集合，
/// 其它键原样保留在 `extra` 中。
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct NodeCapabilities {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_load: Option<f64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<f64>,
    #[serde(default)]
    pub features: BTreeSet<String>,
    #[serde(flatten)]
    pub extra: BTreeMap<String, serde_json::Value>,
}

impl NodeCapabilities {
    pub fn new(max_load: f64, memory: f64, features: &[&str]) -> Self {
        Self {
            max_load: Some(max_load),
            memory: Some(memory),
            features: features.iter().map(|f| f.to_string()).collect(),
            extra: BTreeMap::new(),
        }
    }

    /// 检查能力标签是否覆盖所需标签
    pub fn covers(&self, required: &BTreeSet<String>) -> bool {
        required.is_subset(&self.features)
    }

    /// A node without `max_load` is never considered saturated.
    pub fn load_limit(&self) -> f64 {
        self.max_load.unwrap_or(f64::INFINITY)
    }
}

/// 节点健康状态
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum HealthStatus {
    Healthy,
    Unhealthy,
}

/// 节点信息
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeInfo {
    pub id: String,
    pub address: NodeAddress,
    pub capabilities: NodeCapabilities,
    pub load: f64,
    pub available_memory: f64,
    pub status: String,
    pub last_heartbeat: DateTime<Utc>,
}

impl NodeInfo {
    /// 创建新注册的节点信息
    pub fn new(
        id: impl Into<String>,
        host: impl Into<String>,
        port: u16,
        capabilities: NodeCapabilities,
    ) -> Self {
        let available_memory = capabilities.memory.unwrap_or(0.0);
        Self {
            id: id.into(),
            address: NodeAddress::new(host, port),
            capabilities,
            load: 0.0,
            available_memory,
            status: "registered".to_string(),
            last_heartbeat: Utc::now(),
        }
    }
}

/// 协调器持有的节点状态
#[derive(Debug, Clone)]
pub struct NodeState {
    pub info: NodeInfo,
    pub tasks: BTreeSet<String>,
    pub health_status: HealthStatus,
}

impl NodeState {
    pub fn new(info: NodeInfo) -> Self {
        Self {
            info,
            tasks: BTreeSet::new(),
            health_status: HealthStatus::Healthy,
        }
    }

    pub fn is_healthy(&self) -> bool {
        self.health_status == HealthStatus::Healthy
    }

    /// 检查节点是否满足任务的资源和能力要求
    pub fn can_accept(&self, requirements: &TaskRequirements) -> bool {
        self.is_healthy()
            && self.info.capabilities.covers(&requirements.capabilities)
            && self.info.load < self.info.capabilities.load_limit()
            && self.info.available_memory >= requirements.memory
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, now: DateTime<Utc>, timeout: Duration) -> bool {
        now - self.info.last_heartbeat > timeout
    }

    pub fn summary(&self) -> NodeSummary {
        NodeSummary {
            id: self.info.id.clone(),
            address: self.info.address.clone(),
            load: self.info.load,
            available_memory: self.info.available_memory,
            status: self.info.status.clone(),
            health_status: self.health_status,
            task_count: self.tasks.len(),
            last_heartbeat: self.info.last_heartbeat,
        }
    }

    pub fn detail(&self) -> NodeDetail {
        NodeDetail {
            info: self.info.clone(),
            health_status: self.health_status,
            tasks: self.tasks.iter().cloned().collect(),
        }
    }
}

/// `GET /nodes` 返回的节点摘要
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeSummary {
    pub id: String,
    pub address: NodeAddress,
    pub load: f64,
    pub available_memory: f64,
    pub status: String,
    pub health_status: HealthStatus,
    pub task_count: usize,
    pub last_heartbeat: DateTime<Utc>,
}

/// `GET /nodes/{id}` 返回的节点详情
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeDetail {
    #[serde(flatten)]
    pub info: NodeInfo,
    pub health_status: HealthStatus,
    pub tasks: Vec<String>,
}
