use thiserror::Error;

/// 调度系统错误类型定义
#[derive(Debug, Clone, Error)]
pub enum FleetError {
    #[error("节点未找到: {id}")]
    NodeNotFound { id: String },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: String },

    #[error("参数校验失败: {0}")]
    Validation(String),

    #[error("非法的任务状态变更: {task_id} {from} -> {to}")]
    InvalidTransition {
        task_id: String,
        from: String,
        to: String,
    },

    #[error("网络错误: {0}")]
    Network(String),

    #[error("操作超时: {0}")]
    Timeout(String),

    #[error("RPC调用失败: HTTP {status} - {message}")]
    Rpc { status: u16, message: String },

    #[error("任务执行错误: {0}")]
    TaskExecution(String),

    #[error("熔断器 {name} 已打开: {last_error}")]
    CircuitOpen { name: String, last_error: String },

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl FleetError {
    /// Stable tag used by retry policies to classify errors.
    pub fn kind(&self) -> &'static str {
        match self {
            FleetError::NodeNotFound { .. } => "node_not_found",
            FleetError::TaskNotFound { .. } => "task_not_found",
            FleetError::Validation(_) => "validation",
            FleetError::InvalidTransition { .. } => "invalid_transition",
            FleetError::Network(_) => "network",
            FleetError::Timeout(_) => "timeout",
            // 5xx is the peer failing; anything else is a rejection of the request
            FleetError::Rpc { status, .. } if *status >= 500 => "rpc_server",
            FleetError::Rpc { .. } => "rpc",
            FleetError::TaskExecution(_) => "task_execution",
            FleetError::CircuitOpen { .. } => "circuit_open",
            FleetError::Configuration(_) => "configuration",
            FleetError::Serialization(_) => "serialization",
            FleetError::Internal(_) => "internal",
        }
    }

    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            FleetError::NodeNotFound { .. } | FleetError::TaskNotFound { .. }
        )
    }

    /// Fail-fast rejection, as opposed to an exhausted retry budget.
    pub fn is_circuit_open(&self) -> bool {
        matches!(self, FleetError::CircuitOpen { .. })
    }

    pub fn node_not_found(id: impl Into<String>) -> Self {
        FleetError::NodeNotFound { id: id.into() }
    }

    pub fn task_not_found(id: impl Into<String>) -> Self {
        FleetError::TaskNotFound { id: id.into() }
    }
}

impl From<serde_json::Error> for FleetError {
    fn from(e: serde_json::Error) -> Self {
        FleetError::Serialization(e.to_string())
    }
}

impl From<::config::ConfigError> for FleetError {
    fn from(e: ::config::ConfigError) -> Self {
        FleetError::Configuration(e.to_string())
    }
}

/// 统一的Result类型
pub type FleetResult<T> = std::result::Result<T, FleetError>;
