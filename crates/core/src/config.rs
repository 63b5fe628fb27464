//! 应用配置
//!
//! 配置来源按优先级从低到高：结构体默认值、TOML 配置文件、`FLEET__` 前缀的环境变量
//! （例如 `FLEET__COORDINATOR__NODE_TIMEOUT_SECONDS=60`）。

use std::path::{Path, PathBuf};
use std::time::Duration;

use ::config::{Config, Environment, File, FileFormat};
use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::models::NodeCapabilities;
use crate::retry::RetryPolicyConfig;
use crate::{FleetError, FleetResult};

/// 默认配置文件搜索路径
const DEFAULT_CONFIG_PATHS: &[&str] = &["config/fleet.toml", "fleet.toml"];

pub trait ConfigValidator {
    fn validate(&self) -> FleetResult<()>;
}

/// 通用校验工具
pub struct ValidationUtils;

impl ValidationUtils {
    pub fn validate_not_empty(value: &str, field_name: &str) -> FleetResult<()> {
        if value.trim().is_empty() {
            return Err(FleetError::Configuration(format!(
                "{field_name} cannot be empty"
            )));
        }
        Ok(())
    }

    pub fn validate_port(port: u16, field_name: &str) -> FleetResult<()> {
        if port == 0 {
            return Err(FleetError::Configuration(format!(
                "{field_name} cannot be 0"
            )));
        }
        Ok(())
    }

    pub fn validate_positive(value: u64, field_name: &str) -> FleetResult<()> {
        if value == 0 {
            return Err(FleetError::Configuration(format!(
                "{field_name} must be greater than 0"
            )));
        }
        Ok(())
    }

    pub fn validate_url(url: &str, field_name: &str) -> FleetResult<()> {
        Self::validate_not_empty(url, field_name)?;
        if !url.starts_with("http://") && !url.starts_with("https://") {
            return Err(FleetError::Configuration(format!(
                "{field_name} must be an http(s) URL"
            )));
        }
        Ok(())
    }

    pub fn validate_bind_address(address: &str, field_name: &str) -> FleetResult<()> {
        address
            .parse::<std::net::SocketAddr>()
            .map(|_| ())
            .map_err(|e| FleetError::Configuration(format!("{field_name} is invalid: {e}")))
    }
}

/// 顶层配置
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub coordinator: CoordinatorConfig,
    pub worker: WorkerConfig,
    pub resilience: ResilienceConfig,
    pub observability: ObservabilityConfig,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    pub bind_address: String,
    pub schedule_interval_ms: u64,
    pub health_check_interval_seconds: u64,
    pub node_timeout_seconds: u64,
    pub rpc_timeout_ms: u64,
    /// Retry policy wrapping the assign push to workers
    pub assign_policy: String,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:8000".to_string(),
            schedule_interval_ms: 100,
            health_check_interval_seconds: 5,
            node_timeout_seconds: 30,
            rpc_timeout_ms: 5000,
            assign_policy: "worker_rpc".to_string(),
        }
    }
}

impl CoordinatorConfig {
    pub fn schedule_interval(&self) -> Duration {
        Duration::from_millis(self.schedule_interval_ms)
    }

    pub fn health_check_interval(&self) -> Duration {
        Duration::from_secs(self.health_check_interval_seconds)
    }

    pub fn node_timeout(&self) -> Duration {
        Duration::from_secs(self.node_timeout_seconds)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }
}

impl ConfigValidator for CoordinatorConfig {
    fn validate(&self) -> FleetResult<()> {
        ValidationUtils::validate_bind_address(&self.bind_address, "coordinator.bind_address")?;
        ValidationUtils::validate_positive(
            self.schedule_interval_ms,
            "coordinator.schedule_interval_ms",
        )?;
        ValidationUtils::validate_positive(
            self.health_check_interval_seconds,
            "coordinator.health_check_interval_seconds",
        )?;
        ValidationUtils::validate_positive(
            self.node_timeout_seconds,
            "coordinator.node_timeout_seconds",
        )?;
        ValidationUtils::validate_positive(self.rpc_timeout_ms, "coordinator.rpc_timeout_ms")?;
        ValidationUtils::validate_not_empty(&self.assign_policy, "coordinator.assign_policy")?;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub node_id: String,
    /// Address the coordinator uses to reach this worker
    pub host: String,
    pub port: u16,
    pub bind_address: String,
    pub coordinator_url: String,
    pub heartbeat_interval_seconds: u64,
    pub task_poll_interval_ms: u64,
    pub rpc_timeout_ms: u64,
    pub capabilities: NodeCapabilities,
    pub scripts_dir: PathBuf,
    pub interpreter: String,
    pub execution_timeout_seconds: u64,
    /// Retry policy wrapping register/update/deregister calls
    pub rpc_policy: String,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            node_id: "worker-001".to_string(),
            host: "127.0.0.1".to_string(),
            port: 8001,
            bind_address: "0.0.0.0:8001".to_string(),
            coordinator_url: "http://127.0.0.1:8000".to_string(),
            heartbeat_interval_seconds: 5,
            task_poll_interval_ms: 100,
            rpc_timeout_ms: 5000,
            capabilities: NodeCapabilities::new(10.0, 4096.0, &[]),
            scripts_dir: PathBuf::from("scripts"),
            interpreter: "python3".to_string(),
            execution_timeout_seconds: 300,
            rpc_policy: "coordinator_rpc".to_string(),
        }
    }
}

impl WorkerConfig {
    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn task_poll_interval(&self) -> Duration {
        Duration::from_millis(self.task_poll_interval_ms)
    }

    pub fn rpc_timeout(&self) -> Duration {
        Duration::from_millis(self.rpc_timeout_ms)
    }

    pub fn execution_timeout(&self) -> Duration {
        Duration::from_secs(self.execution_timeout_seconds)
    }
}

impl ConfigValidator for WorkerConfig {
    fn validate(&self) -> FleetResult<()> {
        ValidationUtils::validate_not_empty(&self.node_id, "worker.node_id")?;
        ValidationUtils::validate_not_empty(&self.host, "worker.host")?;
        ValidationUtils::validate_port(self.port, "worker.port")?;
        ValidationUtils::validate_bind_address(&self.bind_address, "worker.bind_address")?;
        ValidationUtils::validate_url(&self.coordinator_url, "worker.coordinator_url")?;
        ValidationUtils::validate_positive(
            self.heartbeat_interval_seconds,
            "worker.heartbeat_interval_seconds",
        )?;
        ValidationUtils::validate_positive(
            self.task_poll_interval_ms,
            "worker.task_poll_interval_ms",
        )?;
        ValidationUtils::validate_positive(self.rpc_timeout_ms, "worker.rpc_timeout_ms")?;
        ValidationUtils::validate_positive(
            self.execution_timeout_seconds,
            "worker.execution_timeout_seconds",
        )?;
        ValidationUtils::validate_not_empty(&self.interpreter, "worker.interpreter")?;
        ValidationUtils::validate_not_empty(&self.rpc_policy, "worker.rpc_policy")?;
        if let Some(max_load) = self.capabilities.max_load {
            if max_load <= 0.0 {
                return Err(FleetError::Configuration(
                    "worker.capabilities.max_load must be positive".to_string(),
                ));
            }
        }
        if let Some(memory) = self.capabilities.memory {
            if memory < 0.0 {
                return Err(FleetError::Configuration(
                    "worker.capabilities.memory cannot be negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub policies: Vec<RetryPolicyConfig>,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            policies: vec![
                RetryPolicyConfig::coordinator_rpc(),
                RetryPolicyConfig::worker_rpc(),
            ],
        }
    }
}

impl ResilienceConfig {
    pub fn policy(&self, name: &str) -> Option<&RetryPolicyConfig> {
        self.policies.iter().find(|p| p.name == name)
    }
}

impl ConfigValidator for ResilienceConfig {
    fn validate(&self) -> FleetResult<()> {
        let mut seen = std::collections::HashSet::new();
        for policy in &self.policies {
            policy.validate()?;
            if !seen.insert(policy.name.as_str()) {
                return Err(FleetError::Configuration(format!(
                    "duplicate retry policy: {}",
                    policy.name
                )));
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    pub log_level: String,
    /// `pretty` or `json`
    pub log_format: String,
    pub metrics_enabled: bool,
    pub metrics_port: u16,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: "pretty".to_string(),
            metrics_enabled: false,
            metrics_port: 9090,
        }
    }
}

impl ConfigValidator for ObservabilityConfig {
    fn validate(&self) -> FleetResult<()> {
        match self.log_level.to_lowercase().as_str() {
            "trace" | "debug" | "info" | "warn" | "error" => {}
            other => {
                return Err(FleetError::Configuration(format!(
                    "observability.log_level is invalid: {other}"
                )))
            }
        }
        match self.log_format.as_str() {
            "pretty" | "json" => {}
            other => {
                return Err(FleetError::Configuration(format!(
                    "observability.log_format is invalid: {other}"
                )))
            }
        }
        if self.metrics_enabled {
            ValidationUtils::validate_port(self.metrics_port, "observability.metrics_port")?;
        }
        Ok(())
    }
}

impl ConfigValidator for AppConfig {
    fn validate(&self) -> FleetResult<()> {
        self.coordinator.validate()?;
        self.worker.validate()?;
        self.resilience.validate()?;
        self.observability.validate()?;

        for (field, name) in [
            ("coordinator.assign_policy", &self.coordinator.assign_policy),
            ("worker.rpc_policy", &self.worker.rpc_policy),
        ] {
            if self.resilience.policy(name).is_none() {
                return Err(FleetError::Configuration(format!(
                    "{field} refers to unknown retry policy: {name}"
                )));
            }
        }
        Ok(())
    }
}

impl AppConfig {
    /// 加载配置
    ///
    /// 显式指定的文件必须存在；未指定时按默认路径搜索，找不到则使用默认值。
    pub fn load(path: Option<&Path>) -> FleetResult<Self> {
        let mut builder = Config::builder();

        match path {
            Some(path) => {
                if !path.exists() {
                    return Err(FleetError::Configuration(format!(
                        "配置文件不存在: {}",
                        path.display()
                    )));
                }
                info!("加载配置文件: {}", path.display());
                builder = builder.add_source(File::from(path).format(FileFormat::Toml));
            }
            None => {
                match DEFAULT_CONFIG_PATHS
                    .iter()
                    .map(Path::new)
                    .find(|candidate| candidate.exists())
                {
                    Some(found) => {
                        info!("加载配置文件: {}", found.display());
                        builder = builder.add_source(File::from(found).format(FileFormat::Toml));
                    }
                    None => debug!("未找到配置文件，使用默认配置"),
                }
            }
        }

        builder = builder.add_source(
            Environment::with_prefix("FLEET")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        let config: AppConfig = builder.build()?.try_deserialize()?;
        config.validate()?;
        Ok(config)
    }

    pub fn from_toml(toml_str: &str) -> FleetResult<Self> {
        let config: AppConfig = toml::from_str(toml_str)
            .map_err(|e| FleetError::Configuration(format!("解析TOML配置失败: {e}")))?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_toml(&self) -> FleetResult<String> {
        toml::to_string_pretty(self)
            .map_err(|e| FleetError::Serialization(format!("序列化配置为TOML失败: {e}")))
    }
}
