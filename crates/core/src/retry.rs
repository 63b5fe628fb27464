//! 重试策略与重试管理器
//!
//! `RetryManager` 按名称持有 `RetryPolicy`，调用方通过策略名包装任意可能失败的
//! 异步操作。策略可内嵌一个 `CircuitBreaker`：熔断器打开时直接失败
//! （`FleetError::CircuitOpen`），与重试耗尽（返回原始错误）是两种不同信号。

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use rand::Rng;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::circuit_breaker::{Admission, CircuitBreaker, CircuitBreakerConfig};
use crate::{FleetError, FleetResult};

/// 退避策略
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RetryStrategy {
    Linear,
    Exponential,
    Fibonacci,
}

/// 重试策略配置
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RetryPolicyConfig {
    pub name: String,
    pub max_attempts: u32,
    pub strategy: RetryStrategy,
    #[serde(rename = "initial_delay_ms", with = "crate::duration_serde")]
    pub initial_delay: Duration,
    #[serde(rename = "max_delay_ms", with = "crate::duration_serde")]
    pub max_delay: Duration,
    #[serde(default)]
    pub jitter: bool,
    /// Error kinds (see `FleetError::kind`) that may be retried
    #[serde(default)]
    pub retryable_errors: Vec<String>,
    /// Substrings of the error message that may be retried
    #[serde(default)]
    pub retryable_patterns: Vec<String>,
    #[serde(rename = "max_total_time_ms", with = "crate::duration_serde")]
    pub max_total_time: Duration,
    #[serde(default)]
    pub circuit_breaker: Option<CircuitBreakerConfig>,
}

impl RetryPolicyConfig {
    /// Worker → coordinator calls: register, status updates, deregister.
    pub fn coordinator_rpc() -> Self {
        Self {
            name: "coordinator_rpc".to_string(),
            max_attempts: 3,
            strategy: RetryStrategy::Exponential,
            initial_delay: Duration::from_millis(200),
            max_delay: Duration::from_secs(2),
            jitter: true,
            retryable_errors: vec![
                "network".to_string(),
                "timeout".to_string(),
                "rpc_server".to_string(),
            ],
            retryable_patterns: Vec::new(),
            max_total_time: Duration::from_secs(10),
            circuit_breaker: None,
        }
    }

    /// Coordinator → worker assign push. One attempt; the breaker fails fast
    /// once a worker keeps refusing.
    pub fn worker_rpc() -> Self {
        Self {
            name: "worker_rpc".to_string(),
            max_attempts: 1,
            strategy: RetryStrategy::Exponential,
            initial_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(1),
            jitter: false,
            retryable_errors: vec!["network".to_string(), "timeout".to_string()],
            retryable_patterns: Vec::new(),
            max_total_time: Duration::from_secs(5),
            circuit_breaker: Some(CircuitBreakerConfig {
                failure_threshold: 5,
                reset_timeout: Duration::from_secs(10),
                half_open_timeout: Duration::from_secs(5),
                failure_rate_threshold: 0.5,
                min_requests: 20,
            }),
        }
    }

    pub fn validate(&self) -> FleetResult<()> {
        if self.name.trim().is_empty() {
            return Err(FleetError::Configuration(
                "retry policy name cannot be empty".to_string(),
            ));
        }
        if self.max_attempts == 0 {
            return Err(FleetError::Configuration(format!(
                "retry policy {}: max_attempts must be greater than 0",
                self.name
            )));
        }
        if self.max_delay < self.initial_delay {
            return Err(FleetError::Configuration(format!(
                "retry policy {}: max_delay must not be smaller than initial_delay",
                self.name
            )));
        }
        if let Some(breaker) = &self.circuit_breaker {
            breaker.validate()?;
        }
        Ok(())
    }
}

/// 运行时重试策略：配置加上可选的熔断器实例
#[derive(Clone)]
pub struct RetryPolicy {
    pub config: RetryPolicyConfig,
    pub circuit_breaker: Option<Arc<CircuitBreaker>>,
}

impl std::fmt::Debug for RetryPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RetryPolicy")
            .field("config", &self.config)
            .field("circuit_breaker", &self.circuit_breaker.as_ref().map(|cb| cb.name()))
            .finish()
    }
}

impl RetryPolicy {
    pub fn new(config: RetryPolicyConfig) -> Self {
        let circuit_breaker = config
            .circuit_breaker
            .clone()
            .map(|cb_config| Arc::new(CircuitBreaker::new(config.name.clone(), cb_config)));
        Self {
            config,
            circuit_breaker,
        }
    }

    /// Bind an existing breaker, e.g. one shared between several policies.
    pub fn with_circuit_breaker(mut self, breaker: Arc<CircuitBreaker>) -> Self {
        self.circuit_breaker = Some(breaker);
        self
    }

    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// 计算第 `attempt` 次失败后的等待时间（attempt 从 1 开始）
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let attempt = attempt.max(1);
        let initial = self.config.initial_delay;
        let max = self.config.max_delay;

        let delay = match self.config.strategy {
            RetryStrategy::Linear => initial.saturating_mul(attempt),
            RetryStrategy::Exponential => {
                let factor = 2f64.powi(attempt.saturating_sub(1).min(1023) as i32);
                capped(initial.as_secs_f64() * factor, max)
            }
            RetryStrategy::Fibonacci => capped(initial.as_secs_f64() * fibonacci(attempt) as f64, max),
        };

        if self.config.jitter {
            let factor: f64 = rand::rng().random_range(0.9..=1.1);
            delay.mul_f64(factor)
        } else {
            delay
        }
    }

    /// 根据错误类型和错误信息判断是否允许重试；两个列表都为空时全部可重试
    pub fn is_retryable(&self, error: &FleetError) -> bool {
        if self.config.retryable_errors.is_empty() && self.config.retryable_patterns.is_empty() {
            return true;
        }
        let kind = error.kind();
        if self.config.retryable_errors.iter().any(|k| k == kind) {
            return true;
        }
        let message = error.to_string();
        self.config
            .retryable_patterns
            .iter()
            .any(|pattern| message.contains(pattern.as_str()))
    }
}

fn capped(seconds: f64, max: Duration) -> Duration {
    if !seconds.is_finite() || seconds >= max.as_secs_f64() {
        max
    } else {
        Duration::from_secs_f64(seconds)
    }
}

fn fibonacci(n: u32) -> u64 {
    let (mut a, mut b) = (0u64, 1u64);
    for _ in 1..n {
        let next = a.saturating_add(b);
        a = b;
        b = next;
    }
    if n == 0 {
        0
    } else {
        b
    }
}

/// 单个策略的累计统计
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RetryStats {
    pub executions: u64,
    pub attempts: u64,
    pub retries: u64,
    pub successes: u64,
    /// Failures rejected by the retryable allow-list
    pub non_retryable_failures: u64,
    /// Failures that consumed the attempt or time budget
    pub exhausted: u64,
    pub circuit_rejections: u64,
}

/// 重试管理器
#[derive(Default)]
pub struct RetryManager {
    policies: RwLock<HashMap<String, Arc<RetryPolicy>>>,
    stats: RwLock<HashMap<String, RetryStats>>,
}

impl RetryManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// 根据配置批量创建策略
    pub async fn from_configs(configs: &[RetryPolicyConfig]) -> FleetResult<Self> {
        let manager = Self::new();
        for config in configs {
            config.validate()?;
            manager.register_policy(RetryPolicy::new(config.clone())).await;
        }
        Ok(manager)
    }

    /// 注册策略，同名策略会被替换
    pub async fn register_policy(&self, policy: RetryPolicy) {
        let name = policy.name().to_string();
        debug!(policy = %name, "注册重试策略");
        self.policies.write().await.insert(name, Arc::new(policy));
    }

    pub async fn policy(&self, name: &str) -> Option<Arc<RetryPolicy>> {
        self.policies.read().await.get(name).cloned()
    }

    pub async fn policy_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.policies.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn stats(&self, name: &str) -> Option<RetryStats> {
        self.stats.read().await.get(name).cloned()
    }

    /// 使用指定名称的策略执行操作
    pub async fn execute<F, Fut, T>(
        &self,
        policy_name: &str,
        context: &str,
        operation: F,
    ) -> FleetResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FleetResult<T>>,
    {
        let policy = self.policy(policy_name).await.ok_or_else(|| {
            FleetError::Configuration(format!("未注册的重试策略: {policy_name}"))
        })?;
        self.execute_with_policy(&policy, context, operation).await
    }

    /// 使用给定策略执行操作
    pub async fn execute_with_policy<F, Fut, T>(
        &self,
        policy: &RetryPolicy,
        context: &str,
        mut operation: F,
    ) -> FleetResult<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = FleetResult<T>>,
    {
        let name = policy.name();
        let started = Instant::now();
        let mut attempt: u32 = 1;
        self.bump(name, |s| s.executions += 1).await;

        loop {
            let mut trial = false;
            if let Some(breaker) = &policy.circuit_breaker {
                match breaker.admit().await {
                    Admission::Rejected(last_error) => {
                        self.bump(name, |s| s.circuit_rejections += 1).await;
                        debug!(policy = %name, context, "熔断器打开，快速失败");
                        return Err(breaker.open_error(last_error));
                    }
                    Admission::Trial => trial = true,
                    Admission::Allowed => {}
                }
            }

            self.bump(name, |s| s.attempts += 1).await;
            let result = match (&policy.circuit_breaker, trial) {
                (Some(breaker), true) => {
                    let limit = breaker.config().half_open_timeout;
                    match tokio::time::timeout(limit, operation()).await {
                        Ok(result) => result,
                        Err(_) => Err(FleetError::Timeout(format!(
                            "{context}: trial call exceeded {limit:?}"
                        ))),
                    }
                }
                _ => operation().await,
            };

            let error = match result {
                Ok(value) => {
                    if let Some(breaker) = &policy.circuit_breaker {
                        breaker.record_success().await;
                    }
                    self.bump(name, |s| s.successes += 1).await;
                    return Ok(value);
                }
                Err(error) => error,
            };

            // every failure counts, final and non-retryable ones included, so a
            // single-attempt policy can still trip its breaker
            if let Some(breaker) = &policy.circuit_breaker {
                breaker.record_failure(&error.to_string()).await;
            }

            if !policy.is_retryable(&error) {
                self.bump(name, |s| s.non_retryable_failures += 1).await;
                debug!(policy = %name, context, error = %error, "错误不可重试");
                return Err(error);
            }

            let delay = policy.delay_for_attempt(attempt);
            if attempt >= policy.config.max_attempts
                || started.elapsed() + delay > policy.config.max_total_time
            {
                self.bump(name, |s| s.exhausted += 1).await;
                warn!(
                    policy = %name,
                    context,
                    attempts = attempt,
                    error = %error,
                    "重试次数或时间预算已耗尽"
                );
                return Err(error);
            }

            self.bump(name, |s| s.retries += 1).await;
            metrics::counter!("fleet_retry_attempts_total", "policy" => name.to_string())
                .increment(1);
            warn!(
                policy = %name,
                context,
                attempt,
                delay_ms = delay.as_millis() as u64,
                error = %error,
                "操作失败，等待后重试"
            );
            tokio::time::sleep(delay).await;
            attempt += 1;
        }
    }

    async fn bump(&self, name: &str, update: impl FnOnce(&mut RetryStats)) {
        let mut stats = self.stats.write().await;
        update(stats.entry(name.to_string()).or_default());
    }
}
