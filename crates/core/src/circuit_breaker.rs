use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::{FleetError, FleetResult};

/// Circuit breaker state
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CircuitState {
    /// Circuit is closed - normal operation
    Closed,
    /// Circuit is open - calls are blocked
    Open,
    /// Circuit is half-open - a single trial call is testing recovery
    HalfOpen,
}

/// Circuit breaker configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CircuitBreakerConfig {
    /// Number of failures before opening circuit
    pub failure_threshold: u32,
    /// Time spent open before a trial call is allowed
    #[serde(rename = "reset_timeout_ms", with = "crate::duration_serde")]
    pub reset_timeout: Duration,
    /// How long the trial call may stay outstanding before it counts as a failure
    #[serde(rename = "half_open_timeout_ms", with = "crate::duration_serde")]
    pub half_open_timeout: Duration,
    /// Failure ratio (0.0-1.0) that opens the circuit once `min_requests` samples exist
    pub failure_rate_threshold: f64,
    /// Minimum sample size before the failure rate is evaluated
    pub min_requests: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            failure_threshold: 5,
            reset_timeout: Duration::from_secs(30),
            half_open_timeout: Duration::from_secs(10),
            failure_rate_threshold: 0.5,
            min_requests: 10,
        }
    }
}

impl CircuitBreakerConfig {
    pub fn validate(&self) -> FleetResult<()> {
        if self.failure_threshold == 0 {
            return Err(FleetError::Configuration(
                "failure_threshold must be greater than 0".to_string(),
            ));
        }
        if self.reset_timeout.is_zero() {
            return Err(FleetError::Configuration(
                "reset_timeout must be greater than 0".to_string(),
            ));
        }
        if self.half_open_timeout.is_zero() {
            return Err(FleetError::Configuration(
                "half_open_timeout must be greater than 0".to_string(),
            ));
        }
        if !(self.failure_rate_threshold > 0.0 && self.failure_rate_threshold <= 1.0) {
            return Err(FleetError::Configuration(
                "failure_rate_threshold must be within (0, 1]".to_string(),
            ));
        }
        Ok(())
    }
}

/// Circuit breaker statistics
#[derive(Debug, Clone)]
pub struct CircuitBreakerStats {
    /// Current state
    pub state: CircuitState,
    /// Failure counter checked against `failure_threshold`; decays by one per success
    pub failure_count: u32,
    /// Failures since the circuit last closed
    pub window_failures: u32,
    /// Successes since the circuit last closed
    pub window_successes: u32,
    pub total_calls: u64,
    pub successful_calls: u64,
    pub failed_calls: u64,
    /// Calls rejected without invoking the operation
    pub rejected_calls: u64,
    /// Last state change time
    pub last_state_change: Instant,
    pub last_error: Option<String>,
    trial_started_at: Option<Instant>,
}

impl CircuitBreakerStats {
    fn new() -> Self {
        Self {
            state: CircuitState::Closed,
            failure_count: 0,
            window_failures: 0,
            window_successes: 0,
            total_calls: 0,
            successful_calls: 0,
            failed_calls: 0,
            rejected_calls: 0,
            last_state_change: Instant::now(),
            last_error: None,
            trial_started_at: None,
        }
    }

    /// Failure rate over the current window
    pub fn failure_rate(&self) -> f64 {
        let samples = self.window_samples();
        if samples == 0 {
            0.0
        } else {
            self.window_failures as f64 / samples as f64
        }
    }

    fn window_samples(&self) -> u32 {
        self.window_failures + self.window_successes
    }

    fn transition(&mut self, state: CircuitState) {
        self.state = state;
        self.last_state_change = Instant::now();
        self.trial_started_at = None;
        if state == CircuitState::Closed {
            self.failure_count = 0;
            self.window_failures = 0;
            self.window_successes = 0;
        }
    }
}

/// Outcome of asking the breaker whether a call may proceed.
#[derive(Debug, Clone, PartialEq)]
pub enum Admission {
    /// Normal call through a closed circuit
    Allowed,
    /// The single trial call of a half-open circuit
    Trial,
    /// Fail fast with the last recorded error
    Rejected(String),
}

/// Circuit breaker - Provides fault tolerance and service protection
///
/// Transitions only along closed→open, open→half_open, half_open→closed and
/// half_open→open. `reset` and `force_open` are administrative overrides.
pub struct CircuitBreaker {
    name: String,
    config: CircuitBreakerConfig,
    stats: Arc<RwLock<CircuitBreakerStats>>,
}

impl CircuitBreaker {
    pub fn new(name: impl Into<String>, config: CircuitBreakerConfig) -> Self {
        Self {
            name: name.into(),
            config,
            stats: Arc::new(RwLock::new(CircuitBreakerStats::new())),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn config(&self) -> &CircuitBreakerConfig {
        &self.config
    }

    /// Execute operation with circuit breaker protection
    pub async fn execute<F, Fut, T>(&self, operation: F) -> FleetResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = FleetResult<T>>,
    {
        let admission = self.admit().await;
        let result = match admission {
            Admission::Rejected(last_error) => return Err(self.open_error(last_error)),
            Admission::Allowed => operation().await,
            Admission::Trial => {
                match tokio::time::timeout(self.config.half_open_timeout, operation()).await {
                    Ok(result) => result,
                    Err(_) => Err(FleetError::Timeout(format!(
                        "circuit breaker {} trial call exceeded {:?}",
                        self.name, self.config.half_open_timeout
                    ))),
                }
            }
        };

        match &result {
            Ok(_) => self.record_success().await,
            Err(error) => self.record_failure(&error.to_string()).await,
        }
        result
    }

    /// Decide whether a call may proceed, performing the open→half_open
    /// transition once `reset_timeout` has elapsed.
    pub async fn admit(&self) -> Admission {
        let mut stats = self.stats.write().await;
        let now = Instant::now();

        let admission = match stats.state {
            CircuitState::Closed => Admission::Allowed,
            CircuitState::Open => {
                if now.duration_since(stats.last_state_change) >= self.config.reset_timeout {
                    stats.transition(CircuitState::HalfOpen);
                    stats.trial_started_at = Some(now);
                    info!(breaker = %self.name, "熔断器进入半开状态，允许一次试探调用");
                    Admission::Trial
                } else {
                    Admission::Rejected(last_error_of(&stats))
                }
            }
            CircuitState::HalfOpen => match stats.trial_started_at {
                Some(started)
                    if now.duration_since(started) > self.config.half_open_timeout =>
                {
                    let error = format!(
                        "trial call outstanding longer than {:?}",
                        self.config.half_open_timeout
                    );
                    stats.failed_calls += 1;
                    stats.last_error = Some(error.clone());
                    stats.transition(CircuitState::Open);
                    warn!(breaker = %self.name, "试探调用超时，熔断器重新打开");
                    Admission::Rejected(error)
                }
                Some(_) => Admission::Rejected(last_error_of(&stats)),
                None => {
                    stats.trial_started_at = Some(now);
                    Admission::Trial
                }
            },
        };

        if matches!(admission, Admission::Rejected(_)) {
            stats.rejected_calls += 1;
            metrics::counter!("fleet_circuit_rejections_total", "breaker" => self.name.clone())
                .increment(1);
        }
        admission
    }

    /// Record successful call
    pub async fn record_success(&self) {
        let mut stats = self.stats.write().await;

        stats.total_calls += 1;
        stats.successful_calls += 1;

        match stats.state {
            CircuitState::HalfOpen => {
                stats.transition(CircuitState::Closed);
                info!(breaker = %self.name, "试探调用成功，熔断器关闭");
            }
            CircuitState::Closed => {
                stats.window_successes += 1;
                stats.failure_count = stats.failure_count.saturating_sub(1);
            }
            CircuitState::Open => {}
        }
    }

    /// Record failed call
    pub async fn record_failure(&self, error: &str) {
        let mut stats = self.stats.write().await;

        stats.total_calls += 1;
        stats.failed_calls += 1;
        stats.last_error = Some(error.to_string());

        match stats.state {
            CircuitState::Closed => {
                stats.failure_count += 1;
                stats.window_failures += 1;

                let threshold_reached = stats.failure_count >= self.config.failure_threshold;
                let rate_exceeded = stats.window_samples() >= self.config.min_requests
                    && stats.failure_rate() >= self.config.failure_rate_threshold;

                if threshold_reached || rate_exceeded {
                    warn!(
                        breaker = %self.name,
                        failures = stats.failure_count,
                        failure_rate = stats.failure_rate(),
                        "熔断器打开"
                    );
                    stats.transition(CircuitState::Open);
                }
            }
            CircuitState::HalfOpen => {
                // In half-open state, any failure immediately opens the circuit
                stats.transition(CircuitState::Open);
                warn!(breaker = %self.name, "试探调用失败，熔断器重新打开");
            }
            CircuitState::Open => {
                debug!(breaker = %self.name, "熔断器已打开时记录到迟到的失败");
            }
        }
    }

    /// Get current circuit state
    pub async fn state(&self) -> CircuitState {
        self.stats.read().await.state
    }

    /// Get circuit breaker statistics
    pub async fn stats(&self) -> CircuitBreakerStats {
        self.stats.read().await.clone()
    }

    pub async fn last_error(&self) -> Option<String> {
        self.stats.read().await.last_error.clone()
    }

    /// Reset circuit breaker to closed state
    pub async fn reset(&self) {
        let mut stats = self.stats.write().await;
        *stats = CircuitBreakerStats::new();
    }

    /// Force open circuit (for maintenance)
    pub async fn force_open(&self) {
        let mut stats = self.stats.write().await;
        stats.transition(CircuitState::Open);
    }

    pub(crate) fn open_error(&self, last_error: String) -> FleetError {
        FleetError::CircuitOpen {
            name: self.name.clone(),
            last_error,
        }
    }
}

fn last_error_of(stats: &CircuitBreakerStats) -> String {
    stats
        .last_error
        .clone()
        .unwrap_or_else(|| "circuit open".to_string())
}
