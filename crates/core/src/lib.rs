pub mod circuit_breaker;
pub mod config;
pub mod duration_serde;
pub mod errors;
pub mod models;
pub mod retry;

pub use circuit_breaker::{
    Admission, CircuitBreaker, CircuitBreakerConfig, CircuitBreakerStats, CircuitState,
};
pub use config::{
    AppConfig, ConfigValidator, CoordinatorConfig, ObservabilityConfig, ResilienceConfig,
    ValidationUtils, WorkerConfig,
};
pub use errors::{FleetError, FleetResult};
pub use retry::{RetryManager, RetryPolicy, RetryPolicyConfig, RetryStats, RetryStrategy};
