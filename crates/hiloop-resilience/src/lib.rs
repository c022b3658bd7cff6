//! Resilience primitives for outbound calls: circuit breaker and retry with
//! backoff. Nothing here is workflow-aware; `hiloop-webhook` wraps its chat
//! client with both.

pub mod circuit_breaker;
pub mod retry;

pub use circuit_breaker::{CircuitBreaker, CircuitBreakerConfig, CircuitState};
pub use retry::{with_retry, RetryPolicy};

use thiserror::Error;

#[derive(Error, Debug)]
pub enum AdapterError {
    #[error("connection error: {0}")]
    ConnectionError(String),

    #[error("request failed: {0}")]
    RequestFailed(String),

    #[error("circuit breaker is open")]
    CircuitBreakerOpen,

    #[error("timeout: {0}")]
    Timeout(String),

    #[error("serialization error: {0}")]
    SerializationError(String),

    #[error("invalid response: {0}")]
    InvalidResponse(String),

    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type AdapterResult<T> = Result<T, AdapterError>;

/// Callers map an open breaker onto `HiloopError::UpstreamUnavailable` with
/// the spec's "circuit_open" sentinel rather than failing the owning
/// workflow.
impl From<AdapterError> for hiloop_core::HiloopError {
    fn from(err: AdapterError) -> Self {
        let reason = match err {
            AdapterError::CircuitBreakerOpen => "circuit_open".to_string(),
            other => other.to_string(),
        };
        hiloop_core::HiloopError::UpstreamUnavailable { reason }
    }
}
