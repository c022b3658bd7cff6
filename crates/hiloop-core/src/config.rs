//! Environment-driven configuration, loaded once at process startup.
//!
//! Mirrors the defaults spec.md §6 names exactly; every value here can be
//! overridden by an environment variable of the same (upper-cased) name.
//! `SECRET_KEY` has deliberately no default — [`AppConfig::load`] fails
//! closed rather than boot with a guessable HMAC secret.

use config::{Config, ConfigError, Environment};
use serde::Deserialize;
use std::time::Duration;

#[derive(Debug, Clone, Deserialize)]
pub struct AppConfig {
    pub database_url: String,
    pub secret_key: String,
    #[serde(default)]
    pub callback_base_url: Option<String>,
    #[serde(default)]
    pub chat_bot_token: Option<String>,
    #[serde(default)]
    pub chat_channel: Option<String>,
    #[serde(default)]
    pub chat_signing_secret: Option<String>,

    #[serde(default = "default_approval_timeout_seconds")]
    pub default_approval_timeout_seconds: i64,
    #[serde(default = "default_timeout_check_interval_seconds")]
    pub timeout_check_interval_seconds: u64,

    #[serde(default)]
    pub retry: RetryConfig,
    #[serde(default)]
    pub circuit_breaker: CircuitBreakerConfig,
    #[serde(default)]
    pub event_bus: EventBusConfig,

    #[serde(default = "default_idempotency_key_expiry_hours")]
    pub idempotency_key_expiry_hours: i64,

    #[serde(default = "default_host")]
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl AppConfig {
    /// Load from the process environment. There is no file-based layer: the
    /// teacher's `load_from_file` path is not needed here since every value
    /// this orchestrator needs is a scalar suited to env vars.
    pub fn load() -> Result<Self, ConfigError> {
        let builder = Config::builder()
            .add_source(Environment::default().try_parsing(true))
            .set_default("default_approval_timeout_seconds", 3600)?
            .set_default("timeout_check_interval_seconds", 10)?
            .set_default("idempotency_key_expiry_hours", 24)?
            .set_default("host", "0.0.0.0")?
            .set_default("port", 8080)?
            .set_default("retry.max_attempts", 3)?
            .set_default("retry.initial_wait_seconds", 1.0)?
            .set_default("retry.multiplier", 2.0)?
            .set_default("retry.max_wait_seconds", 60.0)?
            .set_default("circuit_breaker.fail_max", 5)?
            .set_default("circuit_breaker.timeout_seconds", 60)?
            .set_default("circuit_breaker.success_threshold", 3)?
            .set_default("event_bus.max_queue_size", 1000)?
            .set_default("event_bus.max_retries", 3)?;

        let config = builder.build()?;
        let app: AppConfig = config.try_deserialize()?;
        if app.secret_key.trim().is_empty() {
            return Err(ConfigError::Message(
                "SECRET_KEY must be set; refusing to start without a signing secret".into(),
            ));
        }
        Ok(app)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct RetryConfig {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_wait")]
    pub initial_wait_seconds: f64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
    #[serde(default = "default_max_wait")]
    pub max_wait_seconds: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_wait_seconds: default_initial_wait(),
            multiplier: default_multiplier(),
            max_wait_seconds: default_max_wait(),
        }
    }
}

impl RetryConfig {
    pub fn initial_wait(&self) -> Duration {
        Duration::from_secs_f64(self.initial_wait_seconds)
    }

    pub fn max_wait(&self) -> Duration {
        Duration::from_secs_f64(self.max_wait_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct CircuitBreakerConfig {
    #[serde(default = "default_fail_max")]
    pub fail_max: u32,
    #[serde(default = "default_cb_timeout")]
    pub timeout_seconds: u64,
    #[serde(default = "default_success_threshold")]
    pub success_threshold: u32,
}

impl Default for CircuitBreakerConfig {
    fn default() -> Self {
        Self {
            fail_max: default_fail_max(),
            timeout_seconds: default_cb_timeout(),
            success_threshold: default_success_threshold(),
        }
    }
}

impl CircuitBreakerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct EventBusConfig {
    #[serde(default = "default_max_queue_size")]
    pub max_queue_size: usize,
    #[serde(default = "default_bus_max_retries")]
    pub max_retries: u32,
}

impl Default for EventBusConfig {
    fn default() -> Self {
        Self {
            max_queue_size: default_max_queue_size(),
            max_retries: default_bus_max_retries(),
        }
    }
}

fn default_approval_timeout_seconds() -> i64 {
    3600
}
fn default_timeout_check_interval_seconds() -> u64 {
    10
}
fn default_idempotency_key_expiry_hours() -> i64 {
    24
}
fn default_host() -> String {
    "0.0.0.0".to_string()
}
fn default_port() -> u16 {
    8080
}
fn default_max_attempts() -> u32 {
    3
}
fn default_initial_wait() -> f64 {
    1.0
}
fn default_multiplier() -> f64 {
    2.0
}
fn default_max_wait() -> f64 {
    60.0
}
fn default_fail_max() -> u32 {
    5
}
fn default_cb_timeout() -> u64 {
    60
}
fn default_success_threshold() -> u32 {
    3
}
fn default_max_queue_size() -> usize {
    1000
}
fn default_bus_max_retries() -> u32 {
    3
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refuses_to_load_without_secret_key() {
        std::env::remove_var("SECRET_KEY");
        std::env::set_var("DATABASE_URL", "postgres://localhost/hiloop_test");
        let result = AppConfig::load();
        assert!(result.is_err());
        std::env::remove_var("DATABASE_URL");
    }

    #[test]
    fn retry_config_defaults_match_spec() {
        let retry = RetryConfig::default();
        assert_eq!(retry.max_attempts, 3);
        assert_eq!(retry.initial_wait(), Duration::from_secs(1));
        assert_eq!(retry.max_wait(), Duration::from_secs(60));
    }

    #[test]
    fn circuit_breaker_defaults_match_spec() {
        let cb = CircuitBreakerConfig::default();
        assert_eq!(cb.fail_max, 5);
        assert_eq!(cb.timeout(), Duration::from_secs(60));
    }
}
