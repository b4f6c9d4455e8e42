use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Debug, thiserror::Error, PartialEq)]
pub enum ConfigError {
    #[error("Invalid value for field '{field}': {value} - {reason}")]
    InvalidValue {
        field: String,
        value: String,
        reason: String,
    },

    #[error("Missing required field: {field}")]
    MissingRequired { field: String },

    #[error("Failed to parse op attributes: {0}")]
    Attributes(String),
}

pub type ConfigResult<T> = Result<T, ConfigError>;

pub const DEFAULT_TIMEOUT_SECS: u64 = 30;
pub const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 5;
pub const DEFAULT_MAX_PENDING_RESULTS: usize = 1024;

/// Transport settings shared by every remote call made from one [`crate::RpcContext`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RpcClientConfig {
    /// Upper bound on a whole request, including reading the response body.
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
    /// Worker threads for the context's runtime.
    #[serde(default = "default_worker_threads")]
    pub worker_threads: usize,
    /// Replies kept for later `rpc_result` lookups; the oldest are dropped first.
    #[serde(default = "default_max_pending_results")]
    pub max_pending_results: usize,
}

fn default_timeout_secs() -> u64 {
    DEFAULT_TIMEOUT_SECS
}

fn default_connect_timeout_secs() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

fn default_worker_threads() -> usize {
    2
}

fn default_max_pending_results() -> usize {
    DEFAULT_MAX_PENDING_RESULTS
}

impl Default for RpcClientConfig {
    fn default() -> Self {
        RpcClientConfig {
            timeout_secs: default_timeout_secs(),
            connect_timeout_secs: default_connect_timeout_secs(),
            worker_threads: default_worker_threads(),
            max_pending_results: default_max_pending_results(),
        }
    }
}

impl RpcClientConfig {
    /// Sets the request timeout. The connect timeout is lowered to fit if needed.
    pub fn with_timeout_secs(mut self, secs: u64) -> Self {
        self.timeout_secs = secs;
        self.connect_timeout_secs = self.connect_timeout_secs.min(secs);
        self
    }

    pub fn with_max_pending_results(mut self, max: usize) -> Self {
        self.max_pending_results = max;
        self
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs)
    }

    pub fn validate(&self) -> ConfigResult<()> {
        if self.timeout_secs == 0 {
            return Err(ConfigError::InvalidValue {
                field: "timeout_secs".to_string(),
                value: "0".to_string(),
                reason: "a bounded, non-zero timeout is required".to_string(),
            });
        }
        if self.connect_timeout_secs == 0 || self.connect_timeout_secs > self.timeout_secs {
            return Err(ConfigError::InvalidValue {
                field: "connect_timeout_secs".to_string(),
                value: self.connect_timeout_secs.to_string(),
                reason: format!("must be between 1 and timeout_secs ({})", self.timeout_secs),
            });
        }
        if self.worker_threads == 0 {
            return Err(ConfigError::InvalidValue {
                field: "worker_threads".to_string(),
                value: "0".to_string(),
                reason: "at least one worker thread is required".to_string(),
            });
        }
        if self.max_pending_results == 0 {
            return Err(ConfigError::InvalidValue {
                field: "max_pending_results".to_string(),
                value: "0".to_string(),
                reason: "at least one reply must be retainable".to_string(),
            });
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_are_valid() {
        let config = RpcClientConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.timeout(), Duration::from_secs(30));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: RpcClientConfig = serde_json::from_str(r#"{"timeout_secs": 10}"#).unwrap();
        assert_eq!(config.timeout_secs, 10);
        assert_eq!(config.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
    }

    #[test]
    fn test_zero_timeout_rejected() {
        let config = RpcClientConfig::default().with_timeout_secs(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "timeout_secs"
        ));
    }

    #[test]
    fn test_connect_timeout_must_fit() {
        let config = RpcClientConfig {
            timeout_secs: 2,
            connect_timeout_secs: 5,
            worker_threads: 1,
            ..Default::default()
        };
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_short_timeout_lowers_connect_timeout() {
        let config = RpcClientConfig::default().with_timeout_secs(2);
        assert_eq!(config.connect_timeout_secs, 2);
        assert!(config.validate().is_ok());

        let long = RpcClientConfig::default().with_timeout_secs(60);
        assert_eq!(long.connect_timeout_secs, DEFAULT_CONNECT_TIMEOUT_SECS);
    }

    #[test]
    fn test_zero_result_bound_rejected() {
        let config = RpcClientConfig::default().with_max_pending_results(0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::InvalidValue { ref field, .. }) if field == "max_pending_results"
        ));
    }
}
