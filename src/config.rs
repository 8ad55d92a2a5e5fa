//! YAML configuration file support.
//!
//! Lets deployments define the cache tiers, breaker defaults, and rate
//! limit budget in a single YAML file loaded at startup. Every knob is
//! fixed once the components are constructed; there is no runtime
//! reconfiguration surface.
//!
//! ## Example YAML Configuration
//!
//! ```yaml
//! version: "1.0"
//! name: "marketplace sync workers"
//! redis_url: "redis://localhost:6379/0"
//!
//! cache:
//!   cache_dir: "cache"
//!   enable_memory: true
//!   enable_remote: true
//!   enable_file: true
//!   memory_max_ttl: 300
//!   remote_max_ttl: 86400
//!   file_max_ttl: 2592000
//!
//! breaker:
//!   failure_threshold: 5
//!   recovery_timeout: 60
//!
//! limiter:
//!   max_requests: 8
//!   window: 1
//!   key_prefix: "rate_limit"
//! ```

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::breaker::CircuitBreakerConfig;
use crate::cache::CacheConfig;
use crate::limiter::RateLimiterConfig;

/// Errors that can occur when loading configuration files.
#[derive(Debug, Error)]
pub enum ConfigLoadError {
    #[error("failed to read config file: {0}")]
    FileRead(#[from] std::io::Error),

    #[error("failed to parse YAML: {0}")]
    YamlParse(#[from] serde_yaml::Error),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("unsupported config version: {0}")]
    UnsupportedVersion(String),
}

/// Top-level configuration for the resilience components.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct BallastConfig {
    /// Configuration format version.
    pub version: String,

    /// Optional configuration name/description.
    #[serde(default)]
    pub name: Option<String>,

    /// Connection string for the shared coordination store. Absent means
    /// the cache runs memory+file and the limiter coordinates only
    /// within this process.
    #[serde(default)]
    pub redis_url: Option<String>,

    #[serde(default)]
    pub cache: CacheConfig,

    /// Registry default; individual breakers may override at creation.
    #[serde(default)]
    pub breaker: CircuitBreakerConfig,

    #[serde(default)]
    pub limiter: RateLimiterConfig,
}

impl BallastConfig {
    /// Load a YAML configuration file from the given path.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigLoadError> {
        let content = fs::read_to_string(path)?;
        Self::from_yaml(&content)
    }

    /// Parse YAML configuration from a string.
    pub fn from_yaml(yaml: &str) -> Result<Self, ConfigLoadError> {
        let config: BallastConfig = serde_yaml::from_str(yaml)?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<(), ConfigLoadError> {
        match self.version.as_str() {
            "1.0" | "1" => Ok(()),
            v => Err(ConfigLoadError::UnsupportedVersion(v.to_string())),
        }?;

        if !self.cache.enable_memory && !self.cache.enable_remote && !self.cache.enable_file {
            return Err(ConfigLoadError::Validation(
                "cache must enable at least one tier".to_string(),
            ));
        }
        if self.cache.memory_max_ttl.is_zero()
            || self.cache.remote_max_ttl.is_zero()
            || self.cache.file_max_ttl.is_zero()
        {
            return Err(ConfigLoadError::Validation(
                "cache tier TTL ceilings must be >= 1 second".to_string(),
            ));
        }

        if self.breaker.failure_threshold == 0 {
            return Err(ConfigLoadError::Validation(
                "breaker.failure_threshold must be >= 1".to_string(),
            ));
        }

        if self.limiter.max_requests == 0 {
            return Err(ConfigLoadError::Validation(
                "limiter.max_requests must be >= 1".to_string(),
            ));
        }
        if self.limiter.window.is_zero() {
            return Err(ConfigLoadError::Validation(
                "limiter.window must be >= 1 second".to_string(),
            ));
        }
        if self.limiter.key_prefix.is_empty() {
            return Err(ConfigLoadError::Validation(
                "limiter.key_prefix must not be empty".to_string(),
            ));
        }

        Ok(())
    }
}

impl Default for BallastConfig {
    fn default() -> Self {
        Self {
            version: "1.0".to_string(),
            name: None,
            redis_url: None,
            cache: CacheConfig::default(),
            breaker: CircuitBreakerConfig::default(),
            limiter: RateLimiterConfig::default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use std::time::Duration;
    use tempfile::NamedTempFile;

    #[test]
    fn load_valid_yaml() {
        let yaml = r#"
version: "1.0"
name: "sync workers"
redis_url: "redis://localhost:6379/0"
breaker:
  failure_threshold: 3
  recovery_timeout: 30
limiter:
  max_requests: 5
  window: 2
"#;

        let config = BallastConfig::from_yaml(yaml).unwrap();
        assert_eq!(config.name, Some("sync workers".to_string()));
        assert_eq!(config.redis_url, Some("redis://localhost:6379/0".to_string()));
        assert_eq!(config.breaker.failure_threshold, 3);
        assert_eq!(config.breaker.recovery_timeout, Duration::from_secs(30));
        assert_eq!(config.limiter.max_requests, 5);
        assert_eq!(config.limiter.window, Duration::from_secs(2));
    }

    #[test]
    fn missing_sections_fall_back_to_defaults() {
        let config = BallastConfig::from_yaml("version: \"1\"").unwrap();
        assert!(config.redis_url.is_none());
        assert_eq!(config.breaker.failure_threshold, 5);
        assert_eq!(config.limiter.max_requests, 8);
        assert_eq!(config.limiter.key_prefix, "rate_limit");
        assert_eq!(config.cache.memory_max_ttl, Duration::from_secs(300));
    }

    #[test]
    fn load_from_file() {
        let yaml = r#"
version: "1.0"
cache:
  cache_dir: "/tmp/ballast-test-cache"
"#;
        let mut temp_file = NamedTempFile::new().unwrap();
        temp_file.write_all(yaml.as_bytes()).unwrap();

        let config = BallastConfig::from_file(temp_file.path()).unwrap();
        assert_eq!(
            config.cache.cache_dir.to_str().unwrap(),
            "/tmp/ballast-test-cache"
        );
    }

    #[test]
    fn rejects_unknown_version() {
        let result = BallastConfig::from_yaml("version: \"2.0\"");
        assert!(matches!(
            result,
            Err(ConfigLoadError::UnsupportedVersion(_))
        ));
    }

    #[test]
    fn rejects_zero_failure_threshold() {
        let yaml = r#"
version: "1.0"
breaker:
  failure_threshold: 0
"#;
        let err = BallastConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("failure_threshold"));
    }

    #[test]
    fn rejects_zero_budget() {
        let yaml = r#"
version: "1.0"
limiter:
  max_requests: 0
"#;
        let err = BallastConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("max_requests"));
    }

    #[test]
    fn rejects_fully_disabled_cache() {
        let yaml = r#"
version: "1.0"
cache:
  enable_memory: false
  enable_remote: false
  enable_file: false
"#;
        let err = BallastConfig::from_yaml(yaml).unwrap_err();
        assert!(err.to_string().contains("at least one tier"));
    }
}
