//! HTTP client settings for traffic towards the system under test

use crate::error::ConfigResult;
use crate::validation::{validate_positive, validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Client used by every virtual user
///
/// One pooled client is shared by the whole run, so the pool is sized for the
/// peak VU count rather than for a single caller.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    /// Per-request timeout, applied unless a request sets its own
    #[serde(with = "humantime_serde", default = "default_timeout")]
    pub timeout: Duration,

    /// Maximum number of redirects to follow
    #[serde(default = "default_max_redirects")]
    pub max_redirects: u32,

    #[serde(default = "default_user_agent")]
    pub user_agent: String,

    #[serde(default = "default_verify_ssl")]
    pub verify_ssl: bool,

    #[serde(default)]
    pub connection_pool: ConnectionPoolConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectionPoolConfig {
    /// Idle keep-alive connections kept per host; roughly the peak VU count
    #[serde(default = "default_max_idle_per_host")]
    pub max_idle_per_host: usize,

    #[serde(with = "humantime_serde", default = "default_idle_timeout")]
    pub idle_timeout: Duration,

    /// TCP connect timeout
    #[serde(with = "humantime_serde", default = "default_connection_timeout")]
    pub connection_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            timeout: default_timeout(),
            max_redirects: default_max_redirects(),
            user_agent: default_user_agent(),
            verify_ssl: default_verify_ssl(),
            connection_pool: ConnectionPoolConfig::default(),
        }
    }
}

impl Default for ConnectionPoolConfig {
    fn default() -> Self {
        Self {
            max_idle_per_host: default_max_idle_per_host(),
            idle_timeout: default_idle_timeout(),
            connection_timeout: default_connection_timeout(),
        }
    }
}

impl Validatable for HttpConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(self.timeout.as_millis(), "timeout", self.domain_name())?;
        validate_required_string(&self.user_agent, "user_agent", self.domain_name())?;
        self.connection_pool.validate()
    }

    fn domain_name(&self) -> &'static str {
        "http"
    }
}

impl Validatable for ConnectionPoolConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_positive(
            self.max_idle_per_host,
            "max_idle_per_host",
            self.domain_name(),
        )?;
        validate_positive(
            self.connection_timeout.as_millis(),
            "connection_timeout",
            self.domain_name(),
        )
    }

    fn domain_name(&self) -> &'static str {
        "http.connection_pool"
    }
}

fn default_timeout() -> Duration {
    Duration::from_secs(60)
}

fn default_max_redirects() -> u32 {
    10
}

fn default_user_agent() -> String {
    format!("Stampede/{}", env!("CARGO_PKG_VERSION"))
}

fn default_verify_ssl() -> bool {
    true
}

fn default_max_idle_per_host() -> usize {
    200
}

fn default_idle_timeout() -> Duration {
    Duration::from_secs(90)
}

fn default_connection_timeout() -> Duration {
    Duration::from_secs(10)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_http_config_defaults() {
        let config = HttpConfig::default();
        assert_eq!(config.timeout, Duration::from_secs(60));
        assert!(config.user_agent.starts_with("Stampede/"));
        assert!(config.verify_ssl);
        assert_eq!(config.connection_pool.max_idle_per_host, 200);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_http_config_validation() {
        let mut config = HttpConfig::default();
        config.timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        // sub-second timeouts are fine
        config.timeout = Duration::from_millis(500);
        assert!(config.validate().is_ok());

        config.connection_pool.connection_timeout = Duration::ZERO;
        assert!(config.validate().is_err());

        config = HttpConfig::default();
        config.user_agent = String::new();
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_durations_use_humantime() {
        let config: HttpConfig =
            serde_yaml::from_str("timeout: 2s\nconnection_pool:\n  idle_timeout: 1m\n").unwrap();
        assert_eq!(config.timeout, Duration::from_secs(2));
        assert_eq!(config.connection_pool.idle_timeout, Duration::from_secs(60));
        assert_eq!(config.connection_pool.connection_timeout, Duration::from_secs(10));
    }
}
