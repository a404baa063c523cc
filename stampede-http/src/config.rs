//! HTTP configuration

use serde::{Deserialize, Serialize};
use stampede_config::domains::http::HttpConfig as ConfigHttpConfig;
use std::time::Duration;

/// HTTP client configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpConfig {
    /// Default per-request timeout
    pub timeout: Duration,

    /// Maximum number of redirects to follow
    pub max_redirects: u32,

    /// User agent string
    pub user_agent: String,

    /// Whether to verify SSL certificates
    pub verify_ssl: bool,

    /// Maximum idle pooled connections per host
    pub max_idle_per_host: usize,

    /// How long an idle pooled connection is kept
    pub idle_timeout: Duration,

    /// TCP connect timeout
    pub connect_timeout: Duration,
}

impl Default for HttpConfig {
    fn default() -> Self {
        ConfigHttpConfig::default().into()
    }
}

impl From<ConfigHttpConfig> for HttpConfig {
    fn from(config: ConfigHttpConfig) -> Self {
        Self {
            timeout: config.timeout,
            max_redirects: config.max_redirects,
            user_agent: config.user_agent,
            verify_ssl: config.verify_ssl,
            max_idle_per_host: config.connection_pool.max_idle_per_host,
            idle_timeout: config.connection_pool.idle_timeout,
            connect_timeout: config.connection_pool.connection_timeout,
        }
    }
}
