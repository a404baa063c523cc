//! System-under-test configuration

use crate::error::ConfigResult;
use crate::validation::{validate_url, Validatable};
use serde::{Deserialize, Serialize};

/// Fallback used when neither the config file nor the environment names a target
pub const DEFAULT_BASE_URL: &str = "http://localhost:8080";

/// Target system configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TargetConfig {
    /// Base address every workflow path is joined onto
    #[serde(default = "default_base_url")]
    pub base_url: String,
}

impl Default for TargetConfig {
    fn default() -> Self {
        Self {
            base_url: default_base_url(),
        }
    }
}

impl TargetConfig {
    /// Base URL without a trailing slash, ready for path joining
    pub fn normalized_base_url(&self) -> &str {
        self.base_url.trim_end_matches('/')
    }
}

impl Validatable for TargetConfig {
    fn validate(&self) -> ConfigResult<()> {
        validate_url(&self.base_url, "base_url", self.domain_name())
    }

    fn domain_name(&self) -> &'static str {
        "target"
    }
}

fn default_base_url() -> String {
    DEFAULT_BASE_URL.to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_target_defaults() {
        let config = TargetConfig::default();
        assert_eq!(config.base_url, "http://localhost:8080");
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_normalized_base_url() {
        let config = TargetConfig {
            base_url: "http://api.internal:9000/".to_string(),
        };
        assert_eq!(config.normalized_base_url(), "http://api.internal:9000");
    }

    #[test]
    fn test_invalid_base_url() {
        let config = TargetConfig {
            base_url: "localhost:8080".to_string(),
        };
        assert!(config.validate().is_err());
    }
}
