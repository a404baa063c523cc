//! Domain-specific configuration modules

pub mod http;
pub mod logging;
pub mod run;
pub mod target;

use crate::error::ConfigResult;
use crate::validation::Validatable;
use serde::{Deserialize, Serialize};

/// Main Stampede configuration combining all domains
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
#[serde(default)]
pub struct StampedeConfig {
    /// Run profile: stages, thresholds and run timing
    #[serde(default)]
    pub run: run::RunConfig,

    /// System under test
    #[serde(default)]
    pub target: target::TargetConfig,

    /// HTTP client configuration
    #[serde(default)]
    pub http: http::HttpConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: logging::LoggingConfig,
}

impl StampedeConfig {
    /// Validate all domain configurations
    pub fn validate_all(&self) -> ConfigResult<()> {
        self.run.validate()?;
        self.target.validate()?;
        self.http.validate()?;
        self.logging.validate()?;
        Ok(())
    }

    /// Generate a sample configuration file
    pub fn generate_sample() -> String {
        let mut config = StampedeConfig::default();
        config.run = run::RunConfig::sample();
        serde_yaml::to_string(&config)
            .unwrap_or_else(|_| "# Failed to generate sample config".to_string())
    }
}
