//! Configuration loading and environment variable handling

use crate::domains::logging::{LogFormat, LogLevel};
use crate::domains::StampedeConfig;
use crate::error::{ConfigError, ConfigResult};
use std::fmt::Display;
use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

/// Un-prefixed variable honoured for the target address, as workload scripts expect
pub const BASE_URL_VAR: &str = "BASE_URL";

/// Loads [`StampedeConfig`] from YAML and `<PREFIX>_*` environment overrides
///
/// | Variable | Field |
/// |---|---|
/// | `RUN_NAME` | `run.name` |
/// | `SEED` | `run.seed` |
/// | `GRACEFUL_STOP` | `run.graceful_stop` |
/// | `BASE_URL` (then plain `BASE_URL`) | `target.base_url` |
/// | `HTTP_TIMEOUT` | `http.timeout` |
/// | `HTTP_USER_AGENT` | `http.user_agent` |
/// | `HTTP_VERIFY_SSL` | `http.verify_ssl` |
/// | `LOG_LEVEL` | `logging.level` |
/// | `LOG_FORMAT` | `logging.format` |
///
/// Durations accept humantime (`1m30s`) or a bare number of seconds.
pub struct ConfigLoader {
    prefix: String,
}

impl ConfigLoader {
    /// Create a new config loader with the `STAMPEDE` prefix
    pub fn new() -> Self {
        Self::with_prefix("STAMPEDE")
    }

    pub fn with_prefix(prefix: impl Into<String>) -> Self {
        Self {
            prefix: prefix.into(),
        }
    }

    /// Load configuration from a YAML file with environment overrides
    pub fn from_file(&self, path: impl AsRef<Path>) -> ConfigResult<StampedeConfig> {
        let path = path.as_ref();
        log::debug!("Reading configuration from {}", path.display());
        let content = std::fs::read_to_string(path)?;
        self.from_yaml_str(&content)
    }

    /// Load configuration from YAML text with environment overrides
    pub fn from_yaml_str(&self, content: &str) -> ConfigResult<StampedeConfig> {
        let mut config: StampedeConfig = serde_yaml::from_str(content)?;
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load configuration from environment variables only
    pub fn from_env(&self) -> ConfigResult<StampedeConfig> {
        let mut config = StampedeConfig::default();
        self.apply_env_overrides(&mut config)?;
        config.validate_all()?;
        Ok(config)
    }

    /// Load from a file when one is given, otherwise from the environment
    pub fn load(&self, config_path: Option<impl AsRef<Path>>) -> ConfigResult<StampedeConfig> {
        match config_path {
            Some(path) => self.from_file(path),
            None => self.from_env(),
        }
    }

    fn apply_env_overrides(&self, config: &mut StampedeConfig) -> ConfigResult<()> {
        let run = &mut config.run;
        if let Some(name) = self.env("RUN_NAME") {
            run.name = name;
        }
        if let Some(seed) = self.env_parse::<u64>("SEED")? {
            run.seed = Some(seed);
        }
        if let Some(grace) = self.env_duration("GRACEFUL_STOP")? {
            run.graceful_stop = grace;
        }

        // the prefixed variable wins over plain BASE_URL
        if let Some(base_url) = self
            .env("BASE_URL")
            .or_else(|| std::env::var(BASE_URL_VAR).ok())
        {
            log::debug!("Target base URL from environment: {}", base_url);
            config.target.base_url = base_url;
        }

        let http = &mut config.http;
        if let Some(timeout) = self.env_duration("HTTP_TIMEOUT")? {
            http.timeout = timeout;
        }
        if let Some(user_agent) = self.env("HTTP_USER_AGENT") {
            http.user_agent = user_agent;
        }
        if let Some(verify_ssl) = self.env_parse::<bool>("HTTP_VERIFY_SSL")? {
            http.verify_ssl = verify_ssl;
        }

        let logging = &mut config.logging;
        if let Some(level) = self.env_parse::<LogLevel>("LOG_LEVEL")? {
            logging.level = level;
        }
        if let Some(format) = self.env_parse::<LogFormat>("LOG_FORMAT")? {
            logging.format = format;
        }

        Ok(())
    }

    /// Prefixed environment variable, if set
    fn env(&self, name: &str) -> Option<String> {
        std::env::var(format!("{}_{}", self.prefix, name)).ok()
    }

    fn env_parse<T>(&self, name: &str) -> ConfigResult<Option<T>>
    where
        T: FromStr,
        T::Err: Display,
    {
        self.env(name)
            .map(|value| {
                value.parse::<T>().map_err(|e| {
                    ConfigError::EnvError(format!("Invalid {}_{}: {}", self.prefix, name, e))
                })
            })
            .transpose()
    }

    fn env_duration(&self, name: &str) -> ConfigResult<Option<Duration>> {
        self.env(name)
            .map(|value| {
                parse_duration(&value).map_err(|e| {
                    ConfigError::EnvError(format!("Invalid {}_{}: {}", self.prefix, name, e))
                })
            })
            .transpose()
    }
}

impl Default for ConfigLoader {
    fn default() -> Self {
        Self::new()
    }
}

/// `"30"` is thirty seconds; anything else goes through humantime
fn parse_duration(value: &str) -> Result<Duration, String> {
    let value = value.trim();
    if let Ok(seconds) = value.parse::<u64>() {
        return Ok(Duration::from_secs(seconds));
    }
    humantime::parse_duration(value).map_err(|e| e.to_string())
}
