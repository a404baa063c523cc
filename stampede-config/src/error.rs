//! Configuration error types

use thiserror::Error;

/// Configuration result type
pub type ConfigResult<T> = Result<T, ConfigError>;

/// Configuration errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file missing or unreadable
    #[error("Failed to read config file: {0}")]
    FileReadError(#[from] std::io::Error),

    /// YAML parsing error
    #[error("Failed to parse config: {0}")]
    ParseError(#[from] serde_yaml::Error),

    /// An environment override that does not parse
    #[error("Environment variable error: {0}")]
    EnvError(String),

    /// A field that parsed but failed its domain's validation
    #[error("Domain configuration error in {domain}: {message}")]
    DomainError { domain: String, message: String },
}
