//! Domain-driven configuration management for Stampede
//!
//! Configuration is split by functional domain (run profile, target system,
//! HTTP client, logging), each with its own defaults and validation, and can
//! be loaded from YAML with environment variable overrides.

pub mod error;
pub mod loader;
pub mod validation;

// Domain-specific configuration modules
pub mod domains;

// Re-export main types
pub use error::{ConfigError, ConfigResult};
pub use loader::ConfigLoader;

// Re-export domain configurations
pub use domains::{
    http::HttpConfig,
    logging::LoggingConfig,
    run::{RunConfig, StageConfig, ThresholdConfig},
    target::TargetConfig,
    StampedeConfig,
};
