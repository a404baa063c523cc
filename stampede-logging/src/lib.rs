//! Logging initialisation for Stampede
//!
//! All crates log through `tracing`; this crate installs the global
//! subscriber once, from the [`LoggingConfig`] domain or from a bare level
//! string.

pub mod init;

pub use init::{build_env_filter, init_logging_from_config, init_simple_tracing};
pub use stampede_config::LoggingConfig;
