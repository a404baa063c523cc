//! Logging configuration
//!
//! Logs always go to stderr or a file; stdout is reserved for run reports.

use crate::error::ConfigResult;
use crate::validation::{validate_required_string, Validatable};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Global level, overridden by `--log-level`
    pub level: LogLevel,

    pub format: LogFormat,

    /// Where log lines go, each optionally narrowed to its own level
    #[serde(default = "default_targets")]
    pub targets: Vec<LogTarget>,

    /// Add file and line to every event
    pub include_location: bool,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Error,
    Warn,
    #[default]
    Info,
    Debug,
    Trace,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    Json,
    #[default]
    Text,
    Compact,
    Pretty,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum LogTarget {
    /// Human readable output on stderr
    Console {
        #[serde(default)]
        level: Option<LogLevel>,
    },
    /// Appended to a single file; the directory is created on startup
    File {
        path: String,
        #[serde(default)]
        level: Option<LogLevel>,
    },
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: LogLevel::default(),
            format: LogFormat::default(),
            targets: default_targets(),
            include_location: false,
        }
    }
}

impl LogLevel {
    const ALL: [LogLevel; 5] = [
        LogLevel::Error,
        LogLevel::Warn,
        LogLevel::Info,
        LogLevel::Debug,
        LogLevel::Trace,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogLevel::Error => "error",
            LogLevel::Warn => "warn",
            LogLevel::Info => "info",
            LogLevel::Debug => "debug",
            LogLevel::Trace => "trace",
        }
    }
}

impl LogFormat {
    const ALL: [LogFormat; 4] = [
        LogFormat::Json,
        LogFormat::Text,
        LogFormat::Compact,
        LogFormat::Pretty,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Text => "text",
            LogFormat::Compact => "compact",
            LogFormat::Pretty => "pretty",
        }
    }
}

impl fmt::Display for LogLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LogLevel {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        if s == "warning" {
            return Ok(LogLevel::Warn);
        }
        LogLevel::ALL
            .into_iter()
            .find(|level| level.as_str() == s)
            .ok_or_else(|| format!("unknown log level '{}'", s))
    }
}

impl FromStr for LogFormat {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let s = s.trim().to_lowercase();
        LogFormat::ALL
            .into_iter()
            .find(|format| format.as_str() == s)
            .ok_or_else(|| format!("unknown log format '{}'", s))
    }
}

impl Validatable for LoggingConfig {
    fn validate(&self) -> ConfigResult<()> {
        if self.targets.is_empty() {
            return Err(self.validation_error("At least one log target must be configured"));
        }
        self.targets.iter().try_for_each(|target| target.validate())
    }

    fn domain_name(&self) -> &'static str {
        "logging"
    }
}

impl Validatable for LogTarget {
    fn validate(&self) -> ConfigResult<()> {
        match self {
            LogTarget::Console { .. } => Ok(()),
            LogTarget::File { path, .. } => {
                validate_required_string(path, "path", self.domain_name())
            }
        }
    }

    fn domain_name(&self) -> &'static str {
        "logging.target"
    }
}

fn default_targets() -> Vec<LogTarget> {
    vec![LogTarget::Console { level: None }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_level_and_format() {
        assert_eq!("INFO".parse::<LogLevel>(), Ok(LogLevel::Info));
        assert_eq!(" warning".parse::<LogLevel>(), Ok(LogLevel::Warn));
        assert_eq!("Pretty".parse::<LogFormat>(), Ok(LogFormat::Pretty));

        let err = "verbose".parse::<LogLevel>().unwrap_err();
        assert_eq!(err, "unknown log level 'verbose'");
        assert!("xml".parse::<LogFormat>().is_err());
    }

    #[test]
    fn test_targets_from_yaml() {
        let config: LoggingConfig = serde_yaml::from_str(
            "level: debug\ntargets:\n  - type: file\n    path: logs/run.log\n    level: warn\n",
        )
        .unwrap();

        assert_eq!(config.level, LogLevel::Debug);
        assert_eq!(config.format, LogFormat::Text);
        assert!(matches!(
            &config.targets[..],
            [LogTarget::File { path, level: Some(LogLevel::Warn) }] if path == "logs/run.log"
        ));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_logging_config_validation() {
        let mut config = LoggingConfig::default();
        assert!(config.validate().is_ok());

        config.targets.clear();
        assert!(config.validate().is_err());

        config.targets.push(LogTarget::File {
            path: " ".to_string(),
            level: None,
        });
        assert!(config.validate().is_err());
    }
}
