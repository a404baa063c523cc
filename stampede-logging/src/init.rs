use anyhow::{Context, Result};
use stampede_config::domains::logging::{LogFormat, LogLevel, LogTarget};
use stampede_config::LoggingConfig;
use std::path::Path;
use tracing_subscriber::filter::LevelFilter;
use tracing_subscriber::fmt::MakeWriter;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use tracing_subscriber::{fmt, EnvFilter, Layer, Registry};

type BoxedLayer = Box<dyn Layer<Registry> + Send + Sync + 'static>;

/// Initialize logging from configuration
///
/// One formatting layer is installed per configured target, each optionally
/// narrowed to its own level. Calling this more than once is harmless: the
/// first subscriber stays in place.
pub fn init_logging_from_config(config: &LoggingConfig) -> Result<()> {
    if config.targets.is_empty() {
        return init_simple_tracing(config.level.as_str());
    }

    let layers = config
        .targets
        .iter()
        .map(|target| build_target_layer(target, config))
        .collect::<Result<Vec<_>>>()?;

    // Use try_init to avoid panic if global subscriber already set
    if tracing_subscriber::registry()
        .with(layers)
        .with(build_env_filter(config.level.as_str()))
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Initialize simple tracing for basic console output
///
/// Output goes to stderr so stdout stays free for reports.
pub fn init_simple_tracing(log_level: &str) -> Result<()> {
    if tracing_subscriber::fmt()
        .with_env_filter(build_env_filter(log_level))
        .with_writer(std::io::stderr)
        .try_init()
        .is_err()
    {
        tracing::debug!("Global tracing subscriber already initialized, skipping");
    }

    Ok(())
}

/// Parse a level or directive string, falling back to `RUST_LOG` and then `info`
pub fn build_env_filter(log_level: &str) -> EnvFilter {
    EnvFilter::try_new(log_level)
        .or_else(|_| EnvFilter::try_from_default_env())
        .unwrap_or_else(|_| EnvFilter::new("info"))
}

fn build_target_layer(target: &LogTarget, config: &LoggingConfig) -> Result<BoxedLayer> {
    let (layer, level) = match target {
        LogTarget::Console { level } => (
            format_layer(config.format, std::io::stderr, true, config.include_location),
            *level,
        ),
        LogTarget::File { path, level } => {
            let path = Path::new(path);
            let directory = match path.parent() {
                Some(parent) if !parent.as_os_str().is_empty() => parent,
                _ => Path::new("."),
            };
            let file_name = path
                .file_name()
                .with_context(|| format!("Log file path has no file name: {}", path.display()))?;

            std::fs::create_dir_all(directory).with_context(|| {
                format!("Failed to create log directory {}", directory.display())
            })?;

            let appender = tracing_appender::rolling::never(directory, file_name);
            (
                format_layer(config.format, appender, false, config.include_location),
                *level,
            )
        }
    };

    Ok(match level {
        Some(level) => layer.with_filter(level_filter(level)).boxed(),
        None => layer,
    })
}

fn format_layer<W>(format: LogFormat, writer: W, ansi: bool, include_location: bool) -> BoxedLayer
where
    W: for<'w> MakeWriter<'w> + Send + Sync + 'static,
{
    let layer = fmt::layer()
        .with_writer(writer)
        .with_ansi(ansi)
        .with_file(include_location)
        .with_line_number(include_location);

    match format {
        LogFormat::Json => layer.json().boxed(),
        LogFormat::Compact => layer.compact().boxed(),
        LogFormat::Pretty => layer.pretty().boxed(),
        LogFormat::Text => layer.boxed(),
    }
}

fn level_filter(level: LogLevel) -> LevelFilter {
    match level {
        LogLevel::Error => LevelFilter::ERROR,
        LogLevel::Warn => LevelFilter::WARN,
        LogLevel::Info => LevelFilter::INFO,
        LogLevel::Debug => LevelFilter::DEBUG,
        LogLevel::Trace => LevelFilter::TRACE,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_env_filter_fallback() {
        let filter = build_env_filter("debug");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::DEBUG));

        let filter = build_env_filter("stampede_engine=trace,warn");
        assert_eq!(filter.max_level_hint(), Some(LevelFilter::TRACE));
    }

    #[test]
    fn test_level_filter_mapping() {
        assert_eq!(level_filter(LogLevel::Warn), LevelFilter::WARN);
        assert_eq!(level_filter(LogLevel::Trace), LevelFilter::TRACE);
    }

    #[test]
    fn test_file_target_creates_log_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("logs").join("run.log");

        let config = LoggingConfig {
            format: LogFormat::Json,
            targets: vec![
                LogTarget::Console { level: None },
                LogTarget::File {
                    path: path.to_string_lossy().into_owned(),
                    level: Some(LogLevel::Debug),
                },
            ],
            ..Default::default()
        };

        init_logging_from_config(&config).unwrap();
        assert!(path.exists());

        // A second initialisation keeps the first subscriber
        assert!(init_simple_tracing("info").is_ok());
    }
}
