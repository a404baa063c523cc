//! CLI argument parsing definitions

use crate::scenarios::ScenarioKind;
use clap::{Parser, Subcommand, ValueEnum};
use stampede_engine::Stage;
use std::path::PathBuf;

#[derive(Parser)]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, value_name = "PATH", global = true)]
    pub config: Option<PathBuf>,

    /// Set the log level (trace, debug, info, warn, error)
    #[arg(long, value_name = "LEVEL", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Run a scenario against the target system
    Run {
        #[command(flatten)]
        run: RunArgs,

        /// Print the report as JSON instead of text
        #[arg(long)]
        json: bool,

        /// Also write the JSON report to this file
        #[arg(long, value_name = "PATH")]
        output: Option<PathBuf>,
    },

    /// Check a scenario, its stages and thresholds without sending traffic
    Validate {
        #[command(flatten)]
        run: RunArgs,
    },

    /// List the built-in scenarios
    Scenarios,

    /// Configuration management commands
    Config {
        #[command(subcommand)]
        config_cmd: ConfigCommands,
    },
}

/// Options shared by `run` and `validate`
#[derive(clap::Args, Debug, Clone)]
pub struct RunArgs {
    /// Built-in scenario to run
    #[arg(long, value_enum, default_value = "load")]
    pub scenario: ScenarioKind,

    /// Base URL of the system under test (overrides config and BASE_URL)
    #[arg(long, value_name = "URL")]
    pub base_url: Option<String>,

    /// Seed for every virtual user's random source
    #[arg(long, value_name = "SEED")]
    pub seed: Option<u64>,

    /// Replace the stage list, e.g. --stage 30s:10 --stage 1m:10 --stage 10s:0
    #[arg(long = "stage", value_name = "DURATION:TARGET", value_parser = parse_stage)]
    pub stages: Vec<Stage>,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Validate a configuration file
    Validate {
        /// Path to the configuration file
        #[arg(long, value_name = "PATH")]
        config_file: PathBuf,
    },

    /// Generate a sample configuration file
    Generate {
        /// Output file path
        #[arg(long, value_name = "PATH")]
        output: PathBuf,

        /// Overwrite existing file
        #[arg(long)]
        force: bool,
    },

    /// Show current configuration in use
    Show {
        /// Output format
        #[arg(long, value_enum, default_value = "yaml")]
        format: OutputFormat,
    },
}

#[derive(ValueEnum, Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Yaml,
    Json,
}

/// Parse `DURATION:TARGET`, with the duration in humantime syntax
pub fn parse_stage(value: &str) -> Result<Stage, String> {
    let (duration, target) = value
        .rsplit_once(':')
        .ok_or_else(|| format!("expected DURATION:TARGET, got '{}'", value))?;
    let duration = humantime::parse_duration(duration.trim())
        .map_err(|e| format!("invalid stage duration '{}': {}", duration, e))?;
    let target = target
        .trim()
        .parse::<u64>()
        .map_err(|e| format!("invalid stage target '{}': {}", target, e))?;
    Ok(Stage::new(duration, target))
}
