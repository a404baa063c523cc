use anyhow::{Context, Result};
use clap::Parser;
use colored::*;
use stampede::cli::{Cli, Commands, ConfigCommands, OutputFormat, RunArgs};
use stampede::output;
use stampede::scenarios::ScenarioKind;
use stampede_config::{ConfigLoader, StampedeConfig};
use stampede_engine::{RunController, RunReport};
use stampede_http::{HttpClient, HttpManager};
use std::fs;
use std::path::PathBuf;
use std::sync::Arc;
use tracing::{debug, error, info, warn};

/// Exit status for configuration and engine errors
const EXIT_ERROR: i32 = 2;

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let code = match run(cli).await {
        Ok(code) => code,
        Err(e) => {
            eprintln!("{} {:#}", "❌ Error:".bright_red().bold(), e);
            EXIT_ERROR
        }
    };

    std::process::exit(code);
}

async fn run(cli: Cli) -> Result<i32> {
    let config = load_config(cli.config.as_ref())?;
    init_logging(&config, cli.log_level.as_ref());

    debug!("Stampede CLI starting");

    match cli.command {
        Commands::Run { run, json, output } => {
            run_command(config, &run, json, output.as_ref()).await
        }
        Commands::Validate { run } => {
            validate_command(config, &run)?;
            Ok(0)
        }
        Commands::Scenarios => {
            list_scenarios();
            Ok(0)
        }
        Commands::Config { config_cmd } => {
            match config_cmd {
                ConfigCommands::Validate { config_file } => handle_config_validate(&config_file)?,
                ConfigCommands::Generate { output, force } => {
                    handle_config_generate(&output, force)?
                }
                ConfigCommands::Show { format } => handle_config_show(&config, format)?,
            }
            Ok(0)
        }
    }
}

/// Load configuration from file or use defaults
fn load_config(config_path: Option<&PathBuf>) -> Result<StampedeConfig> {
    let loader = ConfigLoader::new();

    match config_path {
        Some(path) => {
            if path.exists() {
                loader
                    .from_file(path)
                    .context(format!("Failed to load configuration from {:?}", path))
            } else {
                eprintln!(
                    "Configuration file not found: {:?}. Using defaults.",
                    path
                );
                loader
                    .from_env()
                    .context("Failed to load configuration from environment")
            }
        }
        None => loader
            .from_env()
            .context("Failed to load configuration from environment"),
    }
}

/// Initialize logging from config, with the CLI level taking precedence
fn init_logging(config: &StampedeConfig, log_level: Option<&String>) {
    let mut logging_config = config.logging.clone();
    if let Some(level_str) = log_level {
        if let Ok(level) = level_str.parse() {
            logging_config.level = level;
        }
    }

    if let Err(e) = stampede_logging::init_logging_from_config(&logging_config) {
        // Fall back to simple tracing if structured logging fails
        eprintln!(
            "Failed to initialize structured logging: {}, falling back to simple tracing",
            e
        );
        let level = log_level
            .map(String::as_str)
            .unwrap_or_else(|| logging_config.level.as_str());
        if let Err(e) = stampede_logging::init_simple_tracing(level) {
            eprintln!("Failed to initialize tracing: {}", e);
        }
    }
}

/// Build the controller for a scenario with CLI overrides applied
fn build_controller(config: &StampedeConfig, args: &RunArgs) -> Result<RunController> {
    let scenario = args.scenario.scenario();

    let mut profile = scenario
        .profile(&config.run)
        .context("Invalid run profile")?;
    if !args.stages.is_empty() {
        profile.stages = args.stages.clone();
    }
    if let Some(seed) = args.seed {
        profile = profile.with_seed(seed);
    }

    let base_url = match &args.base_url {
        Some(url) => {
            url::Url::parse(url).context(format!("Invalid base URL '{}'", url))?;
            url.trim_end_matches('/').to_string()
        }
        None => config.target.normalized_base_url().to_string(),
    };

    let client: Arc<dyn HttpClient> = Arc::new(
        HttpManager::with_config(config.http.clone().into())
            .context("Failed to create HTTP client")?,
    );

    Ok(RunController::new(profile, scenario.workflow, client, base_url))
}

async fn run_command(
    config: StampedeConfig,
    args: &RunArgs,
    json: bool,
    output_path: Option<&PathBuf>,
) -> Result<i32> {
    let controller = build_controller(&config, args)?;
    let handle = controller.handle();

    info!(
        "Running scenario '{}' for {}",
        args.scenario,
        humantime::format_duration(controller.profile().total_duration())
    );

    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupt received, stopping virtual users");
            handle.cancel();
        }
    });

    let report = controller.run().await.context("Run failed")?;
    print_report(&report, json)?;

    if let Some(path) = output_path {
        output::write_json(&report, path)?;
        info!("Report written to {:?}", path);
    }

    Ok(report.exit_code())
}

fn print_report(report: &RunReport, json: bool) -> Result<()> {
    if json {
        println!("{}", output::render_json(report)?);
    } else {
        print!("{}", output::render_text(report));
    }
    Ok(())
}

fn validate_command(config: StampedeConfig, args: &RunArgs) -> Result<()> {
    let controller = build_controller(&config, args)?;

    match controller.validate() {
        Ok(()) => {
            let profile = controller.profile();
            println!(
                "✅ Scenario '{}' is valid: {} stages over {}, {} thresholds",
                args.scenario,
                profile.stages.len(),
                humantime::format_duration(profile.total_duration()),
                profile.thresholds.len()
            );
            Ok(())
        }
        Err(e) => {
            println!("❌ Scenario validation failed: {}", e);
            error!("Scenario validation failed: {}", e);
            Err(e.into())
        }
    }
}

fn list_scenarios() {
    for kind in ScenarioKind::ALL {
        let scenario = kind.scenario();
        let duration: std::time::Duration = scenario.stages.iter().map(|s| s.duration).sum();
        println!(
            "{:8} {} ({})",
            kind.name().bright_cyan().bold(),
            kind.description(),
            humantime::format_duration(duration)
        );
    }
}

/// Handle configuration validation
fn handle_config_validate(config_file: &PathBuf) -> Result<()> {
    info!("Validating configuration file: {:?}", config_file);

    if !config_file.exists() {
        return Err(anyhow::anyhow!(
            "Configuration file not found: {:?}",
            config_file
        ));
    }

    match ConfigLoader::new().from_file(config_file) {
        Ok(_config) => {
            println!("✅ Configuration file is valid");
            Ok(())
        }
        Err(e) => {
            println!("❌ Configuration validation failed: {}", e);
            error!("Configuration validation failed: {}", e);
            Err(e.into())
        }
    }
}

/// Handle configuration generation
fn handle_config_generate(output: &PathBuf, force: bool) -> Result<()> {
    if output.exists() && !force {
        return Err(anyhow::anyhow!(
            "Output file already exists: {:?}. Use --force to overwrite.",
            output
        ));
    }

    if let Some(parent) = output.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent).context("Failed to create output directory")?;
        }
    }

    fs::write(output, StampedeConfig::generate_sample())
        .context("Failed to write configuration file")?;

    println!("✅ Configuration generated at {:?}", output);
    Ok(())
}

/// Show the configuration in use
fn handle_config_show(config: &StampedeConfig, format: OutputFormat) -> Result<()> {
    let rendered = match format {
        OutputFormat::Yaml => {
            serde_yaml::to_string(config).context("Failed to serialize configuration")?
        }
        OutputFormat::Json => {
            serde_json::to_string_pretty(config).context("Failed to serialize configuration")?
        }
    };
    println!("{}", rendered);
    Ok(())
}
