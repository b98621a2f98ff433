use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::{Parser, Subcommand, ValueEnum};
use tracing_subscriber::EnvFilter;

use expotion::app::{parse_method, Application, Request};
use expotion::config::{AppConfig, FailurePolicy};
use expotion::plugins::{LoadReport, PluginLoader};

#[derive(Parser)]
#[command(name = "expotion")]
#[command(about = "Discover and initialize Expotion plugins", long_about = None)]
struct Cli {
    /// Path to config.json (default: ~/.expotion/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory scanned for manifest plugins
    #[arg(long, global = true)]
    plugins_dir: Option<PathBuf>,

    /// Plugin to skip (repeatable)
    #[arg(long = "disable", global = true)]
    disabled: Vec<String>,

    /// Keep loading when a plugin fails instead of aborting
    #[arg(long, global = true)]
    isolate_failures: bool,

    /// Log output format
    #[arg(long, value_enum, default_value_t = LogFormat::Text, global = true)]
    log_format: LogFormat,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Clone, Copy, ValueEnum)]
enum LogFormat {
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Load plugins and list them
    Plugins,
    /// Run every plugin's health check
    Health,
    /// Print the combined plugin menu
    Menu,
    /// Print the application's URL map
    Routes,
    /// Dispatch a single request against the loaded application
    Request {
        /// HTTP method (GET, POST, ...)
        method: String,
        /// Request path, e.g. /docs/
        path: String,
    },
    /// Show version information
    Version,
}

fn init_logging(format: LogFormat) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let builder = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr);
    match format {
        LogFormat::Text => builder.init(),
        LogFormat::Json => builder.json().init(),
    }
}

fn build_config(cli: &Cli) -> anyhow::Result<AppConfig> {
    let path = cli.config.clone().unwrap_or_else(AppConfig::default_path);
    let mut config = AppConfig::load(&path)
        .with_context(|| format!("Failed to load config from {}", path.display()))?;

    if let Some(dir) = &cli.plugins_dir {
        config.plugins_dir = Some(dir.clone());
    }
    config.disabled_plugins.extend(cli.disabled.iter().cloned());
    if cli.isolate_failures {
        config.failure_policy = FailurePolicy::Isolate;
    }
    Ok(config)
}

fn load(cli: &Cli) -> anyhow::Result<(PluginLoader, LoadReport)> {
    let config = build_config(cli)?;
    let app = Application::new(config);
    let mut loader = PluginLoader::new(app);
    let report = loader.load_all().context("Plugin loading failed")?;
    Ok((loader, report))
}

fn run(cli: Cli) -> anyhow::Result<()> {
    match cli.command.as_ref().unwrap_or(&Commands::Version) {
        Commands::Version => {
            println!("expotion {}", env!("CARGO_PKG_VERSION"));
        }
        Commands::Plugins => {
            let (loader, report) = load(&cli)?;
            let mut plugins: Vec<_> = loader.plugins().into_values().map(|p| p.info()).collect();
            plugins.sort_by(|a, b| a.name.cmp(&b.name));
            for info in plugins {
                println!(
                    "{} v{} [{}]{}",
                    info.name,
                    info.version,
                    info.source,
                    if info.enabled { "" } else { " (disabled)" }
                );
            }
            for skipped in &report.skipped {
                println!("{} skipped: {:?}", skipped.name, skipped.reason);
            }
            for failed in &report.failed {
                println!("{} failed during {:?}: {}", failed.name, failed.stage, failed.message);
            }
        }
        Commands::Health => {
            let (loader, _) = load(&cli)?;
            println!("{}", serde_json::to_string_pretty(&loader.healthcheck())?);
        }
        Commands::Menu => {
            let (loader, _) = load(&cli)?;
            println!(
                "{}",
                serde_json::to_string_pretty(&loader.get_all_menu_items())?
            );
        }
        Commands::Routes => {
            let (loader, _) = load(&cli)?;
            for route in loader.app().url_map() {
                let methods: Vec<&str> = route.methods.iter().map(|m| m.as_str()).collect();
                println!("{:<24} {:<16} {}", route.rule, methods.join(","), route.endpoint);
            }
        }
        Commands::Request { method, path } => {
            let method = parse_method(method)?;
            let (loader, _) = load(&cli)?;
            let response = loader.app().dispatch(&Request::new(method, path.clone()));
            println!("{} {}", response.status, response.content_type);
            println!();
            println!("{}", response.body);
        }
    }

    Ok(())
}

fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.log_format);

    if let Err(e) = run(cli) {
        eprintln!("Error: {:#}", e);
        ExitCode::FAILURE
    } else {
        ExitCode::SUCCESS
    }
}
