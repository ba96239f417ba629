//! Lantern CLI - local LLM host with an addon runtime

use std::path::PathBuf;
use std::sync::Arc;

use clap::{Parser, Subcommand};
use tracing::{info, warn};

use lantern_addons::gateway::{MemoryClipboard, MemorySelection};
use lantern_addons::{manifest, AddonCatalog, AddonRegistry, AddonStateMap, CapabilityGateway};
use lantern_core::bus::{EventBus, EventPayload, Topic};
use lantern_core::config::Config;
use lantern_core::session::{
    validate_model_file, EchoBackend, ParameterClass, SessionManager, SessionStatus,
};

#[derive(Parser)]
#[command(name = "lantern")]
#[command(author, version, about = "Local LLM host with an addon runtime", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Output format (text or json)
    #[arg(long, global = true, default_value = "text")]
    format: OutputFormat,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    quiet: bool,
}

#[derive(Clone, Copy, Default, clap::ValueEnum)]
enum OutputFormat {
    #[default]
    Text,
    Json,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the host: load a model, start addons, wait for Ctrl-C
    Run {
        /// Model file to load (defaults to model.default_path from config)
        #[arg(short, long)]
        model: Option<PathBuf>,
        /// Start without loading any addons
        #[arg(long)]
        no_addons: bool,
    },

    /// Manage addons
    Addons {
        #[command(subcommand)]
        action: AddonAction,
    },

    /// Inspect model files
    Model {
        #[command(subcommand)]
        action: ModelAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum AddonAction {
    /// List discovered addons and their manifest status
    List {
        /// Addon directory (defaults to addons.directory from config)
        #[arg(short, long)]
        dir: Option<PathBuf>,
    },
}

#[derive(Subcommand)]
enum ModelAction {
    /// Validate a model file and report its parameter class
    Inspect {
        /// Path to a .gguf model file
        path: PathBuf,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Get a configuration value
    Get { key: String },
    /// List all configuration values
    List,
    /// Show the configuration file path
    Path,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive("lantern=info".parse()?),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Run { model, no_addons } => cmd_run(model, no_addons, cli.quiet).await,

        Commands::Addons { action } => match action {
            AddonAction::List { dir } => cmd_addons_list(dir, cli.format),
        },

        Commands::Model { action } => match action {
            ModelAction::Inspect { path } => cmd_model_inspect(&path, cli.format),
        },

        Commands::Config { action } => cmd_config(action),
    }
}

/// Boot the host and block until Ctrl-C
async fn cmd_run(model: Option<PathBuf>, no_addons: bool, quiet: bool) -> anyhow::Result<()> {
    let config = Config::load()?;
    config.validate()?;

    let bus = Arc::new(EventBus::new());
    let session = Arc::new(SessionManager::new(Arc::new(EchoBackend), Arc::clone(&bus)));
    let states = AddonStateMap::new();
    let gateway = Arc::new(CapabilityGateway::new(
        states.clone(),
        Arc::clone(&session),
        Arc::new(MemoryClipboard::default()),
        Arc::new(MemorySelection::default()),
    ));
    let registry = AddonRegistry::new(
        Arc::clone(&bus),
        gateway,
        Arc::clone(&session),
        AddonCatalog::builtin(),
        states,
        &config.addons,
    );

    // Chat messages from the host and from addons go to stdout.
    if !quiet {
        bus.subscribe(
            Topic::ChatMessage,
            Box::new(|event| {
                if let EventPayload::ChatMessage { source, content } = &event.payload {
                    println!("[{source}] {content}");
                }
            }),
        );
    }

    let model_path = model.or_else(|| config.model.default_path.clone());
    match model_path {
        Some(path) => {
            let metadata = session.load_model(&path, config.load_params()).await?;
            info!(
                model = %path.display(),
                class = %metadata.parameter_class,
                context_length = metadata.context_length,
                "model loaded"
            );
        }
        None => warn!("no model configured; addons will run without inference"),
    }

    let loaded = if no_addons {
        0
    } else {
        let dir = manifest::addon_base_dir(config.addons.directory.as_deref())?;
        registry.discover_and_load(&dir).await?
    };

    if !quiet {
        println!("lantern host running ({loaded} addons active); press Ctrl-C to stop");
    }
    tokio::signal::ctrl_c().await?;

    info!("shutting down");
    registry.shutdown_all().await;
    if session.status().0 == SessionStatus::Ready {
        session.unload_model().await?;
    }
    Ok(())
}

fn cmd_addons_list(dir: Option<PathBuf>, format: OutputFormat) -> anyhow::Result<()> {
    let config = Config::load()?;
    let dir = match dir {
        Some(dir) => dir,
        None => manifest::addon_base_dir(config.addons.directory.as_deref())?,
    };

    let discoveries = manifest::discover(&dir)?;
    match format {
        OutputFormat::Json => {
            let entries: Vec<serde_json::Value> = discoveries
                .iter()
                .map(|d| match &d.result {
                    Ok(m) => serde_json::json!({
                        "name": m.name,
                        "version": m.version,
                        "entry": m.entry,
                        "capabilities": m.capabilities,
                        "valid": true,
                    }),
                    Err(e) => serde_json::json!({
                        "name": d.name(),
                        "valid": false,
                        "error": e.to_string(),
                    }),
                })
                .collect();
            println!("{}", serde_json::to_string_pretty(&entries)?);
        }
        OutputFormat::Text => {
            if discoveries.is_empty() {
                println!("No addons found in {}", dir.display());
                return Ok(());
            }
            for d in &discoveries {
                match &d.result {
                    Ok(m) => {
                        let capabilities: Vec<String> =
                            m.capabilities.iter().map(|c| c.to_string()).collect();
                        println!(
                            "{} {} (entry: {}, capabilities: [{}])",
                            m.name,
                            m.version,
                            m.entry,
                            capabilities.join(", ")
                        );
                    }
                    Err(e) => println!("{} INVALID: {}", d.name(), e),
                }
            }
        }
    }
    Ok(())
}

fn cmd_model_inspect(path: &std::path::Path, format: OutputFormat) -> anyhow::Result<()> {
    let file_size = validate_model_file(path)?;
    let class = ParameterClass::from_file_size(file_size);
    match format {
        OutputFormat::Json => {
            println!(
                "{}",
                serde_json::to_string_pretty(&serde_json::json!({
                    "path": path.display().to_string(),
                    "file_size": file_size,
                    "parameter_class": class,
                }))?
            );
        }
        OutputFormat::Text => {
            println!("{}", path.display());
            println!("  format: GGUF");
            println!("  size: {} bytes", file_size);
            println!("  parameter class: {}", class);
        }
    }
    Ok(())
}

fn cmd_config(action: ConfigAction) -> anyhow::Result<()> {
    match action {
        ConfigAction::Get { key } => {
            let config = Config::load()?;
            let value = config.get(&key)?;
            println!("{}", value);
        }
        ConfigAction::List => {
            let config = Config::load()?;
            for (key, value) in config.list()? {
                println!("{} = {}", key, value);
            }
        }
        ConfigAction::Path => {
            let path = Config::config_path()?;
            println!("{}", path.display());
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_run_accepts_model_flag() {
        let cli = Cli::parse_from(["lantern", "run", "--model", "/tmp/m.gguf"]);
        match cli.command {
            Commands::Run { model, no_addons } => {
                assert_eq!(model, Some(PathBuf::from("/tmp/m.gguf")));
                assert!(!no_addons);
            }
            _ => panic!("expected run command"),
        }
    }

    #[test]
    fn test_addons_list_parses() {
        let cli = Cli::parse_from(["lantern", "addons", "list", "--dir", "/tmp/addons"]);
        match cli.command {
            Commands::Addons { action: AddonAction::List { dir } } => {
                assert_eq!(dir, Some(PathBuf::from("/tmp/addons")));
            }
            _ => panic!("expected addons list"),
        }
    }

    #[test]
    fn test_config_get_parses() {
        let cli = Cli::parse_from(["lantern", "config", "get", "ui.theme"]);
        match cli.command {
            Commands::Config { action: ConfigAction::Get { key } } => {
                assert_eq!(key, "ui.theme");
            }
            _ => panic!("expected config get"),
        }
    }
}
