use anyhow::Context;
use charla::config::{Config, ConfigError};
use charla::{Charla, Role};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "charla")]
#[command(about = "A chat gateway that fans queries out to discovered answer backends")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(author = "Charla Team")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the chat gateway
    Gateway {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/gateway.toml")]
        config: PathBuf,
    },
    /// Run the service registry
    Registry {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/registry.toml")]
        config: PathBuf,
    },
    /// Run the canned answer backend
    Canned {
        /// Path to configuration file
        #[arg(short, long, default_value = "config/canned.toml")]
        config: PathBuf,
    },
    /// Generate example configuration files
    Config {
        /// Role to generate for (gateway, registry or canned)
        #[arg(short, long)]
        role: String,
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },
    /// Validate configuration file
    Validate {
        /// Path to configuration file to validate
        #[arg(short, long)]
        config: PathBuf,
    },
    /// Show version information
    Version,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Gateway { config } => run_charla(Role::Gateway, config).await?,
        Commands::Registry { config } => run_charla(Role::Registry, config).await?,
        Commands::Canned { config } => run_charla(Role::Canned, config).await?,
        Commands::Config { role, output } => generate_config(role, output)?,
        Commands::Validate { config } => validate_config(config)?,
        Commands::Version => show_version(),
    }

    Ok(())
}

async fn run_charla(role: Role, config_path: PathBuf) -> anyhow::Result<()> {
    // Load configuration
    let config = Config::load_from_file(&config_path)
        .with_context(|| format!("Failed to load config from {:?}", config_path))?;

    // Initialize logging
    init_logging(&config)?;

    info!("Starting charla {} v{}", role, env!("CARGO_PKG_VERSION"));
    info!("Configuration loaded from: {:?}", config_path);
    if let Some(url) = &config.registry.url {
        info!("Registry: {}", url);
    }

    Charla::new(config, role)
        .run()
        .await
        .with_context(|| format!("Failed to run charla {}", role))?;

    Ok(())
}

fn generate_config(role: String, output: PathBuf) -> anyhow::Result<()> {
    println!("Generating {} configuration file: {:?}", role, output);

    Config::create_example_config(&output, &role).context("Failed to generate config")?;

    println!("Configuration file generated successfully!");
    println!("Edit the file to match your environment and run:");
    println!("  charla {} --config {:?}", role, output);

    Ok(())
}

fn validate_config(config_path: PathBuf) -> anyhow::Result<()> {
    println!("Validating configuration file: {:?}", config_path);

    match Config::load_from_file(&config_path) {
        Ok(config) => {
            println!("✓ Configuration file is valid");
            println!("  Listen address: {}", config.server.listen_addr);
            match &config.registry.url {
                Some(url) => println!("  Registry: {}", url),
                None => println!("  Registry: none"),
            }
            if let Some(conf) = &config.registry.conf {
                println!("  Publishes: {} at {}", conf.name, conf.url);
            }
            if !config.registry.services_names.is_empty() {
                println!(
                    "  Discovers: {}",
                    config.registry.services_names.join(", ")
                );
            }
            println!(
                "  Quotas: {} in flight, {} per user",
                config.gateway.quotas.max_in_flight, config.gateway.quotas.max_in_flight_for_uid
            );
            for (i, service) in config.gateway.services.iter().enumerate() {
                println!(
                    "    {}: {} {} (priority {})",
                    i + 1,
                    service.name,
                    service.url,
                    service.priority
                );
            }
        }
        Err(e) => {
            eprintln!("✗ Configuration file validation failed:");
            match &e {
                ConfigError::IoError(msg) => eprintln!("  File error: {}", msg),
                ConfigError::ParseError(msg) => eprintln!("  Parse error: {}", msg),
                ConfigError::ValidationError(msg) => eprintln!("  Validation error: {}", msg),
                ConfigError::SerializeError(msg) => eprintln!("  Serialization error: {}", msg),
            }
            return Err(e.into());
        }
    }

    Ok(())
}

fn show_version() {
    println!("charla v{}", env!("CARGO_PKG_VERSION"));
    println!("A chat gateway that fans queries out to discovered answer backends");
    println!();
    println!("Target: {}", std::env::consts::ARCH);
    println!();
    println!("Roles:");
    println!("  • gateway   fan-out with priority merge and per-user quotas");
    println!("  • registry  heartbeat service registry");
    println!("  • canned    keyword-table answer backend");
}

fn init_logging(config: &Config) -> anyhow::Result<()> {
    // RUST_LOG wins over the configured level
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(&config.logging.level))
        .context("Invalid log filter")?;

    let builder = tracing_subscriber::fmt().with_env_filter(filter);
    let result = match config.logging.format.as_str() {
        "json" => builder.json().try_init(),
        _ => builder.try_init(),
    };
    result.map_err(|e| anyhow::anyhow!("Failed to initialize logging: {}", e))?;

    info!("Logging initialized at level: {}", config.logging.level);
    Ok(())
}
