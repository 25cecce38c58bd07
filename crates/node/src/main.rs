//! # stakebft Node
//!
//! Main entry point for the stakebft node.
//!
//! This binary provides:
//! - `start`: run a node from a configuration file
//! - `init`: write a single-validator development configuration
//! - `genesis`: print the genesis block derived from a configuration

use anyhow::{bail, Result};
use clap::Parser;
use stakebft::{Node, DEFAULT_CONFIG_FILE};
use stakebft_config::{Config, LoggingConfig};
use stakebft_types::Keypair;
use std::path::{Path, PathBuf};
use tracing::{debug, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

/// stakebft node and tools
#[derive(Parser, Debug)]
#[command(name = "stakebft")]
#[command(version)]
#[command(about = "stakebft node - stake-weighted BFT consensus")]
#[command(long_about = None)]
struct Cli {
    /// Enable verbose logging (can be repeated for more verbosity)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(clap::Subcommand, Debug)]
enum Commands {
    /// Start the node
    Start {
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Block directory (overrides config file)
        #[arg(short, long)]
        data_dir: Option<PathBuf>,
    },

    /// Write a development configuration with a fresh single validator
    Init {
        /// Output configuration file
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        output: PathBuf,

        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },

    /// Print the genesis block hash
    Genesis {
        /// Configuration file path
        #[arg(short, long, default_value = DEFAULT_CONFIG_FILE)]
        config: PathBuf,

        /// Print the whole block as JSON
        #[arg(long)]
        full: bool,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Commands::Start { config, data_dir } => handle_start(&config, data_dir, cli.verbose).await,
        Commands::Init { output, force } => {
            init_tracing(&LoggingConfig::default(), cli.verbose);
            handle_init(&output, force)
        }
        Commands::Genesis { config, full } => {
            let config = Config::load(&config)?;
            init_tracing(&config.logging, cli.verbose);
            handle_genesis(&config, full)
        }
    }
}

/// Initialize tracing from the `[logging]` section; `-v` raises the level
fn init_tracing(logging: &LoggingConfig, verbose: u8) {
    let level = match verbose {
        0 => logging.level.to_lowercase(),
        1 => "debug".to_string(),
        _ => "trace".to_string(),
    };

    let env_filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(&level));

    match logging.format.to_lowercase().as_str() {
        "json" => {
            tracing_subscriber::registry()
                .with(fmt::layer().json())
                .with(env_filter)
                .init();
        }
        "compact" => {
            tracing_subscriber::registry()
                .with(fmt::layer().compact())
                .with(env_filter)
                .init();
        }
        _ => {
            tracing_subscriber::registry()
                .with(fmt::layer().with_target(true))
                .with(env_filter)
                .init();
        }
    }
}

/// Handle the `start` command
async fn handle_start(config_path: &Path, data_dir: Option<PathBuf>, verbose: u8) -> Result<()> {
    let mut config = Config::load(config_path)?;
    init_tracing(&config.logging, verbose);
    info!(version = env!("CARGO_PKG_VERSION"), config = %config_path.display(), "Starting stakebft");

    if let Some(dir) = data_dir {
        config.storage.data_dir = Some(dir);
    }

    let node = Node::new(config)?;

    // No transport is bundled; outbound traffic is only logged.
    if let Some(mut outbound) = node.take_outbound() {
        tokio::spawn(async move {
            while let Some(message) = outbound.recv().await {
                debug!(message = ?message.body, "Outbound message");
            }
        });
    }

    node.run().await
}

/// Handle the `init` command
fn handle_init(output: &Path, force: bool) -> Result<()> {
    if output.exists() && !force {
        bail!(
            "{} already exists, pass --force to overwrite it",
            output.display()
        );
    }

    let key = Keypair::random();
    let config = Config::development(&key);
    config.save(output)?;

    let genesis = config.genesis.build_block()?;
    info!(path = %output.display(), "Wrote configuration");

    println!("Configuration written to {}", output.display());
    println!("  Validator: {}", key.address());
    println!("  Genesis:   {}", genesis.hash);

    Ok(())
}

/// Handle the `genesis` command
fn handle_genesis(config: &Config, full: bool) -> Result<()> {
    let genesis = config.genesis.build_block()?;
    if full {
        println!("{}", String::from_utf8(genesis.to_json()?)?);
    } else {
        println!("{}", genesis.hash);
    }
    Ok(())
}
