//! modelet CLI
//!
//! Command-line interface for interacting with the modelet daemon.

mod commands;

use clap::{Parser, Subcommand};
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// modelet - model residency agent for V2 inference servers
#[derive(Parser, Debug)]
#[command(name = "modelet")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:9095", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List tracked models and their residency
    Models,

    /// Show replica memory
    Memory,

    /// Load a model version
    Load {
        /// Model name
        name: String,

        /// Model version
        version: u32,

        /// Memory per instance in bytes
        #[arg(long, default_value_t = 0)]
        memory_bytes: u64,

        /// Artifact to stage (local path or file:// URI)
        #[arg(long)]
        artifact: Option<String>,

        /// Command tick (defaults to the current time in milliseconds)
        #[arg(long)]
        tick: Option<u64>,
    },

    /// Unload a model version
    Unload {
        /// Model name
        name: String,

        /// Model version
        version: u32,

        /// Command tick (defaults to the current time in milliseconds)
        #[arg(long)]
        tick: Option<u64>,
    },

    /// Make a model resident, evicting others if needed
    Ensure {
        /// Model name
        name: String,
    },

    /// Show system status
    Status,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::WARN
    };

    let subscriber = FmtSubscriber::builder()
        .with_max_level(log_level)
        .with_target(false)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let client = commands::ApiClient::new(&cli.api);

    match cli.command {
        Commands::Models => {
            commands::models(&client).await?;
        }
        Commands::Memory => {
            commands::memory(&client).await?;
        }
        Commands::Load {
            name,
            version,
            memory_bytes,
            artifact,
            tick,
        } => {
            commands::load(&client, name, version, memory_bytes, artifact, tick).await?;
        }
        Commands::Unload {
            name,
            version,
            tick,
        } => {
            commands::unload(&client, name, version, tick).await?;
        }
        Commands::Ensure { name } => {
            commands::ensure(&client, name).await?;
        }
        Commands::Status => {
            commands::status(&client).await?;
        }
    }

    Ok(())
}
