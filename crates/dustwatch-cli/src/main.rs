//! dustwatch CLI
//!
//! Command-line interface for interacting with the dustwatch daemon.

mod commands;

use clap::{Parser, Subcommand};
use std::path::PathBuf;
use tracing::Level;
use tracing_subscriber::FmtSubscriber;

/// dustwatch - dust-storm detection for Mars imagery
#[derive(Parser, Debug)]
#[command(name = "dustwatch")]
#[command(version, about, long_about = None)]
struct Cli {
    /// Daemon API address
    #[arg(long, default_value = "http://localhost:8000", env = "DUSTWATCH_API", global = true)]
    api: String,

    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Check that the daemon is up
    Health,

    /// List registered models
    Models,

    /// Show daemon and model cache status
    Status,

    /// Run dust-storm detection on an image
    Detect {
        /// Image file to upload
        image: PathBuf,

        /// Model to request (e.g. best.pt)
        #[arg(long)]
        model: Option<String>,

        /// Write the annotated PNG here
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Measure inference time on an image
    Timing {
        /// Image file to upload
        image: PathBuf,

        /// Model to request (e.g. best.pt)
        #[arg(long)]
        model: Option<String>,
    },

    /// Unload the active model
    Evict,
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
        Commands::Health => {
            commands::health(&client).await?;
        }
        Commands::Models => {
            commands::models(&client).await?;
        }
        Commands::Status => {
            commands::status(&client).await?;
        }
        Commands::Detect {
            image,
            model,
            output,
        } => {
            commands::detect(&client, image, model, output).await?;
        }
        Commands::Timing { image, model } => {
            commands::timing(&client, image, model).await?;
        }
        Commands::Evict => {
            commands::evict(&client).await?;
        }
    }

    Ok(())
}
