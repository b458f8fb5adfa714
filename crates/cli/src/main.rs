//! Hizen CLI — the main entry point.
//!
//! Commands:
//! - `chat`    — Single-message or interactive tutoring session
//! - `config`  — Print the starter config, the effective config, or its path

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "hizen",
    about = "Hizen — a tutoring agent for exam practice",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Chat with the tutor
    Chat {
        /// Send a single message instead of entering interactive mode
        #[arg(short, long)]
        message: Option<String>,

        /// Attach an image URL to the first message (repeatable)
        #[arg(long = "image")]
        images: Vec<String>,

        /// JSON file holding the question being worked on
        #[arg(long)]
        memory: Option<PathBuf>,
    },

    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print a starter config.toml (default)
    Template,
    /// Print the effective configuration, API key redacted
    Show,
    /// Print the config file location
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Chat {
            message,
            images,
            memory,
        } => commands::chat::run(message, images, memory).await?,
        Commands::Config { action } => match action.unwrap_or(ConfigAction::Template) {
            ConfigAction::Template => commands::config_cmd::template(),
            ConfigAction::Show => commands::config_cmd::show()?,
            ConfigAction::Path => commands::config_cmd::path(),
        },
    }

    Ok(())
}
