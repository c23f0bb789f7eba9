//! Companion CLI: the main entry point.
//!
//! Commands:
//! - `serve`: Start the conversation gateway
//! - `chips`: Manage persistent memory chips
//! - `config`: Write or inspect configuration

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "companion",
    about = "Companion — a persona-driven conversational runtime",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the WebSocket/HTTP gateway
    Serve {
        /// Override the port
        #[arg(short, long)]
        port: Option<u16>,

        /// Override the bind address
        #[arg(long)]
        host: Option<String>,
    },

    /// Manage memory chips
    Chips {
        #[command(subcommand)]
        command: ChipsCommand,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        command: ConfigCommand,
    },
}

#[derive(Subcommand)]
enum ChipsCommand {
    /// List all chips
    List,

    /// Add or replace a chip
    Add {
        /// Unique chip name
        name: String,

        /// Text injected into context when the chip triggers
        content: String,

        /// Trigger keyword (repeatable, at most 5 kept)
        #[arg(short, long = "keyword")]
        keywords: Vec<String>,
    },

    /// Remove a chip by name
    Remove { name: String },

    /// Remove every chip
    Clear {
        /// Skip the confirmation notice
        #[arg(long)]
        confirm: bool,
    },
}

#[derive(Subcommand)]
enum ConfigCommand {
    /// Write a default config file if none exists
    Init,

    /// Print the effective configuration
    Show,

    /// Print the config file path
    Path,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.json_logs {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }

    match cli.command {
        Commands::Serve { port, host } => commands::serve::run(port, host).await?,
        Commands::Chips { command } => match command {
            ChipsCommand::List => commands::chips::list().await?,
            ChipsCommand::Add {
                name,
                content,
                keywords,
            } => commands::chips::add(name, content, keywords).await?,
            ChipsCommand::Remove { name } => commands::chips::remove(&name).await?,
            ChipsCommand::Clear { confirm } => commands::chips::clear(confirm).await?,
        },
        Commands::Config { command } => match command {
            ConfigCommand::Init => commands::config_cmd::init().await?,
            ConfigCommand::Show => commands::config_cmd::show().await?,
            ConfigCommand::Path => commands::config_cmd::path().await?,
        },
    }

    Ok(())
}
