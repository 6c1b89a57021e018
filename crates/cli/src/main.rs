//! procura CLI: the main entry point.
//!
//! Commands:
//! - `chat`         — Interactive conversation (Ctrl+C cancels the running turn)
//! - `ask`          — One question, streamed or as JSON
//! - `check-query`  — Normalize and validate a graph query without running it
//! - `config`       — Show, locate, validate or initialize configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "procura",
    about = "procura — conversational assistant over a public-procurement knowledge graph",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    log_json: bool,

    /// Use this config file instead of ~/.procura/config.toml
    #[arg(short, long, global = true, env = "PROCURA_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive conversation
    Chat {
        /// Resume a named session (kept in memory for this process)
        #[arg(short, long)]
        session: Option<String>,
    },

    /// Ask a single question
    Ask {
        /// The question
        question: String,

        /// Print the full turn result as JSON
        #[arg(long)]
        json: bool,
    },

    /// Normalize and validate a query without executing it
    CheckQuery {
        /// The Cypher query
        query: String,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Print the config file path
    Path,
    /// Validate the configuration
    Validate {
        /// Also check that the model, embedding and graph endpoints answer
        #[arg(long)]
        connect: bool,
    },
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Logs go to stderr; answers own stdout.
    let filter = if cli.verbose { "debug" } else { "warn" };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));
    if cli.log_json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .with_writer(std::io::stderr)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .with_writer(std::io::stderr)
            .init();
    }

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Chat { session } => commands::chat::run(config_path, session).await?,
        Commands::Ask { question, json } => commands::ask::run(config_path, &question, json).await?,
        Commands::CheckQuery { query } => commands::check_query::run(config_path, &query)?,
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path)?,
            ConfigAction::Path => commands::config_cmd::path(config_path),
            ConfigAction::Validate { connect } => commands::config_cmd::validate(config_path, connect).await?,
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force)?,
        },
    }

    Ok(())
}
