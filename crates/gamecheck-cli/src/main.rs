//! GameCheck CLI - run the gateway and inspect configuration.

mod commands;
mod ui;

use std::path::{Path, PathBuf};

use clap::{Parser, Subcommand};
use gamecheck_core::Config;
use gamecheck_core::config::LogFormat;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser)]
#[command(name = "gamecheck")]
#[command(about = "GameCheck - game tracking backend")]
#[command(version)]
#[command(propagate_version = true)]
struct Cli {
    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Config file (defaults to ~/.gamecheck/gamecheck.json)
    #[arg(long, global = true, env = "GAMECHECK_CONFIG_PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start the HTTP gateway
    Serve {
        /// Port to listen on
        #[arg(short, long)]
        port: Option<u16>,

        /// Bind address
        #[arg(long)]
        bind: Option<String>,
    },

    /// Search the game catalog
    Search {
        /// Game name
        query: String,

        /// Maximum number of results (0 for all)
        #[arg(short, long, default_value_t = 10)]
        limit: usize,
    },

    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigCommands>,
    },
}

#[derive(Subcommand)]
enum ConfigCommands {
    /// Show full configuration
    Show,

    /// Validate configuration
    Validate,
}

fn init_logging(verbose: bool, config: Option<&Config>) {
    let debug = verbose || config.is_some_and(|c| c.settings.debug);
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(if debug { "debug" } else { "info" }));

    let json = config.is_some_and(|c| c.settings.log_format == LogFormat::Json);
    if json {
        tracing_subscriber::registry()
            .with(fmt::layer().json().with_target(false))
            .with(filter)
            .init();
    } else {
        tracing_subscriber::registry()
            .with(fmt::layer().with_target(false))
            .with(filter)
            .init();
    }
}

fn load_config(path: &Path) -> anyhow::Result<Config> {
    if path.exists() {
        Ok(Config::load(path)?)
    } else {
        Ok(Config::default().with_env_overrides())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    let config_path = cli.config.clone().unwrap_or_else(Config::default_path);

    if let Commands::Config { action } = &cli.command {
        init_logging(cli.verbose, None);
        let action = match action {
            Some(ConfigCommands::Validate) => commands::config::ConfigAction::Validate,
            Some(ConfigCommands::Show) | None => commands::config::ConfigAction::Show,
        };
        return commands::run_config(action, &config_path);
    }

    let config = match load_config(&config_path) {
        Ok(config) => config,
        Err(e) => {
            init_logging(cli.verbose, None);
            ui::error(&format!("Failed to load {}: {e}", config_path.display()));
            return Err(e);
        }
    };
    init_logging(cli.verbose, Some(&config));

    match cli.command {
        Commands::Serve { port, bind } => {
            commands::run_serve(config, commands::serve::ServeArgs { port, bind }).await?;
        }
        Commands::Search { query, limit } => {
            commands::run_search(&config, &query, limit).await?;
        }
        Commands::Config { .. } => {}
    }

    Ok(())
}
