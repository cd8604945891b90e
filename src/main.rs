//! Lockbox CLI - encrypted key-value store on top of the lockbox library.
//!
//! Usage:
//!   lb set <name> <value>       - Store a value (encrypted)
//!   lb get <name>               - Print a value
//!   lb inspect                  - Show entry forms without decrypting
//!   lb recovery save <user>     - Save same-device recovery data

mod cli;

use anyhow::Result;
use clap::Parser;
use cli::{Cli, Commands};
use colored::Colorize;
use lockbox::config::{default_config_path, Config};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    // Initialize logging
    let log_level = if cli.verbose { "debug" } else { "info" };
    let filter = tracing_subscriber::EnvFilter::from_default_env().add_directive(
        format!("lockbox={}", log_level)
            .parse()
            .unwrap_or_else(|_| tracing_subscriber::filter::LevelFilter::INFO.into()),
    );
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    if let Err(e) = run(cli).await {
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config_path = cli.config.unwrap_or_else(default_config_path);
    let config = Config::load_or_default(&config_path)?;

    match cli.command {
        Commands::Set { name, value, plain } => {
            cli::commands::set(&config, &name, &value, plain).await?;
        }
        Commands::Get { name } => {
            cli::commands::get(&config, &name).await?;
        }
        Commands::Remove { name } => {
            cli::commands::remove(&config, &name).await?;
        }
        Commands::Inspect => {
            cli::commands::inspect(&config).await?;
        }
        Commands::Reset { yes } => {
            cli::commands::reset(&config, yes).await?;
        }
        Commands::Recovery { action } => {
            cli::commands::recovery(&config, action).await?;
        }
        Commands::Config => {
            cli::commands::show_config(&config_path, &config)?;
        }
    }

    Ok(())
}
