mod cli;
mod commands;
mod output;

use std::path::Path;

use anyhow::{Context, Result};
use clap::Parser;
use fortalis_auth::AuthConfig;
use tracing::debug;
use tracing_subscriber::EnvFilter;

use cli::{Cli, Commands, ConfigCommands, KeysCommands, TokenCommands};
use output::print_error;

#[tokio::main]
async fn main() {
    init_tracing();

    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;

    match &cli.command {
        Commands::Keys(args) => match &args.command {
            KeysCommands::Init(key_args) => commands::keys::init(&config, key_args)?,
            KeysCommands::Jwks(key_args) => commands::keys::jwks(&config, key_args)?,
        },
        Commands::Config(args) => match &args.command {
            ConfigCommands::Check => commands::config::check(&config, cli.config.as_deref()),
            ConfigCommands::Show => commands::config::show(&config)?,
        },
        Commands::Token(args) => match &args.command {
            TokenCommands::Issue(issue_args) => commands::token::issue(&config, issue_args).await?,
            TokenCommands::Verify(verify_args) => commands::token::verify(&config, verify_args)?,
            TokenCommands::Inspect(inspect_args) => commands::token::inspect(inspect_args)?,
        },
    }

    Ok(())
}

fn load_config(path: Option<&Path>) -> Result<AuthConfig> {
    match path {
        Some(path) => {
            debug!(path = %path.display(), "Loading configuration");
            AuthConfig::load(path)
                .with_context(|| format!("Failed to load configuration from {}", path.display()))
        }
        None => {
            debug!("No configuration file given, using defaults");
            let config = AuthConfig::default();
            config.validate()?;
            Ok(config)
        }
    }
}
