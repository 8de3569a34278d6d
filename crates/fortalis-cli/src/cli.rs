use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};

#[derive(Parser)]
#[command(name = "fortalis")]
#[command(about = "Fortalis credential engine: keys, configuration and tokens")]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Engine configuration file (TOML)
    #[arg(short, long, global = true, env = "FORTALIS_CONFIG")]
    pub config: Option<PathBuf>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Manage signing key files
    Keys(KeysArgs),
    /// Inspect engine configuration
    Config(ConfigArgs),
    /// Issue, verify and inspect tokens
    Token(TokenArgs),
}

#[derive(clap::Args)]
pub struct KeysArgs {
    #[command(subcommand)]
    pub command: KeysCommands,
}

#[derive(Subcommand)]
pub enum KeysCommands {
    /// Create the key files if they are missing
    Init(KeyFileArgs),
    /// Print the public key set as JWKS
    Jwks(KeyFileArgs),
}

#[derive(clap::Args)]
pub struct KeyFileArgs {
    /// Private key file (overrides configuration)
    #[arg(long, requires = "public_key")]
    pub private_key: Option<PathBuf>,
    /// Public key file (overrides configuration)
    #[arg(long, requires = "private_key")]
    pub public_key: Option<PathBuf>,
    /// Key algorithm (overrides configuration)
    #[arg(long)]
    pub algorithm: Option<Algorithm>,
}

#[derive(Clone, Copy, ValueEnum)]
pub enum Algorithm {
    #[value(name = "RS256")]
    Rs256,
    #[value(name = "ES256")]
    Es256,
}

#[derive(clap::Args)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand)]
pub enum ConfigCommands {
    /// Load and validate the configuration
    Check,
    /// Print the effective configuration as TOML
    Show,
}

#[derive(clap::Args)]
pub struct TokenArgs {
    #[command(subcommand)]
    pub command: TokenCommands,
}

#[derive(Subcommand)]
pub enum TokenCommands {
    /// Run an authorization code flow and print the token pair
    Issue(IssueArgs),
    /// Verify a token against the configured keys
    Verify(VerifyArgs),
    /// Decode a token without verifying it
    Inspect(InspectArgs),
}

#[derive(clap::Args)]
pub struct IssueArgs {
    /// Subject the tokens are issued for
    #[arg(long)]
    pub subject: String,
    /// Client the tokens are issued to
    #[arg(long, default_value = "fortalis-cli")]
    pub client_id: String,
    /// Space-delimited scope
    #[arg(long, default_value = "read")]
    pub scope: String,
}

#[derive(clap::Args)]
pub struct VerifyArgs {
    /// The token
    pub token: String,
    /// Accept expired tokens
    #[arg(long)]
    pub allow_expired: bool,
}

#[derive(clap::Args)]
pub struct InspectArgs {
    /// The token
    pub token: String,
}
