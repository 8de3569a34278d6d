use std::path::Path;

use anyhow::Result;
use fortalis_auth::AuthConfig;
use fortalis_auth::keys::KeyFiles;

use crate::output::{print_field, print_success};

/// Reports the effective configuration. Loading already validated it.
pub fn check(config: &AuthConfig, path: Option<&Path>) {
    match path {
        Some(path) => print_field("Configuration", path.display()),
        None => print_field("Configuration", "(defaults)"),
    }

    let files = KeyFiles::from_config(&config.signing);
    print_field("Issuer", &config.issuer);
    print_field("Audience", config.audience.join(", "));
    print_field("Algorithm", &config.signing.algorithm);
    print_field(
        "Access token lifetime",
        format!("{:?}", config.tokens.access_token_lifetime),
    );
    print_field(
        "Refresh token lifetime",
        format!("{:?}", config.tokens.refresh_token_lifetime),
    );
    print_field("Code lifetime", format!("{:?}", config.grants.code_lifetime));
    print_field("Leeway", format!("{:?}", config.tokens.leeway));
    print_field("Private key", files.private_key.display());
    print_field("Public key", files.public_key.display());

    print_success("Configuration is valid");
}

pub fn show(config: &AuthConfig) -> Result<()> {
    print!("{}", toml::to_string_pretty(config)?);
    Ok(())
}
