use anyhow::{Context, Result};
use fortalis_auth::keys::{
    Jwks, KeyAlgorithm, KeyFileStatus, KeyFiles, RotationPolicy, ensure_key_files, load_key_files,
};
use fortalis_auth::{AuthConfig, Clock, KeyStore, SharedClock};
use time::OffsetDateTime;

use crate::cli::{Algorithm, KeyFileArgs};
use crate::output::{print_field, print_json, print_success, print_warning};

/// Key files and rotation policy after command-line overrides.
pub struct ResolvedKeys {
    pub files: KeyFiles,
    pub policy: RotationPolicy,
}

pub fn resolve(config: &AuthConfig, args: Option<&KeyFileArgs>) -> Result<ResolvedKeys> {
    let mut policy = RotationPolicy::from_config(&config.signing)?;
    let mut files = KeyFiles::from_config(&config.signing);

    if let Some(args) = args {
        if let (Some(private_key), Some(public_key)) = (&args.private_key, &args.public_key) {
            files = KeyFiles::new(private_key, public_key);
        }
        if let Some(algorithm) = args.algorithm {
            policy.algorithm = match algorithm {
                Algorithm::Rs256 => KeyAlgorithm::Rs256,
                Algorithm::Es256 => KeyAlgorithm::Es256,
            };
        }
    }

    Ok(ResolvedKeys { files, policy })
}

/// Opens a key store over existing key files. Never generates keys.
pub fn open_store(resolved: &ResolvedKeys, clock: SharedClock) -> Result<KeyStore> {
    let key = load_key_files(
        &resolved.files,
        resolved.policy.algorithm,
        clock.now(),
        resolved.policy.key_lifetime,
    )
    .with_context(|| {
        format!(
            "Failed to load keys from {} (run `fortalis keys init` first)",
            resolved.files.private_key.display()
        )
    })?;

    let store = KeyStore::new(clock);
    store.install(key)?;
    Ok(store)
}

pub fn init(config: &AuthConfig, args: &KeyFileArgs) -> Result<()> {
    let resolved = resolve(config, Some(args))?;
    let status = ensure_key_files(&resolved.files, resolved.policy.algorithm)?;
    let key = load_key_files(
        &resolved.files,
        resolved.policy.algorithm,
        OffsetDateTime::now_utc(),
        resolved.policy.key_lifetime,
    )?;

    print_field("Private key", resolved.files.private_key.display());
    print_field("Public key", resolved.files.public_key.display());
    print_field("Algorithm", key.algorithm());
    print_field("Key ID", key.kid());

    match status {
        KeyFileStatus::Existing => print_success("Key files already present"),
        KeyFileStatus::PublicKeyRestored => {
            print_warning("Public key was missing and has been derived from the private key");
            print_success("Key files ready");
        }
        KeyFileStatus::Generated => print_success("Generated a new key pair"),
    }
    Ok(())
}

pub fn jwks(config: &AuthConfig, args: &KeyFileArgs) -> Result<()> {
    let resolved = resolve(config, Some(args))?;
    let key = load_key_files(
        &resolved.files,
        resolved.policy.algorithm,
        OffsetDateTime::now_utc(),
        resolved.policy.key_lifetime,
    )?;

    let mut jwks = Jwks::new();
    jwks.add_key(key.to_jwk());
    print_json(&jwks)
}
