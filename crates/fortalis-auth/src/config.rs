//! Engine configuration.
//!
//! All lifetimes are configurable defaults rather than fixed contracts. The
//! configuration is plain serde data so the host process can load it from
//! TOML, environment overlays, or build it in code.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::keys::KeyAlgorithm;

/// Upper bound for clock skew tolerance.
pub const MAX_LEEWAY: Duration = Duration::from_secs(60);

/// Upper bound for token and key lifetimes and the rotation grace window.
pub const MAX_LIFETIME: Duration = Duration::from_secs(10 * 365 * 24 * 60 * 60);

/// Root engine configuration.
///
/// # Example (TOML)
///
/// ```toml
/// issuer = "https://auth.fortalis.io"
/// audience = ["fortalis-game"]
///
/// [tokens]
/// access_token_lifetime = "15m"
/// refresh_token_lifetime = "30d"
/// leeway = "30s"
///
/// [signing]
/// algorithm = "ES256"
/// rotation_grace = "24h"
/// ```
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct AuthConfig {
    /// Issuer written into every credential.
    pub issuer: String,

    /// Default audience of access and refresh tokens.
    pub audience: Vec<String>,

    /// Token lifetimes and verification leeway.
    pub tokens: TokenConfig,

    /// Authorization code settings.
    pub grants: GrantConfig,

    /// Signing key settings.
    pub signing: SigningConfig,

    /// Storage access settings.
    pub storage: StorageConfig,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            issuer: "http://localhost:8080".to_string(),
            audience: vec!["fortalis-game".to_string()],
            tokens: TokenConfig::default(),
            grants: GrantConfig::default(),
            signing: SigningConfig::default(),
            storage: StorageConfig::default(),
        }
    }
}

/// Token lifetimes and verification leeway.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TokenConfig {
    /// Access token lifetime.
    #[serde(with = "humantime_serde")]
    pub access_token_lifetime: Duration,

    /// Refresh token lifetime.
    #[serde(with = "humantime_serde")]
    pub refresh_token_lifetime: Duration,

    /// Clock skew tolerance applied to expiry and not-before checks only.
    #[serde(with = "humantime_serde")]
    pub leeway: Duration,

    /// Revoke the remaining refresh chain when a rotated-out refresh token is
    /// presented again.
    pub revoke_chain_on_reuse: bool,
}

impl Default for TokenConfig {
    fn default() -> Self {
        Self {
            access_token_lifetime: Duration::from_secs(15 * 60),
            refresh_token_lifetime: Duration::from_secs(30 * 24 * 3600),
            leeway: Duration::from_secs(60),
            revoke_chain_on_reuse: true,
        }
    }
}

/// Authorization code settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct GrantConfig {
    /// How long an authorization code may be redeemed.
    #[serde(with = "humantime_serde")]
    pub code_lifetime: Duration,

    /// Revoke every credential issued from a grant when its code is
    /// presented a second time.
    pub revoke_tokens_on_code_reuse: bool,
}

impl Default for GrantConfig {
    fn default() -> Self {
        Self {
            code_lifetime: Duration::from_secs(90),
            revoke_tokens_on_code_reuse: true,
        }
    }
}

/// Signing key settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SigningConfig {
    /// Algorithm for newly generated keys. Supported: "RS256", "ES256".
    pub algorithm: String,

    /// How long a demoted key keeps verifying tokens after rotation.
    #[serde(with = "humantime_serde")]
    pub rotation_grace: Duration,

    /// Validity window of a freshly generated key.
    #[serde(with = "humantime_serde")]
    pub key_lifetime: Duration,

    /// PKCS#8 PEM file holding the startup private key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub private_key_file: Option<PathBuf>,

    /// SPKI PEM file holding the startup public key.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub public_key_file: Option<PathBuf>,
}

impl Default for SigningConfig {
    fn default() -> Self {
        Self {
            algorithm: "RS256".to_string(),
            rotation_grace: Duration::from_secs(24 * 3600),
            key_lifetime: Duration::from_secs(90 * 24 * 3600),
            private_key_file: None,
            public_key_file: None,
        }
    }
}

impl SigningConfig {
    /// Parses the configured algorithm.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` for unsupported algorithms.
    pub fn key_algorithm(&self) -> Result<KeyAlgorithm, ConfigError> {
        self.algorithm.parse().map_err(|_| {
            ConfigError::InvalidValue(format!(
                "Invalid signing algorithm: '{}'. Must be RS256 or ES256",
                self.algorithm
            ))
        })
    }
}

/// Storage access settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct StorageConfig {
    /// Upper bound for a single storage call.
    #[serde(with = "humantime_serde")]
    pub timeout: Duration,
}

impl Default for StorageConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(2),
        }
    }
}

/// Configuration validation errors.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// An invalid configuration value was provided.
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),

    /// A required configuration value is missing.
    #[error("Missing required configuration: {0}")]
    Missing(String),

    /// The configuration file could not be read.
    #[error("Failed to read configuration file {path}: {source}")]
    Io {
        /// Path of the configuration file.
        path: PathBuf,
        /// Underlying I/O error.
        source: std::io::Error,
    },

    /// The configuration text is not valid TOML for this schema.
    #[error("Failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
}

impl AuthConfig {
    /// Parses a configuration from TOML text and validates it.
    ///
    /// # Errors
    ///
    /// Returns an error if parsing or validation fails.
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: Self = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads and validates a TOML configuration file.
    ///
    /// # Errors
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Validates the configuration.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::InvalidValue` if:
    /// - The issuer is empty
    /// - The signing algorithm is not supported
    /// - The leeway exceeds [`MAX_LEEWAY`]
    /// - The access token outlives the refresh token
    /// - A token or key lifetime, or the rotation grace, exceeds [`MAX_LIFETIME`]
    /// - The code lifetime is outside 10 seconds to 10 minutes
    /// - Any lifetime or timeout is zero
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.issuer.is_empty() {
            return Err(ConfigError::InvalidValue(
                "issuer cannot be empty".to_string(),
            ));
        }

        if self.audience.iter().any(String::is_empty) {
            return Err(ConfigError::InvalidValue(
                "audience entries cannot be empty".to_string(),
            ));
        }

        self.signing.key_algorithm()?;

        if self.tokens.leeway > MAX_LEEWAY {
            return Err(ConfigError::InvalidValue(format!(
                "leeway must be at most {}s",
                MAX_LEEWAY.as_secs()
            )));
        }

        if self.tokens.access_token_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "access_token_lifetime must be > 0".to_string(),
            ));
        }

        if self.tokens.access_token_lifetime >= self.tokens.refresh_token_lifetime {
            return Err(ConfigError::InvalidValue(
                "access_token_lifetime must be shorter than refresh_token_lifetime".to_string(),
            ));
        }

        for (name, value) in [
            ("refresh_token_lifetime", self.tokens.refresh_token_lifetime),
            ("key_lifetime", self.signing.key_lifetime),
            ("rotation_grace", self.signing.rotation_grace),
        ] {
            if value > MAX_LIFETIME {
                return Err(ConfigError::InvalidValue(format!(
                    "{name} must be at most {} days",
                    MAX_LIFETIME.as_secs() / 86_400
                )));
            }
        }

        let code_lifetime = self.grants.code_lifetime;
        if code_lifetime < Duration::from_secs(10) || code_lifetime > Duration::from_secs(600) {
            return Err(ConfigError::InvalidValue(
                "code_lifetime must be between 10s and 10m".to_string(),
            ));
        }

        if self.signing.rotation_grace.is_zero() || self.signing.key_lifetime.is_zero() {
            return Err(ConfigError::InvalidValue(
                "rotation_grace and key_lifetime must be > 0".to_string(),
            ));
        }

        if self.signing.private_key_file.is_some() != self.signing.public_key_file.is_some() {
            return Err(ConfigError::Missing(
                "private_key_file and public_key_file must be set together".to_string(),
            ));
        }

        if self.storage.timeout.is_zero() {
            return Err(ConfigError::InvalidValue(
                "storage timeout must be > 0".to_string(),
            ));
        }

        Ok(())
    }
}

/// Converts a configured `std` duration into a `time` duration.
pub(crate) fn to_time_duration(duration: Duration) -> time::Duration {
    time::Duration::try_from(duration).unwrap_or(time::Duration::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = AuthConfig::default();
        assert_eq!(config.issuer, "http://localhost:8080");
        assert_eq!(config.audience, vec!["fortalis-game".to_string()]);
        assert_eq!(config.tokens.access_token_lifetime, Duration::from_secs(900));
        assert_eq!(
            config.tokens.refresh_token_lifetime,
            Duration::from_secs(30 * 24 * 3600)
        );
        assert_eq!(config.tokens.leeway, Duration::from_secs(60));
        assert_eq!(config.grants.code_lifetime, Duration::from_secs(90));
        assert_eq!(config.signing.rotation_grace, Duration::from_secs(86400));
    }

    #[test]
    fn test_default_config_validates() {
        assert!(AuthConfig::default().validate().is_ok());
    }

    #[test]
    fn test_empty_issuer_fails_validation() {
        let mut config = AuthConfig::default();
        config.issuer = String::new();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("issuer"));
    }

    #[test]
    fn test_invalid_algorithm_fails_validation() {
        let mut config = AuthConfig::default();
        config.signing.algorithm = "HS256".to_string();
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("signing algorithm"));
    }

    #[test]
    fn test_valid_algorithms() {
        for alg in ["RS256", "ES256"] {
            let mut config = AuthConfig::default();
            config.signing.algorithm = alg.to_string();
            assert!(config.validate().is_ok(), "Algorithm {} should be valid", alg);
        }
    }

    #[test]
    fn test_leeway_above_limit_fails_validation() {
        let mut config = AuthConfig::default();
        config.tokens.leeway = Duration::from_secs(61);
        let err = config.validate().unwrap_err();
        assert!(err.to_string().contains("leeway"));
    }

    #[test]
    fn test_access_must_be_shorter_than_refresh() {
        let mut config = AuthConfig::default();
        config.tokens.access_token_lifetime = config.tokens.refresh_token_lifetime;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_code_lifetime_bounds() {
        let mut config = AuthConfig::default();
        config.grants.code_lifetime = Duration::from_secs(5);
        assert!(config.validate().is_err());

        config.grants.code_lifetime = Duration::from_secs(3600);
        assert!(config.validate().is_err());

        config.grants.code_lifetime = Duration::from_secs(120);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_key_files_must_be_paired() {
        let mut config = AuthConfig::default();
        config.signing.private_key_file = Some(PathBuf::from("keys/private_key.pem"));
        let err = config.validate().unwrap_err();
        assert!(matches!(err, ConfigError::Missing(_)));
    }

    #[test]
    fn test_from_toml_str() {
        let config = AuthConfig::from_toml_str(
            r#"
            issuer = "https://auth.fortalis.io"
            audience = ["fortalis-game", "fortalis-chat"]

            [tokens]
            access_token_lifetime = "10m"
            leeway = "30s"

            [signing]
            algorithm = "ES256"
            "#,
        )
        .unwrap();

        assert_eq!(config.issuer, "https://auth.fortalis.io");
        assert_eq!(config.audience.len(), 2);
        assert_eq!(config.tokens.access_token_lifetime, Duration::from_secs(600));
        assert_eq!(config.tokens.leeway, Duration::from_secs(30));
        // Unspecified fields keep their defaults
        assert_eq!(
            config.tokens.refresh_token_lifetime,
            Duration::from_secs(30 * 24 * 3600)
        );
        assert_eq!(config.signing.key_algorithm().unwrap(), KeyAlgorithm::Es256);
    }

    #[test]
    fn test_from_toml_str_rejects_invalid_values() {
        let err = AuthConfig::from_toml_str("issuer = \"\"").unwrap_err();
        assert!(matches!(err, ConfigError::InvalidValue(_)));

        let err = AuthConfig::from_toml_str("issuer = 42").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn test_lifetimes_are_bounded() {
        for text in [
            "[tokens]\nrefresh_token_lifetime = \"20000years\"",
            "[signing]\nkey_lifetime = \"11years\"",
            "[signing]\nrotation_grace = \"20000years\"",
        ] {
            let err = AuthConfig::from_toml_str(text).unwrap_err();
            assert!(matches!(err, ConfigError::InvalidValue(_)), "{text}");
        }

        let config = AuthConfig::from_toml_str("[tokens]\nrefresh_token_lifetime = \"9years\"")
            .unwrap();
        config.validate().unwrap();
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("auth.toml");
        std::fs::write(&path, "issuer = \"https://auth.example.com\"\n").unwrap();

        let config = AuthConfig::load(&path).unwrap();
        assert_eq!(config.issuer, "https://auth.example.com");

        let err = AuthConfig::load(dir.path().join("missing.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }

    #[test]
    fn test_to_time_duration() {
        assert_eq!(
            to_time_duration(Duration::from_secs(90)),
            time::Duration::seconds(90)
        );
    }
}
