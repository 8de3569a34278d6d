//! Credential engine error types.
//!
//! Every failure the engine can produce is a variant of [`AuthError`]. Errors
//! are always returned as typed results; only [`AuthError::NoActiveKey`] and
//! storage corruption ([`AuthError::Storage`]) are considered process-fatal.

use std::fmt;

/// Errors that can occur while issuing, verifying or revoking credentials.
#[derive(Debug, thiserror::Error)]
pub enum AuthError {
    /// The token or request cannot be parsed.
    #[error("Malformed input: {message}")]
    Malformed {
        /// Description of what could not be parsed.
        message: String,
    },

    /// The token signature does not verify.
    #[error("Invalid signature")]
    SignatureInvalid,

    /// The credential is past its expiry (leeway included).
    #[error("Token expired")]
    Expired,

    /// The credential was issued in the future (leeway included).
    #[error("Token not yet valid")]
    NotYetValid,

    /// The token references a signing key that is unknown or retired.
    #[error("Unknown signing key: {kid}")]
    KeyUnknown {
        /// The key ID from the token header.
        kid: String,
    },

    /// A key lookup against the key store found nothing usable.
    #[error("Key not found: {kid}")]
    KeyNotFound {
        /// The key ID that was not found.
        kid: String,
    },

    /// The credential has been explicitly revoked.
    #[error("Token revoked")]
    Revoked,

    /// No grant exists for the presented authorization code.
    #[error("Authorization grant not found")]
    GrantNotFound,

    /// The authorization code outlived its lifetime.
    #[error("Authorization grant expired")]
    GrantExpired,

    /// The authorization code has already been exchanged.
    #[error("Authorization grant already redeemed")]
    AlreadyRedeemed,

    /// The grant or refresh token cannot be used.
    #[error("Invalid grant: {message}")]
    InvalidGrant {
        /// Description of why the grant is invalid.
        message: String,
    },

    /// The redeeming client is not the client the grant was issued to.
    #[error("Client mismatch")]
    ClientMismatch,

    /// The client is not registered.
    #[error("Invalid client: {message}")]
    InvalidClient {
        /// Description of why the client is invalid.
        message: String,
    },

    /// The redirect target is not registered for the client.
    #[error("Invalid redirect target: {message}")]
    InvalidRedirect {
        /// Description of the redirect problem.
        message: String,
    },

    /// The requested scope exceeds what the subject is entitled to.
    #[error("Invalid scope: {message}")]
    InvalidScope {
        /// Description of why the scope is invalid.
        message: String,
    },

    /// The request failed validation before reaching the engine.
    #[error("Invalid request: {message}")]
    InvalidRequest {
        /// Description of why the request is invalid.
        message: String,
    },

    /// Credential data handed to the codec breaks an invariant.
    #[error("Invalid credential: {message}")]
    InvalidCredential {
        /// Description of the violated invariant.
        message: String,
    },

    /// No signing key is active. Startup must provision one.
    #[error("No active signing key")]
    NoActiveKey,

    /// Key material could not be generated or parsed.
    #[error("Key error: {message}")]
    KeyGeneration {
        /// Description of the key error.
        message: String,
    },

    /// The storage backend did not answer in time or is down.
    #[error("Storage unavailable: {message}")]
    StorageUnavailable {
        /// Description of the outage.
        message: String,
    },

    /// The storage backend returned corrupt or inconsistent data.
    #[error("Storage error: {message}")]
    Storage {
        /// Description of the storage error.
        message: String,
    },

    /// The engine configuration is invalid.
    #[error("Configuration error: {message}")]
    Configuration {
        /// Description of the configuration error.
        message: String,
    },

    /// An unexpected internal error occurred.
    #[error("Internal error: {message}")]
    Internal {
        /// Description of the internal error.
        message: String,
    },
}

impl AuthError {
    /// Creates a new `Malformed` error.
    #[must_use]
    pub fn malformed(message: impl Into<String>) -> Self {
        Self::Malformed {
            message: message.into(),
        }
    }

    /// Creates a new `KeyUnknown` error.
    #[must_use]
    pub fn key_unknown(kid: impl Into<String>) -> Self {
        Self::KeyUnknown { kid: kid.into() }
    }

    /// Creates a new `KeyNotFound` error.
    #[must_use]
    pub fn key_not_found(kid: impl Into<String>) -> Self {
        Self::KeyNotFound { kid: kid.into() }
    }

    /// Creates a new `InvalidGrant` error.
    #[must_use]
    pub fn invalid_grant(message: impl Into<String>) -> Self {
        Self::InvalidGrant {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidClient` error.
    #[must_use]
    pub fn invalid_client(message: impl Into<String>) -> Self {
        Self::InvalidClient {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRedirect` error.
    #[must_use]
    pub fn invalid_redirect(message: impl Into<String>) -> Self {
        Self::InvalidRedirect {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidScope` error.
    #[must_use]
    pub fn invalid_scope(message: impl Into<String>) -> Self {
        Self::InvalidScope {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidRequest` error.
    #[must_use]
    pub fn invalid_request(message: impl Into<String>) -> Self {
        Self::InvalidRequest {
            message: message.into(),
        }
    }

    /// Creates a new `InvalidCredential` error.
    #[must_use]
    pub fn invalid_credential(message: impl Into<String>) -> Self {
        Self::InvalidCredential {
            message: message.into(),
        }
    }

    /// Creates a new `KeyGeneration` error.
    #[must_use]
    pub fn key_generation(message: impl Into<String>) -> Self {
        Self::KeyGeneration {
            message: message.into(),
        }
    }

    /// Creates a new `StorageUnavailable` error.
    #[must_use]
    pub fn storage_unavailable(message: impl Into<String>) -> Self {
        Self::StorageUnavailable {
            message: message.into(),
        }
    }

    /// Creates a new `Storage` error.
    #[must_use]
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Creates a new `Configuration` error.
    #[must_use]
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Creates a new `Internal` error.
    #[must_use]
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Returns `true` if the caller may retry with backoff.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::StorageUnavailable { .. })
    }

    /// Returns `true` if the error breaks an engine invariant and must page
    /// an operator.
    #[must_use]
    pub fn is_fatal(&self) -> bool {
        matches!(self, Self::NoActiveKey | Self::Storage { .. })
    }

    /// Returns `true` if the error should be recorded as a security event.
    #[must_use]
    pub fn is_security_event(&self) -> bool {
        matches!(
            self,
            Self::SignatureInvalid | Self::KeyUnknown { .. } | Self::ClientMismatch
        )
    }

    /// Returns `true` if this is a token-related error.
    #[must_use]
    pub fn is_token_error(&self) -> bool {
        matches!(
            self,
            Self::Malformed { .. }
                | Self::SignatureInvalid
                | Self::Expired
                | Self::NotYetValid
                | Self::KeyUnknown { .. }
                | Self::Revoked
        )
    }

    /// Returns the error category for logging/monitoring purposes.
    #[must_use]
    pub fn category(&self) -> ErrorCategory {
        match self {
            Self::Malformed { .. } => ErrorCategory::Validation,
            Self::SignatureInvalid => ErrorCategory::Token,
            Self::Expired => ErrorCategory::Token,
            Self::NotYetValid => ErrorCategory::Token,
            Self::KeyUnknown { .. } => ErrorCategory::Token,
            Self::KeyNotFound { .. } => ErrorCategory::Key,
            Self::Revoked => ErrorCategory::Token,
            Self::GrantNotFound => ErrorCategory::Grant,
            Self::GrantExpired => ErrorCategory::Grant,
            Self::AlreadyRedeemed => ErrorCategory::Grant,
            Self::InvalidGrant { .. } => ErrorCategory::Grant,
            Self::ClientMismatch => ErrorCategory::Grant,
            Self::InvalidClient { .. } => ErrorCategory::Validation,
            Self::InvalidRedirect { .. } => ErrorCategory::Validation,
            Self::InvalidScope { .. } => ErrorCategory::Authorization,
            Self::InvalidRequest { .. } => ErrorCategory::Validation,
            Self::InvalidCredential { .. } => ErrorCategory::Internal,
            Self::NoActiveKey => ErrorCategory::Key,
            Self::KeyGeneration { .. } => ErrorCategory::Key,
            Self::StorageUnavailable { .. } => ErrorCategory::Infrastructure,
            Self::Storage { .. } => ErrorCategory::Infrastructure,
            Self::Configuration { .. } => ErrorCategory::Configuration,
            Self::Internal { .. } => ErrorCategory::Internal,
        }
    }

    /// Returns the OAuth 2.0 error code for this error.
    ///
    /// `KeyUnknown` deliberately shares the code of `SignatureInvalid`.
    #[must_use]
    pub fn oauth_error_code(&self) -> &'static str {
        match self {
            Self::Malformed { .. } => "invalid_request",
            Self::SignatureInvalid => "invalid_token",
            Self::Expired => "invalid_token",
            Self::NotYetValid => "invalid_token",
            Self::KeyUnknown { .. } => "invalid_token",
            Self::Revoked => "invalid_token",
            Self::GrantNotFound => "invalid_grant",
            Self::GrantExpired => "invalid_grant",
            Self::AlreadyRedeemed => "invalid_grant",
            Self::InvalidGrant { .. } => "invalid_grant",
            Self::ClientMismatch => "invalid_grant",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidRedirect { .. } => "invalid_request",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::StorageUnavailable { .. } => "temporarily_unavailable",
            Self::KeyNotFound { .. }
            | Self::InvalidCredential { .. }
            | Self::NoActiveKey
            | Self::KeyGeneration { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }

    /// Suggested HTTP status for the routing layer.
    #[must_use]
    pub fn http_status_hint(&self) -> u16 {
        match self {
            Self::SignatureInvalid
            | Self::Expired
            | Self::NotYetValid
            | Self::KeyUnknown { .. }
            | Self::Revoked => 401,
            Self::Malformed { .. }
            | Self::GrantNotFound
            | Self::GrantExpired
            | Self::AlreadyRedeemed
            | Self::InvalidGrant { .. }
            | Self::ClientMismatch
            | Self::InvalidRedirect { .. }
            | Self::InvalidScope { .. }
            | Self::InvalidRequest { .. } => 400,
            Self::InvalidClient { .. } => 401,
            Self::StorageUnavailable { .. } => 503,
            Self::KeyNotFound { .. }
            | Self::InvalidCredential { .. }
            | Self::NoActiveKey
            | Self::KeyGeneration { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => 500,
        }
    }

    /// Returns the error kind safe to show in a response body.
    ///
    /// Unknown keys are reported exactly like bad signatures so that responses
    /// cannot be used to probe the key rotation schedule.
    #[must_use]
    pub fn public_code(&self) -> &'static str {
        match self {
            Self::SignatureInvalid | Self::KeyUnknown { .. } => "signature_invalid",
            Self::Malformed { .. } => "malformed",
            Self::Expired => "expired",
            Self::NotYetValid => "not_yet_valid",
            Self::Revoked => "revoked",
            Self::GrantNotFound
            | Self::GrantExpired
            | Self::AlreadyRedeemed
            | Self::InvalidGrant { .. } => "invalid_grant",
            Self::ClientMismatch => "client_mismatch",
            Self::InvalidClient { .. } => "invalid_client",
            Self::InvalidRedirect { .. } => "invalid_redirect",
            Self::InvalidScope { .. } => "invalid_scope",
            Self::InvalidRequest { .. } => "invalid_request",
            Self::StorageUnavailable { .. } => "storage_unavailable",
            Self::KeyNotFound { .. }
            | Self::InvalidCredential { .. }
            | Self::NoActiveKey
            | Self::KeyGeneration { .. }
            | Self::Storage { .. }
            | Self::Configuration { .. }
            | Self::Internal { .. } => "server_error",
        }
    }
}

/// Categories of engine errors for logging and monitoring.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorCategory {
    /// Token parsing, signature and lifetime errors.
    Token,
    /// Authorization grant errors.
    Grant,
    /// Scope and entitlement errors.
    Authorization,
    /// Request validation errors.
    Validation,
    /// Signing key errors.
    Key,
    /// Infrastructure/storage errors.
    Infrastructure,
    /// Configuration errors.
    Configuration,
    /// Internal errors.
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Token => write!(f, "token"),
            Self::Grant => write!(f, "grant"),
            Self::Authorization => write!(f, "authorization"),
            Self::Validation => write!(f, "validation"),
            Self::Key => write!(f, "key"),
            Self::Infrastructure => write!(f, "infrastructure"),
            Self::Configuration => write!(f, "configuration"),
            Self::Internal => write!(f, "internal"),
        }
    }
}
