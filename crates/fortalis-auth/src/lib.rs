//! # fortalis-auth
//!
//! Credential issuance and verification engine for Fortalis.
//!
//! This crate provides:
//! - Signing key lifecycle with rotation and a verification grace window
//! - Compact signed credentials (access and refresh tokens)
//! - A session ledger for authorization grants, refresh chains and revocation
//! - The OAuth 2.0 authorization code flow with refresh token rotation
//!
//! ## Modules
//!
//! - [`config`] - Engine configuration
//! - [`clock`] - Injectable time source
//! - [`keys`] - Signing keys, key store and JWKS export
//! - [`token`] - Credential payloads and the token codec
//! - [`ledger`] - Grants, issued credentials and revocation state
//! - [`oauth`] - Authorization code flow
//! - [`storage`] - Storage traits for ledger state

pub mod clock;
pub mod config;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod oauth;
pub mod storage;
pub mod token;

pub use clock::{Clock, ManualClock, SharedClock, SystemClock};
pub use config::{AuthConfig, ConfigError};
pub use error::{AuthError, ErrorCategory};
pub use keys::{
    Jwk, Jwks, KeyAlgorithm, KeyFileStatus, KeyFiles, KeySet, KeyStatus, KeyStore,
    RotationPolicy, SigningKey, SigningKeyRecord, ensure_key_files, load_key_files,
};
pub use ledger::{CleanupReport, ConsumeOutcome, LedgerSettings, SessionLedger};
pub use oauth::{
    AuthorizationFlowCoordinator, AuthorizationGrant, AuthorizationRequest, ClientRegistry,
    EntitlementPolicy, FlowSettings, GrantState, NewGrant, RegisteredClient,
    StaticClientRegistry, StaticEntitlementPolicy, TokenPair,
};
pub use storage::{
    GrantStorage, IssuedCredential, IssuedCredentialStorage, RedeemOutcome, RevocationReason,
    RevocationRecord, RevocationStorage,
};
pub use token::{Credential, CredentialData, CredentialKind, TokenCodec, UnverifiedToken};

/// Type alias for engine results.
pub type AuthResult<T> = Result<T, AuthError>;

/// Tracing target for security events.
pub(crate) const SECURITY_TARGET: &str = "fortalis_auth::security";

/// Prelude module for convenient imports.
///
/// ```ignore
/// use fortalis_auth::prelude::*;
/// ```
pub mod prelude {
    pub use crate::AuthResult;
    pub use crate::clock::{Clock, ManualClock, SharedClock, SystemClock};
    pub use crate::config::{AuthConfig, ConfigError};
    pub use crate::error::{AuthError, ErrorCategory};
    pub use crate::keys::{KeyAlgorithm, KeyStore, RotationPolicy, SigningKey};
    pub use crate::ledger::{LedgerSettings, SessionLedger};
    pub use crate::oauth::{
        AuthorizationFlowCoordinator, AuthorizationRequest, ClientRegistry, EntitlementPolicy,
        RegisteredClient, StaticClientRegistry, StaticEntitlementPolicy, TokenPair,
    };
    pub use crate::storage::RevocationReason;
    pub use crate::token::{Credential, CredentialData, CredentialKind, TokenCodec};
}
