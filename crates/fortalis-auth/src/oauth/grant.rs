//! Authorization grants (authorization codes).
//!
//! A grant is created when an authorization request is accepted and redeemed
//! exactly once when the client exchanges the code for tokens.
//!
//! # Security
//!
//! - Codes are 256 random bits, base64url-encoded
//! - Only the SHA-256 hash of a code is stored; the code itself is returned
//!   once from grant creation and never persisted
//! - Refresh tokens reference the grant by `id`, never by code

use std::collections::BTreeSet;
use std::fmt;

use base64::Engine;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::OffsetDateTime;
use url::Url;
use uuid::Uuid;

/// Lifecycle state of a grant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GrantState {
    /// Awaiting redemption.
    Issued,
    /// Exchanged for tokens.
    Redeemed,
    /// Lifetime elapsed without redemption. Derived from time, never stored.
    Expired,
}

/// A pending or redeemed authorization code.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationGrant {
    /// Grant ID, carried by refresh tokens as their parent grant.
    pub id: Uuid,

    /// SHA-256 (hex) of the authorization code.
    pub code_hash: String,

    /// Client the code was issued to.
    pub client_id: String,

    /// Resource owner who approved the request.
    pub subject: String,

    /// Approved scope.
    pub scope: BTreeSet<String>,

    /// Redirect target of the authorization request.
    pub redirect_uri: Url,

    /// Creation instant.
    #[serde(with = "time::serde::rfc3339")]
    pub created_at: OffsetDateTime,

    /// Last instant at which the code may be redeemed.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Stored state, `Issued` or `Redeemed`.
    pub state: GrantState,

    /// When the code was exchanged.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub redeemed_at: Option<OffsetDateTime>,
}

impl AuthorizationGrant {
    /// Generates a new authorization code: 32 random bytes, base64url without
    /// padding (43 characters).
    #[must_use]
    pub fn generate_code() -> String {
        let mut bytes = [0u8; 32];
        rand::Rng::fill(&mut rand::thread_rng(), &mut bytes);
        URL_SAFE_NO_PAD.encode(bytes)
    }

    /// Hashes a code for storage and lookup.
    #[must_use]
    pub fn hash_code(code: &str) -> String {
        hex::encode(Sha256::digest(code.as_bytes()))
    }

    /// Returns `true` if the code's lifetime has elapsed at `now`.
    #[must_use]
    pub fn is_expired_at(&self, now: OffsetDateTime) -> bool {
        now > self.expires_at
    }

    /// State at `now`, deriving `Expired` for unredeemed grants.
    #[must_use]
    pub fn state_at(&self, now: OffsetDateTime) -> GrantState {
        match self.state {
            GrantState::Issued if self.is_expired_at(now) => GrantState::Expired,
            state => state,
        }
    }

    /// Space-delimited scope string.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scope.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }
}

/// A freshly created grant together with its plaintext code.
#[derive(Clone)]
pub struct NewGrant {
    /// Plaintext code, handed to the client exactly once.
    pub code: String,
    /// The stored grant.
    pub grant: AuthorizationGrant,
}

impl fmt::Debug for NewGrant {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("NewGrant")
            .field("code", &"[REDACTED]")
            .field("grant", &self.grant)
            .finish()
    }
}
