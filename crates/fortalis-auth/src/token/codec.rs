//! Compact token encoding, signing and verification.
//!
//! A token is `base64url(header).base64url(payload).base64url(signature)`
//! with no padding. The header is `{"alg","typ":"JWT","kid"}`, the payload is
//! the JSON form of [`CredentialData`], and the signature covers the first two
//! segments joined by `.`.
//!
//! Verification runs in a fixed order: structural parse, key resolution,
//! signature, then time. Only the header and payload segments are parsed, so
//! any damage to the signature segment surfaces as `SignatureInvalid`.

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use serde::{Deserialize, Serialize};
use serde::de::DeserializeOwned;
use time::Duration;
use tracing::{debug, warn};

use super::credential::{Credential, CredentialData};
use crate::clock::SharedClock;
use crate::config::{AuthConfig, to_time_duration};
use crate::error::AuthError;
use crate::keys::{KeyStore, SigningKey};
use crate::{AuthResult, SECURITY_TARGET};

/// Token type written into every header.
pub const TOKEN_TYPE: &str = "JWT";

/// Default clock skew tolerance.
pub const DEFAULT_LEEWAY: Duration = Duration::seconds(60);

/// Protected header of a token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenHeader {
    /// Signing algorithm name.
    pub alg: String,
    /// Token type, always "JWT".
    pub typ: String,
    /// Signing key ID.
    pub kid: String,
}

/// A token that has been parsed but not verified.
///
/// Only for inspection and diagnostics; never authorize on it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UnverifiedToken {
    /// Parsed header.
    pub header: TokenHeader,
    /// Parsed payload.
    pub data: CredentialData,
}

/// Signs and verifies credentials.
#[derive(Clone)]
pub struct TokenCodec {
    issuer: String,
    leeway: Duration,
    clock: SharedClock,
}

impl TokenCodec {
    /// Creates a codec for tokens from `issuer`.
    #[must_use]
    pub fn new(issuer: impl Into<String>, leeway: Duration, clock: SharedClock) -> Self {
        Self {
            issuer: issuer.into(),
            leeway,
            clock,
        }
    }

    /// Creates a codec from engine configuration.
    #[must_use]
    pub fn from_config(config: &AuthConfig, clock: SharedClock) -> Self {
        Self::new(
            config.issuer.clone(),
            to_time_duration(config.tokens.leeway),
            clock,
        )
    }

    /// Issuer this codec signs for.
    #[must_use]
    pub fn issuer(&self) -> &str {
        &self.issuer
    }

    /// Clock skew tolerance.
    #[must_use]
    pub fn leeway(&self) -> Duration {
        self.leeway
    }

    /// Signs `data` with `key`.
    ///
    /// # Errors
    /// Returns `InvalidCredential` if the data breaks an invariant or names a
    /// different issuer, and `Internal` if the key cannot sign.
    pub fn issue(&self, data: &CredentialData, key: &SigningKey) -> AuthResult<String> {
        data.validate()?;
        if data.issuer != self.issuer {
            return Err(AuthError::invalid_credential(format!(
                "issuer {} does not match {}",
                data.issuer, self.issuer
            )));
        }

        let header = TokenHeader {
            alg: key.algorithm().as_str().to_string(),
            typ: TOKEN_TYPE.to_string(),
            kid: key.kid().to_string(),
        };

        let header = encode_segment(&header)?;
        let payload = encode_segment(data)?;
        let signing_input = format!("{header}.{payload}");
        let signature = key.sign(signing_input.as_bytes())?;

        debug!(
            credential_id = %data.id,
            kind = data.kind.as_str(),
            kid = %key.kid(),
            "Issued credential"
        );
        Ok(format!("{signing_input}.{signature}"))
    }

    /// Verifies `token` against the keys in `keys`.
    ///
    /// # Errors
    /// - `Malformed` if the header or payload cannot be parsed
    /// - `KeyUnknown` if no usable key matches the header `kid`
    /// - `SignatureInvalid` if the signature does not verify
    /// - `NotYetValid` / `Expired` if outside the validity window plus leeway
    pub fn verify(&self, token: &str, keys: &KeyStore) -> AuthResult<Credential> {
        let credential = self.verify_signature(token, keys)?;
        self.check_not_before(&credential.data)?;
        self.check_expiry(&credential.data)?;
        Ok(credential)
    }

    /// Verifies `token` like [`verify`](Self::verify) but ignores expiry.
    ///
    /// # Errors
    /// Same as `verify`, without `Expired`.
    pub fn verify_allow_expired(&self, token: &str, keys: &KeyStore) -> AuthResult<Credential> {
        let credential = self.verify_signature(token, keys)?;
        self.check_not_before(&credential.data)?;
        Ok(credential)
    }

    /// Parses `token` without checking its signature or lifetime.
    ///
    /// # Errors
    /// Returns `Malformed` if the header or payload cannot be parsed.
    pub fn decode_unverified(token: &str) -> AuthResult<UnverifiedToken> {
        let parts = TokenParts::parse(token)?;
        Ok(UnverifiedToken {
            header: parts.header,
            data: parts.data,
        })
    }

    fn verify_signature(&self, token: &str, keys: &KeyStore) -> AuthResult<Credential> {
        let parts = TokenParts::parse(token)?;
        let kid = parts.header.kid;

        let key = keys.verification_key(&kid).map_err(|_| {
            debug!(%kid, "Token references unknown or retired key");
            AuthError::key_unknown(kid.clone())
        })?;

        if parts.header.alg != key.algorithm().as_str() {
            warn!(
                target: SECURITY_TARGET,
                %kid,
                alg = %parts.header.alg,
                expected = %key.algorithm(),
                "Token header algorithm does not match key"
            );
            return Err(AuthError::SignatureInvalid);
        }

        if !key.verify(parts.signing_input.as_bytes(), parts.signature) {
            warn!(target: SECURITY_TARGET, %kid, "Token signature verification failed");
            return Err(AuthError::SignatureInvalid);
        }

        if parts.data.issuer != self.issuer {
            return Err(AuthError::malformed(format!(
                "unexpected issuer: {}",
                parts.data.issuer
            )));
        }

        Ok(Credential {
            key_id: kid,
            data: parts.data,
        })
    }

    fn check_not_before(&self, data: &CredentialData) -> AuthResult<()> {
        if data.issued_at > self.clock.now().saturating_add(self.leeway) {
            debug!(credential_id = %data.id, "Token issued in the future");
            return Err(AuthError::NotYetValid);
        }
        Ok(())
    }

    fn check_expiry(&self, data: &CredentialData) -> AuthResult<()> {
        if self.clock.now() > data.expires_at.saturating_add(self.leeway) {
            debug!(credential_id = %data.id, "Token expired");
            return Err(AuthError::Expired);
        }
        Ok(())
    }
}

impl std::fmt::Debug for TokenCodec {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenCodec")
            .field("issuer", &self.issuer)
            .field("leeway", &self.leeway)
            .finish_non_exhaustive()
    }
}

struct TokenParts<'a> {
    header: TokenHeader,
    data: CredentialData,
    signing_input: &'a str,
    signature: &'a str,
}

impl<'a> TokenParts<'a> {
    fn parse(token: &'a str) -> AuthResult<Self> {
        let mut segments = token.splitn(3, '.');
        let (Some(header), Some(payload), Some(signature)) =
            (segments.next(), segments.next(), segments.next())
        else {
            return Err(AuthError::malformed("expected three dot-separated segments"));
        };

        let header_value: TokenHeader = decode_segment(header, "header")?;
        if header_value.typ != TOKEN_TYPE {
            return Err(AuthError::malformed(format!(
                "unexpected token type: {}",
                header_value.typ
            )));
        }

        let data: CredentialData = decode_segment(payload, "payload")?;
        data.validate()
            .map_err(|e| AuthError::malformed(format!("payload: {e}")))?;

        Ok(Self {
            header: header_value,
            data,
            signing_input: &token[..header.len() + 1 + payload.len()],
            signature,
        })
    }
}

fn encode_segment<T: Serialize>(value: &T) -> AuthResult<String> {
    let json = serde_json::to_vec(value)
        .map_err(|e| AuthError::internal(format!("failed to serialize token segment: {e}")))?;
    Ok(URL_SAFE_NO_PAD.encode(json))
}

fn decode_segment<T: DeserializeOwned>(segment: &str, name: &str) -> AuthResult<T> {
    let bytes = URL_SAFE_NO_PAD
        .decode(segment)
        .map_err(|e| AuthError::malformed(format!("{name} is not base64url: {e}")))?;
    serde_json::from_slice(&bytes)
        .map_err(|e| AuthError::malformed(format!("{name} is not valid JSON: {e}")))
}
