//! Signing key material and lifecycle state.
//!
//! A [`SigningKey`] pairs the public half of a key (always available, exported
//! as JWK and SPKI PEM) with its private half. The private half is only
//! reachable through the crate-internal [`SigningKey::sign`], and is dropped
//! when the key is retired.

use std::fmt;
use std::str::FromStr;

use base64::{Engine, engine::general_purpose::URL_SAFE_NO_PAD};
use elliptic_curve::sec1::ToEncodedPoint;
use jsonwebtoken::{Algorithm, DecodingKey, EncodingKey};
use p256::{PublicKey as EcPublicKey, SecretKey as EcSecretKey};
use rand::RngCore;
use rand::rngs::OsRng;
use rsa::pkcs8::{DecodePrivateKey, DecodePublicKey, EncodePrivateKey, EncodePublicKey, LineEnding};
use rsa::traits::PublicKeyParts;
use rsa::{RsaPrivateKey, RsaPublicKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use time::{Duration, OffsetDateTime};
use zeroize::Zeroizing;

use super::jwks::Jwk;
use crate::AuthResult;
use crate::error::AuthError;

const RSA_KEY_BITS: usize = 2048;

// ============================================================================
// Algorithm and Status
// ============================================================================

/// Supported signing algorithms.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyAlgorithm {
    /// RSASSA-PKCS1-v1_5 with SHA-256 over RSA-2048.
    #[serde(rename = "RS256")]
    Rs256,
    /// ECDSA with SHA-256 over P-256.
    #[serde(rename = "ES256")]
    Es256,
}

impl KeyAlgorithm {
    /// Converts to the `jsonwebtoken` Algorithm type.
    #[must_use]
    pub fn to_jwt_algorithm(self) -> Algorithm {
        match self {
            Self::Rs256 => Algorithm::RS256,
            Self::Es256 => Algorithm::ES256,
        }
    }

    /// Returns the algorithm name as used in JWK/JWT headers.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Rs256 => "RS256",
            Self::Es256 => "ES256",
        }
    }
}

impl fmt::Display for KeyAlgorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyAlgorithm {
    type Err = AuthError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "RS256" => Ok(Self::Rs256),
            "ES256" => Ok(Self::Es256),
            other => Err(AuthError::configuration(format!(
                "unsupported signing algorithm: {other}"
            ))),
        }
    }
}

/// Lifecycle state of a signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Generated but not yet published.
    Pending,
    /// Signs new credentials.
    Active,
    /// Verifies only, until its not-after passes.
    Retiring,
    /// Private material deleted; kept for audit.
    Retired,
}

impl KeyStatus {
    /// Returns the status as a lowercase string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Retiring => "retiring",
            Self::Retired => "retired",
        }
    }
}

impl fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

// ============================================================================
// Signing Key
// ============================================================================

/// An asymmetric signing key and its validity window.
#[derive(Clone)]
pub struct SigningKey {
    kid: String,
    algorithm: KeyAlgorithm,
    status: KeyStatus,
    not_before: OffsetDateTime,
    not_after: OffsetDateTime,
    private: Option<PrivateMaterial>,
    public: PublicMaterial,
}

#[derive(Clone)]
struct PrivateMaterial {
    encoding_key: EncodingKey,
    pem: Zeroizing<String>,
}

#[derive(Clone)]
struct PublicMaterial {
    decoding_key: DecodingKey,
    pem: String,
    components: PublicKeyData,
}

#[derive(Clone)]
enum PublicKeyData {
    Rsa { n: Vec<u8>, e: Vec<u8> },
    Ec { x: Vec<u8>, y: Vec<u8> },
}

/// Public metadata of a key, for external persistence and audit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigningKeyRecord {
    /// Key ID.
    pub kid: String,
    /// Signing algorithm.
    pub algorithm: KeyAlgorithm,
    /// Lifecycle state.
    pub status: KeyStatus,
    /// Start of the validity window.
    #[serde(with = "time::serde::rfc3339")]
    pub not_before: OffsetDateTime,
    /// End of the validity window.
    #[serde(with = "time::serde::rfc3339")]
    pub not_after: OffsetDateTime,
    /// SPKI PEM of the public key.
    pub public_key_pem: String,
}

impl SigningKey {
    /// Generates a new `Pending` key pair valid from `not_before` for `lifetime`.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if the key pair cannot be created.
    pub fn generate(
        algorithm: KeyAlgorithm,
        not_before: OffsetDateTime,
        lifetime: Duration,
    ) -> AuthResult<Self> {
        let (private, public) = match algorithm {
            KeyAlgorithm::Rs256 => {
                let private_key =
                    RsaPrivateKey::new(&mut OsRng, RSA_KEY_BITS).map_err(key_error)?;
                rsa_material(&private_key)?
            }
            KeyAlgorithm::Es256 => ec_material(&EcSecretKey::random(&mut OsRng))?,
        };

        Ok(Self {
            kid: random_kid(),
            algorithm,
            status: KeyStatus::Pending,
            not_before,
            not_after: expiry_after(not_before, lifetime)?,
            private: Some(private),
            public,
        })
    }

    /// Loads a `Pending` key pair from PKCS#8 (private) and SPKI (public) PEM.
    ///
    /// The key ID is derived from the public key, so the same files always
    /// produce the same `kid`.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if either PEM is invalid, the RSA modulus is
    /// shorter than 2048 bits, or the public key does not belong to the
    /// private key.
    pub fn from_pem(
        algorithm: KeyAlgorithm,
        private_pem: &str,
        public_pem: &str,
        not_before: OffsetDateTime,
        lifetime: Duration,
    ) -> AuthResult<Self> {
        let (private, public) = match algorithm {
            KeyAlgorithm::Rs256 => {
                let private_key = RsaPrivateKey::from_pkcs8_pem(private_pem).map_err(key_error)?;
                if private_key.size() * 8 < RSA_KEY_BITS {
                    return Err(AuthError::key_generation(format!(
                        "RSA key must be at least {RSA_KEY_BITS} bits"
                    )));
                }
                let public_key = RsaPublicKey::from_public_key_pem(public_pem).map_err(key_error)?;
                if public_key != private_key.to_public_key() {
                    return Err(AuthError::key_generation(
                        "public key does not match private key",
                    ));
                }
                rsa_material(&private_key)?
            }
            KeyAlgorithm::Es256 => {
                let secret_key = EcSecretKey::from_pkcs8_pem(private_pem).map_err(key_error)?;
                let public_key = EcPublicKey::from_public_key_pem(public_pem).map_err(key_error)?;
                if public_key != secret_key.public_key() {
                    return Err(AuthError::key_generation(
                        "public key does not match private key",
                    ));
                }
                ec_material(&secret_key)?
            }
        };

        Ok(Self {
            kid: derived_kid(&public.pem),
            algorithm,
            status: KeyStatus::Pending,
            not_before,
            not_after: expiry_after(not_before, lifetime)?,
            private: Some(private),
            public,
        })
    }

    /// Key ID.
    #[must_use]
    pub fn kid(&self) -> &str {
        &self.kid
    }

    /// Signing algorithm.
    #[must_use]
    pub fn algorithm(&self) -> KeyAlgorithm {
        self.algorithm
    }

    /// Lifecycle state.
    #[must_use]
    pub fn status(&self) -> KeyStatus {
        self.status
    }

    /// Start of the validity window.
    #[must_use]
    pub fn not_before(&self) -> OffsetDateTime {
        self.not_before
    }

    /// End of the validity window.
    ///
    /// For an `Active` key this is the date by which it should be rotated;
    /// for a `Retiring` key it is the end of its verification grace period.
    #[must_use]
    pub fn not_after(&self) -> OffsetDateTime {
        self.not_after
    }

    /// SPKI PEM of the public key.
    #[must_use]
    pub fn public_key_pem(&self) -> &str {
        &self.public.pem
    }

    /// Returns `true` while the private half is still held.
    #[must_use]
    pub fn has_private_material(&self) -> bool {
        self.private.is_some()
    }

    /// Returns `true` if tokens signed by this key may be accepted at `now`.
    #[must_use]
    pub fn accepts_verification_at(&self, now: OffsetDateTime) -> bool {
        match self.status {
            KeyStatus::Active => true,
            KeyStatus::Retiring => now <= self.not_after,
            KeyStatus::Pending | KeyStatus::Retired => false,
        }
    }

    /// Exports the public key as a JWK.
    #[must_use]
    pub fn to_jwk(&self) -> Jwk {
        match &self.public.components {
            PublicKeyData::Rsa { n, e } => Jwk {
                kty: "RSA".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: Some(URL_SAFE_NO_PAD.encode(n)),
                e: Some(URL_SAFE_NO_PAD.encode(e)),
                crv: None,
                x: None,
                y: None,
            },
            PublicKeyData::Ec { x, y } => Jwk {
                kty: "EC".to_string(),
                kid: self.kid.clone(),
                use_: "sig".to_string(),
                alg: self.algorithm.as_str().to_string(),
                n: None,
                e: None,
                crv: Some("P-256".to_string()),
                x: Some(URL_SAFE_NO_PAD.encode(x)),
                y: Some(URL_SAFE_NO_PAD.encode(y)),
            },
        }
    }

    /// Exports public metadata.
    #[must_use]
    pub fn to_record(&self) -> SigningKeyRecord {
        SigningKeyRecord {
            kid: self.kid.clone(),
            algorithm: self.algorithm,
            status: self.status,
            not_before: self.not_before,
            not_after: self.not_after,
            public_key_pem: self.public.pem.clone(),
        }
    }

    /// Signs `message`, returning the base64url signature.
    pub(crate) fn sign(&self, message: &[u8]) -> AuthResult<String> {
        let private = self.private.as_ref().ok_or_else(|| {
            AuthError::internal(format!("key {} has no private material", self.kid))
        })?;

        jsonwebtoken::crypto::sign(
            message,
            &private.encoding_key,
            self.algorithm.to_jwt_algorithm(),
        )
        .map_err(|e| AuthError::internal(format!("signing failed: {e}")))
    }

    /// Checks a base64url signature over `message`.
    ///
    /// Undecodable signatures count as a mismatch.
    pub(crate) fn verify(&self, message: &[u8], signature: &str) -> bool {
        jsonwebtoken::crypto::verify(
            signature,
            message,
            &self.public.decoding_key,
            self.algorithm.to_jwt_algorithm(),
        )
        .unwrap_or(false)
    }

    /// PKCS#8 PEM of the private key, for writing key files.
    pub(crate) fn private_key_pem(&self) -> Option<&str> {
        self.private.as_ref().map(|p| p.pem.as_str())
    }

    pub(crate) fn activated(&self) -> Self {
        Self {
            status: KeyStatus::Active,
            ..self.clone()
        }
    }

    pub(crate) fn retiring(&self, until: OffsetDateTime) -> Self {
        Self {
            status: KeyStatus::Retiring,
            not_after: until,
            ..self.clone()
        }
    }

    /// Copy in `Retired` state with the private half dropped.
    pub(crate) fn retired(&self) -> Self {
        Self {
            kid: self.kid.clone(),
            algorithm: self.algorithm,
            status: KeyStatus::Retired,
            not_before: self.not_before,
            not_after: self.not_after,
            private: None,
            public: self.public.clone(),
        }
    }
}

impl fmt::Debug for SigningKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SigningKey")
            .field("kid", &self.kid)
            .field("algorithm", &self.algorithm)
            .field("status", &self.status)
            .field("not_before", &self.not_before)
            .field("not_after", &self.not_after)
            .field("private", &self.private.as_ref().map(|_| "[REDACTED]"))
            .finish()
    }
}

fn rsa_material(private_key: &RsaPrivateKey) -> AuthResult<(PrivateMaterial, PublicMaterial)> {
    let public_key = private_key.to_public_key();
    let n = public_key.n().to_bytes_be();
    let e = public_key.e().to_bytes_be();

    let private_pem = private_key.to_pkcs8_pem(LineEnding::LF).map_err(key_error)?;
    let encoding_key = EncodingKey::from_rsa_pem(private_pem.as_bytes()).map_err(key_error)?;

    let public_pem = public_key.to_public_key_pem(LineEnding::LF).map_err(key_error)?;
    let decoding_key = DecodingKey::from_rsa_pem(public_pem.as_bytes()).map_err(key_error)?;

    Ok((
        PrivateMaterial {
            encoding_key,
            pem: private_pem,
        },
        PublicMaterial {
            decoding_key,
            pem: public_pem,
            components: PublicKeyData::Rsa { n, e },
        },
    ))
}

fn ec_material(secret_key: &EcSecretKey) -> AuthResult<(PrivateMaterial, PublicMaterial)> {
    let public_key = secret_key.public_key();

    let point = public_key.to_encoded_point(false);
    let x = point
        .x()
        .ok_or_else(|| AuthError::key_generation("Missing x coordinate"))?;
    let y = point
        .y()
        .ok_or_else(|| AuthError::key_generation("Missing y coordinate"))?;

    // jsonwebtoken only accepts PKCS#8 for EC private keys
    let private_pem = secret_key.to_pkcs8_pem(LineEnding::LF).map_err(key_error)?;
    let encoding_key = EncodingKey::from_ec_pem(private_pem.as_bytes()).map_err(key_error)?;

    let x_b64 = URL_SAFE_NO_PAD.encode(&x[..]);
    let y_b64 = URL_SAFE_NO_PAD.encode(&y[..]);
    let decoding_key = DecodingKey::from_ec_components(&x_b64, &y_b64).map_err(key_error)?;

    let public_pem = public_key.to_public_key_pem(LineEnding::LF).map_err(key_error)?;

    Ok((
        PrivateMaterial {
            encoding_key,
            pem: private_pem,
        },
        PublicMaterial {
            decoding_key,
            pem: public_pem,
            components: PublicKeyData::Ec {
                x: x.to_vec(),
                y: y.to_vec(),
            },
        },
    ))
}

fn key_error(err: impl fmt::Display) -> AuthError {
    AuthError::key_generation(err.to_string())
}

fn expiry_after(not_before: OffsetDateTime, lifetime: Duration) -> AuthResult<OffsetDateTime> {
    not_before
        .checked_add(lifetime)
        .ok_or_else(|| AuthError::key_generation("key lifetime is out of range"))
}

fn random_kid() -> String {
    let mut buf = [0u8; 8];
    OsRng.fill_bytes(&mut buf);
    URL_SAFE_NO_PAD.encode(buf)
}

fn derived_kid(public_pem: &str) -> String {
    let digest = Sha256::digest(public_pem.as_bytes());
    URL_SAFE_NO_PAD.encode(&digest[..8])
}

#[cfg(test)]
mod tests {
    use super::*;

    fn now() -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }

    #[test]
    fn test_generate_rsa_key() {
        let key = SigningKey::generate(KeyAlgorithm::Rs256, now(), Duration::days(90)).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::Rs256);
        assert_eq!(key.status(), KeyStatus::Pending);
        assert!(key.has_private_material());
        assert!(key.public_key_pem().starts_with("-----BEGIN PUBLIC KEY-----"));
        assert_eq!(key.not_after() - key.not_before(), Duration::days(90));
    }

    #[test]
    fn test_generate_ec_key() {
        let key = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::days(1)).unwrap();
        assert_eq!(key.algorithm(), KeyAlgorithm::Es256);
        assert!(!key.kid().is_empty());
    }

    #[test]
    fn test_generate_rejects_unrepresentable_lifetime() {
        let err = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::MAX).unwrap_err();
        assert!(matches!(err, AuthError::KeyGeneration { .. }), "{err:?}");
    }

    #[test]
    fn test_sign_and_verify() {
        for algorithm in [KeyAlgorithm::Rs256, KeyAlgorithm::Es256] {
            let key = SigningKey::generate(algorithm, now(), Duration::days(1)).unwrap();
            let signature = key.sign(b"header.payload").unwrap();
            assert!(key.verify(b"header.payload", &signature));
            assert!(!key.verify(b"header.payload2", &signature));
            assert!(!key.verify(b"header.payload", "not base64 !"));
        }
    }

    #[test]
    fn test_signature_from_other_key_rejected() {
        let a = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::days(1)).unwrap();
        let b = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::days(1)).unwrap();
        let signature = a.sign(b"message").unwrap();
        assert!(!b.verify(b"message", &signature));
    }

    #[test]
    fn test_retired_key_drops_private_material() {
        let key = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::days(1)).unwrap();
        let retired = key.retired();

        assert_eq!(retired.status(), KeyStatus::Retired);
        assert!(!retired.has_private_material());
        assert!(retired.private_key_pem().is_none());
        assert!(retired.sign(b"message").is_err());
        assert_eq!(retired.public_key_pem(), key.public_key_pem());
    }

    #[test]
    fn test_verification_window() {
        let start = now();
        let key = SigningKey::generate(KeyAlgorithm::Es256, start, Duration::days(1)).unwrap();
        assert!(!key.accepts_verification_at(start));

        let active = key.activated();
        assert!(active.accepts_verification_at(start + Duration::days(365)));

        let until = start + Duration::hours(24);
        let retiring = active.retiring(until);
        assert!(retiring.accepts_verification_at(until));
        assert!(!retiring.accepts_verification_at(until + Duration::microseconds(1)));

        assert!(!retiring.retired().accepts_verification_at(start));
    }

    #[test]
    fn test_from_pem_roundtrip_keeps_kid_stable() {
        for algorithm in [KeyAlgorithm::Rs256, KeyAlgorithm::Es256] {
            let key = SigningKey::generate(algorithm, now(), Duration::days(1)).unwrap();
            let private_pem = key.private_key_pem().unwrap();

            let a = SigningKey::from_pem(
                algorithm,
                private_pem,
                key.public_key_pem(),
                now(),
                Duration::days(1),
            )
            .unwrap();
            let b = SigningKey::from_pem(
                algorithm,
                private_pem,
                key.public_key_pem(),
                now(),
                Duration::days(1),
            )
            .unwrap();

            assert_eq!(a.kid(), b.kid());
            let signature = a.sign(b"message").unwrap();
            assert!(key.verify(b"message", &signature));
        }
    }

    #[test]
    fn test_from_pem_rejects_mismatched_public_key() {
        let a = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::days(1)).unwrap();
        let b = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::days(1)).unwrap();

        let err = SigningKey::from_pem(
            KeyAlgorithm::Es256,
            a.private_key_pem().unwrap(),
            b.public_key_pem(),
            now(),
            Duration::days(1),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::KeyGeneration { .. }));
    }

    #[test]
    fn test_from_pem_rejects_garbage() {
        let err = SigningKey::from_pem(
            KeyAlgorithm::Rs256,
            "not a pem",
            "not a pem",
            now(),
            Duration::days(1),
        )
        .unwrap_err();
        assert!(matches!(err, AuthError::KeyGeneration { .. }));
    }

    #[test]
    fn test_jwk_export() {
        let rsa = SigningKey::generate(KeyAlgorithm::Rs256, now(), Duration::days(1)).unwrap();
        let jwk = rsa.to_jwk();
        assert_eq!(jwk.kty, "RSA");
        assert_eq!(jwk.alg, "RS256");
        assert_eq!(jwk.kid, rsa.kid());
        assert!(jwk.n.is_some() && jwk.e.is_some());

        let ec = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::days(1)).unwrap();
        let jwk = ec.to_jwk();
        assert_eq!(jwk.kty, "EC");
        assert_eq!(jwk.crv.as_deref(), Some("P-256"));
        assert!(jwk.x.is_some() && jwk.y.is_some());
    }

    #[test]
    fn test_debug_redacts_private_material() {
        let key = SigningKey::generate(KeyAlgorithm::Es256, now(), Duration::days(1)).unwrap();
        let debug = format!("{:?}", key);
        assert!(debug.contains("[REDACTED]"));
        assert!(!debug.contains("PRIVATE KEY"));
    }

    #[test]
    fn test_algorithm_parsing() {
        assert_eq!("RS256".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Rs256);
        assert_eq!("ES256".parse::<KeyAlgorithm>().unwrap(), KeyAlgorithm::Es256);
        assert!("HS256".parse::<KeyAlgorithm>().is_err());
        assert_eq!(KeyStatus::Retiring.to_string(), "retiring");
    }
}
