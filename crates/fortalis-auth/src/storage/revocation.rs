//! Revocation record storage trait.
//!
//! A revocation record makes a credential permanently invalid. Records are
//! keyed by credential ID, and the first record written for an ID wins.

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;

/// Why a credential was revoked.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RevocationReason {
    /// Revoked on request of the holder or an operator.
    Requested,
    /// Refresh token replaced by its successor.
    Rotated,
    /// A rotated-out refresh token was presented again.
    ReuseDetected,
    /// An ancestor in the refresh chain was revoked.
    Cascade,
    /// The grant the credential came from was revoked.
    GrantRevoked,
    /// Key or client compromise.
    Compromised,
}

impl RevocationReason {
    /// Returns the reason as a snake_case string.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Requested => "requested",
            Self::Rotated => "rotated",
            Self::ReuseDetected => "reuse_detected",
            Self::Cascade => "cascade",
            Self::GrantRevoked => "grant_revoked",
            Self::Compromised => "compromised",
        }
    }
}

impl fmt::Display for RevocationReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A permanent revocation of one credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RevocationRecord {
    /// Revoked credential ID.
    pub credential_id: Uuid,

    /// Revocation instant.
    #[serde(with = "time::serde::rfc3339")]
    pub revoked_at: OffsetDateTime,

    /// Why it was revoked.
    pub reason: RevocationReason,

    /// Natural expiry of the credential, when known. After it passes the
    /// record may be cleaned up.
    #[serde(
        default,
        skip_serializing_if = "Option::is_none",
        with = "time::serde::rfc3339::option"
    )]
    pub expires_at: Option<OffsetDateTime>,
}

/// Storage for revocation records.
#[async_trait]
pub trait RevocationStorage: Send + Sync {
    /// Inserts `record` unless its credential is already revoked.
    ///
    /// # Returns
    ///
    /// `None` if the record was inserted, otherwise the record already
    /// present. The check and the insert must be atomic.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn insert_if_absent(
        &self,
        record: &RevocationRecord,
    ) -> AuthResult<Option<RevocationRecord>>;

    /// Finds the revocation record of a credential.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, credential_id: Uuid) -> AuthResult<Option<RevocationRecord>>;

    /// Returns `true` if the credential is revoked.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn is_revoked(&self, credential_id: Uuid) -> AuthResult<bool> {
        Ok(self.find(credential_id).await?.is_some())
    }

    /// Deletes records of credentials that expired before `before`.
    ///
    /// Records without a known expiry are kept.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired(&self, before: OffsetDateTime) -> AuthResult<u64>;
}
