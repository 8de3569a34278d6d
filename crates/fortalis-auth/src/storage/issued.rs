//! Issued credential audit storage.
//!
//! Every credential the engine mints is recorded here by ID only, with the
//! grant it descends from and, for rotated refresh tokens, the token it
//! replaced. The `rotated_from` links form the refresh chain walked by
//! revocation cascades.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::token::{CredentialData, CredentialKind};

/// Audit entry for one issued credential.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssuedCredential {
    /// Credential ID.
    pub id: Uuid,

    /// Access or refresh.
    pub kind: CredentialKind,

    /// Client the credential was issued to.
    pub client_id: String,

    /// Authenticated principal.
    pub subject: String,

    /// Grant the credential descends from.
    pub grant_id: Uuid,

    /// Issue instant.
    #[serde(with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// Expiry instant.
    #[serde(with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Refresh token this one replaced.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rotated_from: Option<Uuid>,
}

impl IssuedCredential {
    /// Builds the audit entry for `data`.
    #[must_use]
    pub fn new(data: &CredentialData, grant_id: Uuid, rotated_from: Option<Uuid>) -> Self {
        Self {
            id: data.id,
            kind: data.kind,
            client_id: data.client_id.clone(),
            subject: data.subject.clone(),
            grant_id,
            issued_at: data.issued_at,
            expires_at: data.expires_at,
            rotated_from,
        }
    }

    /// Returns `true` for refresh credentials.
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        matches!(self.kind, CredentialKind::Refresh { .. })
    }
}

/// Storage for issued credential entries.
#[async_trait]
pub trait IssuedCredentialStorage: Send + Sync {
    /// Records several issued credentials, all or none.
    ///
    /// Either every entry becomes visible or, on error, none of them does.
    /// A SQL backend wraps the inserts in one transaction.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry with the same ID exists or the storage
    /// operation fails.
    async fn record_all(&self, entries: &[IssuedCredential]) -> AuthResult<()>;

    /// Records one issued credential.
    ///
    /// # Errors
    ///
    /// Returns an error if an entry with the same ID exists or the storage
    /// operation fails.
    async fn record(&self, entry: &IssuedCredential) -> AuthResult<()> {
        self.record_all(std::slice::from_ref(entry)).await
    }

    /// Finds an entry by credential ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find(&self, id: Uuid) -> AuthResult<Option<IssuedCredential>>;

    /// Entries whose `rotated_from` is `parent`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_rotated_from(&self, parent: Uuid) -> AuthResult<Vec<IssuedCredential>>;

    /// Entries descending from grant `grant_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_grant(&self, grant_id: Uuid) -> AuthResult<Vec<IssuedCredential>>;

    /// Deletes entries that expired before `before`.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired(&self, before: OffsetDateTime) -> AuthResult<u64>;
}
