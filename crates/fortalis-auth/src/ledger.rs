//! Session ledger: grants, issued credentials and revocations.
//!
//! The ledger holds identifiers only, never tokens or codes. Every storage
//! call is bounded by the configured timeout; a timeout surfaces as
//! [`AuthError::StorageUnavailable`] and is never retried here.

use std::collections::{BTreeSet, HashSet};
use std::future::Future;
use std::sync::Arc;

use time::{Duration, OffsetDateTime};
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

use crate::clock::SharedClock;
use crate::config::{AuthConfig, to_time_duration};
use crate::error::AuthError;
use crate::oauth::grant::{AuthorizationGrant, GrantState, NewGrant};
use crate::storage::{
    GrantStorage, IssuedCredential, IssuedCredentialStorage, MemoryGrantStorage,
    MemoryIssuedCredentialStorage, MemoryRevocationStorage, RedeemOutcome, RevocationReason,
    RevocationRecord, RevocationStorage,
};
use crate::token::CredentialData;
use crate::{AuthResult, SECURITY_TARGET};

/// Tunables of the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LedgerSettings {
    /// Lifetime of authorization codes.
    pub code_lifetime: Duration,
    /// Upper bound for each storage call.
    pub storage_timeout: std::time::Duration,
    /// Revoke everything issued from a grant when its code is replayed.
    pub revoke_on_code_reuse: bool,
    /// How long past expiry records are kept, to cover verification leeway.
    pub retention: Duration,
}

impl Default for LedgerSettings {
    fn default() -> Self {
        Self {
            code_lifetime: Duration::seconds(90),
            storage_timeout: std::time::Duration::from_secs(2),
            revoke_on_code_reuse: true,
            retention: Duration::seconds(60),
        }
    }
}

impl LedgerSettings {
    /// Builds settings from engine configuration.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            code_lifetime: to_time_duration(config.grants.code_lifetime),
            storage_timeout: config.storage.timeout,
            revoke_on_code_reuse: config.grants.revoke_tokens_on_code_reuse,
            retention: to_time_duration(config.tokens.leeway),
        }
    }
}

/// Result of [`SessionLedger::consume_refresh`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ConsumeOutcome {
    /// This call revoked the token; the caller may issue its successor.
    Consumed,
    /// The token was already revoked.
    AlreadyRevoked(RevocationRecord),
}

/// Counts returned by [`SessionLedger::cleanup_expired`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CleanupReport {
    /// Authorization grants deleted.
    pub grants: u64,
    /// Revocation records deleted.
    pub revocations: u64,
    /// Issued credential entries deleted.
    pub issued: u64,
}

/// Tracks grants, issued credentials and revocation state.
#[derive(Clone)]
pub struct SessionLedger {
    grants: Arc<dyn GrantStorage>,
    revocations: Arc<dyn RevocationStorage>,
    issued: Arc<dyn IssuedCredentialStorage>,
    clock: SharedClock,
    settings: LedgerSettings,
}

impl SessionLedger {
    /// Creates a ledger over the given storage backends.
    #[must_use]
    pub fn new(
        grants: Arc<dyn GrantStorage>,
        revocations: Arc<dyn RevocationStorage>,
        issued: Arc<dyn IssuedCredentialStorage>,
        clock: SharedClock,
        settings: LedgerSettings,
    ) -> Self {
        Self {
            grants,
            revocations,
            issued,
            clock,
            settings,
        }
    }

    /// Creates a ledger over fresh in-memory storage.
    #[must_use]
    pub fn in_memory(clock: SharedClock, settings: LedgerSettings) -> Self {
        Self::new(
            Arc::new(MemoryGrantStorage::new()),
            Arc::new(MemoryRevocationStorage::new()),
            Arc::new(MemoryIssuedCredentialStorage::new()),
            clock,
            settings,
        )
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &LedgerSettings {
        &self.settings
    }

    // ------------------------------------------------------------------------
    // Grants
    // ------------------------------------------------------------------------

    /// Creates a grant and returns it with its single-use code.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn create_grant(
        &self,
        client_id: &str,
        subject: &str,
        scope: BTreeSet<String>,
        redirect_uri: Url,
    ) -> AuthResult<NewGrant> {
        let now = self.clock.now();
        let expires_at = now
            .checked_add(self.settings.code_lifetime)
            .ok_or_else(|| AuthError::configuration("code_lifetime is out of range"))?;
        let code = AuthorizationGrant::generate_code();
        let grant = AuthorizationGrant {
            id: Uuid::new_v4(),
            code_hash: AuthorizationGrant::hash_code(&code),
            client_id: client_id.to_string(),
            subject: subject.to_string(),
            scope,
            redirect_uri,
            created_at: now,
            expires_at,
            state: GrantState::Issued,
            redeemed_at: None,
        };

        self.bounded("create_grant", self.grants.create(&grant))
            .await?;

        debug!(grant_id = %grant.id, client_id, "Created authorization grant");
        Ok(NewGrant { code, grant })
    }

    /// Redeems a code, succeeding for exactly one caller.
    ///
    /// # Errors
    /// - `GrantNotFound` if no grant has this code
    /// - `GrantExpired` if the code outlived its lifetime unredeemed
    /// - `AlreadyRedeemed` if the code was exchanged before
    /// - `StorageUnavailable` on timeout
    pub async fn redeem_grant(&self, code: &str) -> AuthResult<AuthorizationGrant> {
        let code_hash = AuthorizationGrant::hash_code(code);
        let now = self.clock.now();

        match self
            .bounded("redeem_grant", self.grants.redeem(&code_hash, now))
            .await?
        {
            RedeemOutcome::Redeemed(grant) => {
                debug!(grant_id = %grant.id, "Redeemed authorization grant");
                Ok(grant)
            }
            RedeemOutcome::AlreadyRedeemed(grant) => {
                warn!(
                    target: SECURITY_TARGET,
                    grant_id = %grant.id,
                    client_id = %grant.client_id,
                    "Authorization code presented more than once"
                );
                if self.settings.revoke_on_code_reuse {
                    self.revoke_grant(grant.id, RevocationReason::ReuseDetected, true)
                        .await?;
                }
                Err(AuthError::AlreadyRedeemed)
            }
            RedeemOutcome::Expired => Err(AuthError::GrantExpired),
            RedeemOutcome::NotFound => Err(AuthError::GrantNotFound),
        }
    }

    /// Looks up a grant by its plaintext code without changing its state.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn find_grant_by_code(&self, code: &str) -> AuthResult<Option<AuthorizationGrant>> {
        let code_hash = AuthorizationGrant::hash_code(code);
        self.bounded("find_grant_by_code", self.grants.find_by_code_hash(&code_hash))
            .await
    }

    /// Looks up a grant by ID.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn find_grant(&self, grant_id: Uuid) -> AuthResult<Option<AuthorizationGrant>> {
        self.bounded("find_grant", self.grants.find_by_id(grant_id))
            .await
    }

    /// Deletes grants whose lifetime has ended.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn cleanup_expired_grants(&self) -> AuthResult<u64> {
        let now = self.clock.now();
        let removed = self
            .bounded("cleanup_grants", self.grants.delete_expired(now))
            .await?;
        if removed > 0 {
            info!(removed, "Cleaned up expired authorization grants");
        }
        Ok(removed)
    }

    /// Deletes expired grants, and revocation and issued entries whose
    /// credentials are past expiry plus retention.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn cleanup_expired(&self) -> AuthResult<CleanupReport> {
        let cutoff = self.clock.now().saturating_sub(self.settings.retention);
        let grants = self.cleanup_expired_grants().await?;
        let revocations = self
            .bounded("cleanup_revocations", self.revocations.delete_expired(cutoff))
            .await?;
        let issued = self
            .bounded("cleanup_issued", self.issued.delete_expired(cutoff))
            .await?;

        Ok(CleanupReport {
            grants,
            revocations,
            issued,
        })
    }

    // ------------------------------------------------------------------------
    // Issued credentials and revocation
    // ------------------------------------------------------------------------

    /// Records a minted credential, linked to its grant and, for a rotated
    /// refresh token, to its predecessor.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn register_issued(
        &self,
        credential: &CredentialData,
        grant_id: Uuid,
        rotated_from: Option<Uuid>,
    ) -> AuthResult<()> {
        let entry = IssuedCredential::new(credential, grant_id, rotated_from);
        self.bounded("register_issued", self.issued.record(&entry))
            .await
    }

    /// Records a batch of minted credentials in one storage call. Either all
    /// entries are stored or none is.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn register_issued_all(&self, entries: &[IssuedCredential]) -> AuthResult<()> {
        self.bounded("register_issued", self.issued.record_all(entries))
            .await
    }

    /// Looks up the audit entry of a credential.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn find_issued(&self, id: Uuid) -> AuthResult<Option<IssuedCredential>> {
        self.bounded("find_issued", self.issued.find(id)).await
    }

    /// Returns `true` if the credential is revoked.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn is_revoked(&self, id: Uuid) -> AuthResult<bool> {
        self.bounded("is_revoked", self.revocations.is_revoked(id))
            .await
    }

    /// Returns the revocation record of a credential, if any.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn find_revocation(&self, id: Uuid) -> AuthResult<Option<RevocationRecord>> {
        self.bounded("find_revocation", self.revocations.find(id))
            .await
    }

    /// Revokes a credential. The first revocation record for an ID wins.
    ///
    /// Revoking a refresh token also revokes every refresh token rotated from
    /// it, transitively, even when the token itself was already revoked.
    /// Access tokens are left to expire.
    ///
    /// Returns the number of records newly written.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn revoke(&self, id: Uuid, reason: RevocationReason) -> AuthResult<usize> {
        let now = self.clock.now();
        let entry = self.find_issued(id).await?;

        let mut revoked = 0;
        if self
            .insert_revocation(id, reason, entry.as_ref().map(|e| e.expires_at), now)
            .await?
        {
            revoked += 1;
        }

        if entry.as_ref().is_some_and(IssuedCredential::is_refresh) {
            revoked += self.cascade(id, now).await?;
        }

        if revoked > 0 {
            info!(credential_id = %id, %reason, revoked, "Revoked credential");
        }
        Ok(revoked)
    }

    /// Revokes every credential issued from a grant. Access tokens are only
    /// included when `include_access` is set.
    ///
    /// Returns the number of records newly written.
    ///
    /// # Errors
    /// Returns `StorageUnavailable` on timeout or the storage error.
    pub async fn revoke_grant(
        &self,
        grant_id: Uuid,
        reason: RevocationReason,
        include_access: bool,
    ) -> AuthResult<usize> {
        let now = self.clock.now();
        let entries = self
            .bounded("find_by_grant", self.issued.find_by_grant(grant_id))
            .await?;

        let mut revoked = 0;
        for entry in entries {
            if !entry.is_refresh() && !include_access {
                continue;
            }
            if self
                .insert_revocation(entry.id, reason, Some(entry.expires_at), now)
                .await?
            {
                revoked += 1;
            }
        }

        info!(%grant_id, %reason, revoked, include_access, "Revoked grant");
        Ok(revoked)
    }

    /// Atomically marks a refresh token as used (`Rotated`).
    ///
    /// Exactly one of any number of concurrent calls for the same token sees
    /// [`ConsumeOutcome::Consumed`].
    ///
    /// # Errors
    /// Returns `InvalidGrant` for access credentials, `StorageUnavailable` on
    /// timeout, or the storage error.
    pub async fn consume_refresh(&self, credential: &CredentialData) -> AuthResult<ConsumeOutcome> {
        if !credential.is_refresh() {
            return Err(AuthError::invalid_grant("not a refresh token"));
        }

        let record = RevocationRecord {
            credential_id: credential.id,
            revoked_at: self.clock.now(),
            reason: RevocationReason::Rotated,
            expires_at: Some(credential.expires_at),
        };

        match self
            .bounded(
                "consume_refresh",
                self.revocations.insert_if_absent(&record),
            )
            .await?
        {
            None => Ok(ConsumeOutcome::Consumed),
            Some(existing) => Ok(ConsumeOutcome::AlreadyRevoked(existing)),
        }
    }

    async fn cascade(&self, root: Uuid, now: OffsetDateTime) -> AuthResult<usize> {
        let mut revoked = 0;
        let mut seen = HashSet::from([root]);
        let mut pending = vec![root];

        while let Some(parent) = pending.pop() {
            let successors = self
                .bounded("find_rotated_from", self.issued.find_rotated_from(parent))
                .await?;

            for successor in successors {
                if !seen.insert(successor.id) {
                    continue;
                }
                if self
                    .insert_revocation(
                        successor.id,
                        RevocationReason::Cascade,
                        Some(successor.expires_at),
                        now,
                    )
                    .await?
                {
                    revoked += 1;
                }
                pending.push(successor.id);
            }
        }

        Ok(revoked)
    }

    async fn insert_revocation(
        &self,
        credential_id: Uuid,
        reason: RevocationReason,
        expires_at: Option<OffsetDateTime>,
        now: OffsetDateTime,
    ) -> AuthResult<bool> {
        let record = RevocationRecord {
            credential_id,
            revoked_at: now,
            reason,
            expires_at,
        };
        let existing = self
            .bounded("revoke", self.revocations.insert_if_absent(&record))
            .await?;
        Ok(existing.is_none())
    }

    async fn bounded<T, F>(&self, operation: &'static str, call: F) -> AuthResult<T>
    where
        F: Future<Output = AuthResult<T>> + Send,
    {
        match tokio::time::timeout(self.settings.storage_timeout, call).await {
            Ok(result) => result,
            Err(_) => {
                warn!(
                    operation,
                    timeout_ms = self.settings.storage_timeout.as_millis() as u64,
                    "Storage call timed out"
                );
                Err(AuthError::storage_unavailable(format!(
                    "{operation} timed out after {:?}",
                    self.settings.storage_timeout
                )))
            }
        }
    }
}

impl std::fmt::Debug for SessionLedger {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionLedger")
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}
