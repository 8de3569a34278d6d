//! In-memory storage backends.
//!
//! Backed by [`DashMap`]. Conditional updates run while holding the map's
//! shard lock for the affected key, which gives the compare-and-swap
//! semantics the storage traits require. Nothing is persisted.

use std::collections::HashSet;

use async_trait::async_trait;
use dashmap::DashMap;
use dashmap::mapref::entry::Entry;
use time::OffsetDateTime;
use uuid::Uuid;

use super::grant::{GrantStorage, RedeemOutcome};
use super::issued::{IssuedCredential, IssuedCredentialStorage};
use super::revocation::{RevocationRecord, RevocationStorage};
use crate::AuthResult;
use crate::error::AuthError;
use crate::oauth::grant::{AuthorizationGrant, GrantState};

// ============================================================================
// Grants
// ============================================================================

/// In-memory [`GrantStorage`].
#[derive(Debug, Default)]
pub struct MemoryGrantStorage {
    /// Grants keyed by code hash
    grants: DashMap<String, AuthorizationGrant>,
    /// Secondary index: grant ID -> code hash
    ids: DashMap<Uuid, String>,
}

impl MemoryGrantStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored grants.
    #[must_use]
    pub fn len(&self) -> usize {
        self.grants.len()
    }

    /// Returns `true` if no grants are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.grants.is_empty()
    }
}

#[async_trait]
impl GrantStorage for MemoryGrantStorage {
    async fn create(&self, grant: &AuthorizationGrant) -> AuthResult<()> {
        if self.ids.contains_key(&grant.id) {
            return Err(AuthError::storage(format!("duplicate grant id {}", grant.id)));
        }

        match self.grants.entry(grant.code_hash.clone()) {
            Entry::Occupied(_) => Err(AuthError::storage("duplicate grant code hash")),
            Entry::Vacant(slot) => {
                slot.insert(grant.clone());
                self.ids.insert(grant.id, grant.code_hash.clone());
                Ok(())
            }
        }
    }

    async fn find_by_code_hash(&self, code_hash: &str) -> AuthResult<Option<AuthorizationGrant>> {
        Ok(self.grants.get(code_hash).map(|g| g.clone()))
    }

    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<AuthorizationGrant>> {
        let Some(code_hash) = self.ids.get(&id).map(|h| h.clone()) else {
            return Ok(None);
        };
        Ok(self.grants.get(&code_hash).map(|g| g.clone()))
    }

    async fn redeem(&self, code_hash: &str, now: OffsetDateTime) -> AuthResult<RedeemOutcome> {
        let Some(mut grant) = self.grants.get_mut(code_hash) else {
            return Ok(RedeemOutcome::NotFound);
        };

        let outcome = match grant.state {
            GrantState::Redeemed => RedeemOutcome::AlreadyRedeemed(grant.clone()),
            GrantState::Expired => RedeemOutcome::Expired,
            GrantState::Issued if grant.is_expired_at(now) => RedeemOutcome::Expired,
            GrantState::Issued => {
                grant.state = GrantState::Redeemed;
                grant.redeemed_at = Some(now);
                RedeemOutcome::Redeemed(grant.clone())
            }
        };
        Ok(outcome)
    }

    async fn delete_expired(&self, before: OffsetDateTime) -> AuthResult<u64> {
        let mut removed = Vec::new();
        self.grants.retain(|_, grant| {
            let keep = grant.expires_at >= before;
            if !keep {
                removed.push(grant.id);
            }
            keep
        });

        for id in &removed {
            self.ids.remove(id);
        }
        Ok(removed.len() as u64)
    }
}

// ============================================================================
// Revocations
// ============================================================================

/// In-memory [`RevocationStorage`].
#[derive(Debug, Default)]
pub struct MemoryRevocationStorage {
    records: DashMap<Uuid, RevocationRecord>,
}

impl MemoryRevocationStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.len()
    }

    /// Returns `true` if no records are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[async_trait]
impl RevocationStorage for MemoryRevocationStorage {
    async fn insert_if_absent(
        &self,
        record: &RevocationRecord,
    ) -> AuthResult<Option<RevocationRecord>> {
        match self.records.entry(record.credential_id) {
            Entry::Occupied(existing) => Ok(Some(existing.get().clone())),
            Entry::Vacant(slot) => {
                slot.insert(record.clone());
                Ok(None)
            }
        }
    }

    async fn find(&self, credential_id: Uuid) -> AuthResult<Option<RevocationRecord>> {
        Ok(self.records.get(&credential_id).map(|r| r.clone()))
    }

    async fn is_revoked(&self, credential_id: Uuid) -> AuthResult<bool> {
        Ok(self.records.contains_key(&credential_id))
    }

    async fn delete_expired(&self, before: OffsetDateTime) -> AuthResult<u64> {
        let initial = self.records.len();
        self.records
            .retain(|_, record| record.expires_at.is_none_or(|exp| exp >= before));
        Ok(initial.saturating_sub(self.records.len()) as u64)
    }
}

// ============================================================================
// Issued credentials
// ============================================================================

/// In-memory [`IssuedCredentialStorage`].
#[derive(Debug, Default)]
pub struct MemoryIssuedCredentialStorage {
    entries: DashMap<Uuid, IssuedCredential>,
    /// Secondary index: parent refresh token -> successors
    children: DashMap<Uuid, Vec<Uuid>>,
    /// Secondary index: grant -> credentials
    by_grant: DashMap<Uuid, Vec<Uuid>>,
}

impl MemoryIssuedCredentialStorage {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of stored entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Returns `true` if no entries are stored.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn resolve(&self, ids: Option<Vec<Uuid>>) -> Vec<IssuedCredential> {
        ids.unwrap_or_default()
            .iter()
            .filter_map(|id| self.entries.get(id).map(|e| e.clone()))
            .collect()
    }
}

#[async_trait]
impl IssuedCredentialStorage for MemoryIssuedCredentialStorage {
    async fn record_all(&self, entries: &[IssuedCredential]) -> AuthResult<()> {
        let mut ids = HashSet::with_capacity(entries.len());
        for entry in entries {
            if !ids.insert(entry.id) || self.entries.contains_key(&entry.id) {
                return Err(AuthError::storage(format!(
                    "duplicate credential id {}",
                    entry.id
                )));
            }
        }

        for entry in entries {
            self.entries.insert(entry.id, entry.clone());
            if let Some(parent) = entry.rotated_from {
                self.children.entry(parent).or_default().push(entry.id);
            }
            self.by_grant.entry(entry.grant_id).or_default().push(entry.id);
        }
        Ok(())
    }

    async fn find(&self, id: Uuid) -> AuthResult<Option<IssuedCredential>> {
        Ok(self.entries.get(&id).map(|e| e.clone()))
    }

    async fn find_rotated_from(&self, parent: Uuid) -> AuthResult<Vec<IssuedCredential>> {
        let ids = self.children.get(&parent).map(|c| c.clone());
        Ok(self.resolve(ids))
    }

    async fn find_by_grant(&self, grant_id: Uuid) -> AuthResult<Vec<IssuedCredential>> {
        let ids = self.by_grant.get(&grant_id).map(|c| c.clone());
        Ok(self.resolve(ids))
    }

    async fn delete_expired(&self, before: OffsetDateTime) -> AuthResult<u64> {
        let mut removed = HashSet::new();
        self.entries.retain(|id, entry| {
            let keep = entry.expires_at >= before;
            if !keep {
                removed.insert(*id);
            }
            keep
        });

        if !removed.is_empty() {
            let prune = |_: &Uuid, ids: &mut Vec<Uuid>| {
                ids.retain(|id| !removed.contains(id));
                !ids.is_empty()
            };
            self.children.retain(prune);
            self.by_grant.retain(prune);
        }
        Ok(removed.len() as u64)
    }
}
