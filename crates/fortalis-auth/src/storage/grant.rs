//! Authorization grant storage trait.
//!
//! # Implementation Notes
//!
//! Implementations should:
//!
//! - Index grants by code hash; the plaintext code never reaches storage
//! - Make [`GrantStorage::redeem`] a compare-and-swap on `state = issued`
//! - Never hold a lock across external I/O
//!
//! A SQL backend typically implements `redeem` as:
//!
//! ```sql
//! UPDATE grants
//! SET state = 'redeemed', redeemed_at = $2
//! WHERE code_hash = $1 AND state = 'issued' AND expires_at >= $2
//! RETURNING *
//! ```
//!
//! followed, when no row comes back, by a plain lookup to tell apart
//! "not found", "expired" and "already redeemed".

use async_trait::async_trait;
use time::OffsetDateTime;
use uuid::Uuid;

use crate::AuthResult;
use crate::oauth::grant::AuthorizationGrant;

/// Result of a redemption attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RedeemOutcome {
    /// This call won the transition; the grant is now `Redeemed`.
    Redeemed(AuthorizationGrant),
    /// The grant was already redeemed, by this or another caller.
    AlreadyRedeemed(AuthorizationGrant),
    /// The grant is still `Issued` but its lifetime has elapsed.
    Expired,
    /// No grant has this code hash.
    NotFound,
}

/// Storage for authorization grants.
#[async_trait]
pub trait GrantStorage: Send + Sync {
    /// Stores a new grant.
    ///
    /// # Errors
    ///
    /// Returns an error if a grant with the same ID or code hash exists, or
    /// the storage operation fails.
    async fn create(&self, grant: &AuthorizationGrant) -> AuthResult<()>;

    /// Finds a grant by its code hash.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_code_hash(&self, code_hash: &str) -> AuthResult<Option<AuthorizationGrant>>;

    /// Finds a grant by ID.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn find_by_id(&self, id: Uuid) -> AuthResult<Option<AuthorizationGrant>>;

    /// Atomically moves the grant from `Issued` to `Redeemed` at `now`.
    ///
    /// Exactly one of any number of concurrent calls for the same code hash
    /// may observe [`RedeemOutcome::Redeemed`].
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn redeem(&self, code_hash: &str, now: OffsetDateTime) -> AuthResult<RedeemOutcome>;

    /// Deletes grants whose lifetime ended before `before`.
    ///
    /// # Returns
    ///
    /// The number of grants deleted.
    ///
    /// # Errors
    ///
    /// Returns an error if the storage operation fails.
    async fn delete_expired(&self, before: OffsetDateTime) -> AuthResult<u64>;
}
