//! Authorization code flow.
//!
//! Ties request validation, the client allow-list, entitlements, the session
//! ledger and the token codec together:
//!
//! 1. [`begin_authorization`](AuthorizationFlowCoordinator::begin_authorization)
//!    validates the request and creates a single-use grant.
//! 2. [`exchange_code`](AuthorizationFlowCoordinator::exchange_code) redeems
//!    the grant for an access and refresh token pair.
//! 3. [`refresh`](AuthorizationFlowCoordinator::refresh) rotates the refresh
//!    token. Presenting a rotated-out token again revokes the chain that
//!    descends from it.

use std::collections::BTreeSet;
use std::sync::Arc;

use time::Duration;
use tracing::{debug, info, warn};
use uuid::Uuid;

use super::grant::{AuthorizationGrant, GrantState, NewGrant};
use super::policy::{ClientRegistry, EntitlementPolicy};
use super::request::{AuthorizationRequest, TokenPair};
use crate::clock::SharedClock;
use crate::config::{AuthConfig, to_time_duration};
use crate::error::AuthError;
use crate::keys::{Jwks, KeyStore};
use crate::ledger::{ConsumeOutcome, SessionLedger};
use crate::storage::{IssuedCredential, RevocationReason, RevocationRecord};
use crate::token::{Credential, CredentialData, TokenCodec};
use crate::{AuthResult, SECURITY_TARGET};

/// Token type reported in every [`TokenPair`].
pub const BEARER: &str = "Bearer";

/// Lifetimes and audience of minted credentials.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlowSettings {
    /// Audience written into every credential.
    pub audience: Vec<String>,
    /// Lifetime of access tokens.
    pub access_token_lifetime: Duration,
    /// Lifetime of refresh tokens.
    pub refresh_token_lifetime: Duration,
    /// Revoke the descending chain when a rotated refresh token is replayed.
    pub revoke_chain_on_reuse: bool,
}

impl Default for FlowSettings {
    fn default() -> Self {
        Self {
            audience: vec!["fortalis-game".to_string()],
            access_token_lifetime: Duration::minutes(15),
            refresh_token_lifetime: Duration::days(30),
            revoke_chain_on_reuse: true,
        }
    }
}

impl FlowSettings {
    /// Builds settings from engine configuration.
    #[must_use]
    pub fn from_config(config: &AuthConfig) -> Self {
        Self {
            audience: config.audience.clone(),
            access_token_lifetime: to_time_duration(config.tokens.access_token_lifetime),
            refresh_token_lifetime: to_time_duration(config.tokens.refresh_token_lifetime),
            revoke_chain_on_reuse: config.tokens.revoke_chain_on_reuse,
        }
    }
}

/// Runs the authorization code flow.
#[derive(Clone)]
pub struct AuthorizationFlowCoordinator {
    keys: Arc<KeyStore>,
    codec: TokenCodec,
    ledger: SessionLedger,
    clients: Arc<dyn ClientRegistry>,
    entitlements: Arc<dyn EntitlementPolicy>,
    clock: SharedClock,
    settings: FlowSettings,
}

impl AuthorizationFlowCoordinator {
    /// Creates a coordinator.
    #[must_use]
    pub fn new(
        keys: Arc<KeyStore>,
        codec: TokenCodec,
        ledger: SessionLedger,
        clients: Arc<dyn ClientRegistry>,
        entitlements: Arc<dyn EntitlementPolicy>,
        clock: SharedClock,
        settings: FlowSettings,
    ) -> Self {
        Self {
            keys,
            codec,
            ledger,
            clients,
            entitlements,
            clock,
            settings,
        }
    }

    /// Creates a coordinator whose codec and lifetimes come from `config`.
    #[must_use]
    pub fn from_config(
        config: &AuthConfig,
        keys: Arc<KeyStore>,
        ledger: SessionLedger,
        clients: Arc<dyn ClientRegistry>,
        entitlements: Arc<dyn EntitlementPolicy>,
        clock: SharedClock,
    ) -> Self {
        let codec = TokenCodec::from_config(config, clock.clone());
        Self::new(
            keys,
            codec,
            ledger,
            clients,
            entitlements,
            clock,
            FlowSettings::from_config(config),
        )
    }

    /// Signing keys.
    #[must_use]
    pub fn keys(&self) -> &Arc<KeyStore> {
        &self.keys
    }

    /// Token codec.
    #[must_use]
    pub fn codec(&self) -> &TokenCodec {
        &self.codec
    }

    /// Session ledger.
    #[must_use]
    pub fn ledger(&self) -> &SessionLedger {
        &self.ledger
    }

    /// Current settings.
    #[must_use]
    pub fn settings(&self) -> &FlowSettings {
        &self.settings
    }

    /// Public keys for verifiers.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        self.keys.jwks()
    }

    /// Validates an authorization request and creates a grant for it.
    ///
    /// The returned [`NewGrant`] carries the plaintext code to deliver to the
    /// client's redirect target.
    ///
    /// # Errors
    ///
    /// - `InvalidRequest` / `InvalidRedirect` if the request is malformed
    /// - `InvalidClient` if the client is unknown or inactive
    /// - `InvalidRedirect` if the redirect target is not registered
    /// - `InvalidScope` if the scope exceeds the subject's entitlements
    /// - `StorageUnavailable` if the grant cannot be stored in time
    pub async fn begin_authorization(&self, request: &AuthorizationRequest) -> AuthResult<NewGrant> {
        let redirect_uri = request.validate()?;

        let client = self
            .clients
            .find_client(&request.client_id)
            .await?
            .filter(|client| client.active)
            .ok_or_else(|| {
                debug!(client_id = %request.client_id, "Authorization for unknown client");
                AuthError::invalid_client(format!("Unknown client: {}", request.client_id))
            })?;

        if !client.is_redirect_uri_allowed(&redirect_uri) {
            debug!(
                client_id = %client.client_id,
                redirect_uri = %redirect_uri,
                "Redirect target not registered"
            );
            return Err(AuthError::invalid_redirect(
                "redirect_uri is not registered for this client",
            ));
        }

        let entitled = self
            .entitlements
            .entitlements(&request.subject, &request.client_id)
            .await?;
        let excess: Vec<&str> = request
            .scope
            .difference(&entitled)
            .map(String::as_str)
            .collect();
        if !excess.is_empty() {
            debug!(
                client_id = %request.client_id,
                excess = ?excess,
                "Requested scope exceeds entitlements"
            );
            return Err(AuthError::invalid_scope(format!(
                "Not entitled to: {}",
                excess.join(" ")
            )));
        }

        self.ledger
            .create_grant(
                &request.client_id,
                &request.subject,
                request.scope.clone(),
                redirect_uri,
            )
            .await
    }

    /// Exchanges an authorization code for a token pair.
    ///
    /// The pair is minted and registered first; redeeming the code is the
    /// last step. A redemption that loses discards the registered pair, so
    /// a failed exchange leaves no usable credential behind and a replayed
    /// code always finds the winner's tokens to revoke.
    ///
    /// The code is consumed even when the client does not match.
    ///
    /// # Errors
    ///
    /// - `InvalidGrant` if the code is unknown, expired or already used
    /// - `ClientMismatch` if the grant belongs to another client
    /// - `NoActiveKey` if no key can sign
    /// - `InvalidCredential` if a configured lifetime is out of range
    /// - `StorageUnavailable` if the ledger does not answer in time
    pub async fn exchange_code(&self, code: &str, client_id: &str) -> AuthResult<TokenPair> {
        let now = self.clock.now();
        let grant = match self.ledger.find_grant_by_code(code).await? {
            Some(grant)
                if grant.state_at(now) == GrantState::Issued && grant.client_id == client_id =>
            {
                grant
            }
            _ => return Err(self.reject_exchange(code, client_id).await),
        };

        let minted = self
            .mint_pair(&grant.subject, &grant.client_id, &grant.scope, grant.id, None)
            .await?;

        if let Err(err) = self.redeem_code(code, client_id).await {
            self.discard(&minted, RevocationReason::GrantRevoked).await;
            return Err(err);
        }

        info!(grant_id = %grant.id, client_id, "Exchanged authorization code");
        Ok(minted.pair)
    }

    /// Rotates a refresh token into a new token pair.
    ///
    /// The successor is registered before the presented token is marked
    /// `Rotated`, which is the last step. A failed refresh leaves the
    /// presented token usable, so the caller may retry it.
    ///
    /// # Errors
    ///
    /// - any verification error of [`TokenCodec::verify`]
    /// - `InvalidGrant` if the token is not a refresh token
    /// - `Revoked` if the token was revoked or already rotated
    /// - `StorageUnavailable` if the ledger does not answer in time
    pub async fn refresh(&self, refresh_token: &str) -> AuthResult<TokenPair> {
        let credential = self.codec.verify(refresh_token, &self.keys)?;
        let Some(grant_id) = credential.data.parent_grant() else {
            return Err(AuthError::invalid_grant("not a refresh token"));
        };

        if let Some(record) = self.ledger.find_revocation(credential.id()).await? {
            return Err(self.reject_revoked_refresh(&credential, grant_id, &record).await);
        }

        let data = &credential.data;
        let minted = self
            .mint_pair(
                &data.subject,
                &data.client_id,
                &data.scope,
                grant_id,
                Some(data.id),
            )
            .await?;

        match self.ledger.consume_refresh(data).await {
            Ok(ConsumeOutcome::Consumed) => {
                info!(
                    rotated_from = %data.id,
                    client_id = %data.client_id,
                    "Rotated refresh token"
                );
                Ok(minted.pair)
            }
            Ok(ConsumeOutcome::AlreadyRevoked(record)) => {
                self.discard(&minted, RevocationReason::Cascade).await;
                Err(self.reject_revoked_refresh(&credential, grant_id, &record).await)
            }
            Err(err) => {
                self.discard(&minted, RevocationReason::Cascade).await;
                Err(err)
            }
        }
    }

    /// Verifies an access token presented to a resource.
    ///
    /// # Errors
    ///
    /// - any verification error of [`TokenCodec::verify`]
    /// - `InvalidGrant` if the token is not an access token
    /// - `Revoked` if the token was revoked
    /// - `StorageUnavailable` if the ledger does not answer in time
    pub async fn authenticate(&self, access_token: &str) -> AuthResult<Credential> {
        let credential = self.codec.verify(access_token, &self.keys)?;
        if !credential.data.is_access() {
            return Err(AuthError::invalid_grant("not an access token"));
        }
        if self.ledger.is_revoked(credential.id()).await? {
            debug!(credential_id = %credential.id(), "Revoked access token presented");
            return Err(AuthError::Revoked);
        }
        Ok(credential)
    }

    /// Revokes the credential a token carries.
    ///
    /// The signature must verify; expired tokens are accepted. Revoking a
    /// refresh token also revokes every token rotated from it.
    ///
    /// Returns the number of revocation records written.
    ///
    /// # Errors
    ///
    /// - any verification error of [`TokenCodec::verify_allow_expired`]
    /// - `StorageUnavailable` if the ledger does not answer in time
    pub async fn revoke_token(&self, token: &str, reason: RevocationReason) -> AuthResult<usize> {
        let credential = self.codec.verify_allow_expired(token, &self.keys)?;
        self.ledger.revoke(credential.id(), reason).await
    }

    /// Redeems a code, folding every rejection except infrastructure
    /// failures into `InvalidGrant`.
    async fn redeem_code(&self, code: &str, client_id: &str) -> AuthResult<AuthorizationGrant> {
        self.ledger
            .redeem_grant(code)
            .await
            .map_err(|e| match e {
                AuthError::StorageUnavailable { .. } | AuthError::Storage { .. } => e,
                other => {
                    debug!(client_id, error = %other, "Code exchange rejected");
                    AuthError::invalid_grant(other.to_string())
                }
            })
    }

    /// Consumes a code that cannot be exchanged by `client_id` and returns
    /// the error to report.
    async fn reject_exchange(&self, code: &str, client_id: &str) -> AuthError {
        match self.redeem_code(code, client_id).await {
            Err(err) => err,
            Ok(grant) if grant.client_id != client_id => {
                warn!(
                    target: SECURITY_TARGET,
                    grant_id = %grant.id,
                    expected = %grant.client_id,
                    presented = client_id,
                    "Authorization code redeemed by another client"
                );
                AuthError::ClientMismatch
            }
            Ok(grant) => {
                // state moved between lookup and redemption
                debug!(grant_id = %grant.id, "Grant changed during exchange");
                AuthError::invalid_grant("authorization grant changed during exchange")
            }
        }
    }

    /// Handles a refresh token that already carries a revocation record.
    async fn reject_revoked_refresh(
        &self,
        credential: &Credential,
        grant_id: Uuid,
        record: &RevocationRecord,
    ) -> AuthError {
        if matches!(
            record.reason,
            RevocationReason::Rotated | RevocationReason::ReuseDetected
        ) {
            warn!(
                target: SECURITY_TARGET,
                credential_id = %credential.id(),
                client_id = %credential.data.client_id,
                %grant_id,
                "Rotated refresh token presented again"
            );
            if self.settings.revoke_chain_on_reuse {
                if let Err(err) = self
                    .ledger
                    .revoke(credential.id(), RevocationReason::ReuseDetected)
                    .await
                {
                    return err;
                }
            }
        } else {
            debug!(
                credential_id = %credential.id(),
                reason = %record.reason,
                "Refresh with revoked token"
            );
        }
        AuthError::Revoked
    }

    /// Signs an access and refresh token and registers both in one ledger
    /// call. Nothing is registered if signing fails.
    async fn mint_pair(
        &self,
        subject: &str,
        client_id: &str,
        scope: &BTreeSet<String>,
        grant_id: Uuid,
        rotated_from: Option<Uuid>,
    ) -> AuthResult<MintedPair> {
        let key = self.keys.active_key()?;
        let now = self.clock.now();

        let access = CredentialData::builder(self.codec.issuer(), subject, client_id, now)
            .audience(&self.settings.audience)
            .scope(scope)
            .try_lifetime(self.settings.access_token_lifetime)?
            .access();
        let refresh = CredentialData::builder(self.codec.issuer(), subject, client_id, now)
            .audience(&self.settings.audience)
            .scope(scope)
            .try_lifetime(self.settings.refresh_token_lifetime)?
            .refresh(grant_id);

        let access_token = self.codec.issue(&access, &key)?;
        let refresh_token = self.codec.issue(&refresh, &key)?;

        self.ledger
            .register_issued_all(&[
                IssuedCredential::new(&access, grant_id, None),
                IssuedCredential::new(&refresh, grant_id, rotated_from),
            ])
            .await?;

        Ok(MintedPair {
            access_id: access.id,
            refresh_id: refresh.id,
            pair: TokenPair {
                access_token,
                refresh_token,
                token_type: BEARER.to_string(),
                expires_in: self.settings.access_token_lifetime.whole_seconds(),
                scope: access.scope_string(),
            },
        })
    }

    /// Revokes a registered pair that is never handed out.
    async fn discard(&self, minted: &MintedPair, reason: RevocationReason) {
        for id in [minted.access_id, minted.refresh_id] {
            if let Err(err) = self.ledger.revoke(id, reason).await {
                warn!(credential_id = %id, error = %err, "Failed to discard minted credential");
            }
        }
    }
}

/// A registered token pair together with the IDs of its credentials.
struct MintedPair {
    access_id: Uuid,
    refresh_id: Uuid,
    pair: TokenPair,
}

impl std::fmt::Debug for AuthorizationFlowCoordinator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuthorizationFlowCoordinator")
            .field("issuer", &self.codec.issuer())
            .field("settings", &self.settings)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::keys::{KeyAlgorithm, RotationPolicy};
    use crate::ledger::LedgerSettings;
    use crate::oauth::policy::{RegisteredClient, StaticClientRegistry, StaticEntitlementPolicy};

    const REDIRECT: &str = "https://app.example.com/cb";

    fn coordinator() -> (Arc<ManualClock>, AuthorizationFlowCoordinator) {
        let clock = Arc::new(ManualClock::starting_now());
        let policy = RotationPolicy {
            algorithm: KeyAlgorithm::Es256,
            ..RotationPolicy::default()
        };
        let keys = Arc::new(KeyStore::bootstrap(clock.clone(), &policy).unwrap());
        let codec = TokenCodec::new("https://auth.fortalis.io", Duration::seconds(60), clock.clone());
        let ledger = SessionLedger::in_memory(clock.clone(), LedgerSettings::default());

        let clients: StaticClientRegistry =
            [RegisteredClient::new("app-1", [REDIRECT])].into_iter().collect();
        let mut inactive = RegisteredClient::new("app-off", [REDIRECT]);
        inactive.active = false;
        clients.register(inactive);
        clients.register(RegisteredClient::new("app-2", ["https://other.example.com/cb"]));

        let coordinator = AuthorizationFlowCoordinator::new(
            keys,
            codec,
            ledger,
            Arc::new(clients),
            Arc::new(StaticEntitlementPolicy::allow_all(["read", "profile"])),
            clock.clone(),
            FlowSettings::default(),
        );
        (clock, coordinator)
    }

    fn request(client_id: &str, scope: &[&str]) -> AuthorizationRequest {
        AuthorizationRequest::new(client_id, "u1", scope.iter().copied(), REDIRECT)
    }

    #[tokio::test]
    async fn test_begin_rejects_unknown_and_inactive_clients() {
        let (_, coordinator) = coordinator();
        for client_id in ["nobody", "app-off"] {
            let err = coordinator
                .begin_authorization(&request(client_id, &["read"]))
                .await
                .unwrap_err();
            assert!(matches!(err, AuthError::InvalidClient { .. }), "{client_id}");
        }
    }

    #[tokio::test]
    async fn test_begin_rejects_unregistered_redirect() {
        let (_, coordinator) = coordinator();
        let err = coordinator
            .begin_authorization(&request("app-2", &["read"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthError::InvalidRedirect { .. }));
    }

    #[tokio::test]
    async fn test_begin_rejects_excess_scope() {
        let (_, coordinator) = coordinator();
        let err = coordinator
            .begin_authorization(&request("app-1", &["read", "admin"]))
            .await
            .unwrap_err();
        match err {
            AuthError::InvalidScope { message } => assert!(message.contains("admin")),
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_exchange_by_other_client() {
        let (_, coordinator) = coordinator();
        let new = coordinator
            .begin_authorization(&request("app-1", &["read"]))
            .await
            .unwrap();

        let err = coordinator.exchange_code(&new.code, "app-2").await.unwrap_err();
        assert!(matches!(err, AuthError::ClientMismatch));

        // the code is spent
        let err = coordinator.exchange_code(&new.code, "app-1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_exchange_expired_code() {
        let (clock, coordinator) = coordinator();
        let new = coordinator
            .begin_authorization(&request("app-1", &["read"]))
            .await
            .unwrap();
        clock.advance(Duration::minutes(2));

        let err = coordinator.exchange_code(&new.code, "app-1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_token_pair_shape() {
        let (_, coordinator) = coordinator();
        let new = coordinator
            .begin_authorization(&request("app-1", &["read", "profile"]))
            .await
            .unwrap();
        let pair = coordinator.exchange_code(&new.code, "app-1").await.unwrap();

        assert_eq!(pair.token_type, "Bearer");
        assert_eq!(pair.expires_in, 900);
        assert_eq!(pair.scope, "profile read");

        let access = coordinator.authenticate(&pair.access_token).await.unwrap();
        assert_eq!(access.data.subject, "u1");
        assert!(access.data.audience.contains("fortalis-game"));
        assert_eq!(
            access.data.expires_at - access.data.issued_at,
            Duration::minutes(15)
        );
    }

    #[tokio::test]
    async fn test_kind_confusion_is_rejected() {
        let (_, coordinator) = coordinator();
        let new = coordinator
            .begin_authorization(&request("app-1", &["read"]))
            .await
            .unwrap();
        let pair = coordinator.exchange_code(&new.code, "app-1").await.unwrap();

        let err = coordinator.refresh(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));

        let err = coordinator.authenticate(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidGrant { .. }));
    }

    #[tokio::test]
    async fn test_revoke_token() {
        let (clock, coordinator) = coordinator();
        let new = coordinator
            .begin_authorization(&request("app-1", &["read"]))
            .await
            .unwrap();
        let pair = coordinator.exchange_code(&new.code, "app-1").await.unwrap();

        let revoked = coordinator
            .revoke_token(&pair.access_token, RevocationReason::Requested)
            .await
            .unwrap();
        assert_eq!(revoked, 1);
        let err = coordinator.authenticate(&pair.access_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked));

        // expired tokens can still be revoked
        clock.advance(Duration::days(31));
        let revoked = coordinator
            .revoke_token(&pair.refresh_token, RevocationReason::Requested)
            .await
            .unwrap();
        assert_eq!(revoked, 1);
    }

    #[tokio::test]
    async fn test_requested_revocation_is_not_treated_as_reuse() {
        let (_, coordinator) = coordinator();
        let new = coordinator
            .begin_authorization(&request("app-1", &["read"]))
            .await
            .unwrap();
        let pair = coordinator.exchange_code(&new.code, "app-1").await.unwrap();

        coordinator
            .revoke_token(&pair.refresh_token, RevocationReason::Requested)
            .await
            .unwrap();
        let err = coordinator.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked));
    }

    #[tokio::test]
    async fn test_no_active_key() {
        let (clock, coordinator) = coordinator();
        let empty = AuthorizationFlowCoordinator::new(
            Arc::new(KeyStore::new(clock.clone())),
            coordinator.codec().clone(),
            coordinator.ledger().clone(),
            Arc::new(
                [RegisteredClient::new("app-1", [REDIRECT])]
                    .into_iter()
                    .collect::<StaticClientRegistry>(),
            ),
            Arc::new(StaticEntitlementPolicy::allow_all(["read"])),
            clock,
            FlowSettings::default(),
        );
        let new = empty
            .begin_authorization(&request("app-1", &["read"]))
            .await
            .unwrap();
        let err = empty.exchange_code(&new.code, "app-1").await.unwrap_err();
        assert!(matches!(err, AuthError::NoActiveKey));
    }

    #[tokio::test]
    async fn test_out_of_range_lifetime_leaves_code_unspent() {
        let (clock, coordinator) = coordinator();
        let oversized = AuthorizationFlowCoordinator::new(
            coordinator.keys().clone(),
            coordinator.codec().clone(),
            coordinator.ledger().clone(),
            Arc::new(
                [RegisteredClient::new("app-1", [REDIRECT])]
                    .into_iter()
                    .collect::<StaticClientRegistry>(),
            ),
            Arc::new(StaticEntitlementPolicy::allow_all(["read"])),
            clock,
            FlowSettings {
                refresh_token_lifetime: Duration::MAX,
                ..FlowSettings::default()
            },
        );
        let new = oversized
            .begin_authorization(&request("app-1", &["read"]))
            .await
            .unwrap();

        let err = oversized.exchange_code(&new.code, "app-1").await.unwrap_err();
        assert!(matches!(err, AuthError::InvalidCredential { .. }), "{err:?}");

        // nothing was redeemed or registered
        assert!(coordinator.exchange_code(&new.code, "app-1").await.is_ok());
    }
}
