use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use fortalis_auth::oauth::FlowSettings;
use fortalis_auth::prelude::*;
use fortalis_auth::storage::{
    IssuedCredential, IssuedCredentialStorage, MemoryGrantStorage, MemoryIssuedCredentialStorage,
    MemoryRevocationStorage,
};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

const ISSUER: &str = "https://auth.fortalis.io";
const REDIRECT: &str = "https://app.example.com/cb";

struct Harness {
    clock: Arc<ManualClock>,
    policy: RotationPolicy,
    coordinator: AuthorizationFlowCoordinator,
}

fn harness() -> Harness {
    harness_with(Arc::new(MemoryIssuedCredentialStorage::new()))
}

fn harness_with(issued: Arc<dyn IssuedCredentialStorage>) -> Harness {
    let clock = Arc::new(ManualClock::starting_now());
    let policy = RotationPolicy {
        algorithm: KeyAlgorithm::Es256,
        ..RotationPolicy::default()
    };
    let keys = Arc::new(KeyStore::bootstrap(clock.clone(), &policy).expect("bootstrap keys"));
    let codec = TokenCodec::new(ISSUER, Duration::seconds(60), clock.clone());
    let ledger = SessionLedger::new(
        Arc::new(MemoryGrantStorage::new()),
        Arc::new(MemoryRevocationStorage::new()),
        issued,
        clock.clone(),
        LedgerSettings::default(),
    );

    let clients: StaticClientRegistry = [RegisteredClient::new("app-1", [REDIRECT])]
        .into_iter()
        .collect();
    let entitlements = StaticEntitlementPolicy::allow_all(["read"]);

    let coordinator = AuthorizationFlowCoordinator::new(
        keys,
        codec,
        ledger,
        Arc::new(clients),
        Arc::new(entitlements),
        clock.clone(),
        FlowSettings::default(),
    );

    Harness {
        clock,
        policy,
        coordinator,
    }
}

/// Fails the first batch that registers a rotated refresh token.
#[derive(Default)]
struct FlakyIssued {
    inner: MemoryIssuedCredentialStorage,
    failed: AtomicBool,
}

#[async_trait]
impl IssuedCredentialStorage for FlakyIssued {
    async fn record_all(&self, entries: &[IssuedCredential]) -> AuthResult<()> {
        let rotating = entries.iter().any(|e| e.rotated_from.is_some());
        if rotating && !self.failed.swap(true, Ordering::SeqCst) {
            return Err(AuthError::storage_unavailable("simulated outage"));
        }
        self.inner.record_all(entries).await
    }

    async fn find(&self, id: Uuid) -> AuthResult<Option<IssuedCredential>> {
        self.inner.find(id).await
    }

    async fn find_rotated_from(&self, parent: Uuid) -> AuthResult<Vec<IssuedCredential>> {
        self.inner.find_rotated_from(parent).await
    }

    async fn find_by_grant(&self, grant_id: Uuid) -> AuthResult<Vec<IssuedCredential>> {
        self.inner.find_by_grant(grant_id).await
    }

    async fn delete_expired(&self, before: OffsetDateTime) -> AuthResult<u64> {
        self.inner.delete_expired(before).await
    }
}

/// Holds every batch for 50ms before storing it.
#[derive(Default)]
struct SlowIssued {
    inner: MemoryIssuedCredentialStorage,
}

#[async_trait]
impl IssuedCredentialStorage for SlowIssued {
    async fn record_all(&self, entries: &[IssuedCredential]) -> AuthResult<()> {
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;
        self.inner.record_all(entries).await
    }

    async fn find(&self, id: Uuid) -> AuthResult<Option<IssuedCredential>> {
        self.inner.find(id).await
    }

    async fn find_rotated_from(&self, parent: Uuid) -> AuthResult<Vec<IssuedCredential>> {
        self.inner.find_rotated_from(parent).await
    }

    async fn find_by_grant(&self, grant_id: Uuid) -> AuthResult<Vec<IssuedCredential>> {
        self.inner.find_by_grant(grant_id).await
    }

    async fn delete_expired(&self, before: OffsetDateTime) -> AuthResult<u64> {
        self.inner.delete_expired(before).await
    }
}

/// Splits two racing results into the single success and the single failure.
fn one_winner(
    first: AuthResult<TokenPair>,
    second: AuthResult<TokenPair>,
) -> (TokenPair, AuthError) {
    match (first, second) {
        (Ok(pair), Err(err)) | (Err(err), Ok(pair)) => (pair, err),
        other => panic!("expected exactly one success: {other:?}"),
    }
}

async fn login(coordinator: &AuthorizationFlowCoordinator) -> TokenPair {
    let request = AuthorizationRequest::new("app-1", "u1", ["read"], REDIRECT);
    let grant = coordinator
        .begin_authorization(&request)
        .await
        .expect("begin authorization");
    coordinator
        .exchange_code(&grant.code, "app-1")
        .await
        .expect("exchange code")
}

#[tokio::test]
async fn code_exchange_issues_scoped_pair_once() {
    let h = harness();
    let request = AuthorizationRequest::new("app-1", "u1", ["read"], REDIRECT);
    let grant = h.coordinator.begin_authorization(&request).await.unwrap();

    let pair = h.coordinator.exchange_code(&grant.code, "app-1").await.unwrap();

    let access = h.coordinator.authenticate(&pair.access_token).await.unwrap();
    assert_eq!(access.data.subject, "u1");
    assert_eq!(access.data.client_id, "app-1");
    assert!(access.data.scope.iter().all(|s| s == "read"));
    assert_eq!(access.data.issuer, ISSUER);

    let refresh = h
        .coordinator
        .codec()
        .verify(&pair.refresh_token, h.coordinator.keys())
        .unwrap();
    assert_eq!(refresh.data.parent_grant(), Some(grant.grant.id));
    assert_eq!(
        refresh.data.expires_at - refresh.data.issued_at,
        Duration::days(30)
    );

    let err = h
        .coordinator
        .exchange_code(&grant.code, "app-1")
        .await
        .unwrap_err();
    assert!(matches!(err, AuthError::InvalidGrant { .. }));
}

#[tokio::test]
async fn replayed_code_revokes_tokens_from_first_exchange() {
    let h = harness();
    let request = AuthorizationRequest::new("app-1", "u1", ["read"], REDIRECT);
    let grant = h.coordinator.begin_authorization(&request).await.unwrap();
    let pair = h.coordinator.exchange_code(&grant.code, "app-1").await.unwrap();

    assert!(h.coordinator.exchange_code(&grant.code, "app-1").await.is_err());

    let err = h.coordinator.authenticate(&pair.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
    let err = h.coordinator.refresh(&pair.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
}

#[tokio::test]
async fn refresh_rotates_and_reuse_is_rejected() {
    let h = harness();
    let first = login(&h.coordinator).await;

    let second = h.coordinator.refresh(&first.refresh_token).await.unwrap();
    assert_ne!(second.refresh_token, first.refresh_token);
    assert_eq!(second.scope, "read");

    let old = h
        .coordinator
        .codec()
        .verify(&first.refresh_token, h.coordinator.keys())
        .unwrap();
    assert!(h.coordinator.ledger().is_revoked(old.id()).await.unwrap());

    let err = h.coordinator.refresh(&first.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
}

#[tokio::test]
async fn refresh_reuse_revokes_descendants() {
    let h = harness();
    let first = login(&h.coordinator).await;
    let second = h.coordinator.refresh(&first.refresh_token).await.unwrap();
    let third = h.coordinator.refresh(&second.refresh_token).await.unwrap();

    // an attacker replays the first refresh token
    let err = h.coordinator.refresh(&first.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));

    // the legitimate holder of the newest token is logged out as well
    let err = h.coordinator.refresh(&third.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
}

#[tokio::test]
async fn revoked_refresh_token_cannot_refresh() {
    let h = harness();
    let pair = login(&h.coordinator).await;

    let revoked = h
        .coordinator
        .revoke_token(&pair.refresh_token, RevocationReason::Requested)
        .await
        .unwrap();
    assert_eq!(revoked, 1);

    for _ in 0..3 {
        let err = h.coordinator.refresh(&pair.refresh_token).await.unwrap_err();
        assert!(matches!(err, AuthError::Revoked));
    }
}

#[tokio::test]
async fn expired_access_token_is_rejected() {
    let h = harness();
    let pair = login(&h.coordinator).await;

    h.clock.advance(Duration::minutes(15) + Duration::seconds(60));
    assert!(h.coordinator.authenticate(&pair.access_token).await.is_ok());

    h.clock.advance(Duration::microseconds(1));
    let err = h.coordinator.authenticate(&pair.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Expired));

    // refresh still works after the access token is gone
    assert!(h.coordinator.refresh(&pair.refresh_token).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_exchange_succeeds_once() {
    let h = harness();
    let request = AuthorizationRequest::new("app-1", "u1", ["read"], REDIRECT);
    let grant = h.coordinator.begin_authorization(&request).await.unwrap();

    let mut handles = Vec::new();
    for _ in 0..16 {
        let coordinator = h.coordinator.clone();
        let code = grant.code.clone();
        handles.push(tokio::spawn(async move {
            coordinator.exchange_code(&code, "app-1").await
        }));
    }

    let mut succeeded = 0;
    let mut rejected = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(AuthError::InvalidGrant { .. }) => rejected += 1,
            Err(other) => panic!("unexpected error: {other:?}"),
        }
    }
    assert_eq!(succeeded, 1);
    assert_eq!(rejected, 15);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn concurrent_refresh_rotates_once() {
    let h = harness();
    let pair = login(&h.coordinator).await;

    let mut handles = Vec::new();
    for _ in 0..8 {
        let coordinator = h.coordinator.clone();
        let token = pair.refresh_token.clone();
        handles.push(tokio::spawn(async move { coordinator.refresh(&token).await }));
    }

    let mut succeeded = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => succeeded += 1,
            Err(err) => assert!(matches!(err, AuthError::Revoked), "{err:?}"),
        }
    }
    assert_eq!(succeeded, 1);
}

#[tokio::test]
async fn key_rotation_keeps_old_tokens_valid_for_grace() {
    let h = harness();
    let keys = h.coordinator.keys();
    let before = login(&h.coordinator).await;
    let old_kid = TokenCodec::decode_unverified(&before.refresh_token)
        .unwrap()
        .header
        .kid;

    let new_key = keys.rotate(&h.policy).unwrap();
    assert_ne!(new_key.kid(), old_kid);
    assert_eq!(keys.jwks().keys.len(), 2);

    // tokens minted after rotation use the new key
    let after = login(&h.coordinator).await;
    let header = TokenCodec::decode_unverified(&after.access_token).unwrap().header;
    assert_eq!(header.kid, new_key.kid());

    h.clock.advance(Duration::hours(23));
    assert_eq!(keys.sweep(h.clock.now()), 0);
    h.coordinator
        .codec()
        .verify(&before.refresh_token, keys)
        .expect("old key still verifies during grace");

    h.clock.advance(Duration::hours(1) + Duration::seconds(1));
    assert_eq!(keys.sweep(h.clock.now()), 1);
    let err = h
        .coordinator
        .codec()
        .verify(&before.refresh_token, keys)
        .unwrap_err();
    assert!(matches!(err, AuthError::KeyUnknown { .. }));
    assert_eq!(keys.jwks().keys.len(), 1);

    assert!(h.coordinator.refresh(&after.refresh_token).await.is_ok());
}

#[tokio::test]
async fn cleanup_drops_expired_ledger_state() {
    let h = harness();
    let request = AuthorizationRequest::new("app-1", "u1", ["read"], REDIRECT);
    // never exchanged
    h.coordinator.begin_authorization(&request).await.unwrap();
    let pair = login(&h.coordinator).await;
    h.coordinator
        .revoke_token(&pair.access_token, RevocationReason::Requested)
        .await
        .unwrap();

    h.clock.advance(Duration::days(31));
    let report = h.coordinator.ledger().cleanup_expired().await.unwrap();
    assert_eq!(report.grants, 2);
    assert_eq!(report.revocations, 1);
    assert_eq!(report.issued, 2);
}

#[tokio::test]
async fn refresh_can_be_retried_after_storage_failure() {
    let h = harness_with(Arc::new(FlakyIssued::default()));
    let pair = login(&h.coordinator).await;

    let err = h.coordinator.refresh(&pair.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::StorageUnavailable { .. }), "{err:?}");
    assert!(err.is_retryable());

    let presented = h
        .coordinator
        .codec()
        .verify(&pair.refresh_token, h.coordinator.keys())
        .unwrap();
    assert!(!h.coordinator.ledger().is_revoked(presented.id()).await.unwrap());

    let rotated = h.coordinator.refresh(&pair.refresh_token).await.unwrap();
    assert!(h.coordinator.authenticate(&rotated.access_token).await.is_ok());
    assert!(h.coordinator.refresh(&rotated.refresh_token).await.is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn code_replayed_during_exchange_revokes_winner() {
    let h = harness_with(Arc::new(SlowIssued::default()));
    let request = AuthorizationRequest::new("app-1", "u1", ["read"], REDIRECT);
    let grant = h.coordinator.begin_authorization(&request).await.unwrap();

    let first = {
        let coordinator = h.coordinator.clone();
        let code = grant.code.clone();
        tokio::spawn(async move { coordinator.exchange_code(&code, "app-1").await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = h.coordinator.exchange_code(&grant.code, "app-1").await;

    let (winner, err) = one_winner(first.await.unwrap(), second);
    assert!(matches!(err, AuthError::InvalidGrant { .. }), "{err:?}");

    let err = h.coordinator.authenticate(&winner.access_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
    let err = h.coordinator.refresh(&winner.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn refresh_reused_during_rotation_revokes_successor() {
    let h = harness_with(Arc::new(SlowIssued::default()));
    let pair = login(&h.coordinator).await;

    let first = {
        let coordinator = h.coordinator.clone();
        let token = pair.refresh_token.clone();
        tokio::spawn(async move { coordinator.refresh(&token).await })
    };
    tokio::time::sleep(std::time::Duration::from_millis(10)).await;
    let second = h.coordinator.refresh(&pair.refresh_token).await;

    let (winner, err) = one_winner(first.await.unwrap(), second);
    assert!(matches!(err, AuthError::Revoked), "{err:?}");

    let err = h.coordinator.refresh(&winner.refresh_token).await.unwrap_err();
    assert!(matches!(err, AuthError::Revoked));
}
