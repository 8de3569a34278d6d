//! Key store with lock-free snapshot reads.
//!
//! The key set is an immutable [`KeySet`] published through [`ArcSwap`].
//! Readers load the current snapshot without locking. Writers (`rotate`,
//! `sweep`, `purge_retired`, `install`) build a new snapshot and swap it in
//! while holding a single writer mutex, so every published snapshot holds at
//! most one `Active` key and, once provisioned, exactly one.

use std::sync::Arc;

use arc_swap::ArcSwap;
use parking_lot::Mutex;
use time::{Duration, OffsetDateTime};
use tracing::{error, info};

use super::files::{KeyFiles, ensure_key_files, load_key_files};
use super::jwks::Jwks;
use super::signing_key::{KeyAlgorithm, KeyStatus, SigningKey, SigningKeyRecord};
use crate::AuthResult;
use crate::clock::{SharedClock, SystemClock};
use crate::config::{SigningConfig, to_time_duration};
use crate::error::AuthError;

/// Parameters for generating the next signing key.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RotationPolicy {
    /// Algorithm of the new key.
    pub algorithm: KeyAlgorithm,
    /// How long the demoted key keeps verifying.
    pub grace: Duration,
    /// Validity window of the new key.
    pub key_lifetime: Duration,
}

impl Default for RotationPolicy {
    fn default() -> Self {
        Self {
            algorithm: KeyAlgorithm::Rs256,
            grace: Duration::hours(24),
            key_lifetime: Duration::days(90),
        }
    }
}

impl RotationPolicy {
    /// Builds a policy from signing configuration.
    ///
    /// # Errors
    /// Returns `Configuration` if the configured algorithm is unsupported.
    pub fn from_config(config: &SigningConfig) -> AuthResult<Self> {
        let algorithm = config
            .key_algorithm()
            .map_err(|e| AuthError::configuration(e.to_string()))?;

        Ok(Self {
            algorithm,
            grace: to_time_duration(config.rotation_grace),
            key_lifetime: to_time_duration(config.key_lifetime),
        })
    }
}

/// An immutable view of all keys at one instant.
#[derive(Debug, Default)]
pub struct KeySet {
    keys: Vec<Arc<SigningKey>>,
}

impl KeySet {
    fn new(keys: Vec<Arc<SigningKey>>) -> Self {
        debug_assert!(
            keys.iter()
                .filter(|k| k.status() == KeyStatus::Active)
                .count()
                <= 1,
            "key set must never hold two active keys"
        );
        Self { keys }
    }

    /// The key that signs new credentials.
    #[must_use]
    pub fn active(&self) -> Option<&Arc<SigningKey>> {
        self.keys.iter().find(|k| k.status() == KeyStatus::Active)
    }

    /// Looks up a key by ID regardless of status.
    #[must_use]
    pub fn get(&self, kid: &str) -> Option<&Arc<SigningKey>> {
        self.keys.iter().find(|k| k.kid() == kid)
    }

    /// Iterates over all keys in insertion order.
    pub fn iter(&self) -> impl Iterator<Item = &Arc<SigningKey>> {
        self.keys.iter()
    }

    /// Number of keys.
    #[must_use]
    pub fn len(&self) -> usize {
        self.keys.len()
    }

    /// Returns `true` if no key has been provisioned.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.keys.is_empty()
    }
}

/// Owner of all signing keys.
pub struct KeyStore {
    keys: ArcSwap<KeySet>,
    writer: Mutex<()>,
    clock: SharedClock,
}

impl KeyStore {
    /// Creates an empty store. [`active_key`](Self::active_key) fails until a
    /// key is installed or rotated in.
    #[must_use]
    pub fn new(clock: SharedClock) -> Self {
        Self {
            keys: ArcSwap::from_pointee(KeySet::default()),
            writer: Mutex::new(()),
            clock,
        }
    }

    /// Creates a store with one freshly generated active key.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if the key cannot be generated.
    pub fn bootstrap(clock: SharedClock, policy: &RotationPolicy) -> AuthResult<Self> {
        let store = Self::new(clock);
        store.rotate(policy)?;
        Ok(store)
    }

    /// Creates a store whose active key is loaded from PEM text.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if the PEM material is invalid.
    pub fn from_pem(
        clock: SharedClock,
        policy: &RotationPolicy,
        private_pem: &str,
        public_pem: &str,
    ) -> AuthResult<Self> {
        let key = SigningKey::from_pem(
            policy.algorithm,
            private_pem,
            public_pem,
            clock.now(),
            policy.key_lifetime,
        )?;
        let store = Self::new(clock);
        store.install(key)?;
        Ok(store)
    }

    /// Creates a store whose active key is loaded from `files`. A missing
    /// pair is generated first; see [`ensure_key_files`].
    ///
    /// # Errors
    /// Returns `Configuration` for an orphaned public key file and
    /// `KeyGeneration` if the files cannot be read or parsed.
    pub fn from_key_files(
        clock: SharedClock,
        policy: &RotationPolicy,
        files: &KeyFiles,
    ) -> AuthResult<Self> {
        ensure_key_files(files, policy.algorithm)?;
        let key = load_key_files(files, policy.algorithm, clock.now(), policy.key_lifetime)?;
        let store = Self::new(clock);
        store.install(key)?;
        Ok(store)
    }

    /// Creates a store backed by the system clock.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if the key cannot be generated.
    pub fn with_system_clock(policy: &RotationPolicy) -> AuthResult<Self> {
        Self::bootstrap(Arc::new(SystemClock), policy)
    }

    /// Current snapshot. Never blocks.
    #[must_use]
    pub fn snapshot(&self) -> Arc<KeySet> {
        self.keys.load_full()
    }

    /// The key that signs new credentials.
    ///
    /// # Errors
    /// Returns `NoActiveKey` if nothing has been provisioned.
    pub fn active_key(&self) -> AuthResult<Arc<SigningKey>> {
        match self.keys.load().active() {
            Some(key) => Ok(Arc::clone(key)),
            None => {
                error!("No active signing key; key provisioning must run before issuing");
                Err(AuthError::NoActiveKey)
            }
        }
    }

    /// A key usable for verifying a token signed under `kid`.
    ///
    /// # Errors
    /// Returns `KeyNotFound` if the key is unknown, pending, retired, or a
    /// retiring key past its grace period.
    pub fn verification_key(&self, kid: &str) -> AuthResult<Arc<SigningKey>> {
        let now = self.clock.now();
        self.keys
            .load()
            .get(kid)
            .filter(|key| key.accepts_verification_at(now))
            .map(Arc::clone)
            .ok_or_else(|| AuthError::key_not_found(kid))
    }

    /// Installs `key` as the active key, demoting nothing.
    ///
    /// # Errors
    /// Returns `Configuration` if a key is already active or the `kid` is
    /// already present.
    pub fn install(&self, key: SigningKey) -> AuthResult<Arc<SigningKey>> {
        let _guard = self.writer.lock();
        let current = self.keys.load_full();

        if current.active().is_some() {
            return Err(AuthError::configuration(
                "an active key is already installed; use rotate",
            ));
        }
        if current.get(key.kid()).is_some() {
            return Err(AuthError::configuration(format!(
                "key {} is already present",
                key.kid()
            )));
        }

        let active = Arc::new(key.activated());
        let mut keys: Vec<_> = current.iter().cloned().collect();
        keys.push(Arc::clone(&active));
        self.keys.store(Arc::new(KeySet::new(keys)));

        info!(kid = %active.kid(), algorithm = %active.algorithm(), "Installed signing key");
        Ok(active)
    }

    /// Replaces the active key with a freshly generated one.
    ///
    /// The previous active key becomes `Retiring` with not-after set to
    /// now + `policy.grace`. Key generation runs before the writer lock is
    /// taken.
    ///
    /// # Errors
    /// Returns `KeyGeneration` if the new key cannot be generated, or
    /// `Configuration` if the grace window is out of range.
    pub fn rotate(&self, policy: &RotationPolicy) -> AuthResult<Arc<SigningKey>> {
        let generated_at = self.clock.now();
        let fresh = SigningKey::generate(policy.algorithm, generated_at, policy.key_lifetime)?;

        let _guard = self.writer.lock();
        let now = self.clock.now();
        let until = now
            .checked_add(policy.grace)
            .ok_or_else(|| AuthError::configuration("rotation grace is out of range"))?;
        let current = self.keys.load_full();

        let mut previous = None;
        let mut keys = Vec::with_capacity(current.len() + 1);
        for key in current.iter() {
            if key.status() == KeyStatus::Active {
                previous = Some(key.kid().to_string());
                keys.push(Arc::new(key.retiring(until)));
            } else {
                keys.push(Arc::clone(key));
            }
        }

        let active = Arc::new(fresh.activated());
        keys.push(Arc::clone(&active));
        self.keys.store(Arc::new(KeySet::new(keys)));

        info!(
            kid = %active.kid(),
            previous_kid = previous.as_deref().unwrap_or("-"),
            algorithm = %active.algorithm(),
            grace_secs = policy.grace.whole_seconds(),
            "Rotated signing key"
        );
        Ok(active)
    }

    /// Retires every `Retiring` key whose not-after is before `now`, dropping
    /// its private material. Returns the number of keys retired.
    pub fn sweep(&self, now: OffsetDateTime) -> usize {
        let _guard = self.writer.lock();
        let current = self.keys.load_full();

        let mut retired = 0;
        let keys: Vec<_> = current
            .iter()
            .map(|key| {
                if key.status() == KeyStatus::Retiring && now > key.not_after() {
                    retired += 1;
                    info!(kid = %key.kid(), "Retired signing key");
                    Arc::new(key.retired())
                } else {
                    Arc::clone(key)
                }
            })
            .collect();

        if retired > 0 {
            self.keys.store(Arc::new(KeySet::new(keys)));
        }
        retired
    }

    /// Deletes `Retired` keys. Returns the number removed.
    pub fn purge_retired(&self) -> usize {
        let _guard = self.writer.lock();
        let current = self.keys.load_full();

        let keys: Vec<_> = current
            .iter()
            .filter(|key| key.status() != KeyStatus::Retired)
            .cloned()
            .collect();

        let removed = current.len() - keys.len();
        if removed > 0 {
            self.keys.store(Arc::new(KeySet::new(keys)));
            info!(removed, "Purged retired signing keys");
        }
        removed
    }

    /// Returns `true` if the active key is past its not-after at `now`.
    #[must_use]
    pub fn rotation_due(&self, now: OffsetDateTime) -> bool {
        self.keys
            .load()
            .active()
            .is_none_or(|key| now > key.not_after())
    }

    /// Public keys that can currently verify, as a JWKS.
    #[must_use]
    pub fn jwks(&self) -> Jwks {
        let mut jwks = Jwks::new();
        for key in self.keys.load().iter() {
            if matches!(key.status(), KeyStatus::Active | KeyStatus::Retiring) {
                jwks.add_key(key.to_jwk());
            }
        }
        jwks
    }

    /// Public metadata of every key.
    #[must_use]
    pub fn records(&self) -> Vec<SigningKeyRecord> {
        self.keys.load().iter().map(|k| k.to_record()).collect()
    }
}

impl std::fmt::Debug for KeyStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyStore")
            .field("keys", &self.keys.load().len())
            .finish_non_exhaustive()
    }
}
