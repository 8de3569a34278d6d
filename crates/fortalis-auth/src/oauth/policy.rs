//! Client and entitlement collaborators.
//!
//! The coordinator never decides on its own which clients exist or what a
//! subject may be granted. Both answers come from the traits here; the static
//! implementations serve tests and single-node deployments.

use std::collections::BTreeSet;

use async_trait::async_trait;
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use url::Url;

use crate::AuthResult;

/// A client allowed to start authorization flows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegisteredClient {
    /// Client identifier.
    pub client_id: String,

    /// Human-readable name.
    #[serde(default)]
    pub name: Option<String>,

    /// Registered redirect targets, matched exactly.
    pub redirect_uris: Vec<String>,

    /// Whether the client may currently start flows.
    #[serde(default = "default_true")]
    pub active: bool,
}

fn default_true() -> bool {
    true
}

impl RegisteredClient {
    /// Creates an active client.
    #[must_use]
    pub fn new<I, S>(client_id: impl Into<String>, redirect_uris: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            name: None,
            redirect_uris: redirect_uris.into_iter().map(Into::into).collect(),
            active: true,
        }
    }

    /// Checks whether a redirect target is registered for this client.
    ///
    /// Comparison is on the serialized URL, so trivially different spellings
    /// of the same target (default port, empty path) still match.
    #[must_use]
    pub fn is_redirect_uri_allowed(&self, uri: &Url) -> bool {
        self.redirect_uris.iter().any(|allowed| {
            Url::parse(allowed).is_ok_and(|allowed| allowed.as_str() == uri.as_str())
        })
    }
}

/// Looks up registered clients.
#[async_trait]
pub trait ClientRegistry: Send + Sync {
    /// Finds a client by its identifier.
    ///
    /// # Returns
    ///
    /// Returns `Ok(Some(client))` if registered, `Ok(None)` if unknown.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn find_client(&self, client_id: &str) -> AuthResult<Option<RegisteredClient>>;
}

/// Decides which scope a subject may grant to a client.
#[async_trait]
pub trait EntitlementPolicy: Send + Sync {
    /// Returns the scope `subject` is entitled to grant `client_id`.
    ///
    /// # Errors
    ///
    /// Returns an error if the backing store fails.
    async fn entitlements(&self, subject: &str, client_id: &str) -> AuthResult<BTreeSet<String>>;
}

/// Fixed client allow-list.
#[derive(Debug, Default)]
pub struct StaticClientRegistry {
    clients: DashMap<String, RegisteredClient>,
}

impl StaticClientRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers or replaces a client.
    pub fn register(&self, client: RegisteredClient) {
        self.clients.insert(client.client_id.clone(), client);
    }

    /// Removes a client.
    pub fn remove(&self, client_id: &str) -> Option<RegisteredClient> {
        self.clients.remove(client_id).map(|(_, client)| client)
    }

    /// Number of registered clients.
    #[must_use]
    pub fn len(&self) -> usize {
        self.clients.len()
    }

    /// Returns `true` if no client is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.clients.is_empty()
    }
}

impl FromIterator<RegisteredClient> for StaticClientRegistry {
    fn from_iter<T: IntoIterator<Item = RegisteredClient>>(iter: T) -> Self {
        let registry = Self::new();
        for client in iter {
            registry.register(client);
        }
        registry
    }
}

#[async_trait]
impl ClientRegistry for StaticClientRegistry {
    async fn find_client(&self, client_id: &str) -> AuthResult<Option<RegisteredClient>> {
        Ok(self.clients.get(client_id).map(|c| c.value().clone()))
    }
}

/// Fixed scope entitlements.
///
/// Per-subject grants take precedence over the default set.
#[derive(Debug, Default)]
pub struct StaticEntitlementPolicy {
    default_scope: BTreeSet<String>,
    subjects: DashMap<String, BTreeSet<String>>,
}

impl StaticEntitlementPolicy {
    /// Entitles every subject to `scope`.
    #[must_use]
    pub fn allow_all<I, S>(scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            default_scope: scope.into_iter().map(Into::into).collect(),
            subjects: DashMap::new(),
        }
    }

    /// Sets the entitlements of one subject.
    pub fn grant<I, S>(&self, subject: impl Into<String>, scope: I)
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.subjects
            .insert(subject.into(), scope.into_iter().map(Into::into).collect());
    }
}

#[async_trait]
impl EntitlementPolicy for StaticEntitlementPolicy {
    async fn entitlements(&self, subject: &str, _client_id: &str) -> AuthResult<BTreeSet<String>> {
        Ok(self
            .subjects
            .get(subject)
            .map(|s| s.value().clone())
            .unwrap_or_else(|| self.default_scope.clone()))
    }
}
