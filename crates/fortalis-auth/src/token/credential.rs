//! Credential payload types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use time::{Duration, OffsetDateTime};
use uuid::Uuid;

use crate::AuthResult;
use crate::error::AuthError;

/// Last year an RFC 3339 timestamp can carry.
const MAX_YEAR: i32 = 9999;

/// What a credential may be used for.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum CredentialKind {
    /// Presented to resource servers.
    Access,
    /// Exchanged for a new token pair.
    Refresh {
        /// Grant the refresh chain started from.
        parent_grant: Uuid,
    },
}

impl CredentialKind {
    /// Returns the kind name.
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Access => "access",
            Self::Refresh { .. } => "refresh",
        }
    }
}

/// The signed payload of a token.
///
/// Sets are ordered and timestamps are RFC 3339, so the JSON form of a given
/// value is always the same byte string.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CredentialData {
    /// Unique credential ID.
    #[serde(rename = "jti")]
    pub id: Uuid,

    /// Issuer.
    #[serde(rename = "iss")]
    pub issuer: String,

    /// Authenticated principal.
    #[serde(rename = "sub")]
    pub subject: String,

    /// Client the credential was issued to.
    pub client_id: String,

    /// Intended recipients.
    #[serde(rename = "aud")]
    pub audience: BTreeSet<String>,

    /// Granted scope.
    pub scope: BTreeSet<String>,

    /// Issue instant.
    #[serde(rename = "iat", with = "time::serde::rfc3339")]
    pub issued_at: OffsetDateTime,

    /// Expiry instant.
    #[serde(rename = "exp", with = "time::serde::rfc3339")]
    pub expires_at: OffsetDateTime,

    /// Access or refresh.
    pub kind: CredentialKind,
}

impl CredentialData {
    /// Starts building a credential issued at `issued_at`.
    #[must_use]
    pub fn builder(
        issuer: impl Into<String>,
        subject: impl Into<String>,
        client_id: impl Into<String>,
        issued_at: OffsetDateTime,
    ) -> CredentialBuilder {
        CredentialBuilder {
            issuer: issuer.into(),
            subject: subject.into(),
            client_id: client_id.into(),
            audience: BTreeSet::new(),
            scope: BTreeSet::new(),
            issued_at,
            expires_at: issued_at,
        }
    }

    /// Checks the payload invariants.
    ///
    /// # Errors
    /// Returns `InvalidCredential` if expires-at is not after issued-at or
    /// beyond year 9999, or a required identifier is empty.
    pub fn validate(&self) -> AuthResult<()> {
        if self.expires_at <= self.issued_at {
            return Err(AuthError::invalid_credential(
                "expires_at must be after issued_at",
            ));
        }
        if self.expires_at.year() > MAX_YEAR {
            return Err(AuthError::invalid_credential("expires_at is out of range"));
        }
        if self.issuer.is_empty() {
            return Err(AuthError::invalid_credential("issuer is empty"));
        }
        if self.subject.is_empty() {
            return Err(AuthError::invalid_credential("subject is empty"));
        }
        if self.client_id.is_empty() {
            return Err(AuthError::invalid_credential("client_id is empty"));
        }
        Ok(())
    }

    /// Returns `true` for access credentials.
    #[must_use]
    pub fn is_access(&self) -> bool {
        matches!(self.kind, CredentialKind::Access)
    }

    /// Returns `true` for refresh credentials.
    #[must_use]
    pub fn is_refresh(&self) -> bool {
        matches!(self.kind, CredentialKind::Refresh { .. })
    }

    /// The grant a refresh chain started from.
    #[must_use]
    pub fn parent_grant(&self) -> Option<Uuid> {
        match self.kind {
            CredentialKind::Refresh { parent_grant } => Some(parent_grant),
            CredentialKind::Access => None,
        }
    }

    /// Space-delimited scope string, in sorted order.
    #[must_use]
    pub fn scope_string(&self) -> String {
        self.scope.iter().map(String::as_str).collect::<Vec<_>>().join(" ")
    }

    /// Remaining lifetime at `now`, never negative.
    #[must_use]
    pub fn remaining(&self, now: OffsetDateTime) -> Duration {
        (self.expires_at - now).max(Duration::ZERO)
    }
}

/// Builder for [`CredentialData`].
#[derive(Debug, Clone)]
pub struct CredentialBuilder {
    issuer: String,
    subject: String,
    client_id: String,
    audience: BTreeSet<String>,
    scope: BTreeSet<String>,
    issued_at: OffsetDateTime,
    expires_at: OffsetDateTime,
}

impl CredentialBuilder {
    /// Sets the audience.
    #[must_use]
    pub fn audience<I, S>(mut self, audience: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.audience = audience.into_iter().map(Into::into).collect();
        self
    }

    /// Sets the scope.
    #[must_use]
    pub fn scope<I, S>(mut self, scope: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.scope = scope.into_iter().map(Into::into).collect();
        self
    }

    /// Sets expiry relative to the issue instant, saturating at the largest
    /// representable instant.
    #[must_use]
    pub fn lifetime(mut self, lifetime: Duration) -> Self {
        self.expires_at = self.issued_at.saturating_add(lifetime);
        self
    }

    /// Sets expiry relative to the issue instant.
    ///
    /// # Errors
    /// Returns `InvalidCredential` if the expiry is not representable.
    pub fn try_lifetime(mut self, lifetime: Duration) -> AuthResult<Self> {
        self.expires_at = self
            .issued_at
            .checked_add(lifetime)
            .filter(|exp| exp.year() <= MAX_YEAR)
            .ok_or_else(|| AuthError::invalid_credential("lifetime is out of range"))?;
        Ok(self)
    }

    /// Sets an absolute expiry.
    #[must_use]
    pub fn expires_at(mut self, expires_at: OffsetDateTime) -> Self {
        self.expires_at = expires_at;
        self
    }

    /// Builds an access credential with a fresh ID.
    #[must_use]
    pub fn access(self) -> CredentialData {
        self.build(CredentialKind::Access)
    }

    /// Builds a refresh credential with a fresh ID.
    #[must_use]
    pub fn refresh(self, parent_grant: Uuid) -> CredentialData {
        self.build(CredentialKind::Refresh { parent_grant })
    }

    fn build(self, kind: CredentialKind) -> CredentialData {
        CredentialData {
            id: Uuid::new_v4(),
            issuer: self.issuer,
            subject: self.subject,
            client_id: self.client_id,
            audience: self.audience,
            scope: self.scope,
            issued_at: self.issued_at,
            expires_at: self.expires_at,
            kind,
        }
    }
}

/// A credential whose signature has been verified.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credential {
    /// ID of the key that signed it.
    pub key_id: String,
    /// The verified payload.
    pub data: CredentialData,
}

impl Credential {
    /// Credential ID.
    #[must_use]
    pub fn id(&self) -> Uuid {
        self.data.id
    }

    /// Kind.
    #[must_use]
    pub fn kind(&self) -> CredentialKind {
        self.data.kind
    }
}
