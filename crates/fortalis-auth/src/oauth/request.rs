//! Authorization request and token response types.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::AuthResult;
use crate::error::AuthError;

/// Maximum length of client identifiers and subjects.
const MAX_IDENTIFIER_LEN: usize = 255;

/// A request by a client to act on behalf of an authenticated subject.
///
/// The subject has already been authenticated by the caller; the engine only
/// decides whether the client may obtain the requested scope.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuthorizationRequest {
    /// Client identifier.
    pub client_id: String,

    /// Authenticated resource owner.
    pub subject: String,

    /// Requested scope.
    pub scope: BTreeSet<String>,

    /// Where the client expects the code to be delivered.
    pub redirect_uri: String,
}

impl AuthorizationRequest {
    /// Creates a request.
    #[must_use]
    pub fn new<I, S>(
        client_id: impl Into<String>,
        subject: impl Into<String>,
        scope: I,
        redirect_uri: impl Into<String>,
    ) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            client_id: client_id.into(),
            subject: subject.into(),
            scope: scope.into_iter().map(Into::into).collect(),
            redirect_uri: redirect_uri.into(),
        }
    }

    /// Checks the request shape and returns the parsed redirect target.
    ///
    /// # Errors
    ///
    /// Returns `InvalidRequest` if an identifier is empty, too long or
    /// contains control characters, if the scope is empty or a scope token is
    /// not valid per RFC 6749 section 3.3, and `InvalidRedirect` if the
    /// redirect is not an absolute URL without a fragment.
    pub fn validate(&self) -> AuthResult<Url> {
        validate_identifier("client_id", &self.client_id)?;
        validate_identifier("subject", &self.subject)?;

        if self.scope.is_empty() {
            return Err(AuthError::invalid_request("scope must not be empty"));
        }
        if let Some(bad) = self.scope.iter().find(|s| !is_valid_scope_token(s)) {
            return Err(AuthError::invalid_request(format!(
                "invalid scope token: '{}'",
                bad
            )));
        }

        let url = Url::parse(&self.redirect_uri)
            .map_err(|e| AuthError::invalid_redirect(format!("not an absolute URL: {e}")))?;
        if url.fragment().is_some() {
            return Err(AuthError::invalid_redirect(
                "redirect_uri must not contain a fragment",
            ));
        }
        if url.cannot_be_a_base() {
            return Err(AuthError::invalid_redirect(
                "redirect_uri must be hierarchical",
            ));
        }

        Ok(url)
    }
}

/// Parses a space-delimited scope string.
#[must_use]
pub fn parse_scope(scope: &str) -> BTreeSet<String> {
    scope.split_whitespace().map(str::to_string).collect()
}

fn validate_identifier(name: &str, value: &str) -> AuthResult<()> {
    if value.is_empty() {
        return Err(AuthError::invalid_request(format!("{name} must not be empty")));
    }
    if value.len() > MAX_IDENTIFIER_LEN {
        return Err(AuthError::invalid_request(format!(
            "{name} exceeds {MAX_IDENTIFIER_LEN} bytes"
        )));
    }
    if value.chars().any(char::is_control) {
        return Err(AuthError::invalid_request(format!(
            "{name} contains control characters"
        )));
    }
    Ok(())
}

/// `scope-token = 1*( %x21 / %x23-5B / %x5D-7E )`
fn is_valid_scope_token(token: &str) -> bool {
    !token.is_empty()
        && token
            .bytes()
            .all(|b| b == 0x21 || (0x23..=0x5B).contains(&b) || (0x5D..=0x7E).contains(&b))
}

/// Tokens returned from a code exchange or refresh.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenPair {
    /// Signed access token.
    pub access_token: String,

    /// Signed refresh token.
    pub refresh_token: String,

    /// Always "Bearer".
    pub token_type: String,

    /// Access token lifetime in seconds.
    pub expires_in: i64,

    /// Granted scope, space-delimited.
    pub scope: String,
}

impl std::fmt::Debug for TokenPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenPair")
            .field("access_token", &"[REDACTED]")
            .field("refresh_token", &"[REDACTED]")
            .field("token_type", &self.token_type)
            .field("expires_in", &self.expires_in)
            .field("scope", &self.scope)
            .finish()
    }
}
