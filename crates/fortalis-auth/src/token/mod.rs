//! Bearer credentials.
//!
//! - [`CredentialData`] is the signed payload
//! - [`TokenCodec`] turns it into a compact signed token and back

pub mod codec;
pub mod credential;

pub use codec::{DEFAULT_LEEWAY, TOKEN_TYPE, TokenCodec, TokenHeader, UnverifiedToken};
pub use credential::{Credential, CredentialBuilder, CredentialData, CredentialKind};
