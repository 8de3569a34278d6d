//! Signing key lifecycle.
//!
//! - [`SigningKey`] - key pair with status and validity window
//! - [`KeyStore`] - snapshot-published key set with rotation and sweep
//! - [`Jwks`] - public key export
//! - [`files`] - PEM files for the startup key

pub mod files;
pub mod jwks;
pub mod signing_key;
pub mod store;

pub use files::{KeyFileStatus, KeyFiles, ensure_key_files, load_key_files, write_key_files};
pub use jwks::{Jwk, Jwks};
pub use signing_key::{KeyAlgorithm, KeyStatus, SigningKey, SigningKeyRecord};
pub use store::{KeySet, KeyStore, RotationPolicy};
