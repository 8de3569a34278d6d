//! Storage traits for ledger state.
//!
//! This module defines storage interfaces for:
//!
//! - Authorization grants
//! - Revocation records
//! - Issued credential audit entries (refresh chains)
//!
//! In-memory implementations live in [`memory`]. Relational backends belong
//! in separate crates and only need to honour the atomicity notes on each
//! trait.

pub mod grant;
pub mod issued;
pub mod memory;
pub mod revocation;

pub use grant::{GrantStorage, RedeemOutcome};
pub use issued::{IssuedCredential, IssuedCredentialStorage};
pub use memory::{MemoryGrantStorage, MemoryIssuedCredentialStorage, MemoryRevocationStorage};
pub use revocation::{RevocationReason, RevocationRecord, RevocationStorage};
