//! OAuth 2.0 authorization code flow.
//!
//! - [`request`] - Authorization request validation and token response types
//! - [`grant`] - Authorization grants and single-use codes
//! - [`policy`] - Client allow-list and entitlement collaborators
//! - [`coordinator`] - The flow itself: begin, exchange, refresh
//!
//! # Example
//!
//! ```ignore
//! use fortalis_auth::oauth::{AuthorizationFlowCoordinator, AuthorizationRequest};
//!
//! let request = AuthorizationRequest::new("app-1", "u1", ["read"], "https://app.example.com/cb");
//! let grant = coordinator.begin_authorization(&request).await?;
//!
//! // The client returns with the code
//! let pair = coordinator.exchange_code(&grant.code, "app-1").await?;
//! let rotated = coordinator.refresh(&pair.refresh_token).await?;
//! ```

pub mod coordinator;
pub mod grant;
pub mod policy;
pub mod request;

pub use coordinator::{AuthorizationFlowCoordinator, BEARER, FlowSettings};
pub use grant::{AuthorizationGrant, GrantState, NewGrant};
pub use policy::{
    ClientRegistry, EntitlementPolicy, RegisteredClient, StaticClientRegistry,
    StaticEntitlementPolicy,
};
pub use request::{AuthorizationRequest, TokenPair, parse_scope};
