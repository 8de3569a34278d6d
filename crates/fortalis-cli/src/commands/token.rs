use std::sync::Arc;

use anyhow::Result;
use fortalis_auth::oauth::parse_scope;
use fortalis_auth::{
    AuthConfig, AuthorizationFlowCoordinator, AuthorizationRequest, LedgerSettings,
    RegisteredClient, SessionLedger, SharedClock, StaticClientRegistry, StaticEntitlementPolicy,
    SystemClock, TokenCodec,
};
use serde_json::json;

use super::keys::{open_store, resolve};
use crate::cli::{InspectArgs, IssueArgs, VerifyArgs};
use crate::output::{print_json, print_warning};

const CLI_REDIRECT: &str = "http://localhost/fortalis-cli/callback";

/// Runs a complete authorization code flow against an in-memory ledger.
pub async fn issue(config: &AuthConfig, args: &IssueArgs) -> Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let keys = Arc::new(open_store(&resolve(config, None)?, clock.clone())?);
    let scope = parse_scope(&args.scope);

    let clients: StaticClientRegistry = [RegisteredClient::new(&args.client_id, [CLI_REDIRECT])]
        .into_iter()
        .collect();
    let entitlements = StaticEntitlementPolicy::allow_all(scope.iter().cloned());
    let ledger = SessionLedger::in_memory(clock.clone(), LedgerSettings::from_config(config));

    let coordinator = AuthorizationFlowCoordinator::from_config(
        config,
        keys,
        ledger,
        Arc::new(clients),
        Arc::new(entitlements),
        clock,
    );

    let request = AuthorizationRequest::new(&args.client_id, &args.subject, scope, CLI_REDIRECT);
    let grant = coordinator.begin_authorization(&request).await?;
    let pair = coordinator.exchange_code(&grant.code, &args.client_id).await?;

    print_warning("Issued against an in-memory ledger; revocation state is not kept");
    print_json(&pair)
}

pub fn verify(config: &AuthConfig, args: &VerifyArgs) -> Result<()> {
    let clock: SharedClock = Arc::new(SystemClock);
    let keys = open_store(&resolve(config, None)?, clock.clone())?;
    let codec = TokenCodec::from_config(config, clock);

    let credential = if args.allow_expired {
        codec.verify_allow_expired(&args.token, &keys)?
    } else {
        codec.verify(&args.token, &keys)?
    };

    print_json(&json!({
        "valid": true,
        "kid": credential.key_id,
        "payload": credential.data,
    }))
}

pub fn inspect(args: &InspectArgs) -> Result<()> {
    let token = TokenCodec::decode_unverified(&args.token)?;

    print_warning("Signature and lifetime NOT verified");
    print_json(&json!({
        "header": token.header,
        "payload": token.data,
    }))
}
