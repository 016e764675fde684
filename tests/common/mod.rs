#![allow(dead_code)]

use std::sync::{Arc, Once};

use tracing_subscriber::EnvFilter;
use winauth::adapter::memory::{authenticate_token, negotiate_token, MemoryDomain};
use winauth::adapter::{IdentityAdapter, MemoryAdapter};
use winauth::{AuthProvider, ConnectionId, NegotiationOutcome, ProviderConfig, SecurityPackage};

pub const ALICE: &str = "CONTOSO\\alice";
pub const ALICE_PASSWORD: &str = "Alice-Passw0rd";
pub const BOB_PASSWORD: &str = "Bob-Passw0rd";

static TRACING: Once = Once::new();

pub fn init_tracing() {
    TRACING.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

/// A computer `WEB01` joined to `CONTOSO` (`contoso.com`), trusting `FABRIKAM`.
///
/// `CONTOSO\alice` is a domain admin, `WEB01\bob` a plain local user and `WEB01\visitor` a
/// member of the built-in guests. The process runs as `CONTOSO\alice`.
pub fn directory() -> Arc<MemoryAdapter> {
    init_tracing();

    Arc::new(
        MemoryAdapter::builder()
            .computer_name("web01")
            .joined_domain(MemoryDomain::new("CONTOSO", "contoso.com"))
            .trusted_domain(MemoryDomain::new("FABRIKAM", "fabrikam.com"))
            .domain_user("alice", ALICE_PASSWORD)
            .member_of("CONTOSO\\Domain Admins")
            .local_user("bob", BOB_PASSWORD)
            .local_user("visitor", "visitor")
            .member_of("BUILTIN\\Guests")
            .process_user(ALICE)
            .build(),
    )
}

pub fn provider(adapter: &Arc<MemoryAdapter>) -> AuthProvider {
    provider_with(adapter, ProviderConfig::default())
}

pub fn provider_with(adapter: &Arc<MemoryAdapter>, config: ProviderConfig) -> AuthProvider {
    let adapter: Arc<dyn IdentityAdapter> = Arc::clone(adapter) as _;

    AuthProvider::new(adapter, config)
}

/// Runs the first round of a handshake and returns the server challenge.
pub fn start(provider: &AuthProvider, id: &ConnectionId, package: SecurityPackage) -> Vec<u8> {
    match provider.accept_token(id, &negotiate_token(package), package).unwrap() {
        NegotiationOutcome::Continue { token } => token,
        outcome => panic!("expected a challenge, got {outcome:?}"),
    }
}

/// Runs a complete handshake for `fqn`.
pub fn handshake(
    provider: &AuthProvider,
    id: &ConnectionId,
    package: SecurityPackage,
    fqn: &str,
) -> winauth::Result<NegotiationOutcome> {
    let challenge = start(provider, id, package);
    let answer = authenticate_token(&challenge, fqn).unwrap();

    provider.accept_token(id, &answer, package)
}
