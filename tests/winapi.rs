#![cfg(windows)]

use std::sync::Arc;

use winauth::adapter::WindowsAdapter;
use winauth::{AuthProvider, ConnectionId, ErrorKind, PackageList, ProviderConfig, Secret, SecurityPackage};

const TEST_USERNAME_ENV: &str = "WINAUTH_TEST_USERNAME";
const TEST_PASSWORD_ENV: &str = "WINAUTH_TEST_PASSWORD";

fn native_provider() -> AuthProvider {
    let config = ProviderConfig::default();
    let adapter = WindowsAdapter::new(&config.packages).unwrap();

    AuthProvider::new(Arc::new(adapter), config)
}

/// The account configured for logon tests, if any.
fn test_account() -> Option<(String, Secret<String>)> {
    let username = std::env::var(TEST_USERNAME_ENV).ok()?;
    let password = std::env::var(TEST_PASSWORD_ENV).ok()?;

    Some((username, Secret::new(password)))
}

#[test]
fn current_computer_has_a_name() {
    let provider = native_provider();

    let computer = provider.current_computer().unwrap();

    assert!(!computer.name.is_empty());
    assert!(computer.name.len() <= 15);
}

#[test]
fn current_identity_resolves() {
    let provider = native_provider();

    let account = provider.current_identity().unwrap();

    assert!(account.sid_string().starts_with("S-1-"));
    assert!(account.fqn().to_lowercase().ends_with(&whoami::username().to_lowercase()));
}

#[test]
fn builtin_group_lookup() {
    let provider = native_provider();

    let account = provider.lookup_account("BUILTIN\\Administrators").unwrap();

    assert_eq!(account.sid_string(), "S-1-5-32-544");
}

#[test]
fn domains_or_not_joined() {
    let provider = native_provider();

    match provider.domains() {
        Ok(domains) => assert!(domains.iter().any(|domain| domain.is_primary())),
        Err(err) => assert!(err.is_not_joined(), "{err}"),
    }
}

#[test]
fn wrong_password_is_credential_error() {
    let provider = native_provider();

    let err = provider
        .logon_local_user(&whoami::username(), &Secret::from("InvalidPassword"))
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Credential);
}

#[test]
fn configured_account_logs_on_and_impersonates() {
    let Some((username, password)) = test_account() else {
        eprintln!("{TEST_USERNAME_ENV}/{TEST_PASSWORD_ENV} not set, skipping");
        return;
    };
    let provider = native_provider();

    let identity = provider.logon_local_user(&username, &password).unwrap();
    let fqn = identity
        .run_as(|| provider.current_identity().unwrap().fqn().to_owned())
        .unwrap();

    assert_eq!(fqn, identity.fqn());
}

#[test]
fn ntlm_loopback_handshake() {
    let provider = native_provider();
    let id = ConnectionId::from("loopback");

    let mut client = provider.client_context(SecurityPackage::Ntlm, None).unwrap();
    let mut outcome = provider.accept_token(&id, client.token(), SecurityPackage::Ntlm).unwrap();
    while outcome.continue_needed() {
        client.initialize(outcome.token().unwrap_or_default()).unwrap();
        outcome = provider.accept_token(&id, client.token(), SecurityPackage::Ntlm).unwrap();
    }

    let identity = outcome.into_identity().unwrap();
    assert_eq!(identity.fqn(), provider.current_identity().unwrap().fqn());
    assert!(!provider.contains(&id));
}

#[test]
fn disabled_package_is_not_acquired() {
    let config = ProviderConfig::default().with_packages(PackageList::only(&[SecurityPackage::Ntlm]));
    let adapter = WindowsAdapter::new(&config.packages).unwrap();
    let provider = AuthProvider::new(Arc::new(adapter), config);

    let err = provider
        .accept_token(&"conn".into(), &[], SecurityPackage::Kerberos)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Package);
}
