pub mod common;

use std::sync::Arc;
use std::thread;
use std::time::Duration;

use common::{directory, handshake, provider, provider_with, start, ALICE};
use winauth::adapter::memory::authenticate_token;
use winauth::{ConnectionId, ErrorKind, NativeStatus, NegotiationOutcome, PackageList, ProviderConfig, SecurityPackage};

#[test]
fn ntlm_handshake_establishes_identity() {
    let adapter = directory();
    let provider = provider(&adapter);
    let id = ConnectionId::from("conn-1");

    let challenge = start(&provider, &id, SecurityPackage::Ntlm);
    assert!(challenge.starts_with(b"CHALLENGE "));
    assert!(provider.contains(&id));

    let answer = authenticate_token(&challenge, ALICE).unwrap();
    let outcome = provider.accept_token(&id, &answer, SecurityPackage::Ntlm).unwrap();

    assert!(!outcome.continue_needed());
    assert_eq!(outcome.token(), None);
    let identity = outcome.into_identity().unwrap();
    assert_eq!(identity.fqn(), ALICE);
    assert!(identity.is_member_of("CONTOSO\\Domain Admins"));
    assert!(!provider.contains(&id));
    assert_eq!(provider.active_contexts(), 0);

    drop(identity);
    assert!(adapter.outstanding_handles().is_empty());
    assert_eq!(adapter.invalid_releases(), 0);
}

#[test]
fn negotiate_returns_final_token() {
    let adapter = directory();
    let provider = provider(&adapter);

    let outcome = handshake(&provider, &"conn".into(), SecurityPackage::Negotiate, ALICE).unwrap();

    match outcome {
        NegotiationOutcome::Complete { token, identity } => {
            assert_eq!(token.as_deref(), Some(&b"ACCEPT"[..]));
            assert_eq!(identity.fqn(), ALICE);
        }
        outcome => panic!("unexpected outcome {outcome:?}"),
    }
}

#[test]
fn empty_first_token_is_accepted() {
    let adapter = directory();
    let provider = provider(&adapter);

    let outcome = provider
        .accept_token(&"conn".into(), &[], SecurityPackage::Negotiate)
        .unwrap();

    assert!(outcome.continue_needed());
    assert!(outcome.identity().is_none());
}

#[test]
fn malformed_token_fails_and_removes_context() {
    let adapter = directory();
    let provider = provider(&adapter);
    let id = ConnectionId::from("conn");

    let err = provider
        .accept_token(&id, b"\x00garbage", SecurityPackage::Ntlm)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Token);
    assert_eq!(err.native_code(), Some(NativeStatus::InvalidToken.code()));
    assert!(!provider.contains(&id));

    start(&provider, &id, SecurityPackage::Ntlm);
    let err = provider
        .accept_token(&id, b"AUTHENTICATE", SecurityPackage::Ntlm)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Token);
    assert!(!provider.contains(&id));
    assert!(adapter.outstanding_handles().is_empty());
}

#[test]
fn altered_answer_is_token_error() {
    let adapter = directory();
    let provider = provider(&adapter);
    let id = ConnectionId::from("conn");

    start(&provider, &id, SecurityPackage::Kerberos);
    let err = provider
        .accept_token(&id, b"AUTHENTICATE Zm9yZ2Vk CONTOSO\\alice", SecurityPackage::Kerberos)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Token);
    assert_eq!(err.native_code(), Some(NativeStatus::MessageAltered.code()));
}

#[test]
fn unknown_client_is_credential_error() {
    let adapter = directory();
    let provider = provider(&adapter);

    let err = handshake(&provider, &"conn".into(), SecurityPackage::Ntlm, "CONTOSO\\mallory").unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Credential);
    assert_eq!(err.description, "The logon attempt failed");
}

#[test]
fn terminal_connection_starts_over() {
    let adapter = directory();
    let provider = provider(&adapter);
    let id = ConnectionId::from("reused");

    handshake(&provider, &id, SecurityPackage::Ntlm, ALICE).unwrap();
    let outcome = provider
        .accept_token(&id, b"NEGOTIATE NTLM", SecurityPackage::Ntlm)
        .unwrap();
    assert!(outcome.continue_needed());

    provider.accept_token(&id, b"bogus", SecurityPackage::Ntlm).unwrap_err();
    let outcome = handshake(&provider, &id, SecurityPackage::Ntlm, ALICE).unwrap();
    assert_eq!(outcome.identity().unwrap().fqn(), ALICE);
}

#[test]
fn disabled_package_is_rejected_without_context() {
    let adapter = directory();
    let config = ProviderConfig::default().with_packages(PackageList::parse("!kerberos"));
    let provider = provider_with(&adapter, config);
    let id = ConnectionId::from("conn");

    let err = provider
        .accept_token(&id, b"NEGOTIATE Kerberos", SecurityPackage::Kerberos)
        .unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Package);
    assert!(!provider.contains(&id));
    assert_eq!(adapter.outstanding_handles().contexts, 0);
}

#[test]
fn package_names_are_resolved() {
    let adapter = directory();
    let provider = provider(&adapter);

    let outcome = provider.accept_token_for(&"conn".into(), b"", "ntlm").unwrap();
    assert!(outcome.continue_needed());

    let err = provider.accept_token_for(&"other".into(), b"", "Digest").unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Package);
    assert!(!provider.contains(&"other".into()));
}

#[test]
fn package_mismatch_leaves_context_untouched() {
    let adapter = directory();
    let provider = provider(&adapter);
    let id = ConnectionId::from("conn");

    let challenge = start(&provider, &id, SecurityPackage::Ntlm);
    let answer = authenticate_token(&challenge, ALICE).unwrap();

    let err = provider
        .accept_token(&id, &answer, SecurityPackage::Kerberos)
        .unwrap_err();
    assert_eq!(err.kind(), ErrorKind::Package);
    assert!(provider.contains(&id));

    let outcome = provider.accept_token(&id, &answer, SecurityPackage::Ntlm).unwrap();
    assert_eq!(outcome.identity().unwrap().fqn(), ALICE);
}

#[test]
fn reset_discards_in_flight_context() {
    let adapter = directory();
    let provider = provider(&adapter);
    let id = ConnectionId::from("conn");

    start(&provider, &id, SecurityPackage::Ntlm);
    assert_eq!(adapter.outstanding_handles().contexts, 1);

    assert!(provider.reset(&id).unwrap());
    assert!(!provider.contains(&id));
    assert_eq!(adapter.outstanding_handles().contexts, 0);
    assert!(!provider.reset(&id).unwrap());
}

#[test]
fn idle_contexts_are_evicted() {
    let adapter = directory();
    let config = ProviderConfig::default().with_context_ttl(Some(Duration::from_millis(50)));
    let provider = provider_with(&adapter, config);

    start(&provider, &"idle".into(), SecurityPackage::Ntlm);
    thread::sleep(Duration::from_millis(120));

    // Any round sweeps expired contexts first.
    start(&provider, &"fresh".into(), SecurityPackage::Ntlm);
    assert!(!provider.contains(&"idle".into()));
    assert!(provider.contains(&"fresh".into()));
    assert_eq!(adapter.outstanding_handles().contexts, 1);

    thread::sleep(Duration::from_millis(120));
    assert_eq!(provider.evict_expired().unwrap(), 1);
    assert_eq!(provider.active_contexts(), 0);
    assert!(adapter.outstanding_handles().is_empty());
    assert_eq!(adapter.invalid_releases(), 0);
}

#[test]
fn disabled_ttl_keeps_contexts() {
    let adapter = directory();
    let provider = provider_with(&adapter, ProviderConfig::default().with_context_ttl(None));

    start(&provider, &"idle".into(), SecurityPackage::Ntlm);
    thread::sleep(Duration::from_millis(20));

    assert_eq!(provider.evict_expired().unwrap(), 0);
    assert!(provider.contains(&"idle".into()));
}

#[test]
fn distinct_connections_complete_concurrently() {
    let adapter = directory();
    let provider = Arc::new(provider(&adapter));

    let handles = (0..16)
        .map(|i| {
            let provider = Arc::clone(&provider);
            thread::spawn(move || {
                let id = ConnectionId::new(uuid::Uuid::new_v4().to_string());
                let package = if i % 2 == 0 {
                    SecurityPackage::Ntlm
                } else {
                    SecurityPackage::Negotiate
                };

                handshake(&provider, &id, package, ALICE)
                    .unwrap()
                    .into_identity()
                    .unwrap()
                    .fqn()
                    .to_owned()
            })
        })
        .collect::<Vec<_>>();

    for handle in handles {
        assert_eq!(handle.join().unwrap(), ALICE);
    }
    assert_eq!(provider.active_contexts(), 0);
    assert!(adapter.outstanding_handles().is_empty());
}

#[test]
fn loopback_with_client_context() {
    let adapter = directory();
    let provider = provider(&adapter);
    let id = ConnectionId::from("loopback");

    let mut client = provider.client_context(SecurityPackage::Negotiate, Some("HTTP/web01")).unwrap();
    let mut outcome = provider
        .accept_token(&id, client.token(), SecurityPackage::Negotiate)
        .unwrap();

    while outcome.continue_needed() {
        client.initialize(outcome.token().unwrap_or_default()).unwrap();
        outcome = provider
            .accept_token(&id, client.token(), SecurityPackage::Negotiate)
            .unwrap();
    }
    assert!(client.continue_needed());
    client.initialize(outcome.token().unwrap()).unwrap();

    assert!(!client.continue_needed());
    assert_eq!(outcome.identity().unwrap().fqn(), ALICE);

    drop(client);
    drop(outcome);
    assert!(adapter.outstanding_handles().is_empty());
}
