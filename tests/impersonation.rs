pub mod common;

use std::panic::{self, AssertUnwindSafe};
use std::thread;

use common::{directory, provider, ALICE, BOB_PASSWORD};
use static_assertions::{assert_impl_all, assert_not_impl_any};
use winauth::impersonation::is_impersonating;
use winauth::{AuthProvider, ErrorKind, Identity, ImpersonationGuard, Secret};

assert_impl_all!(Identity: Send, Sync, Clone);
assert_impl_all!(AuthProvider: Send, Sync);
assert_not_impl_any!(ImpersonationGuard<'static>: Send, Sync);

const BOB: &str = "WEB01\\bob";

#[test]
fn scope_changes_effective_identity() {
    let adapter = directory();
    let provider = provider(&adapter);
    let bob = provider.logon_local_user("bob", &Secret::from(BOB_PASSWORD)).unwrap();

    {
        let guard = bob.impersonate().unwrap();
        assert!(is_impersonating());
        assert_eq!(guard.identity().fqn(), BOB);
        assert!(format!("{guard:?}").contains("bob"));
        assert_eq!(provider.current_identity().unwrap().fqn(), BOB);
    }

    assert!(!is_impersonating());
    assert_eq!(provider.current_identity().unwrap().fqn(), ALICE);
    assert_eq!(adapter.outstanding_handles().impersonations, 0);
}

#[test]
fn explicit_revert_restores_once() {
    let adapter = directory();
    let provider = provider(&adapter);
    let bob = provider.logon_local_user("bob", &Secret::from(BOB_PASSWORD)).unwrap();

    let guard = bob.impersonate().unwrap();
    guard.revert();

    assert_eq!(provider.current_identity().unwrap().fqn(), ALICE);
    assert_eq!(adapter.invalid_releases(), 0);
}

#[test]
fn run_as_reverts_on_error() {
    let adapter = directory();
    let provider = provider(&adapter);
    let bob = provider.logon_local_user("bob", &Secret::from(BOB_PASSWORD)).unwrap();

    let result: Result<(), String> = bob
        .run_as(|| {
            assert_eq!(provider.current_identity().unwrap().fqn(), BOB);
            Err("failed inside the scope".to_owned())
        })
        .unwrap();

    assert!(result.is_err());
    assert_eq!(provider.current_identity().unwrap().fqn(), ALICE);
}

#[test]
fn unwinding_reverts() {
    let adapter = directory();
    let provider = provider(&adapter);
    let bob = provider.logon_local_user("bob", &Secret::from(BOB_PASSWORD)).unwrap();

    let result = panic::catch_unwind(AssertUnwindSafe(|| {
        bob.run_as(|| panic!("boom")).unwrap();
    }));

    assert!(result.is_err());
    assert!(!is_impersonating());
    assert_eq!(provider.current_identity().unwrap().fqn(), ALICE);
    assert_eq!(adapter.outstanding_handles().impersonations, 0);
}

#[test]
fn nested_scope_is_rejected() {
    let adapter = directory();
    let provider = provider(&adapter);
    let bob = provider.logon_local_user("bob", &Secret::from(BOB_PASSWORD)).unwrap();
    let visitor = provider.logon_local_user("visitor", &Secret::from("visitor")).unwrap();

    let _guard = bob.impersonate().unwrap();
    let err = visitor.impersonate().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::ImpersonationActive);
    assert_eq!(provider.current_identity().unwrap().fqn(), BOB);
}

#[test]
fn spawned_threads_do_not_inherit_the_scope() {
    let adapter = directory();
    let provider = provider(&adapter);
    let bob = provider.logon_local_user("bob", &Secret::from(BOB_PASSWORD)).unwrap();

    bob.run_as(|| {
        thread::scope(|scope| {
            let plain = scope.spawn(|| provider.current_identity().unwrap().fqn().to_owned());
            assert_eq!(plain.join().unwrap(), ALICE);

            let forwarded = scope.spawn(|| {
                bob.run_as(|| provider.current_identity().unwrap().fqn().to_owned())
                    .unwrap()
            });
            assert_eq!(forwarded.join().unwrap(), BOB);
        });
    })
    .unwrap();
}
