pub mod common;

use std::sync::Arc;

use common::{directory, provider, provider_with, ALICE};
use winauth::adapter::memory::MemoryDomain;
use winauth::adapter::{IdentityAdapter, MemoryAdapter};
use winauth::identity::{DomainFlags, TrustAttributes};
use winauth::{AuthProvider, ErrorKind, JoinStatus, ProviderConfig, TrustDirection, TrustType};

#[test]
fn account_lookup_accepts_every_form() {
    let adapter = directory();
    let provider = provider(&adapter);

    let down_level = provider.lookup_account("contoso\\ALICE").unwrap();
    let upn = provider.lookup_account("alice@contoso.com").unwrap();
    let bare = provider.lookup_account("alice").unwrap();

    assert_eq!(down_level.fqn(), ALICE);
    assert_eq!(upn, down_level);
    assert_eq!(bare, down_level);
    assert!(down_level.sid_string().starts_with("S-1-5-21-1001-2001-3001-"));
}

#[test]
fn groups_resolve_to_well_known_sids() {
    let adapter = directory();
    let provider = provider(&adapter);

    let administrators = provider.lookup_account("BUILTIN\\Administrators").unwrap();
    let domain_admins = provider.lookup_account("CONTOSO\\Domain Admins").unwrap();

    assert_eq!(administrators.sid_string(), "S-1-5-32-544");
    assert_eq!(domain_admins.sid().rid(), Some(512));
}

#[test]
fn unresolved_account_is_lookup_error() {
    let adapter = directory();
    let provider = provider(&adapter);

    for name in ["nobody", "NOWHERE\\alice", "alice@nowhere.example", ""] {
        let err = provider.lookup_account(name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup, "{name:?}");
    }
}

#[test]
fn malformed_account_name_is_lookup_error() {
    let adapter = directory();
    let provider = provider(&adapter);

    for name in ["\\alice", "CONTOSO\\", "alice@", "a\\b\\c"] {
        let err = provider.lookup_account(name).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Lookup, "{name:?}");
        assert_eq!(err.native_code(), None, "{name:?}");
    }
}

#[test]
fn joined_computer() {
    let adapter = directory();
    let provider = provider(&adapter);

    let computer = provider.current_computer().unwrap();

    assert_eq!(computer.name, "WEB01");
    assert_eq!(computer.member_of, "contoso.com");
    assert_eq!(computer.join_status, JoinStatus::DomainJoined);
    assert!(computer.is_domain_joined());
    assert!(computer.groups.iter().any(|group| group == "Administrators"));
}

#[test]
fn standalone_computer_has_no_domains() {
    let adapter = Arc::new(MemoryAdapter::builder().computer_name("kiosk").build());
    let provider = provider_with(&adapter, ProviderConfig::default());

    let computer = provider.current_computer().unwrap();
    assert_eq!(computer.member_of, "");
    assert_eq!(computer.join_status, JoinStatus::NotJoined);

    let err = provider.domains().unwrap_err();
    assert_eq!(err.kind(), ErrorKind::NotJoined);
    assert!(err.is_not_joined());

    let err = provider.domain("contoso.com").unwrap_err();
    assert!(err.is_not_joined());
}

#[test]
fn standalone_administrator_resolves_to_computer_account() {
    let adapter = Arc::new(MemoryAdapter::builder().computer_name("kiosk").build());
    let provider = provider_with(&adapter, ProviderConfig::default());
    let computer = provider.current_computer().unwrap();

    let account = provider.lookup_account("Administrator").unwrap();

    let expected = format!("{}\\Administrator", computer.name);
    assert!(account.fqn().eq_ignore_ascii_case(&expected), "{}", account.fqn());
    assert_eq!(account.sid().rid(), Some(500));
}

#[test]
fn computer_membership_names_its_domain() {
    let adapter = directory();
    let provider = provider(&adapter);
    let computer = provider.current_computer().unwrap();

    let domain = provider.domain(&computer.member_of).unwrap();

    assert_eq!(domain.fqn(), computer.member_of);
    assert!(domain.is_primary());
    assert_eq!(domain.canonical_name().unwrap(), computer.member_of);
}

#[test]
fn unknown_join_status_is_not_a_skip_signal() {
    let adapter = Arc::new(
        MemoryAdapter::builder()
            .joined_domain(MemoryDomain::new("CONTOSO", "contoso.com"))
            .join_status(JoinStatus::Unknown)
            .build(),
    );
    let provider = provider_with(&adapter, ProviderConfig::default());

    let err = provider.domains().unwrap_err();

    assert_eq!(err.kind(), ErrorKind::Lookup);
    assert_eq!(provider.current_computer().unwrap().join_status, JoinStatus::Unknown);
}

#[test]
fn trusted_domains_are_enumerated() {
    let adapter = directory();
    let provider = provider(&adapter);

    let domains = provider.domains().unwrap();

    assert_eq!(domains.len(), 2);
    assert_eq!(domains[0].fqn(), "contoso.com");
    assert_eq!(domains[0].netbios_name(), "CONTOSO");
    assert!(domains[0].is_primary());
    assert!(domains[0].flags().contains(DomainFlags::IN_FOREST));
    assert_eq!(domains[0].trust_direction(), TrustDirection::Bidirectional);
    assert_eq!(domains[0].trust_type(), TrustType::Uplevel);
    assert_eq!(domains[1].dns_name(), Some("fabrikam.com"));
    assert!(!domains[1].is_primary());
}

#[test]
fn domain_is_found_by_any_name() {
    let adapter = directory();
    let provider = provider(&adapter);

    assert_eq!(provider.domain("CONTOSO.COM").unwrap().netbios_name(), "CONTOSO");
    assert_eq!(provider.domain("fabrikam").unwrap().fqn(), "fabrikam.com");
    assert_eq!(provider.domain("northwind").unwrap_err().kind(), ErrorKind::Lookup);
}

#[test]
fn domain_details_fail_independently() {
    let adapter = Arc::new(
        MemoryAdapter::builder()
            .joined_domain(MemoryDomain::new("CONTOSO", "contoso.com"))
            .trusted_domain(
                MemoryDomain::new("LEGACY", "legacy.local")
                    .with_trust(TrustDirection::Outbound, TrustType::Downlevel)
                    .with_attributes(TrustAttributes::NON_TRANSITIVE)
                    .with_canonical_name(None),
            )
            .trusted_domain(MemoryDomain::new("LOCKED", "locked.local").with_groups(None))
            .build(),
    );
    let provider = provider_with(&adapter, ProviderConfig::default());

    let legacy = provider.domain("legacy").unwrap();
    assert!(legacy.canonical_name().is_err());
    assert_eq!(legacy.groups().unwrap(), vec!["Domain Admins", "Domain Users"]);
    assert_eq!(legacy.trust_attributes(), TrustAttributes::NON_TRANSITIVE);
    assert_eq!(legacy.trust_direction(), TrustDirection::Outbound);

    let locked = provider.domain("locked.local").unwrap();
    assert_eq!(locked.canonical_name().unwrap(), "locked.local");
    assert_eq!(locked.groups().unwrap_err().kind(), ErrorKind::System);
}

#[test]
fn domain_details_are_cached() {
    let adapter = directory();
    let provider = provider(&adapter);
    let domain = provider.domain("contoso").unwrap();

    let first = domain.canonical_name().unwrap();
    let second = domain.canonical_name().unwrap();

    assert_eq!(first, "contoso.com");
    assert_eq!(first, second);
    assert_eq!(domain.groups().unwrap(), domain.groups().unwrap());
}

#[test]
fn current_identity_is_the_process_identity() {
    let adapter = directory();
    let provider = provider(&adapter);

    assert_eq!(provider.current_identity().unwrap().fqn(), ALICE);
}

#[test]
fn provider_works_over_a_shared_trait_object() {
    let adapter: Arc<dyn IdentityAdapter> = directory();
    let provider = AuthProvider::new(adapter, ProviderConfig::default());

    assert_eq!(provider.lookup_account("bob").unwrap().fqn(), "WEB01\\bob");
}
