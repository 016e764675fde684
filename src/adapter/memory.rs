//! An in-process directory behind the [`IdentityAdapter`] trait.
//!
//! Users, groups, a joined domain and its trusts are configured through [`MemoryAdapterBuilder`].
//! Handshakes follow a scripted text protocol instead of a real authentication protocol:
//!
//! ```text
//! client: NEGOTIATE <package>          (an empty first token is accepted too)
//! server: CHALLENGE <base64 nonce>
//! client: AUTHENTICATE <nonce> <DOMAIN\user>
//! server: ACCEPT                       (Negotiate only; NTLM and Kerberos finish without output)
//! ```
//!
//! Every handle the adapter hands out is tracked, so tests can check that nothing leaks and that
//! nothing is released twice.

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::thread::{self, ThreadId};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use rand::rngs::OsRng;
use rand::RngCore;

use super::{
    AccountRecord, ContextHandle, DomainTrust, IdentityAdapter, IdentityRecord, ImpersonationHandle, LogonProvider,
    LogonType, NativeError, NativeResult, NegotiationStep, TokenHandle,
};
use crate::error::NativeStatus;
use crate::identity::{Computer, DomainFlags, JoinStatus, TrustAttributes, TrustDirection, TrustType};
use crate::package::PackageList;
use crate::sid::Sid;
use crate::username::{UserNameFormat, Username};
use crate::{Secret, SecurityPackage};

const NEGOTIATE: &str = "NEGOTIATE";
const CHALLENGE: &str = "CHALLENGE";
const AUTHENTICATE: &str = "AUTHENTICATE";
const ACCEPT: &str = "ACCEPT";

const BUILTIN: &str = "BUILTIN";
const NONCE_LEN: usize = 16;

const RID_ADMINISTRATOR: u32 = 500;
const RID_GUEST: u32 = 501;
const RID_DOMAIN_ADMINS: u32 = 512;
const RID_DOMAIN_USERS: u32 = 513;
const RID_FIRST_USER: u32 = 1000;
const RID_FIRST_GROUP: u32 = 1100;

const BUILTIN_ADMINISTRATORS: u32 = 544;
const BUILTIN_USERS: u32 = 545;
const BUILTIN_GUESTS: u32 = 546;

/// Builds the client's first token.
pub fn negotiate_token(package: SecurityPackage) -> Vec<u8> {
    format!("{NEGOTIATE} {}", package.name()).into_bytes()
}

/// Builds the client's answer to `challenge` on behalf of `fqn`.
///
/// Returns `None` when `challenge` is not a server challenge.
pub fn authenticate_token(challenge: &[u8], fqn: &str) -> Option<Vec<u8>> {
    let nonce = std::str::from_utf8(challenge).ok()?.strip_prefix(CHALLENGE)?.strip_prefix(' ')?;

    Some(format!("{AUTHENTICATE} {nonce} {fqn}").into_bytes())
}

/// A domain known to the adapter: the joined domain or a trusted one.
#[derive(Debug, Clone)]
pub struct MemoryDomain {
    pub netbios_name: String,
    pub dns_name: Option<String>,
    pub trust_direction: TrustDirection,
    pub trust_type: TrustType,
    pub trust_attributes: TrustAttributes,
    pub flags: DomainFlags,
    /// `None` makes the canonical name lookup fail.
    pub canonical_name: Option<String>,
    /// `None` makes the group enumeration fail.
    pub groups: Option<Vec<String>>,
}

impl MemoryDomain {
    pub fn new(netbios_name: &str, dns_name: &str) -> Self {
        Self {
            netbios_name: netbios_name.to_owned(),
            dns_name: Some(dns_name.to_owned()),
            trust_direction: TrustDirection::Bidirectional,
            trust_type: TrustType::Uplevel,
            trust_attributes: TrustAttributes::empty(),
            flags: DomainFlags::IN_FOREST | DomainFlags::DIRECT_INBOUND | DomainFlags::DIRECT_OUTBOUND,
            canonical_name: Some(dns_name.to_owned()),
            groups: Some(vec!["Domain Admins".to_owned(), "Domain Users".to_owned()]),
        }
    }

    pub fn with_trust(mut self, direction: TrustDirection, trust_type: TrustType) -> Self {
        self.trust_direction = direction;
        self.trust_type = trust_type;
        self
    }

    pub fn with_attributes(mut self, attributes: TrustAttributes) -> Self {
        self.trust_attributes = attributes;
        self
    }

    pub fn with_canonical_name(mut self, canonical_name: Option<&str>) -> Self {
        self.canonical_name = canonical_name.map(str::to_owned);
        self
    }

    pub fn with_groups(mut self, groups: Option<&[&str]>) -> Self {
        self.groups = groups.map(|groups| groups.iter().map(|group| (*group).to_owned()).collect());
        self
    }

    fn matches(&self, name: &str) -> bool {
        self.netbios_name.eq_ignore_ascii_case(name)
            || self.dns_name.as_deref().is_some_and(|dns| dns.eq_ignore_ascii_case(name))
    }

    fn trust(&self) -> DomainTrust {
        DomainTrust {
            netbios_name: self.netbios_name.clone(),
            dns_name: self.dns_name.clone(),
            trust_direction: self.trust_direction,
            trust_type: self.trust_type,
            trust_attributes: self.trust_attributes,
            flags: self.flags,
        }
    }
}

#[derive(Debug, Clone)]
enum UserScope {
    Local,
    Domain,
}

#[derive(Debug, Clone)]
struct PendingUser {
    name: String,
    password: String,
    scope: UserScope,
    groups: Vec<String>,
}

/// Configures a [`MemoryAdapter`].
#[derive(Debug, Clone)]
pub struct MemoryAdapterBuilder {
    computer_name: String,
    domain: Option<MemoryDomain>,
    trusts: Vec<MemoryDomain>,
    join_status: Option<JoinStatus>,
    users: Vec<PendingUser>,
    process_user: Option<String>,
    packages: PackageList,
}

impl MemoryAdapterBuilder {
    pub fn computer_name(mut self, name: &str) -> Self {
        self.computer_name = name.to_owned();
        self
    }

    /// Joins the computer to `domain`. It becomes the primary entry of the trust enumeration.
    pub fn joined_domain(mut self, domain: MemoryDomain) -> Self {
        self.domain = Some(domain);
        self
    }

    pub fn trusted_domain(mut self, domain: MemoryDomain) -> Self {
        self.trusts.push(domain);
        self
    }

    /// Overrides the reported join status, e.g. to simulate [`JoinStatus::Unknown`].
    pub fn join_status(mut self, status: JoinStatus) -> Self {
        self.join_status = Some(status);
        self
    }

    pub fn local_user(mut self, name: &str, password: &str) -> Self {
        self.users.push(PendingUser {
            name: name.to_owned(),
            password: password.to_owned(),
            scope: UserScope::Local,
            groups: Vec::new(),
        });
        self
    }

    /// Adds a user to the joined domain. Without a joined domain the user is local.
    pub fn domain_user(mut self, name: &str, password: &str) -> Self {
        self.users.push(PendingUser {
            name: name.to_owned(),
            password: password.to_owned(),
            scope: UserScope::Domain,
            groups: Vec::new(),
        });
        self
    }

    /// Adds the most recently added user to `group`, a `DOMAIN\group` name.
    pub fn member_of(mut self, group: &str) -> Self {
        if let Some(user) = self.users.last_mut() {
            user.groups.push(group.to_owned());
        }
        self
    }

    /// The identity the process runs as, in any username form. Defaults to the local Administrator.
    pub fn process_user(mut self, name: &str) -> Self {
        self.process_user = Some(name.to_owned());
        self
    }

    /// Restricts the packages the adapter negotiates. Others fail with `SEC_E_SECPKG_NOT_FOUND`.
    pub fn packages(mut self, packages: PackageList) -> Self {
        self.packages = packages;
        self
    }

    pub fn build(self) -> MemoryAdapter {
        let local_sid = |rid: u32| domain_sid(0, rid);
        let computer = self.computer_name.to_ascii_uppercase();

        let mut users = vec![
            MemoryUser {
                sid: local_sid(RID_ADMINISTRATOR),
                domain: computer.clone(),
                name: "Administrator".to_owned(),
                password: None,
                groups: vec![builtin_group("Administrators"), builtin_group("Users")],
            },
            MemoryUser {
                sid: local_sid(RID_GUEST),
                domain: computer.clone(),
                name: "Guest".to_owned(),
                password: None,
                groups: vec![builtin_group("Guests")],
            },
        ];

        let mut groups = vec![
            MemoryGroup::new(builtin_sid(BUILTIN_ADMINISTRATORS), BUILTIN, "Administrators"),
            MemoryGroup::new(builtin_sid(BUILTIN_USERS), BUILTIN, "Users"),
            MemoryGroup::new(builtin_sid(BUILTIN_GUESTS), BUILTIN, "Guests"),
        ];
        if let Some(domain) = &self.domain {
            for (offset, name) in domain.groups.iter().flatten().enumerate() {
                let rid = match name.as_str() {
                    "Domain Admins" => RID_DOMAIN_ADMINS,
                    "Domain Users" => RID_DOMAIN_USERS,
                    _ => RID_FIRST_GROUP + offset as u32,
                };
                groups.push(MemoryGroup::new(domain_sid(1, rid), &domain.netbios_name, name));
            }
        }

        for (offset, pending) in self.users.into_iter().enumerate() {
            let rid = RID_FIRST_USER + offset as u32;
            let (sid, domain, mut member_of) = match (&pending.scope, &self.domain) {
                (UserScope::Domain, Some(domain)) => (
                    domain_sid(1, rid),
                    domain.netbios_name.clone(),
                    vec![format!("{}\\Domain Users", domain.netbios_name), builtin_group("Users")],
                ),
                _ => (local_sid(rid), computer.clone(), vec![builtin_group("Users")]),
            };
            member_of.extend(pending.groups);

            users.push(MemoryUser {
                sid,
                domain,
                name: pending.name,
                password: Some(pending.password),
                groups: member_of,
            });
        }

        let join_status = self.join_status.unwrap_or(if self.domain.is_some() {
            JoinStatus::DomainJoined
        } else {
            JoinStatus::NotJoined
        });

        let directory = Directory {
            computer,
            domain: self.domain,
            trusts: self.trusts,
            join_status,
            users,
            groups,
        };
        let process_user = self
            .process_user
            .and_then(|name| directory.find_user(&name))
            .unwrap_or(0);

        MemoryAdapter {
            directory,
            packages: self.packages,
            process_user,
            state: Mutex::new(State::default()),
        }
    }
}

fn domain_sid(domain_index: u32, rid: u32) -> Sid {
    Sid::new(
        1,
        5,
        &[21, 1000 + domain_index, 2000 + domain_index, 3000 + domain_index, rid],
    )
    .unwrap_or_else(|_| unreachable!("five sub-authorities always fit"))
}

fn builtin_sid(rid: u32) -> Sid {
    Sid::new(1, 5, &[32, rid]).unwrap_or_else(|_| unreachable!("two sub-authorities always fit"))
}

fn builtin_group(name: &str) -> String {
    format!("{BUILTIN}\\{name}")
}

#[derive(Debug)]
struct MemoryUser {
    sid: Sid,
    domain: String,
    name: String,
    /// Built-in accounts have no password and can not log on.
    password: Option<String>,
    groups: Vec<String>,
}

impl MemoryUser {
    fn fqn(&self) -> String {
        format!("{}\\{}", self.domain, self.name)
    }

    fn record(&self) -> IdentityRecord {
        IdentityRecord {
            sid: self.sid.to_bytes(),
            fqn: self.fqn(),
            groups: self.groups.clone(),
        }
    }
}

#[derive(Debug)]
struct MemoryGroup {
    sid: Sid,
    domain: String,
    name: String,
}

impl MemoryGroup {
    fn new(sid: Sid, domain: &str, name: &str) -> Self {
        Self {
            sid,
            domain: domain.to_owned(),
            name: name.to_owned(),
        }
    }
}

#[derive(Debug)]
struct Directory {
    computer: String,
    domain: Option<MemoryDomain>,
    trusts: Vec<MemoryDomain>,
    join_status: JoinStatus,
    users: Vec<MemoryUser>,
    groups: Vec<MemoryGroup>,
}

impl Directory {
    /// Maps a NetBIOS or DNS domain name to the NetBIOS name accounts are stored under.
    fn authority(&self, name: &str) -> Option<&str> {
        if name.eq_ignore_ascii_case(&self.computer) || name == "." {
            return Some(&self.computer);
        }
        if name.eq_ignore_ascii_case(BUILTIN) {
            return Some(BUILTIN);
        }

        self.domain
            .as_ref()
            .filter(|domain| domain.matches(name))
            .map(|domain| domain.netbios_name.as_str())
    }

    fn known_domain(&self, name: &str) -> Option<&MemoryDomain> {
        self.domain
            .iter()
            .chain(self.trusts.iter())
            .find(|domain| domain.matches(name))
    }

    /// Finds a user by any username form. Bare names are searched locally first.
    fn find_user(&self, name: &str) -> Option<usize> {
        let username = Username::parse(name).ok()?;
        self.find_user_in(username.account_name(), username.domain_name())
    }

    fn find_user_in(&self, account_name: &str, domain: Option<&str>) -> Option<usize> {
        let candidates: Vec<&str> = match domain {
            Some(domain) => vec![self.authority(domain)?],
            None => std::iter::once(self.computer.as_str())
                .chain(self.domain.as_ref().map(|domain| domain.netbios_name.as_str()))
                .collect(),
        };

        candidates.into_iter().find_map(|authority| {
            self.users.iter().position(|user| {
                user.domain.eq_ignore_ascii_case(authority) && user.name.eq_ignore_ascii_case(account_name)
            })
        })
    }

    fn find_group(&self, account_name: &str, domain: Option<&str>) -> Option<&MemoryGroup> {
        let authority = match domain {
            Some(domain) => Some(self.authority(domain)?),
            None => None,
        };

        self.groups.iter().find(|group| {
            group.name.eq_ignore_ascii_case(account_name)
                && authority.map_or(true, |authority| group.domain.eq_ignore_ascii_case(authority))
        })
    }
}

#[derive(Debug, Clone)]
enum ContextStage {
    /// Server context waiting for the client's answer.
    Challenged { nonce: String },
    /// Server context that authenticated a user.
    Established { user: usize },
    /// Client context waiting for the server challenge.
    Negotiating,
    /// Client context waiting for the server's final token.
    Authenticating,
    ClientDone,
}

#[derive(Debug)]
struct MemoryContext {
    package: SecurityPackage,
    stage: ContextStage,
}

#[derive(Debug, Default)]
struct State {
    next_index: u64,
    tokens: HashMap<u64, usize>,
    contexts: HashMap<u64, MemoryContext>,
    impersonations: HashMap<u64, ThreadId>,
    /// Per thread stack of impersonated users.
    threads: HashMap<ThreadId, Vec<usize>>,
    invalid_releases: usize,
}

impl State {
    fn next_index(&mut self) -> u64 {
        self.next_index += 1;
        self.next_index
    }
}

/// Native handle counts at one point in time.
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct HandleCounts {
    pub tokens: usize,
    pub contexts: usize,
    pub impersonations: usize,
}

impl HandleCounts {
    pub fn is_empty(&self) -> bool {
        *self == Self::default()
    }
}

#[derive(Debug)]
pub struct MemoryAdapter {
    directory: Directory,
    packages: PackageList,
    process_user: usize,
    state: Mutex<State>,
}

impl MemoryAdapter {
    pub fn builder() -> MemoryAdapterBuilder {
        MemoryAdapterBuilder {
            computer_name: "WORKSTATION".to_owned(),
            domain: None,
            trusts: Vec::new(),
            join_status: None,
            users: Vec::new(),
            process_user: None,
            packages: PackageList::default(),
        }
    }

    /// Handles handed out and not yet released.
    pub fn outstanding_handles(&self) -> HandleCounts {
        let state = self.state();

        HandleCounts {
            tokens: state.tokens.len(),
            contexts: state.contexts.len(),
            impersonations: state.impersonations.len(),
        }
    }

    /// Number of release calls for handles that were unknown or already released.
    pub fn invalid_releases(&self) -> usize {
        self.state().invalid_releases
    }

    fn state(&self) -> MutexGuard<'_, State> {
        // The state is left consistent at every unlock, so a poisoned lock is still usable.
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn check_package(&self, package: SecurityPackage) -> NativeResult<()> {
        if self.packages.contains(package) {
            Ok(())
        } else {
            Err(NativeStatus::SecurityPackageNotFound.into())
        }
    }

    fn current_user(&self) -> usize {
        self.state()
            .threads
            .get(&thread::current().id())
            .and_then(|stack| stack.last().copied())
            .unwrap_or(self.process_user)
    }

    fn issue_token(&self, user: usize) -> TokenHandle {
        let mut state = self.state();
        let index = state.next_index();
        state.tokens.insert(index, user);

        TokenHandle::new(index)
    }

    fn accept_first(&self, input: &[u8], package: SecurityPackage) -> NativeResult<NegotiationStep> {
        if !input.is_empty() {
            let requested = std::str::from_utf8(input)
                .ok()
                .and_then(|input| input.strip_prefix(NEGOTIATE))
                .and_then(|input| input.strip_prefix(' '))
                .ok_or_else(|| NativeError::with_message(NativeStatus::InvalidToken.code(), "expected a negotiate token"))?;
            if requested.parse::<SecurityPackage>().is_err() {
                return Err(NativeStatus::BadPackageId.into());
            }
        }

        let mut nonce = [0; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce);
        let nonce = STANDARD.encode(nonce);
        let output = format!("{CHALLENGE} {nonce}").into_bytes();

        let mut state = self.state();
        let index = state.next_index();
        state.contexts.insert(
            index,
            MemoryContext {
                package,
                stage: ContextStage::Challenged { nonce },
            },
        );

        Ok(NegotiationStep {
            context: ContextHandle::new(index),
            output: Some(output),
            continue_needed: true,
        })
    }

    fn accept_answer(&self, expected_nonce: &str, input: &[u8]) -> NativeResult<usize> {
        let invalid = || NativeError::with_message(NativeStatus::InvalidToken.code(), "expected an authenticate token");

        let answer = std::str::from_utf8(input)
            .ok()
            .and_then(|input| input.strip_prefix(AUTHENTICATE))
            .and_then(|input| input.strip_prefix(' '))
            .ok_or_else(invalid)?;
        let (nonce, fqn) = answer.split_once(' ').ok_or_else(invalid)?;

        if nonce != expected_nonce {
            return Err(NativeStatus::MessageAltered.into());
        }

        self.directory
            .find_user(fqn)
            .ok_or_else(|| NativeStatus::LogonDenied.into())
    }
}

impl IdentityAdapter for MemoryAdapter {
    fn logon(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &Secret<String>,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> NativeResult<TokenHandle> {
        trace!(username, ?domain, ?logon_type, ?logon_provider, "Memory logon");

        let user = self
            .directory
            .find_user_in(username, Some(domain.unwrap_or(self.directory.computer.as_str())))
            .filter(|user| {
                self.directory.users[*user]
                    .password
                    .as_deref()
                    .is_some_and(|expected| expected == password.as_ref())
            })
            .ok_or_else(|| NativeError::from(NativeStatus::LogonFailure))?;

        Ok(self.issue_token(user))
    }

    fn continue_negotiation(
        &self,
        context: Option<ContextHandle>,
        input: &[u8],
        package: SecurityPackage,
    ) -> NativeResult<NegotiationStep> {
        self.check_package(package)?;

        let Some(context) = context else {
            return self.accept_first(input, package);
        };

        let stage = self
            .state()
            .contexts
            .get(&context.index())
            .map(|context| context.stage.clone())
            .ok_or_else(|| NativeError::from(NativeStatus::InvalidHandle))?;

        let ContextStage::Challenged { nonce } = stage else {
            return Err(NativeStatus::OutOfSequence.into());
        };

        let user = self.accept_answer(&nonce, input)?;

        let mut state = self.state();
        let entry = state
            .contexts
            .get_mut(&context.index())
            .ok_or_else(|| NativeError::from(NativeStatus::InvalidHandle))?;
        entry.stage = ContextStage::Established { user };

        let output = (entry.package == SecurityPackage::Negotiate).then(|| ACCEPT.as_bytes().to_vec());

        Ok(NegotiationStep {
            context,
            output,
            continue_needed: false,
        })
    }

    fn initialize_negotiation(
        &self,
        context: Option<ContextHandle>,
        input: &[u8],
        package: SecurityPackage,
        target_name: Option<&str>,
    ) -> NativeResult<NegotiationStep> {
        self.check_package(package)?;

        let Some(context) = context else {
            trace!(?target_name, %package, "Memory client negotiation started");

            let mut state = self.state();
            let index = state.next_index();
            state.contexts.insert(
                index,
                MemoryContext {
                    package,
                    stage: ContextStage::Negotiating,
                },
            );

            return Ok(NegotiationStep {
                context: ContextHandle::new(index),
                output: Some(negotiate_token(package)),
                continue_needed: true,
            });
        };

        let fqn = self.directory.users[self.current_user()].fqn();

        let mut state = self.state();
        let entry = state
            .contexts
            .get_mut(&context.index())
            .ok_or_else(|| NativeError::from(NativeStatus::InvalidHandle))?;

        match entry.stage {
            ContextStage::Negotiating => {
                let output = authenticate_token(input, &fqn)
                    .ok_or_else(|| NativeError::with_message(NativeStatus::InvalidToken.code(), "expected a challenge"))?;
                let continue_needed = entry.package == SecurityPackage::Negotiate;
                entry.stage = if continue_needed {
                    ContextStage::Authenticating
                } else {
                    ContextStage::ClientDone
                };

                Ok(NegotiationStep {
                    context,
                    output: Some(output),
                    continue_needed,
                })
            }
            ContextStage::Authenticating if input == ACCEPT.as_bytes() => {
                entry.stage = ContextStage::ClientDone;

                Ok(NegotiationStep {
                    context,
                    output: None,
                    continue_needed: false,
                })
            }
            ContextStage::Authenticating => Err(NativeStatus::InvalidToken.into()),
            _ => Err(NativeStatus::OutOfSequence.into()),
        }
    }

    fn context_token(&self, context: ContextHandle) -> NativeResult<TokenHandle> {
        let user = match self.state().contexts.get(&context.index()) {
            Some(MemoryContext {
                stage: ContextStage::Established { user },
                ..
            }) => *user,
            _ => return Err(NativeStatus::InvalidHandle.into()),
        };

        Ok(self.issue_token(user))
    }

    fn resolve_identity(&self, token: TokenHandle) -> NativeResult<IdentityRecord> {
        let user = self
            .state()
            .tokens
            .get(&token.index())
            .copied()
            .ok_or_else(|| NativeError::from(NativeStatus::InvalidHandle))?;

        Ok(self.directory.users[user].record())
    }

    fn resolve_account(&self, name: &str) -> NativeResult<AccountRecord> {
        let none_mapped = || NativeError::from(NativeStatus::NoneMapped);
        let username = Username::parse(name).map_err(|_| none_mapped())?;

        if let Some(user) = self.directory.find_user_in(username.account_name(), username.domain_name()) {
            let user = &self.directory.users[user];
            return Ok(AccountRecord {
                sid: user.sid.to_bytes(),
                fqn: user.fqn(),
            });
        }

        // Group names are never written in UPN form.
        if username.format() != UserNameFormat::UserPrincipalName {
            if let Some(group) = self.directory.find_group(username.account_name(), username.domain_name()) {
                return Ok(AccountRecord {
                    sid: group.sid.to_bytes(),
                    fqn: format!("{}\\{}", group.domain, group.name),
                });
            }
        }

        Err(none_mapped())
    }

    fn effective_identity(&self) -> NativeResult<IdentityRecord> {
        Ok(self.directory.users[self.current_user()].record())
    }

    fn query_computer(&self) -> NativeResult<Computer> {
        let member_of = match (self.directory.join_status, &self.directory.domain) {
            (JoinStatus::DomainJoined, Some(domain)) => domain.trust().fqn().to_owned(),
            _ => String::new(),
        };

        Ok(Computer {
            name: self.directory.computer.clone(),
            member_of,
            join_status: self.directory.join_status,
            groups: self
                .directory
                .groups
                .iter()
                .filter(|group| group.domain == BUILTIN)
                .map(|group| group.name.clone())
                .collect(),
        })
    }

    fn query_domains(&self) -> NativeResult<Vec<DomainTrust>> {
        let domain = match (self.directory.join_status, &self.directory.domain) {
            (JoinStatus::DomainJoined, Some(domain)) => domain,
            (JoinStatus::Unknown, _) => return Err(NativeStatus::DcNotFound.into()),
            _ => return Err(NativeStatus::SetupNotJoined.into()),
        };

        let mut primary = domain.trust();
        primary.flags |= DomainFlags::PRIMARY;

        Ok(std::iter::once(primary)
            .chain(self.directory.trusts.iter().map(MemoryDomain::trust))
            .collect())
    }

    fn query_domain_canonical_name(&self, fqn: &str) -> NativeResult<String> {
        self.directory
            .known_domain(fqn)
            .ok_or_else(|| NativeError::from(NativeStatus::NoSuchDomain))?
            .canonical_name
            .clone()
            .ok_or_else(|| NativeError::with_message(NativeStatus::DcNotFound.code(), "canonical name unavailable"))
    }

    fn query_domain_groups(&self, fqn: &str) -> NativeResult<Vec<String>> {
        self.directory
            .known_domain(fqn)
            .ok_or_else(|| NativeError::from(NativeStatus::NoSuchDomain))?
            .groups
            .clone()
            .ok_or_else(|| NativeError::from(NativeStatus::AccessDenied))
    }

    fn impersonate_thread(&self, token: TokenHandle) -> NativeResult<ImpersonationHandle> {
        let mut state = self.state();
        let user = state
            .tokens
            .get(&token.index())
            .copied()
            .ok_or_else(|| NativeError::from(NativeStatus::InvalidHandle))?;

        let thread = thread::current().id();
        let index = state.next_index();
        state.impersonations.insert(index, thread);
        state.threads.entry(thread).or_default().push(user);

        Ok(ImpersonationHandle::new(index))
    }

    fn revert_thread(&self, handle: ImpersonationHandle) {
        let mut state = self.state();
        let Some(thread) = state.impersonations.remove(&handle.index()) else {
            state.invalid_releases += 1;
            return;
        };

        let emptied = state.threads.get_mut(&thread).is_some_and(|stack| {
            stack.pop();
            stack.is_empty()
        });
        if emptied {
            state.threads.remove(&thread);
        }
    }

    fn release_context(&self, context: ContextHandle) {
        let mut state = self.state();
        if state.contexts.remove(&context.index()).is_none() {
            state.invalid_releases += 1;
        }
    }

    fn release_token(&self, token: TokenHandle) {
        let mut state = self.state();
        if state.tokens.remove(&token.index()).is_none() {
            state.invalid_releases += 1;
        }
    }
}
