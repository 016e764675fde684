use std::fmt;
use std::sync::{Arc, OnceLock};

use bitflags::bitflags;
use num_derive::{FromPrimitive, ToPrimitive};
use serde::Serialize;

use crate::adapter::{DomainTrust, IdentityAdapter, OwnedToken, TokenHandle};
use crate::impersonation::ImpersonationGuard;
use crate::sid::Sid;
use crate::username::fqn_eq;
use crate::Result;

const DOMAIN_USER_RID_GUEST: u32 = 501;
const BUILTIN_GUESTS: &str = "BUILTIN\\Guests";

/// The result of resolving an account name. Carries no credential or session state.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Account {
    sid: Sid,
    fqn: String,
}

impl Account {
    pub fn new(sid: Sid, fqn: String) -> Self {
        Self { sid, fqn }
    }

    pub fn sid(&self) -> &Sid {
        &self.sid
    }

    pub fn sid_string(&self) -> String {
        self.sid.to_string()
    }

    /// Canonical `DOMAIN\user` name.
    pub fn fqn(&self) -> &str {
        &self.fqn
    }
}

/// An authenticated identity backed by a native logon token.
///
/// Produced by a successful logon or a completed handshake. Clones share the token; it is
/// released when the last clone is dropped.
#[derive(Clone)]
pub struct Identity {
    inner: Arc<IdentityInner>,
}

struct IdentityInner {
    sid: Sid,
    fqn: String,
    groups: Vec<String>,
    token: OwnedToken,
}

impl Identity {
    /// Takes ownership of `handle` and resolves the identity it carries.
    pub(crate) fn from_token(adapter: &Arc<dyn IdentityAdapter>, handle: TokenHandle) -> Result<Self> {
        let token = OwnedToken::new(Arc::clone(adapter), handle);
        let record = adapter.resolve_identity(handle)?;
        let sid = Sid::from_bytes(&record.sid)?;

        let mut groups: Vec<String> = Vec::with_capacity(record.groups.len());
        for group in record.groups {
            if !groups.iter().any(|known| fqn_eq(known, &group)) {
                groups.push(group);
            }
        }

        Ok(Self {
            inner: Arc::new(IdentityInner {
                sid,
                fqn: record.fqn,
                groups,
                token,
            }),
        })
    }

    pub fn sid(&self) -> &Sid {
        &self.inner.sid
    }

    pub fn sid_string(&self) -> String {
        self.inner.sid.to_string()
    }

    /// Canonical `DOMAIN\user` name.
    pub fn fqn(&self) -> &str {
        &self.inner.fqn
    }

    pub fn groups(&self) -> &[String] {
        &self.inner.groups
    }

    /// Case-insensitive group membership check. A name without a domain part matches any
    /// group with that account name.
    pub fn is_member_of(&self, group: &str) -> bool {
        self.inner.groups.iter().any(|known| {
            if group.contains('\\') {
                fqn_eq(known, group)
            } else {
                let name = known.rsplit_once('\\').map(|(_, name)| name).unwrap_or(known);
                name.eq_ignore_ascii_case(group)
            }
        })
    }

    pub fn is_guest(&self) -> bool {
        self.inner.sid.rid() == Some(DOMAIN_USER_RID_GUEST) || self.is_member_of(BUILTIN_GUESTS)
    }

    /// Makes this identity the calling thread's effective identity until the guard is dropped.
    ///
    /// Fails with [`ErrorKind::ImpersonationActive`](crate::ErrorKind::ImpersonationActive) when
    /// the thread is already impersonating.
    pub fn impersonate(&self) -> Result<ImpersonationGuard<'_>> {
        ImpersonationGuard::acquire(self)
    }

    /// Runs `f` while impersonating this identity, reverting on every exit path.
    pub fn run_as<T>(&self, f: impl FnOnce() -> T) -> Result<T> {
        let _guard = self.impersonate()?;

        Ok(f())
    }

    pub(crate) fn token(&self) -> &OwnedToken {
        &self.inner.token
    }
}

impl fmt::Debug for Identity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Identity")
            .field("sid", &self.inner.sid)
            .field("fqn", &self.inner.fqn)
            .field("groups", &self.inner.groups)
            .finish_non_exhaustive()
    }
}

/// Domain membership of the local computer.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Serialize)]
pub enum JoinStatus {
    NotJoined,
    DomainJoined,
    Unknown,
}

/// A snapshot of the local computer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Computer {
    pub name: String,
    /// Name of the domain the computer belongs to; empty when not joined.
    pub member_of: String,
    pub join_status: JoinStatus,
    pub groups: Vec<String>,
}

impl Computer {
    pub fn is_domain_joined(&self) -> bool {
        self.join_status == JoinStatus::DomainJoined
    }
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize)]
pub enum TrustDirection {
    Disabled = 0,
    Inbound = 1,
    Outbound = 2,
    Bidirectional = 3,
}

impl TrustDirection {
    /// Derives the direction from the `DIRECT_INBOUND`/`DIRECT_OUTBOUND` domain flags.
    pub fn from_flags(flags: DomainFlags) -> Self {
        match (
            flags.contains(DomainFlags::DIRECT_INBOUND),
            flags.contains(DomainFlags::DIRECT_OUTBOUND),
        ) {
            (true, true) => TrustDirection::Bidirectional,
            (true, false) => TrustDirection::Inbound,
            (false, true) => TrustDirection::Outbound,
            (false, false) => TrustDirection::Disabled,
        }
    }
}

#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive, Serialize)]
pub enum TrustType {
    Downlevel = 1,
    Uplevel = 2,
    Mit = 3,
    Dce = 4,
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct TrustAttributes: u32 {
        const NON_TRANSITIVE = 0x1;
        const UPLEVEL_ONLY = 0x2;
        const QUARANTINED_DOMAIN = 0x4;
        const FOREST_TRANSITIVE = 0x8;
        const CROSS_ORGANIZATION = 0x10;
        const WITHIN_FOREST = 0x20;
        const TREAT_AS_EXTERNAL = 0x40;
        const USES_RC4_ENCRYPTION = 0x80;
    }
}

bitflags! {
    #[derive(Debug, Copy, Clone, PartialEq, Eq)]
    pub struct DomainFlags: u32 {
        const IN_FOREST = 0x1;
        const DIRECT_OUTBOUND = 0x2;
        const TREE_ROOT = 0x4;
        const PRIMARY = 0x8;
        const NATIVE_MODE = 0x10;
        const DIRECT_INBOUND = 0x20;
    }
}

/// A trusted domain.
///
/// The canonical name and the group list are looked up on first access and cached on success.
/// Each lookup fails on its own: an error from one leaves the other usable.
pub struct Domain {
    trust: DomainTrust,
    adapter: Arc<dyn IdentityAdapter>,
    canonical_name: OnceLock<String>,
    groups: OnceLock<Vec<String>>,
}

impl Domain {
    pub(crate) fn new(adapter: Arc<dyn IdentityAdapter>, trust: DomainTrust) -> Self {
        Self {
            trust,
            adapter,
            canonical_name: OnceLock::new(),
            groups: OnceLock::new(),
        }
    }

    pub fn fqn(&self) -> &str {
        self.trust.fqn()
    }

    pub fn netbios_name(&self) -> &str {
        &self.trust.netbios_name
    }

    pub fn dns_name(&self) -> Option<&str> {
        self.trust.dns_name.as_deref()
    }

    pub fn trust_direction(&self) -> TrustDirection {
        self.trust.trust_direction
    }

    pub fn trust_type(&self) -> TrustType {
        self.trust.trust_type
    }

    pub fn trust_attributes(&self) -> TrustAttributes {
        self.trust.trust_attributes
    }

    pub fn flags(&self) -> DomainFlags {
        self.trust.flags
    }

    /// `true` for the domain the computer is a member of.
    pub fn is_primary(&self) -> bool {
        self.trust.flags.contains(DomainFlags::PRIMARY)
    }

    /// Whether `name` is this domain's FQN, NetBIOS name or DNS name, ignoring case.
    pub fn matches(&self, name: &str) -> bool {
        self.fqn().eq_ignore_ascii_case(name)
            || self.trust.netbios_name.eq_ignore_ascii_case(name)
            || self.dns_name().is_some_and(|dns| dns.eq_ignore_ascii_case(name))
    }

    pub fn canonical_name(&self) -> Result<String> {
        if let Some(name) = self.canonical_name.get() {
            return Ok(name.clone());
        }

        let name = self.adapter.query_domain_canonical_name(self.fqn()).map_err(|err| {
            debug!(domain = %self.fqn(), %err, "Domain canonical name lookup failed");
            err
        })?;

        Ok(self.canonical_name.get_or_init(|| name).clone())
    }

    pub fn groups(&self) -> Result<Vec<String>> {
        if let Some(groups) = self.groups.get() {
            return Ok(groups.clone());
        }

        let groups = self.adapter.query_domain_groups(self.fqn()).map_err(|err| {
            debug!(domain = %self.fqn(), %err, "Domain group enumeration failed");
            err
        })?;

        Ok(self.groups.get_or_init(|| groups).clone())
    }
}

impl fmt::Debug for Domain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Domain")
            .field("fqn", &self.fqn())
            .field("netbios_name", &self.trust.netbios_name)
            .field("trust_direction", &self.trust.trust_direction)
            .field("trust_type", &self.trust.trust_type)
            .finish_non_exhaustive()
    }
}
