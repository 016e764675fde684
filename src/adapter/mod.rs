//! The boundary to the operating system's identity facilities.
//!
//! Everything the crate needs from the platform goes through [`IdentityAdapter`]. Native objects
//! (logon tokens, security contexts, thread impersonations) stay inside the adapter; the rest of
//! the crate only sees opaque arena indices and releases them through guard types with a single
//! release point.

pub mod memory;
#[cfg(windows)]
pub mod windows;

use std::fmt;
use std::sync::Arc;

use num_derive::{FromPrimitive, ToPrimitive};
use serde::Deserialize;

use crate::error::NativeStatus;
use crate::identity::{Computer, DomainFlags, TrustAttributes, TrustDirection, TrustType};
use crate::{SecurityPackage, Secret};

pub use self::memory::MemoryAdapter;
#[cfg(windows)]
pub use self::windows::WindowsAdapter;

macro_rules! opaque_handle {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
        pub struct $name(u64);

        impl $name {
            pub fn new(index: u64) -> Self {
                Self(index)
            }

            pub fn index(self) -> u64 {
                self.0
            }
        }
    };
}

opaque_handle!(
    /// Refers to a logon token held by the adapter.
    TokenHandle
);
opaque_handle!(
    /// Refers to a security context held by the adapter.
    ContextHandle
);
opaque_handle!(
    /// Refers to an active thread impersonation.
    ImpersonationHandle
);

/// Logon types accepted by the native logon primitive.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, FromPrimitive, ToPrimitive, Deserialize)]
pub enum LogonType {
    Interactive = 2,
    #[default]
    Network = 3,
    Batch = 4,
    Service = 5,
    Unlock = 7,
    NetworkCleartext = 8,
    NewCredentials = 9,
}

/// Logon providers accepted by the native logon primitive.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, Default, FromPrimitive, ToPrimitive, Deserialize)]
pub enum LogonProvider {
    #[default]
    Default = 0,
    WinNt35 = 1,
    WinNt40 = 2,
    WinNt50 = 3,
    Virtual = 4,
}

/// A failed native call: the raw status code and, when the platform supplied one, its message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NativeError {
    pub code: u32,
    pub message: Option<String>,
}

impl NativeError {
    pub fn new(code: u32) -> Self {
        Self { code, message: None }
    }

    pub fn with_message(code: u32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: Some(message.into()),
        }
    }
}

impl From<NativeStatus> for NativeError {
    fn from(status: NativeStatus) -> Self {
        Self::new(status.code())
    }
}

impl fmt::Display for NativeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.message {
            Some(message) => write!(f, "0x{:08X}: {message}", self.code),
            None => write!(f, "0x{:08X}", self.code),
        }
    }
}

pub type NativeResult<T> = std::result::Result<T, NativeError>;

/// The outcome of one successful negotiation round.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiationStep {
    /// The context the round ran on. Newly created on the first round.
    pub context: ContextHandle,
    pub output: Option<Vec<u8>>,
    pub continue_needed: bool,
}

/// The identity attached to a token, as reported by the platform.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityRecord {
    /// Binary security identifier.
    pub sid: Vec<u8>,
    /// `DOMAIN\user`
    pub fqn: String,
    pub groups: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AccountRecord {
    pub sid: Vec<u8>,
    pub fqn: String,
}

/// One entry of the trusted domain enumeration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DomainTrust {
    pub netbios_name: String,
    pub dns_name: Option<String>,
    pub trust_direction: TrustDirection,
    pub trust_type: TrustType,
    pub trust_attributes: TrustAttributes,
    pub flags: DomainFlags,
}

impl DomainTrust {
    /// The DNS name when known, the NetBIOS name otherwise.
    pub fn fqn(&self) -> &str {
        self.dns_name.as_deref().unwrap_or(&self.netbios_name)
    }
}

/// Native identity primitives.
///
/// Implementations own every native object they hand out an index for and free it when the
/// matching `release_*`/`revert_thread` call arrives. The crate guarantees each index is released
/// exactly once.
pub trait IdentityAdapter: fmt::Debug + Send + Sync {
    fn logon(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &Secret<String>,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> NativeResult<TokenHandle>;

    /// Runs one server-side round. `context` is `None` on the first round.
    fn continue_negotiation(
        &self,
        context: Option<ContextHandle>,
        input: &[u8],
        package: SecurityPackage,
    ) -> NativeResult<NegotiationStep>;

    /// Runs one client-side round with the caller's ambient credentials.
    fn initialize_negotiation(
        &self,
        context: Option<ContextHandle>,
        input: &[u8],
        package: SecurityPackage,
        target_name: Option<&str>,
    ) -> NativeResult<NegotiationStep>;

    /// Opens the token of the client a completed server context authenticated.
    fn context_token(&self, context: ContextHandle) -> NativeResult<TokenHandle>;

    fn resolve_identity(&self, token: TokenHandle) -> NativeResult<IdentityRecord>;

    fn resolve_account(&self, name: &str) -> NativeResult<AccountRecord>;

    /// The calling thread's effective identity.
    fn effective_identity(&self) -> NativeResult<IdentityRecord>;

    fn query_computer(&self) -> NativeResult<Computer>;

    /// Fails with `NERR_SetupNotJoined` when the computer is not a domain member.
    fn query_domains(&self) -> NativeResult<Vec<DomainTrust>>;

    fn query_domain_canonical_name(&self, fqn: &str) -> NativeResult<String>;

    fn query_domain_groups(&self, fqn: &str) -> NativeResult<Vec<String>>;

    fn impersonate_thread(&self, token: TokenHandle) -> NativeResult<ImpersonationHandle>;

    fn revert_thread(&self, handle: ImpersonationHandle);

    fn release_context(&self, context: ContextHandle);

    fn release_token(&self, token: TokenHandle);
}

/// Exclusively owns a security context index and releases it on drop.
#[derive(Debug)]
pub(crate) struct OwnedContext {
    adapter: Arc<dyn IdentityAdapter>,
    handle: ContextHandle,
}

impl OwnedContext {
    pub(crate) fn new(adapter: Arc<dyn IdentityAdapter>, handle: ContextHandle) -> Self {
        Self { adapter, handle }
    }

    pub(crate) fn handle(&self) -> ContextHandle {
        self.handle
    }
}

impl Drop for OwnedContext {
    fn drop(&mut self) {
        trace!(context = self.handle.index(), "Releasing security context");
        self.adapter.release_context(self.handle);
    }
}

/// Owns a logon token index and releases it on drop.
///
/// Shared between clones of an [`Identity`](crate::Identity) through an `Arc`, so the token is
/// released once, after the last clone is gone.
#[derive(Debug)]
pub(crate) struct OwnedToken {
    adapter: Arc<dyn IdentityAdapter>,
    handle: TokenHandle,
}

impl OwnedToken {
    pub(crate) fn new(adapter: Arc<dyn IdentityAdapter>, handle: TokenHandle) -> Self {
        Self { adapter, handle }
    }

    pub(crate) fn handle(&self) -> TokenHandle {
        self.handle
    }

    pub(crate) fn adapter(&self) -> &Arc<dyn IdentityAdapter> {
        &self.adapter
    }
}

impl Drop for OwnedToken {
    fn drop(&mut self) {
        trace!(token = self.handle.index(), "Releasing logon token");
        self.adapter.release_token(self.handle);
    }
}
