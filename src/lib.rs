//! Windows-integrated authentication for server applications.
//!
//! [`AuthProvider`] validates credentials, drives NTLM/Negotiate/Kerberos handshakes per
//! connection, looks up accounts, domains and the local computer, and hands out
//! [`Identity`] values that can be impersonated for a scope.
//!
//! All platform access goes through an [`IdentityAdapter`](adapter::IdentityAdapter).
//! [`AuthProvider::native`] uses the Windows one; [`MemoryAdapter`](adapter::MemoryAdapter) is
//! an in-process directory for tests and non-Windows hosts.
//!
//! ```
//! use std::sync::Arc;
//!
//! use winauth::adapter::MemoryAdapter;
//! use winauth::{AuthProvider, ProviderConfig, Secret};
//!
//! let adapter = MemoryAdapter::builder().local_user("alice", "s3cret").build();
//! let provider = AuthProvider::new(Arc::new(adapter), ProviderConfig::default());
//!
//! let identity = provider.logon_local_user("alice", &Secret::from("s3cret")).unwrap();
//! assert_eq!(identity.fqn(), "WORKSTATION\\alice");
//! ```

#[macro_use]
extern crate tracing;

pub mod adapter;
pub mod client;
pub mod config;
pub mod identity;
pub mod impersonation;
pub mod logging;
pub mod logon;
pub mod negotiator;
pub mod package;
pub mod provider;
pub mod sid;
pub mod username;

mod error;
mod secret;

pub use crate::client::ClientContext;
pub use crate::config::ProviderConfig;
pub use crate::error::{translate_status, Error, ErrorKind, NativeStatus, Result};
pub use crate::identity::{Account, Computer, Domain, Identity, JoinStatus, TrustDirection, TrustType};
pub use crate::impersonation::ImpersonationGuard;
pub use crate::negotiator::{ConnectionId, ContextSnapshot, NegotiationOutcome, NegotiationState};
pub use crate::package::{PackageList, SecurityPackage};
pub use crate::provider::AuthProvider;
pub use crate::secret::Secret;
pub use crate::sid::Sid;
pub use crate::username::Username;
