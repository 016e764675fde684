use std::sync::Arc;

use crate::adapter::{IdentityAdapter, LogonProvider, LogonType};
use crate::client::ClientContext;
use crate::config::ProviderConfig;
use crate::identity::{Account, Computer, Domain, Identity};
use crate::logon::LogonEngine;
use crate::negotiator::{ConnectionId, ContextSnapshot, ContextStore, NegotiationOutcome, Negotiator};
use crate::{Error, ErrorKind, Result, Secret, SecurityPackage};

/// Entry point of the crate: logon, handshakes and lookups over one [`IdentityAdapter`].
///
/// Cheap to share between threads behind an `Arc`; every operation takes `&self`.
#[derive(Debug)]
pub struct AuthProvider {
    adapter: Arc<dyn IdentityAdapter>,
    config: ProviderConfig,
    negotiator: Negotiator,
    logon: LogonEngine,
}

impl AuthProvider {
    pub fn new(adapter: Arc<dyn IdentityAdapter>, config: ProviderConfig) -> Self {
        let store = Arc::new(ContextStore::new(config.context_ttl));
        let negotiator = Negotiator::new(Arc::clone(&adapter), store, config.packages.clone());
        let logon = LogonEngine::new(
            Arc::clone(&adapter),
            config.default_logon_type,
            config.default_logon_provider,
        );

        Self {
            adapter,
            config,
            negotiator,
            logon,
        }
    }

    /// A provider over the operating system's identity facilities, configured from the environment.
    ///
    /// Only Windows has such facilities; elsewhere this fails with [`ErrorKind::System`].
    pub fn native() -> Result<Self> {
        let config = ProviderConfig::from_env()?;

        cfg_if::cfg_if! {
            if #[cfg(windows)] {
                let adapter = crate::adapter::WindowsAdapter::new(&config.packages)?;

                Ok(Self::new(Arc::new(adapter), config))
            } else {
                drop(config);

                Err(Error::new(
                    ErrorKind::System,
                    "native identity facilities are only available on Windows",
                ))
            }
        }
    }

    pub fn config(&self) -> &ProviderConfig {
        &self.config
    }

    pub fn adapter(&self) -> &Arc<dyn IdentityAdapter> {
        &self.adapter
    }

    pub fn negotiator(&self) -> &Negotiator {
        &self.negotiator
    }

    pub fn accept_token(
        &self,
        connection_id: &ConnectionId,
        input: &[u8],
        package: SecurityPackage,
    ) -> Result<NegotiationOutcome> {
        self.negotiator.accept_token(connection_id, input, package)
    }

    /// Like [`accept_token`](Self::accept_token), with the package given by name.
    pub fn accept_token_for(&self, connection_id: &ConnectionId, input: &[u8], package: &str) -> Result<NegotiationOutcome> {
        let package = self.config.packages.resolve(package)?;

        self.negotiator.accept_token(connection_id, input, package)
    }

    pub fn reset(&self, connection_id: &ConnectionId) -> Result<bool> {
        self.negotiator.reset(connection_id)
    }

    pub fn evict_expired(&self) -> Result<usize> {
        self.negotiator.store().evict_expired()
    }

    /// Number of handshakes in progress.
    pub fn active_contexts(&self) -> usize {
        self.negotiator.store().len()
    }

    pub fn contains(&self, connection_id: &ConnectionId) -> bool {
        self.negotiator.store().contains(connection_id)
    }

    /// State of the unfinished handshake for `connection_id`, if any.
    pub fn context_snapshot(&self, connection_id: &ConnectionId) -> Result<Option<ContextSnapshot>> {
        self.negotiator.store().snapshot(connection_id)
    }

    /// Starts the client side of a handshake as the calling thread's identity.
    pub fn client_context(&self, package: SecurityPackage, target_name: Option<&str>) -> Result<ClientContext> {
        if !self.config.packages.contains(package) {
            return Err(Error::new(
                ErrorKind::Package,
                format!("security package {package} is disabled"),
            ));
        }

        ClientContext::current(Arc::clone(&self.adapter), package, target_name)
    }

    pub fn logon_local_user(&self, username: &str, password: &Secret<String>) -> Result<Identity> {
        self.logon.logon_local_user(username, password)
    }

    pub fn logon_domain_user(&self, username: &str, domain: &str, password: &Secret<String>) -> Result<Identity> {
        self.logon.logon_domain_user(username, domain, password)
    }

    pub fn logon_domain_user_ex(
        &self,
        username: &str,
        domain: &str,
        password: &Secret<String>,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> Result<Identity> {
        self.logon
            .logon_domain_user_ex(username, domain, password, logon_type, logon_provider)
    }

    pub fn lookup_account(&self, name: &str) -> Result<Account> {
        self.logon.lookup_account(name)
    }

    pub fn current_identity(&self) -> Result<Account> {
        self.logon.current_identity()
    }

    #[instrument(level = "debug", skip(self))]
    pub fn current_computer(&self) -> Result<Computer> {
        Ok(self.adapter.query_computer()?)
    }

    /// Trusted domains of the computer, the joined domain first.
    ///
    /// Fails with [`ErrorKind::NotJoined`] when the computer is not a domain member.
    #[instrument(level = "debug", skip(self))]
    pub fn domains(&self) -> Result<Vec<Domain>> {
        let trusts = self.adapter.query_domains().map_err(|err| {
            let err = Error::from(err);
            if err.is_not_joined() {
                debug!("Computer is not joined to a domain");
            } else {
                warn!(%err, "Domain enumeration failed");
            }
            err
        })?;

        Ok(trusts
            .into_iter()
            .map(|trust| Domain::new(Arc::clone(&self.adapter), trust))
            .collect())
    }

    /// The trusted domain known under `name`, as FQN, NetBIOS name or DNS name.
    pub fn domain(&self, name: &str) -> Result<Domain> {
        self.domains()?
            .into_iter()
            .find(|domain| domain.matches(name))
            .ok_or_else(|| Error::new(ErrorKind::Lookup, format!("no trusted domain named {name:?}")))
    }
}
