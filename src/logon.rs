use std::sync::Arc;

use crate::adapter::{IdentityAdapter, LogonProvider, LogonType};
use crate::identity::{Account, Identity};
use crate::sid::Sid;
use crate::username::Username;
use crate::{Error, ErrorKind, Result, Secret};

/// Turns credentials into an [`Identity`].
#[derive(Debug, Clone)]
pub struct LogonEngine {
    adapter: Arc<dyn IdentityAdapter>,
    default_logon_type: LogonType,
    default_logon_provider: LogonProvider,
}

impl LogonEngine {
    pub fn new(
        adapter: Arc<dyn IdentityAdapter>,
        default_logon_type: LogonType,
        default_logon_provider: LogonProvider,
    ) -> Self {
        Self {
            adapter,
            default_logon_type,
            default_logon_provider,
        }
    }

    /// Logs on a user of the local computer, or of the domain named in `username`.
    pub fn logon_local_user(&self, username: &str, password: &Secret<String>) -> Result<Identity> {
        self.logon(
            username,
            None,
            password,
            self.default_logon_type,
            self.default_logon_provider,
        )
    }

    /// Logs on a user, resolving a bare `username` against `domain`.
    pub fn logon_domain_user(&self, username: &str, domain: &str, password: &Secret<String>) -> Result<Identity> {
        self.logon(
            username,
            Some(domain),
            password,
            self.default_logon_type,
            self.default_logon_provider,
        )
    }

    pub fn logon_domain_user_ex(
        &self,
        username: &str,
        domain: &str,
        password: &Secret<String>,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> Result<Identity> {
        self.logon(username, Some(domain), password, logon_type, logon_provider)
    }

    #[instrument(level = "debug", skip(self, password), fields(password = %password))]
    fn logon(
        &self,
        username: &str,
        domain: Option<&str>,
        password: &Secret<String>,
        logon_type: LogonType,
        logon_provider: LogonProvider,
    ) -> Result<Identity> {
        let mut parsed = Username::parse(username)
            .map_err(|err| Error::new(ErrorKind::Credential, format!("invalid logon name: {err}")))?;
        if let Some(domain) = domain {
            parsed = parsed.with_default_domain(domain);
        }

        let token = self
            .adapter
            .logon(
                parsed.account_name(),
                parsed.domain_name(),
                password,
                logon_type,
                logon_provider,
            )
            .map_err(|err| {
                warn!(username = %parsed, code = err.code, "Logon failed");
                Error::from(err)
            })?;

        let identity = Identity::from_token(&self.adapter, token)?;
        info!(fqn = %identity.fqn(), "User logged on");

        Ok(identity)
    }

    /// Resolves `name` in any of the three username forms.
    #[instrument(level = "debug", skip(self))]
    pub fn lookup_account(&self, name: &str) -> Result<Account> {
        // Malformed names never reach the adapter.
        Username::parse(name)?;

        let record = self.adapter.resolve_account(name).map_err(|err| {
            debug!(code = err.code, "Account lookup failed");
            err
        })?;
        let sid = Sid::from_bytes(&record.sid)?;

        Ok(Account::new(sid, record.fqn))
    }

    /// The calling thread's effective identity: the process identity, or the impersonated one.
    pub fn current_identity(&self) -> Result<Account> {
        let record = self.adapter.effective_identity()?;
        let sid = Sid::from_bytes(&record.sid)?;

        Ok(Account::new(sid, record.fqn))
    }
}
