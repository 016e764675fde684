use std::env;
use std::time::Duration;

use serde::Deserialize;

use crate::adapter::{LogonProvider, LogonType};
use crate::package::PackageList;
use crate::{Error, ErrorKind, Result};

pub const WINAUTH_PACKAGE_LIST_ENV: &str = "WINAUTH_PACKAGE_LIST";
pub const WINAUTH_CONTEXT_TTL_SECS_ENV: &str = "WINAUTH_CONTEXT_TTL_SECS";

/// Unfinished handshakes idle for longer than this are evicted.
pub const DEFAULT_CONTEXT_TTL: Duration = Duration::from_secs(300);

/// Settings of an [`AuthProvider`](crate::AuthProvider).
///
/// Deserializes from e.g.
///
/// ```json
/// { "packages": "negotiate,ntlm,!kerberos", "context_ttl_secs": 120, "default_logon_type": "Interactive" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct ProviderConfig {
    pub packages: PackageList,
    #[serde(rename = "context_ttl_secs", deserialize_with = "deserialize_ttl")]
    pub context_ttl: Option<Duration>,
    pub default_logon_type: LogonType,
    pub default_logon_provider: LogonProvider,
}

impl Default for ProviderConfig {
    fn default() -> Self {
        Self {
            packages: PackageList::default(),
            context_ttl: Some(DEFAULT_CONTEXT_TTL),
            default_logon_type: LogonType::default(),
            default_logon_provider: LogonProvider::default(),
        }
    }
}

impl ProviderConfig {
    /// Starts from the defaults and applies `WINAUTH_PACKAGE_LIST` and `WINAUTH_CONTEXT_TTL_SECS`.
    ///
    /// A TTL of `0` disables eviction.
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(package_list) = env::var(WINAUTH_PACKAGE_LIST_ENV) {
            debug!(%package_list, "Package list from environment");
            config.packages = PackageList::parse(&package_list);
        }

        if let Ok(ttl) = env::var(WINAUTH_CONTEXT_TTL_SECS_ENV) {
            let secs = ttl.trim().parse::<u64>().map_err(|err| {
                Error::new(
                    ErrorKind::Internal,
                    format!("invalid {WINAUTH_CONTEXT_TTL_SECS_ENV} value {ttl:?}: {err}"),
                )
            })?;
            config.context_ttl = ttl_from_secs(secs);
        }

        Ok(config)
    }

    pub fn with_packages(mut self, packages: PackageList) -> Self {
        self.packages = packages;
        self
    }

    pub fn with_context_ttl(mut self, context_ttl: Option<Duration>) -> Self {
        self.context_ttl = context_ttl;
        self
    }

    pub fn with_default_logon_type(mut self, logon_type: LogonType) -> Self {
        self.default_logon_type = logon_type;
        self
    }

    pub fn with_default_logon_provider(mut self, logon_provider: LogonProvider) -> Self {
        self.default_logon_provider = logon_provider;
        self
    }
}

fn ttl_from_secs(secs: u64) -> Option<Duration> {
    (secs > 0).then(|| Duration::from_secs(secs))
}

fn deserialize_ttl<'de, D>(deserializer: D) -> std::result::Result<Option<Duration>, D::Error>
where
    D: serde::Deserializer<'de>,
{
    Ok(Option::<u64>::deserialize(deserializer)?.and_then(ttl_from_secs))
}
