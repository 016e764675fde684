use std::fmt;
use std::hash::{Hash, Hasher};

use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum UsernameError {
    #[error("username is empty")]
    Empty,

    #[error("invalid username format: {0:?}")]
    InvalidFormat(String),
}

/// The form a username was written in.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum UserNameFormat {
    /// `DOMAIN\user`
    DownLevelLogonName,
    /// `user@domain`
    UserPrincipalName,
    /// `user`, resolved against the local computer or a default domain.
    Bare,
}

/// A parsed username.
///
/// All three accepted forms reduce to an account name plus an optional domain. Equality
/// ignores case and the form the name was written in.
#[derive(Debug, Clone, Eq)]
pub struct Username {
    account_name: String,
    domain: Option<String>,
    format: UserNameFormat,
}

impl Username {
    pub fn parse(value: &str) -> Result<Self, UsernameError> {
        let value = value.trim();
        if value.is_empty() {
            return Err(UsernameError::Empty);
        }

        let invalid = || UsernameError::InvalidFormat(value.to_owned());

        if let Some((domain, account_name)) = value.split_once('\\') {
            if domain.is_empty() || account_name.is_empty() || account_name.contains('\\') {
                return Err(invalid());
            }

            return Ok(Self {
                account_name: account_name.to_owned(),
                domain: Some(domain.to_owned()),
                format: UserNameFormat::DownLevelLogonName,
            });
        }

        if let Some((account_name, domain)) = value.rsplit_once('@') {
            if domain.is_empty() || account_name.is_empty() {
                return Err(invalid());
            }

            return Ok(Self {
                account_name: account_name.to_owned(),
                domain: Some(domain.to_owned()),
                format: UserNameFormat::UserPrincipalName,
            });
        }

        Ok(Self {
            account_name: value.to_owned(),
            domain: None,
            format: UserNameFormat::Bare,
        })
    }

    /// Builds a username from its parts. An empty domain is treated as no domain.
    pub fn new(account_name: &str, domain: Option<&str>) -> Result<Self, UsernameError> {
        let account_name = account_name.trim();
        if account_name.is_empty() {
            return Err(UsernameError::Empty);
        }
        if account_name.contains('\\') {
            return Err(UsernameError::InvalidFormat(account_name.to_owned()));
        }

        let domain = domain.map(str::trim).filter(|domain| !domain.is_empty());

        Ok(Self {
            account_name: account_name.to_owned(),
            domain: domain.map(str::to_owned),
            format: if domain.is_some() {
                UserNameFormat::DownLevelLogonName
            } else {
                UserNameFormat::Bare
            },
        })
    }

    pub fn account_name(&self) -> &str {
        &self.account_name
    }

    pub fn domain_name(&self) -> Option<&str> {
        self.domain.as_deref()
    }

    pub fn format(&self) -> UserNameFormat {
        self.format
    }

    /// Fills in `domain` when the name does not carry one. Empty domains are ignored.
    pub fn with_default_domain(mut self, domain: &str) -> Self {
        let domain = domain.trim();
        if self.domain.is_none() && !domain.is_empty() {
            self.domain = Some(domain.to_owned());
        }

        self
    }

    /// The `DOMAIN\user` form, or the bare account name when no domain is known.
    pub fn to_down_level(&self) -> String {
        match &self.domain {
            Some(domain) => format!("{domain}\\{}", self.account_name),
            None => self.account_name.clone(),
        }
    }
}

impl PartialEq for Username {
    fn eq(&self, other: &Self) -> bool {
        let domains_match = match (&self.domain, &other.domain) {
            (Some(left), Some(right)) => left.eq_ignore_ascii_case(right),
            (None, None) => true,
            _ => false,
        };

        domains_match && self.account_name.eq_ignore_ascii_case(&other.account_name)
    }
}

impl Hash for Username {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.account_name.to_ascii_lowercase().hash(state);
        self.domain.as_ref().map(|domain| domain.to_ascii_lowercase()).hash(state);
    }
}

impl fmt::Display for Username {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match (&self.domain, self.format) {
            (Some(domain), UserNameFormat::UserPrincipalName) => write!(f, "{}@{domain}", self.account_name),
            _ => f.write_str(&self.to_down_level()),
        }
    }
}

/// Case-insensitive comparison of two fully qualified `DOMAIN\user` names.
pub fn fqn_eq(left: &str, right: &str) -> bool {
    left.eq_ignore_ascii_case(right)
}
