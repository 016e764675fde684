use std::fmt;
use std::str::FromStr;

use serde::Deserialize;

use crate::{Error, ErrorKind, Result};

pub const NEGOTIATE_PKG_NAME: &str = "Negotiate";
pub const NTLM_PKG_NAME: &str = "NTLM";
pub const KERBEROS_PKG_NAME: &str = "Kerberos";

/// Selects the native negotiation mechanism used for one handshake.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum SecurityPackage {
    Negotiate,
    Ntlm,
    Kerberos,
}

impl SecurityPackage {
    pub const ALL: [SecurityPackage; 3] = [SecurityPackage::Negotiate, SecurityPackage::Ntlm, SecurityPackage::Kerberos];

    /// The name the operating system registers the package under.
    pub fn name(self) -> &'static str {
        match self {
            SecurityPackage::Negotiate => NEGOTIATE_PKG_NAME,
            SecurityPackage::Ntlm => NTLM_PKG_NAME,
            SecurityPackage::Kerberos => KERBEROS_PKG_NAME,
        }
    }
}

impl fmt::Display for SecurityPackage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for SecurityPackage {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        SecurityPackage::ALL
            .into_iter()
            .find(|package| package.name().eq_ignore_ascii_case(s.trim()))
            .ok_or_else(|| Error::new(ErrorKind::Package, format!("unsupported security package: {s:?}")))
    }
}

/// The set of packages a provider accepts handshakes for.
///
/// Parsed from a comma separated list where a `!` prefix disables a package, e.g.
/// `"negotiate,ntlm,!kerberos"`. Packages not mentioned stay enabled.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(try_from = "String")]
pub struct PackageList {
    negotiate: bool,
    ntlm: bool,
    kerberos: bool,
}

impl PackageList {
    pub fn parse(package_list: &str) -> Self {
        let mut list = Self::default();

        for package in package_list.split(',').map(str::trim).filter(|p| !p.is_empty()) {
            let (package_name, enabled) = match package.strip_prefix('!') {
                Some(package_name) => (package_name, false),
                None => (package, true),
            };

            match package_name.parse::<SecurityPackage>() {
                Ok(package) => list.set(package, enabled),
                Err(_) => warn!(package_name, "unexpected package name in package list"),
            }
        }

        list
    }

    pub fn only(packages: &[SecurityPackage]) -> Self {
        let mut list = Self {
            negotiate: false,
            ntlm: false,
            kerberos: false,
        };
        for package in packages {
            list.set(*package, true);
        }

        list
    }

    pub fn contains(&self, package: SecurityPackage) -> bool {
        match package {
            SecurityPackage::Negotiate => self.negotiate,
            SecurityPackage::Ntlm => self.ntlm,
            SecurityPackage::Kerberos => self.kerberos,
        }
    }

    pub fn enabled(&self) -> impl Iterator<Item = SecurityPackage> + '_ {
        SecurityPackage::ALL.into_iter().filter(|package| self.contains(*package))
    }

    /// Parses a package name and checks that it is enabled.
    pub fn resolve(&self, name: &str) -> Result<SecurityPackage> {
        let package = name.parse::<SecurityPackage>()?;
        if !self.contains(package) {
            return Err(Error::new(
                ErrorKind::Package,
                format!("security package {package} is disabled"),
            ));
        }

        Ok(package)
    }

    fn set(&mut self, package: SecurityPackage, enabled: bool) {
        match package {
            SecurityPackage::Negotiate => self.negotiate = enabled,
            SecurityPackage::Ntlm => self.ntlm = enabled,
            SecurityPackage::Kerberos => self.kerberos = enabled,
        }
    }
}

impl Default for PackageList {
    fn default() -> Self {
        Self {
            negotiate: true,
            ntlm: true,
            kerberos: true,
        }
    }
}

impl TryFrom<String> for PackageList {
    type Error = Error;

    fn try_from(value: String) -> Result<Self> {
        Ok(Self::parse(&value))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn package_names_are_case_insensitive() {
        assert_eq!("negotiate".parse::<SecurityPackage>().unwrap(), SecurityPackage::Negotiate);
        assert_eq!("NTLM".parse::<SecurityPackage>().unwrap(), SecurityPackage::Ntlm);
        assert_eq!("Kerberos".parse::<SecurityPackage>().unwrap(), SecurityPackage::Kerberos);
    }

    #[test]
    fn unknown_package_is_package_error() {
        let err = "Digest".parse::<SecurityPackage>().unwrap_err();

        assert_eq!(err.kind(), ErrorKind::Package);
    }

    #[test]
    fn package_list_disables_with_bang() {
        let list = PackageList::parse("ntlm,!kerberos");

        assert!(list.contains(SecurityPackage::Ntlm));
        assert!(list.contains(SecurityPackage::Negotiate));
        assert!(!list.contains(SecurityPackage::Kerberos));
        assert_eq!(list.resolve("Kerberos").unwrap_err().kind(), ErrorKind::Package);
    }

    #[test]
    fn package_list_ignores_unknown_names() {
        assert_eq!(PackageList::parse("pku2u, ,!digest"), PackageList::default());
    }
}
