//! Security identifiers in their binary and canonical `S-R-I-S-S...` string forms.

use std::fmt;
use std::str::FromStr;
use std::sync::LazyLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

const MAX_SUB_AUTHORITIES: usize = 15;
const MAX_AUTHORITY: u64 = (1 << 48) - 1;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SidError {
    #[error("invalid sid value: {0}")]
    InvalidSid(String),

    #[error("invalid binary sid: {0}")]
    InvalidBinary(&'static str),
}

static SID_PATTERN: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(r"^S-(\d{1,3})-(\d+|0[xX][0-9a-fA-F]{1,12})((?:-\d+){0,15})$").expect("valid SID regex"));

/// A security identifier.
///
/// The binary layout matches the native one: revision, sub-authority count, a 48-bit big-endian
/// identifier authority and little-endian 32-bit sub-authorities.
#[derive(Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Sid {
    revision: u8,
    authority: u64,
    sub_authorities: Vec<u32>,
}

impl Sid {
    pub fn new(revision: u8, authority: u64, sub_authorities: &[u32]) -> Result<Self, SidError> {
        if authority > MAX_AUTHORITY {
            return Err(SidError::InvalidBinary("identifier authority does not fit in 48 bits"));
        }
        if sub_authorities.len() > MAX_SUB_AUTHORITIES {
            return Err(SidError::InvalidBinary("too many sub-authorities"));
        }

        Ok(Self {
            revision,
            authority,
            sub_authorities: sub_authorities.to_vec(),
        })
    }

    pub fn from_bytes(data: &[u8]) -> Result<Self, SidError> {
        if data.len() < 8 {
            return Err(SidError::InvalidBinary("sid is shorter than its header"));
        }

        let revision = data[0];
        let count = usize::from(data[1]);
        if count > MAX_SUB_AUTHORITIES {
            return Err(SidError::InvalidBinary("too many sub-authorities"));
        }
        if data.len() != 8 + 4 * count {
            return Err(SidError::InvalidBinary("sid length does not match its sub-authority count"));
        }

        let mut authority = [0; 8];
        authority[2..].copy_from_slice(&data[2..8]);

        let sub_authorities = data[8..]
            .chunks_exact(4)
            .map(|chunk| u32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]))
            .collect();

        Ok(Self {
            revision,
            authority: u64::from_be_bytes(authority),
            sub_authorities,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut data = Vec::with_capacity(8 + 4 * self.sub_authorities.len());
        data.extend_from_slice(&self.authority.to_be_bytes());
        data[0] = self.revision;
        // Sub-authority count is bounded by MAX_SUB_AUTHORITIES on construction.
        data[1] = self.sub_authorities.len() as u8;

        for sub_authority in &self.sub_authorities {
            data.extend_from_slice(&sub_authority.to_le_bytes());
        }

        data
    }

    pub fn revision(&self) -> u8 {
        self.revision
    }

    pub fn authority(&self) -> u64 {
        self.authority
    }

    pub fn sub_authorities(&self) -> &[u32] {
        &self.sub_authorities
    }

    /// The relative identifier: the last sub-authority.
    pub fn rid(&self) -> Option<u32> {
        self.sub_authorities.last().copied()
    }
}

impl FromStr for Sid {
    type Err = SidError;

    fn from_str(sid: &str) -> Result<Self, SidError> {
        let captures = SID_PATTERN
            .captures(sid)
            .ok_or_else(|| SidError::InvalidSid(sid.to_owned()))?;
        let invalid = || SidError::InvalidSid(sid.to_owned());

        let revision = captures[1].parse::<u8>().map_err(|_| invalid())?;
        let authority = match captures[2].strip_prefix("0x").or_else(|| captures[2].strip_prefix("0X")) {
            Some(hex) => u64::from_str_radix(hex, 16).map_err(|_| invalid())?,
            None => captures[2].parse::<u64>().map_err(|_| invalid())?,
        };
        let sub_authorities = captures[3]
            .split('-')
            .skip(1)
            .map(|part| part.parse::<u32>().map_err(|_| invalid()))
            .collect::<Result<Vec<_>, _>>()?;

        Self::new(revision, authority, &sub_authorities).map_err(|_| invalid())
    }
}

impl TryFrom<String> for Sid {
    type Error = SidError;

    fn try_from(value: String) -> Result<Self, SidError> {
        value.parse()
    }
}

impl From<Sid> for String {
    fn from(sid: Sid) -> Self {
        sid.to_string()
    }
}

impl fmt::Display for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "S-{}-", self.revision)?;
        if self.authority >= 1 << 32 {
            write!(f, "0x{:012X}", self.authority)?;
        } else {
            write!(f, "{}", self.authority)?;
        }
        for sub_authority in &self.sub_authorities {
            write!(f, "-{sub_authority}")?;
        }

        Ok(())
    }
}

impl fmt::Debug for Sid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Sid({self})")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ADMINISTRATORS: [u8; 16] = [1, 2, 0, 0, 0, 0, 0, 5, 32, 0, 0, 0, 32, 2, 0, 0];

    #[test]
    fn parses_builtin_administrators() {
        let sid = Sid::from_bytes(&ADMINISTRATORS).unwrap();

        assert_eq!(sid.to_string(), "S-1-5-32-544");
        assert_eq!(sid.rid(), Some(544));
        assert_eq!(sid.to_bytes(), ADMINISTRATORS);
    }

    #[test]
    fn string_form_matches_binary_form() {
        let sid: Sid = "S-1-5-21-1004336348-1177238915-682003330-512".parse().unwrap();
        let decoded = Sid::from_bytes(&sid.to_bytes()).unwrap();

        assert_eq!(decoded, sid);
        assert_eq!(decoded.sub_authorities().len(), 5);
    }

    #[test]
    fn large_authority_is_hex() {
        let sid = Sid::new(1, 0x1_0000_0000, &[7]).unwrap();

        assert_eq!(sid.to_string(), "S-1-0x000100000000-7");
        assert_eq!("S-1-0x000100000000-7".parse::<Sid>().unwrap(), sid);
    }

    #[test]
    fn rejects_malformed_sids() {
        assert!("S-1".parse::<Sid>().is_err());
        assert!("1-5-32-544".parse::<Sid>().is_err());
        assert!("S-1-5-x".parse::<Sid>().is_err());
        assert!(Sid::from_bytes(&ADMINISTRATORS[..12]).is_err());
        assert!(Sid::from_bytes(&[1, 16, 0, 0, 0, 0, 0, 5]).is_err());
    }
}
