use std::sync::PoisonError;
use std::{error, fmt, io, result};

use num_derive::{FromPrimitive, ToPrimitive};
use num_traits::FromPrimitive;

use crate::adapter::NativeError;
use crate::sid::SidError;
use crate::username::UsernameError;

pub type Result<T> = result::Result<T, Error>;

/// The kind of an authentication error. Callers branch on this, never on the description.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Bad username or password on logon.
    Credential,
    /// Malformed or rejected handshake token.
    Token,
    /// Unsupported security package.
    Package,
    /// Account or domain name could not be resolved.
    Lookup,
    /// The computer has no domain membership. A skip condition for domain enumeration.
    NotJoined,
    /// Any other native status; the original code is kept in [`Error::native_code`].
    System,
    /// An impersonation scope is already open on the calling thread.
    ImpersonationActive,
    /// Lock poisoning or data an adapter returned in an unexpected shape.
    Internal,
}

/// Native status codes that have a dedicated [`ErrorKind`].
///
/// Win32 error codes and SSPI `SEC_E_*` values share one numeric space here; they never collide.
#[repr(u32)]
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, ToPrimitive)]
pub enum NativeStatus {
    AccessDenied = 5,
    NoSuchUser = 1317,
    LogonFailure = 1326,
    NoneMapped = 1332,
    NoSuchDomain = 1355,
    DcNotFound = 2453,
    SetupNotJoined = 2692,
    InvalidHandle = 0x8009_0301,
    SecurityPackageNotFound = 0x8009_0305,
    InvalidToken = 0x8009_0308,
    LogonDenied = 0x8009_030C,
    MessageAltered = 0x8009_030F,
    OutOfSequence = 0x8009_0310,
    BadPackageId = 0x8009_0316,
    IncompleteMessage = 0x8009_0318,
}

impl NativeStatus {
    pub fn code(self) -> u32 {
        self as u32
    }

    pub fn kind(self) -> ErrorKind {
        match self {
            NativeStatus::LogonFailure | NativeStatus::LogonDenied => ErrorKind::Credential,
            NativeStatus::InvalidToken
            | NativeStatus::MessageAltered
            | NativeStatus::OutOfSequence
            | NativeStatus::IncompleteMessage
            | NativeStatus::InvalidHandle => ErrorKind::Token,
            NativeStatus::SecurityPackageNotFound | NativeStatus::BadPackageId => ErrorKind::Package,
            NativeStatus::NoSuchUser | NativeStatus::NoneMapped | NativeStatus::NoSuchDomain | NativeStatus::DcNotFound => {
                ErrorKind::Lookup
            }
            NativeStatus::SetupNotJoined => ErrorKind::NotJoined,
            NativeStatus::AccessDenied => ErrorKind::System,
        }
    }

    /// The message the operating system reports for this status.
    pub fn description(self) -> &'static str {
        match self {
            NativeStatus::AccessDenied => "Access is denied.",
            NativeStatus::NoSuchUser => "The specified account does not exist.",
            NativeStatus::LogonFailure => "Logon failure: unknown user name or bad password.",
            NativeStatus::NoneMapped => "No mapping between account names and security IDs was done.",
            NativeStatus::NoSuchDomain => "The specified domain either does not exist or could not be contacted.",
            NativeStatus::DcNotFound => "Could not find domain controller for this domain.",
            NativeStatus::SetupNotJoined => "This machine is not currently joined to a domain.",
            NativeStatus::InvalidHandle => "The handle specified is invalid",
            NativeStatus::SecurityPackageNotFound => "The requested security package does not exist",
            NativeStatus::InvalidToken => "The token supplied to the function is invalid",
            NativeStatus::LogonDenied => "The logon attempt failed",
            NativeStatus::MessageAltered => "The message or signature supplied for verification has been altered",
            NativeStatus::OutOfSequence => "The message supplied for verification is out of sequence",
            NativeStatus::BadPackageId => "The requested security package does not exist",
            NativeStatus::IncompleteMessage => "The supplied message is incomplete. The signature was not verified.",
        }
    }
}

/// Maps a native status code to its error kind.
///
/// Total and stable: every code yields exactly one kind, and codes without a dedicated
/// kind are [`ErrorKind::System`].
pub fn translate_status(code: u32) -> ErrorKind {
    NativeStatus::from_u32(code)
        .map(NativeStatus::kind)
        .unwrap_or(ErrorKind::System)
}

/// Holds the [`ErrorKind`], a description and, for native failures, the original status code.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Error {
    pub error_type: ErrorKind,
    pub description: String,
    pub native_code: Option<u32>,
}

impl Error {
    pub fn new(error_type: ErrorKind, description: impl ToString) -> Self {
        Self {
            error_type,
            description: description.to_string(),
            native_code: None,
        }
    }

    /// Builds an error from a native status, translating the code through [`translate_status`].
    pub fn from_native(code: u32, description: impl ToString) -> Self {
        Self {
            error_type: translate_status(code),
            description: description.to_string(),
            native_code: Some(code),
        }
    }

    pub fn kind(&self) -> ErrorKind {
        self.error_type
    }

    pub fn native_code(&self) -> Option<u32> {
        self.native_code
    }

    /// `true` when domain enumeration should be skipped rather than treated as fatal.
    pub fn is_not_joined(&self) -> bool {
        self.error_type == ErrorKind::NotJoined
    }
}

impl error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.native_code {
            Some(code) => write!(f, "{:?}: {} (0x{:08X})", self.error_type, self.description, code),
            None => write!(f, "{:?}: {}", self.error_type, self.description),
        }
    }
}

impl From<NativeError> for Error {
    fn from(err: NativeError) -> Self {
        let description = match err.message {
            Some(message) => message,
            None => NativeStatus::from_u32(err.code)
                .map(|status| status.description().to_owned())
                .unwrap_or_else(|| format!("native status 0x{:08X}", err.code)),
        };

        Self::from_native(err.code, description)
    }
}

impl From<SidError> for Error {
    fn from(err: SidError) -> Self {
        Self::new(ErrorKind::Internal, err)
    }
}

impl From<UsernameError> for Error {
    fn from(err: UsernameError) -> Self {
        Self::new(ErrorKind::Lookup, err)
    }
}

impl<T> From<PoisonError<T>> for Error {
    fn from(_: PoisonError<T>) -> Self {
        Self::new(ErrorKind::Internal, "can not lock the security context store")
    }
}

impl From<Error> for io::Error {
    fn from(err: Error) -> io::Error {
        io::Error::other(format!("{:?}: {}", err.error_type, err.description))
    }
}
