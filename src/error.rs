//! Error types, in the hand-written `Display`/`Error` style already used by
//! the reader this crate is built from — no `thiserror`/`anyhow`.

use std::fmt;
use std::io;

/// Error type for [`crate::Database::open`] and friends.
#[derive(Debug)]
#[non_exhaustive]
pub enum OpenError {
    /// Error opening the database file.
    Open(io::Error),
    /// Error memory-mapping the database file.
    Mmap(io::Error),
    /// Magic mismatch, or the file is too short to contain one.
    NotADatabase,
    /// The file declares a version this implementation does not understand.
    UnsupportedVersion(u16),
    /// A section's offset/length lies outside the file, overlaps another
    /// section, or a sorted table is not actually sorted.
    InvalidData(&'static str),
}

impl fmt::Display for OpenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        use OpenError::*;
        match self {
            Open(e) => write!(f, "error opening database file: {e}"),
            Mmap(e) => write!(f, "error memory-mapping database file: {e}"),
            NotADatabase => "not a location database".fmt(f),
            UnsupportedVersion(v) => write!(f, "unsupported database version {v}"),
            InvalidData(why) => write!(f, "corrupt database: {why}"),
        }
    }
}

impl std::error::Error for OpenError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            OpenError::Open(e) | OpenError::Mmap(e) => Some(e),
            OpenError::NotADatabase | OpenError::UnsupportedVersion(_) | OpenError::InvalidData(_) => None,
        }
    }
}

/// Error type for [`crate::Database::verify`].
#[derive(Debug)]
#[non_exhaustive]
pub enum VerifyError {
    /// Neither signature slot is populated.
    NoSignature,
    /// A signature is present but does not verify against the given key, or
    /// the supplied public key could not be parsed.
    BadSignature,
}

impl fmt::Display for VerifyError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VerifyError::NoSignature => "database carries no signature".fmt(f),
            VerifyError::BadSignature => "signature verification failed".fmt(f),
        }
    }
}

impl std::error::Error for VerifyError {}

/// Error type for [`crate::Writer`] methods.
#[derive(Debug)]
#[non_exhaustive]
pub enum WriteError {
    /// A caller-supplied record was malformed.
    InvalidArgument(String),
    /// An AS number or country code was added more than once.
    Duplicate,
    /// A version was requested that this implementation cannot emit.
    UnsupportedVersion(u16),
    /// The sink failed while being written to.
    IOError(io::Error),
    /// The writer has already been sealed by a successful [`crate::Writer::write`]
    /// and can no longer accept mutation or another `write`.
    Sealed,
}

impl fmt::Display for WriteError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            WriteError::InvalidArgument(why) => write!(f, "invalid argument: {why}"),
            WriteError::Duplicate => "duplicate record".fmt(f),
            WriteError::UnsupportedVersion(v) => write!(f, "cannot write database version {v}"),
            WriteError::IOError(e) => write!(f, "write error: {e}"),
            WriteError::Sealed => "writer is sealed; no further mutation or writes are possible".fmt(f),
        }
    }
}

impl std::error::Error for WriteError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            WriteError::IOError(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for WriteError {
    fn from(e: io::Error) -> Self {
        WriteError::IOError(e)
    }
}

/// A malformed IP address or country code supplied by the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InvalidArgument;

impl fmt::Display for InvalidArgument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        "invalid argument".fmt(f)
    }
}

impl std::error::Error for InvalidArgument {}

pub use crate::address::OutOfRange as AddressRangeError;

/// Re-exported for callers who only need the `InvalidArgument` case.
pub type AddressError = InvalidArgument;
