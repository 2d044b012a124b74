use std::io;
use std::path::PathBuf;

use pqvol_core::{ErrorKind, VolumeState};
use pqvol_crypto::CryptoError;
use pqvol_keywrap::KeyWrapError;
use thiserror::Error;

pub type VolumeResult<T> = Result<T, VolumeError>;

/// Structural problems with a container, detected before any password is used.
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("not a pqvol container (bad magic)")]
    BadMagic,

    #[error("unsupported container version {0}")]
    UnsupportedVersion(u16),

    #[error("header hash mismatch: header is corrupted")]
    HeaderHashMismatch,

    #[error("container truncated: expected {expected} bytes, found {actual}")]
    Truncated { expected: u64, actual: u64 },

    #[error("unsupported {field} algorithm id {id}")]
    UnsupportedAlgorithm { field: &'static str, id: u16 },

    #[error("malformed header: {0}")]
    Malformed(String),
}

/// Credential or integrity failure. Both variants render identically so the
/// message never reveals which check failed.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("authentication failed")]
    WrongPassword,

    #[error("authentication failed")]
    TamperDetected,
}

#[derive(Debug, Error)]
pub enum ResourceError {
    #[error("insufficient space for container")]
    InsufficientSpace,

    #[error("flush failed: {0}")]
    FlushError(#[source] io::Error),

    #[error("container is already mounted")]
    AlreadyMounted,

    #[error("path already exists: {0}")]
    PathExists(PathBuf),

    #[error("I/O error: {0}")]
    Io(#[source] io::Error),
}

impl From<io::Error> for ResourceError {
    fn from(e: io::Error) -> Self {
        match e.kind() {
            io::ErrorKind::StorageFull
            | io::ErrorKind::FileTooLarge
            | io::ErrorKind::QuotaExceeded => ResourceError::InsufficientSpace,
            _ => ResourceError::Io(e),
        }
    }
}

#[derive(Debug, Error)]
pub enum VolumeError {
    #[error(transparent)]
    Format(#[from] FormatError),

    #[error(transparent)]
    Authentication(#[from] AuthFailure),

    #[error("key wrap: {0}")]
    KeyWrap(#[from] KeyWrapError),

    #[error(transparent)]
    Resource(#[from] ResourceError),

    #[error("KDF parameters below the minimum profile: {0}")]
    WeakKdfParams(String),

    #[error("unknown KDF profile: {0}")]
    UnknownProfile(String),

    #[error("operation not valid while volume is {0}")]
    InvalidState(VolumeState),

    #[error("volume is not mounted")]
    NotMounted,

    #[error("range {offset}+{length} exceeds volume size {size}")]
    OutOfBounds { offset: u64, length: u64, size: u64 },

    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("crypto error: {0}")]
    Crypto(CryptoError),
}

impl From<CryptoError> for VolumeError {
    fn from(e: CryptoError) -> Self {
        match e {
            CryptoError::WeakKdfParams(msg) => VolumeError::WeakKdfParams(msg),
            CryptoError::UnknownProfile(name) => VolumeError::UnknownProfile(name),
            other => VolumeError::Crypto(other),
        }
    }
}

impl From<io::Error> for VolumeError {
    fn from(e: io::Error) -> Self {
        VolumeError::Resource(e.into())
    }
}

impl VolumeError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            VolumeError::Format(_) => ErrorKind::Format,
            VolumeError::Authentication(_) => ErrorKind::Authentication,
            VolumeError::Resource(_) => ErrorKind::Resource,
            VolumeError::WeakKdfParams(_)
            | VolumeError::UnknownProfile(_)
            | VolumeError::InvalidState(_)
            | VolumeError::NotMounted
            | VolumeError::OutOfBounds { .. }
            | VolumeError::InvalidArgument(_) => ErrorKind::Usage,
            VolumeError::KeyWrap(_) | VolumeError::Crypto(_) => ErrorKind::Internal,
        }
    }

    /// Only resource errors may succeed on retry; crypto failures never do.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    pub(crate) fn wrong_password() -> Self {
        VolumeError::Authentication(AuthFailure::WrongPassword)
    }
}
