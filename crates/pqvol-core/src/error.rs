use std::path::PathBuf;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("reading config {path}: {source}")]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("parsing config: {0}")]
    Parse(#[from] toml::de::Error),
}

/// Coarse classification of an engine error, for callers that only need to
/// decide how to react (report, retry, re-prompt).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Container is not a recognisable volume (bad magic, version, hash, layout)
    Format,
    /// Credentials rejected or ciphertext failed authentication
    Authentication,
    /// Environmental: disk space, locks, I/O
    Resource,
    /// Caller misuse: bad state, bounds, arguments, profiles
    Usage,
    /// Unexpected primitive or backend failure
    Internal,
}

impl ErrorKind {
    /// Only environmental failures may succeed on retry.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::Resource)
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ErrorKind::Format => "format",
            ErrorKind::Authentication => "authentication",
            ErrorKind::Resource => "resource",
            ErrorKind::Usage => "usage",
            ErrorKind::Internal => "internal",
        };
        f.write_str(s)
    }
}
