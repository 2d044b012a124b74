use thiserror::Error;

pub type CryptoResult<T> = Result<T, CryptoError>;

#[derive(Debug, Error)]
pub enum CryptoError {
    /// Tag mismatch. Carries no detail.
    #[error("authentication failed")]
    AuthenticationFailure,

    #[error("invalid KDF parameters: {0}")]
    InvalidKdfParams(String),

    #[error("KDF parameters below the minimum profile: {0}")]
    WeakKdfParams(String),

    #[error("unknown KDF profile: {0}")]
    UnknownProfile(String),

    #[error("invalid {what} length: expected {expected} bytes, got {actual}")]
    InvalidLength {
        what: &'static str,
        expected: usize,
        actual: usize,
    },

    #[error("{0} failed")]
    Primitive(&'static str),
}
