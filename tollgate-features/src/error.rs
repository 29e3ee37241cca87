//! Error types for flag lookups

use thiserror::Error;

/// Errors raised by a [`crate::FlagStore`]
#[derive(Error, Debug)]
pub enum FlagError {
    /// The store did not answer in time
    #[error("Flag store timed out after {0} ms")]
    Timeout(u64),

    /// The store could not be reached or answered with a server error
    #[error("Flag store unavailable: {0}")]
    Unavailable(String),

    /// The store answered with something that is not a flag
    #[error("Malformed flag payload: {0}")]
    Malformed(String),

    /// Invalid store configuration
    #[error("Configuration error: {0}")]
    Config(String),
}

impl From<reqwest::Error> for FlagError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_decode() {
            FlagError::Malformed(err.to_string())
        } else {
            FlagError::Unavailable(err.to_string())
        }
    }
}

impl From<url::ParseError> for FlagError {
    fn from(err: url::ParseError) -> Self {
        FlagError::Config(err.to_string())
    }
}

/// Result type for flag lookups
pub type FlagResult<T> = Result<T, FlagError>;
