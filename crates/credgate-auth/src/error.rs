//! Credential provider error types

use thiserror::Error;

/// Result type for provider lookups
pub type ProviderResult<T> = Result<T, ProviderError>;

/// Store-level failures.
///
/// "User not found" is never an error: lookups express it as `Ok(false)`
/// or `Ok(None)`. Anything in this enum must make the authentication
/// attempt fail closed.
#[derive(Debug, Error)]
pub enum ProviderError {
    #[error("credential store unavailable: {0}")]
    Unavailable(String),

    #[error("credential lookup timed out")]
    Timeout,

    #[error("credential store corrupted: {0}")]
    Corrupted(String),

    #[error("credential store I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("provider configuration error: {0}")]
    Config(String),
}

impl ProviderError {
    /// Whether retrying the same lookup later could succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout | Self::Io(_))
    }
}
