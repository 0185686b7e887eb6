//! Handshake error types

use thiserror::Error;

/// Errors raised while checking a client's handshake response
#[derive(Debug, Error)]
pub enum HandshakeError {
    #[error("malformed auth response: expected {expected} bytes, got {actual}")]
    MalformedResponse { expected: usize, actual: usize },

    #[error("empty nonce")]
    EmptyNonce,
}
