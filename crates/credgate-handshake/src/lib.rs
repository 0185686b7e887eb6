//! credgate Handshake - server-side authentication layer
//!
//! This crate sits between a database server's connection handling and a
//! [`credgate_auth::CredentialProvider`]. It owns the derived-secret cache
//! used by `caching_sha2_password`-style fast authentication and keeps it
//! subscribed to the provider's invalidation source.
//!
//! Packet parsing and network I/O stay with the server; this crate only
//! sees usernames, hosts, nonces and auth responses as bytes.

pub mod authenticator;
pub mod cache;
pub mod error;
pub mod scramble;

pub use authenticator::{AuthOutcome, Authenticator};
pub use cache::{CacheStats, DerivedSecretCache};
pub use error::HandshakeError;
pub use scramble::{Digest32, NONCE_LEN, generate_nonce, scramble_response, stage2_digest};
