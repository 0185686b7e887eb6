//! `caching_sha2_password` fast-auth arithmetic
//!
//! The server caches `SHA256(SHA256(password))` per user after a successful
//! full authentication. On later connections the client proves knowledge
//! of the password without sending it:
//!
//! ```text
//! response = SHA256(password) XOR SHA256(SHA256(SHA256(password)) || nonce)
//! ```
//!
//! The server recovers `SHA256(password)` by XOR-ing the response with
//! `SHA256(cached || nonce)` and checks that hashing it again yields the
//! cached digest.

use crate::error::HandshakeError;
use credgate_auth::constant_time_eq;
use rand::RngCore;
use sha2::{Digest, Sha256};

/// Length of the server nonce sent in the initial handshake
pub const NONCE_LEN: usize = 20;

/// Length of a SHA-256 digest
pub const DIGEST_LEN: usize = 32;

/// A SHA-256 digest
pub type Digest32 = [u8; DIGEST_LEN];

/// Generate a handshake nonce.
///
/// Bytes are kept in 1..=127 and never `$`, so the nonce survives
/// NUL-terminated and salt-delimited encodings.
pub fn generate_nonce() -> [u8; NONCE_LEN] {
    let mut nonce = [0u8; NONCE_LEN];
    rand::thread_rng().fill_bytes(&mut nonce);
    for byte in &mut nonce {
        *byte = (*byte & 0x7f).max(1);
        if *byte == b'$' {
            *byte += 1;
        }
    }
    nonce
}

fn sha256(parts: &[&[u8]]) -> Digest32 {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// `SHA256(SHA256(password))`, the value the server caches
pub fn stage2_digest(password: &[u8]) -> Digest32 {
    let stage1 = sha256(&[password]);
    sha256(&[&stage1])
}

/// The client's fast-auth response for `password` and `nonce`
pub fn scramble_response(password: &[u8], nonce: &[u8]) -> Digest32 {
    let stage1 = sha256(&[password]);
    let stage2 = sha256(&[&stage1]);
    let mask = sha256(&[&stage2, nonce]);
    xor(&stage1, &mask)
}

/// Check a fast-auth `response` against a cached stage-2 digest
pub fn verify_fast(
    stage2: &Digest32,
    nonce: &[u8],
    response: &[u8],
) -> Result<bool, HandshakeError> {
    if nonce.is_empty() {
        return Err(HandshakeError::EmptyNonce);
    }
    let Ok(response) = <&Digest32>::try_from(response) else {
        return Err(HandshakeError::MalformedResponse {
            expected: DIGEST_LEN,
            actual: response.len(),
        });
    };

    let mask = sha256(&[stage2, nonce]);
    let candidate_stage1 = xor(response, &mask);
    let candidate_stage2 = sha256(&[&candidate_stage1]);
    Ok(constant_time_eq(&candidate_stage2, stage2))
}

fn xor(a: &Digest32, b: &Digest32) -> Digest32 {
    let mut out = [0u8; DIGEST_LEN];
    for (i, byte) in out.iter_mut().enumerate() {
        *byte = a[i] ^ b[i];
    }
    out
}
