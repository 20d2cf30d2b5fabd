//! Random token material for remote-channel sessions.

use rand::RngCore;
use sha2::{Digest, Sha256};

/// Fills a buffer of `len` bytes from the CSPRNG.
pub fn random_bytes(len: usize) -> Vec<u8> {
    let mut buf = vec![0u8; len];
    rand::rng().fill_bytes(&mut buf);
    buf
}

/// 32 random bytes passed through SHA-256, hex-encoded. The raw random
/// value is never exposed.
pub fn hashed_random_token() -> String {
    let raw = zeroize::Zeroizing::new(random_bytes(32));
    hex::encode(Sha256::digest(raw.as_slice()))
}
