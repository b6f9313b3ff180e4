// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Pluggable AEAD interface (§6) and the default `ring`-backed
//! implementation.

pub mod aes_gcm;

pub use aes_gcm::RingAeadProvider;

use crate::error::{Error, Result};

/// Symmetric AEAD, keyed by a 32-bit nonce the caller guarantees is
/// unique per key (§4.4/§8.6). Implementations report authentication
/// failure as [`Error::AuthFail`], never by panicking.
pub trait Aead: Send + Sync {
    /// Seal `plaintext` under `key`, authenticating `aad`, using `nonce`
    /// as the (implementation-defined) IV derivation input. Returns
    /// ciphertext with the authentication tag appended.
    fn seal(&self, key: &[u8], nonce: u32, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>>;

    /// Open a buffer produced by [`Aead::seal`] with the same key, nonce,
    /// and AAD. Returns [`Error::AuthFail`] on tag mismatch.
    fn open(&self, key: &[u8], nonce: u32, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>>;
}

pub(crate) fn require_key_len(key: &[u8], expected: usize) -> Result<()> {
    if key.len() != expected {
        return Err(Error::Config(format!(
            "AEAD key must be {expected} bytes, got {}",
            key.len()
        )));
    }
    Ok(())
}
