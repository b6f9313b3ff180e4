// SPDX-License-Identifier: Apache-2.0 OR MIT

//! Default [`Aead`] implementation: AES-256-GCM via the `ring` crate.
//!
//! The 32-bit session nonce is zero-extended into the 96-bit IV `ring`'s
//! GCM implementation requires; the caller (the secure layer, §4.4) is
//! the component responsible for never reusing a nonce under the same
//! key — this type has no nonce-tracking state of its own.

use super::{require_key_len, Aead};
use crate::error::{Error, Result};
use ring::aead::{Aad, BoundKey, Nonce, NonceSequence, OpeningKey, SealingKey, UnboundKey, AES_256_GCM};
use ring::error::Unspecified;

pub const KEY_LEN: usize = 32;

/// Stateless AES-256-GCM provider, the default `Aead` plugged into the
/// secure layer (§6).
#[derive(Default)]
pub struct RingAeadProvider;

impl RingAeadProvider {
    pub fn new() -> Self {
        Self
    }

    fn iv_from_nonce(nonce: u32) -> [u8; 12] {
        let mut iv = [0u8; 12];
        iv[0..4].copy_from_slice(&nonce.to_be_bytes());
        iv
    }
}

struct FixedNonceSequence(Option<[u8; 12]>);

impl NonceSequence for FixedNonceSequence {
    fn advance(&mut self) -> std::result::Result<Nonce, Unspecified> {
        let bytes = self.0.take().ok_or(Unspecified)?;
        Nonce::try_assume_unique_for_key(&bytes)
    }
}

impl Aead for RingAeadProvider {
    fn seal(&self, key: &[u8], nonce: u32, aad: &[u8], plaintext: &[u8]) -> Result<Vec<u8>> {
        require_key_len(key, KEY_LEN)?;
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| Error::Config("invalid AES-256-GCM key".into()))?;
        let mut sealing = SealingKey::new(unbound, FixedNonceSequence(Some(Self::iv_from_nonce(nonce))));
        let mut in_out = plaintext.to_vec();
        sealing
            .seal_in_place_append_tag(Aad::from(aad), &mut in_out)
            .map_err(|_| Error::AuthFail)?;
        Ok(in_out)
    }

    fn open(&self, key: &[u8], nonce: u32, aad: &[u8], sealed: &[u8]) -> Result<Vec<u8>> {
        require_key_len(key, KEY_LEN)?;
        let unbound = UnboundKey::new(&AES_256_GCM, key)
            .map_err(|_| Error::Config("invalid AES-256-GCM key".into()))?;
        let mut opening = OpeningKey::new(unbound, FixedNonceSequence(Some(Self::iv_from_nonce(nonce))));
        let mut in_out = sealed.to_vec();
        let plaintext = opening
            .open_in_place(Aad::from(aad), &mut in_out)
            .map_err(|_| Error::AuthFail)?;
        Ok(plaintext.to_vec())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn seal_open_round_trip() {
        let aead = RingAeadProvider::new();
        let key = [0x42u8; KEY_LEN];
        let sealed = aead.seal(&key, 7, b"aad", b"hello world").unwrap();
        let opened = aead.open(&key, 7, b"aad", &sealed).unwrap();
        assert_eq!(opened, b"hello world");
    }

    #[test]
    fn wrong_nonce_fails_auth() {
        let aead = RingAeadProvider::new();
        let key = [0x11u8; KEY_LEN];
        let sealed = aead.seal(&key, 1, b"", b"secret").unwrap();
        assert!(matches!(aead.open(&key, 2, b"", &sealed), Err(Error::AuthFail)));
    }

    #[test]
    fn wrong_key_fails_auth() {
        let aead = RingAeadProvider::new();
        let sealed = aead.seal(&[0x01; KEY_LEN], 1, b"", b"secret").unwrap();
        assert!(matches!(
            aead.open(&[0x02; KEY_LEN], 1, b"", &sealed),
            Err(Error::AuthFail)
        ));
    }

    #[test]
    fn tampered_ciphertext_fails_auth() {
        let aead = RingAeadProvider::new();
        let key = [0x33u8; KEY_LEN];
        let mut sealed = aead.seal(&key, 5, b"ctx", b"payload").unwrap();
        sealed[0] ^= 0xFF;
        assert!(matches!(aead.open(&key, 5, b"ctx", &sealed), Err(Error::AuthFail)));
    }

    #[test]
    fn rejects_short_key() {
        let aead = RingAeadProvider::new();
        let result = aead.seal(&[0u8; 10], 1, b"", b"x");
        assert!(result.is_err());
    }
}
