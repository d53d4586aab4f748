//! Payload confidentiality
//!
//! AES-256 in counter mode under a pre-shared key. The 128-bit nonce for a
//! packet is derived from its sequence number (15 zero bytes then the seq),
//! so a receiver can decrypt any frame it manages to parse without an IV on
//! the wire. Counter mode is its own inverse; encrypt and decrypt are the
//! same keystream application.
//!
//! This layer provides confidentiality only. Integrity against accidental
//! corruption comes from the frame checksum, which is not a MAC.

use aes::Aes256;
use cipher::{KeyIvInit, StreamCipher};

type Aes256Ctr = ctr::Ctr128BE<Aes256>;

/// Stateless per-packet cipher keyed by the shared secret.
#[derive(Clone)]
pub struct PayloadCipher {
    key: [u8; 32],
}

impl PayloadCipher {
    pub fn new(key: [u8; 32]) -> Self {
        Self { key }
    }

    /// Big-endian 16-byte nonce whose last byte is the sequence number.
    fn nonce(seq: u8) -> [u8; 16] {
        let mut iv = [0u8; 16];
        iv[15] = seq;
        iv
    }

    /// XOR the keystream for `seq` over `buf` in place.
    pub fn apply(&self, seq: u8, buf: &mut [u8]) {
        let iv = Self::nonce(seq);
        let mut cipher = Aes256Ctr::new(&self.key.into(), &iv.into());
        cipher.apply_keystream(buf);
    }

    /// Convenience: encrypt (or decrypt) owned bytes.
    pub fn transform(&self, seq: u8, mut data: Vec<u8>) -> Vec<u8> {
        self.apply(seq, &mut data);
        data
    }
}

impl std::fmt::Debug for PayloadCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material.
        f.debug_struct("PayloadCipher").finish_non_exhaustive()
    }
}
