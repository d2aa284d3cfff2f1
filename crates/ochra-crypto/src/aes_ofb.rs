//! AES-256 in OFB mode, wrapping a session's transport byte stream.
//!
//! Per §4.4, each direction of a session keeps its own keystream, seeded
//! from a 32-byte session key with an all-zero 16-byte IV, and is applied
//! to the raw bytes flowing over the reliable-UDP stream — the signature on
//! each msgpack packet is independently verifiable regardless of this
//! transport-level wrapping.

use cipher::{KeyIvInit, StreamCipher};

use crate::Result;

type AesOfb = ofb::Ofb<aes::Aes256>;

/// The all-zero IV mandated by §4.4 for both directions of a session.
const ZERO_IV: [u8; 16] = [0u8; 16];

/// One direction of a session's AES-OFB keystream.
pub struct OfbStream {
    cipher: AesOfb,
}

impl OfbStream {
    /// Seed a fresh keystream from a 32-byte session key.
    pub fn new(key: &[u8; 32]) -> Self {
        Self {
            cipher: AesOfb::new(key.into(), &ZERO_IV.into()),
        }
    }

    /// XOR `buf` in place with the next portion of the keystream. OFB is
    /// symmetric: the same call encrypts or decrypts depending on direction.
    pub fn apply(&mut self, buf: &mut [u8]) {
        self.cipher.apply_keystream(buf);
    }
}

/// Generate a fresh random 32-byte session key.
pub fn random_session_key() -> [u8; 32] {
    use rand::RngCore;
    let mut key = [0u8; 32];
    rand::thread_rng().fill_bytes(&mut key);
    key
}

/// Convenience one-shot wrapper for tests and short messages: returns a new
/// buffer rather than mutating in place.
pub fn apply_keystream(key: &[u8; 32], data: &[u8]) -> Result<Vec<u8>> {
    let mut stream = OfbStream::new(key);
    let mut buf = data.to_vec();
    stream.apply(&mut buf);
    Ok(buf)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_roundtrip() {
        let key = random_session_key();
        let plaintext = b"the quick brown fox jumps over the lazy dog";

        let mut enc = OfbStream::new(&key);
        let mut ciphertext = plaintext.to_vec();
        enc.apply(&mut ciphertext);
        assert_ne!(ciphertext, plaintext);

        let mut dec = OfbStream::new(&key);
        let mut recovered = ciphertext.clone();
        dec.apply(&mut recovered);
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn test_continuous_stream_matches_split_calls() {
        let key = random_session_key();
        let data = vec![0xABu8; 64];

        let mut whole = OfbStream::new(&key);
        let mut whole_buf = data.clone();
        whole.apply(&mut whole_buf);

        let mut split = OfbStream::new(&key);
        let mut split_buf = data;
        split.apply(&mut split_buf[..32]);
        split.apply(&mut split_buf[32..]);

        assert_eq!(whole_buf, split_buf);
    }

    #[test]
    fn test_different_keys_diverge() {
        let plaintext = [0u8; 32];
        let a = apply_keystream(&[1u8; 32], &plaintext).expect("apply");
        let b = apply_keystream(&[2u8; 32], &plaintext).expect("apply");
        assert_ne!(a, b);
    }
}
