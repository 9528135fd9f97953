//! Test doubles shared by the integration tests.

#![allow(dead_code)]

use std::sync::atomic::{AtomicUsize, Ordering};

use crypt::provider::Failure;
use crypt::{CryptError, EntropySource, KeyId, KeyProvider};
use zeroize::Zeroizing;

/// Length of the key fingerprint prefixed to every wrapped blob.
const FINGERPRINT_LEN: usize = 8;

/// Wraps by XOR with a fixed pad; the blob carries a fingerprint of the key
/// it was wrapped under, so unwrapping with another key is rejected.
#[derive(Debug)]
pub struct XorPadProvider {
    name: &'static str,
    pad: [u8; 32],
    pub wraps: AtomicUsize,
    pub unwraps: AtomicUsize,
}

impl XorPadProvider {
    pub fn new(name: &'static str, pad: [u8; 32]) -> Self {
        Self {
            name,
            pad,
            wraps: AtomicUsize::new(0),
            unwraps: AtomicUsize::new(0),
        }
    }

    fn fingerprint(&self, key: &KeyId) -> [u8; FINGERPRINT_LEN] {
        // FNV-1a over provider tag and key id.
        let mut hash: u64 = 0xcbf2_9ce4_8422_2325;
        for b in self.name.bytes().chain(key.as_str().bytes()) {
            hash ^= u64::from(b);
            hash = hash.wrapping_mul(0x0100_0000_01b3);
        }
        hash.to_be_bytes()
    }

    fn xor(&self, data: &[u8]) -> Vec<u8> {
        data.iter()
            .zip(self.pad.iter().cycle())
            .map(|(d, p)| d ^ p)
            .collect()
    }
}

impl Default for XorPadProvider {
    fn default() -> Self {
        Self::new("xor", [0xA5; 32])
    }
}

impl KeyProvider for XorPadProvider {
    fn name(&self) -> &'static str {
        self.name
    }

    fn max_wrap_len(&self) -> usize {
        64
    }

    async fn wrap(&self, key: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        if plaintext.len() > self.max_wrap_len() {
            return Err(CryptError::Usage("too large to wrap".into()));
        }
        self.wraps.fetch_add(1, Ordering::SeqCst);
        let mut blob = self.fingerprint(key).to_vec();
        blob.extend(self.xor(plaintext));
        Ok(blob)
    }

    async fn unwrap(&self, key: &KeyId, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        self.unwraps.fetch_add(1, Ordering::SeqCst);
        if wrapped.len() < FINGERPRINT_LEN || wrapped[..FINGERPRINT_LEN] != self.fingerprint(key) {
            return Err(Failure::Rejected.into_error(self.name, "blob not wrapped by this key"));
        }
        Ok(Zeroizing::new(self.xor(&wrapped[FINGERPRINT_LEN..])))
    }
}

/// Fails every call with the configured class.
#[derive(Debug, Clone, Copy)]
pub struct FailingProvider(pub Failure);

impl KeyProvider for FailingProvider {
    fn name(&self) -> &'static str {
        "xor"
    }

    fn max_wrap_len(&self) -> usize {
        64
    }

    async fn wrap(&self, _key: &KeyId, _plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        Err(self.0.into_error("xor", "injected wrap failure"))
    }

    async fn unwrap(&self, _key: &KeyId, _wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        Err(self.0.into_error("xor", "injected unwrap failure"))
    }
}

/// Hands out a fixed data key and a fixed nonce, told apart by buffer size.
#[derive(Debug, Clone, Copy)]
pub struct FixedEntropy {
    pub key: [u8; 32],
    pub nonce: [u8; 12],
}

impl EntropySource for FixedEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptError> {
        match dest.len() {
            32 => dest.copy_from_slice(&self.key),
            12 => dest.copy_from_slice(&self.nonce),
            n => return Err(CryptError::Crypto(format!("unexpected draw of {n} bytes"))),
        }
        Ok(())
    }
}

pub fn key(id: &str) -> KeyId {
    KeyId::new(id).unwrap()
}
