//! Per-operation Data Encryption Key.
//!
//! # Security invariants
//!
//! - A [`DataKey`] is generated fresh for every encryption and never reused.
//! - The plaintext key is **never** written to disk, logged, or included in traces.
//! - Key bytes are zeroed when the value is dropped, including on error and
//!   cancellation paths.

use zeroize::Zeroize;

use common::CryptError;

use crate::crypto::{EntropySource, KEY_LEN};

/// Fixed-size AES-256 key that holds exactly [`KEY_LEN`] bytes.
///
/// Deliberately not `Clone`: the only copy lives with the operation that
/// created or unwrapped it.
pub struct DataKey(Box<[u8; KEY_LEN]>);

impl DataKey {
    /// Draw a fresh key from `entropy`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Crypto`] if the entropy source fails.
    pub fn generate<E: EntropySource + ?Sized>(entropy: &E) -> Result<Self, CryptError> {
        let mut buf = Box::new([0u8; KEY_LEN]);
        entropy.fill(&mut buf[..])?;
        Ok(Self(buf))
    }

    /// Copy key material returned by a provider.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::InvalidDataKey`] if `bytes` is not [`KEY_LEN`] long.
    pub fn from_slice(bytes: &[u8]) -> Result<Self, CryptError> {
        if bytes.len() != KEY_LEN {
            return Err(CryptError::InvalidDataKey(bytes.len()));
        }
        let mut buf = Box::new([0u8; KEY_LEN]);
        buf.copy_from_slice(bytes);
        Ok(Self(buf))
    }

    /// Borrow the raw key bytes.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.0
    }
}

impl Drop for DataKey {
    fn drop(&mut self) {
        self.0.zeroize();
    }
}

impl std::fmt::Debug for DataKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Never print key material, not even in debug builds.
        f.write_str("DataKey([REDACTED])")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::OsEntropy;

    #[test]
    fn generated_keys_differ() {
        let a = DataKey::generate(&OsEntropy).unwrap();
        let b = DataKey::generate(&OsEntropy).unwrap();
        assert_ne!(a.as_bytes(), b.as_bytes());
    }

    #[test]
    fn from_slice_rejects_wrong_length() {
        let err = DataKey::from_slice(&[0u8; 16]).unwrap_err();
        assert!(matches!(err, CryptError::InvalidDataKey(16)));
        assert!(DataKey::from_slice(&[]).is_err());
    }

    #[test]
    fn from_slice_copies_bytes() {
        let key = DataKey::from_slice(&[0x42u8; KEY_LEN]).unwrap();
        assert_eq!(&key.as_bytes()[..], &[0x42u8; KEY_LEN][..]);
    }

    #[test]
    fn redacted_in_debug() {
        let key = DataKey::from_slice(&[0xFFu8; KEY_LEN]).unwrap();
        let shown = format!("{key:?}");
        assert!(shown.contains("REDACTED"));
        assert!(!shown.contains("255"));
    }
}
