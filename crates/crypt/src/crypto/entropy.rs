//! Source of randomness for data keys and nonces.

use aes_gcm_siv::aead::{rand_core::RngCore, OsRng};

use common::CryptError;

/// Fills buffers with cryptographically secure random bytes.
///
/// The cipher draws every data key and nonce through this seam, which lets
/// tests pin both to known values.
#[cfg_attr(test, mockall::automock)]
pub trait EntropySource: Send + Sync {
    /// Fill `dest` completely.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Crypto`] if randomness is unavailable.
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptError>;
}

/// The operating system CSPRNG.
#[derive(Debug, Clone, Copy, Default)]
pub struct OsEntropy;

impl EntropySource for OsEntropy {
    fn fill(&self, dest: &mut [u8]) -> Result<(), CryptError> {
        OsRng
            .try_fill_bytes(dest)
            .map_err(|e| CryptError::Crypto(format!("OS entropy unavailable: {e}")))
    }
}
