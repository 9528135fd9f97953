//! AES-256-GCM-SIV encryption and decryption of whole payloads.
//!
//! **Algorithm choice:** AES-256-GCM-SIV (RFC 8452) is nonce-misuse-resistant.
//! Every encryption still uses a fresh key and a fresh random nonce; SIV only
//! limits the damage should an entropy source ever repeat.
//!
//! Output layout is `ciphertext || tag`; the nonce travels separately in the
//! container.

use aes_gcm_siv::{
    aead::{Aead, KeyInit, Payload},
    Aes256GcmSiv, Nonce,
};

use common::CryptError;

use super::entropy::{EntropySource, OsEntropy};
use super::NONCE_LEN;
use crate::dek::DataKey;

/// Byte length of an AES-256 key (32 bytes = 256 bits).
pub const KEY_LEN: usize = 32;

/// Result of one encryption: the fresh key, its nonce and the ciphertext.
///
/// Dropping this value zeroes the key.
#[derive(Debug)]
pub struct Sealed {
    /// The data key that must now be wrapped by a provider.
    pub data_key: DataKey,
    /// The nonce used for this encryption.
    pub nonce: [u8; NONCE_LEN],
    /// Ciphertext followed by the 16-byte authentication tag.
    pub ciphertext: Vec<u8>,
}

/// Local authenticated encryption with a fresh data key per call.
#[derive(Debug, Clone, Default)]
pub struct EnvelopeCipher<E = OsEntropy> {
    entropy: E,
}

impl EnvelopeCipher<OsEntropy> {
    /// Cipher backed by the OS CSPRNG.
    pub fn new() -> Self {
        Self { entropy: OsEntropy }
    }
}

impl<E: EntropySource> EnvelopeCipher<E> {
    /// Cipher drawing keys and nonces from `entropy`.
    pub fn with_entropy(entropy: E) -> Self {
        Self { entropy }
    }

    /// Encrypt `plaintext` under a newly generated key and nonce, binding `aad`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Crypto`] if the entropy source or the AEAD
    /// primitive fails. No key or ciphertext escapes on error.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Sealed, CryptError> {
        let data_key = DataKey::generate(&self.entropy)?;

        let mut nonce = [0u8; NONCE_LEN];
        self.entropy.fill(&mut nonce)?;

        let ciphertext = build_cipher(&data_key)?
            .encrypt(
                Nonce::from_slice(&nonce),
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| CryptError::Crypto("aead encryption failed".into()))?;

        Ok(Sealed {
            data_key,
            nonce,
            ciphertext,
        })
    }

    /// Decrypt and authenticate `ciphertext` (including its tag).
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Integrity`] if the tag does not verify for this
    /// key, nonce and `aad`. The error carries no detail about where the
    /// mismatch is.
    pub fn decrypt(
        &self,
        data_key: &DataKey,
        nonce: &[u8; NONCE_LEN],
        ciphertext: &[u8],
        aad: &[u8],
    ) -> Result<Vec<u8>, CryptError> {
        build_cipher(data_key)?
            .decrypt(
                Nonce::from_slice(nonce),
                Payload {
                    msg: ciphertext,
                    aad,
                },
            )
            .map_err(|_| CryptError::Integrity)
    }
}

fn build_cipher(data_key: &DataKey) -> Result<Aes256GcmSiv, CryptError> {
    Aes256GcmSiv::new_from_slice(data_key.as_bytes())
        .map_err(|_| CryptError::Crypto("invalid AES-256 key length".into()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::entropy::MockEntropySource;
    use crate::crypto::TAG_LEN;
    use common::ErrorKind;

    const AAD: &[u8] = b"header";

    #[test]
    fn encrypt_decrypt_round_trip() {
        let cipher = EnvelopeCipher::new();
        let sealed = cipher.encrypt(b"123-45-6789", AAD).unwrap();
        let plain = cipher
            .decrypt(&sealed.data_key, &sealed.nonce, &sealed.ciphertext, AAD)
            .unwrap();
        assert_eq!(plain, b"123-45-6789");
    }

    #[test]
    fn empty_plaintext_is_just_a_tag() {
        let cipher = EnvelopeCipher::new();
        let sealed = cipher.encrypt(b"", AAD).unwrap();
        assert_eq!(sealed.ciphertext.len(), TAG_LEN);
        let plain = cipher
            .decrypt(&sealed.data_key, &sealed.nonce, &sealed.ciphertext, AAD)
            .unwrap();
        assert!(plain.is_empty());
    }

    #[test]
    fn fresh_key_and_nonce_per_call() {
        let cipher = EnvelopeCipher::new();
        let a = cipher.encrypt(b"same", AAD).unwrap();
        let b = cipher.encrypt(b"same", AAD).unwrap();
        assert_ne!(a.data_key.as_bytes(), b.data_key.as_bytes());
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.ciphertext, b.ciphertext);
    }

    #[test]
    fn wrong_key_fails_with_integrity() {
        let cipher = EnvelopeCipher::new();
        let sealed = cipher.encrypt(b"secret", AAD).unwrap();
        let other = DataKey::from_slice(&[9u8; KEY_LEN]).unwrap();
        let err = cipher
            .decrypt(&other, &sealed.nonce, &sealed.ciphertext, AAD)
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
    }

    #[test]
    fn wrong_aad_fails_with_integrity() {
        let cipher = EnvelopeCipher::new();
        let sealed = cipher.encrypt(b"secret", AAD).unwrap();
        assert!(matches!(
            cipher.decrypt(&sealed.data_key, &sealed.nonce, &sealed.ciphertext, b"other"),
            Err(CryptError::Integrity)
        ));
    }

    #[test]
    fn any_flipped_bit_fails() {
        let cipher = EnvelopeCipher::new();
        let sealed = cipher.encrypt(b"tamper me", AAD).unwrap();
        for i in 0..sealed.ciphertext.len() {
            let mut ct = sealed.ciphertext.clone();
            ct[i] ^= 0x01;
            assert!(matches!(
                cipher.decrypt(&sealed.data_key, &sealed.nonce, &ct, AAD),
                Err(CryptError::Integrity)
            ));
        }
        for i in 0..NONCE_LEN {
            let mut nonce = sealed.nonce;
            nonce[i] ^= 0x80;
            assert!(cipher
                .decrypt(&sealed.data_key, &nonce, &sealed.ciphertext, AAD)
                .is_err());
        }
    }

    #[test]
    fn draws_key_then_nonce_from_entropy() {
        let mut entropy = MockEntropySource::new();
        let mut seq = mockall::Sequence::new();
        entropy
            .expect_fill()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|dest| {
                assert_eq!(dest.len(), KEY_LEN);
                dest.fill(0x11);
                Ok(())
            });
        entropy
            .expect_fill()
            .times(1)
            .in_sequence(&mut seq)
            .returning(|dest| {
                assert_eq!(dest.len(), NONCE_LEN);
                dest.fill(0x22);
                Ok(())
            });

        let cipher = EnvelopeCipher::with_entropy(entropy);
        let sealed = cipher.encrypt(b"pinned", AAD).unwrap();
        assert_eq!(sealed.data_key.as_bytes(), &[0x11u8; KEY_LEN]);
        assert_eq!(sealed.nonce, [0x22u8; NONCE_LEN]);
    }

    #[test]
    fn entropy_failure_is_crypto_error() {
        let mut entropy = MockEntropySource::new();
        entropy
            .expect_fill()
            .returning(|_| Err(CryptError::Crypto("no entropy".into())));
        let cipher = EnvelopeCipher::with_entropy(entropy);
        let err = cipher.encrypt(b"x", AAD).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Crypto);
    }
}
