//! The envelope engine: local AEAD encryption plus remote key wrapping.
//!
//! [`Crypt`] is written once against [`KeyProvider`]. Every operation
//! generates a fresh [`DataKey`](crate::dek::DataKey) and nonce, encrypts
//! locally, and asks the provider to wrap only the 32-byte key.
//!
//! # Invariants
//!
//! - No operation produces partial output: a failed encrypt yields no
//!   container, a failed decrypt yields no plaintext.
//! - The container header (magic through key id) is bound into the AEAD tag.
//! - Provider calls are bounded by [`Crypt::timeout`]; an elapsed call is
//!   reported as [`CryptError::ProviderTransient`].
//! - No retries and no caching of unwrapped keys.

pub mod batch;
pub mod files;

use std::future::Future;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::debug;
use zeroize::Zeroizing;

use common::container::header_aad;
use common::{Container, CryptError, KeyId, ResultExt};

use crate::crypto::{EntropySource, EnvelopeCipher, OsEntropy};
use crate::dek::DataKey;
use crate::provider::KeyProvider;

pub use batch::{BatchFailure, BatchReport};

/// Default bound on a single provider call.
pub const DEFAULT_PROVIDER_TIMEOUT: Duration = Duration::from_secs(30);

/// Envelope encryption against one provider.
///
/// `Crypt` holds no mutable state and is `Send + Sync` whenever its provider
/// is; share it across tasks with an `Arc`.
#[derive(Debug, Clone)]
pub struct Crypt<P, E = OsEntropy> {
    provider: P,
    cipher: EnvelopeCipher<E>,
    timeout: Duration,
    cancel: CancellationToken,
}

impl<P: KeyProvider> Crypt<P> {
    /// Engine using `provider` and the OS CSPRNG.
    pub fn new(provider: P) -> Self {
        Self::with_cipher(provider, EnvelopeCipher::new())
    }
}

impl<P: KeyProvider, E: EntropySource> Crypt<P, E> {
    /// Engine using `provider` and a caller-supplied cipher.
    pub fn with_cipher(provider: P, cipher: EnvelopeCipher<E>) -> Self {
        Self {
            provider,
            cipher,
            timeout: DEFAULT_PROVIDER_TIMEOUT,
            cancel: CancellationToken::new(),
        }
    }

    /// Replace the per-call provider timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Stop directory runs when `cancel` fires.
    ///
    /// In-flight jobs are aborted and their temporary files removed before
    /// [`encrypt_dir`](Self::encrypt_dir) or [`decrypt_dir`](Self::decrypt_dir)
    /// returns.
    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    /// The provider this engine wraps keys with.
    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Bound on a single provider call.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Encrypt `plaintext` and wrap its data key under `key`.
    ///
    /// # Errors
    ///
    /// - [`CryptError::Crypto`] if key or nonce generation fails
    /// - any provider error from wrapping, including a timeout
    pub async fn encrypt_bytes(&self, plaintext: &[u8], key: &KeyId) -> Result<Container, CryptError> {
        let provider = self.provider.name();
        let aad = header_aad(provider, key);
        let sealed = self.cipher.encrypt(plaintext, &aad)?;

        let wrapped = self
            .bounded("wrapping data key", self.provider.wrap(key, sealed.data_key.as_bytes()))
            .await?;

        let container = Container::new(provider, key.clone(), wrapped, sealed.nonce, sealed.ciphertext)?;
        debug!(
            provider,
            key_id = %key,
            plaintext_len = plaintext.len(),
            wrapped_key_len = container.wrapped_key().len(),
            "sealed envelope"
        );
        Ok(container)
    }

    /// Unwrap the data key of `container` and decrypt its payload.
    ///
    /// # Errors
    ///
    /// - [`CryptError::ProviderMismatch`] if another provider sealed it
    /// - [`CryptError::KeyMismatch`] if it was sealed under another key
    /// - any provider error from unwrapping, including a timeout
    /// - [`CryptError::InvalidDataKey`] if the provider returns a key of the wrong size
    /// - [`CryptError::Integrity`] if any part of the container was altered
    pub async fn decrypt_bytes(&self, container: &Container, key: &KeyId) -> Result<Vec<u8>, CryptError> {
        let provider = self.provider.name();
        if container.provider() != provider {
            return Err(CryptError::ProviderMismatch {
                expected: provider.to_owned(),
                found: container.provider().to_owned(),
            });
        }
        if container.key_id() != key {
            return Err(CryptError::KeyMismatch {
                expected: key.to_string(),
                found: container.key_id().to_string(),
            });
        }

        let raw = self
            .bounded("unwrapping data key", self.provider.unwrap(key, container.wrapped_key()))
            .await?;
        let data_key = DataKey::from_slice(&raw)?;
        drop(raw);

        let plaintext = self.cipher.decrypt(
            &data_key,
            container.nonce(),
            container.ciphertext(),
            &container.aad(),
        )?;
        debug!(provider, key_id = %key, plaintext_len = plaintext.len(), "opened envelope");
        Ok(plaintext)
    }

    /// [`encrypt_bytes`](Self::encrypt_bytes), encoded to the binary format.
    pub async fn seal(&self, plaintext: &[u8], key: &KeyId) -> Result<Vec<u8>, CryptError> {
        Ok(self.encrypt_bytes(plaintext, key).await?.encode())
    }

    /// Parse a binary or armored container and decrypt it.
    pub async fn open(&self, bytes: &[u8], key: &KeyId) -> Result<Vec<u8>, CryptError> {
        let container = Container::parse(bytes)?;
        self.decrypt_bytes(&container, key).await
    }

    /// Encrypt a string to an armored (base64) container.
    pub async fn encrypt_string(&self, plaintext: &str, key: &KeyId) -> Result<String, CryptError> {
        Ok(self.encrypt_bytes(plaintext.as_bytes(), key).await?.to_armored())
    }

    /// Decrypt an armored container back to a string.
    ///
    /// # Errors
    ///
    /// As [`decrypt_bytes`](Self::decrypt_bytes), plus [`CryptError::Usage`]
    /// if the plaintext is not UTF-8.
    pub async fn decrypt_string(&self, armored: &str, key: &KeyId) -> Result<String, CryptError> {
        let plaintext = self.open(armored.as_bytes(), key).await?;
        String::from_utf8(plaintext).map_err(|e| {
            drop(Zeroizing::new(e.into_bytes()));
            CryptError::Usage("decrypted payload is not valid UTF-8; use byte or file mode".into())
        })
    }

    async fn bounded<T, F>(&self, step: &'static str, call: F) -> Result<T, CryptError>
    where
        F: Future<Output = Result<T, CryptError>>,
    {
        match tokio::time::timeout(self.timeout, call).await {
            Ok(result) => result.with_context(|| step),
            Err(_) => Err(CryptError::ProviderTransient {
                provider: self.provider.name(),
                message: format!("{step} timed out after {}s", self.timeout.as_secs_f64()),
            }),
        }
    }
}
