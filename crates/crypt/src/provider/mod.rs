//! Key-wrapping providers.
//!
//! Every backend implements [`KeyProvider`], a two-call capability:
//! wrap a data key, unwrap a wrapped key. The envelope layer is written once
//! against the trait and never against a concrete backend.
//!
//! - [`AwsKms`]: AWS KMS through `aws-sdk-kms`
//! - [`GcpKms`]: GCP Cloud KMS through the `gcloud` CLI
//! - [`AzureKeyVault`]: Azure Key Vault through the `az` CLI
//!
//! [`Provider`] picks one of them from [`ProviderSettings`].
//!
//! Only data-key sized material is ever passed to a provider; each backend
//! refuses input above its native ceiling ([`KeyProvider::max_wrap_len`]).

pub mod aws;
pub mod azure;
pub mod gcp;
mod process;

use std::future::Future;
use std::path::PathBuf;

use tracing::debug;
use zeroize::Zeroizing;

use common::{CryptError, KeyId};

pub use aws::AwsKms;
pub use azure::AzureKeyVault;
pub use gcp::GcpKms;

/// Remote wrap/unwrap of small key material.
///
/// Implementations are stateless apart from configuration and safe to share
/// between concurrent operations. Neither call caches key material.
pub trait KeyProvider: Send + Sync {
    /// Stable tag recorded in every container this provider seals.
    fn name(&self) -> &'static str;

    /// Largest plaintext the backend's native encrypt call accepts.
    fn max_wrap_len(&self) -> usize;

    /// Encrypt `plaintext` (a data key) under the master key `key`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Usage`] if `plaintext` exceeds
    /// [`max_wrap_len`](KeyProvider::max_wrap_len), or a provider error kind
    /// for remote failures.
    fn wrap(
        &self,
        key: &KeyId,
        plaintext: &[u8],
    ) -> impl Future<Output = Result<Vec<u8>, CryptError>> + Send;

    /// Decrypt a blob previously returned by [`wrap`](KeyProvider::wrap) for `key`.
    ///
    /// # Errors
    ///
    /// - [`CryptError::ProviderRejected`] if the blob was not produced by this key
    /// - [`CryptError::ProviderAuth`] on missing credentials or permissions
    /// - [`CryptError::ProviderNotFound`] if the key no longer exists
    /// - [`CryptError::ProviderTransient`] on network failure or timeout
    fn unwrap(
        &self,
        key: &KeyId,
        wrapped: &[u8],
    ) -> impl Future<Output = Result<Zeroizing<Vec<u8>>, CryptError>> + Send;
}

/// Provider-side failure class, mapped onto [`CryptError`] variants.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Failure {
    /// Credentials or permissions.
    Auth,
    /// Missing, disabled or destroyed key.
    NotFound,
    /// Network, throttling or timeout.
    Transient,
    /// The blob or request was refused.
    Rejected,
    /// The local client could not even build the request.
    Misconfigured,
}

impl Failure {
    /// Build the matching [`CryptError`] for `provider`.
    pub fn into_error(self, provider: &'static str, message: impl Into<String>) -> CryptError {
        let message = message.into();
        match self {
            Failure::Auth => CryptError::ProviderAuth { provider, message },
            Failure::NotFound => CryptError::ProviderNotFound { provider, message },
            Failure::Transient => CryptError::ProviderTransient { provider, message },
            Failure::Rejected => CryptError::ProviderRejected { provider, message },
            Failure::Misconfigured => CryptError::Usage(format!("{provider}: {message}")),
        }
    }
}

/// Refuse to send more than a provider's native ceiling.
pub(crate) fn check_wrap_len(
    provider: &'static str,
    max: usize,
    len: usize,
) -> Result<(), CryptError> {
    if len == 0 || len > max {
        return Err(CryptError::Usage(format!(
            "{provider}: refusing to wrap {len} bytes; only key material of 1..={max} bytes may be wrapped"
        )));
    }
    Ok(())
}

/// Which backend to build, with its client-side settings.
///
/// Key identities are not part of the settings: they are passed per operation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProviderSettings {
    /// AWS KMS.
    Aws {
        /// Region override; falls back to the SDK's default chain.
        region: Option<String>,
        /// Endpoint override (e.g. a local KMS emulator).
        endpoint_url: Option<String>,
    },
    /// GCP Cloud KMS.
    Gcp {
        /// Path or name of the `gcloud` executable.
        gcloud_bin: PathBuf,
    },
    /// Azure Key Vault.
    Azure {
        /// Path or name of the `az` executable.
        az_bin: PathBuf,
    },
}

/// A configured backend, selected at runtime.
#[derive(Debug, Clone)]
pub enum Provider {
    /// AWS KMS.
    Aws(AwsKms),
    /// GCP Cloud KMS.
    Gcp(GcpKms),
    /// Azure Key Vault.
    Azure(AzureKeyVault),
}

impl Provider {
    /// Build the backend described by `settings`.
    ///
    /// For AWS this resolves credentials and region through the SDK's
    /// default chain; no remote call is made.
    pub async fn connect(settings: &ProviderSettings) -> Self {
        let provider = match settings {
            ProviderSettings::Aws {
                region,
                endpoint_url,
            } => Provider::Aws(AwsKms::from_env(region.clone(), endpoint_url.clone()).await),
            ProviderSettings::Gcp { gcloud_bin } => Provider::Gcp(GcpKms::new(gcloud_bin)),
            ProviderSettings::Azure { az_bin } => Provider::Azure(AzureKeyVault::new(az_bin)),
        };
        debug!(provider = provider.name(), "key provider ready");
        provider
    }
}

impl KeyProvider for Provider {
    fn name(&self) -> &'static str {
        match self {
            Provider::Aws(p) => p.name(),
            Provider::Gcp(p) => p.name(),
            Provider::Azure(p) => p.name(),
        }
    }

    fn max_wrap_len(&self) -> usize {
        match self {
            Provider::Aws(p) => p.max_wrap_len(),
            Provider::Gcp(p) => p.max_wrap_len(),
            Provider::Azure(p) => p.max_wrap_len(),
        }
    }

    async fn wrap(&self, key: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        match self {
            Provider::Aws(p) => p.wrap(key, plaintext).await,
            Provider::Gcp(p) => p.wrap(key, plaintext).await,
            Provider::Azure(p) => p.wrap(key, plaintext).await,
        }
    }

    async fn unwrap(&self, key: &KeyId, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        match self {
            Provider::Aws(p) => p.unwrap(key, wrapped).await,
            Provider::Gcp(p) => p.unwrap(key, wrapped).await,
            Provider::Azure(p) => p.unwrap(key, wrapped).await,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;

    #[test]
    fn failure_maps_to_kinds() {
        assert_eq!(
            Failure::Auth.into_error("aws", "x").kind(),
            ErrorKind::ProviderAuth
        );
        assert_eq!(
            Failure::NotFound.into_error("gcp", "x").kind(),
            ErrorKind::ProviderNotFound
        );
        assert_eq!(
            Failure::Transient.into_error("azure", "x").kind(),
            ErrorKind::ProviderTransient
        );
        assert_eq!(
            Failure::Rejected.into_error("aws", "x").kind(),
            ErrorKind::ProviderRejected
        );
        assert_eq!(
            Failure::Misconfigured.into_error("aws", "no region").kind(),
            ErrorKind::Usage
        );
    }

    #[test]
    fn wrap_len_ceiling() {
        assert!(check_wrap_len("aws", 4096, 32).is_ok());
        assert!(check_wrap_len("aws", 4096, 4096).is_ok());
        assert!(check_wrap_len("aws", 4096, 4097).is_err());
        assert!(check_wrap_len("aws", 4096, 0).is_err());
    }

    #[tokio::test]
    async fn connect_selects_backend() {
        let gcp = Provider::connect(&ProviderSettings::Gcp {
            gcloud_bin: "gcloud".into(),
        })
        .await;
        assert_eq!(gcp.name(), "gcp");
        assert_eq!(gcp.max_wrap_len(), gcp::MAX_WRAP_LEN);

        let azure = Provider::connect(&ProviderSettings::Azure {
            az_bin: "az".into(),
        })
        .await;
        assert_eq!(azure.name(), "azure");
        assert_eq!(azure.max_wrap_len(), azure::MAX_WRAP_LEN);
    }

    #[tokio::test]
    async fn provider_refuses_bulk_payloads_without_remote_call() {
        let azure = Provider::connect(&ProviderSettings::Azure {
            az_bin: "/nonexistent/az".into(),
        })
        .await;
        let key = KeyId::new("https://vault.vault.azure.net/keys/k/v1").unwrap();
        let err = azure.wrap(&key, &[0u8; 4096]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }
}
