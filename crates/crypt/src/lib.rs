//! Provider-agnostic envelope encryption.
//!
//! Bulk data is encrypted locally with AES-256-GCM-SIV under a fresh data
//! key; only that key is sent to a remote KMS for wrapping. Any backend
//! implementing [`KeyProvider`] can be plugged into [`Crypt`].
//!
//! ```no_run
//! # async fn demo() -> Result<(), common::CryptError> {
//! use crypt::{Crypt, KeyId, Provider, ProviderSettings};
//!
//! let provider = Provider::connect(&ProviderSettings::Aws {
//!     region: Some("eu-west-1".into()),
//!     endpoint_url: None,
//! })
//! .await;
//! let crypt = Crypt::new(provider);
//! let key = KeyId::new("alias/app-secrets")?;
//!
//! let armored = crypt.encrypt_string("top secret token", &key).await?;
//! assert_eq!(crypt.decrypt_string(&armored, &key).await?, "top secret token");
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod crypto;
pub mod dek;
pub mod envelope;
pub mod provider;
pub mod telemetry;

pub use common::{Container, ContainerSummary, CryptError, ErrorKind, KeyId};
pub use crypto::{EntropySource, EnvelopeCipher, OsEntropy};
pub use envelope::{BatchFailure, BatchReport, Crypt};
pub use provider::{KeyProvider, Provider, ProviderSettings};
