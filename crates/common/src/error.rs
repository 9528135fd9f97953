//! Error taxonomy shared by every layer of the envelope engine.

use std::path::PathBuf;

use thiserror::Error;

/// Coarse classification of a [`CryptError`].
///
/// Callers branch on the kind rather than on message text. Each kind maps to
/// a process exit code used by the `crypt` binary:
/// - [`ErrorKind::Usage`] → 2
/// - [`ErrorKind::Crypto`] → 10
/// - [`ErrorKind::Integrity`] → 11
/// - [`ErrorKind::ProviderAuth`] → 12
/// - [`ErrorKind::ProviderNotFound`] → 13
/// - [`ErrorKind::ProviderTransient`] → 14
/// - [`ErrorKind::ProviderRejected`] → 15
/// - [`ErrorKind::Io`] → 16
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    /// Local cryptographic primitive or entropy failure.
    Crypto,
    /// Authentication tag mismatch or a structurally invalid container.
    Integrity,
    /// The provider refused the caller's credentials or permissions.
    ProviderAuth,
    /// The referenced key, key ring or vault does not exist.
    ProviderNotFound,
    /// Network failure or timeout talking to the provider.
    ProviderTransient,
    /// The provider (or the engine on its behalf) rejected the wrapped key.
    ProviderRejected,
    /// Local file read/write failure.
    Io,
    /// Invalid configuration or caller input.
    Usage,
}

impl ErrorKind {
    /// Returns `true` if retrying the same operation may succeed.
    pub fn is_retryable(self) -> bool {
        matches!(self, ErrorKind::ProviderTransient)
    }

    /// Returns the process exit code the CLI uses for this kind.
    pub fn exit_code(self) -> u8 {
        match self {
            ErrorKind::Usage => 2,
            ErrorKind::Crypto => 10,
            ErrorKind::Integrity => 11,
            ErrorKind::ProviderAuth => 12,
            ErrorKind::ProviderNotFound => 13,
            ErrorKind::ProviderTransient => 14,
            ErrorKind::ProviderRejected => 15,
            ErrorKind::Io => 16,
        }
    }
}

/// Every failure the engine can report.
///
/// Messages never contain key material or plaintext.
#[derive(Debug, Error)]
pub enum CryptError {
    /// Entropy or AEAD primitive failure on encrypt.
    #[error("crypto failure: {0}")]
    Crypto(String),

    /// The authentication tag did not verify.
    #[error("integrity check failed: ciphertext, nonce, header or key do not match")]
    Integrity,

    /// The input could not be parsed as a container.
    #[error("malformed container: {0}")]
    MalformedContainer(String),

    /// The provider returned key material of the wrong length.
    #[error("unwrapped data key has invalid length: {0} bytes")]
    InvalidDataKey(usize),

    /// Credentials or permissions were insufficient.
    #[error("{provider}: access denied: {message}")]
    ProviderAuth {
        /// Provider tag (`aws`, `gcp`, `azure`, ...).
        provider: &'static str,
        /// Provider-supplied detail.
        message: String,
    },

    /// The referenced key does not exist (or is disabled / scheduled for deletion).
    #[error("{provider}: key not found: {message}")]
    ProviderNotFound {
        /// Provider tag.
        provider: &'static str,
        /// Provider-supplied detail.
        message: String,
    },

    /// Network failure or timeout; the caller may retry.
    #[error("{provider}: transient failure: {message}")]
    ProviderTransient {
        /// Provider tag.
        provider: &'static str,
        /// Provider-supplied detail.
        message: String,
    },

    /// The provider refused to unwrap the blob (not produced by this key).
    #[error("{provider}: wrapped key rejected: {message}")]
    ProviderRejected {
        /// Provider tag.
        provider: &'static str,
        /// Provider-supplied detail.
        message: String,
    },

    /// The container was sealed by a different provider.
    #[error("container was sealed with provider {found:?}, not {expected:?}")]
    ProviderMismatch {
        /// Provider used for this operation.
        expected: String,
        /// Provider recorded in the container.
        found: String,
    },

    /// The container was sealed under a different key identity.
    #[error("container was sealed with key {found:?}, not {expected:?}")]
    KeyMismatch {
        /// Key identity supplied by the caller.
        expected: String,
        /// Key identity recorded in the container.
        found: String,
    },

    /// File system failure.
    #[error("io error on {}: {source}", .path.display())]
    Io {
        /// Path being read or written.
        path: PathBuf,
        /// Underlying error.
        #[source]
        source: std::io::Error,
    },

    /// Invalid configuration or input.
    #[error("{0}")]
    Usage(String),

    /// Another error enriched with the operation it occurred in.
    #[error("{context}: {source}")]
    Context {
        /// What the engine was doing (file, provider, step).
        context: String,
        /// The underlying error.
        #[source]
        source: Box<CryptError>,
    },
}

impl CryptError {
    /// Classify this error, looking through any [`CryptError::Context`] layers.
    pub fn kind(&self) -> ErrorKind {
        match self {
            CryptError::Crypto(_) => ErrorKind::Crypto,
            CryptError::Integrity
            | CryptError::MalformedContainer(_)
            | CryptError::InvalidDataKey(_) => ErrorKind::Integrity,
            CryptError::ProviderAuth { .. } => ErrorKind::ProviderAuth,
            CryptError::ProviderNotFound { .. } => ErrorKind::ProviderNotFound,
            CryptError::ProviderTransient { .. } => ErrorKind::ProviderTransient,
            CryptError::ProviderRejected { .. }
            | CryptError::ProviderMismatch { .. }
            | CryptError::KeyMismatch { .. } => ErrorKind::ProviderRejected,
            CryptError::Io { .. } => ErrorKind::Io,
            CryptError::Usage(_) => ErrorKind::Usage,
            CryptError::Context { source, .. } => source.kind(),
        }
    }

    /// Shorthand for `self.kind().is_retryable()`.
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }

    /// Wrap this error with a description of the operation that failed.
    pub fn context(self, context: impl Into<String>) -> Self {
        CryptError::Context {
            context: context.into(),
            source: Box::new(self),
        }
    }

    /// Build an [`CryptError::Io`] for `path`.
    pub fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        CryptError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Extension for attaching operation context to a `Result`.
pub trait ResultExt<T> {
    /// Map the error through [`CryptError::context`], building the message lazily.
    fn with_context<F, S>(self, f: F) -> Result<T, CryptError>
    where
        F: FnOnce() -> S,
        S: Into<String>;
}

impl<T> ResultExt<T> for Result<T, CryptError> {
    fn with_context<F, S>(self, f: F) -> Result<T, CryptError>
    where
        F: FnOnce() -> S,
        S: Into<String>,
    {
        self.map_err(|e| e.context(f()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn exit_codes() {
        assert_eq!(ErrorKind::Usage.exit_code(), 2);
        assert_eq!(ErrorKind::Integrity.exit_code(), 11);
        assert_eq!(ErrorKind::ProviderTransient.exit_code(), 14);
        assert_eq!(ErrorKind::Io.exit_code(), 16);
    }

    #[test]
    fn only_transient_is_retryable() {
        let transient = CryptError::ProviderTransient {
            provider: "aws",
            message: "timeout".into(),
        };
        let auth = CryptError::ProviderAuth {
            provider: "aws",
            message: "denied".into(),
        };
        assert!(transient.is_retryable());
        assert!(!auth.is_retryable());
        assert!(!CryptError::Integrity.is_retryable());
    }

    #[test]
    fn kind_sees_through_context() {
        let err = CryptError::ProviderNotFound {
            provider: "gcp",
            message: "key ring missing".into(),
        }
        .context("unwrapping data key")
        .context("decrypting secrets.env");
        assert_eq!(err.kind(), ErrorKind::ProviderNotFound);
        let msg = err.to_string();
        assert!(msg.starts_with("decrypting secrets.env: unwrapping data key: "));
        assert!(msg.contains("key ring missing"));
    }

    #[test]
    fn mismatch_variants_are_rejections() {
        let err = CryptError::KeyMismatch {
            expected: "a".into(),
            found: "b".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ProviderRejected);
        let err = CryptError::ProviderMismatch {
            expected: "aws".into(),
            found: "gcp".into(),
        };
        assert_eq!(err.kind(), ErrorKind::ProviderRejected);
    }

    #[test]
    fn malformed_container_counts_as_integrity() {
        assert_eq!(
            CryptError::MalformedContainer("truncated".into()).kind(),
            ErrorKind::Integrity
        );
        assert_eq!(CryptError::InvalidDataKey(7).kind(), ErrorKind::Integrity);
    }

    #[test]
    fn io_display_includes_path() {
        let err = CryptError::io(
            "/tmp/in.txt",
            std::io::Error::new(std::io::ErrorKind::NotFound, "gone"),
        );
        assert_eq!(err.kind(), ErrorKind::Io);
        assert!(err.to_string().contains("/tmp/in.txt"));
    }
}
