//! [`KeyId`]: the provider-side identity of a master key.

use std::fmt;

use serde::Serialize;

use crate::error::CryptError;

/// Longest key identifier the container format can record.
pub const MAX_KEY_ID_LEN: usize = u16::MAX as usize;

/// Identifier of a master key inside a KMS.
///
/// The format is provider specific and opaque to the engine:
/// - AWS: key ID, key ARN, alias name or alias ARN
/// - GCP: `projects/P/locations/L/keyRings/R/cryptoKeys/K`
/// - Azure: `https://<vault>/keys/<name>[/<version>]`
///
/// Whatever identity seals a container is recorded in it and must be supplied
/// again to open it.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct KeyId(String);

impl KeyId {
    /// Validate and wrap a key identifier.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Usage`] if `id` is blank, contains whitespace or
    /// is longer than [`MAX_KEY_ID_LEN`] bytes.
    pub fn new(id: impl Into<String>) -> Result<Self, CryptError> {
        let id = id.into();
        if id.is_empty() {
            return Err(CryptError::Usage("key identifier must not be empty".into()));
        }
        if id.chars().any(char::is_whitespace) {
            return Err(CryptError::Usage(format!(
                "key identifier must not contain whitespace: {id:?}"
            )));
        }
        if id.len() > MAX_KEY_ID_LEN {
            return Err(CryptError::Usage(format!(
                "key identifier is {} bytes; at most {MAX_KEY_ID_LEN} allowed",
                id.len()
            )));
        }
        Ok(Self(id))
    }

    /// The identifier as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for KeyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl std::str::FromStr for KeyId {
    type Err = CryptError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::new(s)
    }
}

impl AsRef<str> for KeyId {
    fn as_ref(&self) -> &str {
        &self.0
    }
}
