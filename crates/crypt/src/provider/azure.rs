//! Azure Key Vault provider, driven through the `az` CLI.
//!
//! ## Requirements
//!
//! - `az` CLI installed and logged in (`az login`, managed identity or a
//!   service principal via `AZURE_CLIENT_ID` / `AZURE_CLIENT_SECRET` / `AZURE_TENANT_ID`)
//! - `encrypt` and `decrypt` key permissions (or the Key Vault Crypto User role)
//!
//! Key identities are Key Vault key identifiers:
//! `https://<vault>.vault.azure.net/keys/<name>[/<version>]`.
//!
//! Calls go to the Key Vault REST `encrypt`/`decrypt` operations through
//! `az rest`, which supplies the access token. The JSON request body carries
//! the key material and is fed on stdin (`--body @/dev/stdin`), never on the
//! command line.
//!
//! Wrapping uses RSA-OAEP-256. The wrapped blob records the versioned key
//! identifier Key Vault reported at wrap time, so unwrap keeps working after
//! the key is rotated:
//!
//! ```text
//! kid_len[2] || versioned_kid[kid_len] || rsa_ciphertext
//! ```

use std::path::{Path, PathBuf};

use base64::{
    engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD},
    Engine as _,
};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};
use zeroize::Zeroizing;

use common::{CryptError, KeyId};

use super::process::{self, Markers};
use super::{check_wrap_len, Failure, KeyProvider};

/// Provider tag recorded in containers.
pub const NAME: &str = "azure";

/// RSA-OAEP-256 with a 2048-bit key: 256 - 2 * 32 - 2 bytes.
pub const MAX_WRAP_LEN: usize = 190;

/// Key Vault algorithm used for wrapping.
pub const ALGORITHM: &str = "RSA-OAEP-256";

/// Key Vault data-plane REST API version.
pub const API_VERSION: &str = "7.4";

/// Token audience for Key Vault data-plane calls.
const RESOURCE: &str = "https://vault.azure.net";

const MARKERS: Markers = &[
    ("Forbidden", Failure::Auth),
    ("Unauthorized", Failure::Auth),
    ("AuthenticationFailed", Failure::Auth),
    ("AADSTS", Failure::Auth),
    ("az login", Failure::Auth),
    ("KeyNotFound", Failure::NotFound),
    ("VaultNotFound", Failure::NotFound),
    ("Not Found", Failure::NotFound),
    ("was not found", Failure::NotFound),
    ("could not be found", Failure::NotFound),
    ("Failed to resolve", Failure::NotFound),
    ("Throttled", Failure::Transient),
    ("TooManyRequests", Failure::Transient),
    ("Too Many Requests", Failure::Transient),
    ("ServiceUnavailable", Failure::Transient),
    ("Service Unavailable", Failure::Transient),
    ("timed out", Failure::Transient),
    ("Max retries exceeded", Failure::Transient),
    ("BadParameter", Failure::Rejected),
    ("Bad Request", Failure::Rejected),
];

/// Body of a Key Vault `encrypt` or `decrypt` request.
#[derive(Serialize)]
struct KeyOperationRequest<'a> {
    alg: &'a str,
    /// Base64url operation input.
    value: &'a str,
}

/// Key Vault `KeyOperationResult`.
#[derive(Debug, Deserialize)]
struct KeyOperationResult {
    /// Versioned identifier of the key that performed the operation.
    kid: Option<String>,
    /// Base64url operation output.
    value: String,
}

/// Azure Key Vault via `az rest` against the key's `encrypt`/`decrypt` endpoints.
#[derive(Debug, Clone)]
pub struct AzureKeyVault {
    az: PathBuf,
}

impl AzureKeyVault {
    /// Use the `az` executable at `az` (a bare name is looked up on `PATH`).
    pub fn new(az: impl AsRef<Path>) -> Self {
        Self {
            az: az.as_ref().to_path_buf(),
        }
    }

    /// Build a key identifier from a vault URL, key name and optional version.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Usage`] if the vault URL is not `https://` or the
    /// name or version is empty or contains `/`.
    pub fn key_identifier(
        vault_url: &str,
        name: &str,
        version: Option<&str>,
    ) -> Result<KeyId, CryptError> {
        let vault = vault_url.trim_end_matches('/');
        let segment_ok = |s: &str| !s.is_empty() && !s.contains('/');
        if !segment_ok(name) || !version.map_or(true, segment_ok) {
            return Err(CryptError::Usage(format!(
                "invalid Azure key name {name:?} / version {version:?}"
            )));
        }
        let id = match version {
            Some(version) => format!("{vault}/keys/{name}/{version}"),
            None => format!("{vault}/keys/{name}"),
        };
        let id = KeyId::new(id)?;
        validate_key_identifier(&id)?;
        Ok(id)
    }

    async fn call(&self, verb: &str, kid: &str, value: &[u8]) -> Result<KeyOperationResult, CryptError> {
        let body = request_body(value)?;
        let url = operation_url(kid, verb);
        let args = [
            "rest",
            "--method",
            "post",
            "--url",
            url.as_str(),
            "--resource",
            RESOURCE,
            "--headers",
            "Content-Type=application/json",
            "--body",
            "@/dev/stdin",
            "--output",
            "json",
        ];
        let stdout = Zeroizing::new(
            process::run(NAME, &self.az, &args, Some(body.as_slice()), MARKERS).await?,
        );
        serde_json::from_slice(&stdout).map_err(|e| {
            Failure::Rejected.into_error(NAME, format!("unexpected Key Vault response: {e}"))
        })
    }
}

impl KeyProvider for AzureKeyVault {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_wrap_len(&self) -> usize {
        MAX_WRAP_LEN
    }

    async fn wrap(&self, key: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        check_wrap_len(NAME, MAX_WRAP_LEN, plaintext.len())?;
        validate_key_identifier(key)?;
        debug!(key_id = %key, "wrapping data key with Azure Key Vault");

        let resp = self.call("encrypt", key.as_str(), plaintext).await?;
        let ciphertext = decode_base64(&resp.value)?;
        let kid = match resp.kid {
            Some(kid) if same_key(key, &kid) => kid,
            Some(kid) => {
                return Err(Failure::Rejected.into_error(
                    NAME,
                    format!("Key Vault answered with key {kid}, not {key}"),
                ))
            }
            None => {
                warn!(key_id = %key, "Key Vault did not report a versioned key id; recording the caller's");
                key.as_str().to_owned()
            }
        };
        encode_blob(&kid, &ciphertext)
    }

    async fn unwrap(&self, key: &KeyId, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        validate_key_identifier(key)?;
        let (kid, ciphertext) = decode_blob(wrapped)?;
        if !same_key(key, kid) {
            return Err(Failure::Rejected.into_error(
                NAME,
                format!("wrapped key belongs to {kid}, not {key}"),
            ));
        }
        debug!(key_id = %kid, "unwrapping data key with Azure Key Vault");

        let resp = self.call("decrypt", kid, ciphertext).await?;
        let encoded = Zeroizing::new(resp.value);
        decode_base64(&encoded).map(Zeroizing::new)
    }
}

/// `true` if `kid` is `key` itself or, for an unversioned `key`, one of its versions.
fn same_key(key: &KeyId, kid: &str) -> bool {
    match kid.strip_prefix(key.as_str()) {
        Some("") => true,
        Some(rest) => rest
            .strip_prefix('/')
            .is_some_and(|version| !version.is_empty() && !version.contains('/')),
        None => false,
    }
}

fn operation_url(kid: &str, verb: &str) -> String {
    format!("{}/{verb}?api-version={API_VERSION}", kid.trim_end_matches('/'))
}

fn request_body(value: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
    let value = Zeroizing::new(URL_SAFE_NO_PAD.encode(value));
    let request = KeyOperationRequest {
        alg: ALGORITHM,
        value: &value,
    };
    serde_json::to_vec(&request)
        .map(Zeroizing::new)
        .map_err(|e| Failure::Rejected.into_error(NAME, format!("encoding request: {e}")))
}

fn validate_key_identifier(id: &KeyId) -> Result<(), CryptError> {
    let s = id.as_str();
    let valid = s
        .strip_prefix("https://")
        .and_then(|rest| rest.split_once("/keys/"))
        .map(|(host, tail)| {
            let segments: Vec<&str> = tail.split('/').collect();
            !host.is_empty()
                && !host.contains('/')
                && (1..=2).contains(&segments.len())
                && segments.iter().all(|seg| !seg.is_empty())
        })
        .unwrap_or(false);
    if !valid {
        return Err(CryptError::Usage(format!(
            "invalid Azure key identifier {s}; expected https://<vault>/keys/<name>[/<version>]"
        )));
    }
    Ok(())
}

fn encode_blob(kid: &str, ciphertext: &[u8]) -> Result<Vec<u8>, CryptError> {
    let kid_len = u16::try_from(kid.len())
        .map_err(|_| Failure::Rejected.into_error(NAME, "key identifier too long"))?;
    let mut blob = Vec::with_capacity(2 + kid.len() + ciphertext.len());
    blob.extend_from_slice(&kid_len.to_be_bytes());
    blob.extend_from_slice(kid.as_bytes());
    blob.extend_from_slice(ciphertext);
    Ok(blob)
}

fn decode_blob(blob: &[u8]) -> Result<(&str, &[u8]), CryptError> {
    let rejected = || Failure::Rejected.into_error(NAME, "wrapped key is not an Azure Key Vault blob");
    if blob.len() < 2 {
        return Err(rejected());
    }
    let kid_len = u16::from_be_bytes([blob[0], blob[1]]) as usize;
    let rest = &blob[2..];
    if rest.len() <= kid_len {
        return Err(rejected());
    }
    let (kid, ciphertext) = rest.split_at(kid_len);
    let kid = std::str::from_utf8(kid).map_err(|_| rejected())?;
    Ok((kid, ciphertext))
}

/// Key Vault answers in base64url; accept standard base64 as well.
fn decode_base64(value: &str) -> Result<Vec<u8>, CryptError> {
    let value = value.trim();
    STANDARD
        .decode(value)
        .or_else(|_| URL_SAFE_NO_PAD.decode(value.trim_end_matches('=')))
        .map_err(|_| Failure::Rejected.into_error(NAME, "Key Vault returned invalid base64"))
}
