//! The persisted envelope: provider tag, key id, wrapped key, nonce and ciphertext.
//!
//! # Binary format (v1, big-endian)
//!
//! ```text
//! magic[4] = "KCRY" || version[1] = 0x01
//! || prov_len[1] || provider[prov_len]
//! || key_len[2]  || key_id[key_len]
//! || wrap_len[2] || wrapped_key[wrap_len]
//! || nonce[12]
//! || ct_len[8]   || ciphertext+tag[ct_len]
//! ```
//!
//! Everything from `magic` through `key_id` is the AEAD associated data, so
//! the tag also covers the provider tag and key identity. Trailing bytes are
//! rejected.
//!
//! The armored form is standard base64 of the binary form.

use base64::{engine::general_purpose::STANDARD, Engine as _};
use bytes::{Buf, BufMut};
use serde::Serialize;

use crate::error::CryptError;
use crate::key::KeyId;

/// First four bytes of every binary container.
pub const MAGIC: &[u8; 4] = b"KCRY";

/// Current format version.
pub const FORMAT_VERSION: u8 = 0x01;

/// Byte length of the AEAD nonce.
pub const NONCE_LEN: usize = 12;

/// Byte length of the AEAD authentication tag.
pub const TAG_LEN: usize = 16;

/// Longest provider tag the format can record.
pub const MAX_PROVIDER_LEN: usize = u8::MAX as usize;

/// Longest wrapped key the format can record.
pub const MAX_WRAPPED_KEY_LEN: usize = u16::MAX as usize;

/// A sealed envelope. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Container {
    provider: String,
    key_id: KeyId,
    wrapped_key: Vec<u8>,
    nonce: [u8; NONCE_LEN],
    ciphertext: Vec<u8>,
}

/// Non-secret metadata about a container, suitable for display.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ContainerSummary {
    /// Format version.
    pub version: u8,
    /// Provider tag recorded at seal time.
    pub provider: String,
    /// Key identity recorded at seal time.
    pub key_id: KeyId,
    /// Length of the provider's wrapped key blob.
    pub wrapped_key_len: usize,
    /// Length of the plaintext that was sealed.
    pub plaintext_len: usize,
    /// Length of the encoded binary container.
    pub encoded_len: usize,
}

impl Container {
    /// Assemble a container from its parts.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Usage`] if the provider tag or wrapped key do not
    /// fit the format, or if `ciphertext` is shorter than a tag.
    pub fn new(
        provider: impl Into<String>,
        key_id: KeyId,
        wrapped_key: Vec<u8>,
        nonce: [u8; NONCE_LEN],
        ciphertext: Vec<u8>,
    ) -> Result<Self, CryptError> {
        let provider = provider.into();
        check_provider_tag(&provider)?;
        if wrapped_key.is_empty() || wrapped_key.len() > MAX_WRAPPED_KEY_LEN {
            return Err(CryptError::Usage(format!(
                "wrapped key is {} bytes; expected 1..={MAX_WRAPPED_KEY_LEN}",
                wrapped_key.len()
            )));
        }
        if ciphertext.len() < TAG_LEN {
            return Err(CryptError::Usage(format!(
                "ciphertext is {} bytes; shorter than the {TAG_LEN}-byte tag",
                ciphertext.len()
            )));
        }
        Ok(Self {
            provider,
            key_id,
            wrapped_key,
            nonce,
            ciphertext,
        })
    }

    /// Provider tag recorded at seal time.
    pub fn provider(&self) -> &str {
        &self.provider
    }

    /// Key identity recorded at seal time.
    pub fn key_id(&self) -> &KeyId {
        &self.key_id
    }

    /// Opaque wrapped data key.
    pub fn wrapped_key(&self) -> &[u8] {
        &self.wrapped_key
    }

    /// AEAD nonce.
    pub fn nonce(&self) -> &[u8; NONCE_LEN] {
        &self.nonce
    }

    /// Ciphertext followed by the authentication tag.
    pub fn ciphertext(&self) -> &[u8] {
        &self.ciphertext
    }

    /// Associated data bound into the AEAD tag for this container.
    pub fn aad(&self) -> Vec<u8> {
        header_aad(&self.provider, &self.key_id)
    }

    /// Encode to the binary wire format.
    pub fn encode(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(self.encoded_len());
        out.put_slice(MAGIC);
        out.put_u8(FORMAT_VERSION);
        out.put_u8(self.provider.len() as u8);
        out.put_slice(self.provider.as_bytes());
        out.put_u16(self.key_id.as_str().len() as u16);
        out.put_slice(self.key_id.as_str().as_bytes());
        out.put_u16(self.wrapped_key.len() as u16);
        out.put_slice(&self.wrapped_key);
        out.put_slice(&self.nonce);
        out.put_u64(self.ciphertext.len() as u64);
        out.put_slice(&self.ciphertext);
        out
    }

    /// Decode the binary wire format.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::MalformedContainer`] on a bad magic, unsupported
    /// version, truncated or oversized field, or trailing bytes.
    pub fn decode(bytes: &[u8]) -> Result<Self, CryptError> {
        let mut buf = bytes;

        let magic = take(&mut buf, MAGIC.len(), "magic")?;
        if magic != MAGIC {
            return Err(malformed("bad magic"));
        }
        let version = take(&mut buf, 1, "version")?[0];
        if version != FORMAT_VERSION {
            return Err(malformed(format!("unsupported version {version}")));
        }

        let prov_len = take(&mut buf, 1, "provider length")?[0] as usize;
        let provider = std::str::from_utf8(take(&mut buf, prov_len, "provider")?)
            .map_err(|_| malformed("provider tag is not UTF-8"))?
            .to_owned();
        check_provider_tag(&provider).map_err(|_| malformed("empty provider tag"))?;

        let key_len = read_u16(&mut buf, "key id length")? as usize;
        let key_id = std::str::from_utf8(take(&mut buf, key_len, "key id")?)
            .map_err(|_| malformed("key id is not UTF-8"))?;
        let key_id = KeyId::new(key_id).map_err(|e| malformed(format!("key id: {e}")))?;

        let wrap_len = read_u16(&mut buf, "wrapped key length")? as usize;
        if wrap_len == 0 {
            return Err(malformed("empty wrapped key"));
        }
        let wrapped_key = take(&mut buf, wrap_len, "wrapped key")?.to_vec();

        let mut nonce = [0u8; NONCE_LEN];
        nonce.copy_from_slice(take(&mut buf, NONCE_LEN, "nonce")?);

        let ct_len = read_u64(&mut buf, "ciphertext length")?;
        let ct_len = usize::try_from(ct_len).map_err(|_| malformed("ciphertext too large"))?;
        if ct_len < TAG_LEN {
            return Err(malformed("ciphertext shorter than tag"));
        }
        if buf.remaining() != ct_len {
            return Err(malformed(format!(
                "ciphertext length {ct_len} does not match {} remaining bytes",
                buf.remaining()
            )));
        }
        let ciphertext = buf.to_vec();

        Ok(Self {
            provider,
            key_id,
            wrapped_key,
            nonce,
            ciphertext,
        })
    }

    /// Encode to the armored (base64) text form.
    pub fn to_armored(&self) -> String {
        STANDARD.encode(self.encode())
    }

    /// Decode the armored (base64) text form. ASCII whitespace is ignored.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::MalformedContainer`] on invalid base64 or an
    /// invalid binary payload.
    pub fn from_armored(text: &str) -> Result<Self, CryptError> {
        let compact: String = text.split_ascii_whitespace().collect();
        let bytes = STANDARD
            .decode(compact.as_bytes())
            .map_err(|_| malformed("invalid base64 armor"))?;
        Self::decode(&bytes)
    }

    /// Decode either the binary or the armored form.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::MalformedContainer`] if neither form parses.
    pub fn parse(bytes: &[u8]) -> Result<Self, CryptError> {
        if bytes.starts_with(MAGIC) {
            return Self::decode(bytes);
        }
        match std::str::from_utf8(bytes) {
            Ok(text) => Self::from_armored(text),
            Err(_) => Err(malformed("neither a binary nor an armored container")),
        }
    }

    /// Non-secret metadata for display.
    pub fn summary(&self) -> ContainerSummary {
        ContainerSummary {
            version: FORMAT_VERSION,
            provider: self.provider.clone(),
            key_id: self.key_id.clone(),
            wrapped_key_len: self.wrapped_key.len(),
            plaintext_len: self.ciphertext.len() - TAG_LEN,
            encoded_len: self.encoded_len(),
        }
    }

    fn encoded_len(&self) -> usize {
        MAGIC.len()
            + 1
            + 1
            + self.provider.len()
            + 2
            + self.key_id.as_str().len()
            + 2
            + self.wrapped_key.len()
            + NONCE_LEN
            + 8
            + self.ciphertext.len()
    }
}

/// Associated data for a container sealed by `provider` under `key_id`.
///
/// Identical to the leading bytes of the encoded container, so the header
/// can be authenticated before the wrapped key exists.
pub fn header_aad(provider: &str, key_id: &KeyId) -> Vec<u8> {
    let key = key_id.as_str().as_bytes();
    let mut out = Vec::with_capacity(MAGIC.len() + 4 + provider.len() + key.len());
    out.put_slice(MAGIC);
    out.put_u8(FORMAT_VERSION);
    out.put_u8(provider.len() as u8);
    out.put_slice(provider.as_bytes());
    out.put_u16(key.len() as u16);
    out.put_slice(key);
    out
}

fn check_provider_tag(provider: &str) -> Result<(), CryptError> {
    if provider.is_empty() || provider.len() > MAX_PROVIDER_LEN {
        return Err(CryptError::Usage(format!(
            "provider tag must be 1..={MAX_PROVIDER_LEN} bytes"
        )));
    }
    Ok(())
}

fn malformed(msg: impl Into<String>) -> CryptError {
    CryptError::MalformedContainer(msg.into())
}

fn take<'a>(buf: &mut &'a [u8], n: usize, what: &str) -> Result<&'a [u8], CryptError> {
    if buf.len() < n {
        return Err(malformed(format!("truncated {what}")));
    }
    let (head, tail) = buf.split_at(n);
    *buf = tail;
    Ok(head)
}

fn read_u16(buf: &mut &[u8], what: &str) -> Result<u16, CryptError> {
    if buf.remaining() < 2 {
        return Err(malformed(format!("truncated {what}")));
    }
    Ok(buf.get_u16())
}

fn read_u64(buf: &mut &[u8], what: &str) -> Result<u64, CryptError> {
    if buf.remaining() < 8 {
        return Err(malformed(format!("truncated {what}")));
    }
    Ok(buf.get_u64())
}
