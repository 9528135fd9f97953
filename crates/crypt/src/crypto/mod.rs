//! AES-256-GCM-SIV envelope primitives.
//!
//! This module is intentionally free of provider and file-system dependencies.
//! It provides the local encrypt/decrypt operations the envelope layer wraps
//! around a provider's key-wrapping call.

pub mod cipher;
pub mod entropy;

pub use cipher::{EnvelopeCipher, Sealed, KEY_LEN};
pub use common::container::{NONCE_LEN, TAG_LEN};
pub use entropy::{EntropySource, OsEntropy};
