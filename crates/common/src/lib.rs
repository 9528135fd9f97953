//! Common types shared across `kms-crypt` crates: the error taxonomy, key
//! identities and the container wire format.

pub mod container;
pub mod error;
pub mod key;

pub use container::{Container, ContainerSummary};
pub use error::{CryptError, ErrorKind, ResultExt};
pub use key::KeyId;
