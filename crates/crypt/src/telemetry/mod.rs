//! Structured logging for the `crypt` binary.
//!
//! Logs go to stderr so stdout stays reserved for container or plaintext
//! output in pipe mode.
//!
//! # Telemetry invariants
//!
//! - **No key material or plaintext** may appear in any span or log field.
//!   Key identities, provider tags, paths and byte counts are fine.
//! - `RUST_LOG` overrides the configured level; `--debug` forces `debug`.

pub mod init;

pub use init::{filter_directive, init_telemetry};
