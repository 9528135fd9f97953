//! Configuration loading and validation for the `crypt` binary.
//!
//! Values are read from `CRYPT_*` environment variables at startup; every
//! field has a default. Provider identities (regions, projects, vault URLs)
//! are not configuration: they arrive per invocation on the command line.

use std::path::PathBuf;
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Text,
    /// One JSON object per event.
    Json,
}

/// Validated runtime configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    /// Tracing filter directive (e.g. `"info"`, `"crypt=debug"`).
    #[serde(default = "default_log_level")]
    pub log_level: String,

    /// Log output format.
    #[serde(default)]
    pub log_format: LogFormat,

    /// Upper bound (seconds) on a single wrap or unwrap call.
    #[serde(default = "default_provider_timeout")]
    pub provider_timeout_secs: u64,

    /// Maximum number of files processed at once in directory mode.
    #[serde(default = "default_concurrency")]
    pub concurrency: usize,

    /// `gcloud` executable used by the GCP provider.
    #[serde(default = "default_gcloud_bin")]
    pub gcloud_bin: PathBuf,

    /// `az` executable used by the Azure provider.
    #[serde(default = "default_az_bin")]
    pub az_bin: PathBuf,
}

fn default_log_level() -> String {
    "info".into()
}
fn default_provider_timeout() -> u64 {
    30
}
fn default_concurrency() -> usize {
    8
}
fn default_gcloud_bin() -> PathBuf {
    "gcloud".into()
}
fn default_az_bin() -> PathBuf {
    "az".into()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            log_level: default_log_level(),
            log_format: LogFormat::default(),
            provider_timeout_secs: default_provider_timeout(),
            concurrency: default_concurrency(),
            gcloud_bin: default_gcloud_bin(),
            az_bin: default_az_bin(),
        }
    }
}

impl Config {
    /// Load and validate configuration from `CRYPT_*` environment variables.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable cannot be parsed or fails validation.
    pub fn from_env() -> Result<Self> {
        Self::load(config::Environment::with_prefix("CRYPT").try_parsing(true))
    }

    /// Load from an explicit variable map instead of the process environment.
    pub fn from_vars(vars: config::Map<String, String>) -> Result<Self> {
        Self::load(
            config::Environment::with_prefix("CRYPT")
                .try_parsing(true)
                .source(Some(vars)),
        )
    }

    fn load(source: config::Environment) -> Result<Self> {
        let cfg = config::Config::builder()
            .add_source(source)
            .build()
            .context("failed to build configuration from environment")?;

        let c: Config = cfg
            .try_deserialize()
            .context("failed to deserialise configuration")?;

        c.validate()?;
        Ok(c)
    }

    /// Provider call timeout as a [`Duration`].
    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    /// Validate all fields, returning a descriptive error on the first failure.
    fn validate(&self) -> Result<()> {
        ensure_non_empty(&self.log_level, "CRYPT_LOG_LEVEL")?;
        ensure_non_empty(&self.gcloud_bin.to_string_lossy(), "CRYPT_GCLOUD_BIN")?;
        ensure_non_empty(&self.az_bin.to_string_lossy(), "CRYPT_AZ_BIN")?;

        if self.provider_timeout_secs == 0 {
            anyhow::bail!("CRYPT_PROVIDER_TIMEOUT_SECS must be > 0");
        }
        if self.concurrency == 0 {
            anyhow::bail!("CRYPT_CONCURRENCY must be > 0");
        }
        Ok(())
    }
}

fn ensure_non_empty(value: &str, name: &str) -> Result<()> {
    if value.trim().is_empty() {
        anyhow::bail!("{name} must not be empty");
    }
    Ok(())
}
