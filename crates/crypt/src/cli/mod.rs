//! Command-line interface.

pub mod commands;

use std::path::{Path, PathBuf};

use clap::{Args, Parser, Subcommand};

use common::{CryptError, KeyId};

use crate::config::{Config, LogFormat};
use crate::provider::{AzureKeyVault, ProviderSettings};

pub use commands::execute;

/// Envelope encryption of files and strings with AWS KMS, GCP Cloud KMS or Azure Key Vault.
#[derive(Debug, Parser)]
#[command(name = "crypt", version, about)]
pub struct Cli {
    /// Force debug logging
    #[arg(long, global = true)]
    pub debug: bool,

    /// Log format (overrides CRYPT_LOG_FORMAT)
    #[arg(long, global = true, value_enum)]
    pub log_format: Option<LogFormat>,

    #[command(subcommand)]
    pub command: Command,
}

/// Top-level commands.
#[derive(Debug, Subcommand)]
pub enum Command {
    /// Encrypt a file, stdin, a string or a directory
    #[command(visible_aliases = ["enc", "e"])]
    Encrypt {
        #[command(subcommand)]
        provider: ProviderCommand,
    },

    /// Decrypt a container, stdin, an armored string or a directory
    #[command(visible_aliases = ["dec", "d"])]
    Decrypt {
        #[command(subcommand)]
        provider: ProviderCommand,
    },

    /// Print container metadata without decrypting
    Inspect {
        /// Container to read ("-" for stdin)
        #[arg(long = "in", value_name = "PATH", default_value = "-")]
        input: PathBuf,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print version information
    Version,
}

/// Provider selection with its key and I/O flags.
#[derive(Debug, Subcommand)]
pub enum ProviderCommand {
    /// AWS KMS
    Aws {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        key: AwsKeyArgs,
    },
    /// GCP Cloud KMS
    Gcp {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        key: GcpKeyArgs,
    },
    /// Azure Key Vault
    Azure {
        #[command(flatten)]
        io: IoArgs,
        #[command(flatten)]
        key: AzureKeyArgs,
    },
}

/// Where input comes from and output goes to.
#[derive(Debug, Clone, Args)]
pub struct IoArgs {
    /// Input file ("-" for stdin)
    #[arg(long = "in", value_name = "PATH", default_value = "-", conflicts_with_all = ["text", "in_dir"])]
    pub input: PathBuf,

    /// Output file ("-" for stdout)
    #[arg(long = "out", value_name = "PATH", default_value = "-", conflicts_with = "out_dir")]
    pub output: PathBuf,

    /// Literal string input; encrypt prints an armored container, decrypt takes one
    #[arg(long, value_name = "TEXT", conflicts_with = "in_dir")]
    pub text: Option<String>,

    /// Write the container as base64 text instead of binary
    #[arg(long)]
    pub armor: bool,

    /// Process every file under this directory
    #[arg(long, value_name = "DIR", requires = "out_dir")]
    pub in_dir: Option<PathBuf>,

    /// Destination directory for --in-dir
    #[arg(long, value_name = "DIR", requires = "in_dir")]
    pub out_dir: Option<PathBuf>,
}

/// AWS KMS key selection.
#[derive(Debug, Clone, Args)]
pub struct AwsKeyArgs {
    /// KMS key id, key ARN, alias name or alias ARN
    #[arg(long, value_name = "ID", env = "AWS_KMS_KEY")]
    pub kms_key: Option<String>,

    /// AWS region
    #[arg(long, env = "AWS_REGION")]
    pub region: Option<String>,

    /// Custom KMS endpoint (e.g. a local emulator)
    #[arg(long, value_name = "URL", env = "AWS_ENDPOINT_URL")]
    pub endpoint_url: Option<String>,
}

/// GCP Cloud KMS key selection.
#[derive(Debug, Clone, Args)]
pub struct GcpKeyArgs {
    /// GCP project id
    #[arg(long, env = "GCP_PROJECT")]
    pub project: Option<String>,

    /// Key ring location [default: global]
    #[arg(long, env = "GCP_LOCATION")]
    pub location: Option<String>,

    /// Key ring name
    #[arg(long, env = "GCP_KEYRING")]
    pub keyring: Option<String>,

    /// Crypto key name
    #[arg(long, env = "GCP_KEY")]
    pub key: Option<String>,
}

/// Azure Key Vault key selection.
#[derive(Debug, Clone, Args)]
pub struct AzureKeyArgs {
    /// Vault URL, e.g. https://my-vault.vault.azure.net
    #[arg(long, value_name = "URL", env = "AZURE_VAULT_URL")]
    pub vault_url: Option<String>,

    /// Key name
    #[arg(long, env = "AZURE_KEY_NAME")]
    pub name: Option<String>,

    /// Key version (latest when omitted)
    #[arg(long, value_name = "VERSION", env = "AZURE_KEY_VERSION")]
    pub key_version: Option<String>,
}

impl ProviderCommand {
    /// I/O flags.
    pub fn io(&self) -> &IoArgs {
        match self {
            ProviderCommand::Aws { io, .. }
            | ProviderCommand::Gcp { io, .. }
            | ProviderCommand::Azure { io, .. } => io,
        }
    }

    /// Provider client settings, combining flags with `cfg`.
    pub fn settings(&self, cfg: &Config) -> ProviderSettings {
        match self {
            ProviderCommand::Aws { key, .. } => ProviderSettings::Aws {
                region: key.region.clone(),
                endpoint_url: key.endpoint_url.clone(),
            },
            ProviderCommand::Gcp { .. } => ProviderSettings::Gcp {
                gcloud_bin: cfg.gcloud_bin.clone(),
            },
            ProviderCommand::Azure { .. } => ProviderSettings::Azure {
                az_bin: cfg.az_bin.clone(),
            },
        }
    }

    /// The key identity named by the flags, or `None` if no key flag was given.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Usage`] if the flags name a key only partially.
    pub fn key_id(&self) -> Result<Option<KeyId>, CryptError> {
        match self {
            ProviderCommand::Aws { key, .. } => key.kms_key.as_deref().map(KeyId::new).transpose(),
            ProviderCommand::Gcp { key, .. } => key.key_id(),
            ProviderCommand::Azure { key, .. } => key.key_id(),
        }
    }
}

impl GcpKeyArgs {
    fn key_id(&self) -> Result<Option<KeyId>, CryptError> {
        let (project, keyring, key) = match (&self.project, &self.keyring, &self.key) {
            (None, None, None) => return Ok(None),
            (Some(p), Some(r), Some(k)) => (p, r, k),
            _ => {
                return Err(CryptError::Usage(
                    "gcp needs --project, --keyring and --key together".into(),
                ))
            }
        };
        crate::provider::gcp::ResourceName {
            project: project.clone(),
            location: self.location.clone().unwrap_or_else(|| "global".into()),
            key_ring: keyring.clone(),
            key: key.clone(),
        }
        .to_key_id()
        .map(Some)
    }
}

impl AzureKeyArgs {
    fn key_id(&self) -> Result<Option<KeyId>, CryptError> {
        match (&self.vault_url, &self.name) {
            (None, None) if self.key_version.is_none() => Ok(None),
            (Some(vault), Some(name)) => {
                AzureKeyVault::key_identifier(vault, name, self.key_version.as_deref()).map(Some)
            }
            _ => Err(CryptError::Usage(
                "azure needs --vault-url and --name together".into(),
            )),
        }
    }
}

/// `true` if `path` means stdin or stdout.
pub fn is_stdio(path: &Path) -> bool {
    path.as_os_str() == "-"
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    fn parse(args: &[&str]) -> Cli {
        Cli::try_parse_from(args).unwrap()
    }

    fn provider(cli: Cli) -> ProviderCommand {
        match cli.command {
            Command::Encrypt { provider } | Command::Decrypt { provider } => provider,
            other => panic!("unexpected command {other:?}"),
        }
    }

    #[test]
    fn command_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn encrypt_aliases() {
        for alias in ["encrypt", "enc", "e"] {
            let cli = parse(&["crypt", alias, "aws", "--kms-key", "alias/app"]);
            assert!(matches!(cli.command, Command::Encrypt { .. }));
        }
        for alias in ["decrypt", "dec", "d"] {
            let cli = parse(&["crypt", alias, "gcp"]);
            assert!(matches!(cli.command, Command::Decrypt { .. }));
        }
    }

    #[test]
    fn io_defaults_to_stdio() {
        let p = provider(parse(&["crypt", "e", "aws", "--kms-key", "k"]));
        let io = p.io();
        assert!(is_stdio(&io.input));
        assert!(is_stdio(&io.output));
        assert!(!io.armor);
        assert!(io.text.is_none());
    }

    #[test]
    fn global_flags_anywhere() {
        let cli = parse(&["crypt", "e", "aws", "--kms-key", "k", "--debug", "--log-format", "json"]);
        assert!(cli.debug);
        assert_eq!(cli.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn text_conflicts_with_in() {
        assert!(Cli::try_parse_from(["crypt", "e", "aws", "--text", "x", "--in", "f"]).is_err());
    }

    #[test]
    fn in_dir_requires_out_dir() {
        assert!(Cli::try_parse_from(["crypt", "e", "aws", "--in-dir", "a"]).is_err());
        let p = provider(parse(&["crypt", "e", "aws", "--in-dir", "a", "--out-dir", "b"]));
        assert_eq!(p.io().in_dir.as_deref(), Some(Path::new("a")));
    }

    #[test]
    fn gcp_key_id_from_flags() {
        let p = provider(parse(&[
            "crypt", "e", "gcp", "--project", "p", "--keyring", "r", "--key", "k",
        ]));
        assert_eq!(
            p.key_id().unwrap().unwrap().as_str(),
            "projects/p/locations/global/keyRings/r/cryptoKeys/k"
        );
    }

    #[test]
    fn partial_gcp_flags_are_usage_error() {
        let p = provider(parse(&["crypt", "e", "gcp", "--project", "p"]));
        assert!(p.key_id().is_err());
    }

    #[test]
    fn azure_key_id_from_flags() {
        let p = provider(parse(&[
            "crypt",
            "d",
            "azure",
            "--vault-url",
            "https://v.vault.azure.net",
            "--name",
            "k",
            "--key-version",
            "abc",
        ]));
        assert_eq!(
            p.key_id().unwrap().unwrap().as_str(),
            "https://v.vault.azure.net/keys/k/abc"
        );
    }

    #[test]
    fn settings_use_configured_binaries() {
        let cfg = Config {
            az_bin: "/opt/az".into(),
            ..Config::default()
        };
        let p = provider(parse(&["crypt", "d", "azure"]));
        assert_eq!(
            p.settings(&cfg),
            ProviderSettings::Azure {
                az_bin: "/opt/az".into()
            }
        );
    }

    #[test]
    fn inspect_and_version() {
        let cli = parse(&["crypt", "inspect", "--in", "x.crypt", "--json"]);
        assert!(matches!(cli.command, Command::Inspect { json: true, .. }));
        assert!(matches!(parse(&["crypt", "version"]).command, Command::Version));
    }
}
