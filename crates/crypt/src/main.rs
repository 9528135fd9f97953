//! `crypt`: envelope encryption CLI entry point.
//!
//! Startup sequence:
//! 1. Parse arguments.
//! 2. Load and validate [`Config`] from `CRYPT_*` environment variables.
//! 3. Initialise logging.
//! 4. Run the command; Ctrl-C cancels it, waits for partial output to be
//!    removed and exits with status 130.

use std::process::ExitCode;

use anyhow::Result;
use clap::Parser;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};

use common::{CryptError, ErrorKind};
use crypt::cli::{self, Cli};
use crypt::config::Config;
use crypt::telemetry;

/// Exit status after Ctrl-C, as shells report SIGINT.
const INTERRUPTED: u8 = 130;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    let cfg = match setup(&cli) {
        Ok(cfg) => cfg,
        Err(e) => {
            // Telemetry may not be up; write to stderr directly.
            eprintln!("error: {e:#}");
            return ExitCode::from(exit_code(&e));
        }
    };
    debug!(version = env!("CARGO_PKG_VERSION"), "crypt starting");

    let cancel = CancellationToken::new();
    let mut command = {
        let cancel = cancel.clone();
        tokio::spawn(async move { cli::execute(cli.command, &cfg, &cancel).await })
    };

    let joined = tokio::select! {
        joined = &mut command => joined,
        _ = tokio::signal::ctrl_c() => {
            warn!("interrupted; cancelling");
            cancel.cancel();
            // Wait for partial output to be removed.
            if let Err(e) = command.await {
                error!(error = %e, "command task failed during cancellation");
            }
            // A pending stdin read holds a blocking thread that runtime
            // shutdown would wait on.
            std::process::exit(i32::from(INTERRUPTED))
        }
    };

    match joined {
        Ok(Ok(())) => ExitCode::SUCCESS,
        Ok(Err(e)) => {
            error!(kind = ?e.kind(), retryable = e.is_retryable(), "{e}");
            ExitCode::from(e.kind().exit_code())
        }
        Err(e) => {
            error!(error = %e, "command task failed");
            ExitCode::FAILURE
        }
    }
}

fn setup(cli: &Cli) -> Result<Config> {
    let mut cfg = Config::from_env()?;
    if let Some(format) = cli.log_format {
        cfg.log_format = format;
    }
    telemetry::init_telemetry(&cfg.log_level, cfg.log_format, cli.debug)?;
    Ok(cfg)
}

/// Configuration and logging failures are usage errors unless they wrap a
/// [`CryptError`].
fn exit_code(err: &anyhow::Error) -> u8 {
    err.downcast_ref::<CryptError>()
        .map_or(ErrorKind::Usage, CryptError::kind)
        .exit_code()
}
