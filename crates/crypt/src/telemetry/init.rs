//! `tracing-subscriber` initialisation.

use anyhow::{Context, Result};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::LogFormat;

/// Initialise the global tracing subscriber.
///
/// # Errors
///
/// Returns an error if the filter directive is invalid or a subscriber is
/// already installed.
pub fn init_telemetry(log_level: &str, format: LogFormat, debug: bool) -> Result<()> {
    let env_filter = match std::env::var(EnvFilter::DEFAULT_ENV) {
        Ok(directive) if !debug => EnvFilter::try_new(directive),
        _ => EnvFilter::try_new(filter_directive(log_level, debug)),
    }
    .context("invalid log filter directive")?;

    let registry = tracing_subscriber::registry().with(env_filter);
    let fmt = tracing_subscriber::fmt::layer()
        .with_writer(std::io::stderr)
        .with_target(false);

    match format {
        LogFormat::Json => registry.with(fmt.json()).try_init(),
        LogFormat::Text => registry.with(fmt.compact()).try_init(),
    }
    .context("failed to initialise tracing subscriber")?;

    Ok(())
}

/// The filter directive used when `RUST_LOG` is not set.
pub fn filter_directive(log_level: &str, debug: bool) -> String {
    if debug {
        "debug".into()
    } else {
        log_level.trim().to_owned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debug_flag_wins() {
        assert_eq!(filter_directive("warn", true), "debug");
        assert_eq!(filter_directive(" info ", false), "info");
    }

    #[test]
    fn directives_parse() {
        assert!(EnvFilter::try_new(filter_directive("crypt=trace,info", false)).is_ok());
    }
}
