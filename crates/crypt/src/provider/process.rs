//! Shared runner for providers driven through a vendor CLI (`gcloud`, `az`).
//!
//! The child is killed if the calling future is dropped, so cancelling an
//! operation never leaves a vendor process running with key material on
//! its stdin.

use std::path::Path;
use std::process::Stdio;

use tokio::io::AsyncWriteExt;
use tokio::process::Command;
use tracing::trace;

use common::CryptError;

use super::Failure;

/// Longest slice of vendor stderr carried into an error message.
const MAX_STDERR_CHARS: usize = 512;

/// Stderr markers for one vendor CLI, checked in order, case-insensitively.
pub(crate) type Markers = &'static [(&'static str, Failure)];

/// Run `program args...`, optionally feeding `stdin`, and return its stdout.
///
/// A non-zero exit is classified with `markers`; an unmatched failure is
/// [`Failure::Rejected`].
pub(crate) async fn run(
    provider: &'static str,
    program: &Path,
    args: &[&str],
    stdin: Option<&[u8]>,
    markers: Markers,
) -> Result<Vec<u8>, CryptError> {
    trace!(provider, program = %program.display(), subcommand = ?args.first(), "spawning provider CLI");

    let mut child = Command::new(program)
        .args(args)
        .stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        })
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .kill_on_drop(true)
        .spawn()
        .map_err(|e| spawn_error(provider, program, e))?;

    if let (Some(input), Some(mut pipe)) = (stdin, child.stdin.take()) {
        pipe.write_all(input)
            .await
            .map_err(|e| Failure::Transient.into_error(provider, format!("writing to CLI stdin: {e}")))?;
        // Close stdin so the CLI sees end of input.
        drop(pipe);
    }

    let output = child
        .wait_with_output()
        .await
        .map_err(|e| Failure::Transient.into_error(provider, format!("waiting for CLI: {e}")))?;

    if output.status.success() {
        return Ok(output.stdout);
    }

    let stderr = String::from_utf8_lossy(&output.stderr);
    let failure = classify(&stderr, markers);
    Err(failure.into_error(provider, summarize(&stderr, output.status.code())))
}

/// Pick the first marker present in `stderr`.
pub(crate) fn classify(stderr: &str, markers: Markers) -> Failure {
    let haystack = stderr.to_ascii_lowercase();
    markers
        .iter()
        .find(|(needle, _)| haystack.contains(&needle.to_ascii_lowercase()))
        .map(|(_, failure)| *failure)
        .unwrap_or(Failure::Rejected)
}

fn summarize(stderr: &str, code: Option<i32>) -> String {
    let trimmed = stderr.trim();
    let mut msg: String = trimmed.chars().take(MAX_STDERR_CHARS).collect();
    if trimmed.chars().count() > MAX_STDERR_CHARS {
        msg.push_str("...");
    }
    if msg.is_empty() {
        msg = "CLI failed without output".into();
    }
    match code {
        Some(code) => format!("{msg} (exit status {code})"),
        None => format!("{msg} (terminated by signal)"),
    }
}

fn spawn_error(provider: &'static str, program: &Path, err: std::io::Error) -> CryptError {
    if err.kind() == std::io::ErrorKind::NotFound {
        return CryptError::Usage(format!(
            "{provider}: {} not found; install it or point the configuration at it",
            program.display()
        ));
    }
    CryptError::io(program, err).context(format!("{provider}: spawning CLI"))
}
