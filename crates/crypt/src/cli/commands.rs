//! Command execution.

use std::future::Future;
use std::path::Path;
use std::sync::Arc;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio_util::sync::CancellationToken;
use tracing::{info, warn};
use zeroize::Zeroizing;

use common::container::FORMAT_VERSION;
use common::{Container, CryptError, KeyId, ResultExt};

use super::{is_stdio, Command, IoArgs, ProviderCommand};
use crate::config::Config;
use crate::envelope::files::{read_container, write_atomic};
use crate::envelope::{BatchReport, Crypt};
use crate::provider::{KeyProvider, Provider};

/// Run one parsed command to completion, or until `cancel` fires.
///
/// Cancellation removes any partial output before this returns.
///
/// # Errors
///
/// Returns the first [`CryptError`] encountered; the caller maps its kind to
/// an exit code.
pub async fn execute(
    command: Command,
    cfg: &Config,
    cancel: &CancellationToken,
) -> Result<(), CryptError> {
    match command {
        Command::Encrypt { provider } => encrypt(&provider, cfg, cancel).await,
        Command::Decrypt { provider } => decrypt(&provider, cfg, cancel).await,
        Command::Inspect { input, json } => until_cancelled(cancel, inspect(&input, json)).await,
        Command::Version => {
            let line = format!(
                "crypt {} (container format v{FORMAT_VERSION})\n",
                env!("CARGO_PKG_VERSION")
            );
            write_output(Path::new("-"), line.as_bytes()).await
        }
    }
}

/// Drive `op` unless `cancel` fires first. Dropping `op` removes its
/// temporary output.
async fn until_cancelled<F>(cancel: &CancellationToken, op: F) -> Result<(), CryptError>
where
    F: Future<Output = Result<(), CryptError>>,
{
    tokio::select! {
        result = op => result,
        () = cancel.cancelled() => Err(CryptError::Usage("operation cancelled".into())),
    }
}

async fn connect(
    command: &ProviderCommand,
    cfg: &Config,
    cancel: &CancellationToken,
) -> Arc<Crypt<Provider>> {
    let provider = Provider::connect(&command.settings(cfg)).await;
    Arc::new(
        Crypt::new(provider)
            .with_timeout(cfg.provider_timeout())
            .with_cancellation(cancel.clone()),
    )
}

async fn encrypt(
    command: &ProviderCommand,
    cfg: &Config,
    cancel: &CancellationToken,
) -> Result<(), CryptError> {
    let key = command.key_id()?.ok_or_else(|| {
        CryptError::Usage("encrypt needs a key; see `crypt encrypt <provider> --help`".into())
    })?;
    let io = command.io();
    let crypt = connect(command, cfg, cancel).await;

    if let (Some(in_dir), Some(out_dir)) = (&io.in_dir, &io.out_dir) {
        // Directory runs watch the token themselves and drain their jobs.
        let report = crypt
            .encrypt_dir(in_dir, out_dir, &key, cfg.concurrency)
            .await?;
        return finish_batch(report);
    }
    until_cancelled(cancel, encrypt_one(&crypt, io, &key)).await
}

async fn encrypt_one(crypt: &Crypt<Provider>, io: &IoArgs, key: &KeyId) -> Result<(), CryptError> {
    if let Some(text) = &io.text {
        let armored = crypt.encrypt_string(text, key).await?;
        return write_output(&io.output, format!("{armored}\n").as_bytes()).await;
    }

    if !is_stdio(&io.input) && !is_stdio(&io.output) && !io.armor {
        return crypt.encrypt_file(&io.input, &io.output, key).await;
    }

    let plaintext = Zeroizing::new(read_input(&io.input).await?);
    let container = crypt
        .encrypt_bytes(&plaintext, key)
        .await
        .with_context(|| format!("encrypting {}", io.input.display()))?;
    let out = if io.armor {
        format!("{}\n", container.to_armored()).into_bytes()
    } else {
        container.encode()
    };
    write_output(&io.output, &out).await
}

async fn decrypt(
    command: &ProviderCommand,
    cfg: &Config,
    cancel: &CancellationToken,
) -> Result<(), CryptError> {
    let flag_key = command.key_id()?;
    let io = command.io();
    let crypt = connect(command, cfg, cancel).await;

    if let (Some(in_dir), Some(out_dir)) = (&io.in_dir, &io.out_dir) {
        let key = flag_key.ok_or_else(|| {
            CryptError::Usage("directory decrypt needs the key flags of the provider".into())
        })?;
        let report = crypt
            .decrypt_dir(in_dir, out_dir, &key, cfg.concurrency)
            .await?;
        return finish_batch(report);
    }
    until_cancelled(cancel, decrypt_one(&crypt, io, flag_key)).await
}

async fn decrypt_one(
    crypt: &Crypt<Provider>,
    io: &IoArgs,
    flag_key: Option<KeyId>,
) -> Result<(), CryptError> {
    let (container, source) = match &io.text {
        Some(text) => (Container::parse(text.as_bytes())?, "--text".to_owned()),
        None => {
            let bytes = read_input(&io.input).await?;
            let source = io.input.display().to_string();
            let container = Container::parse(&bytes).with_context(|| format!("reading {source}"))?;
            (container, source)
        }
    };
    let key = resolve_key(flag_key, &container, crypt.provider().name());

    let mut plaintext = Zeroizing::new(
        crypt
            .decrypt_bytes(&container, &key)
            .await
            .with_context(|| format!("decrypting {source}"))?,
    );
    if io.text.is_some() && is_stdio(&io.output) {
        plaintext.push(b'\n');
    }
    write_output(&io.output, &plaintext).await
}

/// The caller's key if given, else the key id recorded in the container.
fn resolve_key(flag_key: Option<KeyId>, container: &Container, provider: &str) -> KeyId {
    match flag_key {
        Some(key) => key,
        None => {
            info!(
                provider,
                key_id = %container.key_id(),
                "no key flags given; using the key id recorded in the container"
            );
            container.key_id().clone()
        }
    }
}

async fn inspect(input: &Path, json: bool) -> Result<(), CryptError> {
    let container = if is_stdio(input) {
        let bytes = read_input(input).await?;
        Container::parse(&bytes).with_context(|| "reading stdin")?
    } else {
        read_container(input).await?
    };
    let summary = container.summary();

    let out = if json {
        let mut s = serde_json::to_string_pretty(&summary)
            .map_err(|e| CryptError::Usage(format!("rendering summary: {e}")))?;
        s.push('\n');
        s
    } else {
        format!(
            "format:      v{}\nprovider:    {}\nkey id:      {}\nwrapped key: {} bytes\nplaintext:   {} bytes\ncontainer:   {} bytes\n",
            summary.version,
            summary.provider,
            summary.key_id,
            summary.wrapped_key_len,
            summary.plaintext_len,
            summary.encoded_len,
        )
    };
    write_output(Path::new("-"), out.as_bytes()).await
}

fn finish_batch(report: BatchReport) -> Result<(), CryptError> {
    for failure in &report.failed {
        warn!(input = %failure.path.display(), error = %failure.error, "file failed");
    }
    let total = report.succeeded.len() + report.failed.len();
    info!(
        processed = report.succeeded.len(),
        skipped = report.skipped.len(),
        failed = report.failed.len(),
        "directory done"
    );
    let failed = report.failed.len();
    match report.failed.into_iter().next() {
        None => Ok(()),
        Some(first) => Err(first
            .error
            .context(format!("{failed} of {total} files failed; first: {}", first.path.display()))),
    }
}

async fn read_input(path: &Path) -> Result<Vec<u8>, CryptError> {
    if is_stdio(path) {
        let mut buf = Vec::new();
        tokio::io::stdin()
            .read_to_end(&mut buf)
            .await
            .map_err(|e| CryptError::io("<stdin>", e))?;
        return Ok(buf);
    }
    tokio::fs::read(path).await.map_err(|e| CryptError::io(path, e))
}

async fn write_output(path: &Path, bytes: &[u8]) -> Result<(), CryptError> {
    if is_stdio(path) {
        let mut stdout = tokio::io::stdout();
        stdout
            .write_all(bytes)
            .await
            .map_err(|e| CryptError::io("<stdout>", e))?;
        return stdout.flush().await.map_err(|e| CryptError::io("<stdout>", e));
    }
    write_atomic(path, bytes).await
}

#[cfg(test)]
mod tests {
    use common::ErrorKind;

    use super::*;
    use crate::envelope::BatchFailure;

    fn container(key: &str) -> Container {
        Container::new(
            "aws",
            KeyId::new(key).unwrap(),
            vec![1; 8],
            [0; 12],
            vec![0; 16],
        )
        .unwrap()
    }

    #[test]
    fn flag_key_wins_over_embedded() {
        let c = container("alias/embedded");
        let k = resolve_key(Some(KeyId::new("alias/flag").unwrap()), &c, "aws");
        assert_eq!(k.as_str(), "alias/flag");
    }

    #[test]
    fn embedded_key_used_without_flags() {
        let c = container("alias/embedded");
        assert_eq!(resolve_key(None, &c, "aws").as_str(), "alias/embedded");
    }

    #[test]
    fn batch_failure_surfaces_first_error_kind() {
        let report = BatchReport {
            succeeded: vec!["ok".into()],
            skipped: vec![],
            failed: vec![BatchFailure {
                path: "bad.crypt".into(),
                error: CryptError::Integrity,
            }],
        };
        let err = finish_batch(report).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Integrity);
        assert!(err.to_string().starts_with("1 of 2 files failed"));
    }

    #[test]
    fn clean_batch_is_ok() {
        assert!(finish_batch(BatchReport::default()).is_ok());
    }

    #[tokio::test]
    async fn write_output_to_file_is_atomic() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.txt");
        write_output(&path, b"hello").await.unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"hello");
    }

    #[tokio::test]
    async fn inspect_missing_file_is_io_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = inspect(&dir.path().join("absent"), false).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Io);
    }

    #[tokio::test]
    async fn cancellation_stops_a_pending_operation() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let err = until_cancelled(&cancel, std::future::pending::<Result<(), CryptError>>())
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
    }

    #[tokio::test]
    async fn finished_operation_wins_without_cancellation() {
        let cancel = CancellationToken::new();
        assert!(until_cancelled(&cancel, async { Ok(()) }).await.is_ok());
    }
}
