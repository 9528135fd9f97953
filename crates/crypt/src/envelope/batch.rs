//! Directory (batch) mode.
//!
//! Every regular file under the input directory becomes one job. Jobs run
//! concurrently on a shared [`Crypt`], bounded by a semaphore, and a failing
//! job never affects the others.
//!
//! A run is cancelled through the engine's cancellation token
//! ([`Crypt::with_cancellation`]). Running jobs are aborted and awaited, so
//! every temporary file is gone by the time the run returns.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{info, warn};

use common::{CryptError, KeyId};

use super::Crypt;
use crate::crypto::EntropySource;
use crate::provider::KeyProvider;

/// Suffix appended on encrypt and stripped on decrypt.
pub const SEALED_SUFFIX: &str = ".crypt";

/// One file that could not be processed.
#[derive(Debug)]
pub struct BatchFailure {
    /// Input file.
    pub path: PathBuf,
    /// Why it failed.
    pub error: CryptError,
}

/// Outcome of a batch run.
#[derive(Debug, Default)]
pub struct BatchReport {
    /// Input files written successfully.
    pub succeeded: Vec<PathBuf>,
    /// Input files ignored (no `.crypt` suffix on decrypt).
    pub skipped: Vec<PathBuf>,
    /// Input files that failed.
    pub failed: Vec<BatchFailure>,
}

impl BatchReport {
    /// `true` when no job failed.
    pub fn is_success(&self) -> bool {
        self.failed.is_empty()
    }

    /// The error of the first failed job, in input path order.
    pub fn first_error(&self) -> Option<&CryptError> {
        self.failed.first().map(|f| &f.error)
    }
}

#[derive(Debug, Clone, Copy)]
enum Direction {
    Encrypt,
    Decrypt,
}

impl<P, E> Crypt<P, E>
where
    P: KeyProvider + 'static,
    E: EntropySource + 'static,
{
    /// Encrypt every file under `in_dir` into `out_dir`, appending `.crypt`.
    ///
    /// # Errors
    ///
    /// Fails if the input tree cannot be walked or the run is cancelled;
    /// per-file failures are collected in the [`BatchReport`].
    pub async fn encrypt_dir(
        self: &Arc<Self>,
        in_dir: &Path,
        out_dir: &Path,
        key: &KeyId,
        concurrency: usize,
    ) -> Result<BatchReport, CryptError> {
        self.run_batch(Direction::Encrypt, in_dir, out_dir, key, concurrency)
            .await
    }

    /// Decrypt every `.crypt` file under `in_dir` into `out_dir`, stripping the suffix.
    ///
    /// # Errors
    ///
    /// Fails if the input tree cannot be walked or the run is cancelled;
    /// per-file failures are collected in the [`BatchReport`].
    pub async fn decrypt_dir(
        self: &Arc<Self>,
        in_dir: &Path,
        out_dir: &Path,
        key: &KeyId,
        concurrency: usize,
    ) -> Result<BatchReport, CryptError> {
        self.run_batch(Direction::Decrypt, in_dir, out_dir, key, concurrency)
            .await
    }

    async fn run_batch(
        self: &Arc<Self>,
        direction: Direction,
        in_dir: &Path,
        out_dir: &Path,
        key: &KeyId,
        concurrency: usize,
    ) -> Result<BatchReport, CryptError> {
        let files = walk(in_dir, out_dir).await?;
        let permits = Arc::new(Semaphore::new(concurrency.max(1)));
        let mut report = BatchReport::default();
        let mut jobs = JoinSet::new();

        for rel in files {
            let input = in_dir.join(&rel);
            let Some(output) = output_path(direction, out_dir, &rel) else {
                report.skipped.push(input);
                continue;
            };

            let crypt = Arc::clone(self);
            let permits = Arc::clone(&permits);
            let key = key.clone();
            jobs.spawn(async move {
                let result = match permits.acquire_owned().await {
                    Ok(_permit) => crypt.run_one(direction, &input, &output, &key).await,
                    Err(_) => Err(CryptError::Usage("batch cancelled".into())),
                };
                (input, result)
            });
        }

        loop {
            let joined = tokio::select! {
                biased;
                () = self.cancel.cancelled() => {
                    let pending = jobs.len();
                    jobs.shutdown().await;
                    warn!(
                        succeeded = report.succeeded.len(),
                        aborted = pending,
                        "batch cancelled"
                    );
                    return Err(CryptError::Usage("batch cancelled".into()));
                }
                joined = jobs.join_next() => joined,
            };
            let Some(joined) = joined else { break };
            match joined {
                Ok((input, Ok(()))) => report.succeeded.push(input),
                Ok((input, Err(error))) => {
                    warn!(input = %input.display(), error = %error, "batch job failed");
                    report.failed.push(BatchFailure { path: input, error });
                }
                Err(e) => {
                    warn!(error = %e, "batch job aborted");
                    report.failed.push(BatchFailure {
                        path: PathBuf::new(),
                        error: CryptError::Usage(format!("batch job aborted: {e}")),
                    });
                }
            }
        }

        report.succeeded.sort();
        report.skipped.sort();
        report.failed.sort_by(|a, b| a.path.cmp(&b.path));
        info!(
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "batch finished"
        );
        Ok(report)
    }

    async fn run_one(
        &self,
        direction: Direction,
        input: &Path,
        output: &Path,
        key: &KeyId,
    ) -> Result<(), CryptError> {
        if let Some(parent) = output.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| CryptError::io(parent, e))?;
        }
        match direction {
            Direction::Encrypt => self.encrypt_file(input, output, key).await,
            Direction::Decrypt => self.decrypt_file(input, output, key).await,
        }
    }
}

fn output_path(direction: Direction, out_dir: &Path, rel: &Path) -> Option<PathBuf> {
    let name = rel.file_name()?.to_str()?;
    let out_name = match direction {
        Direction::Encrypt => format!("{name}{SEALED_SUFFIX}"),
        Direction::Decrypt => name
            .strip_suffix(SEALED_SUFFIX)
            .filter(|stem| !stem.is_empty())?
            .to_owned(),
    };
    Some(out_dir.join(rel).with_file_name(out_name))
}

/// Regular files under `root`, relative to it, sorted. `skip` is not entered.
async fn walk(root: &Path, skip: &Path) -> Result<Vec<PathBuf>, CryptError> {
    // An output directory that does not exist yet cannot be inside the walk.
    let skip = tokio::fs::canonicalize(skip).await.ok();
    let mut files = Vec::new();
    let mut pending = vec![PathBuf::new()];

    while let Some(rel) = pending.pop() {
        let dir = root.join(&rel);
        let mut entries = tokio::fs::read_dir(&dir)
            .await
            .map_err(|e| CryptError::io(&dir, e))?;
        while let Some(entry) = entries
            .next_entry()
            .await
            .map_err(|e| CryptError::io(&dir, e))?
        {
            let path = entry.path();
            let file_type = entry
                .file_type()
                .await
                .map_err(|e| CryptError::io(&path, e))?;
            let child = rel.join(entry.file_name());
            if file_type.is_dir() {
                if !is_same_dir(&path, skip.as_deref()).await {
                    pending.push(child);
                }
            } else if file_type.is_file() {
                files.push(child);
            }
        }
    }

    files.sort();
    Ok(files)
}

async fn is_same_dir(path: &Path, canonical: Option<&Path>) -> bool {
    match canonical {
        Some(canonical) => tokio::fs::canonicalize(path)
            .await
            .is_ok_and(|p| p == canonical),
        None => false,
    }
}
