//! File variants of the envelope operations.
//!
//! Input is read whole; output is written to a sibling temporary file,
//! fsynced and renamed over the destination. The temporary file is removed
//! on every failure path, including when the future is dropped mid-write.

use std::path::{Path, PathBuf};

use tokio::io::AsyncWriteExt;
use tracing::info;
use zeroize::Zeroizing;

use common::{Container, CryptError, KeyId, ResultExt};

use super::Crypt;
use crate::crypto::EntropySource;
use crate::provider::KeyProvider;

impl<P: KeyProvider, E: EntropySource> Crypt<P, E> {
    /// Encrypt the file at `input` into a binary container at `output`.
    ///
    /// # Errors
    ///
    /// As [`encrypt_bytes`](Self::encrypt_bytes), plus [`CryptError::Io`].
    /// On error `output` is left untouched.
    pub async fn encrypt_file(&self, input: &Path, output: &Path, key: &KeyId) -> Result<(), CryptError> {
        let plaintext = Zeroizing::new(read(input).await?);
        let sealed = self
            .seal(&plaintext, key)
            .await
            .with_context(|| format!("encrypting {}", input.display()))?;
        write_atomic(output, &sealed).await?;
        info!(
            input = %input.display(),
            output = %output.display(),
            bytes = plaintext.len(),
            "encrypted file"
        );
        Ok(())
    }

    /// Decrypt the container at `input` (binary or armored) into `output`.
    ///
    /// # Errors
    ///
    /// As [`decrypt_bytes`](Self::decrypt_bytes), plus [`CryptError::Io`].
    /// On error `output` is left untouched.
    pub async fn decrypt_file(&self, input: &Path, output: &Path, key: &KeyId) -> Result<(), CryptError> {
        let bytes = read(input).await?;
        let plaintext = Zeroizing::new(
            self.open(&bytes, key)
                .await
                .with_context(|| format!("decrypting {}", input.display()))?,
        );
        write_atomic(output, &plaintext).await?;
        info!(
            input = %input.display(),
            output = %output.display(),
            bytes = plaintext.len(),
            "decrypted file"
        );
        Ok(())
    }
}

/// Read and parse a container without decrypting it.
pub async fn read_container(path: &Path) -> Result<Container, CryptError> {
    let bytes = read(path).await?;
    Container::parse(&bytes).with_context(|| format!("reading {}", path.display()))
}

async fn read(path: &Path) -> Result<Vec<u8>, CryptError> {
    tokio::fs::read(path).await.map_err(|e| CryptError::io(path, e))
}

/// Removes the temporary file unless disarmed.
struct TempFile {
    path: Option<PathBuf>,
}

impl TempFile {
    fn disarm(&mut self) {
        self.path = None;
    }
}

impl Drop for TempFile {
    fn drop(&mut self) {
        if let Some(path) = self.path.take() {
            let _ = std::fs::remove_file(path);
        }
    }
}

/// Write `bytes` to `dest` through a fsynced sibling temp file and a rename.
pub(crate) async fn write_atomic(dest: &Path, bytes: &[u8]) -> Result<(), CryptError> {
    let dir = match dest.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let name = dest
        .file_name()
        .ok_or_else(|| CryptError::Usage(format!("{} is not a file path", dest.display())))?;
    let tmp_path = dir.join(format!(
        ".{}.{}.tmp",
        name.to_string_lossy(),
        uuid::Uuid::new_v4().simple()
    ));

    let mut guard = TempFile {
        path: Some(tmp_path.clone()),
    };

    // Created synchronously: an abort can then never leave a file the guard
    // has not seen.
    let mut options = std::fs::OpenOptions::new();
    options.write(true).create_new(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = tokio::fs::File::from_std(
        options
            .open(&tmp_path)
            .map_err(|e| CryptError::io(&tmp_path, e))?,
    );
    file.write_all(bytes)
        .await
        .map_err(|e| CryptError::io(&tmp_path, e))?;
    file.sync_all()
        .await
        .map_err(|e| CryptError::io(&tmp_path, e))?;
    drop(file);

    tokio::fs::rename(&tmp_path, dest)
        .await
        .map_err(|e| CryptError::io(dest, e))?;
    guard.disarm();
    Ok(())
}
