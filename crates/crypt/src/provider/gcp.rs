//! Google Cloud KMS provider, driven through the `gcloud` CLI.
//!
//! ## Requirements
//!
//! - `gcloud` CLI installed and authenticated (`gcloud auth login` or a
//!   service account via `GOOGLE_APPLICATION_CREDENTIALS`)
//! - `cloudkms.cryptoKeyVersions.useToEncrypt` and `useToDecrypt` on the key
//!
//! Key identities are full resource names:
//! `projects/<project>/locations/<location>/keyRings/<ring>/cryptoKeys/<key>`.
//! Cloud KMS records the key version inside the ciphertext, so unwrap works
//! across key rotations.

use std::path::{Path, PathBuf};

use tracing::debug;
use zeroize::Zeroizing;

use common::{CryptError, KeyId};

use super::process::{self, Markers};
use super::{check_wrap_len, Failure, KeyProvider};

/// Provider tag recorded in containers.
pub const NAME: &str = "gcp";

/// Cloud KMS symmetric encrypt accepts at most 64 KiB of plaintext.
pub const MAX_WRAP_LEN: usize = 64 * 1024;

const MARKERS: Markers = &[
    ("PERMISSION_DENIED", Failure::Auth),
    ("UNAUTHENTICATED", Failure::Auth),
    ("reauthentication", Failure::Auth),
    ("gcloud auth login", Failure::Auth),
    ("NOT_FOUND", Failure::NotFound),
    ("FAILED_PRECONDITION", Failure::NotFound),
    ("UNAVAILABLE", Failure::Transient),
    ("DEADLINE_EXCEEDED", Failure::Transient),
    ("RESOURCE_EXHAUSTED", Failure::Transient),
    ("timed out", Failure::Transient),
    ("connection refused", Failure::Transient),
    ("connection reset", Failure::Transient),
    ("connection aborted", Failure::Transient),
    ("connection timed out", Failure::Transient),
    ("INVALID_ARGUMENT", Failure::Rejected),
    ("decryption failed", Failure::Rejected),
];

/// The four components of a Cloud KMS crypto key resource name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResourceName {
    /// GCP project ID.
    pub project: String,
    /// Location, e.g. `global` or `europe-west1`.
    pub location: String,
    /// Key ring name.
    pub key_ring: String,
    /// Crypto key name.
    pub key: String,
}

impl ResourceName {
    /// Parse `projects/*/locations/*/keyRings/*/cryptoKeys/*`.
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Usage`] if `id` is not a crypto key resource name.
    pub fn parse(id: &KeyId) -> Result<Self, CryptError> {
        let parts: Vec<&str> = id.as_str().split('/').collect();
        if parts.len() != 8
            || parts[0] != "projects"
            || parts[2] != "locations"
            || parts[4] != "keyRings"
            || parts[6] != "cryptoKeys"
            || [parts[1], parts[3], parts[5], parts[7]]
                .iter()
                .any(|p| p.is_empty())
        {
            return Err(CryptError::Usage(format!(
                "invalid GCP KMS key name {id}; expected projects/P/locations/L/keyRings/R/cryptoKeys/K"
            )));
        }
        Ok(Self {
            project: parts[1].to_owned(),
            location: parts[3].to_owned(),
            key_ring: parts[5].to_owned(),
            key: parts[7].to_owned(),
        })
    }

    /// Render back to a [`KeyId`].
    ///
    /// # Errors
    ///
    /// Returns [`CryptError::Usage`] if any component is empty or contains `/`.
    pub fn to_key_id(&self) -> Result<KeyId, CryptError> {
        let id = KeyId::new(format!(
            "projects/{}/locations/{}/keyRings/{}/cryptoKeys/{}",
            self.project, self.location, self.key_ring, self.key
        ))?;
        // Round-trip through the parser to reject empty or slash-bearing parts.
        Self::parse(&id)?;
        Ok(id)
    }
}

/// Google Cloud KMS via `gcloud kms encrypt|decrypt`.
#[derive(Debug, Clone)]
pub struct GcpKms {
    gcloud: PathBuf,
}

impl GcpKms {
    /// Use the `gcloud` executable at `gcloud` (a bare name is looked up on `PATH`).
    pub fn new(gcloud: impl AsRef<Path>) -> Self {
        Self {
            gcloud: gcloud.as_ref().to_path_buf(),
        }
    }

    async fn call(&self, verb: &str, key: &KeyId, input: &[u8]) -> Result<Vec<u8>, CryptError> {
        let name = ResourceName::parse(key)?;
        let (input_flag, output_flag) = match verb {
            "encrypt" => ("--plaintext-file", "--ciphertext-file"),
            _ => ("--ciphertext-file", "--plaintext-file"),
        };
        let args = [
            "kms",
            verb,
            "--project",
            name.project.as_str(),
            "--location",
            name.location.as_str(),
            "--keyring",
            name.key_ring.as_str(),
            "--key",
            name.key.as_str(),
            input_flag,
            "-",
            output_flag,
            "-",
        ];
        process::run(NAME, &self.gcloud, &args, Some(input), MARKERS).await
    }
}

impl KeyProvider for GcpKms {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_wrap_len(&self) -> usize {
        MAX_WRAP_LEN
    }

    async fn wrap(&self, key: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        check_wrap_len(NAME, MAX_WRAP_LEN, plaintext.len())?;
        debug!(key_id = %key, "wrapping data key with GCP KMS");
        let wrapped = self.call("encrypt", key, plaintext).await?;
        if wrapped.is_empty() {
            return Err(Failure::Rejected.into_error(NAME, "gcloud returned no ciphertext"));
        }
        Ok(wrapped)
    }

    async fn unwrap(&self, key: &KeyId, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        debug!(key_id = %key, wrapped_len = wrapped.len(), "unwrapping data key with GCP KMS");
        self.call("decrypt", key, wrapped).await.map(Zeroizing::new)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::ErrorKind;

    const KEY: &str = "projects/my-proj/locations/global/keyRings/ring/cryptoKeys/key";

    #[test]
    fn parses_resource_name() {
        let name = ResourceName::parse(&KeyId::new(KEY).unwrap()).unwrap();
        assert_eq!(name.project, "my-proj");
        assert_eq!(name.location, "global");
        assert_eq!(name.key_ring, "ring");
        assert_eq!(name.key, "key");
        assert_eq!(name.to_key_id().unwrap().as_str(), KEY);
    }

    #[test]
    fn rejects_malformed_resource_names() {
        for bad in [
            "projects/foo",
            "arn:aws:kms:us-east-1:1:key/abc",
            "projects//locations/global/keyRings/ring/cryptoKeys/key",
            "projects/p/locations/l/keyRings/r/cryptoKeys/k/cryptoKeyVersions/1",
        ] {
            let id = KeyId::new(bad).unwrap();
            assert!(ResourceName::parse(&id).is_err(), "{bad} accepted");
        }
    }

    #[test]
    fn to_key_id_rejects_slashes() {
        let name = ResourceName {
            project: "p".into(),
            location: "l".into(),
            key_ring: "r/x".into(),
            key: "k".into(),
        };
        assert!(name.to_key_id().is_err());
    }

    #[test]
    fn markers_classify_gcloud_errors() {
        let cases = [
            ("ERROR: (gcloud.kms.encrypt) PERMISSION_DENIED: Permission 'cloudkms.cryptoKeyVersions.useToEncrypt' denied", Failure::Auth),
            ("ERROR: (gcloud.kms.decrypt) NOT_FOUND: CryptoKey projects/p/... not found.", Failure::NotFound),
            ("ERROR: (gcloud.kms.decrypt) FAILED_PRECONDITION: The request cannot be fulfilled. CryptoKeyVersion is DESTROYED", Failure::NotFound),
            ("ERROR: (gcloud.kms.encrypt) UNAVAILABLE: The service is currently unavailable.", Failure::Transient),
            ("ERROR: (gcloud.kms.decrypt) INVALID_ARGUMENT: Decryption failed: verify that 'name' refers to the correct CryptoKey.", Failure::Rejected),
            ("ERROR: gcloud crashed (ConnectionError): ('Connection aborted.', RemoteDisconnected('Remote end closed connection without response'))", Failure::Transient),
            ("ERROR: [Errno 111] Connection refused", Failure::Transient),
            ("ERROR: [Errno 104] Connection reset by peer", Failure::Transient),
            ("ERROR: (gcloud.kms.encrypt) The connection property [proxy/type] is invalid.", Failure::Rejected),
        ];
        for (stderr, expected) in cases {
            assert_eq!(process::classify(stderr, MARKERS), expected, "{stderr}");
        }
    }

    #[tokio::test]
    async fn invalid_key_name_fails_before_spawning() {
        let kms = GcpKms::new("/nonexistent/gcloud");
        let key = KeyId::new("alias/not-gcp").unwrap();
        let err = kms.wrap(&key, &[0u8; 32]).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Usage);
        assert!(err.to_string().contains("invalid GCP KMS key name"));
    }

    /// A fake `gcloud` that checks the flag layout for its verb, logs its
    /// arguments and echoes stdin.
    #[cfg(unix)]
    fn fake_gcloud(dir: &Path) -> (GcpKms, PathBuf) {
        let log = dir.join("gcloud.log");
        let script = r#"#!/bin/sh
printf '%s\n' "$*" >> "@LOG@"
[ "$1" = kms ] || { echo "ERROR: unexpected command $1" >&2; exit 2; }
case "$2" in
  encrypt) input=--plaintext-file; output=--ciphertext-file ;;
  decrypt) input=--ciphertext-file; output=--plaintext-file ;;
  *) echo "ERROR: unexpected verb $2" >&2; exit 2 ;;
esac
[ "${11}" = "$input" ] && [ "${12}" = - ] && [ "${13}" = "$output" ] && [ "${14}" = - ] || {
  echo "INVALID_ARGUMENT: bad file flags for $2" >&2; exit 1; }
cat
"#
        .replace("@LOG@", &log.display().to_string());
        let bin = process::tests::write_script(dir, "gcloud", &script);
        (GcpKms::new(bin), log)
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn wrap_unwrap_through_gcloud() {
        let dir = tempfile::tempdir().unwrap();
        let (kms, log) = fake_gcloud(dir.path());
        let key = KeyId::new(KEY).unwrap();
        let data_key = [0x42u8; 32];

        let wrapped = kms.wrap(&key, &data_key).await.unwrap();
        let unwrapped = kms.unwrap(&key, &wrapped).await.unwrap();
        assert_eq!(unwrapped.as_slice(), &data_key);

        let argv = std::fs::read_to_string(&log).unwrap();
        let lines: Vec<&str> = argv.lines().collect();
        let resource = "--project my-proj --location global --keyring ring --key key";
        assert_eq!(
            lines,
            vec![
                format!("kms encrypt {resource} --plaintext-file - --ciphertext-file -"),
                format!("kms decrypt {resource} --ciphertext-file - --plaintext-file -"),
            ]
        );
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn empty_gcloud_output_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let bin = process::tests::write_script(dir.path(), "gcloud", "#!/bin/sh\ncat > /dev/null\n");
        let err = GcpKms::new(bin)
            .wrap(&KeyId::new(KEY).unwrap(), &[1u8; 32])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderRejected);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn gcloud_failure_is_classified() {
        let dir = tempfile::tempdir().unwrap();
        let bin = process::tests::write_script(
            dir.path(),
            "gcloud",
            "#!/bin/sh\ncat > /dev/null\necho 'ERROR: (gcloud.kms.decrypt) NOT_FOUND: CryptoKey not found.' >&2\nexit 1\n",
        );
        let err = GcpKms::new(bin)
            .unwrap(&KeyId::new(KEY).unwrap(), &[1u8; 40])
            .await
            .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProviderNotFound);
    }
}
