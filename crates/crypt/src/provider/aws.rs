//! AWS KMS provider.
//!
//! Key identities are anything KMS accepts as a `KeyId`: a key id, key ARN,
//! alias name (`alias/...`) or alias ARN. Credentials and region come from the
//! standard AWS chain (environment, shared profile, SSO, instance role).

use std::error::Error as StdError;
use std::fmt::Debug;

use aws_config::BehaviorVersion;
use aws_sdk_kms::error::{DisplayErrorContext, ProvideErrorMetadata, SdkError};
use aws_sdk_kms::primitives::Blob;
use tracing::debug;
use zeroize::Zeroizing;

use common::{CryptError, KeyId};

use super::{check_wrap_len, Failure, KeyProvider};

/// Provider tag recorded in containers.
pub const NAME: &str = "aws";

/// KMS `Encrypt` accepts at most 4096 bytes of plaintext.
pub const MAX_WRAP_LEN: usize = 4096;

/// AWS KMS through `aws-sdk-kms`.
#[derive(Clone, Debug)]
pub struct AwsKms {
    client: aws_sdk_kms::Client,
}

impl AwsKms {
    /// Build a client from the default credential and region chain.
    ///
    /// `region` and `endpoint_url` override the chain when set; the endpoint
    /// is meant for local KMS emulators.
    pub async fn from_env(region: Option<String>, endpoint_url: Option<String>) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = region {
            loader = loader.region(aws_config::Region::new(region));
        }
        if let Some(url) = endpoint_url {
            loader = loader.endpoint_url(url);
        }
        let config = loader.load().await;
        Self::from_client(aws_sdk_kms::Client::new(&config))
    }

    /// Wrap an already configured client.
    pub fn from_client(client: aws_sdk_kms::Client) -> Self {
        Self { client }
    }
}

impl KeyProvider for AwsKms {
    fn name(&self) -> &'static str {
        NAME
    }

    fn max_wrap_len(&self) -> usize {
        MAX_WRAP_LEN
    }

    async fn wrap(&self, key: &KeyId, plaintext: &[u8]) -> Result<Vec<u8>, CryptError> {
        check_wrap_len(NAME, MAX_WRAP_LEN, plaintext.len())?;
        debug!(key_id = %key, "wrapping data key with AWS KMS");

        let resp = self
            .client
            .encrypt()
            .key_id(key.as_str())
            .plaintext(Blob::new(plaintext))
            .send()
            .await
            .map_err(sdk_error)?;

        resp.ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .filter(|blob| !blob.is_empty())
            .ok_or_else(|| Failure::Rejected.into_error(NAME, "KMS returned no ciphertext"))
    }

    async fn unwrap(&self, key: &KeyId, wrapped: &[u8]) -> Result<Zeroizing<Vec<u8>>, CryptError> {
        debug!(key_id = %key, wrapped_len = wrapped.len(), "unwrapping data key with AWS KMS");

        // Pinning key_id makes KMS refuse a blob sealed under any other key.
        let resp = self
            .client
            .decrypt()
            .key_id(key.as_str())
            .ciphertext_blob(Blob::new(wrapped))
            .send()
            .await
            .map_err(sdk_error)?;

        resp.plaintext()
            .map(|blob| Zeroizing::new(blob.as_ref().to_vec()))
            .ok_or_else(|| Failure::Rejected.into_error(NAME, "KMS returned no plaintext"))
    }
}

fn sdk_error<E, R>(err: SdkError<E, R>) -> CryptError
where
    E: ProvideErrorMetadata + StdError + Send + Sync + 'static,
    R: Debug,
{
    let message = DisplayErrorContext(&err).to_string();
    classify_sdk_error(&err, &message).into_error(NAME, message)
}

/// Map an SDK failure onto a [`Failure`] class.
fn classify_sdk_error<E, R>(err: &SdkError<E, R>, message: &str) -> Failure
where
    E: ProvideErrorMetadata,
{
    match err {
        SdkError::ServiceError(ctx) => classify_code(ctx.err().code()),
        SdkError::TimeoutError(_) | SdkError::ResponseError(_) => Failure::Transient,
        // Credential resolution failures surface as dispatch failures.
        SdkError::DispatchFailure(_) if message.to_ascii_lowercase().contains("credential") => {
            Failure::Auth
        }
        SdkError::DispatchFailure(_) => Failure::Transient,
        SdkError::ConstructionFailure(_) => Failure::Misconfigured,
        _ => Failure::Rejected,
    }
}

/// Map a KMS error code onto a [`Failure`] class.
fn classify_code(code: Option<&str>) -> Failure {
    match code.unwrap_or_default() {
        "AccessDeniedException"
        | "UnrecognizedClientException"
        | "InvalidSignatureException"
        | "ExpiredTokenException"
        | "IncompleteSignature"
        | "MissingAuthenticationToken" => Failure::Auth,
        "NotFoundException" | "DisabledException" | "KMSInvalidStateException" => Failure::NotFound,
        "KMSInternalException"
        | "DependencyTimeoutException"
        | "ThrottlingException"
        | "LimitExceededException"
        | "ServiceUnavailableException"
        | "KeyUnavailableException"
        | "CustomKeyStoreInvalidStateException" => Failure::Transient,
        _ => Failure::Rejected,
    }
}
