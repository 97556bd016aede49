//! Key-management service boundary.
//!
//! [`KeyService`] is the seam between the vault and the remote service that
//! performs the actual cryptography. [`AwsKms`] is the production
//! implementation backed by AWS KMS; tests substitute their own.
//!
//! Region and credentials travel in an explicit [`KmsContext`] passed to
//! every call. Nothing here keeps process-wide state.

use async_trait::async_trait;
use aws_config::BehaviorVersion;
use aws_sdk_kms::config::{Credentials, Region};
use aws_sdk_kms::error::DisplayErrorContext;
use aws_sdk_kms::primitives::Blob;
use aws_sdk_kms::Client;
use thiserror::Error;
use tracing::debug;

/// Region used when none is configured.
pub const DEFAULT_REGION: &str = "ap-northeast-1";

/// Failure reported by a [`KeyService`]. Never retried.
#[derive(Error, Debug)]
pub enum KmsError {
    /// Encrypt was called without a key identifier
    #[error("a key ID is required to encrypt")]
    MissingKeyId,

    /// The service answered without the expected payload
    #[error("service response did not contain {0}")]
    EmptyResponse(&'static str),

    /// Remote failure: auth, missing key, network, throttling
    #[error("{0}")]
    Service(String),
}

/// Where AWS credentials come from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CredentialSource {
    /// Explicit access key pair
    Static {
        access_key_id: String,
        secret_access_key: String,
    },
    /// Named profile from the shared credentials file
    Profile(String),
    /// The SDK's default provider chain
    Environment,
}

impl CredentialSource {
    /// Pick a credential source: static keys > shared profile > environment.
    ///
    /// Static keys are used only when both halves are non-empty.
    pub fn select(
        access_key_id: Option<&str>,
        secret_access_key: Option<&str>,
        profile: Option<&str>,
    ) -> Self {
        let non_empty = |s: Option<&str>| s.filter(|s| !s.is_empty()).map(str::to_string);

        match (non_empty(access_key_id), non_empty(secret_access_key)) {
            (Some(access_key_id), Some(secret_access_key)) => CredentialSource::Static {
                access_key_id,
                secret_access_key,
            },
            _ => match non_empty(profile) {
                Some(name) => CredentialSource::Profile(name),
                None => CredentialSource::Environment,
            },
        }
    }
}

/// Region, credentials and optional endpoint for one run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KmsContext {
    pub region: String,
    pub credentials: CredentialSource,
    /// Override for KMS-compatible endpoints (e.g. a local emulator)
    pub endpoint: Option<String>,
}

impl KmsContext {
    pub fn new(region: impl Into<String>, credentials: CredentialSource) -> Self {
        Self {
            region: region.into(),
            credentials,
            endpoint: None,
        }
    }

    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }
}

impl Default for KmsContext {
    fn default() -> Self {
        Self::new(DEFAULT_REGION, CredentialSource::Environment)
    }
}

/// Encrypt/decrypt by key identifier.
#[async_trait]
pub trait KeyService: Send + Sync {
    /// Encrypt `plaintext` under `key_id`. `key_id` must be non-empty.
    async fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        ctx: &KmsContext,
    ) -> Result<Vec<u8>, KmsError>;

    /// Decrypt `ciphertext`. `key_id` may be `None` when the service can
    /// recover the key from the ciphertext itself.
    async fn decrypt(
        &self,
        key_id: Option<&str>,
        ciphertext: &[u8],
        ctx: &KmsContext,
    ) -> Result<Vec<u8>, KmsError>;
}

/// AWS KMS key service.
///
/// The SDK client is built from the context on each call, so one `AwsKms`
/// can serve calls with different regions or credentials. Loading the SDK
/// config does not touch the network.
#[derive(Debug, Clone, Copy, Default)]
pub struct AwsKms;

impl AwsKms {
    pub fn new() -> Self {
        Self
    }

    async fn client(ctx: &KmsContext) -> Client {
        let mut loader =
            aws_config::defaults(BehaviorVersion::latest()).region(Region::new(ctx.region.clone()));

        match &ctx.credentials {
            CredentialSource::Static {
                access_key_id,
                secret_access_key,
            } => {
                loader = loader.credentials_provider(Credentials::new(
                    access_key_id.clone(),
                    secret_access_key.clone(),
                    None,
                    None,
                    "deckhand-static",
                ));
            }
            CredentialSource::Profile(name) => {
                loader = loader.profile_name(name);
            }
            CredentialSource::Environment => {}
        }

        if let Some(endpoint) = &ctx.endpoint {
            debug!("Using custom KMS endpoint: {}", endpoint);
            loader = loader.endpoint_url(endpoint);
        }

        let sdk_config = loader.load().await;
        Client::new(&sdk_config)
    }
}

#[async_trait]
impl KeyService for AwsKms {
    async fn encrypt(
        &self,
        key_id: &str,
        plaintext: &[u8],
        ctx: &KmsContext,
    ) -> Result<Vec<u8>, KmsError> {
        if key_id.is_empty() {
            return Err(KmsError::MissingKeyId);
        }

        debug!(region = %ctx.region, key_id, "KMS encrypt");
        let output = Self::client(ctx)
            .await
            .encrypt()
            .key_id(key_id)
            .plaintext(Blob::new(plaintext.to_vec()))
            .send()
            .await
            .map_err(|e| KmsError::Service(DisplayErrorContext(&e).to_string()))?;

        output
            .ciphertext_blob()
            .map(|blob| blob.as_ref().to_vec())
            .filter(|bytes| !bytes.is_empty())
            .ok_or(KmsError::EmptyResponse("a ciphertext blob"))
    }

    async fn decrypt(
        &self,
        key_id: Option<&str>,
        ciphertext: &[u8],
        ctx: &KmsContext,
    ) -> Result<Vec<u8>, KmsError> {
        debug!(region = %ctx.region, key_id = ?key_id, "KMS decrypt");
        let output = Self::client(ctx)
            .await
            .decrypt()
            .set_key_id(key_id.filter(|k| !k.is_empty()).map(str::to_string))
            .ciphertext_blob(Blob::new(ciphertext.to_vec()))
            .send()
            .await
            .map_err(|e| KmsError::Service(DisplayErrorContext(&e).to_string()))?;

        output
            .plaintext()
            .map(|blob| blob.as_ref().to_vec())
            .ok_or(KmsError::EmptyResponse("plaintext"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_static_keys_win_over_profile() {
        let source = CredentialSource::select(Some("AKIA123"), Some("secret"), Some("staging"));
        assert_eq!(
            source,
            CredentialSource::Static {
                access_key_id: "AKIA123".to_string(),
                secret_access_key: "secret".to_string(),
            }
        );
    }

    #[test]
    fn test_half_static_pair_falls_back_to_profile() {
        let source = CredentialSource::select(Some("AKIA123"), Some(""), Some("staging"));
        assert_eq!(source, CredentialSource::Profile("staging".to_string()));

        let source = CredentialSource::select(None, Some("secret"), Some("staging"));
        assert_eq!(source, CredentialSource::Profile("staging".to_string()));
    }

    #[test]
    fn test_nothing_configured_uses_environment() {
        assert_eq!(
            CredentialSource::select(None, None, None),
            CredentialSource::Environment
        );
        assert_eq!(
            CredentialSource::select(Some(""), Some(""), Some("")),
            CredentialSource::Environment
        );
    }

    #[test]
    fn test_default_context() {
        let ctx = KmsContext::default();
        assert_eq!(ctx.region, DEFAULT_REGION);
        assert_eq!(ctx.credentials, CredentialSource::Environment);
        assert_eq!(ctx.endpoint, None);

        let ctx = ctx.with_endpoint("http://localhost:4566");
        assert_eq!(ctx.endpoint.as_deref(), Some("http://localhost:4566"));
    }

    #[tokio::test]
    async fn test_aws_encrypt_rejects_empty_key_id_without_calling_out() {
        let result = AwsKms::new()
            .encrypt("", b"plaintext", &KmsContext::default())
            .await;
        assert!(matches!(result, Err(KmsError::MissingKeyId)));
    }
}
