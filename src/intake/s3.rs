//! S3 sink for action payloads.

use super::{ActionSink, IntakeError};
use async_trait::async_trait;
use aws_credential_types::Credentials;
use aws_sdk_s3::{
    config::{BehaviorVersion, Region},
    error::DisplayErrorContext,
    primitives::ByteStream,
    Client,
};
use secrecy::{ExposeSecret, SecretString};
use tracing::{debug, instrument};

pub const DEFAULT_REGION: &str = "eu-west-2";

#[derive(Debug, Clone)]
pub struct S3SinkConfig {
    pub bucket: String,
    pub region: String,
    pub endpoint: Option<String>,
    pub force_path_style: bool,
    pub access_key_id: String,
    pub secret_access_key: SecretString,
}

impl S3SinkConfig {
    #[must_use]
    pub fn new(bucket: String, access_key_id: String, secret_access_key: SecretString) -> Self {
        Self {
            bucket,
            region: DEFAULT_REGION.to_string(),
            endpoint: None,
            force_path_style: false,
            access_key_id,
            secret_access_key,
        }
    }

    #[must_use]
    pub fn with_region(mut self, region: impl Into<String>) -> Self {
        self.region = region.into();
        self
    }

    /// S3-compatible endpoint such as MinIO.
    #[must_use]
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = Some(endpoint.into());
        self
    }

    #[must_use]
    pub fn with_force_path_style(mut self, force_path_style: bool) -> Self {
        self.force_path_style = force_path_style;
        self
    }
}

pub struct S3Sink {
    client: Client,
    bucket: String,
}

impl S3Sink {
    /// Build a client from static credentials; the ambient AWS credential
    /// chain is never consulted.
    #[must_use]
    pub fn new(config: &S3SinkConfig) -> Self {
        let credentials = Credentials::new(
            config.access_key_id.clone(),
            config.secret_access_key.expose_secret().to_string(),
            None,
            None,
            "tessera-config",
        );

        let mut builder = aws_sdk_s3::config::Builder::new()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(config.region.clone()))
            .credentials_provider(credentials)
            .force_path_style(config.force_path_style);

        if let Some(endpoint) = &config.endpoint {
            builder = builder.endpoint_url(endpoint);
        }

        debug!(bucket = %config.bucket, region = %config.region, "s3 sink ready");

        Self {
            client: Client::from_conf(builder.build()),
            bucket: config.bucket.clone(),
        }
    }

    #[must_use]
    pub fn bucket(&self) -> &str {
        &self.bucket
    }
}

#[async_trait]
impl ActionSink for S3Sink {
    #[instrument(skip(self, body), fields(bucket = %self.bucket, bytes = body.len()))]
    async fn put(&self, key: &str, body: &[u8]) -> Result<(), IntakeError> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(key)
            .body(ByteStream::from(body.to_vec()))
            .content_type("application/json")
            .send()
            .await
            .map_err(|e| IntakeError::Sink {
                key: key.to_string(),
                message: DisplayErrorContext(&e).to_string(),
            })?;

        debug!("S3 PUT {}/{}", self.bucket, key);
        Ok(())
    }
}
