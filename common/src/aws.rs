//! Explicit configuration for the AWS clients.
//!
//! There is no ambient profile or session: every client is built from a
//! [`ClientConfig`] handed in by the caller.

use anyhow::anyhow;
use aws_sdk_emr::error::{DisplayErrorContext, SdkError};
use aws_smithy_types::error::metadata::ProvideErrorMetadata;

#[derive(Clone)]
pub struct ClientConfig {
    /// id
    pub access_key_id: String,

    /// password
    pub secret_access_key: String,

    /// AWS region, e.g. `eu-central-1`.
    pub region: String,

    /// Custom object store endpoint, e.g. a local minio. Only used for S3.
    pub endpoint_url: Option<String>,
}

impl std::fmt::Debug for ClientConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ClientConfig")
            .field("access_key_id", &self.access_key_id)
            .field("secret_access_key", &"<redacted>")
            .field("region", &self.region)
            .field("endpoint_url", &self.endpoint_url)
            .finish()
    }
}

/// Flatten an SDK error into something readable, keeping the service's error
/// code when there is one.
pub(crate) fn sdk_error<E>(err: SdkError<E>) -> anyhow::Error
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    match err.as_service_error() {
        Some(service) => anyhow!(
            "{}: {}",
            service.code().unwrap_or("Unknown"),
            service.message().unwrap_or("no message")
        ),
        None => anyhow!("{}", DisplayErrorContext(&err)),
    }
}
