//! The object-store capability and its S3 implementation.

use async_trait::async_trait;
use aws_sdk_s3 as s3;
use bytes::Bytes;
use tracing::debug;

use crate::aws::{sdk_error, ClientConfig};
use crate::path::S3Path;

/// Read-only access to an object store.
#[async_trait]
pub trait ObjectStore: Send + Sync {
    /// Keys of every object whose key starts with `prefix`.
    ///
    /// Returns an empty list, not an error, when nothing matches.
    async fn list_objects(&self, prefix: &S3Path) -> anyhow::Result<Vec<String>>;

    /// Download an object into memory.
    async fn read_object(&self, path: &S3Path) -> anyhow::Result<Bytes>;
}

#[derive(Debug, Clone)]
pub struct S3Client {
    pub client: s3::Client,
}

impl S3Client {
    pub fn from_conf(cfg: ClientConfig) -> Self {
        let cred = s3::config::Credentials::new(
            cfg.access_key_id,
            cfg.secret_access_key,
            None,
            None,
            "emr-ctl",
        );
        let region = s3::config::Region::new(cfg.region);
        let mut conf_builder = s3::config::Builder::new()
            .credentials_provider(cred)
            .region(region)
            .behavior_version_latest();
        if let Some(url) = cfg.endpoint_url {
            conf_builder = conf_builder.endpoint_url(url);
        }

        Self {
            client: s3::Client::from_conf(conf_builder.build()),
        }
    }
}

#[async_trait]
impl ObjectStore for S3Client {
    async fn list_objects(&self, prefix: &S3Path) -> anyhow::Result<Vec<String>> {
        let mut response = self
            .client
            .list_objects_v2()
            .bucket(prefix.bucket())
            .prefix(prefix.key())
            .max_keys(50)
            .into_paginator()
            .send();

        let mut objects = vec![];
        while let Some(result) = response.next().await {
            let output = result.map_err(sdk_error)?;
            for object in output.contents() {
                if let Some(key) = object.key() {
                    objects.push(key.to_string());
                }
            }
        }

        debug!("Listed {} objects under {}", objects.len(), prefix);
        Ok(objects)
    }

    async fn read_object(&self, path: &S3Path) -> anyhow::Result<Bytes> {
        let data = self
            .client
            .get_object()
            .bucket(path.bucket())
            .key(path.key())
            .send()
            .await
            .map_err(sdk_error)?
            .body
            .collect()
            .await?
            .into_bytes();

        debug!("Read {} bytes from {}", data.len(), path);
        Ok(data)
    }
}
