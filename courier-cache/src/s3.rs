//! S3 (and S3-compatible) object storage.

use async_trait::async_trait;
use aws_config::{BehaviorVersion, Region};
use aws_sdk_s3::Client;
use courier_common::internal;

use crate::{CacheError, ObjectStore, StorageConfig, StoredObject};

#[derive(Debug, Clone)]
pub struct S3ObjectStore {
    client: Client,
    bucket: String,
}

impl S3ObjectStore {
    pub const fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Build a client from the ambient AWS configuration, overridden by
    /// `config`.
    pub async fn from_config(config: &StorageConfig) -> Self {
        let mut loader = aws_config::defaults(BehaviorVersion::latest());
        if let Some(region) = &config.region {
            loader = loader.region(Region::new(region.clone()));
        }
        let shared = loader.load().await;

        let mut builder =
            aws_sdk_s3::config::Builder::from(&shared).force_path_style(config.path_style);
        if let Some(endpoint) = &config.endpoint {
            internal!(level = INFO, "Using object storage endpoint {endpoint}");
            builder = builder.endpoint_url(endpoint);
        }

        Self::new(Client::from_conf(builder.build()), config.bucket.clone())
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn open(&self, key: &str) -> Result<StoredObject, CacheError> {
        let output = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| {
                let err = err.into_service_error();
                if err.is_no_such_key() {
                    CacheError::NotFound(key.to_string())
                } else {
                    CacheError::Storage(err.to_string())
                }
            })?;

        // A missing length is treated as unknown-but-small; the read is still
        // capped by the cache.
        let size = output
            .content_length()
            .and_then(|length| u64::try_from(length).ok())
            .unwrap_or_default();

        Ok(StoredObject {
            size,
            body: Box::pin(output.body.into_async_read()),
        })
    }
}
