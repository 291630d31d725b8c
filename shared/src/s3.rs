use async_trait::async_trait;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::Client as S3Client;
use std::time::Duration;

use crate::blobs::{object_url, BlobStore, ListPage, ObjectMetadata};
use crate::error::BlobError;

/// S3-backed blob store
pub struct S3BlobStore {
    client: S3Client,
}

impl S3BlobStore {
    pub fn new(client: S3Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn list_page(
        &self,
        bucket: &str,
        continuation: Option<String>,
    ) -> Result<ListPage, BlobError> {
        let resp = self
            .client
            .list_objects_v2()
            .bucket(bucket)
            .set_continuation_token(continuation)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("S3 list_objects_v2 failed for {}: {:?}", bucket, e);
                BlobError::List {
                    bucket: bucket.to_string(),
                    message: e.to_string(),
                }
            })?;

        let keys = resp
            .contents()
            .iter()
            .filter_map(|o| o.key())
            .map(str::to_string)
            .collect();

        let next_token = if resp.is_truncated().unwrap_or(false) {
            resp.next_continuation_token().map(str::to_string)
        } else {
            None
        };

        Ok(ListPage { keys, next_token })
    }

    async fn metadata(&self, bucket: &str, key: &str) -> Result<ObjectMetadata, BlobError> {
        let resp = self
            .client
            .head_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| BlobError::Head {
                bucket: bucket.to_string(),
                key: key.to_string(),
                message: e.to_string(),
            })?;

        Ok(resp.metadata().cloned().unwrap_or_default())
    }

    async fn presign_get(
        &self,
        bucket: &str,
        key: &str,
        expires_in: Duration,
    ) -> Result<String, BlobError> {
        let presign_error = |message: String| BlobError::Presign {
            bucket: bucket.to_string(),
            key: key.to_string(),
            message,
        };

        let file_name = key.rsplit('/').next().unwrap_or(key);
        let content_type = mime_guess::from_path(key)
            .first_raw()
            .unwrap_or("application/octet-stream");

        let config = PresigningConfig::expires_in(expires_in).map_err(|e| presign_error(e.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .response_content_disposition(format!("attachment; filename=\"{}\"", file_name))
            .response_content_type(content_type)
            .presigned(config)
            .await
            .map_err(|e| presign_error(e.to_string()))?;

        Ok(presigned.uri().to_string())
    }

    async fn put(
        &self,
        bucket: &str,
        key: &str,
        bytes: Vec<u8>,
        content_type: &str,
        metadata: ObjectMetadata,
    ) -> Result<String, BlobError> {
        let metadata = if metadata.is_empty() { None } else { Some(metadata) };

        self.client
            .put_object()
            .bucket(bucket)
            .key(key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .set_metadata(metadata)
            .send()
            .await
            .map_err(|e| {
                tracing::error!("Upload of {} to {} failed: {:?}", key, bucket, e);
                BlobError::Upload(e.to_string())
            })?;

        tracing::info!("Uploaded {} to {}", key, bucket);
        Ok(object_url(bucket, key))
    }
}
