//! S3 archive object storage
//!
//! Production [`ObjectStore`] backed by S3. Keys are hash-derived (the
//! content store passes `archives/<sha256>`), so re-putting an existing key
//! overwrites the object with identical bytes.

use crate::error::{Result, VerifyError};
use crate::store::ObjectStore;
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use tracing::{debug, info};

/// S3-backed object store
pub struct S3ObjectStore {
    /// S3 client
    client: Client,

    /// Bucket name
    bucket: String,

    /// Key prefix for all objects
    prefix: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    pub fn new(client: Client, bucket: impl Into<String>) -> Self {
        Self {
            client,
            bucket: bucket.into(),
            prefix: "simparity".to_string(),
        }
    }

    /// Create an S3 client from ambient AWS config
    pub async fn from_env(bucket: impl Into<String>) -> Self {
        let config = aws_config::load_from_env().await;
        Self::new(Client::new(&config), bucket)
    }

    /// Set key prefix
    pub fn with_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.prefix = prefix.into();
        self
    }

    fn s3_key(&self, key: &str) -> String {
        format!("{}/{}", self.prefix, key)
    }

    fn s3_uri(&self, s3_key: &str) -> String {
        format!("s3://{}/{}", self.bucket, s3_key)
    }

    /// Split an `s3://bucket/key` URI into (bucket, key)
    fn parse_uri(uri: &str) -> Result<(&str, &str)> {
        uri.strip_prefix("s3://")
            .and_then(|rest| rest.split_once('/'))
            .ok_or_else(|| VerifyError::storage(format!("not an s3:// URI: {uri}")))
    }
}

#[async_trait]
impl ObjectStore for S3ObjectStore {
    async fn put(&self, key: &str, bytes: &[u8]) -> Result<String> {
        let s3_key = self.s3_key(key);

        info!(
            bucket = %self.bucket,
            key = %s3_key,
            size = bytes.len(),
            "Uploading object to S3"
        );

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&s3_key)
            .body(ByteStream::from(bytes.to_vec()))
            .send()
            .await
            .map_err(|e| VerifyError::S3(aws_sdk_s3::Error::from(e)))?;

        Ok(self.s3_uri(&s3_key))
    }

    async fn get(&self, uri: &str) -> Result<Vec<u8>> {
        let (bucket, key) = Self::parse_uri(uri)?;

        debug!(bucket = %bucket, key = %key, "Downloading object from S3");

        let response = self
            .client
            .get_object()
            .bucket(bucket)
            .key(key)
            .send()
            .await
            .map_err(|e| VerifyError::S3(aws_sdk_s3::Error::from(e)))?;

        let bytes = response
            .body
            .collect()
            .await
            .map_err(|e| VerifyError::storage(format!("ByteStream error: {e}")))?;

        Ok(bytes.into_bytes().to_vec())
    }

    async fn exists(&self, key: &str) -> Result<bool> {
        let s3_key = self.s3_key(key);

        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&s3_key)
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(e) => {
                // Check for specific error types that indicate "not found"
                let err_str = format!("{e:?}");
                if err_str.contains("NoSuchKey")
                    || err_str.contains("NotFound")
                    || err_str.contains("404")
                {
                    Ok(false)
                } else {
                    Err(VerifyError::S3(aws_sdk_s3::Error::from(e)))
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_s3_key_and_uri_generation() {
        // Just test the key/URI logic without a real client
        let prefix = "simparity";
        let key = "archives/abc123";
        let s3_key = format!("{prefix}/{key}");
        assert_eq!(s3_key, "simparity/archives/abc123");
        assert_eq!(
            format!("s3://{}/{}", "my-bucket", s3_key),
            "s3://my-bucket/simparity/archives/abc123"
        );
    }

    #[test]
    fn test_parse_uri() {
        let (bucket, key) = S3ObjectStore::parse_uri("s3://bucket/a/b/c").unwrap();
        assert_eq!(bucket, "bucket");
        assert_eq!(key, "a/b/c");
        assert!(S3ObjectStore::parse_uri("mem://bucket/key").is_err());
        assert!(S3ObjectStore::parse_uri("s3://bucket-without-key").is_err());
    }
}
