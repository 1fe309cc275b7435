//! S3 Object Store Implementation
//!
//! S3-compatible `ObjectStore` built on the `object_store` crate from the
//! Arrow ecosystem.
//!
//! Supports:
//! - AWS S3
//! - S3-compatible services (MinIO, LocalStack, etc.)
//! - Custom endpoints

use super::object_store::{ObjectMeta, ObjectStore};
use crate::config::S3Config;
use object_store::aws::AmazonS3Builder;
use object_store::path::Path as ObjectPath;
use object_store::ObjectStore as ObjectStoreTrait;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::pin::Pin;
use std::sync::Arc;

/// S3 Object Store for production deployments.
///
/// Keys are used as given; `ObjectStoreUploader` applies `backend.key_prefix`.
#[derive(Clone)]
pub struct S3ObjectStore {
    store: Arc<dyn ObjectStoreTrait>,
    bucket: String,
}

impl S3ObjectStore {
    /// Create a new S3 object store
    ///
    /// Credentials come from the environment:
    /// - AWS_ACCESS_KEY_ID
    /// - AWS_SECRET_ACCESS_KEY
    pub fn new(config: &S3Config) -> IoResult<Self> {
        let mut builder = AmazonS3Builder::new()
            .with_bucket_name(&config.bucket)
            .with_region(&config.region);

        // Use custom endpoint for S3-compatible services (MinIO)
        if let Some(endpoint) = &config.endpoint {
            builder = builder
                .with_endpoint(endpoint)
                .with_allow_http(endpoint.starts_with("http://"));
        }

        builder = builder.with_access_key_id(std::env::var("AWS_ACCESS_KEY_ID").unwrap_or_default());
        builder = builder
            .with_secret_access_key(std::env::var("AWS_SECRET_ACCESS_KEY").unwrap_or_default());

        let store = builder.build().map_err(|e| {
            IoError::new(
                ErrorKind::InvalidInput,
                format!("Failed to create S3 store: {}", e),
            )
        })?;

        Ok(S3ObjectStore {
            store: Arc::new(store),
            bucket: config.bucket.clone(),
        })
    }

    /// Create from an existing object store (for testing)
    pub fn from_store(store: Arc<dyn ObjectStoreTrait>, bucket: impl Into<String>) -> Self {
        S3ObjectStore {
            store,
            bucket: bucket.into(),
        }
    }

    /// Convert object_store errors to IoError
    fn map_error(err: object_store::Error) -> IoError {
        match &err {
            object_store::Error::NotFound { .. } => IoError::new(ErrorKind::NotFound, err.to_string()),
            object_store::Error::AlreadyExists { .. } => {
                IoError::new(ErrorKind::AlreadyExists, err.to_string())
            }
            object_store::Error::Precondition { .. } => {
                IoError::new(ErrorKind::InvalidInput, err.to_string())
            }
            _ => IoError::new(ErrorKind::Other, err.to_string()),
        }
    }
}

impl std::fmt::Debug for S3ObjectStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("S3ObjectStore")
            .field("bucket", &self.bucket)
            .finish()
    }
}

impl ObjectStore for S3ObjectStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let path = ObjectPath::from(key);
            self.store
                .put(&path, bytes::Bytes::copy_from_slice(data).into())
                .await
                .map_err(Self::map_error)?;
            Ok(())
        })
    }

    fn head<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send + 'a>> {
        Box::pin(async move {
            let path = ObjectPath::from(key);
            let meta = self.store.head(&path).await.map_err(Self::map_error)?;

            Ok(ObjectMeta {
                key: key.to_string(),
                size_bytes: meta.size as u64,
                created_at_ms: meta
                    .last_modified
                    .timestamp_millis()
                    .try_into()
                    .unwrap_or(0),
                etag: meta.e_tag,
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use object_store::memory::InMemory;

    #[tokio::test]
    async fn test_keys_are_used_verbatim() {
        let backing = Arc::new(InMemory::new());
        let store = S3ObjectStore::from_store(backing.clone(), "shipped");

        store.put("archive/events/1_0_0.txt", b"payload").await.unwrap();
        assert_eq!(store.head("archive/events/1_0_0.txt").await.unwrap().size_bytes, 7);

        let raw = backing
            .head(&ObjectPath::from("archive/events/1_0_0.txt"))
            .await
            .unwrap();
        assert_eq!(raw.size, 7);
    }

    #[tokio::test]
    async fn test_missing_object() {
        let store = S3ObjectStore::from_store(Arc::new(InMemory::new()), "shipped");
        let err = store.head("nope").await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::NotFound);
    }
}
