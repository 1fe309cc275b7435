//! Object Store Abstraction
//!
//! Async trait over object storage plus `ObjectStoreUploader`, the
//! `UploadBackend` that ships local files into any store.
//!
//! Implementations:
//! - `InMemoryObjectStore`: For unit tests
//! - `LocalFsObjectStore`: For development and local testing
//! - `S3ObjectStore`: For production (feature-gated)

use super::{completion_channel, BoxedHandle, UploadBackend, UploadReceipt};
use crate::error::UploadError;
use crate::path::LogFilePath;
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::io::{Error as IoError, ErrorKind, Result as IoResult};
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, warn};

/// Metadata for a stored object
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ObjectMeta {
    /// Object key (path)
    pub key: String,
    /// Size in bytes
    pub size_bytes: u64,
    /// Creation timestamp (Unix ms)
    pub created_at_ms: u64,
    /// ETag or content hash (optional)
    pub etag: Option<String>,
}

/// Object store abstraction trait
pub trait ObjectStore: Send + Sync + 'static {
    /// Put an object (create or overwrite)
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>>;

    /// Get object metadata without downloading content
    fn head<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send + 'a>>;
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .map(|d| d.as_millis() as u64)
        .unwrap_or(0)
}

// ============================================================================
// InMemoryObjectStore - For tests
// ============================================================================

/// In-memory object store for unit tests
#[derive(Debug, Clone, Default)]
pub struct InMemoryObjectStore {
    data: Arc<RwLock<HashMap<String, StoredObject>>>,
}

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    created_at_ms: u64,
}

impl InMemoryObjectStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Get the number of stored objects (for testing)
    pub fn len(&self) -> usize {
        self.data.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.read().is_empty()
    }

    /// Sorted list of stored keys (for testing)
    pub fn keys(&self) -> Vec<String> {
        let mut keys: Vec<String> = self.data.read().keys().cloned().collect();
        keys.sort();
        keys
    }

    /// Contents stored under `key` (for testing)
    pub fn object(&self, key: &str) -> Option<Vec<u8>> {
        self.data.read().get(key).map(|obj| obj.data.clone())
    }
}

impl ObjectStore for InMemoryObjectStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let obj = StoredObject {
                data: data.to_vec(),
                created_at_ms: now_ms(),
            };
            self.data.write().insert(key.to_string(), obj);
            Ok(())
        })
    }

    fn head<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send + 'a>> {
        Box::pin(async move {
            self.data
                .read()
                .get(key)
                .map(|obj| ObjectMeta {
                    key: key.to_string(),
                    size_bytes: obj.data.len() as u64,
                    created_at_ms: obj.created_at_ms,
                    etag: None,
                })
                .ok_or_else(|| IoError::new(ErrorKind::NotFound, format!("Key not found: {}", key)))
        })
    }
}

// ============================================================================
// LocalFsObjectStore - For development
// ============================================================================

/// Local filesystem object store for development and testing
#[derive(Debug, Clone)]
pub struct LocalFsObjectStore {
    base_path: PathBuf,
}

impl LocalFsObjectStore {
    pub fn new(base_path: PathBuf) -> Self {
        LocalFsObjectStore { base_path }
    }

    fn full_path(&self, key: &str) -> PathBuf {
        self.base_path.join(key)
    }

    async fn ensure_parent(path: &Path) -> IoResult<()> {
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }
        Ok(())
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }
}

impl ObjectStore for LocalFsObjectStore {
    fn put<'a>(
        &'a self,
        key: &'a str,
        data: &'a [u8],
    ) -> Pin<Box<dyn Future<Output = IoResult<()>> + Send + 'a>> {
        Box::pin(async move {
            let path = self.full_path(key);
            Self::ensure_parent(&path).await?;
            // Write then rename so readers never observe a partial object
            let mut tmp = path.clone().into_os_string();
            tmp.push(".uploading");
            let tmp = PathBuf::from(tmp);
            tokio::fs::write(&tmp, data).await?;
            tokio::fs::rename(&tmp, &path).await
        })
    }

    fn head<'a>(
        &'a self,
        key: &'a str,
    ) -> Pin<Box<dyn Future<Output = IoResult<ObjectMeta>> + Send + 'a>> {
        Box::pin(async move {
            let metadata = tokio::fs::metadata(self.full_path(key)).await?;
            Ok(ObjectMeta {
                key: key.to_string(),
                size_bytes: metadata.len(),
                created_at_ms: metadata
                    .created()
                    .ok()
                    .and_then(|t| t.duration_since(std::time::UNIX_EPOCH).ok())
                    .map(|d| d.as_millis() as u64)
                    .unwrap_or(0),
                etag: None,
            })
        })
    }
}

// ============================================================================
// ObjectStoreUploader - UploadBackend over any ObjectStore
// ============================================================================

/// Uploads local files into an `ObjectStore` on a tokio runtime.
///
/// `upload` returns as soon as the transfer task is spawned; the returned
/// handle resolves when the object is stored.
pub struct ObjectStoreUploader<S: ObjectStore> {
    store: Arc<S>,
    runtime: tokio::runtime::Handle,
    key_prefix: String,
    put_timeout: Option<Duration>,
}

impl<S: ObjectStore> ObjectStoreUploader<S> {
    pub fn new(store: Arc<S>, runtime: tokio::runtime::Handle) -> Self {
        ObjectStoreUploader {
            store,
            runtime,
            key_prefix: String::new(),
            put_timeout: None,
        }
    }

    /// Prefix every object key with `prefix/`
    pub fn with_key_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.key_prefix = prefix.into().trim_matches('/').to_string();
        self
    }

    /// Fail uploads whose put takes longer than `timeout`
    pub fn with_put_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.put_timeout = timeout;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    /// Key a local file will be stored under
    pub fn key_for(&self, path: &LogFilePath) -> String {
        let key = path.object_key();
        if self.key_prefix.is_empty() {
            key
        } else {
            format!("{}/{}", self.key_prefix, key)
        }
    }

    async fn transfer(
        store: Arc<S>,
        local: PathBuf,
        key: String,
        put_timeout: Option<Duration>,
    ) -> Result<UploadReceipt, UploadError> {
        let data = tokio::fs::read(&local).await?;

        let put = store.put(&key, &data);
        match put_timeout {
            Some(limit) => tokio::time::timeout(limit, put)
                .await
                .map_err(|_| UploadError::Timeout(limit))??,
            None => put.await?,
        }

        let meta = store.head(&key).await?;
        Ok(UploadReceipt {
            key,
            size_bytes: meta.size_bytes,
            etag: meta.etag,
        })
    }
}

impl<S: ObjectStore> fmt::Debug for ObjectStoreUploader<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ObjectStoreUploader")
            .field("key_prefix", &self.key_prefix)
            .field("put_timeout", &self.put_timeout)
            .finish()
    }
}

impl<S: ObjectStore> UploadBackend for ObjectStoreUploader<S> {
    fn name(&self) -> &str {
        "object-store"
    }

    fn upload(&self, path: &LogFilePath) -> Result<BoxedHandle<UploadReceipt>, UploadError> {
        let local = path.data_path();
        // Refuse up front rather than hand out a handle that can only fail
        if !local.is_file() {
            return Err(UploadError::NotFound(local.display().to_string()));
        }

        let key = self.key_for(path);
        let (completer, handle) = completion_channel();
        let store = Arc::clone(&self.store);
        let put_timeout = self.put_timeout;

        debug!(local = %local.display(), key = %key, "upload started");
        self.runtime.spawn(async move {
            let result = Self::transfer(store, local.clone(), key, put_timeout).await;
            if let Err(e) = &result {
                warn!(local = %local.display(), error = %e, "upload failed");
            }
            completer.complete(result);
        });

        Ok(Box::new(handle))
    }
}
