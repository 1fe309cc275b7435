//! Upload Backends and Completion Handles
//!
//! An `UploadBackend` accepts a local file and returns a `CompletionHandle`
//! for the eventual result. Backends own whatever concurrency performs the
//! upload; callers only block on `wait`.
//!
//! Implementations:
//! - `ObjectStoreUploader`: ships files into any `ObjectStore`
//!   (`InMemoryObjectStore`, `LocalFsObjectStore`, `S3ObjectStore`)
//! - `SimulatedObjectStore`: fault-injecting store wrapper for tests

pub mod object_store;
#[cfg(feature = "s3")]
pub mod s3;
pub mod simulated;

pub use self::object_store::{InMemoryObjectStore, LocalFsObjectStore, ObjectMeta, ObjectStore, ObjectStoreUploader};
#[cfg(feature = "s3")]
pub use self::s3::S3ObjectStore;
pub use self::simulated::{SimulatedObjectStore, SimulatedStoreConfig, SimulatedStoreStats};

use crate::error::UploadError;
use crate::path::LogFilePath;
use serde::{Deserialize, Serialize};
use std::fmt;
use tokio::sync::oneshot;

/// What a backend reports for a finished upload
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReceipt {
    /// Object key the file was stored under
    pub key: String,
    /// Bytes stored
    pub size_bytes: u64,
    /// ETag or content hash, when the backend provides one
    pub etag: Option<String>,
}

/// A pending delegated operation.
///
/// `wait` consumes the handle, so a result can only be collected once.
pub trait CompletionHandle<T>: Send {
    /// Block the calling thread until the operation resolves.
    ///
    /// Must not be called from inside an async runtime worker.
    fn wait(self: Box<Self>) -> Result<T, UploadError>;
}

pub type BoxedHandle<T> = Box<dyn CompletionHandle<T>>;

/// Durable-storage client
pub trait UploadBackend: Send + Sync + fmt::Debug {
    /// Registry name
    fn name(&self) -> &str;

    /// Start uploading `path`. An `Err` means the upload was never started.
    fn upload(&self, path: &LogFilePath) -> Result<BoxedHandle<UploadReceipt>, UploadError>;
}

/// A handle that is already resolved
#[derive(Debug)]
pub struct ReadyHandle<T>(Result<T, UploadError>);

impl<T> ReadyHandle<T> {
    pub fn ok(value: T) -> Self {
        ReadyHandle(Ok(value))
    }

    pub fn err(error: UploadError) -> Self {
        ReadyHandle(Err(error))
    }
}

impl<T: Send> CompletionHandle<T> for ReadyHandle<T> {
    fn wait(self: Box<Self>) -> Result<T, UploadError> {
        self.0
    }
}

/// A handle resolved from another thread or task through a `Completer`
#[derive(Debug)]
pub struct ChannelHandle<T> {
    rx: oneshot::Receiver<Result<T, UploadError>>,
}

/// Resolving side of a `ChannelHandle`. Dropping it unresolved makes the
/// handle fail with `UploadError::Cancelled`.
#[derive(Debug)]
pub struct Completer<T> {
    tx: oneshot::Sender<Result<T, UploadError>>,
}

impl<T> Completer<T> {
    pub fn complete(self, result: Result<T, UploadError>) {
        // The waiter may have gone away; nothing to report to.
        let _ = self.tx.send(result);
    }
}

/// Create a connected completer/handle pair
pub fn completion_channel<T>() -> (Completer<T>, ChannelHandle<T>) {
    let (tx, rx) = oneshot::channel();
    (Completer { tx }, ChannelHandle { rx })
}

impl<T: Send> CompletionHandle<T> for ChannelHandle<T> {
    fn wait(self: Box<Self>) -> Result<T, UploadError> {
        self.rx.blocking_recv().map_err(|_| UploadError::Cancelled)?
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[test]
    fn test_ready_handle() {
        let handle: BoxedHandle<u32> = Box::new(ReadyHandle::ok(7));
        assert_eq!(handle.wait().unwrap(), 7);

        let handle: BoxedHandle<u32> = Box::new(ReadyHandle::err(UploadError::Rejected("no".into())));
        assert!(matches!(handle.wait(), Err(UploadError::Rejected(_))));
    }

    #[test]
    fn test_channel_handle_blocks_until_completed() {
        let (completer, handle) = completion_channel::<&'static str>();
        let worker = std::thread::spawn(move || {
            std::thread::sleep(Duration::from_millis(50));
            completer.complete(Ok("done"));
        });

        let handle: BoxedHandle<&'static str> = Box::new(handle);
        assert_eq!(handle.wait().unwrap(), "done");
        worker.join().unwrap();
    }

    #[test]
    fn test_dropped_completer_cancels() {
        let (completer, handle) = completion_channel::<()>();
        drop(completer);
        assert!(matches!(Box::new(handle).wait(), Err(UploadError::Cancelled)));
    }
}
