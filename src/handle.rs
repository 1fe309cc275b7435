//! Scoped Completion Handle
//!
//! Ties the lifetime of a converted artifact (data file + checksum sidecar)
//! to the upload that ships it. The artifact is deleted only after the
//! wrapped upload reports success; on failure it stays on disk for retry or
//! inspection.

use crate::error::UploadError;
use crate::fs::LocalFileSystem;
use crate::path::LogFilePath;
use crate::upload::{BoxedHandle, CompletionHandle};
use std::fmt;
use std::sync::Arc;
use tracing::{debug, warn};

/// Completion handle that owns the converted artifact it is uploading.
///
/// Nothing else may delete the artifact while this handle exists.
pub struct ScopedCompletionHandle<T> {
    inner: BoxedHandle<T>,
    artifact: LogFilePath,
    fs: Arc<dyn LocalFileSystem>,
    records_copied: u64,
}

impl<T> ScopedCompletionHandle<T> {
    pub fn new(
        inner: BoxedHandle<T>,
        artifact: LogFilePath,
        fs: Arc<dyn LocalFileSystem>,
        records_copied: u64,
    ) -> Self {
        ScopedCompletionHandle {
            inner,
            artifact,
            fs,
            records_copied,
        }
    }

    /// The converted artifact this handle will clean up
    pub fn converted_path(&self) -> &LogFilePath {
        &self.artifact
    }

    /// Records copied into the converted artifact
    pub fn records_copied(&self) -> u64 {
        self.records_copied
    }

    /// Block until the upload resolves, then delete the artifact if it
    /// succeeded. Upload errors are returned unchanged.
    pub fn wait(self) -> Result<T, UploadError> {
        let result = self.inner.wait()?;

        let data = self.artifact.data_path();
        let sidecar = self.artifact.sidecar_path();
        let mut deleted = true;
        for path in [&data, &sidecar] {
            // The upload already succeeded; a leaked local file is the lesser fault
            if let Err(e) = self.fs.delete(path) {
                warn!(path = %path.display(), error = %e, "failed to delete converted artifact");
                deleted = false;
            }
        }
        if deleted {
            debug!(
                data = %data.display(),
                sidecar = %sidecar.display(),
                "deleted converted artifact"
            );
        }

        Ok(result)
    }
}

impl<T: Send> CompletionHandle<T> for ScopedCompletionHandle<T> {
    fn wait(self: Box<Self>) -> Result<T, UploadError> {
        ScopedCompletionHandle::wait(*self)
    }
}

impl<T> fmt::Debug for ScopedCompletionHandle<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScopedCompletionHandle")
            .field("artifact", &self.artifact)
            .field("records_copied", &self.records_copied)
            .finish()
    }
}
