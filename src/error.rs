//! Error Types
//!
//! One error enum per layer:
//!
//! - `FormatError`: reading or writing records (codec, checksum, framing)
//! - `UploadError`: the delegated upload, surfaced through `CompletionHandle::wait`
//! - `ConfigError`: unknown codec/format/backend names, bad config files
//! - `ShipError`: what `ConversionPipeline::convert_and_upload` returns
//!
//! ## Pipeline taxonomy
//!
//! ```text
//! Configuration ── codec/factory could not be resolved (nothing opened yet)
//! Conversion    ── reader or writer could not be opened
//! Transform     ── a read, write or final writer close failed mid-stream
//! Delegation    ── the backend refused to even start the upload
//! Upload        ── the delegated upload itself failed (from wait())
//! ```

use std::io::{Error as IoError, ErrorKind};
use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, ShipError>;

/// Errors raised by record readers and writers
#[derive(Debug, Error)]
pub enum FormatError {
    #[error("I/O error: {0}")]
    Io(#[from] IoError),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Invalid segment magic number")]
    InvalidMagic,

    #[error("Unsupported segment version: {0}")]
    UnsupportedVersion(u8),

    #[error("Checksum mismatch for {path}: expected {expected:08x}, got {actual:08x}")]
    ChecksumMismatch {
        path: PathBuf,
        expected: u32,
        actual: u32,
    },

    #[error("Record {index} truncated")]
    Truncated { index: u64 },

    #[error("Malformed checksum sidecar {0}")]
    MalformedSidecar(PathBuf),

    #[error("Record at offset {offset} contains the line delimiter")]
    DelimiterInValue { offset: u64 },
}

impl From<bincode::Error> for FormatError {
    fn from(e: bincode::Error) -> Self {
        FormatError::Serialization(e.to_string())
    }
}

/// Errors from a delegated upload
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Object not found: {0}")]
    NotFound(String),

    #[error("Upload I/O error: {0}")]
    Io(IoError),

    #[error("Upload timed out after {0:?}")]
    Timeout(std::time::Duration),

    #[error("Upload rejected: {0}")]
    Rejected(String),

    #[error("Upload abandoned before completion")]
    Cancelled,
}

impl From<IoError> for UploadError {
    fn from(e: IoError) -> Self {
        match e.kind() {
            ErrorKind::NotFound => UploadError::NotFound(e.to_string()),
            _ => UploadError::Io(e),
        }
    }
}

/// Errors resolving configuration into concrete collaborators
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Unknown compression codec: {0}")]
    UnknownCodec(String),

    #[error("Compression codec {0} is not compiled in (enable the `compression` feature)")]
    CodecUnavailable(String),

    #[error("Unknown record format: {0}")]
    UnknownFormat(String),

    #[error("Unknown upload backend: {0}")]
    UnknownBackend(String),

    #[error("Invalid configuration: {0}")]
    Invalid(String),

    #[error("Failed to parse config: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Failed to read config {path}: {source}")]
    Read { path: PathBuf, source: IoError },
}

/// Errors surfaced by the conversion pipeline
#[derive(Debug, Error)]
pub enum ShipError {
    #[error("Configuration error: {0}")]
    Configuration(#[from] ConfigError),

    #[error("Failed to open {path}: {source}")]
    Conversion { path: PathBuf, source: FormatError },

    #[error("Conversion aborted after {records_copied} records: {source}")]
    Transform {
        records_copied: u64,
        source: FormatError,
    },

    #[error("Failed to start upload of {path}: {source}")]
    Delegation { path: PathBuf, source: UploadError },

    #[error("Upload failed: {0}")]
    Upload(#[from] UploadError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_not_found_maps_to_upload_not_found() {
        let err: UploadError = IoError::new(ErrorKind::NotFound, "gone").into();
        assert!(matches!(err, UploadError::NotFound(_)));

        let err: UploadError = IoError::new(ErrorKind::Other, "boom").into();
        assert!(matches!(err, UploadError::Io(_)));
    }

    #[test]
    fn test_transform_error_reports_progress() {
        let err = ShipError::Transform {
            records_copied: 7,
            source: FormatError::Truncated { index: 7 },
        };
        let msg = err.to_string();
        assert!(msg.contains("after 7 records"), "{}", msg);
    }
}
