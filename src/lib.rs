//! Segment Shipper
//!
//! Converts finished log segments into an upload format and ships them to
//! durable storage, deleting the local converted copy only once the upload
//! is confirmed.
//!
//! ```text
//! LogFilePath ─► ConversionPipeline ─► UploadBackend
//!                     │                      │
//!           RecordFormat + codec     CompletionHandle
//!                     └──────► ScopedCompletionHandle::wait ─► cleanup
//! ```

pub mod codec;
pub mod config;
pub mod error;
pub mod format;
pub mod fs;
pub mod handle;
pub mod observability;
pub mod path;
pub mod pipeline;
pub mod record;
pub mod registry;
pub mod upload;

pub use codec::{CompressionCodec, SharedCodec};
pub use config::{BackendConfig, LoggingConfig, ShipperConfig};
pub use error::{ConfigError, FormatError, Result, ShipError, UploadError};
pub use format::{DelimitedFormat, RecordFormat, RecordReader, RecordWriter, SegmentFormat};
pub use fs::{exit_cleanup, CleanupOnExit, LocalFileSystem, StdFileSystem};
pub use handle::ScopedCompletionHandle;
pub use path::LogFilePath;
pub use pipeline::ConversionPipeline;
pub use record::Record;
pub use registry::Registry;
pub use upload::{BoxedHandle, CompletionHandle, UploadBackend, UploadReceipt};

#[cfg(feature = "compression")]
pub use codec::ZstdCodec;
