//! Record Formats
//!
//! A `RecordFormat` opens readers and writers for one on-disk representation
//! of a record stream. Formats are looked up by name in the `Registry`.
//!
//! Implementations:
//! - `SegmentFormat` (`segment`): the internal length-prefixed binary format
//! - `DelimitedFormat` (`delimited`): newline-delimited values for external consumers

pub mod delimited;
pub mod segment;

pub use delimited::DelimitedFormat;
pub use segment::SegmentFormat;

use crate::codec::CompressionCodec;
use crate::error::FormatError;
use crate::path::LogFilePath;
use crate::record::Record;
use std::fmt;

/// Sequential reader over the records of one file
pub trait RecordReader: Send {
    /// Next record, or `None` once the stream is exhausted
    fn next_record(&mut self) -> Result<Option<Record>, FormatError>;

    /// Release the underlying file
    fn close(self: Box<Self>) -> Result<(), FormatError>;
}

/// Sequential writer of records into one file
pub trait RecordWriter: Send {
    fn write(&mut self, record: &Record) -> Result<(), FormatError>;

    /// Flush, sync and write the checksum sidecar
    fn close(self: Box<Self>) -> Result<(), FormatError>;
}

/// Factory for readers and writers of one format
pub trait RecordFormat: Send + Sync + fmt::Debug {
    /// Registry name
    fn name(&self) -> &str;

    fn open_reader(
        &self,
        path: &LogFilePath,
        codec: Option<&dyn CompressionCodec>,
    ) -> Result<Box<dyn RecordReader>, FormatError>;

    fn open_writer(
        &self,
        path: &LogFilePath,
        codec: Option<&dyn CompressionCodec>,
    ) -> Result<Box<dyn RecordWriter>, FormatError>;
}

/// Drain a reader as a lazy iterator. Not restartable: records handed out
/// are gone from the reader.
pub fn records(reader: &mut dyn RecordReader) -> impl Iterator<Item = Result<Record, FormatError>> + '_ {
    let mut failed = false;
    std::iter::from_fn(move || {
        if failed {
            return None;
        }
        match reader.next_record() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => None,
            Err(e) => {
                failed = true;
                Some(Err(e))
            }
        }
    })
}
