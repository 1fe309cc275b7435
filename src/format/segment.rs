//! Segment File Format
//!
//! The internal on-disk representation of a finalized log segment. Records
//! are bincode-encoded and CRC32-framed; the whole stream (header included)
//! passes through the configured codec.
//!
//! ## File Layout
//!
//! ```text
//! ┌──────────────────────────────────┐
//! │ Header (10 bytes)                │
//! │ - magic: "LSEG"                  │
//! │ - version: u8                    │
//! │ - flags: u8 (reserved, 0)        │
//! │ - header_checksum: u32           │
//! ├──────────────────────────────────┤
//! │ Records (variable)               │
//! │ - length: u32                    │
//! │ - checksum: u32                  │
//! │ - data: bincode(Record)          │
//! ├──────────────────────────────────┤
//! │ Footer (16 bytes)                │
//! │ - end marker: u32::MAX           │
//! │ - record_count: u64              │
//! │ - footer_magic: "GESL"           │
//! └──────────────────────────────────┘
//! ```
//!
//! A stream that ends before the footer is truncated, even if it ends on a
//! record boundary.

use super::{RecordFormat, RecordReader, RecordWriter};
use crate::codec::{self, CompressionCodec, DecodeRead, EncodeWrite};
use crate::error::FormatError;
use crate::fs::{SidecarReader, SidecarWriter};
use crate::path::LogFilePath;
use crate::record::Record;
use std::io::{ErrorKind, Read, Write};
use std::path::PathBuf;

/// Segment file magic number
pub const SEGMENT_MAGIC: [u8; 4] = *b"LSEG";
/// Reversed magic for footer validation
pub const FOOTER_MAGIC: [u8; 4] = *b"GESL";
/// Current segment format version
pub const SEGMENT_VERSION: u8 = 1;

/// Length value that marks the footer instead of a record
const END_MARKER: u32 = u32::MAX;
/// Largest record frame accepted by the reader
const MAX_RECORD_SIZE: u32 = 64 * 1024 * 1024;

const HEADER_SIZE: usize = 10;

fn header_bytes() -> [u8; HEADER_SIZE] {
    let mut buf = [0u8; HEADER_SIZE];
    buf[0..4].copy_from_slice(&SEGMENT_MAGIC);
    buf[4] = SEGMENT_VERSION;
    buf[5] = 0;
    let checksum = crc32fast::hash(&buf[0..6]);
    buf[6..10].copy_from_slice(&checksum.to_le_bytes());
    buf
}

fn validate_header(buf: &[u8; HEADER_SIZE], path: &std::path::Path) -> Result<(), FormatError> {
    if buf[0..4] != SEGMENT_MAGIC {
        return Err(FormatError::InvalidMagic);
    }
    if buf[4] != SEGMENT_VERSION {
        return Err(FormatError::UnsupportedVersion(buf[4]));
    }
    let expected = u32::from_le_bytes([buf[6], buf[7], buf[8], buf[9]]);
    let actual = crc32fast::hash(&buf[0..6]);
    if expected != actual {
        return Err(FormatError::ChecksumMismatch {
            path: path.to_path_buf(),
            expected,
            actual,
        });
    }
    Ok(())
}

/// The internal segment format
#[derive(Debug, Clone, Copy, Default)]
pub struct SegmentFormat;

impl SegmentFormat {
    pub const NAME: &'static str = "segment";
}

impl RecordFormat for SegmentFormat {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn open_reader(
        &self,
        path: &LogFilePath,
        codec: Option<&dyn CompressionCodec>,
    ) -> Result<Box<dyn RecordReader>, FormatError> {
        Ok(Box::new(SegmentReader::open(path, codec)?))
    }

    fn open_writer(
        &self,
        path: &LogFilePath,
        codec: Option<&dyn CompressionCodec>,
    ) -> Result<Box<dyn RecordWriter>, FormatError> {
        Ok(Box::new(SegmentWriter::create(path, codec)?))
    }
}

/// Streaming segment writer
pub struct SegmentWriter {
    sink: Box<dyn EncodeWrite>,
    record_count: u64,
}

impl SegmentWriter {
    pub fn create(
        path: &LogFilePath,
        codec: Option<&dyn CompressionCodec>,
    ) -> Result<Self, FormatError> {
        let file = SidecarWriter::create(&path.data_path())?;
        let mut sink = codec::encoder(codec, file)?;
        sink.write_all(&header_bytes())?;
        Ok(SegmentWriter {
            sink,
            record_count: 0,
        })
    }

    pub fn record_count(&self) -> u64 {
        self.record_count
    }
}

impl RecordWriter for SegmentWriter {
    fn write(&mut self, record: &Record) -> Result<(), FormatError> {
        let data = bincode::serialize(record)?;
        let len = u32::try_from(data.len())
            .ok()
            .filter(|len| *len <= MAX_RECORD_SIZE)
            .ok_or_else(|| {
                FormatError::Serialization(format!("record of {} bytes too large", data.len()))
            })?;

        self.sink.write_all(&len.to_le_bytes())?;
        self.sink.write_all(&crc32fast::hash(&data).to_le_bytes())?;
        self.sink.write_all(&data)?;
        self.record_count += 1;
        Ok(())
    }

    fn close(mut self: Box<Self>) -> Result<(), FormatError> {
        self.sink.write_all(&END_MARKER.to_le_bytes())?;
        self.sink.write_all(&self.record_count.to_le_bytes())?;
        self.sink.write_all(&FOOTER_MAGIC)?;
        self.sink.finish()?;
        Ok(())
    }
}

/// Streaming segment reader
pub struct SegmentReader {
    /// `None` once the footer has been read and the sidecar verified
    source: Option<Box<dyn DecodeRead>>,
    path: PathBuf,
    records_read: u64,
}

impl SegmentReader {
    pub fn open(
        path: &LogFilePath,
        codec: Option<&dyn CompressionCodec>,
    ) -> Result<Self, FormatError> {
        let data_path = path.data_path();
        let file = SidecarReader::open(&data_path)?;
        let mut source = codec::decoder(codec, file)?;

        let mut header = [0u8; HEADER_SIZE];
        source.read_exact(&mut header)?;
        validate_header(&header, &data_path)?;

        Ok(SegmentReader {
            source: Some(source),
            path: data_path,
            records_read: 0,
        })
    }

    fn read_exact_or_truncated(
        source: &mut dyn DecodeRead,
        buf: &mut [u8],
        index: u64,
    ) -> Result<(), FormatError> {
        source.read_exact(buf).map_err(|e| match e.kind() {
            ErrorKind::UnexpectedEof => FormatError::Truncated { index },
            _ => FormatError::Io(e),
        })
    }

    fn finish(&mut self, mut source: Box<dyn DecodeRead>) -> Result<(), FormatError> {
        let mut footer = [0u8; 12];
        Self::read_exact_or_truncated(source.as_mut(), &mut footer, self.records_read)?;

        let count = u64::from_le_bytes([
            footer[0], footer[1], footer[2], footer[3], footer[4], footer[5], footer[6], footer[7],
        ]);
        if footer[8..12] != FOOTER_MAGIC {
            return Err(FormatError::InvalidMagic);
        }
        if count != self.records_read {
            return Err(FormatError::Serialization(format!(
                "{}: footer claims {} records, read {}",
                self.path.display(),
                count,
                self.records_read
            )));
        }

        source.into_source().verify()?;
        Ok(())
    }
}

impl RecordReader for SegmentReader {
    fn next_record(&mut self) -> Result<Option<Record>, FormatError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };
        let index = self.records_read;

        let mut frame = [0u8; 4];
        Self::read_exact_or_truncated(source.as_mut(), &mut frame, index)?;
        let len = u32::from_le_bytes(frame);
        if len == END_MARKER {
            if let Some(source) = self.source.take() {
                self.finish(source)?;
            }
            return Ok(None);
        }
        if len > MAX_RECORD_SIZE {
            return Err(FormatError::Serialization(format!(
                "{}: record {} claims {} bytes",
                self.path.display(),
                index,
                len
            )));
        }

        Self::read_exact_or_truncated(source.as_mut(), &mut frame, index)?;
        let expected = u32::from_le_bytes(frame);

        let mut data = vec![0u8; len as usize];
        Self::read_exact_or_truncated(source.as_mut(), &mut data, index)?;
        let actual = crc32fast::hash(&data);
        if actual != expected {
            return Err(FormatError::ChecksumMismatch {
                path: self.path.clone(),
                expected,
                actual,
            });
        }

        let record = bincode::deserialize(&data)?;
        self.records_read += 1;
        Ok(Some(record))
    }

    fn close(self: Box<Self>) -> Result<(), FormatError> {
        // Dropping the decoder closes the file
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::format::records;
    use crate::format::test_support::round_trip;

    fn segment_path(dir: &std::path::Path, offset: u64) -> LogFilePath {
        LogFilePath::new(dir, "events", vec!["p0".to_string()], 1, 0, offset, ".seg")
    }

    fn sample_records(n: u64) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(i, format!("key{}", i), format!("value-{:06}", i)))
            .collect()
    }

    #[test]
    fn test_segment_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), 0);
        let input = sample_records(3);

        let output = round_trip(&SegmentFormat, &path, None, &input);
        assert_eq!(output, input);
        assert!(path.sidecar_path().exists());
    }

    #[test]
    fn test_segment_large() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), 0);
        let input = sample_records(1000);

        let output = round_trip(&SegmentFormat, &path, None, &input);
        assert_eq!(output.len(), 1000);
        assert_eq!(output[0].offset, 0);
        assert_eq!(output[999].value.as_ref(), b"value-000999");
    }

    #[test]
    fn test_empty_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), 0);
        assert!(round_trip(&SegmentFormat, &path, None, &[]).is_empty());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_segment_round_trip_zstd() {
        use crate::codec::ZstdCodec;

        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), 0).with_added_extension("zst");
        let codec = ZstdCodec::default();
        let input = sample_records(200);

        let output = round_trip(&SegmentFormat, &path, Some(&codec as &dyn CompressionCodec), &input);
        assert_eq!(output, input);
    }

    #[test]
    fn test_invalid_magic() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), 0);
        std::fs::create_dir_all(path.dir()).unwrap();
        std::fs::write(path.data_path(), b"XXXXXXXXXXXXXXXX").unwrap();

        let result = SegmentReader::open(&path, None);
        assert!(matches!(result, Err(FormatError::InvalidMagic)));
    }

    #[test]
    fn test_truncated_segment() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), 0);

        let mut writer = SegmentFormat.open_writer(&path, None).unwrap();
        for record in sample_records(5) {
            writer.write(&record).unwrap();
        }
        writer.close().unwrap();

        // Chop off the footer and part of the last record
        let data = std::fs::read(path.data_path()).unwrap();
        std::fs::write(path.data_path(), &data[..data.len() - 20]).unwrap();
        std::fs::remove_file(path.sidecar_path()).unwrap();

        let mut reader = SegmentFormat.open_reader(&path, None).unwrap();
        let results: Vec<_> = records(reader.as_mut()).collect();
        assert_eq!(results.len(), 5);
        assert!(results[..4].iter().all(|r| r.is_ok()));
        assert!(matches!(results[4], Err(FormatError::Truncated { index: 4 })));
    }

    #[test]
    fn test_corrupted_record_detected() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), 0);

        let mut writer = SegmentFormat.open_writer(&path, None).unwrap();
        writer.write(&Record::new(0, "k", "a fairly long value")).unwrap();
        writer.close().unwrap();

        let mut data = std::fs::read(path.data_path()).unwrap();
        let corrupt_offset = HEADER_SIZE + 8 + 10;
        data[corrupt_offset] ^= 0xFF;
        std::fs::write(path.data_path(), &data).unwrap();

        let mut reader = SegmentFormat.open_reader(&path, None).unwrap();
        assert!(matches!(
            reader.next_record(),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }

    #[test]
    fn test_sidecar_mismatch_surfaces_at_end_of_stream() {
        let dir = tempfile::tempdir().unwrap();
        let path = segment_path(dir.path(), 0);

        let mut writer = SegmentFormat.open_writer(&path, None).unwrap();
        writer.write(&Record::new(0, "k", "v")).unwrap();
        writer.close().unwrap();
        std::fs::write(path.sidecar_path(), "deadbeef 1\n").unwrap();

        let mut reader = SegmentFormat.open_reader(&path, None).unwrap();
        assert!(reader.next_record().unwrap().is_some());
        assert!(matches!(
            reader.next_record(),
            Err(FormatError::ChecksumMismatch { .. })
        ));
    }
}
