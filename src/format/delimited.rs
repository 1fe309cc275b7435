//! Newline-delimited text format.
//!
//! Each record's value is written followed by `\n`. Keys and source offsets
//! are not stored: on read, keys are empty and offsets are assigned
//! sequentially from the file's base offset. A value containing `\n` is
//! rejected with `FormatError::DelimiterInValue` instead of being split.

use super::{RecordFormat, RecordReader, RecordWriter};
use crate::codec::{self, CompressionCodec, DecodeRead, EncodeWrite};
use crate::error::FormatError;
use crate::fs::{SidecarReader, SidecarWriter};
use crate::path::LogFilePath;
use crate::record::Record;
use bytes::Bytes;
use std::io::{BufRead, BufReader, Write};

const DELIMITER: u8 = b'\n';

#[derive(Debug, Clone, Copy, Default)]
pub struct DelimitedFormat;

impl DelimitedFormat {
    pub const NAME: &'static str = "delimited";
}

impl RecordFormat for DelimitedFormat {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn open_reader(
        &self,
        path: &LogFilePath,
        codec: Option<&dyn CompressionCodec>,
    ) -> Result<Box<dyn RecordReader>, FormatError> {
        let file = SidecarReader::open(&path.data_path())?;
        let source = codec::decoder(codec, file)?;
        Ok(Box::new(DelimitedReader {
            source: Some(BufReader::new(source)),
            next_offset: path.offset(),
            line: Vec::new(),
        }))
    }

    fn open_writer(
        &self,
        path: &LogFilePath,
        codec: Option<&dyn CompressionCodec>,
    ) -> Result<Box<dyn RecordWriter>, FormatError> {
        let file = SidecarWriter::create(&path.data_path())?;
        let sink = codec::encoder(codec, file)?;
        Ok(Box::new(DelimitedWriter { sink }))
    }
}

struct DelimitedWriter {
    sink: Box<dyn EncodeWrite>,
}

impl RecordWriter for DelimitedWriter {
    fn write(&mut self, record: &Record) -> Result<(), FormatError> {
        if record.value.contains(&DELIMITER) {
            return Err(FormatError::DelimiterInValue {
                offset: record.offset,
            });
        }
        self.sink.write_all(&record.value)?;
        self.sink.write_all(&[DELIMITER])?;
        Ok(())
    }

    fn close(self: Box<Self>) -> Result<(), FormatError> {
        self.sink.finish()?;
        Ok(())
    }
}

struct DelimitedReader {
    source: Option<BufReader<Box<dyn DecodeRead>>>,
    next_offset: u64,
    line: Vec<u8>,
}

impl RecordReader for DelimitedReader {
    fn next_record(&mut self) -> Result<Option<Record>, FormatError> {
        let Some(source) = self.source.as_mut() else {
            return Ok(None);
        };

        self.line.clear();
        if source.read_until(DELIMITER, &mut self.line)? == 0 {
            if let Some(source) = self.source.take() {
                source.into_inner().into_source().verify()?;
            }
            return Ok(None);
        }
        if self.line.last() == Some(&DELIMITER) {
            self.line.pop();
        }

        let record = Record::unkeyed(self.next_offset, Bytes::copy_from_slice(&self.line));
        self.next_offset += 1;
        Ok(Some(record))
    }

    fn close(self: Box<Self>) -> Result<(), FormatError> {
        Ok(())
    }
}
