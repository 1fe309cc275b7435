//! Compression Codecs
//!
//! A codec wraps the checksummed file sink/source of `fs` in an encoder or
//! decoder. No codec (`None`) means uncompressed I/O. The same codec value is
//! handed to both the reader and the writer of a conversion so both sides
//! agree on the bit format.
//!
//! ```text
//! RecordWriter → encoder → SidecarWriter → file (+ .crc on finish)
//! RecordReader ← decoder ← SidecarReader ← file (verified against .crc)
//! ```

use crate::fs::{Checksum, SidecarReader, SidecarWriter};
use std::fmt;
use std::io::{self, BufReader, BufWriter, Read, Write};
use std::sync::Arc;

/// Buffer size for file sinks and sources
const IO_BUFFER_SIZE: usize = 64 * 1024;

/// An encoding byte sink that must be finished explicitly
pub trait EncodeWrite: Write + Send {
    /// Flush the codec trailer, sync the file and write its sidecar
    fn finish(self: Box<Self>) -> io::Result<Checksum>;
}

/// A decoding byte source that can hand back its raw file source
pub trait DecodeRead: Read + Send {
    fn into_source(self: Box<Self>) -> SidecarReader;
}

/// A named compression codec
pub trait CompressionCodec: Send + Sync + fmt::Debug {
    /// Registry name, e.g. `zstd`
    fn name(&self) -> &str;

    /// Canonical file extension including the dot, e.g. `.zst`
    fn extension(&self) -> &str;

    fn encoder(&self, sink: SidecarWriter) -> io::Result<Box<dyn EncodeWrite>>;

    fn decoder(&self, source: SidecarReader) -> io::Result<Box<dyn DecodeRead>>;
}

pub type SharedCodec = Arc<dyn CompressionCodec>;

/// Open an encoder for `sink`, uncompressed when `codec` is `None`
pub fn encoder(
    codec: Option<&dyn CompressionCodec>,
    sink: SidecarWriter,
) -> io::Result<Box<dyn EncodeWrite>> {
    match codec {
        Some(codec) => codec.encoder(sink),
        None => Ok(Box::new(PlainEncoder(BufWriter::with_capacity(
            IO_BUFFER_SIZE,
            sink,
        )))),
    }
}

/// Open a decoder for `source`, uncompressed when `codec` is `None`
pub fn decoder(
    codec: Option<&dyn CompressionCodec>,
    source: SidecarReader,
) -> io::Result<Box<dyn DecodeRead>> {
    match codec {
        Some(codec) => codec.decoder(source),
        None => Ok(Box::new(PlainDecoder(BufReader::with_capacity(
            IO_BUFFER_SIZE,
            source,
        )))),
    }
}

fn finish_buffered(buffered: BufWriter<SidecarWriter>) -> io::Result<Checksum> {
    buffered.into_inner().map_err(|e| e.into_error())?.finish()
}

struct PlainEncoder(BufWriter<SidecarWriter>);

impl Write for PlainEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

impl EncodeWrite for PlainEncoder {
    fn finish(self: Box<Self>) -> io::Result<Checksum> {
        finish_buffered(self.0)
    }
}

struct PlainDecoder(BufReader<SidecarReader>);

impl Read for PlainDecoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

impl DecodeRead for PlainDecoder {
    // Buffered-but-unread bytes were already hashed by the SidecarReader.
    fn into_source(self: Box<Self>) -> SidecarReader {
        self.0.into_inner()
    }
}

// ============================================================================
// Zstd
// ============================================================================

/// Zstandard codec (requires the `compression` feature)
#[cfg(feature = "compression")]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZstdCodec {
    level: i32,
}

#[cfg(feature = "compression")]
impl ZstdCodec {
    pub const NAME: &'static str = "zstd";
    pub const EXTENSION: &'static str = ".zst";

    pub fn new(level: i32) -> Self {
        ZstdCodec { level }
    }

    pub fn level(&self) -> i32 {
        self.level
    }
}

#[cfg(feature = "compression")]
impl Default for ZstdCodec {
    fn default() -> Self {
        ZstdCodec::new(3)
    }
}

#[cfg(feature = "compression")]
impl CompressionCodec for ZstdCodec {
    fn name(&self) -> &str {
        Self::NAME
    }

    fn extension(&self) -> &str {
        Self::EXTENSION
    }

    fn encoder(&self, sink: SidecarWriter) -> io::Result<Box<dyn EncodeWrite>> {
        let buffered = BufWriter::with_capacity(IO_BUFFER_SIZE, sink);
        let encoder = zstd::stream::write::Encoder::new(buffered, self.level)?;
        Ok(Box::new(ZstdEncoder(encoder)))
    }

    fn decoder(&self, source: SidecarReader) -> io::Result<Box<dyn DecodeRead>> {
        let decoder = zstd::stream::read::Decoder::new(source)?;
        Ok(Box::new(ZstdDecoder(decoder)))
    }
}

#[cfg(feature = "compression")]
struct ZstdEncoder(zstd::stream::write::Encoder<'static, BufWriter<SidecarWriter>>);

#[cfg(feature = "compression")]
impl Write for ZstdEncoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        self.0.write(buf)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.0.flush()
    }
}

#[cfg(feature = "compression")]
impl EncodeWrite for ZstdEncoder {
    fn finish(self: Box<Self>) -> io::Result<Checksum> {
        finish_buffered(self.0.finish()?)
    }
}

#[cfg(feature = "compression")]
struct ZstdDecoder(zstd::stream::read::Decoder<'static, BufReader<SidecarReader>>);

#[cfg(feature = "compression")]
impl Read for ZstdDecoder {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.0.read(buf)
    }
}

#[cfg(feature = "compression")]
impl DecodeRead for ZstdDecoder {
    fn into_source(self: Box<Self>) -> SidecarReader {
        self.0.finish().into_inner()
    }
}
