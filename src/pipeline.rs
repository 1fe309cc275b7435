//! Conversion Pipeline
//!
//! Streams every record of a source segment into a converted sibling file,
//! then hands the converted file to the upload backend. The returned
//! `ScopedCompletionHandle` owns the converted artifact from then on.
//!
//! ```text
//! source ──reader──► records ──writer──► <prefix>/… converted (+ .crc)
//!                                              │
//!                                   backend.upload ──► ScopedCompletionHandle
//! ```
//!
//! Both streams are closed on every exit path. The first failure wins:
//! a read/write error is reported even if a close fails afterwards.

use crate::codec::SharedCodec;
use crate::config::ShipperConfig;
use crate::error::{ConfigError, FormatError, Result, ShipError};
use crate::format::{self, RecordReader, RecordWriter};
use crate::fs::{LocalFileSystem, StdFileSystem};
use crate::handle::ScopedCompletionHandle;
use crate::path::{self, LogFilePath};
use crate::registry::{Registry, SharedBackend, SharedFormat};
use crate::upload::UploadReceipt;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;
use tracing::{debug, info, warn};

/// Naming token for converted artifacts when none is configured
pub const DEFAULT_CONVERTED_PREFIX: &str = "convertedForUpload";

pub struct ConversionPipeline {
    source_format: SharedFormat,
    destination_format: SharedFormat,
    codec: Option<SharedCodec>,
    converted_prefix: String,
    backend: SharedBackend,
    fs: Arc<dyn LocalFileSystem>,
}

impl ConversionPipeline {
    /// Uncompressed pipeline with the default prefix and the real filesystem
    pub fn new(source_format: SharedFormat, destination_format: SharedFormat, backend: SharedBackend) -> Self {
        ConversionPipeline {
            source_format,
            destination_format,
            codec: None,
            converted_prefix: DEFAULT_CONVERTED_PREFIX.to_string(),
            backend,
            fs: Arc::new(StdFileSystem),
        }
    }

    /// Resolve every name in `config` against `registry`, building the
    /// backend on `runtime`
    pub fn from_config(config: &ShipperConfig, registry: &Registry, runtime: &Handle) -> Result<Self> {
        config.validate()?;
        let backend = registry.resolve_backend(&config.backend, runtime)?;
        Self::from_config_with_backend(config, registry, backend)
    }

    /// Like `from_config`, but ship through an already constructed backend
    pub fn from_config_with_backend(
        config: &ShipperConfig,
        registry: &Registry,
        backend: SharedBackend,
    ) -> Result<Self> {
        config.validate()?;
        let codec = registry.resolve_codec(config.codec_name())?;
        let source_format = registry.resolve_format(&config.source_format)?;
        let destination_format = registry.resolve_format(&config.destination_format)?;

        debug!(
            source_format = source_format.name(),
            destination_format = destination_format.name(),
            codec = codec.as_ref().map(|c| c.name()).unwrap_or("none"),
            backend = backend.name(),
            "conversion pipeline configured"
        );

        Ok(Self::new(source_format, destination_format, backend)
            .with_codec(codec)
            .with_converted_prefix(config.converted_prefix.as_str()))
    }

    pub fn with_codec(mut self, codec: Option<SharedCodec>) -> Self {
        self.codec = codec;
        self
    }

    /// Converted files go under `<base>/<prefix>/`. A prefix that is not a
    /// single ordinary directory name makes every `convert_and_upload` fail
    /// with `ShipError::Configuration`.
    pub fn with_converted_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.converted_prefix = prefix.into();
        self
    }

    pub fn with_file_system(mut self, fs: Arc<dyn LocalFileSystem>) -> Self {
        self.fs = fs;
        self
    }

    pub fn converted_prefix(&self) -> &str {
        &self.converted_prefix
    }

    /// Where `source` is converted to. Deterministic; the codec extension,
    /// if any, is appended to the source extension.
    pub fn converted_path(&self, source: &LogFilePath) -> LogFilePath {
        let derived = source.with_prefix(&self.converted_prefix);
        match &self.codec {
            Some(codec) => derived.with_added_extension(codec.extension()),
            None => derived,
        }
    }

    /// Convert `source` and start uploading the result.
    ///
    /// The source file is never modified. On `Delegation` failure the
    /// converted artifact stays on disk.
    pub fn convert_and_upload(&self, source: &LogFilePath) -> Result<ScopedCompletionHandle<UploadReceipt>> {
        if !path::is_prefix_token(&self.converted_prefix) {
            return Err(ConfigError::Invalid(format!(
                "converted prefix {:?} is not a single directory name",
                self.converted_prefix
            ))
            .into());
        }
        let converted = self.converted_path(source);
        if converted.data_path() == source.data_path() {
            return Err(ConfigError::Invalid(format!(
                "converted path for {} is the source itself",
                source
            ))
            .into());
        }
        let records_copied = self.convert(source, &converted)?;

        info!(
            source = %source,
            converted = %converted,
            records_copied,
            "converted segment"
        );

        let inner = self.backend.upload(&converted).map_err(|e| ShipError::Delegation {
            path: converted.data_path(),
            source: e,
        })?;

        Ok(ScopedCompletionHandle::new(
            inner,
            converted,
            Arc::clone(&self.fs),
            records_copied,
        ))
    }

    /// Copy every record from `source` into `converted`. Returns the count.
    fn convert(&self, source: &LogFilePath, converted: &LogFilePath) -> Result<u64> {
        let codec = self.codec.as_deref();

        let mut reader = self
            .source_format
            .open_reader(source, codec)
            .map_err(|e| ShipError::Conversion {
                path: source.data_path(),
                source: e,
            })?;

        let mut writer = match self.destination_format.open_writer(converted, codec) {
            Ok(writer) => writer,
            Err(e) => {
                if let Err(close_err) = reader.close() {
                    warn!(path = %source, error = %close_err, "failed to close reader");
                }
                return Err(ShipError::Conversion {
                    path: converted.data_path(),
                    source: e,
                });
            }
        };
        self.fs.delete_on_exit(&converted.data_path());
        self.fs.delete_on_exit(&converted.sidecar_path());

        let mut copied = 0u64;
        let drained = drain(reader.as_mut(), writer.as_mut(), &mut copied);
        let writer_closed = writer.close();
        let reader_closed = reader.close();

        if let Err(e) = reader_closed {
            warn!(path = %source, error = %e, "failed to close reader");
        }
        match (drained, writer_closed) {
            (Err(e), writer_closed) => {
                if let Err(close_err) = writer_closed {
                    warn!(path = %converted, error = %close_err, "failed to close writer");
                }
                Err(ShipError::Transform {
                    records_copied: copied,
                    source: e,
                })
            }
            // A writer that cannot close may have left a truncated file
            (Ok(()), Err(e)) => Err(ShipError::Transform {
                records_copied: copied,
                source: e,
            }),
            (Ok(()), Ok(())) => Ok(copied),
        }
    }
}

/// Copy records until the reader is exhausted or either side fails
fn drain(
    reader: &mut dyn RecordReader,
    writer: &mut dyn RecordWriter,
    copied: &mut u64,
) -> std::result::Result<(), FormatError> {
    for record in format::records(reader) {
        writer.write(&record?)?;
        *copied += 1;
    }
    Ok(())
}

impl fmt::Debug for ConversionPipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ConversionPipeline")
            .field("source_format", &self.source_format.name())
            .field("destination_format", &self.destination_format.name())
            .field("codec", &self.codec.as_ref().map(|c| c.name().to_string()))
            .field("converted_prefix", &self.converted_prefix)
            .field("backend", &self.backend.name())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::codec::CompressionCodec;
    use crate::error::UploadError;
    use crate::format::{RecordFormat, SegmentFormat};
    use crate::record::Record;
    use crate::upload::{BoxedHandle, ReadyHandle, UploadBackend};
    use parking_lot::Mutex;
    use std::io;
    use std::path::{Path, PathBuf};
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    /// Observations shared between a scripted format and its streams
    #[derive(Debug, Default)]
    struct Observations {
        reader_closed: AtomicBool,
        writer_closed: AtomicBool,
        written: Mutex<Vec<Record>>,
    }

    /// In-memory format whose failures are scripted per test
    #[derive(Debug, Default)]
    struct ScriptedFormat {
        records: Vec<Record>,
        fail_open_reader: bool,
        fail_open_writer: bool,
        fail_write_at: Option<usize>,
        fail_reader_close: bool,
        fail_writer_close: bool,
        seen: Arc<Observations>,
    }

    fn scripted_error(what: &str) -> FormatError {
        FormatError::Io(io::Error::new(io::ErrorKind::Other, what.to_string()))
    }

    struct ScriptedReader {
        records: std::vec::IntoIter<Record>,
        fail_close: bool,
        seen: Arc<Observations>,
    }

    impl RecordReader for ScriptedReader {
        fn next_record(&mut self) -> std::result::Result<Option<Record>, FormatError> {
            Ok(self.records.next())
        }

        fn close(self: Box<Self>) -> std::result::Result<(), FormatError> {
            self.seen.reader_closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(scripted_error("reader close"));
            }
            Ok(())
        }
    }

    struct ScriptedWriter {
        index: usize,
        fail_at: Option<usize>,
        fail_close: bool,
        seen: Arc<Observations>,
    }

    impl RecordWriter for ScriptedWriter {
        fn write(&mut self, record: &Record) -> std::result::Result<(), FormatError> {
            if self.fail_at == Some(self.index) {
                return Err(scripted_error("write"));
            }
            self.index += 1;
            self.seen.written.lock().push(record.clone());
            Ok(())
        }

        fn close(self: Box<Self>) -> std::result::Result<(), FormatError> {
            self.seen.writer_closed.store(true, Ordering::SeqCst);
            if self.fail_close {
                return Err(scripted_error("writer close"));
            }
            Ok(())
        }
    }

    impl RecordFormat for ScriptedFormat {
        fn name(&self) -> &str {
            "scripted"
        }

        fn open_reader(
            &self,
            _path: &LogFilePath,
            _codec: Option<&dyn CompressionCodec>,
        ) -> std::result::Result<Box<dyn RecordReader>, FormatError> {
            if self.fail_open_reader {
                return Err(scripted_error("open reader"));
            }
            Ok(Box::new(ScriptedReader {
                records: self.records.clone().into_iter(),
                fail_close: self.fail_reader_close,
                seen: Arc::clone(&self.seen),
            }))
        }

        fn open_writer(
            &self,
            _path: &LogFilePath,
            _codec: Option<&dyn CompressionCodec>,
        ) -> std::result::Result<Box<dyn RecordWriter>, FormatError> {
            if self.fail_open_writer {
                return Err(scripted_error("open writer"));
            }
            Ok(Box::new(ScriptedWriter {
                index: 0,
                fail_at: self.fail_write_at,
                fail_close: self.fail_writer_close,
                seen: Arc::clone(&self.seen),
            }))
        }
    }

    /// Backend that records upload calls and resolves immediately
    #[derive(Debug, Default)]
    struct CountingBackend {
        calls: AtomicUsize,
        refuse: bool,
    }

    impl UploadBackend for CountingBackend {
        fn name(&self) -> &str {
            "counting"
        }

        fn upload(&self, path: &LogFilePath) -> std::result::Result<BoxedHandle<UploadReceipt>, UploadError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.refuse {
                return Err(UploadError::Rejected("refused".into()));
            }
            Ok(Box::new(ReadyHandle::ok(UploadReceipt {
                key: path.object_key(),
                size_bytes: 0,
                etag: None,
            })))
        }
    }

    /// Filesystem that only records what it was asked to do
    #[derive(Debug, Default)]
    struct RecordingFs {
        on_exit: Mutex<Vec<PathBuf>>,
        deleted: Mutex<Vec<PathBuf>>,
    }

    impl LocalFileSystem for RecordingFs {
        fn delete(&self, path: &Path) -> io::Result<()> {
            self.deleted.lock().push(path.to_path_buf());
            Ok(())
        }

        fn delete_on_exit(&self, path: &Path) {
            self.on_exit.lock().push(path.to_path_buf());
        }

        fn exists(&self, _path: &Path) -> bool {
            false
        }
    }

    fn sample_records(n: u64) -> Vec<Record> {
        (0..n)
            .map(|i| Record::new(i, format!("k{}", i), format!("v{}", i)))
            .collect()
    }

    fn source() -> LogFilePath {
        LogFilePath::new("/data/segments", "events", vec!["dt=2024-01-01".to_string()], 1, 3, 100, ".seg")
    }

    struct Fixture {
        pipeline: ConversionPipeline,
        seen: Arc<Observations>,
        backend: Arc<CountingBackend>,
        fs: Arc<RecordingFs>,
    }

    fn fixture(format: ScriptedFormat, backend: CountingBackend) -> Fixture {
        let seen = Arc::clone(&format.seen);
        let format: SharedFormat = Arc::new(format);
        let backend = Arc::new(backend);
        let fs = Arc::new(RecordingFs::default());
        let pipeline = ConversionPipeline::new(Arc::clone(&format), format, backend.clone())
            .with_file_system(fs.clone());
        Fixture {
            pipeline,
            seen,
            backend,
            fs,
        }
    }

    #[test]
    fn test_pipeline_is_send_sync() {
        fn assert_send_sync<T: Send + Sync>() {}
        assert_send_sync::<ConversionPipeline>();
    }

    #[test]
    fn test_converted_path_is_deterministic_and_distinct() {
        let f = fixture(ScriptedFormat::default(), CountingBackend::default());
        let src = source();

        let a = f.pipeline.converted_path(&src);
        let b = f.pipeline.converted_path(&src);
        assert_eq!(a, b);
        assert_ne!(a.data_path(), src.data_path());
        assert_eq!(
            a.data_path(),
            PathBuf::from("/data/segments/convertedForUpload/events/dt=2024-01-01/1_3_00000000000000000100.seg")
        );
        // Source value untouched by derivation
        assert!(src.prefixes().is_empty());
    }

    #[cfg(feature = "compression")]
    #[test]
    fn test_converted_path_appends_codec_extension() {
        let f = fixture(ScriptedFormat::default(), CountingBackend::default());
        let pipeline = f
            .pipeline
            .with_codec(Some(Arc::new(crate::codec::ZstdCodec::default()) as SharedCodec));
        assert_eq!(pipeline.converted_path(&source()).extension(), ".seg.zst");

        // Sources that differ only in extension keep distinct converted paths
        let seg = LogFilePath::new("/d", "events", vec![], 1, 0, 5, ".seg");
        let log = LogFilePath::new("/d", "events", vec![], 1, 0, 5, ".log");
        assert_ne!(
            pipeline.converted_path(&seg).data_path(),
            pipeline.converted_path(&log).data_path()
        );
    }

    #[test]
    fn test_bad_prefix_never_touches_source() {
        for prefix in [".", "..", "", "a/b"] {
            let f = fixture(
                ScriptedFormat {
                    records: sample_records(2),
                    ..Default::default()
                },
                CountingBackend::default(),
            );
            let pipeline = f.pipeline.with_converted_prefix(prefix);

            match pipeline.convert_and_upload(&source()).unwrap_err() {
                ShipError::Configuration(ConfigError::Invalid(_)) => {}
                other => panic!("expected Configuration for {:?}, got {:?}", prefix, other),
            }
            assert!(!f.seen.reader_closed.load(Ordering::SeqCst));
            assert!(!f.seen.writer_closed.load(Ordering::SeqCst));
            assert!(f.fs.on_exit.lock().is_empty());
            assert_eq!(f.backend.calls.load(Ordering::SeqCst), 0);
        }
    }

    #[test]
    fn test_success_copies_in_order_and_delegates() {
        let records = sample_records(5);
        let f = fixture(
            ScriptedFormat {
                records: records.clone(),
                ..Default::default()
            },
            CountingBackend::default(),
        );

        let handle = f.pipeline.convert_and_upload(&source()).unwrap();
        assert_eq!(handle.records_copied(), 5);
        assert_eq!(*f.seen.written.lock(), records);
        assert!(f.seen.reader_closed.load(Ordering::SeqCst));
        assert!(f.seen.writer_closed.load(Ordering::SeqCst));
        assert_eq!(f.backend.calls.load(Ordering::SeqCst), 1);

        let converted = handle.converted_path().clone();
        assert_eq!(
            *f.fs.on_exit.lock(),
            vec![converted.data_path(), converted.sidecar_path()]
        );

        let receipt = handle.wait().unwrap();
        assert_eq!(receipt.key, converted.object_key());
        assert_eq!(
            *f.fs.deleted.lock(),
            vec![converted.data_path(), converted.sidecar_path()]
        );
    }

    #[test]
    fn test_write_failure_closes_both_and_skips_upload() {
        let f = fixture(
            ScriptedFormat {
                records: sample_records(5),
                fail_write_at: Some(2),
                fail_writer_close: true,
                fail_reader_close: true,
                ..Default::default()
            },
            CountingBackend::default(),
        );

        let err = f.pipeline.convert_and_upload(&source()).unwrap_err();
        match err {
            ShipError::Transform {
                records_copied,
                source,
            } => {
                assert_eq!(records_copied, 2);
                // The write failure, not either close failure
                assert!(source.to_string().contains("write"));
                assert!(!source.to_string().contains("close"));
            }
            other => panic!("expected Transform, got {:?}", other),
        }
        assert!(f.seen.reader_closed.load(Ordering::SeqCst));
        assert!(f.seen.writer_closed.load(Ordering::SeqCst));
        assert_eq!(f.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_writer_failure_closes_reader() {
        let f = fixture(
            ScriptedFormat {
                records: sample_records(1),
                fail_open_writer: true,
                ..Default::default()
            },
            CountingBackend::default(),
        );

        let err = f.pipeline.convert_and_upload(&source()).unwrap_err();
        assert!(matches!(err, ShipError::Conversion { .. }));
        assert!(f.seen.reader_closed.load(Ordering::SeqCst));
        assert!(f.fs.on_exit.lock().is_empty());
        assert_eq!(f.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_open_reader_failure() {
        let f = fixture(
            ScriptedFormat {
                fail_open_reader: true,
                ..Default::default()
            },
            CountingBackend::default(),
        );

        match f.pipeline.convert_and_upload(&source()).unwrap_err() {
            ShipError::Conversion { path, .. } => assert_eq!(path, source().data_path()),
            other => panic!("expected Conversion, got {:?}", other),
        }
        assert!(!f.seen.writer_closed.load(Ordering::SeqCst));
    }

    #[test]
    fn test_writer_close_failure_is_transform_error() {
        let f = fixture(
            ScriptedFormat {
                records: sample_records(3),
                fail_writer_close: true,
                ..Default::default()
            },
            CountingBackend::default(),
        );

        match f.pipeline.convert_and_upload(&source()).unwrap_err() {
            ShipError::Transform { records_copied, .. } => assert_eq!(records_copied, 3),
            other => panic!("expected Transform, got {:?}", other),
        }
        assert_eq!(f.backend.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_reader_close_failure_is_only_logged() {
        let f = fixture(
            ScriptedFormat {
                records: sample_records(3),
                fail_reader_close: true,
                ..Default::default()
            },
            CountingBackend::default(),
        );

        let handle = f.pipeline.convert_and_upload(&source()).unwrap();
        assert_eq!(handle.records_copied(), 3);
    }

    #[test]
    fn test_delegation_failure_retains_artifact() {
        let f = fixture(
            ScriptedFormat {
                records: sample_records(2),
                ..Default::default()
            },
            CountingBackend {
                refuse: true,
                ..Default::default()
            },
        );

        match f.pipeline.convert_and_upload(&source()).unwrap_err() {
            ShipError::Delegation { source, .. } => assert!(matches!(source, UploadError::Rejected(_))),
            other => panic!("expected Delegation, got {:?}", other),
        }
        assert!(f.fs.deleted.lock().is_empty());
        assert_eq!(f.fs.on_exit.lock().len(), 2);
    }

    #[test]
    fn test_from_config_rejects_unknown_codec() {
        let config = ShipperConfig {
            compression_codec: "lz77".to_string(),
            ..Default::default()
        };
        let err = ConversionPipeline::from_config_with_backend(
            &config,
            &Registry::with_builtins(),
            Arc::new(CountingBackend::default()),
        )
        .unwrap_err();
        assert!(matches!(
            err,
            ShipError::Configuration(crate::error::ConfigError::UnknownCodec(_))
        ));
    }

    #[test]
    fn test_from_config_resolves_formats() {
        let config = ShipperConfig {
            destination_format: SegmentFormat::NAME.to_string(),
            converted_prefix: "staged".to_string(),
            ..Default::default()
        };
        let pipeline = ConversionPipeline::from_config_with_backend(
            &config,
            &Registry::with_builtins(),
            Arc::new(CountingBackend::default()),
        )
        .unwrap();
        assert_eq!(pipeline.converted_prefix(), "staged");
        assert_eq!(pipeline.destination_format.name(), "segment");
    }
}
