//! Named Factories
//!
//! Maps the names used in `ShipperConfig` to constructors for codecs,
//! record formats and upload backends. Everything is resolved once when the
//! pipeline is built; a name that does not resolve is a `ConfigError`
//! before any file is touched.

use crate::codec::SharedCodec;
use crate::config::BackendConfig;
use crate::error::ConfigError;
use crate::format::{DelimitedFormat, RecordFormat, SegmentFormat};
use crate::upload::{InMemoryObjectStore, LocalFsObjectStore, ObjectStoreUploader, UploadBackend};
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tokio::runtime::Handle;

pub type SharedFormat = Arc<dyn RecordFormat>;
pub type SharedBackend = Arc<dyn UploadBackend>;

pub type CodecFactory = Arc<dyn Fn() -> SharedCodec + Send + Sync>;
pub type FormatFactory = Arc<dyn Fn() -> SharedFormat + Send + Sync>;
pub type BackendFactory =
    Arc<dyn Fn(&BackendConfig, &Handle) -> Result<SharedBackend, ConfigError> + Send + Sync>;

/// Codecs this crate knows about even when they are compiled out
const KNOWN_CODECS: &[&str] = &["zstd"];

pub struct Registry {
    codecs: HashMap<String, CodecFactory>,
    formats: HashMap<String, FormatFactory>,
    backends: HashMap<String, BackendFactory>,
}

impl Registry {
    /// A registry with nothing registered
    pub fn empty() -> Self {
        Registry {
            codecs: HashMap::new(),
            formats: HashMap::new(),
            backends: HashMap::new(),
        }
    }

    /// A registry with every built-in codec, format and backend
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();

        #[cfg(feature = "compression")]
        registry.register_codec(crate::codec::ZstdCodec::NAME, || {
            Arc::new(crate::codec::ZstdCodec::default()) as SharedCodec
        });

        registry.register_format(SegmentFormat::NAME, || Arc::new(SegmentFormat) as SharedFormat);
        registry.register_format(DelimitedFormat::NAME, || Arc::new(DelimitedFormat) as SharedFormat);

        registry.register_backend("memory", |config, runtime| {
            let uploader = ObjectStoreUploader::new(Arc::new(InMemoryObjectStore::new()), runtime.clone())
                .with_key_prefix(config.key_prefix.as_str())
                .with_put_timeout(config.put_timeout);
            Ok(Arc::new(uploader) as SharedBackend)
        });
        registry.register_backend("localfs", |config, runtime| {
            let root = config.local_path.clone().ok_or_else(|| {
                ConfigError::Invalid("backend.local_path is required for the localfs backend".into())
            })?;
            let uploader = ObjectStoreUploader::new(Arc::new(LocalFsObjectStore::new(root)), runtime.clone())
                .with_key_prefix(config.key_prefix.as_str())
                .with_put_timeout(config.put_timeout);
            Ok(Arc::new(uploader) as SharedBackend)
        });
        #[cfg(feature = "s3")]
        registry.register_backend("s3", |config, runtime| {
            let s3 = config.s3.as_ref().ok_or_else(|| {
                ConfigError::Invalid("backend.s3 is required for the s3 backend".into())
            })?;
            let store = crate::upload::S3ObjectStore::new(s3)
                .map_err(|e| ConfigError::Invalid(e.to_string()))?;
            let uploader = ObjectStoreUploader::new(Arc::new(store), runtime.clone())
                .with_key_prefix(config.key_prefix.as_str())
                .with_put_timeout(config.put_timeout);
            Ok(Arc::new(uploader) as SharedBackend)
        });

        registry
    }

    pub fn register_codec<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> SharedCodec + Send + Sync + 'static,
    {
        self.codecs.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_format<F>(&mut self, name: &str, factory: F)
    where
        F: Fn() -> SharedFormat + Send + Sync + 'static,
    {
        self.formats.insert(name.to_string(), Arc::new(factory));
    }

    pub fn register_backend<F>(&mut self, name: &str, factory: F)
    where
        F: Fn(&BackendConfig, &Handle) -> Result<SharedBackend, ConfigError> + Send + Sync + 'static,
    {
        self.backends.insert(name.to_string(), Arc::new(factory));
    }

    /// Resolve an optional codec name. `None` or a blank name means no
    /// compression; any other name must resolve.
    pub fn resolve_codec(&self, name: Option<&str>) -> Result<Option<SharedCodec>, ConfigError> {
        let name = match name.map(str::trim) {
            None | Some("") => return Ok(None),
            Some(name) => name,
        };
        match self.codecs.get(name) {
            Some(factory) => Ok(Some(factory())),
            None if KNOWN_CODECS.contains(&name) => Err(ConfigError::CodecUnavailable(name.to_string())),
            None => Err(ConfigError::UnknownCodec(name.to_string())),
        }
    }

    pub fn resolve_format(&self, name: &str) -> Result<SharedFormat, ConfigError> {
        self.formats
            .get(name)
            .map(|factory| factory())
            .ok_or_else(|| ConfigError::UnknownFormat(name.to_string()))
    }

    /// Build the backend named by `config.kind`, spawning its uploads on `runtime`
    pub fn resolve_backend(&self, config: &BackendConfig, runtime: &Handle) -> Result<SharedBackend, ConfigError> {
        let factory = self
            .backends
            .get(config.kind.as_str())
            .ok_or_else(|| ConfigError::UnknownBackend(config.kind.clone()))?;
        factory(config, runtime)
    }

    fn sorted(names: impl Iterator<Item = String>) -> Vec<String> {
        let mut names: Vec<String> = names.collect();
        names.sort();
        names
    }

    pub fn codec_names(&self) -> Vec<String> {
        Self::sorted(self.codecs.keys().cloned())
    }

    pub fn format_names(&self) -> Vec<String> {
        Self::sorted(self.formats.keys().cloned())
    }

    pub fn backend_names(&self) -> Vec<String> {
        Self::sorted(self.backends.keys().cloned())
    }
}

impl Default for Registry {
    fn default() -> Self {
        Self::with_builtins()
    }
}

impl fmt::Debug for Registry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Registry")
            .field("codecs", &self.codec_names())
            .field("formats", &self.format_names())
            .field("backends", &self.backend_names())
            .finish()
    }
}
