//! Configuration for the Segment Shipper
//!
//! Every field has a default, so an empty TOML document is a valid config.
//! Names (formats, codec, backend kind) are resolved against the
//! `Registry` at startup, not here.

use crate::error::ConfigError;
use crate::path::is_prefix_token;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Main configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ShipperConfig {
    /// Registry name of the format source files are read with
    pub source_format: String,
    /// Registry name of the format converted files are written with
    pub destination_format: String,
    /// Registry name of the codec applied to both sides; empty means none
    pub compression_codec: String,
    /// Naming token inserted before the topic in converted paths
    pub converted_prefix: String,
    /// Where converted files are shipped
    pub backend: BackendConfig,
    /// Log output settings
    pub logging: LoggingConfig,
}

impl Default for ShipperConfig {
    fn default() -> Self {
        ShipperConfig {
            source_format: "segment".to_string(),
            destination_format: "segment".to_string(),
            compression_codec: String::new(),
            converted_prefix: "convertedForUpload".to_string(),
            backend: BackendConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl ShipperConfig {
    /// Parse and validate a TOML document
    pub fn from_toml_str(text: &str) -> Result<Self, ConfigError> {
        let config: ShipperConfig = toml::from_str(text)?;
        config.validate()?;
        Ok(config)
    }

    /// Read, parse and validate a TOML file
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&text)
    }

    /// Configured codec name, or `None` when compression is off
    pub fn codec_name(&self) -> Option<&str> {
        let name = self.compression_codec.trim();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.source_format.trim().is_empty() {
            return Err(ConfigError::Invalid("source_format must not be empty".into()));
        }
        if self.destination_format.trim().is_empty() {
            return Err(ConfigError::Invalid(
                "destination_format must not be empty".into(),
            ));
        }
        if !is_prefix_token(&self.converted_prefix) {
            return Err(ConfigError::Invalid(format!(
                "converted_prefix must be a single directory name, got {:?}",
                self.converted_prefix
            )));
        }
        self.backend.validate()
    }
}

/// Upload backend configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct BackendConfig {
    /// Backend kind: `memory`, `localfs` or `s3`
    pub kind: String,
    /// Root directory (for `localfs`)
    pub local_path: Option<PathBuf>,
    /// Prefix prepended to every object key
    pub key_prefix: String,
    /// Upper bound on a single put; absent means wait indefinitely
    #[serde(with = "option_duration_millis")]
    pub put_timeout: Option<Duration>,
    /// S3 configuration (for `s3`)
    #[cfg(feature = "s3")]
    pub s3: Option<S3Config>,
}

impl Default for BackendConfig {
    fn default() -> Self {
        BackendConfig {
            kind: "memory".to_string(),
            local_path: None,
            key_prefix: String::new(),
            put_timeout: None,
            #[cfg(feature = "s3")]
            s3: None,
        }
    }
}

impl BackendConfig {
    /// Local filesystem backend rooted at `path`
    pub fn local(path: PathBuf) -> Self {
        BackendConfig {
            kind: "localfs".to_string(),
            local_path: Some(path),
            ..Default::default()
        }
    }

    fn validate(&self) -> Result<(), ConfigError> {
        if self.kind == "localfs" && self.local_path.is_none() {
            return Err(ConfigError::Invalid(
                "backend.local_path is required for the localfs backend".into(),
            ));
        }
        #[cfg(feature = "s3")]
        if self.kind == "s3" && self.s3.is_none() {
            return Err(ConfigError::Invalid(
                "backend.s3 is required for the s3 backend".into(),
            ));
        }
        if self.put_timeout == Some(Duration::ZERO) {
            return Err(ConfigError::Invalid("backend.put_timeout must be positive".into()));
        }
        Ok(())
    }
}

/// S3 configuration
#[cfg(feature = "s3")]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct S3Config {
    /// S3 bucket name. Keys are prefixed by `backend.key_prefix` only.
    pub bucket: String,
    /// AWS region
    pub region: String,
    /// Custom endpoint (for S3-compatible services like MinIO)
    #[serde(default)]
    pub endpoint: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Emit JSON lines instead of human-readable output
    pub json: bool,
    /// Filter directive used when `RUST_LOG` is unset
    pub filter: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            json: false,
            filter: "info".to_string(),
        }
    }
}

mod option_duration_millis {
    use serde::{Deserialize, Deserializer, Serialize, Serializer};
    use std::time::Duration;

    pub fn serialize<S>(duration: &Option<Duration>, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        duration.map(|d| d.as_millis() as u64).serialize(serializer)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> Result<Option<Duration>, D::Error>
    where
        D: Deserializer<'de>,
    {
        let millis = Option::<u64>::deserialize(deserializer)?;
        Ok(millis.map(Duration::from_millis))
    }
}
