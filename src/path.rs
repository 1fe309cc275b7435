//! Log Segment Paths
//!
//! A `LogFilePath` names one finalized segment file and its checksum sidecar.
//!
//! ## Layout
//!
//! ```text
//! <base_dir>/<prefix...>/<topic>/<partition...>/<generation>_<kafka_partition>_<offset><extension>
//! <base_dir>/<prefix...>/<topic>/<partition...>/.<generation>_<kafka_partition>_<offset><extension>.crc
//! ```
//!
//! Derivations (`with_prefix`, `with_added_extension`) return new values and
//! never touch the original, so a converted artifact always keeps the topic,
//! partition and offset identity of the segment it came from.

use std::fmt;
use std::path::{Component, Path, PathBuf};
use thiserror::Error;

/// Suffix of the checksum sidecar file
pub const SIDECAR_SUFFIX: &str = ".crc";

/// Width the offset is zero-padded to in file names
const OFFSET_WIDTH: usize = 20;

/// Errors parsing a filesystem path back into a `LogFilePath`
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ParsePathError {
    #[error("{path} is not under {base}")]
    OutsideBase { path: PathBuf, base: PathBuf },

    #[error("{0} has too few components (need <topic>/<file>)")]
    TooShort(PathBuf),

    #[error("Malformed segment file name: {0}")]
    BadFileName(String),
}

/// Identity and location of a local segment file
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct LogFilePath {
    base_dir: PathBuf,
    prefixes: Vec<String>,
    topic: String,
    partitions: Vec<String>,
    generation: u32,
    kafka_partition: u32,
    offset: u64,
    extension: String,
}

impl LogFilePath {
    /// Create a path with no naming prefixes
    pub fn new(
        base_dir: impl Into<PathBuf>,
        topic: impl Into<String>,
        partitions: Vec<String>,
        generation: u32,
        kafka_partition: u32,
        offset: u64,
        extension: impl Into<String>,
    ) -> Self {
        let topic = topic.into();
        debug_assert!(!topic.is_empty(), "Precondition: topic must not be empty");

        LogFilePath {
            base_dir: base_dir.into(),
            prefixes: Vec::new(),
            topic,
            partitions,
            generation,
            kafka_partition,
            offset,
            extension: normalize_extension(extension.into()),
        }
    }

    /// Recover a `LogFilePath` from a file laid out under `base_dir`.
    ///
    /// The first component below `base_dir` is taken as the topic, so paths
    /// carrying naming prefixes cannot be parsed back unambiguously.
    pub fn parse(base_dir: impl Into<PathBuf>, path: &Path) -> Result<Self, ParsePathError> {
        let base_dir = base_dir.into();
        let relative = path
            .strip_prefix(&base_dir)
            .map_err(|_| ParsePathError::OutsideBase {
                path: path.to_path_buf(),
                base: base_dir.clone(),
            })?;

        let mut components: Vec<String> = relative
            .components()
            .filter_map(|c| match c {
                Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
                _ => None,
            })
            .collect();
        if components.len() < 2 {
            return Err(ParsePathError::TooShort(path.to_path_buf()));
        }

        let file_name = components.pop().unwrap_or_default();
        let topic = components.remove(0);
        let (generation, kafka_partition, offset, extension) = parse_file_name(&file_name)?;

        Ok(LogFilePath {
            base_dir,
            prefixes: Vec::new(),
            topic,
            partitions: components,
            generation,
            kafka_partition,
            offset,
            extension,
        })
    }

    /// Derive a sibling path one naming prefix deeper.
    ///
    /// `token` must satisfy `is_prefix_token`; callers validate it first.
    pub fn with_prefix(&self, token: &str) -> Self {
        debug_assert!(
            is_prefix_token(token),
            "Precondition: prefix token must be a single normal path component"
        );

        let mut derived = self.clone();
        derived.prefixes.push(token.to_string());
        derived
    }

    /// Derive a path whose extension is this one followed by `extension`,
    /// e.g. `.seg` + `zst` gives `.seg.zst`
    pub fn with_added_extension(&self, extension: &str) -> Self {
        let mut derived = self.clone();
        derived
            .extension
            .push_str(&normalize_extension(extension.to_string()));
        derived
    }

    pub fn topic(&self) -> &str {
        &self.topic
    }

    pub fn partitions(&self) -> &[String] {
        &self.partitions
    }

    pub fn generation(&self) -> u32 {
        self.generation
    }

    pub fn kafka_partition(&self) -> u32 {
        self.kafka_partition
    }

    pub fn offset(&self) -> u64 {
        self.offset
    }

    pub fn extension(&self) -> &str {
        &self.extension
    }

    pub fn prefixes(&self) -> &[String] {
        &self.prefixes
    }

    /// File name of the primary data file
    pub fn file_name(&self) -> String {
        format!(
            "{}_{}_{:0width$}{}",
            self.generation,
            self.kafka_partition,
            self.offset,
            self.extension,
            width = OFFSET_WIDTH
        )
    }

    /// Directory holding the data file and its sidecar
    pub fn dir(&self) -> PathBuf {
        let mut dir = self.base_dir.clone();
        for prefix in &self.prefixes {
            dir.push(prefix);
        }
        dir.push(&self.topic);
        for partition in &self.partitions {
            dir.push(partition);
        }
        dir
    }

    /// Full path of the primary data file
    pub fn data_path(&self) -> PathBuf {
        self.dir().join(self.file_name())
    }

    /// Full path of the checksum sidecar
    pub fn sidecar_path(&self) -> PathBuf {
        sidecar_for(&self.data_path())
    }

    /// Object-store key: topic, partitions and file name, without the local
    /// base directory or any naming prefixes.
    pub fn object_key(&self) -> String {
        let mut parts: Vec<&str> = Vec::with_capacity(self.partitions.len() + 2);
        parts.push(&self.topic);
        parts.extend(self.partitions.iter().map(String::as_str));
        let file_name = self.file_name();
        let mut key = parts.join("/");
        key.push('/');
        key.push_str(&file_name);
        key
    }
}

impl fmt::Display for LogFilePath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.data_path().display())
    }
}

/// True when `token` is exactly one ordinary directory name (not `.`,
/// `..`, absolute, or containing a separator)
pub fn is_prefix_token(token: &str) -> bool {
    if token.contains(std::path::is_separator) {
        return false;
    }
    let mut components = Path::new(token).components();
    matches!(
        (components.next(), components.next()),
        (Some(Component::Normal(_)), None)
    )
}

/// Sidecar path for any data file: `dir/.name.crc`
pub fn sidecar_for(data_path: &Path) -> PathBuf {
    let name = data_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let sidecar_name = format!(".{}{}", name, SIDECAR_SUFFIX);
    match data_path.parent() {
        Some(parent) => parent.join(sidecar_name),
        None => PathBuf::from(sidecar_name),
    }
}

fn normalize_extension(extension: String) -> String {
    if extension.is_empty() || extension.starts_with('.') {
        extension
    } else {
        format!(".{}", extension)
    }
}

fn parse_file_name(name: &str) -> Result<(u32, u32, u64, String), ParsePathError> {
    let bad = || ParsePathError::BadFileName(name.to_string());

    let (stem, extension) = match name.split_once('.') {
        Some((stem, rest)) => (stem, format!(".{}", rest)),
        None => (name, String::new()),
    };

    let mut fields = stem.split('_');
    let generation = fields.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    let kafka_partition = fields.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    let offset = fields.next().and_then(|s| s.parse().ok()).ok_or_else(bad)?;
    if fields.next().is_some() {
        return Err(bad());
    }

    Ok((generation, kafka_partition, offset, extension))
}
