//! Local Filesystem
//!
//! Everything this crate does to local disk goes through here:
//!
//! - `SidecarWriter` / `SidecarReader`: byte sinks/sources that CRC32 every
//!   byte and write/verify the `.name.crc` sidecar next to the data file
//! - `LocalFileSystem`: deletion of converted artifacts (injectable for tests)
//! - `ExitCleanup`: process-wide registry of paths to remove on shutdown
//!
//! ## Sidecar format
//!
//! ```text
//! <crc32 as 8 hex digits> <byte length>\n
//! ```

use crate::error::FormatError;
use crate::path::sidecar_for;
use parking_lot::Mutex;
use std::collections::BTreeSet;
use std::fmt;
use std::fs::File;
use std::io::{self, ErrorKind, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::OnceLock;
use tracing::{debug, warn};

/// CRC32 and length of a data file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Checksum {
    pub crc32: u32,
    pub len: u64,
}

impl Checksum {
    fn to_sidecar(self) -> String {
        format!("{:08x} {}\n", self.crc32, self.len)
    }

    fn parse(contents: &str) -> Option<Self> {
        let mut fields = contents.split_whitespace();
        let crc32 = u32::from_str_radix(fields.next()?, 16).ok()?;
        let len = fields.next()?.parse().ok()?;
        if fields.next().is_some() {
            return None;
        }
        Some(Checksum { crc32, len })
    }
}

/// Read the sidecar for `data_path`, if one exists
pub fn read_sidecar(data_path: &Path) -> Result<Option<Checksum>, FormatError> {
    let sidecar = sidecar_for(data_path);
    match std::fs::read_to_string(&sidecar) {
        Ok(contents) => Checksum::parse(&contents)
            .map(Some)
            .ok_or(FormatError::MalformedSidecar(sidecar)),
        Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
        Err(e) => Err(FormatError::Io(e)),
    }
}

// ============================================================================
// SidecarWriter
// ============================================================================

/// File sink that checksums everything written and emits a sidecar on finish
pub struct SidecarWriter {
    file: File,
    path: PathBuf,
    hasher: crc32fast::Hasher,
    len: u64,
}

impl SidecarWriter {
    /// Create (truncate) the data file, creating parent directories as needed
    pub fn create(path: &Path) -> io::Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = File::create(path)?;
        Ok(SidecarWriter {
            file,
            path: path.to_path_buf(),
            hasher: crc32fast::Hasher::new(),
            len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Sync the data file and write its sidecar
    pub fn finish(mut self) -> io::Result<Checksum> {
        self.file.flush()?;
        self.file.sync_all()?;

        let checksum = Checksum {
            crc32: self.hasher.finalize(),
            len: self.len,
        };
        std::fs::write(sidecar_for(&self.path), checksum.to_sidecar())?;
        Ok(checksum)
    }
}

impl Write for SidecarWriter {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        let written = self.file.write(buf)?;
        self.hasher.update(&buf[..written]);
        self.len += written as u64;
        Ok(written)
    }

    fn flush(&mut self) -> io::Result<()> {
        self.file.flush()
    }
}

impl fmt::Debug for SidecarWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SidecarWriter")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

// ============================================================================
// SidecarReader
// ============================================================================

/// File source that checksums everything read
pub struct SidecarReader {
    file: File,
    path: PathBuf,
    hasher: crc32fast::Hasher,
    len: u64,
}

impl SidecarReader {
    pub fn open(path: &Path) -> io::Result<Self> {
        let file = File::open(path)?;
        Ok(SidecarReader {
            file,
            path: path.to_path_buf(),
            hasher: crc32fast::Hasher::new(),
            len: 0,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Consume the rest of the file and compare against the sidecar.
    ///
    /// A missing sidecar is not an error: segments produced by other tools
    /// may not carry one.
    pub fn verify(mut self) -> Result<Checksum, FormatError> {
        io::copy(&mut self, &mut io::sink())?;

        let actual = Checksum {
            crc32: self.hasher.clone().finalize(),
            len: self.len,
        };
        if let Some(expected) = read_sidecar(&self.path)? {
            if expected != actual {
                return Err(FormatError::ChecksumMismatch {
                    path: self.path,
                    expected: expected.crc32,
                    actual: actual.crc32,
                });
            }
        }
        Ok(actual)
    }
}

impl Read for SidecarReader {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        let n = self.file.read(buf)?;
        self.hasher.update(&buf[..n]);
        self.len += n as u64;
        Ok(n)
    }
}

impl fmt::Debug for SidecarReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SidecarReader")
            .field("path", &self.path)
            .field("len", &self.len)
            .finish()
    }
}

// ============================================================================
// LocalFileSystem
// ============================================================================

/// Local file operations used for artifact cleanup
pub trait LocalFileSystem: Send + Sync + fmt::Debug {
    /// Delete a file. Deleting a missing file succeeds.
    fn delete(&self, path: &Path) -> io::Result<()>;

    /// Best-effort deletion when the process shuts down
    fn delete_on_exit(&self, path: &Path);

    fn exists(&self, path: &Path) -> bool;
}

/// `std::fs` backed filesystem wired to the process-wide `ExitCleanup`
#[derive(Debug, Clone, Copy, Default)]
pub struct StdFileSystem;

impl LocalFileSystem for StdFileSystem {
    fn delete(&self, path: &Path) -> io::Result<()> {
        match std::fs::remove_file(path) {
            Ok(()) => {}
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e),
        }
        exit_cleanup().unregister(path);
        Ok(())
    }

    fn delete_on_exit(&self, path: &Path) {
        exit_cleanup().register(path);
    }

    fn exists(&self, path: &Path) -> bool {
        path.exists()
    }
}

// ============================================================================
// ExitCleanup
// ============================================================================

/// Paths to remove when the process shuts down.
///
/// Rust has no shutdown hooks, so `run` must be triggered explicitly; the
/// binary does so through a `CleanupOnExit` guard and on Ctrl-C. A hard kill
/// or `panic = "abort"` skips it, and that is acceptable: this is only a
/// safety net behind the normal cleanup in `ScopedCompletionHandle`.
#[derive(Debug, Default)]
pub struct ExitCleanup {
    paths: Mutex<BTreeSet<PathBuf>>,
}

impl ExitCleanup {
    pub fn register(&self, path: &Path) {
        self.paths.lock().insert(path.to_path_buf());
    }

    pub fn unregister(&self, path: &Path) {
        self.paths.lock().remove(path);
    }

    pub fn is_tracked(&self, path: &Path) -> bool {
        self.paths.lock().contains(path)
    }

    pub fn len(&self) -> usize {
        self.paths.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.paths.lock().is_empty()
    }

    /// Delete every tracked path. Returns how many were removed.
    pub fn run(&self) -> usize {
        let paths = std::mem::take(&mut *self.paths.lock());
        let mut removed = 0;
        for path in paths {
            match std::fs::remove_file(&path) {
                Ok(()) => {
                    debug!(path = %path.display(), "removed on exit");
                    removed += 1;
                }
                Err(e) if e.kind() == ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "exit cleanup failed"),
            }
        }
        removed
    }
}

/// The process-wide cleanup registry
pub fn exit_cleanup() -> &'static ExitCleanup {
    static REGISTRY: OnceLock<ExitCleanup> = OnceLock::new();
    REGISTRY.get_or_init(ExitCleanup::default)
}

/// Runs the process-wide `ExitCleanup` when dropped
#[derive(Debug, Default)]
pub struct CleanupOnExit;

impl Drop for CleanupOnExit {
    fn drop(&mut self) {
        let removed = exit_cleanup().run();
        if removed > 0 {
            debug!(removed, "exit cleanup finished");
        }
    }
}
