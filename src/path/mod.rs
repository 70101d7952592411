//! Polymorphic path facade.
//!
//! `VfsPath` is an immutable value identifying a resource on any supported
//! storage backend (local POSIX, SSH/SFTP, S3, archive contents). The facade
//! dispatches on the URI prefix and delegates to a `PathBackend`
//! implementation; capability flags tell callers what each backend can do
//! instead of letting operations fail ad hoc.

pub mod archive;
pub mod local;
pub mod s3;
pub mod ssh;
pub mod uri;

use crate::error::VfsError;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

pub use uri::Scheme;

/// How a search/viewer feature should read files from a backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SearchStrategy {
    /// Open and stream directly (local files).
    Streaming,
    /// Extract to a temporary location first (archive members).
    Extracted,
    /// Read fully into memory (network backends).
    Buffered,
}

/// Stat-like record shared by all backends.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PathStat {
    /// Size in bytes (0 for directories on backends without directory sizes).
    pub size: u64,
    /// Modification time (Unix timestamp in seconds).
    pub mtime: i64,
    /// Unix permission bits.
    pub mode: u32,
    pub is_dir: bool,
    pub is_symlink: bool,
}

impl PathStat {
    pub fn directory(mtime: i64) -> Self {
        PathStat {
            size: 0,
            mtime,
            mode: 0o755,
            is_dir: true,
            is_symlink: false,
        }
    }

    pub fn file(size: u64, mtime: i64) -> Self {
        PathStat {
            size,
            mtime,
            mode: 0o644,
            is_dir: false,
            is_symlink: false,
        }
    }
}

/// Metadata captured from a directory listing and attached to child paths so
/// `stat` on them avoids another round-trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct PathMetadata {
    pub size: Option<u64>,
    pub mtime: Option<i64>,
    pub is_dir: Option<bool>,
}

/// Tagged metadata record for the UI's details panel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtendedMetadata {
    /// Record type, e.g. "file", "directory", "archive_member", "s3_object".
    pub kind: String,
    /// Ordered label/value pairs.
    pub details: Vec<(String, String)>,
    /// Rendering hint for the consumer ("table" or "list").
    pub format_hint: String,
}

/// Byte-level progress callback: `(bytes_done, bytes_total)`.
pub type ProgressFn = dyn Fn(u64, u64) + Send + Sync;

/// One storage backend behind the `VfsPath` facade.
///
/// Implementations must be cheap to clone conceptually (they are held behind
/// an `Arc`) and must not mutate themselves: a path is a value.
pub trait PathBackend: Send + Sync {
    // ========================================
    // Identity and structure
    // ========================================

    /// Canonical URI of this path. Two paths with equal URIs are equal.
    fn uri(&self) -> String;

    fn scheme(&self) -> Scheme;

    fn is_absolute(&self) -> bool;

    /// Final component name; empty string for a root.
    fn name(&self) -> String;

    /// Parent path. Roots return themselves (scheme-specific sentinel);
    /// the archive root's parent is the archive file itself.
    fn parent(&self) -> VfsPath;

    /// Path components from the anchor down.
    fn parts(&self) -> Vec<String>;

    /// Root/anchor portion of the path ("/", "s3://bucket/", ...).
    fn anchor(&self) -> String;

    /// Appends one or more segments, returning the child path.
    fn join(&self, segment: &str) -> Result<VfsPath, VfsError>;

    // ========================================
    // Queries
    // ========================================

    fn exists(&self) -> bool;
    fn is_dir(&self) -> bool;
    fn is_file(&self) -> bool;
    fn is_symlink(&self) -> bool {
        false
    }
    fn stat(&self) -> Result<PathStat, VfsError>;

    /// Lists direct children in backend order.
    ///
    /// Raises `NotADirectory` on files and `NotFound` on missing paths.
    fn iterdir(&self) -> Result<Vec<VfsPath>, VfsError>;

    // ========================================
    // I/O
    // ========================================

    fn read_bytes(&self) -> Result<Vec<u8>, VfsError>;
    fn write_bytes(&self, data: &[u8]) -> Result<(), VfsError>;

    /// Reads with a byte-progress callback; backends without chunked reads
    /// fall back to a plain read.
    fn read_bytes_with_progress(&self, progress: &ProgressFn) -> Result<Vec<u8>, VfsError> {
        let data = self.read_bytes()?;
        progress(data.len() as u64, data.len() as u64);
        Ok(data)
    }

    fn write_bytes_with_progress(&self, data: &[u8], progress: &ProgressFn) -> Result<(), VfsError> {
        self.write_bytes(data)?;
        progress(data.len() as u64, data.len() as u64);
        Ok(())
    }

    // ========================================
    // Mutation
    // ========================================

    fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<(), VfsError>;
    fn rmdir(&self) -> Result<(), VfsError>;
    /// Recursive delete of a directory tree (or a single file).
    fn rmtree(&self) -> Result<(), VfsError>;
    fn unlink(&self) -> Result<(), VfsError>;
    fn rename(&self, target: &VfsPath) -> Result<(), VfsError>;
    fn touch(&self) -> Result<(), VfsError>;
    fn chmod(&self, mode: u32) -> Result<(), VfsError>;

    // ========================================
    // Capability flags
    // ========================================

    fn is_remote(&self) -> bool {
        false
    }
    fn supports_directory_rename(&self) -> bool {
        true
    }
    fn supports_file_editing(&self) -> bool {
        true
    }
    fn supports_write_operations(&self) -> bool {
        true
    }
    fn requires_extraction_for_reading(&self) -> bool {
        false
    }
    fn supports_streaming_read(&self) -> bool {
        true
    }
    fn should_cache_for_search(&self) -> bool {
        false
    }
    fn search_strategy(&self) -> SearchStrategy {
        SearchStrategy::Streaming
    }

    // ========================================
    // Display hints
    // ========================================

    /// Short prefix shown before the path in pane headers ("SSH:", "S3:").
    fn display_prefix(&self) -> String {
        String::new()
    }

    /// Title line for the pane showing this path.
    fn display_title(&self) -> String {
        self.uri()
    }

    fn extended_metadata(&self) -> ExtendedMetadata;
}

/// Immutable polymorphic path value.
///
/// Cloning is cheap (an `Arc` bump). Equality, ordering, and hashing follow
/// the URI string, so paths work as map keys across backends.
#[derive(Clone)]
pub struct VfsPath {
    inner: Arc<dyn PathBackend>,
}

impl VfsPath {
    /// Builds a path from a URI or plain OS path, dispatching on the prefix.
    pub fn new(uri_or_path: &str) -> Result<VfsPath, VfsError> {
        match uri::scheme_of(uri_or_path) {
            Scheme::Archive => archive::ArchivePathImpl::from_uri(uri_or_path, None),
            Scheme::S3 => s3::S3PathImpl::from_uri(uri_or_path, None),
            Scheme::Ssh => ssh::SshPathImpl::from_uri(uri_or_path, None),
            Scheme::File => Ok(local::LocalPathImpl::from_path(std::path::Path::new(
                uri_or_path,
            ))),
        }
    }

    /// Builds a path with metadata captured from a directory listing.
    pub fn with_metadata(uri: &str, metadata: PathMetadata) -> Result<VfsPath, VfsError> {
        match uri::scheme_of(uri) {
            Scheme::Archive => archive::ArchivePathImpl::from_uri(uri, Some(metadata)),
            Scheme::S3 => s3::S3PathImpl::from_uri(uri, Some(metadata)),
            Scheme::Ssh => ssh::SshPathImpl::from_uri(uri, Some(metadata)),
            Scheme::File => Ok(local::LocalPathImpl::from_path(std::path::Path::new(uri))),
        }
    }

    /// Builds a local path from a `std::path::Path`.
    pub fn from_std(path: &std::path::Path) -> VfsPath {
        local::LocalPathImpl::from_path(path)
    }

    pub(crate) fn from_backend(backend: Arc<dyn PathBackend>) -> VfsPath {
        VfsPath { inner: backend }
    }

    // ========================================
    // Identity and structure
    // ========================================

    pub fn as_uri(&self) -> String {
        self.inner.uri()
    }

    pub fn scheme(&self) -> Scheme {
        self.inner.scheme()
    }

    pub fn is_absolute(&self) -> bool {
        self.inner.is_absolute()
    }

    pub fn name(&self) -> String {
        self.inner.name()
    }

    /// Name without the final suffix ("report" for "report.txt").
    pub fn stem(&self) -> String {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, _)) if !stem.is_empty() => stem.to_string(),
            _ => name,
        }
    }

    /// Final suffix including the dot, or empty string.
    pub fn suffix(&self) -> String {
        let name = self.name();
        match name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => format!(".{}", ext),
            _ => String::new(),
        }
    }

    pub fn parent(&self) -> VfsPath {
        self.inner.parent()
    }

    pub fn parts(&self) -> Vec<String> {
        self.inner.parts()
    }

    pub fn anchor(&self) -> String {
        self.inner.anchor()
    }

    pub fn join(&self, segment: &str) -> Result<VfsPath, VfsError> {
        self.inner.join(segment)
    }

    /// Sibling path with a different final component.
    pub fn with_name(&self, name: &str) -> Result<VfsPath, VfsError> {
        self.parent().join(name)
    }

    /// Sibling path with the suffix replaced (suffix includes the dot).
    pub fn with_suffix(&self, suffix: &str) -> Result<VfsPath, VfsError> {
        self.with_name(&format!("{}{}", self.stem(), suffix))
    }

    // ========================================
    // Queries
    // ========================================

    pub fn exists(&self) -> bool {
        self.inner.exists()
    }

    pub fn is_dir(&self) -> bool {
        self.inner.is_dir()
    }

    pub fn is_file(&self) -> bool {
        self.inner.is_file()
    }

    pub fn is_symlink(&self) -> bool {
        self.inner.is_symlink()
    }

    pub fn stat(&self) -> Result<PathStat, VfsError> {
        self.inner.stat()
    }

    pub fn iterdir(&self) -> Result<Vec<VfsPath>, VfsError> {
        self.inner.iterdir()
    }

    // ========================================
    // I/O
    // ========================================

    pub fn read_bytes(&self) -> Result<Vec<u8>, VfsError> {
        self.inner.read_bytes()
    }

    pub fn read_text(&self) -> Result<String, VfsError> {
        let bytes = self.read_bytes()?;
        String::from_utf8(bytes).map_err(|e| VfsError::io(self.as_uri(), format!("invalid utf-8: {}", e)))
    }

    pub fn write_bytes(&self, data: &[u8]) -> Result<(), VfsError> {
        self.inner.write_bytes(data)
    }

    pub fn write_text(&self, data: &str) -> Result<(), VfsError> {
        self.inner.write_bytes(data.as_bytes())
    }

    pub fn read_bytes_with_progress(&self, progress: &ProgressFn) -> Result<Vec<u8>, VfsError> {
        self.inner.read_bytes_with_progress(progress)
    }

    pub fn write_bytes_with_progress(&self, data: &[u8], progress: &ProgressFn) -> Result<(), VfsError> {
        self.inner.write_bytes_with_progress(data, progress)
    }

    // ========================================
    // Mutation
    // ========================================

    pub fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<(), VfsError> {
        self.inner.mkdir(parents, exist_ok)
    }

    pub fn rmdir(&self) -> Result<(), VfsError> {
        self.inner.rmdir()
    }

    pub fn rmtree(&self) -> Result<(), VfsError> {
        self.inner.rmtree()
    }

    pub fn unlink(&self) -> Result<(), VfsError> {
        self.inner.unlink()
    }

    pub fn rename(&self, target: &VfsPath) -> Result<(), VfsError> {
        self.inner.rename(target)
    }

    pub fn touch(&self) -> Result<(), VfsError> {
        self.inner.touch()
    }

    pub fn chmod(&self, mode: u32) -> Result<(), VfsError> {
        self.inner.chmod(mode)
    }

    // ========================================
    // Capability flags and display hints
    // ========================================

    pub fn is_remote(&self) -> bool {
        self.inner.is_remote()
    }

    pub fn supports_directory_rename(&self) -> bool {
        self.inner.supports_directory_rename()
    }

    pub fn supports_file_editing(&self) -> bool {
        self.inner.supports_file_editing()
    }

    pub fn supports_write_operations(&self) -> bool {
        self.inner.supports_write_operations()
    }

    pub fn requires_extraction_for_reading(&self) -> bool {
        self.inner.requires_extraction_for_reading()
    }

    pub fn supports_streaming_read(&self) -> bool {
        self.inner.supports_streaming_read()
    }

    pub fn should_cache_for_search(&self) -> bool {
        self.inner.should_cache_for_search()
    }

    pub fn search_strategy(&self) -> SearchStrategy {
        self.inner.search_strategy()
    }

    pub fn display_prefix(&self) -> String {
        self.inner.display_prefix()
    }

    pub fn display_title(&self) -> String {
        self.inner.display_title()
    }

    pub fn extended_metadata(&self) -> ExtendedMetadata {
        self.inner.extended_metadata()
    }

    /// Local filesystem path, if this is a `file` scheme path.
    ///
    /// Used to pick native OS fast paths for local-to-local transfers.
    pub fn as_local_path(&self) -> Option<std::path::PathBuf> {
        if self.scheme() == Scheme::File {
            Some(std::path::PathBuf::from(self.as_uri()))
        } else {
            None
        }
    }

    // ========================================
    // Cross-backend transfer
    // ========================================

    /// Copies this path (recursively for directories) to `dest`.
    ///
    /// Same-scheme local copies use the OS; everything else reads the source
    /// into memory (streamed with `progress` where the backend supports it)
    /// and writes to the destination. `dest` is the full target path, not the
    /// containing directory.
    pub fn copy_to(
        &self,
        dest: &VfsPath,
        overwrite: bool,
        progress: Option<&ProgressFn>,
    ) -> Result<(), VfsError> {
        if !self.exists() {
            return Err(VfsError::NotFound { path: self.as_uri() });
        }
        if self.is_dir() {
            dest.mkdir(true, true)?;
            for child in self.iterdir()? {
                let child_dest = dest.join(&child.name())?;
                child.copy_to(&child_dest, overwrite, progress)?;
            }
            return Ok(());
        }

        if dest.exists() {
            if !overwrite {
                return Err(VfsError::FileExists { path: dest.as_uri() });
            }
            if dest.is_dir() {
                dest.rmtree()?;
            }
        }

        if let (Some(src), Some(dst)) = (self.as_local_path(), dest.as_local_path()) {
            return local::copy_local_file(&src, &dst, progress);
        }

        let data = match progress {
            Some(cb) if self.supports_streaming_read() || self.is_remote() => {
                self.read_bytes_with_progress(cb)?
            }
            _ => self.read_bytes()?,
        };
        match progress {
            Some(cb) if dest.is_remote() => dest.write_bytes_with_progress(&data, cb),
            _ => dest.write_bytes(&data),
        }
    }

    /// Moves this path to `dest`.
    ///
    /// Same-scheme moves try the backend's native rename first; cross-scheme
    /// moves copy then delete the source recursively.
    pub fn move_to(&self, dest: &VfsPath, overwrite: bool) -> Result<(), VfsError> {
        if !self.exists() {
            return Err(VfsError::NotFound { path: self.as_uri() });
        }
        if dest.exists() && !overwrite {
            return Err(VfsError::FileExists { path: dest.as_uri() });
        }

        if self.scheme() == dest.scheme() {
            let native_ok = self.is_file() || self.supports_directory_rename();
            if native_ok && self.rename(dest).is_ok() {
                return Ok(());
            }
        }

        self.copy_to(dest, overwrite, None)?;
        if self.is_dir() {
            self.rmtree()
        } else {
            self.unlink()
        }
    }
}

impl PartialEq for VfsPath {
    fn eq(&self, other: &Self) -> bool {
        self.as_uri() == other.as_uri()
    }
}

impl Eq for VfsPath {}

impl std::hash::Hash for VfsPath {
    fn hash<H: std::hash::Hasher>(&self, state: &mut H) {
        self.as_uri().hash(state);
    }
}

impl PartialOrd for VfsPath {
    fn partial_cmp(&self, other: &Self) -> Option<std::cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for VfsPath {
    fn cmp(&self, other: &Self) -> std::cmp::Ordering {
        self.as_uri().cmp(&other.as_uri())
    }
}

impl std::fmt::Display for VfsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_uri())
    }
}

impl std::fmt::Debug for VfsPath {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "VfsPath({})", self.as_uri())
    }
}
