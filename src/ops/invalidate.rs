//! Cache invalidation after mutating operations.
//!
//! Best-effort by design: a dropped cache entry costs one extra API call,
//! a stale one shows wrong listings. Directory *view* refreshes are the
//! container's job (`TaskUi::refresh_files`); this collaborator drops the
//! storage-level caches that back those listings.

use super::archive_task::ArchiveOperationType;
use super::task::FileOperationType;
use crate::archive::{archive_cache, is_archive_filename};
use crate::path::uri::parse_s3_uri;
use crate::path::{Scheme, VfsPath};
use crate::path::s3::s3_cache;

/// Invalidates dependent cache entries after an operation mutates storage.
#[derive(Default)]
pub struct CacheInvalidator;

impl CacheInvalidator {
    pub fn new() -> CacheInvalidator {
        CacheInvalidator
    }

    /// Invalidation for copy/move/delete: the destination listing always,
    /// each source's parent for delete/move.
    pub fn invalidate_file_operation(
        &self,
        operation: FileOperationType,
        sources: &[VfsPath],
        destination: Option<&VfsPath>,
    ) {
        if let Some(dest) = destination {
            self.invalidate_listing(dest);
        }
        if matches!(operation, FileOperationType::Move | FileOperationType::Delete) {
            for source in sources {
                self.invalidate_listing(&source.parent());
                self.invalidate_archive_file(source);
            }
        }
    }

    /// Invalidation for archive create/extract: the destination (the new
    /// archive file's parent, or the extraction target).
    pub fn invalidate_archive_operation(
        &self,
        operation: ArchiveOperationType,
        destination: &VfsPath,
    ) {
        match operation {
            ArchiveOperationType::Create => {
                self.invalidate_listing(&destination.parent());
                // An overwritten archive must not serve its old index
                self.invalidate_archive_file(destination);
            }
            ArchiveOperationType::Extract => {
                self.invalidate_listing(destination);
            }
        }
    }

    /// Drops cached listing data for a directory on cache-backed schemes.
    fn invalidate_listing(&self, path: &VfsPath) {
        if path.scheme() == Scheme::S3 {
            if let Ok(parsed) = parse_s3_uri(&path.as_uri()) {
                s3_cache().invalidate_key(&parsed.bucket, &parsed.key);
            }
        }
    }

    /// Drops the open-handler cache entry when a mutated path is an archive.
    fn invalidate_archive_file(&self, path: &VfsPath) {
        if is_archive_filename(&path.name()) {
            archive_cache().invalidate(path);
        }
    }
}
