//! Archive create/extract I/O.
//!
//! Creation writes directly when sources and destination are local and
//! stages through a temp directory otherwise; a cancelled create always
//! unlinks the partial archive so no corrupted container is left behind.
//! Extraction streams member by member, honoring the overwrite flag and the
//! per-member skip/overwrite sets produced by conflict resolution.

use super::CompletionCallback;
use crate::archive::{ArchiveHandler, ArchiveType, ArchiveWriter, archive_cache};
use crate::error::VfsError;
use crate::path::{Scheme, VfsPath};
use crate::progress::{OperationType, ProgressCallback, ProgressManager};
use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// One member that would be overwritten by an extraction.
#[derive(Debug, Clone)]
pub struct ExtractConflict {
    /// Member path relative to the destination root.
    pub relative_path: String,
    pub dest: VfsPath,
}

/// Runs archive create/extract with progress and cooperative cancellation.
pub struct ArchiveOperationExecutor {
    progress: Arc<ProgressManager>,
    progress_callback: Option<ProgressCallback>,
}

impl ArchiveOperationExecutor {
    pub fn new(
        progress: Arc<ProgressManager>,
        progress_callback: Option<ProgressCallback>,
    ) -> ArchiveOperationExecutor {
        ArchiveOperationExecutor {
            progress,
            progress_callback,
        }
    }

    pub fn progress(&self) -> &Arc<ProgressManager> {
        &self.progress
    }

    // ========================================
    // Conflict detection (called by the task before execution)
    // ========================================

    /// Create conflicts iff the destination archive file already exists.
    pub fn check_create_conflict(archive_path: &VfsPath) -> bool {
        archive_path.exists()
    }

    /// Extraction conflicts: every file member whose destination already
    /// exists. Directory entries are skipped.
    pub fn check_extract_conflicts(
        archive_path: &VfsPath,
        destination: &VfsPath,
    ) -> Result<Vec<ExtractConflict>, VfsError> {
        let handler = archive_cache().get_handler(archive_path)?;
        let mut conflicts = Vec::new();
        for entry in handler.list_all_files()? {
            let dest = destination.join(&entry.internal_path)?;
            if dest.exists() {
                conflicts.push(ExtractConflict {
                    relative_path: entry.internal_path.clone(),
                    dest,
                });
            }
        }
        Ok(conflicts)
    }

    // ========================================
    // Create
    // ========================================

    /// Creates an archive from `sources` at `archive_path`.
    ///
    /// The total is unknown up front; the progress display shows a running
    /// member count. The completion callback fires exactly once.
    pub fn perform_create_operation(
        &self,
        sources: &[VfsPath],
        archive_path: &VfsPath,
        format: ArchiveType,
        cancel: &AtomicBool,
        on_complete: &CompletionCallback,
    ) {
        self.progress.start_operation(
            OperationType::ArchiveCreate,
            0,
            &archive_path.name(),
            self.progress_callback.clone(),
        );

        let result = self.create_archive(sources, archive_path, format, cancel);
        match result {
            Ok(count) => on_complete(count, 0),
            Err(VfsError::Cancelled) => {
                // Never leave a truncated container at the destination
                if archive_path.exists() {
                    if let Err(e) = archive_path.unlink() {
                        log::warn!("failed to remove partial archive {}: {}", archive_path, e);
                    }
                }
                log::info!("archive creation cancelled, partial {} removed", archive_path);
                on_complete(0, 0);
            }
            Err(e) => {
                log::error!("archive creation failed: {}", e);
                self.progress.increment_errors();
                on_complete(0, 1);
            }
        }
    }

    fn create_archive(
        &self,
        sources: &[VfsPath],
        archive_path: &VfsPath,
        format: ArchiveType,
        cancel: &AtomicBool,
    ) -> Result<usize, VfsError> {
        let all_local = archive_path.scheme() == Scheme::File
            && sources.iter().all(|s| s.scheme() == Scheme::File);
        if all_local {
            let local_sources: Vec<PathBuf> = sources
                .iter()
                .filter_map(|s| s.as_local_path())
                .collect();
            let target = archive_path
                .as_local_path()
                .expect("checked local scheme above");
            return self.create_archive_local(&local_sources, &target, format, cancel);
        }
        self.create_archive_cross_storage(sources, archive_path, format, cancel)
    }

    /// Direct local creation: open the writer on the destination and add
    /// members as they are walked.
    fn create_archive_local(
        &self,
        sources: &[PathBuf],
        target: &Path,
        format: ArchiveType,
        cancel: &AtomicBool,
    ) -> Result<usize, VfsError> {
        if cancel.load(Ordering::Relaxed) {
            return Err(VfsError::Cancelled);
        }
        let mut writer = ArchiveWriter::create(target, format)?;
        let mut count = 0usize;

        let result = (|| -> Result<(), VfsError> {
            for source in sources {
                self.add_source_to_archive(&mut writer, source, cancel, &mut count)?;
            }
            Ok(())
        })();

        match result {
            Ok(()) => {
                writer.finish()?;
                Ok(count)
            }
            Err(e) => {
                // Drop the writer, then let the caller unlink the partial file
                drop(writer);
                let _ = std::fs::remove_file(target);
                Err(e)
            }
        }
    }

    /// Adds one source (recursing into directories). Member names are the
    /// source's own name plus the interior relative path.
    fn add_source_to_archive(
        &self,
        writer: &mut ArchiveWriter,
        source: &Path,
        cancel: &AtomicBool,
        count: &mut usize,
    ) -> Result<(), VfsError> {
        let base_name = source
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .ok_or_else(|| VfsError::io(source.to_string_lossy(), "source has no name"))?;

        if source.is_dir() {
            for entry in walkdir::WalkDir::new(source).sort_by_file_name() {
                if cancel.load(Ordering::Relaxed) {
                    return Err(VfsError::Cancelled);
                }
                let entry =
                    entry.map_err(|e| VfsError::io(source.to_string_lossy(), e.to_string()))?;
                let relative = entry
                    .path()
                    .strip_prefix(source)
                    .map_err(|e| VfsError::io(source.to_string_lossy(), e.to_string()))?;
                let member_name = if relative.as_os_str().is_empty() {
                    base_name.clone()
                } else {
                    format!("{}/{}", base_name, relative.to_string_lossy())
                };
                if entry.file_type().is_dir() {
                    writer.add_directory(&member_name, entry.path())?;
                } else {
                    writer.add_file(&member_name, entry.path())?;
                    *count += 1;
                    self.progress.update_progress(&member_name, None);
                }
            }
            return Ok(());
        }

        if cancel.load(Ordering::Relaxed) {
            return Err(VfsError::Cancelled);
        }
        writer.add_file(&base_name, source)?;
        *count += 1;
        self.progress.update_progress(&base_name, None);
        Ok(())
    }

    /// Cross-storage creation: stage remote inputs into a temp directory,
    /// build the archive locally, then upload it to the destination.
    fn create_archive_cross_storage(
        &self,
        sources: &[VfsPath],
        archive_path: &VfsPath,
        format: ArchiveType,
        cancel: &AtomicBool,
    ) -> Result<usize, VfsError> {
        let staging = tempfile::tempdir().map_err(|e| VfsError::io("", e.to_string()))?;
        log::debug!(
            "staging {} source(s) for cross-storage archive at {}",
            sources.len(),
            staging.path().display()
        );

        let inputs_dir = staging.path().join("inputs");
        std::fs::create_dir(&inputs_dir)
            .map_err(|e| VfsError::from_io(e, &inputs_dir.to_string_lossy()))?;
        let mut staged: Vec<PathBuf> = Vec::with_capacity(sources.len());
        for source in sources {
            if cancel.load(Ordering::Relaxed) {
                return Err(VfsError::Cancelled);
            }
            let local = inputs_dir.join(source.name());
            source.copy_to(&VfsPath::from_std(&local), true, None)?;
            staged.push(local);
        }

        let local_archive = staging.path().join(archive_path.name());
        let count = self.create_archive_local(&staged, &local_archive, format, cancel)?;

        if cancel.load(Ordering::Relaxed) {
            return Err(VfsError::Cancelled);
        }
        let progress_manager = Arc::clone(&self.progress);
        let byte_progress = move |done: u64, total: u64| {
            progress_manager.update_file_byte_progress(done, total);
        };
        VfsPath::from_std(&local_archive).copy_to(archive_path, true, Some(&byte_progress))?;
        Ok(count)
    }

    // ========================================
    // Extract
    // ========================================

    /// Extracts an archive into `destination`.
    ///
    /// `skip_files` and `overwrite_files` hold member paths relative to the
    /// destination root, as produced by conflict resolution. Items are
    /// counted as they are extracted; there is no pre-count pass.
    #[allow(clippy::too_many_arguments)]
    pub fn perform_extract_operation(
        &self,
        archive_path: &VfsPath,
        destination: &VfsPath,
        overwrite: bool,
        skip_files: &HashSet<String>,
        overwrite_files: &HashSet<String>,
        cancel: &AtomicBool,
        on_complete: &CompletionCallback,
    ) {
        self.progress.start_operation(
            OperationType::ArchiveExtract,
            0,
            &archive_path.name(),
            self.progress_callback.clone(),
        );

        let result = self.extract_archive(
            archive_path,
            destination,
            overwrite,
            skip_files,
            overwrite_files,
            cancel,
        );
        match result {
            Ok((extracted, errors)) => on_complete(extracted, errors),
            Err(VfsError::Cancelled) => {
                log::info!("extraction of {} cancelled", archive_path);
                on_complete(0, 0);
            }
            Err(e) => {
                log::error!("extraction of {} failed: {}", archive_path, e);
                self.progress.increment_errors();
                on_complete(0, 1);
            }
        }
    }

    fn extract_archive(
        &self,
        archive_path: &VfsPath,
        destination: &VfsPath,
        overwrite: bool,
        skip_files: &HashSet<String>,
        overwrite_files: &HashSet<String>,
        cancel: &AtomicBool,
    ) -> Result<(usize, usize), VfsError> {
        let handler = archive_cache().get_handler(archive_path)?;
        if destination.scheme() == Scheme::File {
            return self.extract_members(
                &handler,
                destination,
                overwrite,
                skip_files,
                overwrite_files,
                cancel,
            );
        }

        // Cross-storage: extract into a temp tree, then upload the results
        let staging = tempfile::tempdir().map_err(|e| VfsError::io("", e.to_string()))?;
        let local_root = VfsPath::from_std(staging.path());
        let (_staged_count, mut errors) = self.extract_members(
            &handler,
            &local_root,
            // Conflicts exist on the real destination, not in the fresh temp
            true,
            skip_files,
            &HashSet::new(),
            cancel,
        )?;

        let mut uploaded = 0usize;
        for entry in handler.list_all_files()? {
            if cancel.load(Ordering::Relaxed) {
                return Err(VfsError::Cancelled);
            }
            let relative = &entry.internal_path;
            if skip_files.contains(relative) {
                continue;
            }
            let local_member = staging.path().join(relative);
            if !local_member.exists() {
                continue;
            }
            let dest = destination.join(relative)?;
            let allow_overwrite = overwrite || overwrite_files.contains(relative);
            if dest.exists() && !allow_overwrite {
                continue;
            }
            match VfsPath::from_std(&local_member).copy_to(&dest, true, None) {
                Ok(()) => uploaded += 1,
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("failed to upload {}: {}", relative, e);
                    errors += 1;
                    self.progress.increment_errors();
                }
            }
        }
        Ok((uploaded, errors))
    }

    fn extract_members(
        &self,
        handler: &ArchiveHandler,
        destination: &VfsPath,
        overwrite: bool,
        skip_files: &HashSet<String>,
        overwrite_files: &HashSet<String>,
        cancel: &AtomicBool,
    ) -> Result<(usize, usize), VfsError> {
        let mut extracted = 0usize;
        let mut errors = 0usize;
        for entry in handler.list_all_files()? {
            if cancel.load(Ordering::Relaxed) {
                return Err(VfsError::Cancelled);
            }
            let relative = &entry.internal_path;
            if skip_files.contains(relative) {
                log::info!("skipping {} by user choice", relative);
                continue;
            }
            let dest = destination.join(relative)?;
            let allow_overwrite = overwrite || overwrite_files.contains(relative);
            if dest.exists() && !allow_overwrite {
                log::info!("destination exists, skipping: {}", dest);
                continue;
            }
            let parent = dest.parent();
            if parent.as_uri() != dest.as_uri() && !parent.exists() {
                parent.mkdir(true, true)?;
            }
            let local_dest = dest
                .as_local_path()
                .expect("extract_members targets local destinations");
            match handler.extract_to_file(relative, &local_dest) {
                Ok(()) => {
                    extracted += 1;
                    self.progress.update_progress(relative, None);
                }
                Err(e) if e.is_fatal() => return Err(e),
                Err(e) => {
                    log::warn!("failed to extract {}: {}", relative, e);
                    errors += 1;
                    self.progress.increment_errors();
                }
            }
        }
        Ok((extracted, errors))
    }
}

#[cfg(test)]
#[path = "archive_executor_test.rs"]
mod archive_executor_test;
