//! File operation I/O: copy, move, delete.
//!
//! Methods run synchronously on the caller's thread (the task spawns one
//! worker thread per operation) in two phases: a counting pass that sizes
//! the progress display, then the transfer loop. Per-file errors are
//! counted and skipped; disk-space exhaustion and cancellation abort the
//! batch. The completion callback fires exactly once per call, on every
//! path out.

use super::{CompletionCallback, ResolvedTransfer};
use crate::error::VfsError;
use crate::path::{Scheme, VfsPath};
use crate::progress::{OperationType, ProgressCallback, ProgressManager};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Outcome of one batch.
#[derive(Debug, Default, Clone, Copy)]
struct BatchCounts {
    success: usize,
    errors: usize,
    skipped: usize,
}

/// Runs copy/move/delete I/O with progress and cooperative cancellation.
pub struct FileOperationExecutor {
    progress: Arc<ProgressManager>,
    /// Forwarded to `start_operation`; fires on the worker thread, so the
    /// consumer must treat it as a mark-dirty signal only.
    progress_callback: Option<ProgressCallback>,
}

impl FileOperationExecutor {
    pub fn new(
        progress: Arc<ProgressManager>,
        progress_callback: Option<ProgressCallback>,
    ) -> FileOperationExecutor {
        FileOperationExecutor {
            progress,
            progress_callback,
        }
    }

    pub fn progress(&self) -> &Arc<ProgressManager> {
        &self.progress
    }

    /// Copies a batch of resolved transfers.
    ///
    /// With `continue_progress` the batch extends the progress session of a
    /// previous batch instead of starting a new one. The progress session is
    /// left open for the task to finish once all batches complete.
    pub fn perform_copy_operation(
        &self,
        transfers: &[ResolvedTransfer],
        cancel: &AtomicBool,
        continue_progress: bool,
        on_complete: &CompletionCallback,
    ) {
        let counts = self.run_transfer_batch(OperationType::Copy, transfers, cancel, continue_progress);
        log::debug!(
            "copy batch done: {} copied, {} errors, {} skipped",
            counts.success,
            counts.errors,
            counts.skipped
        );
        on_complete(counts.success, counts.errors);
    }

    /// Moves a batch of resolved transfers.
    ///
    /// Same-scheme items use the backend's native rename (no counting pass
    /// when the whole batch qualifies); everything else copies then deletes
    /// the source, leaving the source intact if its copy failed.
    pub fn perform_move_operation(
        &self,
        transfers: &[ResolvedTransfer],
        cancel: &AtomicBool,
        continue_progress: bool,
        on_complete: &CompletionCallback,
    ) {
        let all_native = transfers
            .iter()
            .all(|t| t.source.scheme() == t.dest.scheme() && t.source.scheme() == Scheme::File);

        let counts = if all_native {
            self.run_native_rename_batch(transfers, cancel, continue_progress)
        } else {
            self.run_transfer_batch(OperationType::Move, transfers, cancel, continue_progress)
        };
        log::debug!(
            "move batch done: {} moved, {} errors, {} skipped",
            counts.success,
            counts.errors,
            counts.skipped
        );
        on_complete(counts.success, counts.errors);
    }

    /// Deletes files and directories, contents first.
    pub fn perform_delete_operation(
        &self,
        files: &[VfsPath],
        cancel: &AtomicBool,
        on_complete: &CompletionCallback,
    ) {
        let mut counts = BatchCounts::default();
        self.progress.start_operation(
            OperationType::Delete,
            0,
            &batch_description(files.len()),
            self.progress_callback.clone(),
        );

        match count_items_for_delete(files, cancel) {
            Ok(total) => self.progress.update_operation_total(total, None),
            Err(VfsError::Cancelled) => {
                on_complete(0, 0);
                return;
            }
            Err(e) => {
                log::warn!("delete count failed, continuing without total: {}", e);
                self.progress.update_operation_total(files.len(), None);
            }
        }

        for file in files {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            self.delete_recursive(file, cancel, &mut counts);
        }
        log::debug!(
            "delete done: {} deleted, {} errors",
            counts.success,
            counts.errors
        );
        on_complete(counts.success, counts.errors);
    }

    // ========================================
    // Copy/move internals
    // ========================================

    fn run_transfer_batch(
        &self,
        operation: OperationType,
        transfers: &[ResolvedTransfer],
        cancel: &AtomicBool,
        continue_progress: bool,
    ) -> BatchCounts {
        let mut counts = BatchCounts::default();
        let delete_source = operation == OperationType::Move;

        if !continue_progress {
            self.progress.start_operation(
                operation,
                0,
                &batch_description(transfers.len()),
                self.progress_callback.clone(),
            );
            let sources: Vec<VfsPath> = transfers.iter().map(|t| t.source.clone()).collect();
            match count_files_recursively(&sources, cancel) {
                Ok(total) => self.progress.update_operation_total(total, None),
                Err(VfsError::Cancelled) => return counts,
                Err(e) => {
                    log::warn!("count failed, continuing without total: {}", e);
                    self.progress.update_operation_total(transfers.len(), None);
                }
            }
        }

        for transfer in transfers {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            match self.transfer_one(transfer, delete_source, cancel, &mut counts) {
                Ok(()) => {}
                Err(e) if e.is_fatal() => {
                    if !matches!(e, VfsError::Cancelled) {
                        log::error!("fatal error, aborting batch: {}", e);
                        counts.errors += 1;
                        self.progress.increment_errors();
                    }
                    break;
                }
                Err(e) => {
                    log::warn!("failed to process {}: {}", transfer.source, e);
                    counts.errors += 1;
                    self.progress.increment_errors();
                }
            }
        }
        counts
    }

    /// Transfers one file or directory (recursing into directories).
    fn transfer_one(
        &self,
        transfer: &ResolvedTransfer,
        delete_source: bool,
        cancel: &AtomicBool,
        counts: &mut BatchCounts,
    ) -> Result<(), VfsError> {
        if cancel.load(Ordering::Relaxed) {
            return Err(VfsError::Cancelled);
        }
        let source = &transfer.source;
        let dest = &transfer.dest;

        if source.is_dir() {
            dest.mkdir(true, true)?;
            for child in source.iterdir()? {
                let child_dest = dest.join(&child.name())?;
                self.transfer_one(
                    &ResolvedTransfer::new(child, child_dest, transfer.overwrite),
                    delete_source,
                    cancel,
                    counts,
                )?;
            }
            if delete_source {
                source.rmdir()?;
            }
            return Ok(());
        }

        if dest.exists() && !transfer.overwrite {
            log::info!("destination exists, skipping: {}", dest);
            counts.skipped += 1;
            return Ok(());
        }

        self.progress.update_progress(&source.name(), None);
        let parent = dest.parent();
        if parent.as_uri() != dest.as_uri() && !parent.exists() {
            parent.mkdir(true, true)?;
        }

        let progress_manager = Arc::clone(&self.progress);
        let byte_progress = move |done: u64, total: u64| {
            progress_manager.update_file_byte_progress(done, total);
        };
        source.copy_to(dest, transfer.overwrite, Some(&byte_progress))?;
        if delete_source {
            source.unlink()?;
        }
        counts.success += 1;
        Ok(())
    }

    /// Whole-batch native rename: O(1) per item, no counting phase.
    fn run_native_rename_batch(
        &self,
        transfers: &[ResolvedTransfer],
        cancel: &AtomicBool,
        continue_progress: bool,
    ) -> BatchCounts {
        let mut counts = BatchCounts::default();
        if !continue_progress {
            self.progress.start_operation(
                OperationType::Move,
                0,
                &batch_description(transfers.len()),
                self.progress_callback.clone(),
            );
        }
        self.progress.update_operation_total(transfers.len(), None);

        for transfer in transfers {
            if cancel.load(Ordering::Relaxed) {
                break;
            }
            self.progress.update_progress(&transfer.source.name(), None);
            if transfer.dest.exists() && !transfer.overwrite {
                log::info!("destination exists, skipping: {}", transfer.dest);
                counts.skipped += 1;
                continue;
            }
            match transfer.source.move_to(&transfer.dest, transfer.overwrite) {
                Ok(()) => counts.success += 1,
                Err(e) => {
                    log::warn!("failed to move {}: {}", transfer.source, e);
                    counts.errors += 1;
                    self.progress.increment_errors();
                }
            }
        }
        counts
    }

    // ========================================
    // Delete internals
    // ========================================

    fn delete_recursive(&self, path: &VfsPath, cancel: &AtomicBool, counts: &mut BatchCounts) {
        if cancel.load(Ordering::Relaxed) {
            return;
        }
        if path.is_dir() && !path.is_symlink() {
            match path.iterdir() {
                Ok(children) => {
                    for child in children {
                        self.delete_recursive(&child, cancel, counts);
                    }
                }
                Err(e) => {
                    log::warn!("failed to list {}: {}", path, e);
                    counts.errors += 1;
                    self.progress.increment_errors();
                    return;
                }
            }
            if cancel.load(Ordering::Relaxed) {
                return;
            }
            self.progress.update_progress(&path.name(), None);
            match path.rmdir() {
                Ok(()) => counts.success += 1,
                Err(e) => {
                    log::warn!("failed to remove directory {}: {}", path, e);
                    counts.errors += 1;
                    self.progress.increment_errors();
                }
            }
        } else {
            self.progress.update_progress(&path.name(), None);
            match path.unlink() {
                Ok(()) => counts.success += 1,
                Err(e) => {
                    log::warn!("failed to delete {}: {}", path, e);
                    counts.errors += 1;
                    self.progress.increment_errors();
                }
            }
        }
    }
}

fn batch_description(count: usize) -> String {
    if count == 1 {
        "1 item".to_string()
    } else {
        format!("{} items", count)
    }
}

/// Counts files (not directories) under the given paths.
/// Checks cancellation on every entry.
pub fn count_files_recursively(paths: &[VfsPath], cancel: &AtomicBool) -> Result<usize, VfsError> {
    let mut total = 0usize;
    for path in paths {
        total += count_one(path, cancel, false)?;
    }
    Ok(total)
}

/// Counts every node (files and directories) under the given paths.
fn count_items_for_delete(paths: &[VfsPath], cancel: &AtomicBool) -> Result<usize, VfsError> {
    let mut total = 0usize;
    for path in paths {
        total += count_one(path, cancel, true)?;
    }
    Ok(total)
}

fn count_one(path: &VfsPath, cancel: &AtomicBool, include_dirs: bool) -> Result<usize, VfsError> {
    if cancel.load(Ordering::Relaxed) {
        return Err(VfsError::Cancelled);
    }
    // Local trees walk the OS directly; remote backends recurse via iterdir
    if let Some(local) = path.as_local_path() {
        if local.is_dir() {
            let mut count = 0usize;
            for entry in walkdir::WalkDir::new(&local) {
                if cancel.load(Ordering::Relaxed) {
                    return Err(VfsError::Cancelled);
                }
                let entry = entry.map_err(|e| VfsError::io(local.to_string_lossy(), e.to_string()))?;
                if entry.file_type().is_file() || (include_dirs && entry.file_type().is_dir()) {
                    count += 1;
                }
            }
            return Ok(count);
        }
        return Ok(1);
    }
    if path.is_dir() {
        let mut count = if include_dirs { 1 } else { 0 };
        for child in path.iterdir()? {
            count += count_one(&child, cancel, include_dirs)?;
        }
        return Ok(count);
    }
    Ok(1)
}

#[cfg(test)]
#[path = "executor_test.rs"]
mod executor_test;
