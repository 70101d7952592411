//! Background file operations: executors, task state machines, and cache
//! invalidation.
//!
//! The task layer is single-threaded by design: every state transition runs
//! on the thread that owns the task (the UI thread in the host application).
//! Executors do the I/O on a dedicated worker thread per operation and
//! report completion through a channel the task drains from its own loop.

pub mod archive_executor;
pub mod archive_task;
pub mod executor;
pub mod invalidate;
pub mod task;
pub mod ui;

#[cfg(test)]
pub(crate) mod testutil;

pub use archive_executor::{ArchiveOperationExecutor, ExtractConflict};
pub use archive_task::{ArchiveOperationContext, ArchiveOperationTask, ArchiveOperationType};
pub use executor::FileOperationExecutor;
pub use invalidate::CacheInvalidator;
pub use task::{FileOperationContext, FileOperationTask, FileOperationType, TaskState};
pub use ui::{ConflictChoice, DialogChoice, PaneTarget, TaskConfig, TaskUi};

use crate::path::VfsPath;
use std::sync::Arc;

/// Completion callback: `(success_count, error_count)`. Invoked exactly once
/// per executor batch, including on cancellation and fatal errors.
pub type CompletionCallback = Arc<dyn Fn(usize, usize) + Send + Sync>;

/// One transfer resolved for execution: where it goes and whether an
/// existing destination may be replaced.
#[derive(Debug, Clone)]
pub struct ResolvedTransfer {
    pub source: VfsPath,
    pub dest: VfsPath,
    pub overwrite: bool,
}

impl ResolvedTransfer {
    pub fn new(source: VfsPath, dest: VfsPath, overwrite: bool) -> ResolvedTransfer {
        ResolvedTransfer {
            source,
            dest,
            overwrite,
        }
    }
}
