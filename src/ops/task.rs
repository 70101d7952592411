//! File operation task: the state machine coordinating one copy/move/delete
//! from confirmation through conflict resolution to background execution.
//!
//! The machine runs entirely on the thread that owns the task; dialog
//! answers re-enter through the `on_*` methods and executor completions
//! arrive on an internal channel drained by [`FileOperationTask::process_events`],
//! which the container pumps from its event loop.

use super::executor::FileOperationExecutor;
use super::ui::{ConflictChoice, DialogChoice, PaneTarget, TaskConfig, TaskUi};
use super::{CompletionCallback, ResolvedTransfer};
use crate::error::VfsError;
use crate::ops::invalidate::CacheInvalidator;
use crate::path::VfsPath;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Lifecycle states shared by file and archive operation tasks.
///
/// ```text
/// IDLE → CONFIRMING → CHECKING_CONFLICTS → RESOLVING_CONFLICT → EXECUTING → COMPLETED → IDLE
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskState {
    Idle,
    Confirming,
    CheckingConflicts,
    ResolvingConflict,
    Executing,
    Completed,
}

/// File operation kinds driven by the task framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileOperationType {
    Copy,
    Move,
    Delete,
}

impl FileOperationType {
    /// Noun for summary messages ("Copy operation completed: ...").
    pub fn display_name(&self) -> &'static str {
        match self {
            FileOperationType::Copy => "Copy",
            FileOperationType::Move => "Move",
            FileOperationType::Delete => "Delete",
        }
    }
}

/// Batch-wide choices committed during conflict resolution.
#[derive(Debug, Clone, Copy, Default)]
pub struct ResolutionOptions {
    pub overwrite_all: bool,
    pub skip_all: bool,
    pub rename_all: bool,
}

/// Self-contained state of one running operation. Exists only while the
/// task is active.
pub struct FileOperationContext {
    pub operation_type: FileOperationType,
    pub files: Vec<VfsPath>,
    pub destination: Option<VfsPath>,
    /// Detected conflicts as (source, destination) pairs.
    pub conflicts: Vec<(VfsPath, VfsPath)>,
    pub current_conflict_index: usize,
    /// Conflicts resolved into concrete transfers.
    pub resolved: Vec<ResolvedTransfer>,
    pub skipped: Vec<VfsPath>,
    pub success_count: usize,
    pub error_count: usize,
    pub options: ResolutionOptions,
    /// Executor batches still running (non-overwrite batch + overwrite batch).
    pub pending_batches: usize,
}

/// Dialog the task is waiting on beyond the standard confirmation/conflict
/// dialogs.
enum PendingDialog {
    /// Secondary dialog after a rename collided again.
    RenameConflict { source: VfsPath, new_dest: VfsPath },
    /// "Filename cannot be empty" notice; OK returns to the rename dialog.
    EmptyRenameNotice { source: VfsPath },
}

enum TaskEvent {
    BatchComplete { success: usize, errors: usize },
}

/// State machine for one copy/move/delete operation.
pub struct FileOperationTask {
    state: TaskState,
    context: Option<FileOperationContext>,
    pending_dialog: Option<PendingDialog>,
    config: TaskConfig,
    executor: Arc<FileOperationExecutor>,
    invalidator: CacheInvalidator,
    /// Shared with executors; also readable by the container.
    cancel_flag: Arc<AtomicBool>,
    events: Sender<TaskEvent>,
    event_queue: Receiver<TaskEvent>,
    worker: Option<JoinHandle<()>>,
}

impl FileOperationTask {
    pub fn new(executor: Arc<FileOperationExecutor>, config: TaskConfig) -> FileOperationTask {
        let (events, event_queue) = channel();
        FileOperationTask {
            state: TaskState::Idle,
            context: None,
            pending_dialog: None,
            config,
            executor,
            invalidator: CacheInvalidator::new(),
            cancel_flag: Arc::new(AtomicBool::new(false)),
            events,
            event_queue,
            worker: None,
        }
    }

    pub fn state(&self) -> TaskState {
        self.state
    }

    /// Active means anything but IDLE/COMPLETED.
    pub fn is_active(&self) -> bool {
        !matches!(self.state, TaskState::Idle | TaskState::Completed)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    pub fn context(&self) -> Option<&FileOperationContext> {
        self.context.as_ref()
    }

    // ========================================
    // Entry point
    // ========================================

    /// Starts a new operation: validates capabilities, then either shows the
    /// confirmation dialog or goes straight to conflict checking.
    pub fn start_operation(
        &mut self,
        ui: &mut dyn TaskUi,
        operation_type: FileOperationType,
        files: Vec<VfsPath>,
        destination: Option<VfsPath>,
    ) -> Result<(), VfsError> {
        if self.is_active() {
            return Err(VfsError::io("", "an operation is already in progress"));
        }
        if matches!(operation_type, FileOperationType::Copy | FileOperationType::Move)
            && destination.is_none()
        {
            return Err(VfsError::io("", "destination required for copy/move"));
        }

        if let Err(message) = validate_operation(operation_type, &files, destination.as_ref()) {
            log::warn!("operation rejected: {}", message);
            ui.show_dialog(&message, &[DialogChoice::new("OK", 'o', "ok")]);
            return Err(VfsError::ReadOnlyStorage {
                scheme: "destination".to_string(),
            });
        }

        self.cancel_flag.store(false, Ordering::Relaxed);
        self.context = Some(FileOperationContext {
            operation_type,
            files,
            destination,
            conflicts: Vec::new(),
            current_conflict_index: 0,
            resolved: Vec::new(),
            skipped: Vec::new(),
            success_count: 0,
            error_count: 0,
            options: ResolutionOptions::default(),
            pending_batches: 0,
        });

        let context = self.context.as_ref().expect("context set above");
        log::info!(
            "starting {} operation with {} file(s)",
            context.operation_type.display_name(),
            context.files.len()
        );

        let confirm = match operation_type {
            FileOperationType::Copy => self.config.confirm_copy,
            FileOperationType::Move => self.config.confirm_move,
            FileOperationType::Delete => self.config.confirm_delete,
        };
        if confirm {
            let message = build_confirmation_message(context);
            let files = context.files.clone();
            let destination = context.destination.clone();
            self.transition(TaskState::Confirming);
            ui.show_confirmation_dialog(&message, &files, destination.as_ref());
        } else {
            log::info!("confirmation disabled, proceeding directly");
            self.transition(TaskState::CheckingConflicts);
            self.check_conflicts(ui);
        }
        Ok(())
    }

    // ========================================
    // Dialog responses
    // ========================================

    pub fn on_confirmed(&mut self, ui: &mut dyn TaskUi, confirmed: bool) {
        if self.context.is_none() {
            log::error!("on_confirmed with no operation context");
            return;
        }
        if confirmed {
            self.transition(TaskState::CheckingConflicts);
            self.check_conflicts(ui);
        } else {
            log::info!("operation cancelled at confirmation");
            self.return_to_idle(ui);
        }
    }

    /// Handles the user's choice for the current conflict. `None` (ESC)
    /// cancels the whole operation.
    pub fn on_conflict_resolved(
        &mut self,
        ui: &mut dyn TaskUi,
        choice: Option<ConflictChoice>,
        apply_to_all: bool,
    ) {
        let Some(context) = self.context.as_mut() else {
            log::error!("on_conflict_resolved with no operation context");
            return;
        };
        let Some(choice) = choice else {
            log::info!("operation cancelled during conflict resolution");
            self.return_to_idle(ui);
            return;
        };
        if context.current_conflict_index >= context.conflicts.len() {
            log::error!("on_conflict_resolved with no remaining conflicts");
            return;
        }
        let (source, dest) = context.conflicts[context.current_conflict_index].clone();

        match choice {
            ConflictChoice::Overwrite => {
                context.resolved.push(ResolvedTransfer::new(source.clone(), dest, true));
                log::info!("overwrite selected for {}", source.name());
                if apply_to_all {
                    context.options.overwrite_all = true;
                }
                context.current_conflict_index += 1;
                self.resolve_next_conflict(ui);
            }
            ConflictChoice::Skip => {
                context.skipped.push(source.clone());
                log::info!("skip selected for {}", source.name());
                if apply_to_all {
                    context.options.skip_all = true;
                }
                context.current_conflict_index += 1;
                self.resolve_next_conflict(ui);
            }
            ConflictChoice::Rename => {
                log::info!("rename selected for {}", source.name());
                if apply_to_all {
                    context.options.rename_all = true;
                }
                let destination = context
                    .destination
                    .clone()
                    .expect("rename conflicts only occur for copy/move");
                ui.show_rename_dialog(&source, &destination);
            }
        }
    }

    /// Handles the new name entered in the rename dialog.
    pub fn on_renamed(&mut self, ui: &mut dyn TaskUi, new_name: &str) {
        let Some(context) = self.context.as_mut() else {
            log::error!("on_renamed with no operation context");
            return;
        };
        if context.current_conflict_index >= context.conflicts.len() {
            log::error!("on_renamed with no remaining conflicts");
            return;
        }
        let new_name = new_name.trim();
        let (source, _) = context.conflicts[context.current_conflict_index].clone();

        if new_name.is_empty() {
            log::warn!("rename rejected: empty name");
            self.pending_dialog = Some(PendingDialog::EmptyRenameNotice { source });
            ui.show_dialog(
                "Error: Filename cannot be empty",
                &[DialogChoice::new("OK", 'o', "ok")],
            );
            return;
        }

        let destination = context
            .destination
            .clone()
            .expect("rename applies to copy/move only");
        let new_dest = match destination.join(new_name) {
            Ok(dest) => dest,
            Err(e) => {
                log::warn!("rename rejected: {}", e);
                self.pending_dialog = Some(PendingDialog::EmptyRenameNotice { source });
                ui.show_dialog(
                    "Error: Invalid filename",
                    &[DialogChoice::new("OK", 'o', "ok")],
                );
                return;
            }
        };

        if new_dest.exists() {
            log::warn!("rename conflict: {} already exists", new_name);
            self.pending_dialog = Some(PendingDialog::RenameConflict {
                source,
                new_dest: new_dest.clone(),
            });
            ui.show_dialog(
                &format!("File '{}' already exists. Choose action:", new_name),
                &[
                    DialogChoice::new("Overwrite", 'o', "overwrite"),
                    DialogChoice::new("Try Again", 'r', "retry"),
                    DialogChoice::new("Skip", 's', "skip"),
                ],
            );
            return;
        }

        log::info!("renamed {} -> {}", source.name(), new_name);
        context.resolved.push(ResolvedTransfer::new(source, new_dest, false));
        context.current_conflict_index += 1;
        self.resolve_next_conflict(ui);
    }

    /// Rename dialog cancelled: re-offer the conflict dialog for the same
    /// conflict.
    pub fn on_rename_cancelled(&mut self, ui: &mut dyn TaskUi) {
        if self.context.is_none() {
            log::error!("on_rename_cancelled with no operation context");
            return;
        }
        log::info!("rename cancelled, returning to conflict resolution");
        self.resolve_next_conflict(ui);
    }

    /// Handles generic dialog answers (secondary rename conflict, notices).
    pub fn on_dialog_choice(&mut self, ui: &mut dyn TaskUi, value: &str) {
        match self.pending_dialog.take() {
            Some(PendingDialog::EmptyRenameNotice { source }) => {
                let destination = self
                    .context
                    .as_ref()
                    .and_then(|c| c.destination.clone())
                    .expect("rename applies to copy/move only");
                ui.show_rename_dialog(&source, &destination);
            }
            Some(PendingDialog::RenameConflict { source, new_dest }) => match value {
                "overwrite" => {
                    if let Some(context) = self.context.as_mut() {
                        context
                            .resolved
                            .push(ResolvedTransfer::new(source, new_dest, true));
                        context.current_conflict_index += 1;
                    }
                    self.resolve_next_conflict(ui);
                }
                "retry" => {
                    let destination = self
                        .context
                        .as_ref()
                        .and_then(|c| c.destination.clone())
                        .expect("rename applies to copy/move only");
                    ui.show_rename_dialog(&source, &destination);
                }
                "skip" => {
                    if let Some(context) = self.context.as_mut() {
                        context.skipped.push(source);
                        context.current_conflict_index += 1;
                    }
                    self.resolve_next_conflict(ui);
                }
                other => {
                    log::error!("unexpected dialog choice '{}'", other);
                    self.resolve_next_conflict(ui);
                }
            },
            None => log::error!("on_dialog_choice with no pending dialog"),
        }
    }

    // ========================================
    // Cancellation
    // ========================================

    /// Cancels the task. During execution this only raises the shared flag;
    /// the context is cleared when the executor's completion arrives.
    pub fn cancel(&mut self, ui: &mut dyn TaskUi) {
        if !self.is_active() {
            return;
        }
        if self.state == TaskState::Executing {
            self.cancel_flag.store(true, Ordering::Relaxed);
            log::info!("cancellation requested during execution");
        } else {
            log::info!("task cancelled");
            self.return_to_idle(ui);
        }
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancel_flag.load(Ordering::Relaxed)
    }

    // ========================================
    // Event pump
    // ========================================

    /// Drains executor completions. Must be called from the thread that owns
    /// the task (the container's event loop).
    pub fn process_events(&mut self, ui: &mut dyn TaskUi) {
        while let Ok(event) = self.event_queue.try_recv() {
            match event {
                TaskEvent::BatchComplete { success, errors } => {
                    let Some(context) = self.context.as_mut() else {
                        continue;
                    };
                    context.success_count += success;
                    context.error_count += errors;
                    context.pending_batches = context.pending_batches.saturating_sub(1);
                    if context.pending_batches > 0 {
                        log::debug!("batch completed, {} remaining", context.pending_batches);
                        continue;
                    }
                    if let Some(worker) = self.worker.take() {
                        let _ = worker.join();
                    }
                    self.transition(TaskState::Completed);
                    self.complete_operation(ui);
                }
            }
        }
    }

    // ========================================
    // Internals
    // ========================================

    fn transition(&mut self, new_state: TaskState) {
        log::debug!("state transition: {:?} -> {:?}", self.state, new_state);
        self.state = new_state;
    }

    fn return_to_idle(&mut self, ui: &mut dyn TaskUi) {
        self.transition(TaskState::Idle);
        self.context = None;
        self.pending_dialog = None;
        ui.clear_task();
    }

    /// Detects destination conflicts for copy/move; delete goes straight to
    /// execution.
    fn check_conflicts(&mut self, ui: &mut dyn TaskUi) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        if context.operation_type == FileOperationType::Delete {
            log::info!("delete operation has no conflicts to check");
            self.transition(TaskState::Executing);
            self.execute_operation();
            return;
        }

        let destination = context
            .destination
            .clone()
            .expect("copy/move carries a destination");
        let mut conflicts = Vec::new();
        for source in &context.files {
            let Ok(dest) = destination.join(&source.name()) else {
                continue;
            };
            if dest.exists() {
                log::info!("conflict detected: {} -> {}", source.name(), dest);
                conflicts.push((source.clone(), dest));
            }
        }
        context.conflicts = conflicts;

        if context.conflicts.is_empty() {
            log::info!("no conflicts detected, proceeding to execution");
            self.transition(TaskState::Executing);
            self.execute_operation();
        } else {
            log::info!("found {} conflict(s)", context.conflicts.len());
            self.transition(TaskState::ResolvingConflict);
            self.resolve_next_conflict(ui);
        }
    }

    /// Shows the next conflict dialog, or applies a committed apply-to-all
    /// choice, or proceeds to execution when the queue is drained.
    fn resolve_next_conflict(&mut self, ui: &mut dyn TaskUi) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        loop {
            if context.current_conflict_index >= context.conflicts.len() {
                log::info!("all conflicts resolved, proceeding to execution");
                self.transition(TaskState::Executing);
                self.execute_operation();
                return;
            }
            let (source, dest) = context.conflicts[context.current_conflict_index].clone();
            if context.options.overwrite_all {
                context.resolved.push(ResolvedTransfer::new(source, dest, true));
                context.current_conflict_index += 1;
                continue;
            }
            if context.options.skip_all {
                context.skipped.push(source);
                context.current_conflict_index += 1;
                continue;
            }
            let index = context.current_conflict_index + 1;
            let total = context.conflicts.len();
            ui.show_conflict_dialog(&source, &dest, index, total);
            return;
        }
    }

    /// Builds the transfer list (non-conflicting files plus resolved
    /// conflicts) and hands it to the executor on a worker thread.
    fn execute_operation(&mut self) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        self.cancel_flag.store(false, Ordering::Relaxed);

        if context.operation_type == FileOperationType::Delete {
            let files = context.files.clone();
            context.pending_batches = 1;
            let executor = Arc::clone(&self.executor);
            let cancel = Arc::clone(&self.cancel_flag);
            let on_complete = self.batch_completion();
            self.worker = Some(spawn_worker(move || {
                executor.perform_delete_operation(&files, &cancel, &on_complete);
            }));
            return;
        }

        let destination = context
            .destination
            .clone()
            .expect("copy/move carries a destination");
        let conflict_sources: std::collections::HashSet<VfsPath> =
            context.conflicts.iter().map(|(s, _)| s.clone()).collect();

        let mut plain: Vec<ResolvedTransfer> = Vec::new();
        for source in &context.files {
            if conflict_sources.contains(source) {
                continue;
            }
            let Ok(dest) = destination.join(&source.name()) else {
                continue;
            };
            plain.push(ResolvedTransfer::new(source.clone(), dest, false));
        }
        plain.extend(context.resolved.iter().filter(|t| !t.overwrite).cloned());
        let overwriting: Vec<ResolvedTransfer> = context
            .resolved
            .iter()
            .filter(|t| t.overwrite)
            .cloned()
            .collect();

        let mut batches = Vec::new();
        if !plain.is_empty() {
            batches.push(plain);
        }
        if !overwriting.is_empty() {
            batches.push(overwriting);
        }
        if batches.is_empty() {
            // Everything was skipped; complete through the normal path
            batches.push(Vec::new());
        }
        context.pending_batches = batches.len();

        log::info!(
            "executing {} operation: {} batch(es), {} skipped",
            context.operation_type.display_name(),
            batches.len(),
            context.skipped.len()
        );

        let operation_type = context.operation_type;
        let executor = Arc::clone(&self.executor);
        let cancel = Arc::clone(&self.cancel_flag);
        let on_complete = self.batch_completion();
        self.worker = Some(spawn_worker(move || {
            for (index, batch) in batches.iter().enumerate() {
                let continue_progress = index > 0;
                match operation_type {
                    FileOperationType::Copy => executor.perform_copy_operation(
                        batch,
                        &cancel,
                        continue_progress,
                        &on_complete,
                    ),
                    FileOperationType::Move => executor.perform_move_operation(
                        batch,
                        &cancel,
                        continue_progress,
                        &on_complete,
                    ),
                    FileOperationType::Delete => unreachable!("delete handled above"),
                }
            }
        }));
    }

    /// Completion callback that forwards counts to the task's event queue.
    fn batch_completion(&self) -> CompletionCallback {
        let sender = self.events.clone();
        Arc::new(move |success, errors| {
            let _ = sender.send(TaskEvent::BatchComplete { success, errors });
        })
    }

    /// COMPLETED → IDLE: summary, logging, cache invalidation, refresh.
    fn complete_operation(&mut self, ui: &mut dyn TaskUi) {
        let Some(context) = self.context.take() else {
            log::warn!("complete_operation with no context");
            self.transition(TaskState::Idle);
            ui.clear_task();
            return;
        };

        let was_cancelled = self.is_cancelled();
        let summary = build_summary(
            context.operation_type.display_name(),
            was_cancelled,
            context.success_count,
            context.skipped.len(),
            context.error_count,
        );
        if was_cancelled || context.error_count > 0 {
            log::warn!("{}", summary);
        } else {
            log::info!("{}", summary);
        }

        self.executor.progress().finish_operation();
        self.invalidator.invalidate_file_operation(
            context.operation_type,
            &context.files,
            context.destination.as_ref(),
        );

        if context.success_count > 0 && !was_cancelled {
            ui.refresh_files(PaneTarget::Both);
        }
        self.transition(TaskState::Idle);
        self.pending_dialog = None;
        ui.clear_task();
    }
}

pub(super) fn spawn_worker(work: impl FnOnce() + Send + 'static) -> JoinHandle<()> {
    std::thread::Builder::new()
        .name("file-op-worker".to_string())
        .spawn(work)
        .expect("failed to spawn operation worker")
}

/// Capability pre-validation (§ operation rules):
/// delete needs writable sources, move needs writable sources and
/// destination, copy needs only a writable destination.
fn validate_operation(
    operation_type: FileOperationType,
    files: &[VfsPath],
    destination: Option<&VfsPath>,
) -> Result<(), String> {
    match operation_type {
        FileOperationType::Delete => {
            for path in files {
                if !path.supports_write_operations() {
                    return Err("Cannot delete files from read-only storage.".to_string());
                }
            }
        }
        FileOperationType::Move => {
            for path in files {
                if !path.supports_write_operations() {
                    return Err(
                        "Cannot move files from read-only storage. Use copy instead.".to_string()
                    );
                }
            }
            if let Some(dest) = destination {
                if !dest.supports_write_operations() {
                    return Err("Cannot move files to read-only storage.".to_string());
                }
            }
        }
        FileOperationType::Copy => {
            if let Some(dest) = destination {
                if !dest.supports_write_operations() {
                    return Err("Cannot copy files to read-only storage.".to_string());
                }
            }
        }
    }
    Ok(())
}

fn build_confirmation_message(context: &FileOperationContext) -> String {
    let destination = context
        .destination
        .as_ref()
        .map(|d| d.as_uri())
        .unwrap_or_default();
    if context.files.len() == 1 {
        let name = context.files[0].name();
        match context.operation_type {
            FileOperationType::Copy => format!("Copy '{}' to {}?", name, destination),
            FileOperationType::Move => format!("Move '{}' to {}?", name, destination),
            FileOperationType::Delete => format!("Delete '{}'?", name),
        }
    } else {
        let count = context.files.len();
        match context.operation_type {
            FileOperationType::Copy => format!("Copy {} files to {}?", count, destination),
            FileOperationType::Move => format!("Move {} files to {}?", count, destination),
            FileOperationType::Delete => format!("Delete {} files?", count),
        }
    }
}

/// `"<Op> operation <completed|cancelled>: <n> successful[, <m> skipped][, <k> errors]"`
pub(super) fn build_summary(
    operation_name: &str,
    cancelled: bool,
    success: usize,
    skipped: usize,
    errors: usize,
) -> String {
    let outcome = if cancelled { "cancelled" } else { "completed" };
    let mut summary = format!("{} operation {}: {} successful", operation_name, outcome, success);
    if skipped > 0 {
        summary.push_str(&format!(", {} skipped", skipped));
    }
    if errors > 0 {
        summary.push_str(&format!(", {} errors", errors));
    }
    summary
}

#[cfg(test)]
#[path = "task_test.rs"]
mod task_test;
