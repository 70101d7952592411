//! Archive operation task: the state machine for archive create/extract.
//!
//! Shares the state graph of the file operation task. Conflicts offer
//! overwrite/skip (rename belongs to file operations); resolutions become
//! the per-member skip/overwrite sets handed to the executor.

use super::archive_executor::{ArchiveOperationExecutor, ExtractConflict};
use super::task::{TaskState, build_summary, spawn_worker};
use super::ui::{ConflictChoice, DialogChoice, PaneTarget, TaskConfig, TaskUi};
use super::CompletionCallback;
use crate::archive::ArchiveType;
use crate::error::VfsError;
use crate::ops::invalidate::CacheInvalidator;
use crate::path::VfsPath;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{Receiver, Sender, channel};
use std::sync::Arc;
use std::thread::JoinHandle;

/// Archive operations driven by the task framework.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveOperationType {
    Create,
    Extract,
}

impl ArchiveOperationType {
    pub fn display_name(&self) -> &'static str {
        match self {
            ArchiveOperationType::Create => "Create",
            ArchiveOperationType::Extract => "Extract",
        }
    }
}

/// Batch-wide choices committed during conflict resolution.
#[derive(Debug, Clone, Copy, Default)]
struct ArchiveResolutionOptions {
    overwrite_all: bool,
    skip_all: bool,
}

/// Self-contained state of one running archive operation.
pub struct ArchiveOperationContext {
    pub operation_type: ArchiveOperationType,
    pub source_paths: Vec<VfsPath>,
    /// Create: the archive file to write. Extract: the target directory.
    pub destination: VfsPath,
    /// Create only; resolved from the requested format name.
    pub format: Option<ArchiveType>,
    /// Extract: members whose destinations already exist. Create: at most
    /// one entry for the existing destination archive.
    pub conflicts: Vec<ExtractConflict>,
    pub current_conflict_index: usize,
    pub skip_files: HashSet<String>,
    pub overwrite_files: HashSet<String>,
    /// Create: replace an existing destination archive.
    pub overwrite_destination: bool,
    pub success_count: usize,
    pub error_count: usize,
    options: ArchiveResolutionOptions,
}

enum TaskEvent {
    ExecutorComplete { success: usize, errors: usize },
}

/// State machine for one archive create/extract operation.
pub struct ArchiveOperationTask {
    state: TaskState,
    context: Option<ArchiveOperationContext>,
    config: TaskConfig,
    executor: Arc<ArchiveOperationExecutor>,
    invalidator: CacheInvalidator,
    cancel_flag: Arc<AtomicBool>,
    events: Sender<TaskEvent>,
    event_queue: Receiver<TaskEvent>,
    worker: Option<JoinHandle<()>>,
}

impl ArchiveOperationTask {
    pub fn new(executor: Arc<ArchiveOperationExecutor>, config: TaskConfig) -> ArchiveOperationTask {
        let (events, event_queue) = channel();
        ArchiveOperationTask {
            state: TaskState::Idle,
            context: None,
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

    pub fn is_active(&self) -> bool {
        !matches!(self.state, TaskState::Idle | TaskState::Completed)
    }

    pub fn cancel_flag(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.cancel_flag)
    }

    pub fn context(&self) -> Option<&ArchiveOperationContext> {
        self.context.as_ref()
    }

    // ========================================
    // Entry point
    // ========================================

    /// Starts an archive operation. For create, `format_name` picks the
    /// container type ("zip", "tar.gz", ...); for extract it is ignored and
    /// the format comes from the archive's suffix.
    pub fn start_operation(
        &mut self,
        ui: &mut dyn TaskUi,
        operation_type: ArchiveOperationType,
        source_paths: Vec<VfsPath>,
        destination: VfsPath,
        format_name: Option<&str>,
    ) -> Result<(), VfsError> {
        if self.is_active() {
            return Err(VfsError::io("", "an operation is already in progress"));
        }

        let format = match operation_type {
            ArchiveOperationType::Create => {
                let name = format_name.unwrap_or("zip");
                Some(ArchiveType::from_format_name(name).ok_or_else(|| {
                    VfsError::ArchiveFormat {
                        path: destination.as_uri(),
                        message: format!("unknown format '{}'", name),
                    }
                })?)
            }
            ArchiveOperationType::Extract => None,
        };

        // The write side must be writable; read-only sources are fine
        if !destination.supports_write_operations() {
            let message = "Cannot write to read-only storage.";
            log::warn!("operation rejected: {}", message);
            ui.show_dialog(message, &[DialogChoice::new("OK", 'o', "ok")]);
            return Err(VfsError::ReadOnlyStorage {
                scheme: "destination".to_string(),
            });
        }

        self.cancel_flag.store(false, Ordering::Relaxed);
        self.context = Some(ArchiveOperationContext {
            operation_type,
            source_paths,
            destination,
            format,
            conflicts: Vec::new(),
            current_conflict_index: 0,
            skip_files: HashSet::new(),
            overwrite_files: HashSet::new(),
            overwrite_destination: false,
            success_count: 0,
            error_count: 0,
            options: ArchiveResolutionOptions::default(),
        });

        let context = self.context.as_ref().expect("context set above");
        log::info!(
            "starting {} operation: {} source(s) -> {}",
            context.operation_type.display_name(),
            context.source_paths.len(),
            context.destination
        );

        let confirm = match operation_type {
            // Creation is driven by an explicit filename dialog upstream
            ArchiveOperationType::Create => false,
            ArchiveOperationType::Extract => self.config.confirm_extract,
        };
        if confirm {
            let message = build_confirmation_message(context);
            let files = context.source_paths.clone();
            let destination = context.destination.clone();
            self.transition(TaskState::Confirming);
            ui.show_confirmation_dialog(&message, &files, Some(&destination));
        } else {
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

    /// Archive conflicts resolve to overwrite or skip; `None` (ESC) cancels
    /// the operation. Rename is not offered for archive members.
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
        let conflict = context.conflicts[context.current_conflict_index].clone();

        match choice {
            ConflictChoice::Overwrite => {
                apply_overwrite(context, &conflict);
                if apply_to_all {
                    context.options.overwrite_all = true;
                }
                context.current_conflict_index += 1;
                self.resolve_next_conflict(ui);
            }
            ConflictChoice::Skip => {
                apply_skip(context, &conflict);
                if apply_to_all {
                    context.options.skip_all = true;
                }
                context.current_conflict_index += 1;
                self.resolve_next_conflict(ui);
            }
            ConflictChoice::Rename => {
                log::error!("rename is not offered for archive conflicts");
                self.resolve_next_conflict(ui);
            }
        }
    }

    // ========================================
    // Cancellation and event pump
    // ========================================

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

    /// Drains executor completions on the task's own thread.
    pub fn process_events(&mut self, ui: &mut dyn TaskUi) {
        while let Ok(event) = self.event_queue.try_recv() {
            match event {
                TaskEvent::ExecutorComplete { success, errors } => {
                    if let Some(context) = self.context.as_mut() {
                        context.success_count += success;
                        context.error_count += errors;
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
        ui.clear_task();
    }

    fn check_conflicts(&mut self, ui: &mut dyn TaskUi) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        let conflicts = match context.operation_type {
            ArchiveOperationType::Create => {
                if ArchiveOperationExecutor::check_create_conflict(&context.destination) {
                    vec![ExtractConflict {
                        relative_path: context.destination.name(),
                        dest: context.destination.clone(),
                    }]
                } else {
                    Vec::new()
                }
            }
            ArchiveOperationType::Extract => {
                let archive = context.source_paths.first().cloned();
                match archive {
                    Some(archive) => {
                        match ArchiveOperationExecutor::check_extract_conflicts(
                            &archive,
                            &context.destination,
                        ) {
                            Ok(conflicts) => conflicts,
                            Err(e) => {
                                log::error!("conflict check failed: {}", e);
                                ui.show_dialog(
                                    &e.user_message(),
                                    &[DialogChoice::new("OK", 'o', "ok")],
                                );
                                self.return_to_idle(ui);
                                return;
                            }
                        }
                    }
                    None => Vec::new(),
                }
            }
        };
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
            let conflict = context.conflicts[context.current_conflict_index].clone();
            if context.options.overwrite_all {
                apply_overwrite(context, &conflict);
                context.current_conflict_index += 1;
                continue;
            }
            if context.options.skip_all {
                apply_skip(context, &conflict);
                context.current_conflict_index += 1;
                continue;
            }
            let index = context.current_conflict_index + 1;
            let total = context.conflicts.len();
            let source = context
                .source_paths
                .first()
                .cloned()
                .unwrap_or_else(|| context.destination.clone());
            ui.show_conflict_dialog(&source, &conflict.dest, index, total);
            return;
        }
    }

    fn execute_operation(&mut self) {
        let Some(context) = self.context.as_mut() else {
            return;
        };
        self.cancel_flag.store(false, Ordering::Relaxed);

        // A skipped create (destination kept) completes with nothing to do
        if context.operation_type == ArchiveOperationType::Create
            && !context.overwrite_destination
            && context.destination.exists()
        {
            log::info!("archive creation skipped: destination kept");
            let sender = self.events.clone();
            let _ = sender.send(TaskEvent::ExecutorComplete { success: 0, errors: 0 });
            return;
        }

        let operation_type = context.operation_type;
        let sources = context.source_paths.clone();
        let destination = context.destination.clone();
        let format = context.format;
        let skip_files = context.skip_files.clone();
        let overwrite_files = context.overwrite_files.clone();

        let executor = Arc::clone(&self.executor);
        let cancel = Arc::clone(&self.cancel_flag);
        let on_complete = self.executor_completion();

        match operation_type {
            ArchiveOperationType::Create => {
                let format = format.expect("create carries a format");
                self.worker = Some(spawn_worker(move || {
                    executor.perform_create_operation(
                        &sources,
                        &destination,
                        format,
                        &cancel,
                        &on_complete,
                    );
                }));
            }
            ArchiveOperationType::Extract => {
                let archive = sources
                    .first()
                    .cloned()
                    .expect("extract carries the archive as its source");
                self.worker = Some(spawn_worker(move || {
                    executor.perform_extract_operation(
                        &archive,
                        &destination,
                        false,
                        &skip_files,
                        &overwrite_files,
                        &cancel,
                        &on_complete,
                    );
                }));
            }
        }
    }

    fn executor_completion(&self) -> CompletionCallback {
        let sender = self.events.clone();
        Arc::new(move |success, errors| {
            let _ = sender.send(TaskEvent::ExecutorComplete { success, errors });
        })
    }

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
            context.skip_files.len(),
            context.error_count,
        );
        if was_cancelled || context.error_count > 0 {
            log::warn!("{}", summary);
        } else {
            log::info!("{}", summary);
        }

        self.executor.progress().finish_operation();
        self.invalidator
            .invalidate_archive_operation(context.operation_type, &context.destination);

        if context.success_count > 0 && !was_cancelled {
            ui.refresh_files(PaneTarget::Destination);
        }
        self.transition(TaskState::Idle);
        ui.clear_task();
    }
}

fn apply_overwrite(context: &mut ArchiveOperationContext, conflict: &ExtractConflict) {
    match context.operation_type {
        ArchiveOperationType::Create => context.overwrite_destination = true,
        ArchiveOperationType::Extract => {
            context.overwrite_files.insert(conflict.relative_path.clone());
        }
    }
    log::info!("overwrite selected for {}", conflict.relative_path);
}

fn apply_skip(context: &mut ArchiveOperationContext, conflict: &ExtractConflict) {
    match context.operation_type {
        ArchiveOperationType::Create => context.overwrite_destination = false,
        ArchiveOperationType::Extract => {
            context.skip_files.insert(conflict.relative_path.clone());
        }
    }
    log::info!("skip selected for {}", conflict.relative_path);
}

fn build_confirmation_message(context: &ArchiveOperationContext) -> String {
    match context.operation_type {
        ArchiveOperationType::Create => format!(
            "Create archive {} from {} item(s)?",
            context.destination.name(),
            context.source_paths.len()
        ),
        ArchiveOperationType::Extract => {
            let archive_name = context
                .source_paths
                .first()
                .map(|p| p.name())
                .unwrap_or_default();
            format!("Extract '{}' to {}?", archive_name, context.destination)
        }
    }
}

#[cfg(test)]
#[path = "archive_task_test.rs"]
mod archive_task_test;
