//! Throttled progress reporting for long-running operations.
//!
//! One operation is tracked at a time. Executors push updates from their
//! worker thread; the callback fires at most every 50 ms (except forced
//! refreshes and completion) and the consumer must treat it purely as a
//! mark-dirty signal, rendering on its own tick.

pub mod animator;

pub use animator::{AnimationTimer, ProgressAnimator};

use crate::format::format_size_compact;
use crate::ignore_poison::IgnorePoison;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

/// Minimum interval between throttled callbacks.
const CALLBACK_THROTTLE: Duration = Duration::from_millis(50);

/// Byte progress is only worth showing for files above this size.
const BYTE_PROGRESS_MIN_TOTAL: u64 = 1024 * 1024;

/// Operations that report progress.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OperationType {
    Copy,
    Move,
    Delete,
    ArchiveCreate,
    ArchiveExtract,
}

impl OperationType {
    /// Present-tense verb for the progress line.
    pub fn verb(&self) -> &'static str {
        match self {
            OperationType::Copy => "Copying",
            OperationType::Move => "Moving",
            OperationType::Delete => "Deleting",
            OperationType::ArchiveCreate => "Creating archive",
            OperationType::ArchiveExtract => "Extracting archive",
        }
    }
}

/// State of the operation currently being tracked.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OperationProgress {
    pub operation_type: OperationType,
    /// 0 means the total is still unknown (counting phase).
    pub total_items: usize,
    pub processed_items: usize,
    pub current_item: String,
    pub description: String,
    pub errors: usize,
    /// Byte-level sub-progress for the current file.
    pub file_bytes_copied: u64,
    pub file_bytes_total: u64,
    /// True until the first real progress update or total update arrives.
    pub counting: bool,
}

/// Callback receiving the current state, or `None` when the operation ends.
pub type ProgressCallback = Arc<dyn Fn(Option<&OperationProgress>) + Send + Sync>;

struct ManagerState {
    current: Option<OperationProgress>,
    callback: Option<ProgressCallback>,
    last_callback: Option<Instant>,
    animator: ProgressAnimator,
}

/// Tracks one operation's progress with callback throttling.
pub struct ProgressManager {
    state: Mutex<ManagerState>,
}

impl ProgressManager {
    pub fn new() -> ProgressManager {
        ProgressManager {
            state: Mutex::new(ManagerState {
                current: None,
                callback: None,
                last_callback: None,
                animator: ProgressAnimator::new(),
            }),
        }
    }

    /// Begins tracking an operation and fires the callback once with the
    /// initial (counting) state.
    pub fn start_operation(
        &self,
        operation_type: OperationType,
        total_items: usize,
        description: &str,
        callback: Option<ProgressCallback>,
    ) {
        let initial = OperationProgress {
            operation_type,
            total_items,
            processed_items: 0,
            current_item: String::new(),
            description: description.to_string(),
            errors: 0,
            file_bytes_copied: 0,
            file_bytes_total: 0,
            counting: true,
        };
        let cb = {
            let mut state = self.state.lock_ignore_poison();
            state.current = Some(initial.clone());
            state.callback = callback;
            state.last_callback = None;
            state.animator.reset();
            state.callback.clone()
        };
        if let Some(cb) = cb {
            cb(Some(&initial));
        }
    }

    /// Switches from the counting phase to execution with a known total.
    /// Forces an immediate callback.
    pub fn update_operation_total(&self, total_items: usize, description: Option<&str>) {
        {
            let mut state = self.state.lock_ignore_poison();
            let Some(current) = state.current.as_mut() else {
                return;
            };
            current.total_items = total_items;
            if let Some(description) = description {
                if !description.is_empty() {
                    current.description = description.to_string();
                }
            }
            current.counting = false;
        }
        self.trigger_callback(true);
    }

    /// Records the item now being processed. Resets byte sub-progress,
    /// clears the counting flag, and bumps (or sets) the processed count.
    pub fn update_progress(&self, current_item: &str, processed_items: Option<usize>) {
        {
            let mut state = self.state.lock_ignore_poison();
            let Some(current) = state.current.as_mut() else {
                return;
            };
            current.current_item = current_item.to_string();
            current.file_bytes_copied = 0;
            current.file_bytes_total = 0;
            current.counting = false;
            match processed_items {
                Some(count) => current.processed_items = count,
                None => current.processed_items += 1,
            }
        }
        self.trigger_callback(false);
    }

    /// Byte-level sub-progress for the current file (large transfers).
    pub fn update_file_byte_progress(&self, bytes_copied: u64, bytes_total: u64) {
        {
            let mut state = self.state.lock_ignore_poison();
            let Some(current) = state.current.as_mut() else {
                return;
            };
            current.file_bytes_copied = bytes_copied;
            current.file_bytes_total = bytes_total;
        }
        self.trigger_callback(false);
    }

    /// Forces an unthrottled callback purely to advance the spinner.
    pub fn refresh_animation(&self) {
        if self.is_operation_active() {
            self.trigger_callback(true);
        }
    }

    /// Bumps the error count without firing the callback.
    pub fn increment_errors(&self) {
        let mut state = self.state.lock_ignore_poison();
        if let Some(current) = state.current.as_mut() {
            current.errors += 1;
        }
    }

    /// Ends the operation: fires the callback once with `None`, then clears
    /// all state and resets throttling.
    pub fn finish_operation(&self) {
        let cb = {
            let mut state = self.state.lock_ignore_poison();
            let cb = if state.current.is_some() {
                state.callback.clone()
            } else {
                None
            };
            state.current = None;
            state.callback = None;
            state.last_callback = None;
            state.animator.reset();
            cb
        };
        if let Some(cb) = cb {
            cb(None);
        }
    }

    pub fn is_operation_active(&self) -> bool {
        self.state.lock_ignore_poison().current.is_some()
    }

    /// Copy of the current operation state.
    pub fn snapshot(&self) -> Option<OperationProgress> {
        self.state.lock_ignore_poison().current.clone()
    }

    /// Whole-operation progress in percent (0 when the total is unknown).
    pub fn progress_percentage(&self) -> u8 {
        let state = self.state.lock_ignore_poison();
        match &state.current {
            Some(op) if op.total_items > 0 => {
                (((op.processed_items as f64 / op.total_items as f64) * 100.0).min(100.0)) as u8
            }
            _ => 0,
        }
    }

    /// Formatted progress line for the UI, truncated to `max_width`.
    pub fn progress_text(&self, max_width: usize) -> String {
        let state = self.state.lock_ignore_poison();
        let Some(op) = &state.current else {
            return String::new();
        };

        let frame = state.animator.current_frame();
        let verb = op.operation_type.verb();
        let mut text = if op.description.is_empty() {
            format!("{} {}...", frame, verb)
        } else {
            format!("{} {} ({})...", frame, verb, op.description)
        };
        if op.counting {
            text.push_str(" Preparing");
        } else {
            text.push_str(&format!(" {}/{}", op.processed_items, op.total_items));
        }

        if !op.current_item.is_empty() {
            let separator = " - ";
            let byte_suffix = if op.file_bytes_total > BYTE_PROGRESS_MIN_TOTAL && op.file_bytes_copied > 0
            {
                format!(
                    " [{}/{}]",
                    format_size_compact(op.file_bytes_copied),
                    format_size_compact(op.file_bytes_total)
                )
            } else {
                String::new()
            };
            let available = max_width
                .saturating_sub(text.chars().count())
                .saturating_sub(separator.len())
                .saturating_sub(byte_suffix.chars().count());
            if available > 10 {
                let mut item = op.current_item.clone();
                let item_len = item.chars().count();
                if item_len > available {
                    let keep = available.saturating_sub(1).max(1);
                    let tail: String = item
                        .chars()
                        .skip(item_len.saturating_sub(keep))
                        .collect();
                    item = format!("…{}", tail);
                }
                text.push_str(separator);
                text.push_str(&item);
                text.push_str(&byte_suffix);
            }
        }
        text
    }

    /// Fires the callback if forced, first, overdue, or complete.
    fn trigger_callback(&self, force: bool) {
        let fired = {
            let mut state = self.state.lock_ignore_poison();
            let Some(callback) = state.callback.clone() else {
                return;
            };
            let Some(current) = state.current.clone() else {
                return;
            };
            let due = match state.last_callback {
                None => true,
                Some(last) => last.elapsed() >= CALLBACK_THROTTLE,
            };
            let complete = current.processed_items >= current.total_items;
            if !(force || due || complete) {
                return;
            }
            state.last_callback = Some(Instant::now());
            (callback, current)
        };
        let (callback, current) = fired;
        callback(Some(&current));
    }
}

impl Default for ProgressManager {
    fn default() -> Self {
        ProgressManager::new()
    }
}
