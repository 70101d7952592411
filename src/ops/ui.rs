//! Container interface the host UI implements for operation tasks.
//!
//! The trait methods are dialog *requests*: the UI shows the dialog and
//! routes the user's answer back into the task (`on_confirmed`,
//! `on_conflict_resolved`, `on_renamed`, `on_dialog_choice`). Nothing here
//! renders anything.

use crate::path::VfsPath;
use serde::{Deserialize, Serialize};

/// User's choice for one file conflict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConflictChoice {
    Overwrite,
    /// File operations only; archive conflicts offer overwrite/skip.
    Rename,
    Skip,
}

/// One button in a generic dialog.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DialogChoice {
    pub text: String,
    pub key: char,
    pub value: String,
}

impl DialogChoice {
    pub fn new(text: &str, key: char, value: &str) -> DialogChoice {
        DialogChoice {
            text: text.to_string(),
            key,
            value: value.to_string(),
        }
    }
}

/// Which panes to rescan after an operation completes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PaneTarget {
    /// Both panes (copy/move/delete touch source and destination views).
    Both,
    /// Only the destination pane (archive create/extract).
    Destination,
}

/// Per-operation confirmation switches, mirroring the host's config.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskConfig {
    pub confirm_copy: bool,
    pub confirm_move: bool,
    pub confirm_delete: bool,
    pub confirm_extract: bool,
}

impl Default for TaskConfig {
    fn default() -> Self {
        TaskConfig {
            confirm_copy: true,
            confirm_move: true,
            confirm_delete: true,
            confirm_extract: true,
        }
    }
}

/// What the UI must provide to host an operation task.
pub trait TaskUi {
    /// Asks the user to confirm the operation; answer arrives via
    /// `on_confirmed(bool)`.
    fn show_confirmation_dialog(
        &mut self,
        message: &str,
        files: &[VfsPath],
        destination: Option<&VfsPath>,
    );

    /// Shows one conflict (`index` is 1-based of `total`); answer arrives via
    /// `on_conflict_resolved(choice, apply_to_all)` with `None` for ESC.
    fn show_conflict_dialog(&mut self, source: &VfsPath, dest: &VfsPath, index: usize, total: usize);

    /// Asks for a new name; answer arrives via `on_renamed(name)` or
    /// `on_rename_cancelled()`.
    fn show_rename_dialog(&mut self, source: &VfsPath, destination: &VfsPath);

    /// Generic choice dialog; answer arrives via `on_dialog_choice(value)`.
    fn show_dialog(&mut self, message: &str, choices: &[DialogChoice]);

    /// Requests a redraw (called from the UI thread only).
    fn mark_dirty(&mut self);

    /// Rescans directory listings after a completed operation.
    fn refresh_files(&mut self, target: PaneTarget);

    /// Called exactly once when a task returns to idle.
    fn clear_task(&mut self);
}
