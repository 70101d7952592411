//! Test doubles shared by the operation task tests.

use super::ui::{DialogChoice, PaneTarget, TaskUi};
use crate::path::VfsPath;


/// Records every dialog request so tests can assert on the exact flow and
/// answer by calling back into the task.
#[derive(Default)]
pub struct ScriptedUi {
    pub confirmations: Vec<String>,
    /// (source uri, dest uri, index, total)
    pub conflict_requests: Vec<(String, String, usize, usize)>,
    /// (source uri, destination uri)
    pub rename_requests: Vec<(String, String)>,
    /// (message, choice values)
    pub dialogs: Vec<(String, Vec<String>)>,
    pub dirty_count: usize,
    pub refreshes: Vec<PaneTarget>,
    pub cleared: usize,
}

impl ScriptedUi {
    pub fn new() -> ScriptedUi {
        ScriptedUi::default()
    }

    pub fn last_conflict(&self) -> &(String, String, usize, usize) {
        self.conflict_requests.last().expect("a conflict dialog was shown")
    }
}

impl TaskUi for ScriptedUi {
    fn show_confirmation_dialog(
        &mut self,
        message: &str,
        _files: &[VfsPath],
        _destination: Option<&VfsPath>,
    ) {
        self.confirmations.push(message.to_string());
    }

    fn show_conflict_dialog(&mut self, source: &VfsPath, dest: &VfsPath, index: usize, total: usize) {
        self.conflict_requests
            .push((source.as_uri(), dest.as_uri(), index, total));
    }

    fn show_rename_dialog(&mut self, source: &VfsPath, destination: &VfsPath) {
        self.rename_requests
            .push((source.as_uri(), destination.as_uri()));
    }

    fn show_dialog(&mut self, message: &str, choices: &[DialogChoice]) {
        self.dialogs.push((
            message.to_string(),
            choices.iter().map(|c| c.value.clone()).collect(),
        ));
    }

    fn mark_dirty(&mut self) {
        self.dirty_count += 1;
    }

    fn refresh_files(&mut self, target: PaneTarget) {
        self.refreshes.push(target);
    }

    fn clear_task(&mut self) {
        self.cleared += 1;
    }
}

/// Pumps a task's event queue until it returns to idle or a timeout hits.
/// Works for both task types, which share the state machine but no trait.
macro_rules! pump_task_until_idle {
    ($task:expr, $ui:expr) => {{
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(10);
        while $task.state() != crate::ops::task::TaskState::Idle {
            $task.process_events($ui);
            assert!(
                std::time::Instant::now() < deadline,
                "task did not return to idle in time"
            );
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
    }};
}
pub(crate) use pump_task_until_idle;
