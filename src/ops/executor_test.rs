//! File executor tests: phases, error policy, cancellation, callback
//! discipline.

use super::*;
use crate::ops::ResolvedTransfer;
use crate::path::VfsPath;
use crate::progress::ProgressManager;
use std::path::Path;
use std::sync::Mutex;

fn executor() -> FileOperationExecutor {
    FileOperationExecutor::new(Arc::new(ProgressManager::new()), None)
}

fn counting_callback() -> (CompletionCallback, Arc<Mutex<Vec<(usize, usize)>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_for_cb = Arc::clone(&calls);
    let callback: CompletionCallback = Arc::new(move |success, errors| {
        calls_for_cb.lock().unwrap().push((success, errors));
    });
    (callback, calls)
}

fn write_tree(root: &Path) {
    std::fs::create_dir_all(root.join("dir/sub")).unwrap();
    std::fs::write(root.join("top.txt"), b"top").unwrap();
    std::fs::write(root.join("dir/a.txt"), b"aa").unwrap();
    std::fs::write(root.join("dir/sub/b.txt"), b"bbb").unwrap();
}

#[test]
fn test_copy_single_file() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("src.txt"), b"data").unwrap();
    let transfer = ResolvedTransfer::new(
        VfsPath::from_std(&dir.path().join("src.txt")),
        VfsPath::from_std(&dir.path().join("dst.txt")),
        false,
    );

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_copy_operation(&[transfer], &cancel, false, &callback);

    assert_eq!(std::fs::read(dir.path().join("dst.txt")).unwrap(), b"data");
    assert_eq!(*calls.lock().unwrap(), vec![(1, 0)]);
    // The task closes the progress session; the executor leaves it open
    assert!(exec.progress().is_operation_active());
    exec.progress().finish_operation();
}

#[test]
fn test_copy_counts_then_executes() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path());
    let dest_root = dir.path().join("out");

    let transfers = vec![
        ResolvedTransfer::new(
            VfsPath::from_std(&dir.path().join("top.txt")),
            VfsPath::from_std(&dest_root.join("top.txt")),
            false,
        ),
        ResolvedTransfer::new(
            VfsPath::from_std(&dir.path().join("dir")),
            VfsPath::from_std(&dest_root.join("dir")),
            false,
        ),
    ];

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_copy_operation(&transfers, &cancel, false, &callback);

    // 3 files total (directories are not counted as items)
    assert_eq!(*calls.lock().unwrap(), vec![(3, 0)]);
    assert_eq!(exec.progress().snapshot().unwrap().total_items, 3);
    assert_eq!(
        std::fs::read(dest_root.join("dir/sub/b.txt")).unwrap(),
        b"bbb"
    );
    exec.progress().finish_operation();
}

#[test]
fn test_copy_skips_existing_without_overwrite() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("src.txt"), b"new").unwrap();
    std::fs::write(dir.path().join("dst.txt"), b"old").unwrap();

    let transfer = ResolvedTransfer::new(
        VfsPath::from_std(&dir.path().join("src.txt")),
        VfsPath::from_std(&dir.path().join("dst.txt")),
        false,
    );
    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_copy_operation(&[transfer.clone()], &cancel, false, &callback);

    // Skipped: untouched destination, zero successes, zero errors
    assert_eq!(std::fs::read(dir.path().join("dst.txt")).unwrap(), b"old");
    assert_eq!(*calls.lock().unwrap(), vec![(0, 0)]);

    // Overwrite batch replaces it
    let overwriting = ResolvedTransfer { overwrite: true, ..transfer };
    exec.perform_copy_operation(&[overwriting], &cancel, true, &callback);
    assert_eq!(std::fs::read(dir.path().join("dst.txt")).unwrap(), b"new");
    assert_eq!(calls.lock().unwrap().last().unwrap(), &(1, 0));
    exec.progress().finish_operation();
}

#[test]
fn test_copy_continues_after_per_file_error() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("ok.txt"), b"fine").unwrap();
    let transfers = vec![
        ResolvedTransfer::new(
            VfsPath::from_std(&dir.path().join("missing.txt")),
            VfsPath::from_std(&dir.path().join("out1.txt")),
            false,
        ),
        ResolvedTransfer::new(
            VfsPath::from_std(&dir.path().join("ok.txt")),
            VfsPath::from_std(&dir.path().join("out2.txt")),
            false,
        ),
    ];

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_copy_operation(&transfers, &cancel, false, &callback);

    // The missing file is an error; the good file still copies
    assert_eq!(calls.lock().unwrap().last().unwrap(), &(1, 1));
    assert!(dir.path().join("out2.txt").exists());
    exec.progress().finish_operation();
}

/// Test backend whose reads block until the test opens the gate. Lets a
/// test cancel an operation while a transfer is deterministically in flight.
struct GatedSource {
    inner: VfsPath,
    gate: Arc<(Mutex<bool>, std::sync::Condvar)>,
}

impl GatedSource {
    fn open_gate(gate: &Arc<(Mutex<bool>, std::sync::Condvar)>) {
        let (lock, condvar) = &**gate;
        *lock.lock().unwrap() = true;
        condvar.notify_all();
    }

    fn wait_for_gate(&self) {
        let (lock, condvar) = &*self.gate;
        let mut open = lock.lock().unwrap();
        while !*open {
            open = condvar.wait(open).unwrap();
        }
    }
}

impl crate::path::PathBackend for GatedSource {
    fn uri(&self) -> String {
        format!("gated://{}", self.inner.as_uri())
    }
    fn scheme(&self) -> crate::path::Scheme {
        // Reported as remote so the facade takes the read+write path
        crate::path::Scheme::Ssh
    }
    fn is_absolute(&self) -> bool {
        true
    }
    fn name(&self) -> String {
        self.inner.name()
    }
    fn parent(&self) -> VfsPath {
        self.inner.parent()
    }
    fn parts(&self) -> Vec<String> {
        self.inner.parts()
    }
    fn anchor(&self) -> String {
        self.inner.anchor()
    }
    fn join(&self, segment: &str) -> Result<VfsPath, crate::error::VfsError> {
        self.inner.join(segment)
    }
    fn exists(&self) -> bool {
        self.inner.exists()
    }
    fn is_dir(&self) -> bool {
        false
    }
    fn is_file(&self) -> bool {
        true
    }
    fn stat(&self) -> Result<crate::path::PathStat, crate::error::VfsError> {
        self.inner.stat()
    }
    fn iterdir(&self) -> Result<Vec<VfsPath>, crate::error::VfsError> {
        self.inner.iterdir()
    }
    fn read_bytes(&self) -> Result<Vec<u8>, crate::error::VfsError> {
        self.wait_for_gate();
        self.inner.read_bytes()
    }
    fn write_bytes(&self, data: &[u8]) -> Result<(), crate::error::VfsError> {
        self.inner.write_bytes(data)
    }
    fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<(), crate::error::VfsError> {
        self.inner.mkdir(parents, exist_ok)
    }
    fn rmdir(&self) -> Result<(), crate::error::VfsError> {
        self.inner.rmdir()
    }
    fn rmtree(&self) -> Result<(), crate::error::VfsError> {
        self.inner.rmtree()
    }
    fn unlink(&self) -> Result<(), crate::error::VfsError> {
        self.inner.unlink()
    }
    fn rename(&self, target: &VfsPath) -> Result<(), crate::error::VfsError> {
        self.inner.rename(target)
    }
    fn touch(&self) -> Result<(), crate::error::VfsError> {
        self.inner.touch()
    }
    fn chmod(&self, mode: u32) -> Result<(), crate::error::VfsError> {
        self.inner.chmod(mode)
    }
    fn extended_metadata(&self) -> crate::path::ExtendedMetadata {
        self.inner.extended_metadata()
    }
}

#[test]
fn test_copy_cancel_mid_batch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("first.txt"), b"first").unwrap();
    std::fs::write(dir.path().join("second.txt"), b"second").unwrap();

    let gate = Arc::new((Mutex::new(false), std::sync::Condvar::new()));
    let gated = VfsPath::from_backend(Arc::new(GatedSource {
        inner: VfsPath::from_std(&dir.path().join("first.txt")),
        gate: Arc::clone(&gate),
    }));
    let transfers = vec![
        ResolvedTransfer::new(gated, VfsPath::from_std(&dir.path().join("out1.txt")), false),
        ResolvedTransfer::new(
            VfsPath::from_std(&dir.path().join("second.txt")),
            VfsPath::from_std(&dir.path().join("out2.txt")),
            false,
        ),
    ];

    let progress = Arc::new(ProgressManager::new());
    let cancel = Arc::new(AtomicBool::new(false));
    let exec = Arc::new(FileOperationExecutor::new(Arc::clone(&progress), None));
    let (callback, calls) = counting_callback();

    let exec_for_thread = Arc::clone(&exec);
    let cancel_for_thread = Arc::clone(&cancel);
    let callback_for_thread = Arc::clone(&callback);
    let worker = std::thread::spawn(move || {
        exec_for_thread.perform_copy_operation(
            &transfers,
            &cancel_for_thread,
            false,
            &callback_for_thread,
        );
    });

    // The first transfer is parked on the gate; cancel, then release it
    std::thread::sleep(std::time::Duration::from_millis(50));
    cancel.store(true, Ordering::SeqCst);
    GatedSource::open_gate(&gate);
    worker.join().unwrap();

    // First file finished, the batch then observed the flag and stopped
    assert_eq!(*calls.lock().unwrap(), vec![(1, 0)]);
    assert!(dir.path().join("out1.txt").exists());
    assert!(!dir.path().join("out2.txt").exists());
    progress.finish_operation();
}

#[test]
fn test_move_native_rename_batch() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
    let transfers = vec![ResolvedTransfer::new(
        VfsPath::from_std(&dir.path().join("a.txt")),
        VfsPath::from_std(&dir.path().join("b.txt")),
        false,
    )];

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_move_operation(&transfers, &cancel, false, &callback);

    assert!(!dir.path().join("a.txt").exists());
    assert_eq!(std::fs::read(dir.path().join("b.txt")).unwrap(), b"a");
    assert_eq!(*calls.lock().unwrap(), vec![(1, 0)]);
    exec.progress().finish_operation();
}

#[test]
fn test_cross_scheme_move_keeps_source_on_copy_failure() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("precious.txt"), b"keep me").unwrap();
    // Destination join succeeds but the write fails: parent is a file
    std::fs::write(dir.path().join("blocker"), b"").unwrap();
    let transfers = vec![ResolvedTransfer::new(
        VfsPath::from_std(&dir.path().join("precious.txt")),
        VfsPath::from_std(&dir.path().join("blocker/precious.txt")),
        false,
    )];

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_move_operation(&transfers, &cancel, false, &callback);

    assert_eq!(calls.lock().unwrap().last().unwrap().1, 1);
    // The source survives the failed move
    assert!(dir.path().join("precious.txt").exists());
    exec.progress().finish_operation();
}

#[test]
fn test_delete_recursive_depth_first() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path());

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_delete_operation(
        &[
            VfsPath::from_std(&dir.path().join("dir")),
            VfsPath::from_std(&dir.path().join("top.txt")),
        ],
        &cancel,
        &callback,
    );

    assert!(!dir.path().join("dir").exists());
    assert!(!dir.path().join("top.txt").exists());
    // 3 files + 2 directories deleted
    assert_eq!(*calls.lock().unwrap(), vec![(5, 0)]);
    exec.progress().finish_operation();
}

#[test]
fn test_delete_continues_past_errors() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("real.txt"), b"x").unwrap();

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_delete_operation(
        &[
            VfsPath::from_std(&dir.path().join("ghost.txt")),
            VfsPath::from_std(&dir.path().join("real.txt")),
        ],
        &cancel,
        &callback,
    );

    let (success, errors) = *calls.lock().unwrap().last().unwrap();
    assert_eq!(success, 1);
    assert_eq!(errors, 1);
    assert!(!dir.path().join("real.txt").exists());
    exec.progress().finish_operation();
}

#[test]
fn test_callback_fires_once_when_cancelled_before_start() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"a").unwrap();
    let transfers = vec![ResolvedTransfer::new(
        VfsPath::from_std(&dir.path().join("a.txt")),
        VfsPath::from_std(&dir.path().join("b.txt")),
        false,
    )];

    let exec = executor();
    let cancel = AtomicBool::new(true);
    let (callback, calls) = counting_callback();
    exec.perform_copy_operation(&transfers, &cancel, false, &callback);

    assert_eq!(calls.lock().unwrap().len(), 1);
    assert!(!dir.path().join("b.txt").exists());
    exec.progress().finish_operation();
}

#[test]
fn test_count_files_recursively() {
    let dir = tempfile::tempdir().unwrap();
    write_tree(dir.path());
    let cancel = AtomicBool::new(false);
    let total = count_files_recursively(
        &[
            VfsPath::from_std(&dir.path().join("dir")),
            VfsPath::from_std(&dir.path().join("top.txt")),
        ],
        &cancel,
    )
    .unwrap();
    assert_eq!(total, 3);

    cancel.store(true, Ordering::Relaxed);
    assert!(matches!(
        count_files_recursively(&[VfsPath::from_std(dir.path())], &cancel),
        Err(crate::error::VfsError::Cancelled)
    ));
}
