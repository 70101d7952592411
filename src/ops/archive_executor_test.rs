//! Archive executor tests: create/extract flows, conflict detection,
//! cancellation cleanup.

use super::*;
use crate::archive::ArchiveHandler;
use crate::ops::CompletionCallback;
use crate::path::s3::s3_test::fake_s3;
use crate::progress::ProgressManager;
use std::io::Write;
use std::sync::Mutex;

fn executor() -> ArchiveOperationExecutor {
    ArchiveOperationExecutor::new(Arc::new(ProgressManager::new()), None)
}

fn counting_callback() -> (CompletionCallback, Arc<Mutex<Vec<(usize, usize)>>>) {
    let calls = Arc::new(Mutex::new(Vec::new()));
    let calls_for_cb = Arc::clone(&calls);
    let callback: CompletionCallback = Arc::new(move |success, errors| {
        calls_for_cb.lock().unwrap().push((success, errors));
    });
    (callback, calls)
}

fn write_zip(path: &Path, members: &[(&str, &[u8])]) {
    let file = std::fs::File::create(path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (name, data) in members {
        writer.start_file(*name, options).unwrap();
        writer.write_all(data).unwrap();
    }
    writer.finish().unwrap();
}

#[test]
fn test_create_zip_from_tree() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::create_dir_all(dir.path().join("input/sub")).unwrap();
    std::fs::write(dir.path().join("input/a.txt"), b"alpha").unwrap();
    std::fs::write(dir.path().join("input/sub/b.txt"), b"beta").unwrap();
    std::fs::write(dir.path().join("loose.txt"), b"loose").unwrap();
    let target = dir.path().join("out.zip");

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_create_operation(
        &[
            VfsPath::from_std(&dir.path().join("input")),
            VfsPath::from_std(&dir.path().join("loose.txt")),
        ],
        &VfsPath::from_std(&target),
        ArchiveType::Zip,
        &cancel,
        &callback,
    );

    assert_eq!(*calls.lock().unwrap(), vec![(3, 0)]);
    let handler = ArchiveHandler::for_path(&VfsPath::from_std(&target)).unwrap();
    handler.open().unwrap();
    // Member names are the source's own name plus the interior path
    assert_eq!(handler.extract_to_bytes("input/a.txt").unwrap(), b"alpha");
    assert_eq!(handler.extract_to_bytes("input/sub/b.txt").unwrap(), b"beta");
    assert_eq!(handler.extract_to_bytes("loose.txt").unwrap(), b"loose");
    exec.progress().finish_operation();
}

#[test]
fn test_create_tar_gz_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("data.txt"), b"payload").unwrap();
    let target = dir.path().join("out.tar.gz");

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_create_operation(
        &[VfsPath::from_std(&dir.path().join("data.txt"))],
        &VfsPath::from_std(&target),
        ArchiveType::TarGz,
        &cancel,
        &callback,
    );

    assert_eq!(*calls.lock().unwrap(), vec![(1, 0)]);
    let handler = ArchiveHandler::for_path(&VfsPath::from_std(&target)).unwrap();
    handler.open().unwrap();
    assert_eq!(handler.extract_to_bytes("data.txt").unwrap(), b"payload");
    exec.progress().finish_operation();
}

#[test]
fn test_create_cancelled_removes_partial_archive() {
    let dir = tempfile::tempdir().unwrap();
    for i in 0..3 {
        std::fs::write(dir.path().join(format!("f{}.txt", i)), b"x").unwrap();
    }
    let target = dir.path().join("out.tar.gz");

    let progress = Arc::new(ProgressManager::new());
    let cancel = Arc::new(AtomicBool::new(false));
    // Flip the flag from the progress callback after the first member lands
    let cancel_from_cb = Arc::clone(&cancel);
    let progress_callback: crate::progress::ProgressCallback = Arc::new(move |state| {
        if let Some(state) = state {
            if state.processed_items >= 1 {
                cancel_from_cb.store(true, Ordering::SeqCst);
            }
        }
    });
    let exec = ArchiveOperationExecutor::new(Arc::clone(&progress), Some(progress_callback));
    let (callback, calls) = counting_callback();
    exec.perform_create_operation(
        &[
            VfsPath::from_std(&dir.path().join("f0.txt")),
            VfsPath::from_std(&dir.path().join("f1.txt")),
            VfsPath::from_std(&dir.path().join("f2.txt")),
        ],
        &VfsPath::from_std(&target),
        ArchiveType::TarGz,
        &cancel,
        &callback,
    );

    // No corrupted partial archive is left at the destination
    assert!(!target.exists());
    assert_eq!(calls.lock().unwrap().len(), 1);
    progress.finish_operation();
}

#[test]
fn test_extract_with_skip_and_overwrite_sets() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("data.zip");
    write_zip(&archive, &[("a.txt", b"new-a"), ("b.txt", b"new-b")]);
    let dest = dir.path().join("out");
    std::fs::create_dir(&dest).unwrap();
    std::fs::write(dest.join("a.txt"), b"old-a").unwrap();

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    let mut skip = HashSet::new();
    skip.insert("a.txt".to_string());
    exec.perform_extract_operation(
        &VfsPath::from_std(&archive),
        &VfsPath::from_std(&dest),
        false,
        &skip,
        &HashSet::new(),
        &cancel,
        &callback,
    );

    // a.txt untouched, b.txt extracted
    assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"old-a");
    assert_eq!(std::fs::read(dest.join("b.txt")).unwrap(), b"new-b");
    assert_eq!(*calls.lock().unwrap(), vec![(1, 0)]);
    exec.progress().finish_operation();
}

#[test]
fn test_extract_overwrite_set_replaces_specific_file() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("data.zip");
    write_zip(&archive, &[("a.txt", b"new-a"), ("b.txt", b"new-b")]);
    let dest = dir.path().join("out");
    std::fs::create_dir(&dest).unwrap();
    std::fs::write(dest.join("a.txt"), b"old-a").unwrap();
    std::fs::write(dest.join("b.txt"), b"old-b").unwrap();

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    let mut overwrite = HashSet::new();
    overwrite.insert("a.txt".to_string());
    exec.perform_extract_operation(
        &VfsPath::from_std(&archive),
        &VfsPath::from_std(&dest),
        false,
        &HashSet::new(),
        &overwrite,
        &cancel,
        &callback,
    );

    assert_eq!(std::fs::read(dest.join("a.txt")).unwrap(), b"new-a");
    // b.txt existed and was neither overwritten nor listed: left alone
    assert_eq!(std::fs::read(dest.join("b.txt")).unwrap(), b"old-b");
    assert_eq!(*calls.lock().unwrap(), vec![(1, 0)]);
    exec.progress().finish_operation();
}

#[test]
fn test_extract_creates_nested_directories() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("deep.zip");
    write_zip(&archive, &[("a/b/c/deep.txt", b"deep")]);
    let dest = dir.path().join("out");
    std::fs::create_dir(&dest).unwrap();

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, _calls) = counting_callback();
    exec.perform_extract_operation(
        &VfsPath::from_std(&archive),
        &VfsPath::from_std(&dest),
        false,
        &HashSet::new(),
        &HashSet::new(),
        &cancel,
        &callback,
    );

    assert_eq!(std::fs::read(dest.join("a/b/c/deep.txt")).unwrap(), b"deep");
    exec.progress().finish_operation();
}

#[test]
fn test_check_extract_conflicts_skips_directories() {
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("data.zip");
    write_zip(&archive, &[("sub/a.txt", b"a"), ("b.txt", b"b")]);
    let dest = dir.path().join("out");
    std::fs::create_dir_all(dest.join("sub")).unwrap();
    std::fs::write(dest.join("sub/a.txt"), b"existing").unwrap();

    let conflicts = ArchiveOperationExecutor::check_extract_conflicts(
        &VfsPath::from_std(&archive),
        &VfsPath::from_std(&dest),
    )
    .unwrap();

    // Only sub/a.txt conflicts; the existing sub/ directory itself does not
    let paths: Vec<&str> = conflicts.iter().map(|c| c.relative_path.as_str()).collect();
    assert_eq!(paths, vec!["sub/a.txt"]);
}

#[test]
fn test_check_create_conflict() {
    let dir = tempfile::tempdir().unwrap();
    let target = dir.path().join("out.zip");
    assert!(!ArchiveOperationExecutor::check_create_conflict(
        &VfsPath::from_std(&target)
    ));
    std::fs::write(&target, b"occupied").unwrap();
    assert!(ArchiveOperationExecutor::check_create_conflict(
        &VfsPath::from_std(&target)
    ));
}

#[test]
fn test_cross_storage_create_uploads_archive() {
    let fake = fake_s3();
    let dir = tempfile::tempdir().unwrap();
    std::fs::write(dir.path().join("a.txt"), b"cloud-bound").unwrap();

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    let dest = VfsPath::new("s3://bkt-arch/backups/out.zip").unwrap();
    exec.perform_create_operation(
        &[VfsPath::from_std(&dir.path().join("a.txt"))],
        &dest,
        ArchiveType::Zip,
        &cancel,
        &callback,
    );

    assert_eq!(*calls.lock().unwrap(), vec![(1, 0)]);
    let uploaded = fake.object_data("bkt-arch", "backups/out.zip").unwrap();
    // The uploaded bytes are a valid archive containing the member
    let staged = dir.path().join("check.zip");
    std::fs::write(&staged, &uploaded).unwrap();
    let handler = ArchiveHandler::for_path(&VfsPath::from_std(&staged)).unwrap();
    handler.open().unwrap();
    assert_eq!(handler.extract_to_bytes("a.txt").unwrap(), b"cloud-bound");
    exec.progress().finish_operation();
}

#[test]
fn test_cross_storage_extract_uploads_members() {
    let fake = fake_s3();
    let dir = tempfile::tempdir().unwrap();
    let archive = dir.path().join("data.zip");
    write_zip(&archive, &[("x.txt", b"xx"), ("sub/y.txt", b"yy")]);

    let exec = executor();
    let cancel = AtomicBool::new(false);
    let (callback, calls) = counting_callback();
    exec.perform_extract_operation(
        &VfsPath::from_std(&archive),
        &VfsPath::new("s3://bkt-extract/unpacked").unwrap(),
        false,
        &HashSet::new(),
        &HashSet::new(),
        &cancel,
        &callback,
    );

    assert_eq!(*calls.lock().unwrap(), vec![(2, 0)]);
    assert_eq!(fake.object_data("bkt-extract", "unpacked/x.txt").unwrap(), b"xx");
    assert_eq!(
        fake.object_data("bkt-extract", "unpacked/sub/y.txt").unwrap(),
        b"yy"
    );
    exec.progress().finish_operation();
}
