//! Handler tests: member walks, virtual directories, lazy mode, extraction.

use super::*;
use crate::archive::ArchiveType;
use std::io::Write;

fn write_zip(dir: &Path, name: &str, members: &[(&str, Option<&[u8]>)]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    for (member_name, data) in members {
        match data {
            Some(bytes) => {
                writer.start_file(*member_name, options).unwrap();
                writer.write_all(bytes).unwrap();
            }
            None => {
                writer.add_directory(*member_name, options).unwrap();
            }
        }
    }
    writer.finish().unwrap();
    path
}

fn write_tar_gz(dir: &Path, name: &str, members: &[(&str, &[u8])]) -> PathBuf {
    let path = dir.join(name);
    let file = File::create(&path).unwrap();
    let encoder = flate2::write::GzEncoder::new(file, flate2::Compression::default());
    let mut builder = tar::Builder::new(encoder);
    for (member_name, data) in members {
        let mut header = tar::Header::new_gnu();
        header.set_size(data.len() as u64);
        header.set_mode(0o640);
        header.set_mtime(1_700_000_000);
        header.set_cksum();
        builder.append_data(&mut header, member_name, *data).unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap();
    path
}

fn open_handler(path: &Path) -> ArchiveHandler {
    let handler = ArchiveHandler::for_path(&VfsPath::from_std(path)).unwrap();
    handler.open().unwrap();
    handler
}

#[test]
fn test_zip_entry_walk_and_listing_order() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_zip(
        dir.path(),
        "a.zip",
        &[
            ("readme.md", Some(b"hello".as_slice())),
            ("src/", None),
            ("src/main.c", Some(b"int main(){}".as_slice())),
            ("src/util.c", Some(b"// util".as_slice())),
        ],
    );
    let handler = open_handler(&path);

    let root = handler.list_entries("").unwrap();
    let names: Vec<&str> = root.iter().map(|e| e.name.as_str()).collect();
    // Member order of the container is preserved
    assert_eq!(names, vec!["readme.md", "src"]);

    let src = handler.list_entries("src").unwrap();
    let names: Vec<&str> = src.iter().map(|e| e.name.as_str()).collect();
    assert_eq!(names, vec!["main.c", "util.c"]);
}

#[test]
fn test_virtual_directories_for_implicit_parents() {
    let dir = tempfile::tempdir().unwrap();
    // Single deep member, no explicit directory entries
    let path = write_zip(dir.path(), "deep.zip", &[("a/b/c.txt", Some(b"x".as_slice()))]);
    let handler = open_handler(&path);

    let a = handler.get_entry_info("a").unwrap().unwrap();
    assert!(a.is_dir);
    assert_eq!(a.size, 0);
    assert_eq!(a.mode, 0o755);
    assert_eq!(a.mtime, 0);

    let children = handler.list_entries("a").unwrap();
    assert_eq!(children.len(), 1);
    assert_eq!(children[0].internal_path, "a/b");
    assert!(children[0].is_dir);

    let grandchildren = handler.list_entries("a/b").unwrap();
    assert_eq!(grandchildren.len(), 1);
    assert_eq!(grandchildren[0].internal_path, "a/b/c.txt");
    assert!(!grandchildren[0].is_dir);
}

#[test]
fn test_missing_internal_path() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_zip(dir.path(), "a.zip", &[("x.txt", Some(b"x".as_slice()))]);
    let handler = open_handler(&path);

    assert!(handler.get_entry_info("nope").unwrap().is_none());
    assert!(matches!(
        handler.list_entries("nope"),
        Err(VfsError::ArchiveNavigation { .. })
    ));
}

#[test]
fn test_extract_to_bytes_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let body = b"the quick brown fox";
    let path = write_zip(dir.path(), "a.zip", &[("doc/body.txt", Some(body.as_slice()))]);
    let handler = open_handler(&path);

    assert_eq!(handler.extract_to_bytes("doc/body.txt").unwrap(), body);
    // Directories are not extractable
    assert!(matches!(
        handler.extract_to_bytes("doc"),
        Err(VfsError::ArchiveExtraction { .. })
    ));
}

#[test]
fn test_extract_to_file_restores_mtime() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(dir.path(), "a.tar.gz", &[("data.bin", b"payload")]);
    let handler = open_handler(&path);

    let target = dir.path().join("out.bin");
    handler.extract_to_file("data.bin", &target).unwrap();
    assert_eq!(std::fs::read(&target).unwrap(), b"payload");

    let metadata = std::fs::metadata(&target).unwrap();
    let mtime = filetime::FileTime::from_last_modification_time(&metadata);
    assert_eq!(mtime.unix_seconds(), 1_700_000_000);
}

#[test]
fn test_tar_gz_listing_and_extraction() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_tar_gz(
        dir.path(),
        "a.tar.gz",
        &[("top.txt", b"top"), ("nested/inner.txt", b"inner")],
    );
    let handler = open_handler(&path);
    assert_eq!(handler.archive_type(), ArchiveType::TarGz);

    let root = handler.list_entries("").unwrap();
    let names: Vec<&str> = root.iter().map(|e| e.internal_path.as_str()).collect();
    assert_eq!(names, vec!["top.txt", "nested"]);

    assert_eq!(handler.extract_to_bytes("nested/inner.txt").unwrap(), b"inner");

    let inner = handler.get_entry_info("nested/inner.txt").unwrap().unwrap();
    assert_eq!(inner.mode, 0o640);
    assert_eq!(inner.mtime, 1_700_000_000);
}

#[test]
fn test_empty_archive_root_lists_empty() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_zip(dir.path(), "empty.zip", &[]);
    let handler = open_handler(&path);
    assert_eq!(handler.list_entries("").unwrap().len(), 0);
    assert_eq!(handler.member_count(), 0);
}

#[test]
fn test_large_archive_lazy_entries() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("big.zip");
    let file = File::create(&path).unwrap();
    let mut writer = zip::ZipWriter::new(file);
    let options = zip::write::SimpleFileOptions::default();
    // Deep members beyond the threshold; depth >= 2 entries are lazily cached
    for i in 0..(LARGE_ARCHIVE_THRESHOLD + 50) {
        let name = format!("group/{}/file-{}.txt", i % 10, i);
        writer.start_file(&*name, options).unwrap();
        writer.write_all(b"x").unwrap();
    }
    writer.finish().unwrap();

    let handler = open_handler(&path);

    // Directory listings are complete regardless of lazy mode
    let groups = handler.list_entries("group").unwrap();
    assert_eq!(groups.len(), 10);

    // A deep entry resolves on demand
    let entry = handler.get_entry_info("group/3/file-3.txt").unwrap().unwrap();
    assert!(!entry.is_dir);
    assert_eq!(handler.extract_to_bytes("group/3/file-3.txt").unwrap(), b"x");

    // Listings of deep directories stay complete despite the lazy walk
    let deep = handler.list_entries("group/3").unwrap();
    assert_eq!(deep.len(), (LARGE_ARCHIVE_THRESHOLD + 50) / 10);
    assert!(deep.iter().all(|e| !e.is_dir));
}

#[test]
fn test_close_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let path = write_zip(dir.path(), "a.zip", &[("x.txt", Some(b"x".as_slice()))]);
    let handler = open_handler(&path);
    assert!(handler.is_open());
    handler.close();
    assert!(!handler.is_open());
    handler.close();

    // Reopen works after close
    handler.open().unwrap();
    assert_eq!(handler.extract_to_bytes("x.txt").unwrap(), b"x");
}
