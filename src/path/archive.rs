//! Archive backend: `archive://container#internal/path` paths.
//!
//! Entries inside ZIP/TAR containers appear as first-class read-only paths.
//! Lookups go through the process-wide handler cache; every mutation fails
//! with the shared read-only error.

use super::uri::{ArchiveUri, parse_archive_uri};
use super::{ExtendedMetadata, PathBackend, PathMetadata, PathStat, Scheme, SearchStrategy, VfsPath};
use crate::archive::{ArchiveHandler, archive_cache};
use crate::error::VfsError;
use std::sync::Arc;

pub struct ArchivePathImpl {
    /// Path of the container file (local or remote URI).
    archive_path: String,
    /// Normalized internal path; empty at the archive root.
    internal_path: String,
    metadata: Option<PathMetadata>,
}

impl ArchivePathImpl {
    pub fn from_uri(uri: &str, metadata: Option<PathMetadata>) -> Result<VfsPath, VfsError> {
        let ArchiveUri {
            archive_path,
            internal_path,
        } = parse_archive_uri(uri)?;
        Ok(VfsPath::from_backend(Arc::new(ArchivePathImpl {
            archive_path,
            internal_path,
            metadata,
        })))
    }

    /// Builds the URI for an entry inside a container file.
    pub fn uri_for(archive_file: &VfsPath, internal_path: &str) -> String {
        ArchiveUri {
            archive_path: archive_file.as_uri(),
            internal_path: internal_path.to_string(),
        }
        .to_uri()
    }

    fn make(&self, internal_path: String, metadata: Option<PathMetadata>) -> VfsPath {
        VfsPath::from_backend(Arc::new(ArchivePathImpl {
            archive_path: self.archive_path.clone(),
            internal_path,
            metadata,
        }))
    }

    /// The container file as a path on its own storage.
    fn container(&self) -> Result<VfsPath, VfsError> {
        VfsPath::new(&self.archive_path)
    }

    fn handler(&self) -> Result<Arc<ArchiveHandler>, VfsError> {
        archive_cache().get_handler(&self.container()?)
    }

    /// Shared failure for every write-facing method on this backend.
    fn read_only<T>(&self) -> Result<T, VfsError> {
        Err(VfsError::ReadOnlyStorage {
            scheme: "archive".to_string(),
        })
    }
}

impl PathBackend for ArchivePathImpl {
    fn uri(&self) -> String {
        ArchiveUri {
            archive_path: self.archive_path.clone(),
            internal_path: self.internal_path.clone(),
        }
        .to_uri()
    }

    fn scheme(&self) -> Scheme {
        Scheme::Archive
    }

    fn is_absolute(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        if self.internal_path.is_empty() {
            self.container().map(|c| c.name()).unwrap_or_default()
        } else {
            self.internal_path.rsplit('/').next().unwrap_or("").to_string()
        }
    }

    fn parent(&self) -> VfsPath {
        if self.internal_path.is_empty() {
            // Climbing out of the archive root lands on the container file
            return self
                .container()
                .unwrap_or_else(|_| self.make(String::new(), None));
        }
        let parent = match self.internal_path.rsplit_once('/') {
            Some((head, _)) => head.to_string(),
            None => String::new(),
        };
        self.make(parent, None)
    }

    fn parts(&self) -> Vec<String> {
        let mut parts = vec![format!("archive://{}#", self.archive_path)];
        parts.extend(
            self.internal_path
                .split('/')
                .filter(|s| !s.is_empty())
                .map(String::from),
        );
        parts
    }

    fn anchor(&self) -> String {
        format!("archive://{}#", self.archive_path)
    }

    fn join(&self, segment: &str) -> Result<VfsPath, VfsError> {
        let segment = segment.trim_matches('/');
        let joined = if self.internal_path.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.internal_path, segment)
        };
        Ok(self.make(joined, None))
    }

    fn exists(&self) -> bool {
        if self.internal_path.is_empty() {
            return self.container().map(|c| c.exists()).unwrap_or(false);
        }
        self.handler()
            .and_then(|h| h.get_entry_info(&self.internal_path))
            .map(|entry| entry.is_some())
            .unwrap_or(false)
    }

    fn is_dir(&self) -> bool {
        if self.internal_path.is_empty() {
            return true;
        }
        if let Some(meta) = &self.metadata {
            if let Some(is_dir) = meta.is_dir {
                return is_dir;
            }
        }
        self.handler()
            .and_then(|h| h.get_entry_info(&self.internal_path))
            .map(|entry| entry.map(|e| e.is_dir).unwrap_or(false))
            .unwrap_or(false)
    }

    fn is_file(&self) -> bool {
        if self.internal_path.is_empty() {
            return false;
        }
        self.handler()
            .and_then(|h| h.get_entry_info(&self.internal_path))
            .map(|entry| entry.map(|e| !e.is_dir).unwrap_or(false))
            .unwrap_or(false)
    }

    fn stat(&self) -> Result<PathStat, VfsError> {
        if self.internal_path.is_empty() {
            let container_mtime = self.container()?.stat().map(|s| s.mtime).unwrap_or(0);
            return Ok(PathStat::directory(container_mtime));
        }
        let entry = self
            .handler()?
            .get_entry_info(&self.internal_path)?
            .ok_or_else(|| VfsError::ArchiveNavigation {
                path: self.internal_path.clone(),
            })?;
        Ok(entry.to_stat())
    }

    fn iterdir(&self) -> Result<Vec<VfsPath>, VfsError> {
        if !self.internal_path.is_empty() {
            let entry = self
                .handler()?
                .get_entry_info(&self.internal_path)?
                .ok_or_else(|| VfsError::NotFound { path: self.uri() })?;
            if !entry.is_dir {
                return Err(VfsError::NotADirectory { path: self.uri() });
            }
        }
        let entries = self.handler()?.list_entries(&self.internal_path)?;
        Ok(entries
            .into_iter()
            .map(|entry| {
                self.make(
                    entry.internal_path.clone(),
                    Some(PathMetadata {
                        size: Some(entry.size),
                        mtime: Some(entry.mtime),
                        is_dir: Some(entry.is_dir),
                    }),
                )
            })
            .collect())
    }

    fn read_bytes(&self) -> Result<Vec<u8>, VfsError> {
        self.handler()?.extract_to_bytes(&self.internal_path)
    }

    fn write_bytes(&self, _data: &[u8]) -> Result<(), VfsError> {
        self.read_only()
    }

    fn mkdir(&self, _parents: bool, _exist_ok: bool) -> Result<(), VfsError> {
        self.read_only()
    }

    fn rmdir(&self) -> Result<(), VfsError> {
        self.read_only()
    }

    fn rmtree(&self) -> Result<(), VfsError> {
        self.read_only()
    }

    fn unlink(&self) -> Result<(), VfsError> {
        self.read_only()
    }

    fn rename(&self, _target: &VfsPath) -> Result<(), VfsError> {
        self.read_only()
    }

    fn touch(&self) -> Result<(), VfsError> {
        self.read_only()
    }

    fn chmod(&self, _mode: u32) -> Result<(), VfsError> {
        self.read_only()
    }

    // ========================================
    // Capability flags
    // ========================================

    fn is_remote(&self) -> bool {
        // Inherits from the storage holding the container file
        self.container().map(|c| c.is_remote()).unwrap_or(false)
    }

    fn supports_directory_rename(&self) -> bool {
        false
    }

    fn supports_file_editing(&self) -> bool {
        false
    }

    fn supports_write_operations(&self) -> bool {
        false
    }

    fn requires_extraction_for_reading(&self) -> bool {
        true
    }

    fn supports_streaming_read(&self) -> bool {
        false
    }

    fn should_cache_for_search(&self) -> bool {
        true
    }

    fn search_strategy(&self) -> SearchStrategy {
        SearchStrategy::Extracted
    }

    fn display_prefix(&self) -> String {
        "ARCHIVE:".to_string()
    }

    fn display_title(&self) -> String {
        let container_name = self
            .container()
            .map(|c| c.name())
            .unwrap_or_else(|_| self.archive_path.clone());
        if self.internal_path.is_empty() {
            format!("Archive: {}", container_name)
        } else {
            format!("Archive: {}/{}", container_name, self.internal_path)
        }
    }

    fn extended_metadata(&self) -> ExtendedMetadata {
        let mut details = vec![
            ("Archive".to_string(), self.archive_path.clone()),
            ("Path".to_string(), self.internal_path.clone()),
        ];
        let mut kind = "archive_member";
        if let Ok(handler) = self.handler() {
            details.push((
                "Format".to_string(),
                handler.archive_type().as_str().to_string(),
            ));
            details.push((
                "Compression".to_string(),
                handler.archive_type().compression_name().to_string(),
            ));
            if let Ok(Some(entry)) = handler.get_entry_info(&self.internal_path) {
                if entry.is_dir {
                    kind = "archive_directory";
                } else {
                    details.push(("Size".to_string(), crate::format::format_size(entry.size)));
                    details.push((
                        "Compressed".to_string(),
                        crate::format::format_size(entry.compressed_size),
                    ));
                }
                if entry.mtime > 0 {
                    let modified = chrono::DateTime::from_timestamp(entry.mtime, 0)
                        .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                        .unwrap_or_default();
                    details.push(("Modified".to_string(), modified));
                }
            }
        }
        ExtendedMetadata {
            kind: kind.to_string(),
            details,
            format_hint: "table".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    fn make_zip(dir: &std::path::Path, members: &[(&str, &[u8])]) -> std::path::PathBuf {
        let path = dir.join("fixture.zip");
        let file = std::fs::File::create(&path).unwrap();
        let mut writer = zip::ZipWriter::new(file);
        let options = zip::write::SimpleFileOptions::default();
        for (name, data) in members {
            writer.start_file(*name, options).unwrap();
            writer.write_all(data).unwrap();
        }
        writer.finish().unwrap();
        path
    }

    fn archive_uri(container: &std::path::Path, internal: &str) -> String {
        format!("archive://{}#{}", container.display(), internal)
    }

    #[test]
    fn test_read_and_stat_member() {
        let dir = tempfile::tempdir().unwrap();
        let container = make_zip(dir.path(), &[("doc/a.txt", b"alpha")]);
        let member = VfsPath::new(&archive_uri(&container, "doc/a.txt")).unwrap();

        assert!(member.exists());
        assert!(member.is_file());
        assert_eq!(member.read_bytes().unwrap(), b"alpha");
        assert_eq!(member.stat().unwrap().size, 5);
        assert_eq!(member.name(), "a.txt");
    }

    #[test]
    fn test_virtual_directory_navigation() {
        let dir = tempfile::tempdir().unwrap();
        let container = make_zip(dir.path(), &[("a/b/c.txt", b"x")]);

        // "a" exists only by implication; it must still behave as a directory
        let a = VfsPath::new(&archive_uri(&container, "a")).unwrap();
        assert!(a.is_dir());
        let children = a.iterdir().unwrap();
        assert_eq!(children.len(), 1);
        assert_eq!(children[0].name(), "b");
        assert!(children[0].is_dir());

        let b_children = children[0].iterdir().unwrap();
        assert_eq!(b_children.len(), 1);
        assert_eq!(b_children[0].name(), "c.txt");
        assert!(b_children[0].is_file());
    }

    #[test]
    fn test_every_mutation_is_read_only() {
        let dir = tempfile::tempdir().unwrap();
        let container = make_zip(dir.path(), &[("x.txt", b"x")]);
        let member = VfsPath::new(&archive_uri(&container, "x.txt")).unwrap();

        assert!(!member.supports_write_operations());
        let read_only = |r: Result<(), VfsError>| {
            assert!(matches!(r, Err(VfsError::ReadOnlyStorage { .. })));
        };
        read_only(member.write_bytes(b"y"));
        read_only(member.unlink());
        read_only(member.touch());
        read_only(member.chmod(0o644));
        read_only(member.mkdir(false, false));
        read_only(member.rmdir());
        read_only(member.rmtree());
        let target = VfsPath::new(&archive_uri(&container, "y.txt")).unwrap();
        read_only(member.rename(&target));
    }

    #[test]
    fn test_root_parent_is_the_container() {
        let dir = tempfile::tempdir().unwrap();
        let container = make_zip(dir.path(), &[("x.txt", b"x")]);
        let root = VfsPath::new(&archive_uri(&container, "")).unwrap();

        assert!(root.is_dir());
        assert_eq!(root.parent().as_uri(), container.display().to_string());
        assert_eq!(root.parent().scheme(), Scheme::File);
    }

    #[test]
    fn test_missing_member() {
        let dir = tempfile::tempdir().unwrap();
        let container = make_zip(dir.path(), &[("x.txt", b"x")]);
        let ghost = VfsPath::new(&archive_uri(&container, "ghost.txt")).unwrap();
        assert!(!ghost.exists());
        assert!(matches!(ghost.stat(), Err(VfsError::ArchiveNavigation { .. })));
        assert!(matches!(ghost.read_bytes(), Err(VfsError::ArchiveNavigation { .. })));
    }

    #[test]
    fn test_capability_flags() {
        let dir = tempfile::tempdir().unwrap();
        let container = make_zip(dir.path(), &[("x.txt", b"x")]);
        let member = VfsPath::new(&archive_uri(&container, "x.txt")).unwrap();

        assert!(!member.is_remote()); // local container
        assert!(member.requires_extraction_for_reading());
        assert!(!member.supports_streaming_read());
        assert!(member.should_cache_for_search());
        assert_eq!(member.search_strategy(), SearchStrategy::Extracted);
    }
}
