//! Local POSIX backend: a thin wrapper over `std::fs`.

use super::{ExtendedMetadata, PathBackend, PathStat, ProgressFn, Scheme, VfsPath};
use crate::error::VfsError;
use std::fs;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::UNIX_EPOCH;

/// Chunk size for streamed local copies with byte progress.
const COPY_CHUNK_SIZE: usize = 1024 * 1024;

pub struct LocalPathImpl {
    path: PathBuf,
}

impl LocalPathImpl {
    pub fn from_path(path: &Path) -> VfsPath {
        VfsPath::from_backend(Arc::new(LocalPathImpl {
            path: path.to_path_buf(),
        }))
    }

    fn path_str(&self) -> String {
        self.path.to_string_lossy().to_string()
    }

    fn map_err(&self, err: std::io::Error) -> VfsError {
        VfsError::from_io(err, &self.path_str())
    }
}

fn mtime_of(metadata: &fs::Metadata) -> i64 {
    metadata
        .modified()
        .ok()
        .and_then(|t| t.duration_since(UNIX_EPOCH).ok())
        .map(|d| d.as_secs() as i64)
        .unwrap_or(0)
}

fn mode_of(metadata: &fs::Metadata) -> u32 {
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        metadata.permissions().mode() & 0o7777
    }
    #[cfg(not(unix))]
    {
        if metadata.permissions().readonly() { 0o444 } else { 0o644 }
    }
}

impl PathBackend for LocalPathImpl {
    fn uri(&self) -> String {
        self.path_str()
    }

    fn scheme(&self) -> Scheme {
        Scheme::File
    }

    fn is_absolute(&self) -> bool {
        self.path.is_absolute()
    }

    fn name(&self) -> String {
        self.path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_default()
    }

    fn parent(&self) -> VfsPath {
        match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => LocalPathImpl::from_path(parent),
            // Root (or bare relative name): the sentinel is the path itself
            _ => LocalPathImpl::from_path(&self.path),
        }
    }

    fn parts(&self) -> Vec<String> {
        self.path
            .components()
            .map(|c| c.as_os_str().to_string_lossy().to_string())
            .collect()
    }

    fn anchor(&self) -> String {
        if self.path.has_root() { "/".to_string() } else { String::new() }
    }

    fn join(&self, segment: &str) -> Result<VfsPath, VfsError> {
        Ok(LocalPathImpl::from_path(&self.path.join(segment)))
    }

    fn exists(&self) -> bool {
        self.path.symlink_metadata().is_ok()
    }

    fn is_dir(&self) -> bool {
        self.path.is_dir()
    }

    fn is_file(&self) -> bool {
        self.path.is_file()
    }

    fn is_symlink(&self) -> bool {
        self.path.is_symlink()
    }

    fn stat(&self) -> Result<PathStat, VfsError> {
        let metadata = fs::metadata(&self.path).map_err(|e| self.map_err(e))?;
        Ok(PathStat {
            size: metadata.len(),
            mtime: mtime_of(&metadata),
            mode: mode_of(&metadata),
            is_dir: metadata.is_dir(),
            is_symlink: self.path.is_symlink(),
        })
    }

    fn iterdir(&self) -> Result<Vec<VfsPath>, VfsError> {
        if !self.exists() {
            return Err(VfsError::NotFound { path: self.path_str() });
        }
        if !self.path.is_dir() {
            return Err(VfsError::NotADirectory { path: self.path_str() });
        }
        let mut children = Vec::new();
        for entry in fs::read_dir(&self.path).map_err(|e| self.map_err(e))? {
            let entry = entry.map_err(|e| self.map_err(e))?;
            children.push(LocalPathImpl::from_path(&entry.path()));
        }
        Ok(children)
    }

    fn read_bytes(&self) -> Result<Vec<u8>, VfsError> {
        fs::read(&self.path).map_err(|e| self.map_err(e))
    }

    fn write_bytes(&self, data: &[u8]) -> Result<(), VfsError> {
        fs::write(&self.path, data).map_err(|e| self.map_err(e))
    }

    fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<(), VfsError> {
        let result = if parents {
            fs::create_dir_all(&self.path)
        } else {
            fs::create_dir(&self.path)
        };
        match result {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists && exist_ok && self.path.is_dir() => {
                Ok(())
            }
            Err(e) => Err(self.map_err(e)),
        }
    }

    fn rmdir(&self) -> Result<(), VfsError> {
        fs::remove_dir(&self.path).map_err(|e| self.map_err(e))
    }

    fn rmtree(&self) -> Result<(), VfsError> {
        if self.path.is_dir() {
            fs::remove_dir_all(&self.path).map_err(|e| self.map_err(e))
        } else {
            fs::remove_file(&self.path).map_err(|e| self.map_err(e))
        }
    }

    fn unlink(&self) -> Result<(), VfsError> {
        fs::remove_file(&self.path).map_err(|e| self.map_err(e))
    }

    fn rename(&self, target: &VfsPath) -> Result<(), VfsError> {
        let target_path = target.as_local_path().ok_or_else(|| VfsError::io(
            target.as_uri(),
            "rename target must be on the local filesystem",
        ))?;
        fs::rename(&self.path, &target_path).map_err(|e| self.map_err(e))
    }

    fn touch(&self) -> Result<(), VfsError> {
        if self.path.exists() {
            let now = filetime::FileTime::now();
            filetime::set_file_mtime(&self.path, now).map_err(|e| self.map_err(e))
        } else {
            fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(&self.path)
                .map(|_| ())
                .map_err(|e| self.map_err(e))
        }
    }

    fn chmod(&self, mode: u32) -> Result<(), VfsError> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&self.path, fs::Permissions::from_mode(mode))
                .map_err(|e| self.map_err(e))
        }
        #[cfg(not(unix))]
        {
            let _ = mode;
            Ok(())
        }
    }

    fn extended_metadata(&self) -> ExtendedMetadata {
        let mut details = Vec::new();
        let kind = if self.path.is_dir() { "directory" } else { "file" };
        details.push(("Name".to_string(), self.name()));
        details.push(("Location".to_string(), self.parent().as_uri()));
        if let Ok(stat) = self.stat() {
            if !stat.is_dir {
                details.push(("Size".to_string(), crate::format::format_size(stat.size)));
            }
            let modified = chrono::DateTime::from_timestamp(stat.mtime, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            details.push(("Modified".to_string(), modified));
            details.push(("Permissions".to_string(), format!("{:o}", stat.mode)));
        }
        ExtendedMetadata {
            kind: kind.to_string(),
            details,
            format_hint: "table".to_string(),
        }
    }
}

/// Copies a single local file, streaming in chunks when a progress callback
/// is supplied so byte-level progress stays live for large files.
pub fn copy_local_file(
    source: &Path,
    dest: &Path,
    progress: Option<&ProgressFn>,
) -> Result<(), VfsError> {
    let src_str = source.to_string_lossy().to_string();
    match progress {
        None => {
            fs::copy(source, dest).map_err(|e| VfsError::from_io(e, &src_str))?;
            Ok(())
        }
        Some(cb) => {
            let total = fs::metadata(source)
                .map_err(|e| VfsError::from_io(e, &src_str))?
                .len();
            let mut reader = fs::File::open(source).map_err(|e| VfsError::from_io(e, &src_str))?;
            let mut writer = fs::File::create(dest)
                .map_err(|e| VfsError::from_io(e, &dest.to_string_lossy()))?;
            let mut buf = vec![0u8; COPY_CHUNK_SIZE];
            let mut done: u64 = 0;
            loop {
                let n = reader.read(&mut buf).map_err(|e| VfsError::from_io(e, &src_str))?;
                if n == 0 {
                    break;
                }
                writer
                    .write_all(&buf[..n])
                    .map_err(|e| VfsError::from_io(e, &dest.to_string_lossy()))?;
                done += n as u64;
                cb(done, total);
            }
            // Preserve permissions like fs::copy does
            if let Ok(metadata) = fs::metadata(source) {
                let _ = fs::set_permissions(dest, metadata.permissions());
            }
            Ok(())
        }
    }
}
