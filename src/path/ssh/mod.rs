//! SSH/SFTP backend: `ssh://hostname/absolute/path`.
//!
//! All I/O routes through the per-host session held by the connection
//! manager. Reads and writes have progress-reporting variants used by
//! cross-backend transfers; plain reads buffer the whole file (the backend
//! reports `supports_streaming_read = false`).

pub mod config;
pub mod connection;

pub use config::{SshHostConfig, host_config, register_host};
pub use connection::{SshConnection, connection_for, disconnect_all};

use super::uri::{SshUri, parse_ssh_uri};
use super::{ExtendedMetadata, PathBackend, PathMetadata, PathStat, ProgressFn, Scheme, SearchStrategy, VfsPath};
use crate::error::VfsError;
use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Chunk size for progress-reporting transfers.
const TRANSFER_CHUNK_SIZE: usize = 64 * 1024;

const S_IFMT: u32 = 0o170000;
const S_IFDIR: u32 = 0o040000;
const S_IFLNK: u32 = 0o120000;

pub struct SshPathImpl {
    host: String,
    /// Absolute remote path ("/" is the host root).
    path: String,
    metadata: Option<PathMetadata>,
}

impl SshPathImpl {
    pub fn from_uri(uri: &str, metadata: Option<PathMetadata>) -> Result<VfsPath, VfsError> {
        let SshUri { host, path } = parse_ssh_uri(uri)?;
        Ok(VfsPath::from_backend(Arc::new(SshPathImpl {
            host,
            path,
            metadata,
        })))
    }

    fn make(&self, path: String, metadata: Option<PathMetadata>) -> VfsPath {
        VfsPath::from_backend(Arc::new(SshPathImpl {
            host: self.host.clone(),
            path,
            metadata,
        }))
    }

    fn remote_path(&self) -> &Path {
        Path::new(&self.path)
    }

    fn connection(&self) -> Arc<SshConnection> {
        connection_for(&self.host)
    }

    fn sftp_stat(&self) -> Result<ssh2::FileStat, VfsError> {
        let path = PathBuf::from(&self.path);
        self.connection()
            .with_sftp(move |sftp| sftp.stat(&path), &self.path)
    }

    fn stat_to_path_stat(stat: &ssh2::FileStat) -> PathStat {
        let perm = stat.perm.unwrap_or(0);
        PathStat {
            size: stat.size.unwrap_or(0),
            mtime: stat.mtime.unwrap_or(0) as i64,
            mode: perm & 0o7777,
            is_dir: perm & S_IFMT == S_IFDIR,
            is_symlink: perm & S_IFMT == S_IFLNK,
        }
    }
}

impl PathBackend for SshPathImpl {
    fn uri(&self) -> String {
        SshUri {
            host: self.host.clone(),
            path: self.path.clone(),
        }
        .to_uri()
    }

    fn scheme(&self) -> Scheme {
        Scheme::Ssh
    }

    fn is_absolute(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        if self.path == "/" {
            return String::new();
        }
        self.path.rsplit('/').next().unwrap_or("").to_string()
    }

    fn parent(&self) -> VfsPath {
        if self.path == "/" {
            return self.make("/".to_string(), None);
        }
        let parent = match self.path.rsplit_once('/') {
            Some(("", _)) => "/".to_string(),
            Some((head, _)) => head.to_string(),
            None => "/".to_string(),
        };
        self.make(parent, None)
    }

    fn parts(&self) -> Vec<String> {
        let mut parts = vec![format!("ssh://{}/", self.host)];
        parts.extend(self.path.split('/').filter(|s| !s.is_empty()).map(String::from));
        parts
    }

    fn anchor(&self) -> String {
        format!("ssh://{}/", self.host)
    }

    fn join(&self, segment: &str) -> Result<VfsPath, VfsError> {
        let segment = segment.trim_matches('/');
        let joined = if self.path == "/" {
            format!("/{}", segment)
        } else {
            format!("{}/{}", self.path, segment)
        };
        Ok(self.make(joined, None))
    }

    fn exists(&self) -> bool {
        self.sftp_stat().is_ok()
    }

    fn is_dir(&self) -> bool {
        if let Some(meta) = &self.metadata {
            if let Some(is_dir) = meta.is_dir {
                return is_dir;
            }
        }
        self.sftp_stat()
            .map(|s| Self::stat_to_path_stat(&s).is_dir)
            .unwrap_or(false)
    }

    fn is_file(&self) -> bool {
        if let Some(meta) = &self.metadata {
            if let Some(is_dir) = meta.is_dir {
                return !is_dir;
            }
        }
        self.sftp_stat()
            .map(|s| !Self::stat_to_path_stat(&s).is_dir)
            .unwrap_or(false)
    }

    fn is_symlink(&self) -> bool {
        let path = PathBuf::from(&self.path);
        self.connection()
            .with_sftp(move |sftp| sftp.lstat(&path), &self.path)
            .map(|s| Self::stat_to_path_stat(&s).is_symlink)
            .unwrap_or(false)
    }

    fn stat(&self) -> Result<PathStat, VfsError> {
        if let Some(meta) = &self.metadata {
            if let (Some(size), Some(mtime)) = (meta.size, meta.mtime) {
                return Ok(if meta.is_dir == Some(true) {
                    PathStat::directory(mtime)
                } else {
                    PathStat::file(size, mtime)
                });
            }
        }
        self.sftp_stat().map(|s| Self::stat_to_path_stat(&s))
    }

    fn iterdir(&self) -> Result<Vec<VfsPath>, VfsError> {
        let path = PathBuf::from(&self.path);
        let stat = self.sftp_stat()?;
        if !Self::stat_to_path_stat(&stat).is_dir {
            return Err(VfsError::NotADirectory { path: self.uri() });
        }
        let entries = self
            .connection()
            .with_sftp(move |sftp| sftp.readdir(&path), &self.path)?;
        let mut children = Vec::with_capacity(entries.len());
        for (child_path, child_stat) in entries {
            let child = self.make(
                child_path.to_string_lossy().to_string(),
                Some(PathMetadata {
                    size: child_stat.size,
                    mtime: child_stat.mtime.map(|t| t as i64),
                    is_dir: Some(Self::stat_to_path_stat(&child_stat).is_dir),
                }),
            );
            children.push(child);
        }
        Ok(children)
    }

    fn read_bytes(&self) -> Result<Vec<u8>, VfsError> {
        let path = PathBuf::from(&self.path);
        self.connection().with_sftp_io(
            move |sftp| {
                let mut file = sftp.open(&path)?;
                let mut data = Vec::new();
                file.read_to_end(&mut data)?;
                Ok(data)
            },
            &self.path,
        )
    }

    fn read_bytes_with_progress(&self, progress: &ProgressFn) -> Result<Vec<u8>, VfsError> {
        let path = PathBuf::from(&self.path);
        self.connection().with_sftp_io(
            move |sftp| {
                let mut file = sftp.open(&path)?;
                let total = file.stat().map(|s| s.size.unwrap_or(0)).unwrap_or(0);
                let mut data = Vec::with_capacity(total as usize);
                let mut buf = vec![0u8; TRANSFER_CHUNK_SIZE];
                loop {
                    let n = file.read(&mut buf)?;
                    if n == 0 {
                        break;
                    }
                    data.extend_from_slice(&buf[..n]);
                    progress(data.len() as u64, total);
                }
                Ok(data)
            },
            &self.path,
        )
    }

    fn write_bytes(&self, data: &[u8]) -> Result<(), VfsError> {
        let path = PathBuf::from(&self.path);
        self.connection().with_sftp_io(
            move |sftp| {
                let mut file = sftp.create(&path)?;
                file.write_all(data)?;
                Ok(())
            },
            &self.path,
        )
    }

    fn write_bytes_with_progress(&self, data: &[u8], progress: &ProgressFn) -> Result<(), VfsError> {
        let path = PathBuf::from(&self.path);
        let total = data.len() as u64;
        self.connection().with_sftp_io(
            move |sftp| {
                let mut file = sftp.create(&path)?;
                let mut written = 0usize;
                for chunk in data.chunks(TRANSFER_CHUNK_SIZE) {
                    file.write_all(chunk)?;
                    written += chunk.len();
                    progress(written as u64, total);
                }
                Ok(())
            },
            &self.path,
        )
    }

    fn mkdir(&self, parents: bool, exist_ok: bool) -> Result<(), VfsError> {
        if self.exists() {
            return if exist_ok && self.is_dir() {
                Ok(())
            } else {
                Err(VfsError::FileExists { path: self.uri() })
            };
        }
        if parents {
            let parent = self.parent();
            if parent.as_uri() != self.uri() && !parent.exists() {
                parent.mkdir(true, true)?;
            }
        }
        let path = PathBuf::from(&self.path);
        self.connection()
            .with_sftp(move |sftp| sftp.mkdir(&path, 0o755), &self.path)
    }

    fn rmdir(&self) -> Result<(), VfsError> {
        let path = PathBuf::from(&self.path);
        self.connection()
            .with_sftp(move |sftp| sftp.rmdir(&path), &self.path)
    }

    fn rmtree(&self) -> Result<(), VfsError> {
        if !self.is_dir() {
            return self.unlink();
        }
        for child in self.iterdir()? {
            child.rmtree()?;
        }
        self.rmdir()
    }

    fn unlink(&self) -> Result<(), VfsError> {
        let path = PathBuf::from(&self.path);
        self.connection()
            .with_sftp(move |sftp| sftp.unlink(&path), &self.path)
    }

    fn rename(&self, target: &VfsPath) -> Result<(), VfsError> {
        if target.scheme() != Scheme::Ssh {
            return Err(VfsError::io(self.uri(), "rename target must be on the same host"));
        }
        let SshUri { host, path } = parse_ssh_uri(&target.as_uri())?;
        if host != self.host {
            return Err(VfsError::io(self.uri(), "rename target must be on the same host"));
        }
        let src = PathBuf::from(&self.path);
        let dst = PathBuf::from(&path);
        self.connection().with_sftp(
            move |sftp| sftp.rename(&src, &dst, Some(ssh2::RenameFlags::OVERWRITE)),
            &self.path,
        )
    }

    fn touch(&self) -> Result<(), VfsError> {
        if self.exists() {
            let path = PathBuf::from(&self.path);
            let now = chrono::Utc::now().timestamp() as u64;
            let stat = ssh2::FileStat {
                size: None,
                uid: None,
                gid: None,
                perm: None,
                atime: Some(now),
                mtime: Some(now),
            };
            self.connection()
                .with_sftp(move |sftp| sftp.setstat(&path, stat.clone()), &self.path)
        } else {
            self.write_bytes(&[])
        }
    }

    fn chmod(&self, mode: u32) -> Result<(), VfsError> {
        let path = PathBuf::from(&self.path);
        let stat = ssh2::FileStat {
            size: None,
            uid: None,
            gid: None,
            perm: Some(mode),
            atime: None,
            mtime: None,
        };
        self.connection()
            .with_sftp(move |sftp| sftp.setstat(&path, stat.clone()), &self.path)
    }

    // ========================================
    // Capability flags
    // ========================================

    fn is_remote(&self) -> bool {
        true
    }

    fn supports_file_editing(&self) -> bool {
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
        SearchStrategy::Buffered
    }

    fn display_prefix(&self) -> String {
        "SSH:".to_string()
    }

    fn display_title(&self) -> String {
        format!("SSH: {}{}", self.host, self.path)
    }

    fn extended_metadata(&self) -> ExtendedMetadata {
        let mut details = vec![
            ("Host".to_string(), self.host.clone()),
            ("Path".to_string(), self.path.clone()),
        ];
        let mut kind = "ssh_file";
        if let Ok(stat) = self.stat() {
            if stat.is_dir {
                kind = "ssh_directory";
            } else {
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
