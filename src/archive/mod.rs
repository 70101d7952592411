//! Archive container support: format detection, member records, handlers
//! with cached member indexes, and the process-wide handler cache.

mod cache;
mod handler;
mod writer;

pub use cache::{
    ArchiveCache, ArchiveCacheStats, archive_cache, clear_archive_cache, configure_archive_cache,
};
pub use handler::{ArchiveHandler, LARGE_ARCHIVE_THRESHOLD};
pub use writer::ArchiveWriter;

use crate::path::PathStat;
use serde::{Deserialize, Serialize};

/// Supported archive container formats.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ArchiveType {
    Zip,
    Tar,
    TarGz,
    TarBz2,
    TarXz,
}

/// Compression applied to a TAR stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TarCompression {
    None,
    Gz,
    Bz2,
    Xz,
}

impl ArchiveType {
    /// Maps a filename suffix to its archive type.
    pub fn from_filename(filename: &str) -> Option<ArchiveType> {
        let lower = filename.to_lowercase();
        if lower.ends_with(".zip") {
            Some(ArchiveType::Zip)
        } else if lower.ends_with(".tar.gz") || lower.ends_with(".tgz") {
            Some(ArchiveType::TarGz)
        } else if lower.ends_with(".tar.bz2") || lower.ends_with(".tbz2") {
            Some(ArchiveType::TarBz2)
        } else if lower.ends_with(".tar.xz") || lower.ends_with(".txz") {
            Some(ArchiveType::TarXz)
        } else if lower.ends_with(".tar") {
            Some(ArchiveType::Tar)
        } else {
            None
        }
    }

    /// Parses a format name as used by archive-create requests
    /// ("zip", "tar", "tar.gz", "tar.bz2", "tar.xz").
    pub fn from_format_name(name: &str) -> Option<ArchiveType> {
        match name {
            "zip" => Some(ArchiveType::Zip),
            "tar" => Some(ArchiveType::Tar),
            "tar.gz" | "tgz" => Some(ArchiveType::TarGz),
            "tar.bz2" | "tbz2" => Some(ArchiveType::TarBz2),
            "tar.xz" | "txz" => Some(ArchiveType::TarXz),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            ArchiveType::Zip => "zip",
            ArchiveType::Tar => "tar",
            ArchiveType::TarGz => "tar.gz",
            ArchiveType::TarBz2 => "tar.bz2",
            ArchiveType::TarXz => "tar.xz",
        }
    }

    /// Canonical filename extension (with leading dot).
    pub fn extension(&self) -> &'static str {
        match self {
            ArchiveType::Zip => ".zip",
            ArchiveType::Tar => ".tar",
            ArchiveType::TarGz => ".tar.gz",
            ArchiveType::TarBz2 => ".tar.bz2",
            ArchiveType::TarXz => ".tar.xz",
        }
    }

    pub fn is_tar(&self) -> bool {
        !matches!(self, ArchiveType::Zip)
    }

    pub fn tar_compression(&self) -> TarCompression {
        match self {
            ArchiveType::Zip | ArchiveType::Tar => TarCompression::None,
            ArchiveType::TarGz => TarCompression::Gz,
            ArchiveType::TarBz2 => TarCompression::Bz2,
            ArchiveType::TarXz => TarCompression::Xz,
        }
    }

    pub fn compression_name(&self) -> &'static str {
        match self {
            ArchiveType::Zip => "deflate",
            ArchiveType::Tar => "none",
            ArchiveType::TarGz => "gzip",
            ArchiveType::TarBz2 => "bzip2",
            ArchiveType::TarXz => "xz",
        }
    }
}

/// True if the filename looks like a supported archive.
pub fn is_archive_filename(filename: &str) -> bool {
    ArchiveType::from_filename(filename).is_some()
}

/// One member of an archive (explicit or synthesized virtual directory).
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ArchiveEntry {
    /// Final component name.
    pub name: String,
    /// POSIX-normalized path inside the archive (no leading/trailing `/`).
    pub internal_path: String,
    pub is_dir: bool,
    pub size: u64,
    pub compressed_size: u64,
    /// Modification time (Unix timestamp in seconds); 0 for virtual entries.
    pub mtime: i64,
    /// Unix permission bits.
    pub mode: u32,
    pub archive_type: ArchiveType,
}

impl ArchiveEntry {
    /// Synthesized entry for a directory implied by deeper members.
    pub fn virtual_directory(internal_path: &str, archive_type: ArchiveType) -> ArchiveEntry {
        ArchiveEntry {
            name: internal_path.rsplit('/').next().unwrap_or(internal_path).to_string(),
            internal_path: internal_path.to_string(),
            is_dir: true,
            size: 0,
            compressed_size: 0,
            mtime: 0,
            mode: 0o755,
            archive_type,
        }
    }

    pub fn to_stat(&self) -> PathStat {
        PathStat {
            size: self.size,
            mtime: self.mtime,
            mode: if self.mode != 0 {
                self.mode
            } else if self.is_dir {
                0o755
            } else {
                0o644
            },
            is_dir: self.is_dir,
            is_symlink: false,
        }
    }
}
