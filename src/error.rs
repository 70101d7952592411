//! Error type shared across the storage and operation layers.
//!
//! Every error carries a machine-readable kind plus enough detail for two
//! audiences: `Display` produces the technical message that goes to the log,
//! `user_message()` produces the string a dialog can show.

use serde::Serialize;
use std::path::Path;

/// Errors produced by path backends, caches, and operation executors.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum VfsError {
    /// Path does not exist
    NotFound { path: String },
    /// Path exists but is not a directory
    NotADirectory { path: String },
    /// OS or remote end refused the operation
    PermissionDenied { path: String, message: String },
    /// Destination already exists and overwrite was not allowed
    FileExists { path: String },
    /// "No space left on device" / quota exceeded; fatal to the current operation
    DiskSpaceExhausted { path: String, message: String },
    /// Mutation attempted on a read-only backend (archives)
    ReadOnlyStorage { scheme: String },
    /// Unsupported or unrecognized archive format
    ArchiveFormat { path: String, message: String },
    /// The container itself could not be read
    ArchiveCorrupted { path: String, message: String },
    /// Internal archive path does not exist
    ArchiveNavigation { path: String },
    /// A member could not be extracted (includes "is a directory")
    ArchiveExtraction { path: String, message: String },
    /// Operation cancelled by the user
    Cancelled,
    /// Malformed path string
    InvalidUri { uri: String, message: String },
    /// Missing credentials or misconfigured remote
    ConfigurationError { message: String },
    /// Any other I/O failure; recoverable per file
    IoError { path: String, message: String },
}

impl VfsError {
    pub fn io(path: impl Into<String>, message: impl Into<String>) -> Self {
        VfsError::IoError {
            path: path.into(),
            message: message.into(),
        }
    }

    /// Maps an `io::Error` with the path that produced it, which the blanket
    /// `From` impl cannot know.
    pub fn from_io(err: std::io::Error, path: &str) -> Self {
        use std::io::ErrorKind;
        match err.kind() {
            ErrorKind::NotFound => VfsError::NotFound { path: path.to_string() },
            ErrorKind::PermissionDenied => VfsError::PermissionDenied {
                path: path.to_string(),
                message: err.to_string(),
            },
            ErrorKind::AlreadyExists => VfsError::FileExists { path: path.to_string() },
            ErrorKind::NotADirectory => VfsError::NotADirectory { path: path.to_string() },
            ErrorKind::StorageFull | ErrorKind::QuotaExceeded => VfsError::DiskSpaceExhausted {
                path: path.to_string(),
                message: err.to_string(),
            },
            _ => VfsError::IoError {
                path: path.to_string(),
                message: err.to_string(),
            },
        }
    }

    /// True for errors that abort the whole operation rather than one file.
    pub fn is_fatal(&self) -> bool {
        matches!(
            self,
            VfsError::DiskSpaceExhausted { .. } | VfsError::Cancelled
        )
    }

    /// Returns a user-friendly message suitable for a dialog.
    pub fn user_message(&self) -> String {
        match self {
            VfsError::NotFound { path } => {
                format!("Cannot find \"{}\". It may have been moved or deleted.", file_name_of(path))
            }
            VfsError::NotADirectory { path } => {
                format!("\"{}\" is not a directory.", file_name_of(path))
            }
            VfsError::PermissionDenied { path, .. } => {
                format!("Permission denied for \"{}\".", file_name_of(path))
            }
            VfsError::FileExists { path } => {
                format!("\"{}\" already exists at the destination.", file_name_of(path))
            }
            VfsError::DiskSpaceExhausted { .. } => {
                "Not enough space on the destination storage.".to_string()
            }
            VfsError::ReadOnlyStorage { .. } => {
                "This storage is read-only. Copy the files to writable storage first.".to_string()
            }
            VfsError::ArchiveFormat { path, .. } => {
                format!("\"{}\" is not a supported archive format.", file_name_of(path))
            }
            VfsError::ArchiveCorrupted { path, .. } => {
                format!("Archive \"{}\" is damaged and cannot be read.", file_name_of(path))
            }
            VfsError::ArchiveNavigation { path } => {
                format!("\"{}\" does not exist in this archive.", path)
            }
            VfsError::ArchiveExtraction { path, .. } => {
                format!("Could not extract \"{}\" from the archive.", path)
            }
            VfsError::Cancelled => "Operation was cancelled.".to_string(),
            VfsError::InvalidUri { uri, .. } => format!("\"{}\" is not a valid path.", uri),
            VfsError::ConfigurationError { message } => {
                format!("Storage is not configured: {}", message)
            }
            VfsError::IoError { path, message } => {
                if path.is_empty() {
                    format!("An error occurred: {}", message)
                } else {
                    format!("Error with \"{}\": {}", file_name_of(path), message)
                }
            }
        }
    }
}

fn file_name_of(path: &str) -> String {
    Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().to_string())
        .unwrap_or_else(|| path.to_string())
}

impl std::fmt::Display for VfsError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            VfsError::NotFound { path } => write!(f, "not found: {}", path),
            VfsError::NotADirectory { path } => write!(f, "not a directory: {}", path),
            VfsError::PermissionDenied { path, message } => {
                write!(f, "permission denied: {} ({})", path, message)
            }
            VfsError::FileExists { path } => write!(f, "already exists: {}", path),
            VfsError::DiskSpaceExhausted { path, message } => {
                write!(f, "disk space exhausted at {}: {}", path, message)
            }
            VfsError::ReadOnlyStorage { scheme } => {
                write!(f, "read-only storage: {} does not support write operations", scheme)
            }
            VfsError::ArchiveFormat { path, message } => {
                write!(f, "unsupported archive format: {} ({})", path, message)
            }
            VfsError::ArchiveCorrupted { path, message } => {
                write!(f, "corrupted archive: {} ({})", path, message)
            }
            VfsError::ArchiveNavigation { path } => {
                write!(f, "path not found in archive: {}", path)
            }
            VfsError::ArchiveExtraction { path, message } => {
                write!(f, "extraction failed for {}: {}", path, message)
            }
            VfsError::Cancelled => write!(f, "operation cancelled"),
            VfsError::InvalidUri { uri, message } => write!(f, "invalid uri {}: {}", uri, message),
            VfsError::ConfigurationError { message } => write!(f, "configuration error: {}", message),
            VfsError::IoError { path, message } => {
                if path.is_empty() {
                    write!(f, "i/o error: {}", message)
                } else {
                    write!(f, "i/o error at {}: {}", path, message)
                }
            }
        }
    }
}

impl std::error::Error for VfsError {}

impl From<std::io::Error> for VfsError {
    fn from(err: std::io::Error) -> Self {
        VfsError::from_io(err, "")
    }
}
