//! URI grammar for the path facade.
//!
//! ```text
//! path       := local-path | remote-uri
//! remote-uri := "archive://" abs-path "#" internal-path
//!             | "s3://" bucket ("/" key)?
//!             | "ssh://" hostname ("/" abs-path)?
//! ```
//!
//! Internal archive paths are normalized: backslashes map to `/` and leading
//! and trailing slashes are stripped.

use crate::error::VfsError;
use serde::{Deserialize, Serialize};

pub const ARCHIVE_PREFIX: &str = "archive://";
pub const S3_PREFIX: &str = "s3://";
pub const SSH_PREFIX: &str = "ssh://";

/// Storage scheme a path belongs to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Scheme {
    File,
    Ssh,
    S3,
    Archive,
}

impl Scheme {
    pub fn as_str(&self) -> &'static str {
        match self {
            Scheme::File => "file",
            Scheme::Ssh => "ssh",
            Scheme::S3 => "s3",
            Scheme::Archive => "archive",
        }
    }
}

impl std::fmt::Display for Scheme {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Determines the scheme of a path string by its prefix.
pub fn scheme_of(uri: &str) -> Scheme {
    if uri.starts_with(ARCHIVE_PREFIX) {
        Scheme::Archive
    } else if uri.starts_with(S3_PREFIX) {
        Scheme::S3
    } else if uri.starts_with(SSH_PREFIX) {
        Scheme::Ssh
    } else {
        Scheme::File
    }
}

/// Parsed `archive://` URI: the container file and the path inside it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ArchiveUri {
    /// Path (local or remote URI) of the archive file itself.
    pub archive_path: String,
    /// Normalized internal path; empty string is the archive root.
    pub internal_path: String,
}

impl ArchiveUri {
    pub fn to_uri(&self) -> String {
        format!("{}{}#{}", ARCHIVE_PREFIX, self.archive_path, self.internal_path)
    }
}

/// Parses an `archive://abs-path#internal/path` URI.
pub fn parse_archive_uri(uri: &str) -> Result<ArchiveUri, VfsError> {
    let rest = uri.strip_prefix(ARCHIVE_PREFIX).ok_or_else(|| VfsError::InvalidUri {
        uri: uri.to_string(),
        message: "missing archive:// prefix".to_string(),
    })?;
    let (archive_path, internal) = rest.split_once('#').ok_or_else(|| VfsError::InvalidUri {
        uri: uri.to_string(),
        message: "archive uri requires '#' separating container and internal path".to_string(),
    })?;
    if archive_path.is_empty() {
        return Err(VfsError::InvalidUri {
            uri: uri.to_string(),
            message: "empty archive path".to_string(),
        });
    }
    Ok(ArchiveUri {
        archive_path: archive_path.to_string(),
        internal_path: normalize_internal_path(internal),
    })
}

/// Parsed `s3://` URI. An empty key addresses the bucket root.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3Uri {
    pub bucket: String,
    pub key: String,
}

impl S3Uri {
    pub fn to_uri(&self) -> String {
        if self.key.is_empty() {
            format!("{}{}/", S3_PREFIX, self.bucket)
        } else {
            format!("{}{}/{}", S3_PREFIX, self.bucket, self.key)
        }
    }
}

/// Parses an `s3://bucket[/key]` URI.
pub fn parse_s3_uri(uri: &str) -> Result<S3Uri, VfsError> {
    let rest = uri.strip_prefix(S3_PREFIX).ok_or_else(|| VfsError::InvalidUri {
        uri: uri.to_string(),
        message: "missing s3:// prefix".to_string(),
    })?;
    let (bucket, key) = match rest.split_once('/') {
        Some((b, k)) => (b, k),
        None => (rest, ""),
    };
    if bucket.is_empty() {
        return Err(VfsError::InvalidUri {
            uri: uri.to_string(),
            message: "empty bucket name".to_string(),
        });
    }
    Ok(S3Uri {
        bucket: bucket.to_string(),
        // A trailing slash is a directory marker, not part of the key identity
        key: key.trim_end_matches('/').to_string(),
    })
}

/// Parsed `ssh://` URI.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SshUri {
    pub host: String,
    /// Absolute remote path; "/" when the URI names only the host.
    pub path: String,
}

impl SshUri {
    pub fn to_uri(&self) -> String {
        format!("{}{}{}", SSH_PREFIX, self.host, self.path)
    }
}

/// Parses an `ssh://hostname[/abs/path]` URI.
pub fn parse_ssh_uri(uri: &str) -> Result<SshUri, VfsError> {
    let rest = uri.strip_prefix(SSH_PREFIX).ok_or_else(|| VfsError::InvalidUri {
        uri: uri.to_string(),
        message: "missing ssh:// prefix".to_string(),
    })?;
    let (host, path) = match rest.find('/') {
        Some(idx) => (&rest[..idx], &rest[idx..]),
        None => (rest, "/"),
    };
    if host.is_empty() {
        return Err(VfsError::InvalidUri {
            uri: uri.to_string(),
            message: "empty hostname".to_string(),
        });
    }
    let path = if path.len() > 1 {
        path.trim_end_matches('/').to_string()
    } else {
        "/".to_string()
    };
    Ok(SshUri {
        host: host.to_string(),
        path,
    })
}

/// Normalizes an internal archive path: `\` becomes `/`, leading and trailing
/// slashes are stripped. The empty string addresses the archive root.
pub fn normalize_internal_path(path: &str) -> String {
    path.replace('\\', "/").trim_matches('/').to_string()
}
