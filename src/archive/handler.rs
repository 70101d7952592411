//! Archive handlers: one opened container with cached member indexes.
//!
//! A handler owns the opened reader plus two caches: `entry_cache` maps
//! internal paths to member records (including synthesized virtual directory
//! entries for implicit parents) and `directory_cache` maps each directory to
//! its direct children in member order. Format readers are not thread-safe,
//! so all reader access is serialized behind a per-handler mutex.

use super::{ArchiveEntry, ArchiveType, TarCompression};
use crate::error::VfsError;
use crate::ignore_poison::IgnorePoison;
use crate::path::uri::normalize_internal_path;
use crate::path::{Scheme, VfsPath};
use std::collections::{HashMap, HashSet};
use std::fs::File;
use std::io::{BufReader, Read, Write};
use std::path::{Path, PathBuf};
use std::sync::Mutex;

/// Above this member count the initial walk caches only directories and
/// shallow entries; deeper entries load on demand.
pub const LARGE_ARCHIVE_THRESHOLD: usize = 1000;

/// An opened archive with cached member indexes.
pub struct ArchiveHandler {
    archive_path: VfsPath,
    archive_type: ArchiveType,
    state: Mutex<HandlerState>,
}

#[derive(Default)]
struct HandlerState {
    is_open: bool,
    /// Local file the reader operates on: the archive itself, or the temp
    /// download for remote archives.
    local_path: Option<PathBuf>,
    /// Owns the temp download so it is deleted on close.
    temp_file: Option<tempfile::NamedTempFile>,
    /// Open ZIP reader (TAR re-opens the stream per extraction).
    zip: Option<zip::ZipArchive<BufReader<File>>>,
    entry_cache: HashMap<String, ArchiveEntry>,
    directory_cache: HashMap<String, Vec<String>>,
    /// Maps normalized member path to the reader's member index (ZIP only).
    member_index: HashMap<String, usize>,
    member_count: usize,
}

impl ArchiveHandler {
    pub fn new(archive_path: VfsPath, archive_type: ArchiveType) -> ArchiveHandler {
        ArchiveHandler {
            archive_path,
            archive_type,
            state: Mutex::new(HandlerState::default()),
        }
    }

    /// Creates a handler picking the format from the filename.
    pub fn for_path(archive_path: &VfsPath) -> Result<ArchiveHandler, VfsError> {
        let name = archive_path.name();
        let archive_type = ArchiveType::from_filename(&name).ok_or_else(|| VfsError::ArchiveFormat {
            path: archive_path.as_uri(),
            message: format!("unrecognized suffix on '{}'", name),
        })?;
        Ok(ArchiveHandler::new(archive_path.clone(), archive_type))
    }

    pub fn archive_path(&self) -> &VfsPath {
        &self.archive_path
    }

    pub fn archive_type(&self) -> ArchiveType {
        self.archive_type
    }

    pub fn is_open(&self) -> bool {
        self.state.lock_ignore_poison().is_open
    }

    pub fn member_count(&self) -> usize {
        self.state.lock_ignore_poison().member_count
    }

    /// Opens the container and walks its members into the caches.
    ///
    /// Remote archives are downloaded to a temp file first. Idempotent.
    pub fn open(&self) -> Result<(), VfsError> {
        let mut state = self.state.lock_ignore_poison();
        if state.is_open {
            return Ok(());
        }

        // Stage remote containers locally; format readers need a seekable file
        if self.archive_path.scheme() == Scheme::File {
            state.local_path = Some(PathBuf::from(self.archive_path.as_uri()));
        } else {
            log::debug!("downloading remote archive {} to temp file", self.archive_path);
            let data = self.archive_path.read_bytes()?;
            let mut temp = tempfile::NamedTempFile::new()
                .map_err(|e| VfsError::from_io(e, &self.archive_path.as_uri()))?;
            temp.write_all(&data)
                .map_err(|e| VfsError::from_io(e, &self.archive_path.as_uri()))?;
            state.local_path = Some(temp.path().to_path_buf());
            state.temp_file = Some(temp);
        }

        let local = state.local_path.clone().expect("local path set above");
        let entries = match self.archive_type {
            ArchiveType::Zip => self.open_zip(&mut state, &local)?,
            _ => self.read_tar_entries(&local)?,
        };

        state.member_count = entries.len();
        let state_mut = &mut *state;
        build_caches(
            entries,
            self.archive_type,
            &mut state_mut.entry_cache,
            &mut state_mut.directory_cache,
        );
        state.is_open = true;
        log::debug!(
            "opened archive {} ({} members)",
            self.archive_path,
            state.member_count
        );
        Ok(())
    }

    /// Releases the reader and deletes any temp download. Idempotent.
    pub fn close(&self) {
        let mut state = self.state.lock_ignore_poison();
        state.zip = None;
        state.temp_file = None; // drop deletes the temp file
        state.local_path = None;
        state.entry_cache.clear();
        state.directory_cache.clear();
        state.member_index.clear();
        state.is_open = false;
    }

    fn open_zip(
        &self,
        state: &mut HandlerState,
        local: &Path,
    ) -> Result<Vec<ArchiveEntry>, VfsError> {
        let file = File::open(local).map_err(|e| VfsError::from_io(e, &self.archive_path.as_uri()))?;
        let mut zip = zip::ZipArchive::new(BufReader::new(file)).map_err(|e| self.zip_error(e))?;

        let mut entries = Vec::with_capacity(zip.len());
        for index in 0..zip.len() {
            let member = zip.by_index(index).map_err(|e| self.zip_error(e))?;
            let entry = zip_entry(&member);
            state.member_index.insert(entry.internal_path.clone(), index);
            entries.push(entry);
        }
        state.zip = Some(zip);
        Ok(entries)
    }

    fn read_tar_entries(&self, local: &Path) -> Result<Vec<ArchiveEntry>, VfsError> {
        let reader = self.open_tar_reader(local)?;
        let mut archive = tar::Archive::new(reader);
        let mut entries = Vec::new();
        let iter = archive
            .entries()
            .map_err(|e| self.tar_error(e))?;
        for member in iter {
            let member = member.map_err(|e| self.tar_error(e))?;
            entries.push(tar_entry(&member, self.archive_type)?);
        }
        Ok(entries)
    }

    fn open_tar_reader(&self, local: &Path) -> Result<Box<dyn Read>, VfsError> {
        let file = File::open(local).map_err(|e| VfsError::from_io(e, &self.archive_path.as_uri()))?;
        Ok(match self.archive_type.tar_compression() {
            TarCompression::None => Box::new(file),
            TarCompression::Gz => Box::new(flate2::read::GzDecoder::new(file)),
            TarCompression::Bz2 => Box::new(bzip2::read::BzDecoder::new(file)),
            TarCompression::Xz => Box::new(xz2::read::XzDecoder::new(file)),
        })
    }

    fn zip_error(&self, err: zip::result::ZipError) -> VfsError {
        match err {
            zip::result::ZipError::Io(io) => VfsError::from_io(io, &self.archive_path.as_uri()),
            other => VfsError::ArchiveCorrupted {
                path: self.archive_path.as_uri(),
                message: other.to_string(),
            },
        }
    }

    fn tar_error(&self, err: std::io::Error) -> VfsError {
        VfsError::ArchiveCorrupted {
            path: self.archive_path.as_uri(),
            message: err.to_string(),
        }
    }

    fn ensure_open(&self) -> Result<(), VfsError> {
        if !self.is_open() {
            self.open()?;
        }
        Ok(())
    }

    /// Lists direct children of an internal path in member order.
    ///
    /// Complete even in lazy mode: children the initial walk elided resolve
    /// through the reader on demand.
    pub fn list_entries(&self, internal_path: &str) -> Result<Vec<ArchiveEntry>, VfsError> {
        self.ensure_open()?;
        let normalized = normalize_internal_path(internal_path);
        let children: Vec<(String, Option<ArchiveEntry>)> = {
            let state = self.state.lock_ignore_poison();
            let Some(children) = state.directory_cache.get(&normalized) else {
                if !normalized.is_empty() && !state.entry_cache.contains_key(&normalized) {
                    return Err(VfsError::ArchiveNavigation { path: normalized });
                }
                // Existing entry with no children (empty dir, or a file)
                return Ok(Vec::new());
            };
            children
                .iter()
                .map(|child| (child.clone(), state.entry_cache.get(child).cloned()))
                .collect()
        };

        let mut entries = Vec::with_capacity(children.len());
        for (child, cached) in children {
            match cached {
                Some(entry) => entries.push(entry),
                None => {
                    if let Some(entry) = self.get_entry_info(&child)? {
                        entries.push(entry);
                    }
                }
            }
        }
        Ok(entries)
    }

    /// Looks up a member record, loading it lazily for large archives.
    pub fn get_entry_info(&self, internal_path: &str) -> Result<Option<ArchiveEntry>, VfsError> {
        self.ensure_open()?;
        let normalized = normalize_internal_path(internal_path);
        let mut state = self.state.lock_ignore_poison();

        if let Some(entry) = state.entry_cache.get(&normalized) {
            return Ok(Some(entry.clone()));
        }

        // Lazy path: the initial walk elided deep entries of large archives
        match self.archive_type {
            ArchiveType::Zip => {
                let Some(&index) = state.member_index.get(&normalized) else {
                    return Ok(None);
                };
                let entry = {
                    let Some(zip) = state.zip.as_mut() else {
                        return Ok(None);
                    };
                    let member = zip.by_index(index).map_err(|e| match e {
                        zip::result::ZipError::FileNotFound => VfsError::ArchiveNavigation {
                            path: normalized.clone(),
                        },
                        other => VfsError::ArchiveCorrupted {
                            path: String::new(),
                            message: other.to_string(),
                        },
                    })?;
                    zip_entry(&member)
                };
                state.entry_cache.insert(normalized, entry.clone());
                Ok(Some(entry))
            }
            _ => {
                let Some(local) = state.local_path.clone() else {
                    return Ok(None);
                };
                drop(state);
                let found = self.scan_tar_for(&local, &normalized, |member, entry| {
                    let _ = member;
                    Ok(entry)
                })?;
                if let Some(entry) = &found {
                    self.state
                        .lock_ignore_poison()
                        .entry_cache
                        .insert(normalized, entry.clone());
                }
                Ok(found)
            }
        }
    }

    /// All file members (no directories), depth-first in member order.
    /// Used by extraction, which skips directory entries in its counts.
    pub fn list_all_files(&self) -> Result<Vec<ArchiveEntry>, VfsError> {
        self.ensure_open()?;
        // Collect candidate paths under the lock, then resolve entries that
        // the lazy walk elided (resolution needs the reader)
        let candidates: Vec<(String, Option<ArchiveEntry>)> = {
            let state = self.state.lock_ignore_poison();
            let mut out = Vec::new();
            let mut stack: Vec<String> = state
                .directory_cache
                .get("")
                .cloned()
                .unwrap_or_default()
                .into_iter()
                .rev()
                .collect();
            while let Some(path) = stack.pop() {
                if let Some(children) = state.directory_cache.get(&path) {
                    if !children.is_empty() {
                        stack.extend(children.iter().rev().cloned());
                        continue;
                    }
                }
                match state.entry_cache.get(&path) {
                    Some(entry) if entry.is_dir => {}
                    Some(entry) => out.push((path.clone(), Some(entry.clone()))),
                    None => out.push((path.clone(), None)),
                }
            }
            out
        };

        let mut files = Vec::with_capacity(candidates.len());
        for (path, cached) in candidates {
            match cached {
                Some(entry) => files.push(entry),
                None => {
                    if let Some(entry) = self.get_entry_info(&path)? {
                        if !entry.is_dir {
                            files.push(entry);
                        }
                    }
                }
            }
        }
        Ok(files)
    }

    /// Extracts a member's full contents to memory. Fails on directories.
    pub fn extract_to_bytes(&self, internal_path: &str) -> Result<Vec<u8>, VfsError> {
        self.ensure_open()?;
        let normalized = normalize_internal_path(internal_path);
        let entry = self
            .get_entry_info(&normalized)?
            .ok_or_else(|| VfsError::ArchiveNavigation {
                path: normalized.clone(),
            })?;
        if entry.is_dir {
            return Err(VfsError::ArchiveExtraction {
                path: normalized,
                message: "is a directory".to_string(),
            });
        }

        match self.archive_type {
            ArchiveType::Zip => {
                let mut state = self.state.lock_ignore_poison();
                let index = *state
                    .member_index
                    .get(&normalized)
                    .ok_or_else(|| VfsError::ArchiveNavigation {
                        path: normalized.clone(),
                    })?;
                let zip = state.zip.as_mut().ok_or_else(|| VfsError::ArchiveCorrupted {
                    path: String::new(),
                    message: "archive reader not open".to_string(),
                })?;
                let mut member = zip.by_index(index).map_err(|e| VfsError::ArchiveExtraction {
                    path: normalized.clone(),
                    message: e.to_string(),
                })?;
                let mut data = Vec::with_capacity(entry.size as usize);
                member
                    .read_to_end(&mut data)
                    .map_err(|e| VfsError::ArchiveExtraction {
                        path: normalized.clone(),
                        message: e.to_string(),
                    })?;
                Ok(data)
            }
            _ => {
                let local = self.local_path()?;
                let found = self.scan_tar_for(&local, &normalized, |member, _entry| {
                    let mut data = Vec::new();
                    member.read_to_end(&mut data).map_err(|e| VfsError::ArchiveExtraction {
                        path: normalized.clone(),
                        message: e.to_string(),
                    })?;
                    Ok(data)
                })?;
                found.ok_or_else(|| VfsError::ArchiveNavigation { path: normalized })
            }
        }
    }

    /// Extracts a member to a local file, then best-effort restores the
    /// member's mtime (and mode for TAR members).
    pub fn extract_to_file(&self, internal_path: &str, target: &Path) -> Result<(), VfsError> {
        let normalized = normalize_internal_path(internal_path);
        let entry = self
            .get_entry_info(&normalized)?
            .ok_or_else(|| VfsError::ArchiveNavigation {
                path: normalized.clone(),
            })?;
        let data = self.extract_to_bytes(&normalized)?;
        std::fs::write(target, data)
            .map_err(|e| VfsError::from_io(e, &target.to_string_lossy()))?;

        if entry.mtime > 0 {
            let mtime = filetime::FileTime::from_unix_time(entry.mtime, 0);
            let _ = filetime::set_file_mtime(target, mtime);
        }
        #[cfg(unix)]
        if self.archive_type.is_tar() && entry.mode != 0 {
            use std::os::unix::fs::PermissionsExt;
            let _ = std::fs::set_permissions(target, std::fs::Permissions::from_mode(entry.mode));
        }
        Ok(())
    }

    fn local_path(&self) -> Result<PathBuf, VfsError> {
        self.state
            .lock_ignore_poison()
            .local_path
            .clone()
            .ok_or_else(|| VfsError::ArchiveCorrupted {
                path: self.archive_path.as_uri(),
                message: "archive not open".to_string(),
            })
    }

    /// Scans a TAR stream for one member by normalized path, applying `f` to
    /// the matching entry. TAR has no random access, so this re-opens and
    /// walks the stream.
    fn scan_tar_for<T>(
        &self,
        local: &Path,
        normalized: &str,
        f: impl FnOnce(&mut tar::Entry<'_, Box<dyn Read>>, ArchiveEntry) -> Result<T, VfsError>,
    ) -> Result<Option<T>, VfsError> {
        let reader = self.open_tar_reader(local)?;
        let mut archive = tar::Archive::new(reader);
        let iter = archive.entries().map_err(|e| self.tar_error(e))?;
        let mut f = Some(f);
        for member in iter {
            let mut member = member.map_err(|e| self.tar_error(e))?;
            let entry = tar_entry(&member, self.archive_type)?;
            if entry.internal_path == normalized {
                let f = f.take().expect("scan callback consumed once");
                return f(&mut member, entry).map(Some);
            }
        }
        Ok(None)
    }
}

fn zip_entry(member: &zip::read::ZipFile<'_>) -> ArchiveEntry {
    let internal_path = normalize_internal_path(member.name());
    let mtime = member
        .last_modified()
        .and_then(|dt| {
            chrono::NaiveDate::from_ymd_opt(dt.year() as i32, dt.month() as u32, dt.day() as u32)
                .and_then(|d| d.and_hms_opt(dt.hour() as u32, dt.minute() as u32, dt.second() as u32))
        })
        .map(|naive| naive.and_utc().timestamp())
        .unwrap_or(0);
    ArchiveEntry {
        name: internal_path.rsplit('/').next().unwrap_or("").to_string(),
        internal_path,
        is_dir: member.is_dir(),
        size: member.size(),
        compressed_size: member.compressed_size(),
        mtime,
        mode: member.unix_mode().map(|m| m & 0o7777).unwrap_or(0),
        archive_type: ArchiveType::Zip,
    }
}

fn tar_entry<R: Read>(
    member: &tar::Entry<'_, R>,
    archive_type: ArchiveType,
) -> Result<ArchiveEntry, VfsError> {
    let path = member
        .path()
        .map_err(|e| VfsError::ArchiveCorrupted {
            path: String::new(),
            message: e.to_string(),
        })?
        .to_string_lossy()
        .to_string();
    let internal_path = normalize_internal_path(&path);
    let header = member.header();
    let size = header.size().unwrap_or(0);
    Ok(ArchiveEntry {
        name: internal_path.rsplit('/').next().unwrap_or("").to_string(),
        internal_path,
        is_dir: header.entry_type().is_dir(),
        size,
        // TAR stores no per-member compressed size
        compressed_size: size,
        mtime: header.mtime().unwrap_or(0) as i64,
        mode: header.mode().map(|m| m & 0o7777).unwrap_or(0),
        archive_type,
    })
}

/// Walks all members into the entry and directory caches, then synthesizes
/// virtual directory entries for every ancestor without an explicit member.
///
/// For large archives only directories and shallow entries are cached
/// eagerly; directory listings stay complete because `directory_cache`
/// references paths, not full records.
fn build_caches(
    entries: Vec<ArchiveEntry>,
    archive_type: ArchiveType,
    entry_cache: &mut HashMap<String, ArchiveEntry>,
    directory_cache: &mut HashMap<String, Vec<String>>,
) {
    entry_cache.clear();
    directory_cache.clear();
    // The archive root always lists, even with zero members
    directory_cache.insert(String::new(), Vec::new());

    let lazy = entries.len() > LARGE_ARCHIVE_THRESHOLD;
    let mut all_directories: Vec<String> = Vec::new();
    let mut seen_directories: HashSet<String> = HashSet::new();
    let mut registered_children: HashSet<String> = HashSet::new();

    for entry in entries {
        let path = entry.internal_path.clone();
        if path.is_empty() {
            continue;
        }
        let is_dir = entry.is_dir;
        let depth = path.matches('/').count();

        if !lazy || is_dir || depth < 2 {
            entry_cache.insert(path.clone(), entry);
        }

        let parts: Vec<&str> = path.split('/').collect();
        for i in 0..parts.len() {
            let parent = parts[..i].join("/");
            let child = parts[..=i].join("/");

            let child_is_dir = i < parts.len() - 1 || is_dir;
            if child_is_dir && seen_directories.insert(child.clone()) {
                all_directories.push(child.clone());
            }

            if registered_children.insert(child.clone()) {
                directory_cache.entry(parent).or_default().push(child);
            }
        }
    }

    for dir_path in all_directories {
        entry_cache
            .entry(dir_path.clone())
            .or_insert_with(|| ArchiveEntry::virtual_directory(&dir_path, archive_type));
    }
}

#[cfg(test)]
#[path = "handler_test.rs"]
mod handler_test;
