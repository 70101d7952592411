//! S3 backend: `s3://bucket/key` paths with API-call caching.
//!
//! Metadata operations route through the process-wide [`S3Cache`]; directory
//! listings cache each page and warm the per-key head cache so a listing
//! followed by per-file stats costs one API call total. Every write
//! invalidates the written key, its ancestor listings, and descendants.

pub mod api;
pub mod cache;

pub use api::{AwsS3Api, InMemoryS3Api, ListPage, S3Api, S3ObjectInfo, s3_api, set_s3_api, shutdown_s3_api};
pub use cache::{
    S3Cache, S3CacheStats, S3CachedValue, clear_s3_cache, configure_s3_cache, s3_cache,
    s3_cache_stats,
};

use super::uri::{S3Uri, parse_s3_uri};
use super::{ExtendedMetadata, PathBackend, PathMetadata, PathStat, Scheme, VfsPath};
use crate::error::VfsError;
use api::DELETE_BATCH_LIMIT;
use std::sync::Arc;

const LIST_OP: &str = "list_objects_v2";
const HEAD_OP: &str = "head_object";

pub struct S3PathImpl {
    bucket: String,
    /// Object key without trailing slash; empty for the bucket root.
    key: String,
    metadata: Option<PathMetadata>,
}

impl S3PathImpl {
    pub fn from_uri(uri: &str, metadata: Option<PathMetadata>) -> Result<VfsPath, VfsError> {
        let S3Uri { bucket, key } = parse_s3_uri(uri)?;
        Ok(VfsPath::from_backend(Arc::new(S3PathImpl {
            bucket,
            key,
            metadata,
        })))
    }

    fn make(&self, key: String, metadata: Option<PathMetadata>) -> VfsPath {
        VfsPath::from_backend(Arc::new(S3PathImpl {
            bucket: self.bucket.clone(),
            key,
            metadata,
        }))
    }

    fn api(&self) -> Result<Arc<dyn S3Api>, VfsError> {
        s3_api()
    }

    /// Prefix used to list this path as a directory ("" at the bucket root).
    fn dir_prefix(&self) -> String {
        if self.key.is_empty() {
            String::new()
        } else {
            format!("{}/", self.key)
        }
    }

    /// One cached listing page for this path's directory prefix.
    fn list_page_cached(&self, page: usize, token: Option<&str>) -> Result<ListPage, VfsError> {
        let extra = format!("delimiter=/&page={}", page);
        if let Some(S3CachedValue::ListPage(cached)) =
            s3_cache().get(LIST_OP, &self.bucket, &self.key, &extra)
        {
            return Ok(cached);
        }
        let page_data =
            self.api()?
                .list_objects_page(&self.bucket, &self.dir_prefix(), Some("/"), token, None)?;

        // Warm the per-key head cache so per-file stats after a listing are free
        for object in &page_data.objects {
            s3_cache().put(
                HEAD_OP,
                &self.bucket,
                &object.key,
                "",
                S3CachedValue::Head(object.clone()),
                None,
            );
        }
        s3_cache().put(
            LIST_OP,
            &self.bucket,
            &self.key,
            &extra,
            S3CachedValue::ListPage(page_data.clone()),
            None,
        );
        Ok(page_data)
    }

    fn head_cached(&self) -> Result<S3ObjectInfo, VfsError> {
        if let Some(S3CachedValue::Head(info)) = s3_cache().get(HEAD_OP, &self.bucket, &self.key, "") {
            return Ok(info);
        }
        let info = self.api()?.head_object(&self.bucket, &self.key)?;
        s3_cache().put(
            HEAD_OP,
            &self.bucket,
            &self.key,
            "",
            S3CachedValue::Head(info.clone()),
            None,
        );
        Ok(info)
    }

    /// True when any object exists under `key/` (the directory probe).
    fn has_children(&self) -> Result<bool, VfsError> {
        if let Some(S3CachedValue::Bool(cached)) =
            s3_cache().get(LIST_OP, &self.bucket, &self.key, "probe")
        {
            return Ok(cached);
        }
        let page = self.api()?.list_objects_page(
            &self.bucket,
            &self.dir_prefix(),
            Some("/"),
            None,
            Some(1),
        )?;
        let result = !page.objects.is_empty() || !page.common_prefixes.is_empty();
        s3_cache().put(
            LIST_OP,
            &self.bucket,
            &self.key,
            "probe",
            S3CachedValue::Bool(result),
            None,
        );
        Ok(result)
    }

    fn invalidate_for_write(&self, key: &str) {
        s3_cache().invalidate_key(&self.bucket, key);
    }

    /// Directory mtime: the newest cached child if a listing page is warm,
    /// otherwise "now".
    fn virtual_directory_mtime(&self) -> i64 {
        if let Some(S3CachedValue::ListPage(page)) =
            s3_cache().get(LIST_OP, &self.bucket, &self.key, "delimiter=/&page=0")
        {
            if let Some(newest) = page.objects.iter().map(|o| o.mtime).max() {
                return newest;
            }
        }
        chrono::Utc::now().timestamp()
    }

    /// Enumerates every key under this path's prefix (uncached; used by
    /// rmtree where stale results would delete the wrong set).
    fn list_all_keys(&self) -> Result<Vec<String>, VfsError> {
        let api = self.api()?;
        let mut keys = Vec::new();
        let mut token: Option<String> = None;
        loop {
            let page = api.list_objects_page(
                &self.bucket,
                &self.dir_prefix(),
                None,
                token.as_deref(),
                None,
            )?;
            keys.extend(page.objects.into_iter().map(|o| o.key));
            match page.next_token {
                Some(next) => token = Some(next),
                None => break,
            }
        }
        Ok(keys)
    }
}

impl PathBackend for S3PathImpl {
    fn uri(&self) -> String {
        S3Uri {
            bucket: self.bucket.clone(),
            key: self.key.clone(),
        }
        .to_uri()
    }

    fn scheme(&self) -> Scheme {
        Scheme::S3
    }

    fn is_absolute(&self) -> bool {
        true
    }

    fn name(&self) -> String {
        if self.key.is_empty() {
            self.bucket.clone()
        } else {
            self.key.rsplit('/').next().unwrap_or("").to_string()
        }
    }

    fn parent(&self) -> VfsPath {
        if self.key.is_empty() {
            // Bucket root is its own sentinel
            return self.make(String::new(), None);
        }
        let parent_key = match self.key.rsplit_once('/') {
            Some((head, _)) => head.to_string(),
            None => String::new(),
        };
        self.make(parent_key, None)
    }

    fn parts(&self) -> Vec<String> {
        let mut parts = vec![format!("s3://{}/", self.bucket)];
        parts.extend(self.key.split('/').filter(|s| !s.is_empty()).map(String::from));
        parts
    }

    fn anchor(&self) -> String {
        format!("s3://{}/", self.bucket)
    }

    fn join(&self, segment: &str) -> Result<VfsPath, VfsError> {
        let segment = segment.trim_matches('/');
        let key = if self.key.is_empty() {
            segment.to_string()
        } else {
            format!("{}/{}", self.key, segment)
        };
        Ok(self.make(key, None))
    }

    fn exists(&self) -> bool {
        if self.key.is_empty() {
            return true;
        }
        if self.metadata.is_some() {
            return true;
        }
        self.head_cached().is_ok() || self.has_children().unwrap_or(false)
    }

    fn is_dir(&self) -> bool {
        if self.key.is_empty() {
            return true;
        }
        if let Some(meta) = &self.metadata {
            if let Some(is_dir) = meta.is_dir {
                return is_dir;
            }
        }
        self.has_children().unwrap_or(false)
    }

    fn is_file(&self) -> bool {
        if self.key.is_empty() {
            return false;
        }
        if let Some(meta) = &self.metadata {
            if let Some(is_dir) = meta.is_dir {
                return !is_dir;
            }
        }
        self.head_cached().is_ok()
    }

    fn stat(&self) -> Result<PathStat, VfsError> {
        // Bucket root is always a directory
        if self.key.is_empty() {
            return Ok(PathStat::directory(chrono::Utc::now().timestamp()));
        }
        // Listing-sourced metadata avoids the round-trip entirely
        if let Some(meta) = &self.metadata {
            match (meta.is_dir, meta.size, meta.mtime) {
                (Some(true), _, _) => return Ok(PathStat::directory(self.virtual_directory_mtime())),
                (_, Some(size), Some(mtime)) => return Ok(PathStat::file(size, mtime)),
                _ => {}
            }
        }
        if self.is_dir() {
            return Ok(PathStat::directory(self.virtual_directory_mtime()));
        }
        let info = self.head_cached().map_err(|e| match e {
            VfsError::IoError { path, message } if message.to_lowercase().contains("404") => {
                VfsError::NotFound { path }
            }
            other => other,
        })?;
        Ok(PathStat::file(info.size, info.mtime))
    }

    fn iterdir(&self) -> Result<Vec<VfsPath>, VfsError> {
        if !self.key.is_empty() && !self.is_dir() {
            if self.is_file() {
                return Err(VfsError::NotADirectory { path: self.uri() });
            }
            return Err(VfsError::NotFound { path: self.uri() });
        }

        let prefix = self.dir_prefix();
        let mut children = Vec::new();
        let mut page = 0usize;
        let mut token: Option<String> = None;
        loop {
            let page_data = self.list_page_cached(page, token.as_deref())?;
            for dir_prefix in &page_data.common_prefixes {
                let child = self.make(
                    dir_prefix.clone(),
                    Some(PathMetadata {
                        size: None,
                        mtime: None,
                        is_dir: Some(true),
                    }),
                );
                children.push(child);
            }
            for object in &page_data.objects {
                // The directory marker for the listed prefix is not a child
                if object.key == prefix || object.key == self.key {
                    continue;
                }
                let child = self.make(
                    object.key.trim_end_matches('/').to_string(),
                    Some(PathMetadata {
                        size: Some(object.size),
                        mtime: Some(object.mtime),
                        is_dir: Some(object.key.ends_with('/')),
                    }),
                );
                children.push(child);
            }
            match page_data.next_token {
                Some(next) => {
                    token = Some(next);
                    page += 1;
                }
                None => break,
            }
        }
        Ok(children)
    }

    fn read_bytes(&self) -> Result<Vec<u8>, VfsError> {
        self.api()?.get_object(&self.bucket, &self.key)
    }

    fn write_bytes(&self, data: &[u8]) -> Result<(), VfsError> {
        self.api()?.put_object(&self.bucket, &self.key, data.to_vec())?;
        self.invalidate_for_write(&self.key);
        Ok(())
    }

    fn mkdir(&self, _parents: bool, exist_ok: bool) -> Result<(), VfsError> {
        if self.exists() && self.is_dir() {
            return if exist_ok {
                Ok(())
            } else {
                Err(VfsError::FileExists { path: self.uri() })
            };
        }
        // Directories are zero-byte marker objects with a trailing slash
        let marker = format!("{}/", self.key);
        self.api()?.put_object(&self.bucket, &marker, Vec::new())?;
        self.invalidate_for_write(&self.key);
        Ok(())
    }

    fn rmdir(&self) -> Result<(), VfsError> {
        let children = self.iterdir()?;
        if !children.is_empty() {
            return Err(VfsError::io(self.uri(), "directory not empty"));
        }
        let marker = format!("{}/", self.key);
        self.api()?.delete_object(&self.bucket, &marker)?;
        self.invalidate_for_write(&self.key);
        Ok(())
    }

    fn rmtree(&self) -> Result<(), VfsError> {
        if self.is_file() && !self.has_children()? {
            return self.unlink();
        }
        let api = self.api()?;
        let mut keys = self.list_all_keys()?;
        // Include the marker object for this directory itself
        keys.push(format!("{}/", self.key));
        for chunk in keys.chunks(DELETE_BATCH_LIMIT) {
            api.delete_objects(&self.bucket, chunk)?;
        }
        s3_cache().invalidate_prefix(&self.bucket, &self.key);
        self.invalidate_for_write(&self.key);
        Ok(())
    }

    fn unlink(&self) -> Result<(), VfsError> {
        if !self.exists() {
            return Err(VfsError::NotFound { path: self.uri() });
        }
        self.api()?.delete_object(&self.bucket, &self.key)?;
        self.invalidate_for_write(&self.key);
        Ok(())
    }

    fn rename(&self, target: &VfsPath) -> Result<(), VfsError> {
        if self.is_dir() {
            // Directory rename is copy+delete territory, handled a level up
            return Err(VfsError::io(
                self.uri(),
                "S3 cannot rename directories in place",
            ));
        }
        if target.scheme() != Scheme::S3 {
            return Err(VfsError::io(self.uri(), "rename target must be on S3"));
        }
        let S3Uri {
            bucket: dst_bucket,
            key: dst_key,
        } = parse_s3_uri(&target.as_uri())?;
        let api = self.api()?;
        api.copy_object(&self.bucket, &self.key, &dst_bucket, &dst_key)?;
        api.delete_object(&self.bucket, &self.key)?;
        self.invalidate_for_write(&self.key);
        s3_cache().invalidate_key(&dst_bucket, &dst_key);
        Ok(())
    }

    fn touch(&self) -> Result<(), VfsError> {
        if self.exists() {
            return Ok(());
        }
        self.api()?.put_object(&self.bucket, &self.key, Vec::new())?;
        self.invalidate_for_write(&self.key);
        Ok(())
    }

    fn chmod(&self, _mode: u32) -> Result<(), VfsError> {
        // Object stores have no permission bits; succeed silently
        Ok(())
    }

    // ========================================
    // Capability flags
    // ========================================

    fn is_remote(&self) -> bool {
        true
    }

    fn supports_directory_rename(&self) -> bool {
        false
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

    fn search_strategy(&self) -> super::SearchStrategy {
        super::SearchStrategy::Buffered
    }

    fn display_prefix(&self) -> String {
        "S3:".to_string()
    }

    fn display_title(&self) -> String {
        format!("S3: {}/{}", self.bucket, self.key)
    }

    fn extended_metadata(&self) -> ExtendedMetadata {
        let mut details = vec![
            ("Bucket".to_string(), self.bucket.clone()),
            ("Key".to_string(), self.key.clone()),
        ];
        let kind = if self.is_dir() { "s3_directory" } else { "s3_object" };
        if let Ok(stat) = self.stat() {
            if !stat.is_dir {
                details.push(("Size".to_string(), crate::format::format_size(stat.size)));
            }
            let modified = chrono::DateTime::from_timestamp(stat.mtime, 0)
                .map(|t| t.format("%Y-%m-%d %H:%M:%S").to_string())
                .unwrap_or_default();
            details.push(("Modified".to_string(), modified));
        }
        ExtendedMetadata {
            kind: kind.to_string(),
            details,
            format_hint: "table".to_string(),
        }
    }
}
