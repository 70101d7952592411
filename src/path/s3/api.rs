//! Blocking facade over the S3 API.
//!
//! The rest of the crate is synchronous and thread-based, so the async AWS
//! SDK is driven on one shared runtime behind the `S3Api` trait. The trait
//! also admits `InMemoryS3Api`, an in-process fake used by tests and by
//! hosts that want to exercise the S3 code path without a network.

use crate::error::VfsError;
use crate::ignore_poison::IgnorePoison;
use std::collections::BTreeMap;
use std::collections::HashMap;
use std::sync::{Arc, LazyLock, Mutex};

/// Metadata for one object, as returned by head/list calls.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct S3ObjectInfo {
    pub key: String,
    pub size: u64,
    /// Last-modified time (Unix timestamp in seconds).
    pub mtime: i64,
    pub etag: Option<String>,
}

/// One page of a `list_objects_v2` response.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct ListPage {
    pub objects: Vec<S3ObjectInfo>,
    /// Directory-like prefixes when a delimiter was requested (no trailing `/`).
    pub common_prefixes: Vec<String>,
    pub next_token: Option<String>,
}

/// S3 bulk delete limit per request.
pub const DELETE_BATCH_LIMIT: usize = 1000;

/// Blocking S3 operations used by the S3 path backend.
pub trait S3Api: Send + Sync {
    fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
        max_keys: Option<i32>,
    ) -> Result<ListPage, VfsError>;

    fn head_object(&self, bucket: &str, key: &str) -> Result<S3ObjectInfo, VfsError>;
    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, VfsError>;
    fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), VfsError>;
    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), VfsError>;

    /// Deletes up to [`DELETE_BATCH_LIMIT`] keys in one request.
    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), VfsError>;

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), VfsError>;
}

// ============================================================================
// Client registry
// ============================================================================

static S3_API: Mutex<Option<Arc<dyn S3Api>>> = Mutex::new(None);

/// Returns the process-wide S3 client, building the AWS-backed one lazily.
pub fn s3_api() -> Result<Arc<dyn S3Api>, VfsError> {
    let mut slot = S3_API.lock_ignore_poison();
    if let Some(api) = slot.as_ref() {
        return Ok(Arc::clone(api));
    }
    let api: Arc<dyn S3Api> = Arc::new(AwsS3Api::connect()?);
    *slot = Some(Arc::clone(&api));
    Ok(api)
}

/// Installs an explicit client (tests, custom endpoints).
pub fn set_s3_api(api: Arc<dyn S3Api>) {
    *S3_API.lock_ignore_poison() = Some(api);
}

/// Drops the installed client; the next use reconnects.
pub fn shutdown_s3_api() {
    *S3_API.lock_ignore_poison() = None;
}

// ============================================================================
// AWS SDK implementation
// ============================================================================

static RUNTIME: LazyLock<tokio::runtime::Runtime> = LazyLock::new(|| {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .thread_name("tfm-s3")
        .enable_all()
        .build()
        .expect("failed to start S3 runtime")
});

/// `S3Api` over the AWS SDK, blocking on a shared runtime.
pub struct AwsS3Api {
    client: aws_sdk_s3::Client,
}

impl AwsS3Api {
    /// Builds a client from the default credential/region chain.
    pub fn connect() -> Result<AwsS3Api, VfsError> {
        let config = RUNTIME.block_on(async {
            aws_config::defaults(aws_config::BehaviorVersion::latest())
                .load()
                .await
        });
        if config.region().is_none() {
            return Err(VfsError::ConfigurationError {
                message: "no AWS region configured".to_string(),
            });
        }
        Ok(AwsS3Api {
            client: aws_sdk_s3::Client::new(&config),
        })
    }
}

/// Maps an SDK error to the crate taxonomy using its display text.
fn map_sdk_error(key: &str, err: impl std::fmt::Display + std::fmt::Debug) -> VfsError {
    let text = format!("{} ({:?})", err, err);
    let lower = text.to_lowercase();
    if lower.contains("nosuchkey") || lower.contains("notfound") || lower.contains("404") {
        VfsError::NotFound { path: key.to_string() }
    } else if lower.contains("accessdenied") || lower.contains("403") {
        VfsError::PermissionDenied {
            path: key.to_string(),
            message: text,
        }
    } else if lower.contains("credential") {
        VfsError::ConfigurationError { message: text }
    } else {
        VfsError::IoError {
            path: key.to_string(),
            message: text,
        }
    }
}

impl S3Api for AwsS3Api {
    fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
        max_keys: Option<i32>,
    ) -> Result<ListPage, VfsError> {
        let output = RUNTIME
            .block_on(
                self.client
                    .list_objects_v2()
                    .bucket(bucket)
                    .prefix(prefix)
                    .set_delimiter(delimiter.map(String::from))
                    .set_continuation_token(continuation.map(String::from))
                    .set_max_keys(max_keys)
                    .send(),
            )
            .map_err(|e| map_sdk_error(prefix, e))?;

        let objects = output
            .contents()
            .iter()
            .filter_map(|obj| {
                Some(S3ObjectInfo {
                    key: obj.key()?.to_string(),
                    size: obj.size().unwrap_or(0).max(0) as u64,
                    mtime: obj.last_modified().map(|t| t.secs()).unwrap_or(0),
                    etag: obj.e_tag().map(String::from),
                })
            })
            .collect();
        let common_prefixes = output
            .common_prefixes()
            .iter()
            .filter_map(|p| p.prefix())
            .map(|p| p.trim_end_matches('/').to_string())
            .collect();
        Ok(ListPage {
            objects,
            common_prefixes,
            next_token: output.next_continuation_token().map(String::from),
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<S3ObjectInfo, VfsError> {
        let output = RUNTIME
            .block_on(self.client.head_object().bucket(bucket).key(key).send())
            .map_err(|e| map_sdk_error(key, e))?;
        Ok(S3ObjectInfo {
            key: key.to_string(),
            size: output.content_length().unwrap_or(0).max(0) as u64,
            mtime: output.last_modified().map(|t| t.secs()).unwrap_or(0),
            etag: output.e_tag().map(String::from),
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, VfsError> {
        RUNTIME.block_on(async {
            let output = self
                .client
                .get_object()
                .bucket(bucket)
                .key(key)
                .send()
                .await
                .map_err(|e| map_sdk_error(key, e))?;
            let bytes = output
                .body
                .collect()
                .await
                .map_err(|e| VfsError::io(key, e.to_string()))?;
            Ok(bytes.into_bytes().to_vec())
        })
    }

    fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), VfsError> {
        RUNTIME
            .block_on(
                self.client
                    .put_object()
                    .bucket(bucket)
                    .key(key)
                    .body(aws_sdk_s3::primitives::ByteStream::from(body))
                    .send(),
            )
            .map(|_| ())
            .map_err(|e| map_sdk_error(key, e))
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), VfsError> {
        RUNTIME
            .block_on(self.client.delete_object().bucket(bucket).key(key).send())
            .map(|_| ())
            .map_err(|e| map_sdk_error(key, e))
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), VfsError> {
        use aws_sdk_s3::types::{Delete, ObjectIdentifier};
        let mut identifiers = Vec::with_capacity(keys.len());
        for key in keys {
            identifiers.push(
                ObjectIdentifier::builder()
                    .key(key)
                    .build()
                    .map_err(|e| VfsError::io(key.as_str(), e.to_string()))?,
            );
        }
        let delete = Delete::builder()
            .set_objects(Some(identifiers))
            .quiet(true)
            .build()
            .map_err(|e| VfsError::io(bucket, e.to_string()))?;
        RUNTIME
            .block_on(
                self.client
                    .delete_objects()
                    .bucket(bucket)
                    .delete(delete)
                    .send(),
            )
            .map(|_| ())
            .map_err(|e| map_sdk_error(bucket, e))
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), VfsError> {
        RUNTIME
            .block_on(
                self.client
                    .copy_object()
                    .copy_source(format!("{}/{}", src_bucket, src_key))
                    .bucket(dst_bucket)
                    .key(dst_key)
                    .send(),
            )
            .map(|_| ())
            .map_err(|e| map_sdk_error(src_key, e))
    }
}

// ============================================================================
// In-memory implementation
// ============================================================================

#[derive(Debug, Clone)]
struct StoredObject {
    data: Vec<u8>,
    mtime: i64,
}

/// In-process S3 fake with real list/delimiter semantics and per-bucket call
/// counters, so cache behavior is observable even when tests share one
/// process-wide client.
#[derive(Default)]
pub struct InMemoryS3Api {
    /// (bucket, key) → object, ordered so listings come back lexicographic.
    objects: Mutex<BTreeMap<(String, String), StoredObject>>,
    /// (operation, bucket) → count of API calls issued.
    calls: Mutex<HashMap<(&'static str, String), u64>>,
}

impl InMemoryS3Api {
    pub fn new() -> InMemoryS3Api {
        InMemoryS3Api::default()
    }

    /// Seeds an object directly, bypassing the call counters.
    pub fn seed(&self, bucket: &str, key: &str, data: &[u8]) {
        self.objects.lock_ignore_poison().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: data.to_vec(),
                mtime: chrono::Utc::now().timestamp(),
            },
        );
    }

    pub fn contains(&self, bucket: &str, key: &str) -> bool {
        self.objects
            .lock_ignore_poison()
            .contains_key(&(bucket.to_string(), key.to_string()))
    }

    pub fn object_data(&self, bucket: &str, key: &str) -> Option<Vec<u8>> {
        self.objects
            .lock_ignore_poison()
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
    }

    fn record_call(&self, operation: &'static str, bucket: &str) {
        *self
            .calls
            .lock_ignore_poison()
            .entry((operation, bucket.to_string()))
            .or_insert(0) += 1;
    }

    /// API calls of one operation issued against one bucket.
    pub fn call_count(&self, operation: &str, bucket: &str) -> u64 {
        self.calls
            .lock_ignore_poison()
            .iter()
            .filter(|((op, b), _)| *op == operation && b == bucket)
            .map(|(_, count)| *count)
            .sum()
    }
}

impl S3Api for InMemoryS3Api {
    fn list_objects_page(
        &self,
        bucket: &str,
        prefix: &str,
        delimiter: Option<&str>,
        continuation: Option<&str>,
        max_keys: Option<i32>,
    ) -> Result<ListPage, VfsError> {
        self.record_call("list_objects_v2", bucket);
        let objects = self.objects.lock_ignore_poison();
        let max_keys = max_keys.unwrap_or(1000).max(1) as usize;
        let start_index: usize = continuation.and_then(|t| t.parse().ok()).unwrap_or(0);

        let mut page_objects = Vec::new();
        let mut prefixes: Vec<String> = Vec::new();
        let mut matched = 0usize;
        let mut next_token = None;

        for ((obj_bucket, key), stored) in objects.iter() {
            if obj_bucket != bucket || !key.starts_with(prefix) {
                continue;
            }
            let remainder = &key[prefix.len()..];
            let grouped = delimiter
                .and_then(|d| remainder.split_once(d))
                .map(|(head, _)| format!("{}{}", prefix, head));
            if let Some(group) = grouped {
                if !prefixes.contains(&group) {
                    if matched >= start_index + max_keys {
                        next_token = Some(matched.to_string());
                        break;
                    }
                    if matched >= start_index {
                        prefixes.push(group);
                    }
                    matched += 1;
                }
                continue;
            }
            if matched >= start_index + max_keys {
                next_token = Some(matched.to_string());
                break;
            }
            if matched >= start_index {
                page_objects.push(S3ObjectInfo {
                    key: key.clone(),
                    size: stored.data.len() as u64,
                    mtime: stored.mtime,
                    etag: None,
                });
            }
            matched += 1;
        }

        Ok(ListPage {
            objects: page_objects,
            common_prefixes: prefixes,
            next_token,
        })
    }

    fn head_object(&self, bucket: &str, key: &str) -> Result<S3ObjectInfo, VfsError> {
        self.record_call("head_object", bucket);
        let objects = self.objects.lock_ignore_poison();
        let stored = objects
            .get(&(bucket.to_string(), key.to_string()))
            .ok_or_else(|| VfsError::NotFound {
                path: format!("s3://{}/{}", bucket, key),
            })?;
        Ok(S3ObjectInfo {
            key: key.to_string(),
            size: stored.data.len() as u64,
            mtime: stored.mtime,
            etag: None,
        })
    }

    fn get_object(&self, bucket: &str, key: &str) -> Result<Vec<u8>, VfsError> {
        self.record_call("get_object", bucket);
        let objects = self.objects.lock_ignore_poison();
        objects
            .get(&(bucket.to_string(), key.to_string()))
            .map(|o| o.data.clone())
            .ok_or_else(|| VfsError::NotFound {
                path: format!("s3://{}/{}", bucket, key),
            })
    }

    fn put_object(&self, bucket: &str, key: &str, body: Vec<u8>) -> Result<(), VfsError> {
        self.record_call("put_object", bucket);
        self.objects.lock_ignore_poison().insert(
            (bucket.to_string(), key.to_string()),
            StoredObject {
                data: body,
                mtime: chrono::Utc::now().timestamp(),
            },
        );
        Ok(())
    }

    fn delete_object(&self, bucket: &str, key: &str) -> Result<(), VfsError> {
        self.record_call("delete_object", bucket);
        self.objects
            .lock_ignore_poison()
            .remove(&(bucket.to_string(), key.to_string()));
        Ok(())
    }

    fn delete_objects(&self, bucket: &str, keys: &[String]) -> Result<(), VfsError> {
        if keys.len() > DELETE_BATCH_LIMIT {
            return Err(VfsError::io(
                bucket,
                format!("delete batch of {} exceeds the S3 limit", keys.len()),
            ));
        }
        self.record_call("delete_object", bucket);
        let mut objects = self.objects.lock_ignore_poison();
        for key in keys {
            objects.remove(&(bucket.to_string(), key.clone()));
        }
        Ok(())
    }

    fn copy_object(
        &self,
        src_bucket: &str,
        src_key: &str,
        dst_bucket: &str,
        dst_key: &str,
    ) -> Result<(), VfsError> {
        let mut objects = self.objects.lock_ignore_poison();
        let source = objects
            .get(&(src_bucket.to_string(), src_key.to_string()))
            .cloned()
            .ok_or_else(|| VfsError::NotFound {
                path: format!("s3://{}/{}", src_bucket, src_key),
            })?;
        objects.insert((dst_bucket.to_string(), dst_key.to_string()), source);
        Ok(())
    }
}
