use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::cmp::Ordering;
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod s3;

pub use s3::S3BlobStore;

/// An open byte stream of possibly unknown length.
pub type ByteSource = Box<dyn AsyncRead + Send + Unpin>;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Upload failed: {0}")]
    UploadFailed(String),

    #[error("Failed to sign URL for {key}: {reason}")]
    SignFailed { key: String, reason: String },

    #[error("Listing failed: {0}")]
    ListFailed(String),
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone)]
pub struct UploadOptions {
    pub content_type: String,
    pub content_length: Option<u64>,
}

impl UploadOptions {
    pub fn new(content_type: impl Into<String>) -> Self {
        UploadOptions {
            content_type: content_type.into(),
            content_length: None,
        }
    }

    pub fn with_length(mut self, len: u64) -> Self {
        self.content_length = Some(len);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct UploadResult {
    pub key: String,
    pub signed_url: String,
    pub public_url: String,
    pub bucket: String,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StoredObject {
    pub key: String,
    pub signed_url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

/// Object storage for generated videos.
#[async_trait]
pub trait BlobStore: Send + Sync {
    /// Upload everything `source` yields under `key`. Sources of unknown
    /// length must be accepted without buffering the whole payload.
    async fn upload(
        &self,
        source: ByteSource,
        key: &str,
        options: UploadOptions,
    ) -> StorageResult<UploadResult>;

    /// Time-limited read URL. `ttl_secs` is clamped into the allowed range.
    async fn sign(&self, key: &str, ttl_secs: u64) -> StorageResult<String>;

    /// Every object under `prefix`, newest first.
    async fn list(&self, prefix: &str, ttl_secs: u64) -> StorageResult<Vec<StoredObject>>;
}

/// Sort by last-modified descending; objects without a timestamp go last.
pub fn sort_newest_first(objects: &mut [StoredObject]) {
    objects.sort_by(|a, b| match (a.last_modified, b.last_modified) {
        (Some(a), Some(b)) => b.cmp(&a),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });
}
