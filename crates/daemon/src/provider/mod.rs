use anyhow::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::storage::ByteSource;
use engine::{FileMetadata, GenerateOptions, VideoReference};

pub mod google;

pub use google::GoogleVideoProvider;

/// Opaque reference to a provider-side generation job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobHandle {
    pub name: String,
}

/// Snapshot of a job as reported by one poll.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct JobStatus {
    pub done: bool,
    pub error: Option<String>,
    pub videos: Vec<VideoReference>,
}

/// The generative-video provider, treated as an async job API.
#[async_trait]
pub trait VideoProvider: Send + Sync {
    async fn submit(&self, prompt: &str, options: &GenerateOptions) -> Result<JobHandle>;

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus>;

    async fn file_metadata(&self, name: &str) -> Result<FileMetadata>;

    /// Open the bytes behind a download URI. Fails on non-2xx responses.
    async fn open_stream(&self, uri: &str) -> Result<ByteSource>;

    /// Materialise the video at `path` on local disk.
    async fn download_to(&self, video: &VideoReference, path: &Path) -> Result<()>;
}
