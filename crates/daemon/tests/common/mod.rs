#![allow(dead_code)]

use anyhow::{bail, Result};
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{Request, StatusCode};
use axum::Router;
use chrono::{DateTime, Utc};
use http_body_util::BodyExt;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncReadExt;
use tower::ServiceExt;

use daemon::api::{self, AppState};
use daemon::db::MetadataStore;
use daemon::generation::poll::PollPolicy;
use daemon::generation::{GenerationSettings, Orchestrator};
use daemon::provider::{JobHandle, JobStatus, VideoProvider};
use daemon::storage::{
    sort_newest_first, BlobStore, ByteSource, StorageError, StorageResult, StoredObject,
    UploadOptions, UploadResult,
};
use engine::{FileMetadata, GenerateOptions, Provenance, VideoReference};

pub const VIDEO_BYTES: &[u8] = b"\x00\x00\x00\x18ftypmp42fake-video-payload";

/// Scripted provider. Every knob defaults to the happy path.
pub struct FakeProvider {
    /// `None` means the job never finishes.
    pub polls_until_done: Option<u32>,
    pub job_error: Option<String>,
    pub videos: Vec<VideoReference>,
    pub stream_fails: bool,
    /// Stream opens fine but yields no bytes.
    pub stream_empty: bool,
    pub download_fails: bool,
    pub metadata_fails: bool,
    pub polls: AtomicU32,
    pub streams: AtomicU32,
    pub downloads: AtomicU32,
}

impl FakeProvider {
    pub fn new() -> Self {
        FakeProvider {
            polls_until_done: Some(2),
            job_error: None,
            videos: vec![sample_video()],
            stream_fails: false,
            stream_empty: false,
            download_fails: false,
            metadata_fails: false,
            polls: AtomicU32::new(0),
            streams: AtomicU32::new(0),
            downloads: AtomicU32::new(0),
        }
    }

    pub fn polls(&self) -> u32 {
        self.polls.load(Ordering::SeqCst)
    }

    pub fn streams(&self) -> u32 {
        self.streams.load(Ordering::SeqCst)
    }

    pub fn downloads(&self) -> u32 {
        self.downloads.load(Ordering::SeqCst)
    }
}

pub fn sample_video() -> VideoReference {
    VideoReference::new(json!({
        "name": "files/abc123",
        "uri": "https://generativelanguage.googleapis.com/v1beta/files/abc123:download?alt=media",
        "mimeType": "video/mp4"
    }))
}

#[async_trait]
impl VideoProvider for FakeProvider {
    async fn submit(&self, prompt: &str, _options: &GenerateOptions) -> Result<JobHandle> {
        Ok(JobHandle {
            name: format!("operations/fake-{}", prompt.len()),
        })
    }

    async fn poll(&self, _job: &JobHandle) -> Result<JobStatus> {
        let attempt = self.polls.fetch_add(1, Ordering::SeqCst) + 1;
        if let Some(message) = &self.job_error {
            return Ok(JobStatus {
                done: true,
                error: Some(message.clone()),
                videos: Vec::new(),
            });
        }
        match self.polls_until_done {
            Some(target) if attempt >= target => Ok(JobStatus {
                done: true,
                error: None,
                videos: self.videos.clone(),
            }),
            _ => Ok(JobStatus::default()),
        }
    }

    async fn file_metadata(&self, name: &str) -> Result<FileMetadata> {
        if self.metadata_fails {
            bail!("metadata lookup failed for {name}");
        }
        Ok(FileMetadata {
            state: Some("ACTIVE".to_string()),
            provenance: Provenance {
                provider_name: Some(format!("files/{name}")),
                mime_type: Some("video/mp4".to_string()),
                duration_seconds: Some(8.0),
                source: Some("GENERATED".to_string()),
                ..Provenance::default()
            },
        })
    }

    async fn open_stream(&self, _uri: &str) -> Result<ByteSource> {
        self.streams.fetch_add(1, Ordering::SeqCst);
        if self.stream_fails {
            bail!("Failed to stream video: 403 Forbidden");
        }
        if self.stream_empty {
            return Ok(Box::new(tokio::io::empty()));
        }
        Ok(Box::new(std::io::Cursor::new(VIDEO_BYTES.to_vec())))
    }

    async fn download_to(&self, _video: &VideoReference, path: &Path) -> Result<()> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        if self.download_fails {
            bail!("download refused");
        }
        tokio::fs::write(path, VIDEO_BYTES).await?;
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct StoredBlob {
    pub bytes: Vec<u8>,
    pub options: UploadOptions,
    pub uploaded_at: DateTime<Utc>,
}

/// In-memory bucket that records every TTL it was asked to sign with.
#[derive(Default)]
pub struct MemoryBlobStore {
    pub objects: Mutex<BTreeMap<String, StoredBlob>>,
    pub signed_ttls: Mutex<Vec<u64>>,
    pub fail_uploads: bool,
    pub fail_signing: bool,
}

impl MemoryBlobStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn keys(&self) -> Vec<String> {
        self.objects.lock().unwrap().keys().cloned().collect()
    }

    pub fn blob(&self, key: &str) -> Option<StoredBlob> {
        self.objects.lock().unwrap().get(key).cloned()
    }

    pub fn signed_ttls(&self) -> Vec<u64> {
        self.signed_ttls.lock().unwrap().clone()
    }

    pub fn insert(&self, key: &str, bytes: &[u8], uploaded_at: DateTime<Utc>) {
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredBlob {
                bytes: bytes.to_vec(),
                options: UploadOptions::new("video/mp4"),
                uploaded_at,
            },
        );
    }

    fn url(key: &str, ttl_secs: u64) -> String {
        format!("https://bucket.test/{key}?X-Amz-Expires={ttl_secs}")
    }
}

#[async_trait]
impl BlobStore for MemoryBlobStore {
    async fn upload(
        &self,
        mut source: ByteSource,
        key: &str,
        options: UploadOptions,
    ) -> StorageResult<UploadResult> {
        let mut bytes = Vec::new();
        source
            .read_to_end(&mut bytes)
            .await
            .map_err(|e| StorageError::UploadFailed(e.to_string()))?;
        if self.fail_uploads {
            return Err(StorageError::UploadFailed("bucket rejected the object".into()));
        }
        self.objects.lock().unwrap().insert(
            key.to_string(),
            StoredBlob {
                bytes,
                options,
                uploaded_at: Utc::now(),
            },
        );
        Ok(UploadResult {
            key: key.to_string(),
            signed_url: Self::url(key, 3600),
            public_url: format!("https://bucket.test/{key}"),
            bucket: "test-bucket".to_string(),
        })
    }

    async fn sign(&self, key: &str, ttl_secs: u64) -> StorageResult<String> {
        self.signed_ttls.lock().unwrap().push(ttl_secs);
        if self.fail_signing {
            return Err(StorageError::SignFailed {
                key: key.to_string(),
                reason: "credentials expired".into(),
            });
        }
        Ok(Self::url(key, ttl_secs))
    }

    async fn list(&self, prefix: &str, ttl_secs: u64) -> StorageResult<Vec<StoredObject>> {
        let mut objects: Vec<StoredObject> = self
            .objects
            .lock()
            .unwrap()
            .iter()
            .filter(|(key, _)| key.starts_with(prefix))
            .map(|(key, blob)| StoredObject {
                key: key.clone(),
                signed_url: Self::url(key, ttl_secs),
                size: Some(blob.bytes.len() as i64),
                last_modified: Some(blob.uploaded_at),
            })
            .collect();
        sort_newest_first(&mut objects);
        Ok(objects)
    }
}

pub struct TestApp {
    pub router: Router,
    pub db: Arc<MetadataStore>,
    pub blobs: Arc<MemoryBlobStore>,
    pub provider: Arc<FakeProvider>,
    pub staging: TempDir,
}

pub fn settings(poll: PollPolicy, staging: &TempDir) -> GenerationSettings {
    let mut settings = GenerationSettings::new(poll, staging.path().to_path_buf());
    settings.file_wait_interval = Duration::from_millis(5);
    settings.file_wait_timeout = Duration::from_millis(500);
    settings
}

pub fn test_app(provider: FakeProvider, blobs: MemoryBlobStore, poll: PollPolicy) -> TestApp {
    let db = Arc::new(MetadataStore::open_in_memory().expect("in-memory store"));
    test_app_with_db(provider, blobs, poll, db)
}

pub fn test_app_with_db(
    provider: FakeProvider,
    blobs: MemoryBlobStore,
    poll: PollPolicy,
    db: Arc<MetadataStore>,
) -> TestApp {
    let staging = TempDir::new().expect("staging dir");
    let provider = Arc::new(provider);
    let blobs = Arc::new(blobs);
    let orchestrator = Arc::new(Orchestrator::new(
        provider.clone(),
        blobs.clone(),
        settings(poll, &staging),
    ));

    let state = AppState {
        db: db.clone(),
        blobs: blobs.clone(),
        orchestrator,
        environment: "test".to_string(),
    };

    TestApp {
        router: api::app(state, &["*".to_string()]),
        db,
        blobs,
        provider,
        staging,
    }
}

pub fn post_json(uri: &str, body: Value) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri(uri)
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn get(uri: &str) -> Request<Body> {
    Request::builder().uri(uri).body(Body::empty()).unwrap()
}

pub async fn send(router: &Router, request: Request<Body>) -> (StatusCode, Value) {
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let body = serde_json::from_slice(&bytes).unwrap_or(Value::Null);
    (status, body)
}
