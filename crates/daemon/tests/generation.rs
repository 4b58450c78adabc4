mod common;

use serde_json::json;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

use common::*;
use daemon::error::{GenerationError, UploadError};
use daemon::generation::poll::PollPolicy;
use daemon::generation::Orchestrator;
use engine::keys::is_generated_key;
use engine::{GenerateOptions, VideoReference};

struct Harness {
    orchestrator: Orchestrator,
    provider: Arc<FakeProvider>,
    blobs: Arc<MemoryBlobStore>,
    staging: TempDir,
}

fn harness(provider: FakeProvider, blobs: MemoryBlobStore, poll: PollPolicy) -> Harness {
    let staging = TempDir::new().unwrap();
    let provider = Arc::new(provider);
    let blobs = Arc::new(blobs);
    let orchestrator = Orchestrator::new(provider.clone(), blobs.clone(), settings(poll, &staging));
    Harness {
        orchestrator,
        provider,
        blobs,
        staging,
    }
}

fn fast_poll() -> PollPolicy {
    PollPolicy::unbounded(Duration::from_millis(5))
}

fn staged_files(staging: &TempDir) -> usize {
    std::fs::read_dir(staging.path()).unwrap().count()
}

#[tokio::test]
async fn streaming_failure_falls_back_to_disk_once() {
    let mut provider = FakeProvider::new();
    provider.stream_fails = true;
    let h = harness(provider, MemoryBlobStore::new(), fast_poll());

    let result = h
        .orchestrator
        .generate("a paper boat", &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(h.provider.streams(), 1);
    assert_eq!(h.provider.downloads(), 1);

    let blob = h.blobs.blob(&result.storage_key).unwrap();
    assert_eq!(blob.bytes, VIDEO_BYTES);
    assert_eq!(blob.options.content_length, Some(VIDEO_BYTES.len() as u64));
    assert_eq!(blob.options.content_type, "video/mp4");
    assert_eq!(staged_files(&h.staging), 0);
}

#[tokio::test]
async fn empty_stream_falls_back_to_disk() {
    let mut provider = FakeProvider::new();
    provider.stream_empty = true;
    let h = harness(provider, MemoryBlobStore::new(), fast_poll());

    let result = h
        .orchestrator
        .generate("an empty sky", &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(h.provider.streams(), 1);
    assert_eq!(h.provider.downloads(), 1);
    let blob = h.blobs.blob(&result.storage_key).unwrap();
    assert_eq!(blob.bytes, VIDEO_BYTES);
    assert_eq!(h.blobs.keys().len(), 1);
}

#[tokio::test]
async fn streaming_upload_does_not_touch_disk() {
    let h = harness(FakeProvider::new(), MemoryBlobStore::new(), fast_poll());

    let result = h
        .orchestrator
        .generate("waves", &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(h.provider.downloads(), 0);
    let blob = h.blobs.blob(&result.storage_key).unwrap();
    assert_eq!(blob.options.content_length, None);
}

#[tokio::test]
async fn video_without_uri_goes_straight_to_disk() {
    let mut provider = FakeProvider::new();
    provider.videos = vec![VideoReference::new(json!({ "name": "files/xyz" }))];
    let h = harness(provider, MemoryBlobStore::new(), fast_poll());

    h.orchestrator
        .generate("mountains", &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(h.provider.streams(), 0);
    assert_eq!(h.provider.downloads(), 1);
}

#[tokio::test]
async fn both_upload_paths_failing_reports_both() {
    let mut provider = FakeProvider::new();
    provider.stream_fails = true;
    let blobs = MemoryBlobStore {
        fail_uploads: true,
        ..MemoryBlobStore::default()
    };
    let h = harness(provider, blobs, fast_poll());

    let err = h
        .orchestrator
        .generate("a comet", &GenerateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        GenerationError::Upload(UploadError::Fallback { .. })
    ));
    assert!(err.to_string().contains("403 Forbidden"));
    assert_eq!(h.provider.downloads(), 1);
    // The staged file is removed even when its upload fails.
    assert_eq!(staged_files(&h.staging), 0);
}

#[tokio::test]
async fn finished_job_without_video_is_an_error() {
    let mut provider = FakeProvider::new();
    provider.videos.clear();
    let h = harness(provider, MemoryBlobStore::new(), fast_poll());

    let err = h
        .orchestrator
        .generate("nothing", &GenerateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::NoVideo));
    assert!(h.blobs.keys().is_empty());
}

#[tokio::test]
async fn metadata_failure_is_not_fatal() {
    let mut provider = FakeProvider::new();
    provider.metadata_fails = true;
    let h = harness(provider, MemoryBlobStore::new(), fast_poll());

    let result = h
        .orchestrator
        .generate("a lighthouse", &GenerateOptions::default())
        .await
        .unwrap();

    assert_eq!(result.status, "ACTIVE");
    assert_eq!(result.provenance.duration_seconds, None);
    assert!(is_generated_key(&result.storage_key));
}

#[tokio::test(start_paused = true)]
async fn unfinished_job_keeps_polling() {
    let mut provider = FakeProvider::new();
    provider.polls_until_done = None;
    let h = harness(provider, MemoryBlobStore::new(), PollPolicy::default());

    let outcome = tokio::time::timeout(
        Duration::from_secs(300),
        h.orchestrator.generate("forever", &GenerateOptions::default()),
    )
    .await;

    assert!(outcome.is_err(), "generation should still be waiting");
    assert!(h.provider.polls() >= 30);
    assert!(h.blobs.keys().is_empty());
}

#[tokio::test(start_paused = true)]
async fn bounded_polling_gives_up() {
    let mut provider = FakeProvider::new();
    provider.polls_until_done = None;
    let h = harness(
        provider,
        MemoryBlobStore::new(),
        PollPolicy::bounded(Duration::from_secs(10), 3),
    );

    let err = h
        .orchestrator
        .generate("forever", &GenerateOptions::default())
        .await
        .unwrap_err();

    assert!(matches!(err, GenerationError::PollExhausted(ref e) if e.attempts == 3));
    assert_eq!(h.provider.polls(), 3);
}
