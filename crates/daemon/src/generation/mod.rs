use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{info, warn};
use uuid::Uuid;

use crate::error::{GenerationError, UploadError};
use crate::provider::{JobStatus, VideoProvider};
use crate::storage::{BlobStore, UploadOptions, UploadResult};
use engine::keys::storage_key_now;
use engine::{FileMetadata, GenerateOptions, VideoReference, VideoResult, DEFAULT_FORMAT};

pub mod poll;
pub mod staging;

use poll::{poll_until, PollPolicy};
use staging::{remove_staged, wait_for_file, Cleanup, FILE_WAIT_INTERVAL, FILE_WAIT_TIMEOUT};

#[derive(Debug, Clone)]
pub struct GenerationSettings {
    pub poll: PollPolicy,
    pub staging_dir: PathBuf,
    pub file_wait_interval: Duration,
    pub file_wait_timeout: Duration,
}

impl GenerationSettings {
    pub fn new(poll: PollPolicy, staging_dir: PathBuf) -> Self {
        GenerationSettings {
            poll,
            staging_dir,
            file_wait_interval: FILE_WAIT_INTERVAL,
            file_wait_timeout: FILE_WAIT_TIMEOUT,
        }
    }
}

/// Drives one prompt through the provider and into blob storage.
pub struct Orchestrator {
    provider: Arc<dyn VideoProvider>,
    blobs: Arc<dyn BlobStore>,
    settings: GenerationSettings,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn VideoProvider>,
        blobs: Arc<dyn BlobStore>,
        settings: GenerationSettings,
    ) -> Self {
        Orchestrator {
            provider,
            blobs,
            settings,
        }
    }

    /// Submit, wait, upload, describe. `prompt` must already be validated.
    ///
    /// Nothing is retried except the single streaming -> disk fallback of
    /// the upload step.
    pub async fn generate(
        &self,
        prompt: &str,
        options: &GenerateOptions,
    ) -> Result<VideoResult, GenerationError> {
        let start = Instant::now();

        let job = self
            .provider
            .submit(prompt, options)
            .await
            .map_err(|e| GenerationError::Provider(e.to_string()))?;
        info!(job = %job.name, "Generation job submitted");

        let finished: JobStatus = poll_until(&self.settings.poll, |attempt| {
            let provider = self.provider.clone();
            let job = job.clone();
            async move {
                let status = provider
                    .poll(&job)
                    .await
                    .map_err(|e| GenerationError::Provider(e.to_string()))?;
                if let Some(message) = status.error {
                    return Err(GenerationError::Provider(message));
                }
                if !status.done {
                    info!(job = %job.name, attempt, "Waiting for video generation to complete");
                    return Ok(None);
                }
                Ok::<_, GenerationError>(Some(status))
            }
        })
        .await?;

        let video = finished
            .videos
            .into_iter()
            .next()
            .ok_or(GenerationError::NoVideo)?;

        let key = storage_key_now();
        let uploaded = self.upload(&video, &key).await?;

        let metadata = self.fetch_metadata(&video).await;

        info!(
            job = %job.name,
            key = %uploaded.key,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "Video generated and stored"
        );

        Ok(VideoResult::assemble(
            prompt,
            &uploaded.key,
            &uploaded.public_url,
            metadata.as_ref(),
        ))
    }

    /// Stream straight from the provider when possible, otherwise (or on
    /// any streaming failure) stage the file on disk exactly once.
    async fn upload(&self, video: &VideoReference, key: &str) -> Result<UploadResult, UploadError> {
        let content_type = video.mime_type().unwrap_or_else(|| DEFAULT_FORMAT.to_string());

        let streaming_error = match video.download_uri() {
            Some(uri) => match self.stream_upload(&uri, key, &content_type).await {
                Ok(uploaded) => return Ok(uploaded),
                Err(e) => {
                    warn!(key = %key, error = %e, "Streaming upload failed, falling back to disk");
                    Some(e)
                }
            },
            None => None,
        };

        let staged = self.disk_upload(video, key, &content_type).await;
        match (staged, streaming_error) {
            (Ok(uploaded), _) => Ok(uploaded),
            (Err(disk), Some(streaming)) => Err(UploadError::Fallback {
                streaming: Box::new(streaming),
                disk: Box::new(disk),
            }),
            (Err(disk), None) => Err(disk),
        }
    }

    async fn stream_upload(
        &self,
        uri: &str,
        key: &str,
        content_type: &str,
    ) -> Result<UploadResult, UploadError> {
        let source = self
            .provider
            .open_stream(uri)
            .await
            .map_err(|e| UploadError::Stream(e.to_string()))?;

        // A chunked response can carry no bytes at all without declaring it
        let mut source = BufReader::new(source);
        let first = source
            .fill_buf()
            .await
            .map_err(|e| UploadError::Stream(e.to_string()))?;
        if first.is_empty() {
            return Err(UploadError::Stream("provider returned an empty body".to_string()));
        }

        Ok(self
            .blobs
            .upload(Box::new(source), key, UploadOptions::new(content_type))
            .await?)
    }

    async fn disk_upload(
        &self,
        video: &VideoReference,
        key: &str,
        content_type: &str,
    ) -> Result<UploadResult, UploadError> {
        let path = self
            .settings
            .staging_dir
            .join(format!("video-{}.mp4", Uuid::new_v4()));

        let uploaded = async {
            self.provider
                .download_to(video, &path)
                .await
                .map_err(|e| UploadError::Download(e.to_string()))?;
            wait_for_file(
                &path,
                self.settings.file_wait_interval,
                self.settings.file_wait_timeout,
            )
            .await?;

            let file = tokio::fs::File::open(&path).await?;
            let len = file.metadata().await?.len();
            let options = UploadOptions::new(content_type).with_length(len);
            Ok::<_, UploadError>(self.blobs.upload(Box::new(file), key, options).await?)
        }
        .await;

        if let Cleanup::Degraded { reason } = remove_staged(&path).await {
            warn!(path = %path.display(), reason = %reason, "Staged file left behind");
        }

        uploaded
    }

    async fn fetch_metadata(&self, video: &VideoReference) -> Option<FileMetadata> {
        let Some(name) = video.file_name() else {
            warn!("Generated video has no file name, skipping metadata");
            return None;
        };

        match self.provider.file_metadata(&name).await {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                warn!(file = %name, error = %e, "Failed to fetch video metadata");
                None
            }
        }
    }
}
