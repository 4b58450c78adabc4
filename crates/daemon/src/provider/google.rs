use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use reqwest::{RequestBuilder, Response, Url};
use serde::Deserialize;
use serde_json::Value;
use std::io;
use std::path::Path;
use tokio::io::AsyncWriteExt;
use tokio_util::io::StreamReader;
use tracing::debug;

use super::{JobHandle, JobStatus, VideoProvider};
use crate::config::ProviderConfig;
use crate::storage::ByteSource;
use engine::{is_provider_host, FileMetadata, GenerateOptions, Provenance, VideoReference};

const API_KEY_HEADER: &str = "x-goog-api-key";

/// Video generation through the Generative Language REST API.
pub struct GoogleVideoProvider {
    client: reqwest::Client,
    config: ProviderConfig,
}

impl GoogleVideoProvider {
    pub fn new(config: ProviderConfig) -> Self {
        GoogleVideoProvider {
            client: reqwest::Client::new(),
            config,
        }
    }

    fn endpoint(&self, path: &str) -> String {
        format!(
            "{}/{}",
            self.config.base_url.trim_end_matches('/'),
            path.trim_start_matches('/')
        )
    }

    /// API calls always carry the key.
    fn api(&self, request: RequestBuilder) -> RequestBuilder {
        request.header(API_KEY_HEADER, &self.config.api_key)
    }

    /// Downloads only carry the key when the host belongs to the provider,
    /// so it never leaks to third-party or pre-signed URLs.
    fn download(&self, url: &Url) -> RequestBuilder {
        let request = self.client.get(url.clone());
        if url.host_str().is_some_and(is_provider_host) {
            request.header(API_KEY_HEADER, &self.config.api_key)
        } else {
            request
        }
    }

    async fn json(response: Response) -> Result<Value> {
        let status = response.status();
        if status.is_success() {
            Ok(response.json().await?)
        } else {
            let error_text = response
                .text()
                .await
                .unwrap_or_else(|_| "Unknown error".to_string());
            Err(anyhow!("Provider API error: {} - {}", status, error_text))
        }
    }
}

#[async_trait]
impl VideoProvider for GoogleVideoProvider {
    async fn submit(&self, prompt: &str, _options: &GenerateOptions) -> Result<JobHandle> {
        let url = self.endpoint(&format!("models/{}:predictLongRunning", self.config.model));
        let response = self
            .api(self.client.post(&url))
            .json(&serde_json::json!({
                "instances": [{ "prompt": prompt }]
            }))
            .send()
            .await?;

        let body = Self::json(response).await?;
        let name = body
            .get("name")
            .and_then(Value::as_str)
            .ok_or_else(|| anyhow!("Invalid response format: missing operation name"))?;

        debug!(operation = %name, "Submitted generation job");
        Ok(JobHandle {
            name: name.to_string(),
        })
    }

    async fn poll(&self, job: &JobHandle) -> Result<JobStatus> {
        let response = self.api(self.client.get(self.endpoint(&job.name))).send().await?;
        let body = Self::json(response).await?;
        Ok(parse_operation(&body))
    }

    async fn file_metadata(&self, name: &str) -> Result<FileMetadata> {
        let name = name.strip_prefix("files/").unwrap_or(name);
        let response = self
            .api(self.client.get(self.endpoint(&format!("files/{}", name))))
            .send()
            .await?;
        let body = Self::json(response).await?;
        let file: FileResource =
            serde_json::from_value(body).context("Unexpected file metadata format")?;
        Ok(file.into())
    }

    async fn open_stream(&self, uri: &str) -> Result<ByteSource> {
        let url = Url::parse(uri).with_context(|| format!("Invalid download URI: {}", uri))?;
        let response = self.download(&url).send().await?;

        let status = response.status();
        if !status.is_success() {
            bail!("Provider download returned {}", status);
        }
        if response.content_length() == Some(0) {
            bail!("Provider download returned an empty body");
        }

        let stream = response
            .bytes_stream()
            .map_err(|e| io::Error::new(io::ErrorKind::Other, e));
        Ok(Box::new(StreamReader::new(Box::pin(stream))))
    }

    async fn download_to(&self, video: &VideoReference, path: &Path) -> Result<()> {
        let uri = match video.download_uri() {
            Some(uri) => uri,
            None => {
                let name = video
                    .file_name()
                    .context("Video has neither a download URI nor a file name")?;
                self.endpoint(&format!("files/{}:download?alt=media", name))
            }
        };

        // Write next to the target and rename, so the file only appears once complete
        let partial = path.with_extension("part");
        let written = async {
            let mut reader = self.open_stream(&uri).await?;
            let mut file = tokio::fs::File::create(&partial).await?;
            tokio::io::copy(&mut reader, &mut file).await?;
            file.flush().await?;
            tokio::fs::rename(&partial, path).await?;
            Ok::<_, anyhow::Error>(())
        }
        .await;

        if written.is_err() {
            let _ = tokio::fs::remove_file(&partial).await;
        }
        written
    }
}

/// Read a long-running operation. Completed jobs list their videos under
/// `response.generateVideoResponse.generatedSamples` (REST) or
/// `response.generatedVideos` (SDK shape).
pub(crate) fn parse_operation(body: &Value) -> JobStatus {
    let error = match body.get("error") {
        Some(Value::String(message)) => Some(message.clone()),
        Some(error @ Value::Object(_)) => Some(
            error
                .get("message")
                .and_then(Value::as_str)
                .map(str::to_string)
                .unwrap_or_else(|| error.to_string()),
        ),
        _ => None,
    };

    let response = body.get("response");
    let samples = response
        .and_then(|r| r.pointer("/generateVideoResponse/generatedSamples"))
        .or_else(|| response.and_then(|r| r.get("generatedVideos")))
        .and_then(Value::as_array);

    JobStatus {
        done: body.get("done").and_then(Value::as_bool).unwrap_or(false),
        error,
        videos: samples
            .map(|s| s.iter().map(VideoReference::from_sample).collect())
            .unwrap_or_default(),
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FileResource {
    name: Option<String>,
    mime_type: Option<String>,
    create_time: Option<DateTime<Utc>>,
    update_time: Option<DateTime<Utc>>,
    expiration_time: Option<DateTime<Utc>>,
    uri: Option<String>,
    download_uri: Option<String>,
    source: Option<String>,
    state: Option<String>,
    video_metadata: Option<VideoMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct VideoMetadata {
    video_duration: Option<String>,
}

impl From<FileResource> for FileMetadata {
    fn from(file: FileResource) -> Self {
        // Durations arrive as protobuf strings such as "8s" or "7.5s"
        let duration_seconds = file
            .video_metadata
            .and_then(|m| m.video_duration)
            .and_then(|d| d.trim().trim_end_matches('s').parse::<f64>().ok());

        FileMetadata {
            state: file.state,
            provenance: Provenance {
                provider_name: file.name,
                mime_type: file.mime_type,
                create_time: file.create_time,
                expiration_time: file.expiration_time,
                update_time: file.update_time,
                uri: file.uri,
                download_uri: file.download_uri,
                source: file.source,
                duration_seconds,
            },
        }
    }
}
