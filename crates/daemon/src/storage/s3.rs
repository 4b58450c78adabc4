use async_trait::async_trait;
use aws_config::meta::region::RegionProviderChain;
use aws_config::retry::{RetryConfig, RetryMode};
use aws_config::BehaviorVersion;
use aws_sdk_s3::error::DisplayErrorContext;
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::task::{JoinError, JoinSet};
use tracing::{info, warn};

use super::{
    sort_newest_first, BlobStore, ByteSource, StorageError, StorageResult, StoredObject,
    UploadOptions, UploadResult,
};
use crate::config::StorageConfig;
use engine::ttl::{DEFAULT_TTL_SECS, MAX_TTL_SECS, MIN_TTL_SECS};

/// Size of each multipart chunk. S3 needs at least 5MB for every part but the last.
const PART_SIZE: usize = 8 * 1024 * 1024;
const MAX_PARTS_IN_FLIGHT: usize = 4;

#[derive(Clone)]
pub struct S3BlobStore {
    client: Client,
    bucket: String,
    region: String,
    endpoint_url: Option<String>,
    public_base_url: Option<String>,
}

impl S3BlobStore {
    pub async fn new(config: &StorageConfig) -> Self {
        let region_provider =
            RegionProviderChain::first_try(aws_config::Region::new(config.region.clone()));

        let retry_config = RetryConfig::standard()
            .with_max_attempts(5)
            .with_retry_mode(RetryMode::Adaptive);

        let sdk_config = aws_config::defaults(BehaviorVersion::latest())
            .region(region_provider)
            .retry_config(retry_config.clone())
            .load()
            .await;

        let client = match config.endpoint_url {
            Some(ref endpoint) => {
                // S3-compatible providers generally need path-style addressing
                let mut builder = aws_sdk_s3::Config::builder()
                    .behavior_version(BehaviorVersion::latest())
                    .endpoint_url(endpoint)
                    .region(sdk_config.region().cloned())
                    .retry_config(retry_config)
                    .force_path_style(true);
                if let Some(provider) = sdk_config.credentials_provider() {
                    builder = builder.credentials_provider(provider);
                }
                Client::from_conf(builder.build())
            }
            None => Client::new(&sdk_config),
        };

        S3BlobStore {
            client,
            bucket: config.bucket.clone(),
            region: config.region.clone(),
            endpoint_url: config.endpoint_url.clone(),
            public_base_url: config.public_base_url.clone(),
        }
    }

    /// Unsigned URL of an object. Only readable if the bucket allows it.
    pub fn public_url(&self, key: &str) -> String {
        if let Some(ref base) = self.public_base_url {
            format!("{}/{}", base.trim_end_matches('/'), key)
        } else if let Some(ref endpoint) = self.endpoint_url {
            format!("{}/{}/{}", endpoint.trim_end_matches('/'), self.bucket, key)
        } else {
            format!(
                "https://{}.s3.{}.amazonaws.com/{}",
                self.bucket, self.region, key
            )
        }
    }
}

/// One object write in progress. The part loop only talks to this, so it
/// can run against something other than S3.
#[async_trait]
pub(crate) trait ObjectWriter: Send + Sync + 'static {
    async fn put_whole(&self, body: Bytes) -> StorageResult<()>;

    /// Start a multipart upload and return its upload id.
    async fn start_multipart(&self) -> StorageResult<String>;

    async fn put_part(
        &self,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<CompletedPart>;

    async fn complete_multipart(
        &self,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()>;

    async fn abort_multipart(&self, upload_id: &str) -> StorageResult<()>;
}

/// Outcome of [`write_object`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Written {
    pub bytes: u64,
    pub parts: usize,
}

fn read_failed(e: std::io::Error) -> StorageError {
    StorageError::UploadFailed(format!("Failed to read from stream: {}", e))
}

/// Write everything `source` yields. A source shorter than one part goes
/// up in a single PUT; anything else becomes a multipart upload that is
/// aborted if any step fails.
pub(crate) async fn write_object<W: ObjectWriter>(
    writer: Arc<W>,
    source: &mut ByteSource,
    part_size: usize,
) -> StorageResult<Written> {
    let first = read_chunk(source, part_size).await.map_err(read_failed)?;

    if first.len() < part_size {
        let bytes = first.len() as u64;
        writer.put_whole(first).await?;
        return Ok(Written { bytes, parts: 1 });
    }

    let upload_id = writer.start_multipart().await?;

    let outcome = async {
        let (parts, bytes) = upload_parts(&writer, source, &upload_id, first, part_size).await?;
        let count = parts.len();
        writer.complete_multipart(&upload_id, parts).await?;
        Ok::<_, StorageError>(Written {
            bytes,
            parts: count,
        })
    }
    .await;

    if outcome.is_err() {
        if let Err(e) = writer.abort_multipart(&upload_id).await {
            warn!(upload_id = %upload_id, error = %e, "Failed to abort multipart upload");
        }
    }

    outcome
}

/// Read the source part by part, keeping at most `MAX_PARTS_IN_FLIGHT`
/// part uploads running at once. Parts come back sorted by number.
async fn upload_parts<W: ObjectWriter>(
    writer: &Arc<W>,
    source: &mut ByteSource,
    upload_id: &str,
    first: Bytes,
    part_size: usize,
) -> StorageResult<(Vec<CompletedPart>, u64)> {
    let mut in_flight = JoinSet::new();
    let mut parts = Vec::new();
    let mut total = 0u64;
    let mut part_number = 1i32;
    let mut chunk = first;

    loop {
        total += chunk.len() as u64;
        let is_last = chunk.len() < part_size;

        while in_flight.len() >= MAX_PARTS_IN_FLIGHT {
            if let Some(joined) = in_flight.join_next().await {
                parts.push(joined_part(joined)?);
            }
        }

        let writer = writer.clone();
        let upload_id = upload_id.to_string();
        let number = part_number;
        in_flight.spawn(async move { writer.put_part(&upload_id, number, chunk).await });
        part_number += 1;

        if is_last {
            break;
        }
        chunk = read_chunk(source, part_size).await.map_err(read_failed)?;
        if chunk.is_empty() {
            break;
        }
    }

    while let Some(joined) = in_flight.join_next().await {
        parts.push(joined_part(joined)?);
    }
    parts.sort_by_key(|part| part.part_number());

    Ok((parts, total))
}

fn joined_part(
    joined: Result<StorageResult<CompletedPart>, JoinError>,
) -> StorageResult<CompletedPart> {
    joined.map_err(|e| StorageError::UploadFailed(format!("part upload task failed: {}", e)))?
}

/// Read up to `size` bytes. A short result means the source is exhausted.
pub(crate) async fn read_chunk<R>(reader: &mut R, size: usize) -> std::io::Result<Bytes>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut buf = Vec::with_capacity(size);
    reader.take(size as u64).read_to_end(&mut buf).await?;
    Ok(Bytes::from(buf))
}

/// A single S3 object, addressed for writing.
struct S3Object {
    client: Client,
    bucket: String,
    key: String,
    content_type: String,
}

fn upload_failed<E>(e: E) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
{
    StorageError::UploadFailed(DisplayErrorContext(&e).to_string())
}

#[async_trait]
impl ObjectWriter for S3Object {
    async fn put_whole(&self, body: Bytes) -> StorageResult<()> {
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type(&self.content_type)
            .content_length(body.len() as i64)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(upload_failed)?;
        Ok(())
    }

    async fn start_multipart(&self) -> StorageResult<String> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .content_type(&self.content_type)
            .send()
            .await
            .map_err(upload_failed)?;

        created
            .upload_id()
            .map(str::to_string)
            .ok_or_else(|| StorageError::UploadFailed("No upload ID returned from S3".to_string()))
    }

    async fn put_part(
        &self,
        upload_id: &str,
        part_number: i32,
        body: Bytes,
    ) -> StorageResult<CompletedPart> {
        let uploaded = self
            .client
            .upload_part()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .part_number(part_number)
            .body(ByteStream::from(body))
            .send()
            .await
            .map_err(|e| {
                StorageError::UploadFailed(format!(
                    "part {}: {}",
                    part_number,
                    DisplayErrorContext(&e)
                ))
            })?;

        let etag = uploaded.e_tag().ok_or_else(|| {
            StorageError::UploadFailed(format!("No ETag returned for part {}", part_number))
        })?;

        Ok(CompletedPart::builder()
            .part_number(part_number)
            .e_tag(etag)
            .build())
    }

    async fn complete_multipart(
        &self,
        upload_id: &str,
        parts: Vec<CompletedPart>,
    ) -> StorageResult<()> {
        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(parts))
                    .build(),
            )
            .send()
            .await
            .map_err(upload_failed)?;
        Ok(())
    }

    async fn abort_multipart(&self, upload_id: &str) -> StorageResult<()> {
        self.client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(&self.key)
            .upload_id(upload_id)
            .send()
            .await
            .map_err(upload_failed)?;
        Ok(())
    }
}

/// An object as seen by a bucket listing, before signing.
#[derive(Debug, Clone, PartialEq)]
pub(crate) struct ListedKey {
    pub key: String,
    pub size: Option<i64>,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone, Default)]
pub(crate) struct ListPage {
    pub entries: Vec<ListedKey>,
    /// Present only when more pages follow.
    pub next_token: Option<String>,
}

#[async_trait]
pub(crate) trait PagedListing: Send + Sync {
    async fn list_page(&self, prefix: &str, token: Option<String>) -> StorageResult<ListPage>;
}

/// Follow continuation tokens until the listing is exhausted.
pub(crate) async fn list_all<L>(listing: &L, prefix: &str) -> StorageResult<Vec<ListedKey>>
where
    L: PagedListing + ?Sized,
{
    let mut entries = Vec::new();
    let mut token = None;

    loop {
        let page = listing.list_page(prefix, token.take()).await?;
        entries.extend(page.entries);
        match page.next_token {
            Some(next) => token = Some(next),
            None => break,
        }
    }

    Ok(entries)
}

fn to_chrono(ts: &aws_sdk_s3::primitives::DateTime) -> Option<DateTime<Utc>> {
    DateTime::from_timestamp(ts.secs(), ts.subsec_nanos())
}

#[async_trait]
impl PagedListing for S3BlobStore {
    async fn list_page(&self, prefix: &str, token: Option<String>) -> StorageResult<ListPage> {
        let page = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(prefix)
            .set_continuation_token(token)
            .send()
            .await
            .map_err(|e| StorageError::ListFailed(DisplayErrorContext(&e).to_string()))?;

        let entries = page
            .contents()
            .iter()
            .filter_map(|object| {
                object.key().map(|key| ListedKey {
                    key: key.to_string(),
                    size: object.size(),
                    last_modified: object.last_modified().and_then(to_chrono),
                })
            })
            .collect();

        let next_token = match page.next_continuation_token() {
            Some(token) if page.is_truncated().unwrap_or(false) => Some(token.to_string()),
            _ => None,
        };

        Ok(ListPage {
            entries,
            next_token,
        })
    }
}

#[async_trait]
impl BlobStore for S3BlobStore {
    async fn upload(
        &self,
        mut source: ByteSource,
        key: &str,
        options: UploadOptions,
    ) -> StorageResult<UploadResult> {
        let start = Instant::now();

        let object = Arc::new(S3Object {
            client: self.client.clone(),
            bucket: self.bucket.clone(),
            key: key.to_string(),
            content_type: options.content_type.clone(),
        });
        let written = write_object(object, &mut source, PART_SIZE).await?;

        info!(
            bucket = %self.bucket,
            key = %key,
            size_bytes = written.bytes,
            expected_bytes = ?options.content_length,
            parts = written.parts,
            duration_ms = start.elapsed().as_secs_f64() * 1000.0,
            "S3 upload successful"
        );

        Ok(UploadResult {
            key: key.to_string(),
            signed_url: self.sign(key, DEFAULT_TTL_SECS).await?,
            public_url: self.public_url(key),
            bucket: self.bucket.clone(),
        })
    }

    async fn sign(&self, key: &str, ttl_secs: u64) -> StorageResult<String> {
        let ttl = ttl_secs.clamp(MIN_TTL_SECS, MAX_TTL_SECS);
        let presigning = PresigningConfig::expires_in(Duration::from_secs(ttl)).map_err(|e| {
            StorageError::SignFailed {
                key: key.to_string(),
                reason: e.to_string(),
            }
        })?;

        let request = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .presigned(presigning)
            .await
            .map_err(|e| StorageError::SignFailed {
                key: key.to_string(),
                reason: DisplayErrorContext(&e).to_string(),
            })?;

        Ok(request.uri().to_string())
    }

    async fn list(&self, prefix: &str, ttl_secs: u64) -> StorageResult<Vec<StoredObject>> {
        let mut objects = Vec::new();
        for entry in list_all(self, prefix).await? {
            objects.push(StoredObject {
                signed_url: self.sign(&entry.key, ttl_secs).await?,
                key: entry.key,
                size: entry.size,
                last_modified: entry.last_modified,
            });
        }

        sort_newest_first(&mut objects);
        Ok(objects)
    }
}
