use axum::{
    extract::{
        rejection::{JsonRejection, QueryRejection},
        Query, State,
    },
    response::Json,
    routing::{get, post},
    Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{info, warn};

use super::error::ApiResult;
use super::{AppState, Envelope};
use crate::db::Persisted;
use crate::storage::StoredObject;
use engine::keys::VIDEO_KEY_PREFIX;
use engine::ttl::parse_expires_in;
use engine::{validate_prompt, GenerateOptions, ValidationError, VideoRecord, VideoResult, VideoStatus};

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/generate", post(generate))
        .route("/list", get(list))
        .route("/objects", get(list_objects))
        .with_state(state)
}

#[derive(Debug, Deserialize)]
pub struct GenerateRequest {
    /// Kept loose so a non-string prompt is reported as a missing prompt.
    #[serde(default)]
    pub prompt: Option<Value>,
    #[serde(flatten)]
    pub options: GenerateOptions,
}

async fn generate(
    State(state): State<AppState>,
    payload: Result<Json<GenerateRequest>, JsonRejection>,
) -> ApiResult<Json<Envelope<VideoResult>>> {
    let Json(request) = payload.map_err(|e| ValidationError::Malformed(e.body_text()))?;
    let prompt = validate_prompt(request.prompt.as_ref().and_then(Value::as_str))?;

    info!(
        prompt_chars = prompt.chars().count(),
        user_id = ?request.options.user_id,
        "Video generation requested"
    );

    let result = state.orchestrator.generate(&prompt, &request.options).await?;

    match state
        .db
        .record_generation(&result, request.options.user_id.as_deref())
    {
        Persisted::Stored(record) => {
            info!(id = record.id, key = %record.storage_key, "Video metadata saved");
        }
        Persisted::Degraded { reason } => {
            warn!(key = %result.storage_key, %reason, "Video uploaded but metadata was not saved");
        }
    }

    Ok(Json(
        Envelope::ok(result).with_message("Video generated successfully"),
    ))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListQuery {
    pub expires_in: Option<String>,
    pub user_id: Option<String>,
    pub status: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedVideo {
    pub key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    pub last_modified: DateTime<Utc>,
    pub prompt: String,
    pub status: VideoStatus,
}

fn non_empty(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

fn load_records(
    state: &AppState,
    user_id: Option<&str>,
    status: Option<VideoStatus>,
) -> ApiResult<Vec<VideoRecord>> {
    let records = match (user_id, status) {
        (Some(user), status) => {
            let mut records = state.db.find_by_user(user)?;
            if let Some(status) = status {
                records.retain(|r| r.status == status);
            }
            records
        }
        (None, Some(status)) => state.db.find_by_status(status)?,
        (None, None) => state.db.find_all()?,
    };
    Ok(records)
}

async fn list(
    State(state): State<AppState>,
    query: Result<Query<ListQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<Vec<ListedVideo>>>> {
    let Query(query) = query.map_err(|e| ValidationError::Malformed(e.body_text()))?;
    let ttl = parse_expires_in(query.expires_in.as_deref());
    let status = non_empty(query.status)
        .map(|s| s.parse::<VideoStatus>())
        .transpose()?;
    let user_id = non_empty(query.user_id);

    let records = load_records(&state, user_id.as_deref(), status)?;

    // One failed signature fails the whole listing.
    let mut videos = Vec::with_capacity(records.len());
    for record in records {
        let url = state.blobs.sign(&record.storage_key, ttl).await?;
        videos.push(ListedVideo {
            key: record.storage_key,
            url,
            size: None,
            last_modified: record.created_at,
            prompt: record.prompt,
            status: record.status,
        });
    }

    info!(count = videos.len(), ttl_secs = ttl, "Listed videos");
    let message = format!("Found {} videos", videos.len());
    Ok(Json(Envelope::ok(videos).with_message(message)))
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ObjectsQuery {
    pub prefix: Option<String>,
    pub expires_in: Option<String>,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ListedObject {
    pub key: String,
    pub url: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub size: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_modified: Option<DateTime<Utc>>,
}

impl From<StoredObject> for ListedObject {
    fn from(object: StoredObject) -> Self {
        ListedObject {
            key: object.key,
            url: object.signed_url,
            size: object.size,
            last_modified: object.last_modified,
        }
    }
}

/// Straight from the bucket, bypassing the metadata store.
async fn list_objects(
    State(state): State<AppState>,
    query: Result<Query<ObjectsQuery>, QueryRejection>,
) -> ApiResult<Json<Envelope<Vec<ListedObject>>>> {
    let Query(query) = query.map_err(|e| ValidationError::Malformed(e.body_text()))?;
    let ttl = parse_expires_in(query.expires_in.as_deref());
    let prefix = query.prefix.unwrap_or_else(|| VIDEO_KEY_PREFIX.to_string());

    let objects: Vec<ListedObject> = state
        .blobs
        .list(&prefix, ttl)
        .await?
        .into_iter()
        .map(ListedObject::from)
        .collect();

    let message = format!("Found {} objects", objects.len());
    Ok(Json(Envelope::ok(objects).with_message(message)))
}
