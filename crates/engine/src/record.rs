use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::ValidationError;
use crate::prompt::validate_prompt;
use crate::result::VideoResult;

pub const DEFAULT_FORMAT: &str = "video/mp4";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum VideoStatus {
    #[default]
    Active,
    // Processing and Failed are part of the schema but nothing sets them yet
    Processing,
    Failed,
    Expired,
}

impl VideoStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            VideoStatus::Active => "ACTIVE",
            VideoStatus::Processing => "PROCESSING",
            VideoStatus::Failed => "FAILED",
            VideoStatus::Expired => "EXPIRED",
        }
    }

    /// Map a provider-reported state onto a record status. Unknown states
    /// (e.g. `STATE_UNSPECIFIED`) fall back to `Active`.
    pub fn from_provider_state(state: &str) -> Self {
        state.parse().unwrap_or_default()
    }
}

impl fmt::Display for VideoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VideoStatus {
    type Err = ValidationError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ACTIVE" => Ok(VideoStatus::Active),
            "PROCESSING" => Ok(VideoStatus::Processing),
            "FAILED" => Ok(VideoStatus::Failed),
            "EXPIRED" => Ok(VideoStatus::Expired),
            _ => Err(ValidationError::InvalidStatus(s.to_string())),
        }
    }
}

/// Fields mirrored from the provider's file metadata. Each one is present
/// only if the provider returned it.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Provenance {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub provider_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub mime_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub create_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub expiration_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub update_time: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub download_uri: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub duration_seconds: Option<f64>,
}

/// Status after the lazy expiry check: an `Active` record whose
/// expiration time has passed reads as `Expired`.
pub fn effective_status(
    status: VideoStatus,
    expiration_time: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> VideoStatus {
    match (status, expiration_time) {
        (VideoStatus::Active, Some(expires)) if expires < now => VideoStatus::Expired,
        (status, _) => status,
    }
}

/// A record about to be inserted into the metadata store.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewVideoRecord {
    pub prompt: String,
    pub storage_key: String,
    #[serde(default)]
    pub status: VideoStatus,
    #[serde(default = "default_format")]
    pub format: String,
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
}

fn default_format() -> String {
    DEFAULT_FORMAT.to_string()
}

impl NewVideoRecord {
    pub fn new(prompt: impl Into<String>, storage_key: impl Into<String>) -> Self {
        NewVideoRecord {
            prompt: prompt.into(),
            storage_key: storage_key.into(),
            status: VideoStatus::Active,
            format: default_format(),
            provenance: Provenance::default(),
            user_id: None,
        }
    }

    /// Build the record persisted after a successful generation.
    pub fn from_result(result: &VideoResult, user_id: Option<&str>) -> Self {
        let format = result
            .provenance
            .mime_type
            .clone()
            .unwrap_or_else(default_format);

        NewVideoRecord {
            prompt: result.prompt.clone(),
            storage_key: result.storage_key.clone(),
            status: VideoStatus::from_provider_state(&result.status),
            format,
            provenance: result.provenance.clone(),
            user_id: user_id.map(str::to_string),
        }
    }

    /// Check schema constraints and normalise the record for insertion.
    /// The prompt is stored trimmed and an already-passed expiration time
    /// is applied to the status.
    pub fn validate(mut self, now: DateTime<Utc>) -> Result<Self, ValidationError> {
        self.prompt = validate_prompt(Some(&self.prompt))?;

        if self.storage_key.trim().is_empty() {
            return Err(ValidationError::StorageKeyRequired);
        }
        if self.format.trim().is_empty() {
            return Err(ValidationError::FormatRequired);
        }

        self.status = effective_status(self.status, self.provenance.expiration_time, now);
        Ok(self)
    }
}

/// A persisted video record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoRecord {
    pub id: i64,
    pub prompt: String,
    pub storage_key: String,
    pub status: VideoStatus,
    pub format: String,
    #[serde(flatten)]
    pub provenance: Provenance,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub user_id: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl VideoRecord {
    /// Apply the lazy expiry check. Returns true when the status changed
    /// and the record needs writing back.
    pub fn refresh_status(&mut self, now: DateTime<Utc>) -> bool {
        let next = effective_status(self.status, self.provenance.expiration_time, now);
        if next == self.status {
            return false;
        }
        self.status = next;
        self.updated_at = now;
        true
    }
}
