use serde::{Deserialize, Serialize};

use crate::record::{Provenance, VideoStatus};

/// Supplementary file metadata fetched from the provider after upload.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FileMetadata {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub state: Option<String>,
    #[serde(flatten)]
    pub provenance: Provenance,
}

/// Normalised outcome of one generation run, returned to the client.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct VideoResult {
    pub status: String,
    pub storage_key: String,
    pub public_url: String,
    pub prompt: String,
    #[serde(flatten)]
    pub provenance: Provenance,
}

impl VideoResult {
    /// Combine the upload outcome with whatever metadata the provider
    /// returned. Missing metadata fields stay absent rather than empty.
    pub fn assemble(
        prompt: &str,
        storage_key: &str,
        public_url: &str,
        metadata: Option<&FileMetadata>,
    ) -> Self {
        let status = metadata
            .and_then(|m| m.state.as_deref())
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .unwrap_or_else(|| VideoStatus::Active.as_str().to_string());

        VideoResult {
            status,
            storage_key: storage_key.to_string(),
            public_url: public_url.to_string(),
            prompt: prompt.to_string(),
            provenance: metadata.map(|m| m.provenance.clone()).unwrap_or_default(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    #[test]
    fn defaults_to_active_without_metadata() {
        let result = VideoResult::assemble("p", "videos/1.mp4", "https://cdn/videos/1.mp4", None);
        assert_eq!(result.status, "ACTIVE");

        let value = serde_json::to_value(&result).unwrap();
        let object = value.as_object().unwrap();
        let mut keys: Vec<_> = object.keys().cloned().collect();
        keys.sort();
        assert_eq!(keys, ["prompt", "publicUrl", "status", "storageKey"]);
    }

    #[test]
    fn copies_only_present_metadata() {
        let metadata = FileMetadata {
            state: Some("ACTIVE".into()),
            provenance: Provenance {
                provider_name: Some("files/abc".into()),
                mime_type: Some("video/mp4".into()),
                expiration_time: Some(Utc.with_ymd_and_hms(2030, 1, 2, 3, 4, 5).unwrap()),
                duration_seconds: Some(8.0),
                ..Provenance::default()
            },
        };

        let result = VideoResult::assemble("p", "videos/1.mp4", "u", Some(&metadata));
        let value = serde_json::to_value(&result).unwrap();

        assert_eq!(value["providerName"], "files/abc");
        assert_eq!(value["mimeType"], "video/mp4");
        assert_eq!(value["durationSeconds"], 8.0);
        assert_eq!(value["expirationTime"], "2030-01-02T03:04:05Z");
        assert!(value.get("createTime").is_none());
        assert!(value.get("source").is_none());
    }

    #[test]
    fn blank_provider_state_falls_back() {
        let metadata = FileMetadata {
            state: Some("  ".into()),
            ..FileMetadata::default()
        };
        let result = VideoResult::assemble("p", "k", "u", Some(&metadata));
        assert_eq!(result.status, "ACTIVE");
    }
}
