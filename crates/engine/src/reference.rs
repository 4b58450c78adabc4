//! Adapter over the provider's description of a generated video.
//!
//! The provider has used several spellings for the same fields across API
//! versions and SDKs, so lookups go through fixed, ordered fallback lists
//! rather than a single field name.

use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Fields that may carry a direct download URI, in priority order.
pub const DOWNLOAD_URI_FIELDS: [&str; 5] = ["downloadUri", "download_uri", "uri", "videoUri", "url"];

/// Fields that may carry the provider-side file name, in priority order.
pub const NAME_FIELDS: [&str; 2] = ["name", "fileName"];

/// Fields that may carry the MIME type, in priority order.
pub const MIME_TYPE_FIELDS: [&str; 2] = ["mimeType", "mime_type"];

/// Hosts (and their subdomains) that expect the provider API key.
pub const PROVIDER_DOMAINS: [&str; 2] = ["googleapis.com", "googleusercontent.com"];

/// One generated video as returned by a completed job.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct VideoReference(Value);

impl VideoReference {
    pub fn new(value: Value) -> Self {
        VideoReference(value)
    }

    /// Build from one entry of a job's result list. Entries may wrap the
    /// video under a `video` key or be the video object itself.
    pub fn from_sample(sample: &Value) -> Self {
        match sample.get("video") {
            Some(video) if video.is_object() => VideoReference(video.clone()),
            _ => VideoReference(sample.clone()),
        }
    }

    fn first_string(&self, fields: &[&str]) -> Option<String> {
        fields.iter().find_map(|field| {
            self.0
                .get(*field)
                .and_then(Value::as_str)
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
        })
    }

    pub fn download_uri(&self) -> Option<String> {
        self.first_string(&DOWNLOAD_URI_FIELDS)
    }

    pub fn name(&self) -> Option<String> {
        self.first_string(&NAME_FIELDS)
    }

    pub fn mime_type(&self) -> Option<String> {
        self.first_string(&MIME_TYPE_FIELDS)
    }

    /// File name used to look up supplementary metadata: the name field
    /// when present, otherwise derived from the download URI.
    pub fn file_name(&self) -> Option<String> {
        if let Some(name) = self.name() {
            let bare = name.strip_prefix("files/").unwrap_or(&name);
            if !bare.is_empty() {
                return Some(bare.to_string());
            }
        }
        self.download_uri().as_deref().and_then(file_name_from_uri)
    }
}

/// Last path segment of a URI with any query, fragment and trailing
/// `:suffix` removed, e.g. `.../files/abc123:download?alt=media` -> `abc123`.
pub fn file_name_from_uri(uri: &str) -> Option<String> {
    let path = uri.split(['?', '#']).next().unwrap_or_default();
    let segment = path.trim_end_matches('/').rsplit('/').next()?;
    let name = segment.split(':').next().unwrap_or_default();
    (!name.is_empty()).then(|| name.to_string())
}

/// True when `host` is one of the provider domains or a subdomain of one.
pub fn is_provider_host(host: &str) -> bool {
    let host = host.trim_end_matches('.').to_ascii_lowercase();
    PROVIDER_DOMAINS.iter().any(|domain| {
        host == *domain
            || host
                .strip_suffix(domain)
                .is_some_and(|prefix| prefix.ends_with('.'))
    })
}
