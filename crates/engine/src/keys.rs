use chrono::Utc;

pub const VIDEO_KEY_PREFIX: &str = "videos/";
const VIDEO_KEY_SUFFIX: &str = ".mp4";

/// `videos/<epoch-ms>.mp4`. Two calls in the same millisecond collide;
/// that is accepted.
pub fn storage_key_at(epoch_ms: i64) -> String {
    format!("{}{}{}", VIDEO_KEY_PREFIX, epoch_ms, VIDEO_KEY_SUFFIX)
}

pub fn storage_key_now() -> String {
    storage_key_at(Utc::now().timestamp_millis())
}

/// True for keys produced by [`storage_key_at`].
pub fn is_generated_key(key: &str) -> bool {
    key.strip_prefix(VIDEO_KEY_PREFIX)
        .and_then(|rest| rest.strip_suffix(VIDEO_KEY_SUFFIX))
        .is_some_and(|digits| !digits.is_empty() && digits.bytes().all(|b| b.is_ascii_digit()))
}
