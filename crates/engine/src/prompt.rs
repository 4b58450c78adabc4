use serde::{Deserialize, Serialize};

use crate::error::ValidationError;

pub const MAX_PROMPT_CHARS: usize = 1000;

/// Extra knobs a client may send alongside the prompt. They are carried
/// through but not interpreted yet.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GenerateOptions {
    #[serde(default)]
    pub duration: Option<u32>,
    #[serde(default)]
    pub quality: Option<String>,
    #[serde(default)]
    pub user_id: Option<String>,
}

/// Validate a raw prompt and return it trimmed.
///
/// Length is measured in characters, not bytes.
pub fn validate_prompt(raw: Option<&str>) -> Result<String, ValidationError> {
    let trimmed = raw.map(str::trim).unwrap_or_default();
    if trimmed.is_empty() {
        return Err(ValidationError::PromptRequired);
    }

    let len = trimmed.chars().count();
    if len > MAX_PROMPT_CHARS {
        return Err(ValidationError::PromptTooLong(len));
    }

    Ok(trimmed.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_prompts_within_bounds() {
        assert_eq!(validate_prompt(Some("a")).unwrap(), "a");
        assert_eq!(
            validate_prompt(Some("  a red ball bouncing \n")).unwrap(),
            "a red ball bouncing"
        );

        let longest = "x".repeat(MAX_PROMPT_CHARS);
        assert_eq!(validate_prompt(Some(&longest)).unwrap(), longest);
    }

    #[test]
    fn rejects_missing_or_blank_prompts() {
        assert_eq!(validate_prompt(None), Err(ValidationError::PromptRequired));
        assert_eq!(validate_prompt(Some("")), Err(ValidationError::PromptRequired));
        assert_eq!(
            validate_prompt(Some(" \t\n ")),
            Err(ValidationError::PromptRequired)
        );
    }

    #[test]
    fn rejects_prompts_over_the_limit() {
        let too_long = "x".repeat(MAX_PROMPT_CHARS + 1);
        assert_eq!(
            validate_prompt(Some(&too_long)),
            Err(ValidationError::PromptTooLong(MAX_PROMPT_CHARS + 1))
        );
    }

    #[test]
    fn surrounding_whitespace_does_not_count_towards_length() {
        let padded = format!("   {}   ", "x".repeat(MAX_PROMPT_CHARS));
        assert!(validate_prompt(Some(&padded)).is_ok());
    }

    #[test]
    fn length_is_counted_in_characters() {
        // 1000 multi-byte characters is still within bounds
        let wide = "é".repeat(MAX_PROMPT_CHARS);
        assert!(wide.len() > MAX_PROMPT_CHARS);
        assert!(validate_prompt(Some(&wide)).is_ok());
    }

    #[test]
    fn options_deserialize_from_camel_case() {
        let options: GenerateOptions = serde_json::from_value(serde_json::json!({
            "duration": 8,
            "quality": "high",
            "userId": "user-1"
        }))
        .unwrap();

        assert_eq!(options.duration, Some(8));
        assert_eq!(options.quality.as_deref(), Some("high"));
        assert_eq!(options.user_id.as_deref(), Some("user-1"));
    }
}
