//! Request validation shared by every job kind.

use std::sync::LazyLock;

use regex::Regex;

use crate::error::CoreError;

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Maximum prompt length in characters.
pub const MAX_PROMPT_LENGTH: usize = 5_000;

/// Maximum URL length accepted for a reference input.
pub const MAX_URL_LENGTH: usize = 2_048;

/// Aspect ratios understood by image models.
pub const IMAGE_ASPECT_RATIOS: &[&str] = &[
    "auto", "1:1", "2:3", "3:2", "3:4", "4:3", "4:5", "5:4", "16:9", "9:16", "21:9",
];

/// Aspect ratios understood by video models.
pub const VIDEO_ASPECT_RATIOS: &[&str] = &["16:9", "9:16", "1:1"];

/// Absolute http(s) URL with a host and no whitespace.
const REFERENCE_URL_PATTERN: &str = r"^https?://[A-Za-z0-9]([A-Za-z0-9.-]*[A-Za-z0-9])?(:\d{1,5})?(/\S*)?$";

static REFERENCE_URL_RE: LazyLock<Regex> =
    LazyLock::new(|| Regex::new(REFERENCE_URL_PATTERN).expect("valid regex"));

// ---------------------------------------------------------------------------
// Validation
// ---------------------------------------------------------------------------

/// Validate a prompt: non-blank and within the length limit.
pub fn validate_prompt(prompt: &str) -> Result<(), CoreError> {
    if prompt.trim().is_empty() {
        return Err(CoreError::Validation("Prompt must not be empty".to_string()));
    }
    let len = prompt.chars().count();
    if len > MAX_PROMPT_LENGTH {
        return Err(CoreError::Validation(format!(
            "Prompt exceeds maximum length of {MAX_PROMPT_LENGTH} characters (got {len})"
        )));
    }
    Ok(())
}

/// Validate a list of reference-input URLs against a per-request cap.
pub fn validate_reference_urls(urls: &[String], max: usize) -> Result<(), CoreError> {
    if urls.len() > max {
        return Err(CoreError::Validation(format!(
            "At most {max} reference inputs are allowed (got {})",
            urls.len()
        )));
    }
    for url in urls {
        validate_reference_url(url)?;
    }
    Ok(())
}

/// Validate one reference-input URL.
pub fn validate_reference_url(url: &str) -> Result<(), CoreError> {
    if url.len() > MAX_URL_LENGTH || !REFERENCE_URL_RE.is_match(url) {
        return Err(CoreError::Validation(format!(
            "Reference input is not a valid http(s) URL: {}",
            crate::redact::truncate(url, 80)
        )));
    }
    Ok(())
}

/// Validate an optional value against an allowed set.
pub fn validate_one_of(
    field: &str,
    value: Option<&str>,
    allowed: &[&str],
) -> Result<(), CoreError> {
    match value {
        Some(v) if !allowed.contains(&v) => Err(CoreError::Validation(format!(
            "Invalid {field} '{v}'. Must be one of: {}",
            allowed.join(", ")
        ))),
        _ => Ok(()),
    }
}

/// Validate an integer falls in `[min, max]`.
pub fn validate_range(field: &str, value: u32, min: u32, max: u32) -> Result<(), CoreError> {
    if value < min || value > max {
        return Err(CoreError::Validation(format!(
            "{field} must be between {min} and {max} (got {value})"
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;

    use super::*;

    #[test]
    fn blank_and_oversized_prompts_fail() {
        assert_matches!(validate_prompt("   "), Err(CoreError::Validation(_)));
        let long = "x".repeat(MAX_PROMPT_LENGTH + 1);
        assert_matches!(validate_prompt(&long), Err(CoreError::Validation(_)));
        assert!(validate_prompt("a cat in a hat").is_ok());
    }

    #[test]
    fn reference_urls_must_be_http() {
        assert!(validate_reference_url("https://cdn.example.com/ref.png?x=1").is_ok());
        assert!(validate_reference_url("http://localhost:8080/a.jpg").is_ok());
        assert!(validate_reference_url("ftp://cdn.example.com/a.png").is_err());
        assert!(validate_reference_url("https://").is_err());
        assert!(validate_reference_url("https://cdn.example.com/a b.png").is_err());
    }

    #[test]
    fn reference_count_is_capped() {
        let urls = vec!["https://a.example/1.png".to_string(); 3];
        assert!(validate_reference_urls(&urls, 3).is_ok());
        assert_matches!(validate_reference_urls(&urls, 2), Err(CoreError::Validation(_)));
    }

    #[test]
    fn one_of_allows_absent_values() {
        assert!(validate_one_of("aspect_ratio", None, IMAGE_ASPECT_RATIOS).is_ok());
        assert!(validate_one_of("aspect_ratio", Some("16:9"), IMAGE_ASPECT_RATIOS).is_ok());
        assert!(validate_one_of("aspect_ratio", Some("7:3"), IMAGE_ASPECT_RATIOS).is_err());
    }

    #[test]
    fn range_is_inclusive() {
        assert!(validate_range("count", 1, 1, 4).is_ok());
        assert!(validate_range("count", 4, 1, 4).is_ok());
        assert!(validate_range("count", 5, 1, 4).is_err());
    }
}
