//! Log hygiene helpers for provider URLs and free text.

/// Default length free text is cut to in log fields.
pub const LOG_TEXT_LIMIT: usize = 120;

/// Reduce a URL to `scheme://host/…/last-segment` for logging.
///
/// Signed provider URLs carry credentials in their query string; those
/// never reach the logs.
pub fn mask_url(url: &str) -> String {
    let without_query = url.split(['?', '#']).next().unwrap_or(url);
    let Some((scheme, rest)) = without_query.split_once("://") else {
        return truncate(without_query, 32);
    };
    let mut parts = rest.split('/');
    let host = parts.next().unwrap_or_default();
    match parts.filter(|p| !p.is_empty()).last() {
        Some(last) => format!("{scheme}://{host}/…/{}", truncate(last, 40)),
        None => format!("{scheme}://{host}"),
    }
}

/// Cut `text` to at most `limit` characters, marking the cut.
pub fn truncate(text: &str, limit: usize) -> String {
    if text.chars().count() <= limit {
        return text.to_string();
    }
    let mut out: String = text.chars().take(limit).collect();
    out.push('…');
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn masks_query_and_middle_segments() {
        assert_eq!(
            mask_url("https://tempfile.cdn.example/a/b/c/image.png?X-Amz-Signature=abc"),
            "https://tempfile.cdn.example/…/image.png"
        );
        assert_eq!(mask_url("https://host.example/"), "https://host.example");
    }

    #[test]
    fn truncate_respects_char_boundaries() {
        assert_eq!(truncate("short", 10), "short");
        assert_eq!(truncate("ééééé", 2), "éé…");
    }
}
