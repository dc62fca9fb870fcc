//! Concrete provider adapters.

pub mod gpt_image;
pub mod jobs_api;
pub mod veo;

pub use gpt_image::GptImageAdapter;
pub use jobs_api::JobsApiAdapter;
pub use veo::VeoAdapter;

/// Parse a `resultJson` string (`{"resultUrls": [...]}`) into URLs.
///
/// Missing or unparseable payloads yield no URLs; the reconciler decides
/// what an empty success means.
pub(crate) fn parse_result_json(raw: Option<&str>) -> Vec<String> {
    #[derive(serde::Deserialize)]
    struct ResultJson {
        #[serde(default, rename = "resultUrls")]
        result_urls: Vec<String>,
    }

    raw.filter(|s| !s.trim().is_empty())
        .and_then(|s| serde_json::from_str::<ResultJson>(s).ok())
        .map(|r| r.result_urls)
        .unwrap_or_default()
}
