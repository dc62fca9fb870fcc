//! Typed, versioned audit payload stored with every generation job.
//!
//! The `schema` tag carries both the job type and the payload version so
//! rows written by older releases keep deserializing after new versions
//! are introduced.

use serde::{Deserialize, Serialize};

/// Discriminator selecting which validation, cost and parameter rules
/// apply to a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobType {
    Image,
    Video,
    Avatar,
}

impl JobType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Image => "image",
            Self::Video => "video",
            Self::Avatar => "avatar",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "image" => Some(Self::Image),
            "video" => Some(Self::Video),
            "avatar" => Some(Self::Avatar),
            _ => None,
        }
    }
}

impl std::fmt::Display for JobType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// How the job's credit cost was decided.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum CostSource {
    Catalog,
    InternalOverride,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ImageAuditV1 {
    pub original_prompt: String,
    pub provider_prompt: String,
    pub requested_model: String,
    pub resolved_model: String,
    pub count: u32,
    pub aspect_ratio: Option<String>,
    pub resolution: Option<String>,
    #[serde(default)]
    pub reference_urls: Vec<String>,
    pub style_preset: Option<String>,
    pub cost_source: CostSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VideoAuditV1 {
    pub original_prompt: String,
    pub requested_model: String,
    pub resolved_model: String,
    pub duration_secs: u32,
    pub aspect_ratio: Option<String>,
    #[serde(default)]
    pub reference_urls: Vec<String>,
    pub cost_source: CostSource,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AvatarAuditV1 {
    pub subject_ref: String,
    pub prompt: String,
    pub requested_model: String,
    pub resolved_model: String,
    #[serde(default)]
    pub reference_urls: Vec<String>,
}

/// Job metadata, one variant per job type and schema version.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "schema")]
pub enum JobMetadata {
    #[serde(rename = "image/v1")]
    ImageV1(ImageAuditV1),
    #[serde(rename = "video/v1")]
    VideoV1(VideoAuditV1),
    #[serde(rename = "avatar/v1")]
    AvatarV1(AvatarAuditV1),
}

impl JobMetadata {
    pub fn job_type(&self) -> JobType {
        match self {
            Self::ImageV1(_) => JobType::Image,
            Self::VideoV1(_) => JobType::Video,
            Self::AvatarV1(_) => JobType::Avatar,
        }
    }

    /// Model the caller asked for, before registry resolution.
    pub fn requested_model(&self) -> &str {
        match self {
            Self::ImageV1(m) => &m.requested_model,
            Self::VideoV1(m) => &m.requested_model,
            Self::AvatarV1(m) => &m.requested_model,
        }
    }

    pub fn reference_urls(&self) -> &[String] {
        match self {
            Self::ImageV1(m) => &m.reference_urls,
            Self::VideoV1(m) => &m.reference_urls,
            Self::AvatarV1(m) => &m.reference_urls,
        }
    }
}
