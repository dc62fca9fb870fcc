//! Durable migration rules: candidate priority, expiry, storage keys and
//! content types.

use std::cmp::Ordering;
use std::time::Duration;

use crate::job::AssetKind;
use crate::metadata::JobType;
use crate::status::FileTransferStatus;
use crate::types::{DbId, Timestamp};

// ---------------------------------------------------------------------------
// Constants
// ---------------------------------------------------------------------------

/// Default cap on `transfer_retry_count`.
pub const DEFAULT_MAX_TRANSFER_RETRIES: i32 = 3;

/// Root prefix for durable result objects.
pub const DEFAULT_KEY_PREFIX: &str = "generations";

/// Default age after which a `Transferring` claim counts as abandoned.
pub const DEFAULT_CLAIM_LEASE_MINUTES: i64 = 30;

// ---------------------------------------------------------------------------
// Priority
// ---------------------------------------------------------------------------

/// Fields that decide where a job sits in the migration queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PriorityKey {
    pub expires_at: Option<Timestamp>,
    pub status: FileTransferStatus,
    pub retry_count: i32,
    pub created_at: Timestamp,
}

/// Operator-supplied narrowing of the candidate query.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CandidateFilter {
    /// Only jobs created at or after this instant.
    pub created_from: Option<Timestamp>,
    /// Only jobs created at or before this instant.
    pub created_to: Option<Timestamp>,
    pub job_type: Option<JobType>,
}

impl CandidateFilter {
    /// Whether a job with these attributes passes the filter.
    pub fn matches(&self, job_type: JobType, created_at: Timestamp) -> bool {
        self.created_from.map_or(true, |from| created_at >= from)
            && self.created_to.map_or(true, |to| created_at <= to)
            && self.job_type.map_or(true, |t| t == job_type)
    }
}

/// Whether the ephemeral source is already gone.
pub fn is_expired(expires_at: Option<Timestamp>, now: Timestamp) -> bool {
    expires_at.is_some_and(|at| at <= now)
}

/// Whether a migration may claim a job in this transfer state.
///
/// `Pending` and `Failed` always are; `Transferring` only once its claim
/// was taken before `stale_before`.
pub fn is_claimable(
    status: FileTransferStatus,
    claimed_at: Option<Timestamp>,
    stale_before: Timestamp,
) -> bool {
    match status {
        FileTransferStatus::Pending | FileTransferStatus::Failed => true,
        FileTransferStatus::Transferring => claimed_at.map_or(true, |at| at < stale_before),
        _ => false,
    }
}

/// Order two candidates: soonest expiry first (jobs with an expiry ahead
/// of jobs without one), then `Failed` (or an abandoned claim) before
/// `Pending`, then higher retry count, then oldest first.
pub fn compare_priority(a: &PriorityKey, b: &PriorityKey) -> Ordering {
    let by_expiry = match (a.expires_at, b.expires_at) {
        (Some(x), Some(y)) => x.cmp(&y),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    };

    by_expiry
        .then_with(|| status_rank(a.status).cmp(&status_rank(b.status)))
        .then_with(|| b.retry_count.cmp(&a.retry_count))
        .then_with(|| a.created_at.cmp(&b.created_at))
}

fn status_rank(status: FileTransferStatus) -> u8 {
    match status {
        FileTransferStatus::Failed | FileTransferStatus::Transferring => 0,
        FileTransferStatus::Pending => 1,
        _ => 2,
    }
}

/// Sort items in migration priority order.
pub fn sort_by_priority<T>(items: &mut [T], key: impl Fn(&T) -> PriorityKey) {
    items.sort_by(|a, b| compare_priority(&key(a), &key(b)));
}

/// Linear backoff between per-asset attempts: `base × attempt`.
pub fn retry_delay(base: Duration, attempt: u32) -> Duration {
    base * attempt
}

// ---------------------------------------------------------------------------
// Keys and content types
// ---------------------------------------------------------------------------

/// Derived thumbnail sizes generated for migrated images.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThumbnailVariant {
    Mobile,
    Desktop,
    Detail,
}

impl ThumbnailVariant {
    pub const ALL: [ThumbnailVariant; 3] = [Self::Mobile, Self::Desktop, Self::Detail];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Mobile => "mobile",
            Self::Desktop => "desktop",
            Self::Detail => "detail",
        }
    }

    /// Maximum edge length in pixels.
    pub fn max_edge(self) -> u32 {
        match self {
            Self::Mobile => 400,
            Self::Desktop => 800,
            Self::Detail => 1200,
        }
    }
}

/// File extension (with leading dot) inferred from a source URL.
///
/// Query strings and fragments are ignored. Unknown extensions fall back
/// to `.jpg` for images and `.mp4` for videos.
pub fn extension_from_url(url: &str, kind: AssetKind) -> &'static str {
    let path = url.split(['?', '#']).next().unwrap_or(url);
    let file = path.rsplit('/').next().unwrap_or(path);
    let ext = file
        .rsplit_once('.')
        .map(|(_, ext)| ext.to_ascii_lowercase())
        .unwrap_or_default();

    match (ext.as_str(), kind) {
        ("png", _) => ".png",
        ("jpg", _) => ".jpg",
        ("jpeg", _) => ".jpeg",
        ("webp", _) => ".webp",
        ("gif", _) => ".gif",
        ("mp4", _) => ".mp4",
        ("webm", _) => ".webm",
        (_, AssetKind::Image) => ".jpg",
        (_, AssetKind::Video) => ".mp4",
    }
}

/// MIME type for an extension produced by [`extension_from_url`].
pub fn content_type_for_extension(ext: &str) -> &'static str {
    match ext.trim_start_matches('.').to_ascii_lowercase().as_str() {
        "jpg" | "jpeg" => "image/jpeg",
        "png" => "image/png",
        "webp" => "image/webp",
        "gif" => "image/gif",
        "mp4" => "video/mp4",
        "webm" => "video/webm",
        _ => "application/octet-stream",
    }
}

/// Durable object key: `{prefix}/{job}/{job}_{index}{ext}`.
pub fn asset_key(prefix: &str, job_id: DbId, index: i32, ext: &str) -> String {
    format!("{prefix}/{job_id}/{job_id}_{index}{ext}")
}

/// Thumbnail object key: `{prefix}/{job}/thumbs/{variant}_{job}_{index}.jpg`.
pub fn thumbnail_key(prefix: &str, job_id: DbId, index: i32, variant: ThumbnailVariant) -> String {
    format!(
        "{prefix}/{job_id}/thumbs/{}_{job_id}_{index}.jpg",
        variant.as_str()
    )
}
