//! Shared query parameter types for API handlers.

use atelier_core::error::CoreError;
use atelier_core::metadata::JobType;
use atelier_core::transfer::CandidateFilter;
use atelier_core::types::Timestamp;
use serde::Deserialize;

/// Generic pagination parameters (`?limit=&offset=`).
///
/// Values are clamped by the query layer.
#[derive(Debug, Deserialize)]
pub struct PaginationParams {
    pub limit: Option<i64>,
    pub offset: Option<i64>,
}

/// Operator filters for the migration queue (`?start=&end=&job_type=`).
#[derive(Debug, Default, Deserialize)]
pub struct TransferFilterParams {
    pub start: Option<Timestamp>,
    pub end: Option<Timestamp>,
    pub job_type: Option<String>,
}

impl TransferFilterParams {
    pub fn into_filter(self) -> Result<CandidateFilter, CoreError> {
        let job_type = match self.job_type.as_deref() {
            None | Some("") => None,
            Some(raw) => Some(JobType::parse(raw).ok_or_else(|| {
                CoreError::Validation(format!("Unknown job_type '{raw}'"))
            })?),
        };
        if let (Some(start), Some(end)) = (self.start, self.end) {
            if start > end {
                return Err(CoreError::Validation("start must not be after end".into()));
            }
        }
        Ok(CandidateFilter {
            created_from: self.start,
            created_to: self.end,
            job_type,
        })
    }
}

#[cfg(test)]
mod tests {
    use assert_matches::assert_matches;
    use chrono::{Duration, Utc};

    use super::*;

    #[test]
    fn job_type_is_parsed() {
        let filter = TransferFilterParams {
            job_type: Some("video".into()),
            ..Default::default()
        }
        .into_filter()
        .unwrap();
        assert_eq!(filter.job_type, Some(JobType::Video));
    }

    #[test]
    fn unknown_job_type_is_rejected() {
        let result = TransferFilterParams {
            job_type: Some("audio".into()),
            ..Default::default()
        }
        .into_filter();
        assert_matches!(result, Err(CoreError::Validation(_)));
    }

    #[test]
    fn inverted_range_is_rejected() {
        let now = Utc::now();
        let result = TransferFilterParams {
            start: Some(now),
            end: Some(now - Duration::days(1)),
            job_type: None,
        }
        .into_filter();
        assert_matches!(result, Err(CoreError::Validation(_)));
    }
}
