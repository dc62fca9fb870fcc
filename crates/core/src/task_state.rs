//! Normalized provider task state and the completion signals fed into
//! the reconciler.

use serde::{Deserialize, Serialize};

/// Provider task state after adapter normalization.
///
/// Every adapter maps its native vocabulary onto exactly one of these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TaskState {
    Waiting,
    Queued,
    Generating,
    Success,
    Fail,
}

impl TaskState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Success | Self::Fail)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Waiting => "waiting",
            Self::Queued => "queued",
            Self::Generating => "generating",
            Self::Success => "success",
            Self::Fail => "fail",
        }
    }
}

/// Machine-readable failure codes kept in a job's audit record.
///
/// These are never shown to end users verbatim.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ErrorCode {
    /// The provider rejected or never answered `createTask`.
    ApiCallFailed,
    /// The provider accepted the task but the local charge and status
    /// update could not be committed.
    CreditsDeductionFailed,
    /// The provider reported a failed generation.
    GenerationFailed,
    /// No terminal signal arrived before the polling ceiling.
    PollingTimeout,
    /// Polling failed for a non-network reason.
    PollingError,
    /// Polling could not reach the provider.
    NetworkError,
    /// The provider reported success without any result URL.
    EmptyResult,
    /// The job never left `Pending` within the polling ceiling.
    SubmissionTimeout,
}

impl ErrorCode {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ApiCallFailed => "API_CALL_FAILED",
            Self::CreditsDeductionFailed => "CREDITS_DEDUCTION_FAILED",
            Self::GenerationFailed => "GENERATION_FAILED",
            Self::PollingTimeout => "POLLING_TIMEOUT",
            Self::PollingError => "POLLING_ERROR",
            Self::NetworkError => "NETWORK_ERROR",
            Self::EmptyResult => "EMPTY_RESULT",
            Self::SubmissionTimeout => "SUBMISSION_TIMEOUT",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "API_CALL_FAILED" => Some(Self::ApiCallFailed),
            "CREDITS_DEDUCTION_FAILED" => Some(Self::CreditsDeductionFailed),
            "GENERATION_FAILED" => Some(Self::GenerationFailed),
            "POLLING_TIMEOUT" => Some(Self::PollingTimeout),
            "POLLING_ERROR" => Some(Self::PollingError),
            "NETWORK_ERROR" => Some(Self::NetworkError),
            "EMPTY_RESULT" => Some(Self::EmptyResult),
            "SUBMISSION_TIMEOUT" => Some(Self::SubmissionTimeout),
            _ => None,
        }
    }
}

/// Where a completion signal came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SignalSource {
    /// Provider push to the callback URL.
    Webhook,
    /// Background or on-demand provider query.
    Poll,
    /// Explicit failure report (client-side polling timeout, operators).
    Report,
}

/// A terminal signal about a provider task.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompletionSignal {
    Success {
        result_urls: Vec<String>,
    },
    Failure {
        code: ErrorCode,
        reason: Option<String>,
    },
}

impl CompletionSignal {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success { .. })
    }

    /// Build a signal from a normalized task state.
    ///
    /// Returns `None` for non-terminal states.
    pub fn from_task_state(
        state: TaskState,
        result_urls: Vec<String>,
        fail_reason: Option<String>,
    ) -> Option<Self> {
        match state {
            TaskState::Success => Some(Self::Success { result_urls }),
            TaskState::Fail => Some(Self::Failure {
                code: ErrorCode::GenerationFailed,
                reason: fail_reason,
            }),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_codes_parse_their_own_labels() {
        for code in [
            ErrorCode::ApiCallFailed,
            ErrorCode::CreditsDeductionFailed,
            ErrorCode::GenerationFailed,
            ErrorCode::PollingTimeout,
            ErrorCode::PollingError,
            ErrorCode::NetworkError,
            ErrorCode::EmptyResult,
            ErrorCode::SubmissionTimeout,
        ] {
            assert_eq!(ErrorCode::parse(code.as_str()), Some(code));
        }
        assert_eq!(ErrorCode::parse("SOMETHING_ELSE"), None);
    }

    #[test]
    fn non_terminal_states_produce_no_signal() {
        for state in [TaskState::Waiting, TaskState::Queued, TaskState::Generating] {
            assert!(CompletionSignal::from_task_state(state, vec![], None).is_none());
        }
    }

    #[test]
    fn fail_state_maps_to_generation_failed() {
        let signal =
            CompletionSignal::from_task_state(TaskState::Fail, vec![], Some("nsfw".into()));
        assert_eq!(
            signal,
            Some(CompletionSignal::Failure {
                code: ErrorCode::GenerationFailed,
                reason: Some("nsfw".into()),
            })
        );
    }
}
