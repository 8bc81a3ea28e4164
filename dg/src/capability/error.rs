//! Stage error classification

use std::time::Duration;
use thiserror::Error;

use super::{StageKind, StageOutput};
use crate::llm::LlmError;

/// Failure of one stage invocation
///
/// Only `Transient` errors are retried by the executor.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    #[error("transient failure: {message}")]
    Transient {
        message: String,
        /// Service-provided minimum wait before the next attempt
        retry_after: Option<Duration>,
    },

    #[error("permanent failure: {0}")]
    Permanent(String),
}

impl StageError {
    pub fn transient(message: impl Into<String>) -> Self {
        StageError::Transient {
            message: message.into(),
            retry_after: None,
        }
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        StageError::Permanent(message.into())
    }

    pub fn is_transient(&self) -> bool {
        matches!(self, StageError::Transient { .. })
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            StageError::Transient { retry_after, .. } => *retry_after,
            StageError::Permanent(_) => None,
        }
    }

    pub fn message(&self) -> &str {
        match self {
            StageError::Transient { message, .. } => message,
            StageError::Permanent(message) => message,
        }
    }

    pub(super) fn unexpected(stage: StageKind, output: &StageOutput) -> Self {
        StageError::Permanent(format!("{} stage returned unexpected {} output", stage, output.variant()))
    }
}

impl From<LlmError> for StageError {
    fn from(err: LlmError) -> Self {
        if err.is_retryable() {
            StageError::Transient {
                message: err.to_string(),
                retry_after: err.retry_after(),
            }
        } else {
            StageError::Permanent(err.to_string())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_llm_errors_classify() {
        let rate_limited: StageError = LlmError::RateLimited {
            retry_after: Duration::from_secs(2),
        }
        .into();
        assert!(rate_limited.is_transient());
        assert_eq!(rate_limited.retry_after(), Some(Duration::from_secs(2)));

        let server: StageError = LlmError::ApiError {
            status: 503,
            message: "overloaded".into(),
        }
        .into();
        assert!(server.is_transient());

        let auth: StageError = LlmError::ApiError {
            status: 401,
            message: "bad key".into(),
        }
        .into();
        assert!(!auth.is_transient());
        assert!(auth.message().contains("bad key"));

        let timeout: StageError = LlmError::Timeout(Duration::from_secs(30)).into();
        assert!(timeout.is_transient());
        assert_eq!(timeout.retry_after(), None);

        let invalid: StageError = LlmError::InvalidResponse("empty".into()).into();
        assert_eq!(invalid, StageError::permanent("Invalid response: empty"));
    }
}
