//! LLM error taxonomy

use std::time::Duration;
use thiserror::Error;

/// Errors from LLM operations. Only rate-limit and network-class errors
/// are retryable; auth and malformed responses are surfaced immediately.
#[derive(Debug, Error)]
pub enum LlmError {
    #[error("Rate limited, retry after {retry_after:?}")]
    RateLimited { retry_after: Duration },

    #[error("Network error: {0}")]
    Network(#[from] reqwest::Error),

    #[error("Authentication failed: {0}")]
    Auth(String),

    #[error("API error {status}: {message}")]
    Api { status: u16, message: String },

    #[error("Malformed response: {0}")]
    Malformed(String),

    #[error("Empty response from model")]
    EmptyResponse,

    #[error("Timeout after {0:?}")]
    Timeout(Duration),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl LlmError {
    pub fn is_rate_limit(&self) -> bool {
        matches!(self, LlmError::RateLimited { .. })
    }

    /// Whether the caller should retry with backoff
    pub fn is_retryable(&self) -> bool {
        match self {
            LlmError::RateLimited { .. } => true,
            LlmError::Network(_) => true,
            LlmError::Timeout(_) => true,
            LlmError::EmptyResponse => true,
            LlmError::Api { status, .. } => *status >= 500,
            LlmError::Auth(_) => false,
            LlmError::Malformed(_) => false,
            LlmError::Json(_) => false,
        }
    }

    pub fn retry_after(&self) -> Option<Duration> {
        match self {
            LlmError::RateLimited { retry_after } => Some(*retry_after),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retryable_classification() {
        assert!(
            LlmError::RateLimited {
                retry_after: Duration::from_secs(60)
            }
            .is_retryable()
        );
        assert!(LlmError::Timeout(Duration::from_secs(30)).is_retryable());
        assert!(LlmError::EmptyResponse.is_retryable());
        assert!(
            LlmError::Api {
                status: 503,
                message: "overloaded".into()
            }
            .is_retryable()
        );

        assert!(
            !LlmError::Api {
                status: 400,
                message: "bad request".into()
            }
            .is_retryable()
        );
        assert!(!LlmError::Auth("invalid key".into()).is_retryable());
        assert!(!LlmError::Malformed("not json".into()).is_retryable());
    }

    #[test]
    fn test_retry_after() {
        let err = LlmError::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(err.retry_after(), Some(Duration::from_secs(42)));
        assert_eq!(LlmError::EmptyResponse.retry_after(), None);
    }
}
