use std::time::Duration;

/// Failure taxonomy for one sync cycle.
///
/// Per-request failures are absorbed by the executor's retry policy; only
/// what survives retries reaches fetchers and the orchestrator as a `SyncError`.
#[derive(Debug, thiserror::Error)]
pub enum SyncError {
    /// Credentials rejected by the login endpoint. Never retried.
    #[error("authentication failed: {0}")]
    Auth(String),

    /// Bearer token rejected even after one refresh-and-retry.
    #[error("access token expired or revoked")]
    TokenExpired,

    /// Upstream quota exceeded and retries exhausted.
    #[error("rate limited by upstream (retry after {retry_after:?})")]
    RateLimited { retry_after: Option<Duration> },

    /// Network or 5xx failure that outlived the retry budget.
    #[error("transient upstream failure: {0}")]
    Transient(String),

    /// Payload did not match the expected schema.
    #[error("malformed response for {context}: {reason}")]
    Malformed { context: String, reason: String },

    /// Non-retryable upstream or application failure.
    #[error("upstream request failed: {0}")]
    Fatal(String),

    /// A sync was requested while another one is running.
    #[error("a sync is already running")]
    AlreadyRunning,
}

impl SyncError {
    pub fn malformed(context: impl Into<String>, reason: impl std::fmt::Display) -> Self {
        SyncError::Malformed {
            context: context.into(),
            reason: reason.to_string(),
        }
    }

    /// True when no further request can succeed without new credentials.
    pub fn is_auth(&self) -> bool {
        matches!(self, SyncError::Auth(_) | SyncError::TokenExpired)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_malformed_message() {
        let err = SyncError::malformed("machine 42", "missing field `name`");
        assert!(err.to_string().contains("machine 42"));
        assert!(err.to_string().contains("missing field"));
    }

    #[test]
    fn test_auth_errors() {
        assert!(SyncError::TokenExpired.is_auth());
        assert!(SyncError::Auth("bad password".to_string()).is_auth());
        assert!(!SyncError::AlreadyRunning.is_auth());
        assert!(!SyncError::malformed("machine 42", "bad").is_auth());
        assert!(!SyncError::Fatal("404".to_string()).is_auth());
    }
}
