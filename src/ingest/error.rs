// src/ingest/error.rs
use std::time::Duration;

use crate::ingest::types::Protocol;

/// Result type alias for adapter operations.
pub type FetchResult<T> = std::result::Result<T, FetchError>;

/// Everything that can go wrong fetching one publisher. Never escapes the
/// orchestrator: a failing publisher contributes zero items for that cycle.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("request timed out")]
    Timeout,

    #[error("rate limited, retry after {}s", .retry_after.as_secs())]
    RateLimited { retry_after: Duration },

    #[error("malformed payload: {0}")]
    Malformed(String),

    #[error("upstream returned HTTP {0}")]
    Status(u16),

    #[error("rpc error: {0}")]
    Rpc(String),

    #[error("no provider registered for protocol {0:?}")]
    Unsupported(Protocol),

    #[error("http error: {0}")]
    Http(#[source] reqwest::Error),
}

impl From<reqwest::Error> for FetchError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            FetchError::Timeout
        } else if e.is_decode() {
            FetchError::Malformed(e.to_string())
        } else {
            FetchError::Http(e)
        }
    }
}

/// Error classification tag stored in the resilience caches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Not found or unauthorized; skipped for the invalid-handle TTL.
    Invalid,
    /// Counted; skipped after repeated occurrences.
    Timeout,
    /// Provider-imposed wait.
    RateLimited,
    /// Anything else; retried on the next cycle.
    Transient,
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::NotFound(_) | FetchError::Unauthorized(_) => FailureKind::Invalid,
            FetchError::Timeout => FailureKind::Timeout,
            FetchError::RateLimited { .. } => FailureKind::RateLimited,
            _ => FailureKind::Transient,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kinds_follow_taxonomy() {
        assert_eq!(FetchError::NotFound("x".into()).kind(), FailureKind::Invalid);
        assert_eq!(FetchError::Unauthorized("x".into()).kind(), FailureKind::Invalid);
        assert_eq!(FetchError::Timeout.kind(), FailureKind::Timeout);
        assert_eq!(
            FetchError::RateLimited {
                retry_after: Duration::from_secs(5)
            }
            .kind(),
            FailureKind::RateLimited
        );
        assert_eq!(FetchError::Status(502).kind(), FailureKind::Transient);
    }

    #[test]
    fn rate_limit_message_names_wait() {
        let e = FetchError::RateLimited {
            retry_after: Duration::from_secs(42),
        };
        assert_eq!(e.to_string(), "rate limited, retry after 42s");
    }
}
