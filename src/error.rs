use crate::client::SourceId;
use std::time::Duration;
use thiserror::Error;

/// Comprehensive error categorization for the discovery pipeline
#[derive(Error, Debug)]
pub enum Error {
    // Configuration errors (permanent failures)
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    // I/O errors (potentially transient)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    // Serialization errors (usually permanent)
    #[error("Serialization error: {0}")]
    Serde(#[from] serde_json::Error),

    // Network errors (transient - should retry)
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),

    // Client errors (permanent - don't retry)
    #[error("Invalid input: {field} - {reason}")]
    InvalidInput { field: String, reason: String },

    // Per-source failures. These aggregate into result metadata; only the
    // pipeline decides whether any of them surfaces.
    #[error("Source {source} rate limited (retry after {retry_after:?})")]
    SourceRateLimited {
        source: SourceId,
        retry_after: Option<Duration>,
    },

    #[error("Source {source} blocked the request (anti-bot)")]
    SourceBlocked { source: SourceId },

    #[error("Source {source} upstream failure: HTTP {status}")]
    SourceUpstream { source: SourceId, status: u16 },

    #[error("Source {source} timed out")]
    SourceTimeout { source: SourceId },

    #[error("Source {source} requires authentication")]
    SourceAuthRequired { source: SourceId },

    #[error("Source {source} error: {reason}")]
    Source { source: SourceId, reason: String },

    // Full-text acquisition
    #[error("Download failed for {url}: {reason}")]
    DownloadFailed { url: String, reason: String },

    #[error("All download candidates failed for publication {publication}")]
    AllDownloadsFailed { publication: String },

    // Cancellation and deadlines
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Deadline exceeded")]
    DeadlineExceeded,

    #[error("Timeout error: operation timed out after {timeout:?}")]
    Timeout { timeout: Duration },

    // Cache errors (downgraded to warnings at call sites)
    #[error("Cache error: {operation} failed - {reason}")]
    Cache { operation: String, reason: String },

    // Parse errors
    #[error("Parse error in {context}: {message}")]
    Parse { context: String, message: String },
}

/// Error categorization for retry strategies
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorCategory {
    /// Permanent errors - should not retry
    Permanent,
    /// Transient errors - safe to retry
    Transient,
    /// Rate limited - retry with backoff
    RateLimited,
}

impl Error {
    /// Categorize error for retry logic
    #[must_use]
    pub const fn category(&self) -> ErrorCategory {
        match self {
            // Permanent errors - don't retry
            Self::Config(_)
            | Self::InvalidInput { .. }
            | Self::Serde(_)
            | Self::Parse { .. }
            | Self::SourceBlocked { .. }
            | Self::SourceAuthRequired { .. }
            | Self::Cancelled
            | Self::DeadlineExceeded => ErrorCategory::Permanent,

            // Rate limited - retry with backoff
            Self::SourceRateLimited { .. } => ErrorCategory::RateLimited,

            // Everything network-shaped is transient
            Self::Io(_)
            | Self::Http(_)
            | Self::SourceUpstream { .. }
            | Self::SourceTimeout { .. }
            | Self::Source { .. }
            | Self::DownloadFailed { .. }
            | Self::AllDownloadsFailed { .. }
            | Self::Timeout { .. }
            | Self::Cache { .. } => ErrorCategory::Transient,
        }
    }

    /// Check if error is retryable
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self.category(),
            ErrorCategory::Transient | ErrorCategory::RateLimited
        )
    }

    /// Get suggested retry delay for rate limited errors
    #[must_use]
    pub const fn retry_after(&self) -> Option<Duration> {
        match self {
            Self::SourceRateLimited {
                retry_after: Some(delay),
                ..
            } => Some(*delay),
            _ => None,
        }
    }

    /// The source this error is attributed to, if any
    #[must_use]
    pub const fn source_tag(&self) -> Option<SourceId> {
        match self {
            Self::SourceRateLimited { source, .. }
            | Self::SourceBlocked { source }
            | Self::SourceUpstream { source, .. }
            | Self::SourceTimeout { source }
            | Self::SourceAuthRequired { source }
            | Self::Source { source, .. } => Some(*source),
            _ => None,
        }
    }

    /// True for the three failure kinds that reach the caller of
    /// `Pipeline::search` as hard errors
    #[must_use]
    pub const fn is_hard_failure(&self) -> bool {
        matches!(
            self,
            Self::InvalidInput { .. } | Self::Cancelled | Self::DeadlineExceeded
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;

// Source-level error conversion: attach the source tag that produced it
impl Error {
    pub fn from_source(source: SourceId, err: crate::client::providers::SourceError) -> Self {
        use crate::client::providers::SourceError;
        match err {
            SourceError::RateLimited { retry_after } => Self::SourceRateLimited {
                source,
                retry_after,
            },
            SourceError::Upstream { status } => Self::SourceUpstream { source, status },
            SourceError::Blocked => Self::SourceBlocked { source },
            SourceError::AuthRequired => Self::SourceAuthRequired { source },
            SourceError::Timeout => Self::SourceTimeout { source },
            SourceError::NotFound => Self::Source {
                source,
                reason: "record not found".to_string(),
            },
            SourceError::Network(reason) => Self::Source { source, reason },
            SourceError::Parse(message) => Self::Parse {
                context: source.as_str().to_string(),
                message,
            },
            SourceError::InvalidQuery(reason) => Self::InvalidInput {
                field: "query".to_string(),
                reason,
            },
            SourceError::Unsupported(operation) => Self::Source {
                source,
                reason: format!("unsupported operation: {operation}"),
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn invalid_input_is_permanent() {
        let err = Error::InvalidInput {
            field: "query".to_string(),
            reason: "empty".to_string(),
        };
        assert_eq!(err.category(), ErrorCategory::Permanent);
        assert!(!err.is_retryable());
        assert!(err.is_hard_failure());
    }

    #[test]
    fn rate_limited_carries_retry_after() {
        let err = Error::SourceRateLimited {
            source: SourceId::Pubmed,
            retry_after: Some(Duration::from_secs(7)),
        };
        assert_eq!(err.category(), ErrorCategory::RateLimited);
        assert_eq!(err.retry_after(), Some(Duration::from_secs(7)));
        assert_eq!(err.source_tag(), Some(SourceId::Pubmed));
    }

    #[test]
    fn blocked_is_not_retryable() {
        let err = Error::SourceBlocked {
            source: SourceId::Scholar,
        };
        assert!(!err.is_retryable());
        assert!(!err.is_hard_failure());
    }

    #[test]
    fn upstream_is_transient() {
        let err = Error::SourceUpstream {
            source: SourceId::OpenAlex,
            status: 502,
        };
        assert_eq!(err.category(), ErrorCategory::Transient);
        assert!(err.is_retryable());
    }
}
