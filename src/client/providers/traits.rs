use crate::client::{Publication, SourceId};
use async_trait::async_trait;
use std::time::Duration;
use thiserror::Error;

/// Search parameters accepted by every source client
#[derive(Debug, Clone)]
pub struct SearchQuery {
    /// Query string (non-empty UTF-8)
    pub query: String,
    /// Maximum results to return, 1..=200
    pub max_results: u32,
    /// Inclusive lower publication-year bound
    pub year_from: Option<i32>,
    /// Inclusive upper publication-year bound
    pub year_to: Option<i32>,
}

impl SearchQuery {
    #[must_use]
    pub fn new(query: impl Into<String>) -> Self {
        Self {
            query: query.into(),
            max_results: 20,
            year_from: None,
            year_to: None,
        }
    }

    #[must_use]
    pub const fn with_max_results(mut self, max_results: u32) -> Self {
        self.max_results = max_results;
        self
    }

    /// Enforce the input contract shared by all clients
    pub fn validate(&self) -> Result<(), SourceError> {
        if self.query.trim().is_empty() {
            return Err(SourceError::InvalidQuery(
                "query must be non-empty".to_string(),
            ));
        }
        if self.max_results == 0 || self.max_results > 200 {
            return Err(SourceError::InvalidQuery(format!(
                "max_results must be in 1..=200, got {}",
                self.max_results
            )));
        }
        if let (Some(from), Some(to)) = (self.year_from, self.year_to) {
            if from > to {
                return Err(SourceError::InvalidQuery(format!(
                    "invalid year range {from}..{to}"
                )));
            }
        }
        Ok(())
    }
}

/// Errors a single source client can produce. The pipeline attaches the
/// source tag via `Error::from_source`.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("rate limited")]
    RateLimited { retry_after: Option<Duration> },

    #[error("upstream failure: HTTP {status}")]
    Upstream { status: u16 },

    #[error("record not found")]
    NotFound,

    #[error("authentication required")]
    AuthRequired,

    #[error("request blocked by anti-bot measures")]
    Blocked,

    #[error("request timed out")]
    Timeout,

    #[error("network error: {0}")]
    Network(String),

    #[error("parse error: {0}")]
    Parse(String),

    #[error("invalid query: {0}")]
    InvalidQuery(String),

    #[error("unsupported operation: {0}")]
    Unsupported(&'static str),
}

impl SourceError {
    /// Map a reqwest transport error onto the source error taxonomy
    #[must_use]
    pub fn from_http(err: &reqwest::Error) -> Self {
        if err.is_timeout() {
            Self::Timeout
        } else if err.is_connect() {
            Self::Network(format!("connection failed: {err}"))
        } else {
            Self::Network(err.to_string())
        }
    }

    /// Map a non-success HTTP status onto the source error taxonomy
    #[must_use]
    pub fn from_status(status: reqwest::StatusCode, retry_after: Option<Duration>) -> Self {
        match status.as_u16() {
            401 | 403 => Self::AuthRequired,
            404 => Self::NotFound,
            429 => Self::RateLimited { retry_after },
            s if s >= 500 => Self::Upstream { status: s },
            s => Self::Network(format!("unexpected HTTP status {s}")),
        }
    }

    /// `Blocked` and `AuthRequired` must not be retried by the pipeline
    #[must_use]
    pub const fn is_retryable(&self) -> bool {
        !matches!(
            self,
            Self::Blocked | Self::AuthRequired | Self::InvalidQuery(_) | Self::Unsupported(_)
        )
    }
}

/// Read the Retry-After header off a 429/503 response, if present
#[must_use]
pub fn retry_after_header(response: &reqwest::Response) -> Option<Duration> {
    response
        .headers()
        .get(reqwest::header::RETRY_AFTER)
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(Duration::from_secs)
}

/// Contract implemented by every publication source.
///
/// `search` is mandatory; identifier lookups and citation retrieval are
/// optional capabilities with `Unsupported` defaults, so the pipeline can
/// enumerate clients uniformly and probe per tag.
#[async_trait]
pub trait SourceClient: Send + Sync {
    /// Static tag identifying this source
    fn id(&self) -> SourceId;

    /// Search the source. Every returned publication carries this
    /// client's tag in `sources` and satisfies the identity invariant;
    /// ordering is source-native relevance.
    async fn search(&self, query: &SearchQuery) -> Result<Vec<Publication>, SourceError>;

    /// Look up a single record by DOI
    async fn fetch_by_doi(&self, _doi: &str) -> Result<Option<Publication>, SourceError> {
        Err(SourceError::Unsupported("fetch_by_doi"))
    }

    /// Look up a single record by the source's native identifier
    async fn fetch_by_id(&self, _native_id: &str) -> Result<Option<Publication>, SourceError> {
        Err(SourceError::Unsupported("fetch_by_id"))
    }

    /// Current citation count for a publication, if the source tracks one
    async fn get_citations(&self, _publication: &Publication) -> Result<u32, SourceError> {
        Err(SourceError::Unsupported("get_citations"))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn query_validation() {
        assert!(SearchQuery::new("crispr").validate().is_ok());
        assert!(SearchQuery::new("  ").validate().is_err());
        assert!(SearchQuery::new("x").with_max_results(0).validate().is_err());
        assert!(SearchQuery::new("x")
            .with_max_results(201)
            .validate()
            .is_err());

        let mut q = SearchQuery::new("x");
        q.year_from = Some(2024);
        q.year_to = Some(2020);
        assert!(q.validate().is_err());
    }

    #[test]
    fn status_mapping() {
        use reqwest::StatusCode;
        assert!(matches!(
            SourceError::from_status(StatusCode::TOO_MANY_REQUESTS, None),
            SourceError::RateLimited { .. }
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::BAD_GATEWAY, None),
            SourceError::Upstream { status: 502 }
        ));
        assert!(matches!(
            SourceError::from_status(StatusCode::FORBIDDEN, None),
            SourceError::AuthRequired
        ));
    }

    #[test]
    fn blocked_is_terminal() {
        assert!(!SourceError::Blocked.is_retryable());
        assert!(!SourceError::AuthRequired.is_retryable());
        assert!(SourceError::Timeout.is_retryable());
        assert!(SourceError::Upstream { status: 500 }.is_retryable());
    }
}
