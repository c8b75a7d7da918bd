use crate::config::DownloadConfig;
use crate::error::ErrorCategory;
use crate::Error;
use rand::Rng;
use std::time::Duration;

/// Backoff schedule for repeated attempts against one flaky dependency.
///
/// `max_attempts` counts the first try. The schedule only decides *if*
/// and *when* to try again; the call sites (source tasks, the PDF
/// downloader) own their own loops because each interleaves retries
/// with pacing, cancellation, and bookkeeping of its own.
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// Total tries, first included
    pub max_attempts: u32,
    /// Backoff before the first repeat
    pub initial_delay: Duration,
    /// Ceiling for any computed delay
    pub max_delay: Duration,
    /// Exponential growth factor
    pub multiplier: f64,
    /// Proportional jitter added on top, 0.1 = up to +10%
    pub jitter: f64,
}

impl RetryConfig {
    /// Source searches get exactly one follow-up try after an upstream
    /// 5xx. Anything slower is time better spent on the other sources.
    #[must_use]
    pub const fn source_search() -> Self {
        Self {
            max_attempts: 2,
            initial_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(5),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Spacing between tries against a source that answered 429 without
    /// a Retry-After hint
    #[must_use]
    pub const fn rate_limited_source() -> Self {
        Self {
            max_attempts: 3,
            initial_delay: Duration::from_secs(1),
            max_delay: Duration::from_secs(30),
            multiplier: 1.5,
            jitter: 0.3,
        }
    }

    /// Per-candidate-URL schedule, parameterized by the download
    /// settings (attempt cap and first backoff are operator-configured)
    #[must_use]
    pub fn for_downloads(config: &DownloadConfig) -> Self {
        Self {
            max_attempts: config.attempts_per_url.max(1),
            initial_delay: Duration::from_secs(config.initial_backoff_seconds),
            max_delay: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }

    /// Whether a repeat is worthwhile after `failed_attempts` failures
    #[must_use]
    pub fn should_retry(&self, error: &Error, failed_attempts: u32) -> bool {
        match error.category() {
            ErrorCategory::Permanent => false,
            ErrorCategory::Transient | ErrorCategory::RateLimited => {
                failed_attempts < self.max_attempts
            }
        }
    }

    /// Delay before the next try: a server-provided Retry-After wins,
    /// otherwise the backoff schedule
    #[must_use]
    pub fn next_delay(&self, error: &Error, failed_attempts: u32) -> Duration {
        if let Some(hint) = error.retry_after() {
            return hint.min(self.max_delay);
        }
        self.backoff_delay(failed_attempts.saturating_sub(1))
    }

    /// Capped exponential backoff with proportional jitter;
    /// `completed_repeats` is 0 before the first repeat
    #[must_use]
    pub fn backoff_delay(&self, completed_repeats: u32) -> Duration {
        let raw = self.initial_delay.as_secs_f64() * self.multiplier.powi(completed_repeats as i32);
        let capped = raw.min(self.max_delay.as_secs_f64());
        let jittered = if self.jitter > 0.0 && capped > 0.0 {
            capped * (1.0 + rand::thread_rng().gen_range(0.0..=self.jitter))
        } else {
            capped
        };
        Duration::from_secs_f64(jittered)
    }
}
