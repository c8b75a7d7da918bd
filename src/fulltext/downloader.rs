use super::resolver::CandidateStream;
use super::{MIN_PDF_BYTES, PDF_MAGIC};
use crate::client::{CandidateUrl, Publication, UrlKind};
use crate::config::DownloadConfig;
use crate::resilience::RetryConfig;
use crate::{Error, Result};
use futures::StreamExt;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tokio::sync::Semaphore;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

// Publishers routinely refuse the default reqwest UA
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Outcome of all tries against one candidate URL
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CandidateAttempt {
    pub success: bool,
    pub final_url: String,
    pub kind: UrlKind,
    pub bytes: u64,
    pub latency_ms: u64,
    /// HTTP tries made against this URL (≤ the configured per-URL cap)
    pub attempts: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Aggregated acquisition record for one publication
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadReport {
    pub id: String,
    pub publication: String,
    pub success: bool,
    pub pdf_path: Option<PathBuf>,
    pub candidates: Vec<CandidateAttempt>,
}

impl DownloadReport {
    /// Number of candidate URLs attempted
    #[must_use]
    pub fn attempts(&self) -> usize {
        self.candidates.len()
    }
}

enum TryOutcome {
    Success {
        path: PathBuf,
        bytes: u64,
    },
    Retryable {
        reason: String,
        retry_after: Option<Duration>,
    },
    Fatal(String),
}

/// Streaming PDF downloader with validation, retry, and multi-candidate
/// fallback
pub struct PdfDownloader {
    client: Client,
    config: DownloadConfig,
    retry: RetryConfig,
    permits: Arc<Semaphore>,
}

impl PdfDownloader {
    pub fn new(config: DownloadConfig) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.timeout_seconds))
            .connect_timeout(Duration::from_secs(10))
            .redirect(reqwest::redirect::Policy::limited(
                config.max_redirects.min(10) as usize,
            ))
            .user_agent(BROWSER_USER_AGENT)
            .build()?;

        let retry = RetryConfig::for_downloads(&config);
        let permits = Arc::new(Semaphore::new(config.max_concurrent.max(1)));
        Ok(Self {
            client,
            config,
            retry,
            permits,
        })
    }

    /// Deterministic on-disk location for a URL; never escapes the base
    /// directory because the file name is a hash
    #[must_use]
    pub fn target_path(&self, url: &str) -> PathBuf {
        let digest = Sha256::digest(url.as_bytes());
        self.config.directory.join(format!("{digest:x}.pdf"))
    }

    /// Acquire a PDF for one publication, advancing through resolver
    /// candidates until a download validates. On success the
    /// publication's `pdf_local_path` and `fulltext_url` are set.
    pub async fn acquire(
        &self,
        publication: &mut Publication,
        candidates: &mut CandidateStream<'_>,
        cancel: &CancellationToken,
    ) -> DownloadReport {
        let _permit = self
            .permits
            .acquire()
            .await
            .expect("download semaphore is never closed");

        let mut report = DownloadReport {
            id: uuid::Uuid::new_v4().to_string(),
            publication: publication.display_id(),
            success: false,
            pdf_path: None,
            candidates: Vec::new(),
        };

        while let Some(candidate) = candidates.next().await {
            if cancel.is_cancelled() {
                debug!("Download cancelled before candidate {}", candidate.url);
                break;
            }
            if candidate.requires_manual_auth {
                // institutional links cannot be fetched unattended; they
                // stay on the publication for the caller
                publication.institutional_urls.push(candidate.clone());
                continue;
            }

            let attempt = self.download_candidate(&candidate, cancel).await;
            let succeeded = attempt.success;
            if succeeded {
                report.pdf_path = Some(self.target_path(&candidate.url));
                publication.pdf_local_path = report.pdf_path.clone();
                if publication.fulltext_url.is_none() {
                    publication.fulltext_url = Some(candidate.url.clone());
                }
            }
            report.candidates.push(attempt);
            if succeeded {
                report.success = true;
                break;
            }
        }

        if !report.success {
            debug!(
                "No candidate produced a PDF for {} ({} attempted)",
                report.publication,
                report.attempts()
            );
        }
        report
    }

    /// Download one candidate with the per-URL retry policy
    pub async fn download_candidate(
        &self,
        candidate: &CandidateUrl,
        cancel: &CancellationToken,
    ) -> CandidateAttempt {
        let started = Instant::now();
        let target = self.target_path(&candidate.url);
        let mut attempt = CandidateAttempt {
            success: false,
            final_url: candidate.url.clone(),
            kind: candidate.kind,
            bytes: 0,
            latency_ms: 0,
            attempts: 0,
            error: None,
        };

        // a prior run may already have this URL on disk
        if let Ok(metadata) = tokio::fs::metadata(&target).await {
            if metadata.len() >= MIN_PDF_BYTES {
                debug!("Reusing existing download at {:?}", target);
                attempt.success = true;
                attempt.bytes = metadata.len();
                attempt.latency_ms = 0;
                return attempt;
            }
        }

        while attempt.attempts < self.retry.max_attempts {
            attempt.attempts += 1;

            let outcome = tokio::select! {
                () = cancel.cancelled() => TryOutcome::Fatal("cancelled".to_string()),
                outcome = self.try_once(&candidate.url, &target) => outcome,
            };

            match outcome {
                TryOutcome::Success { path, bytes } => {
                    info!(
                        "Downloaded {} ({} bytes) to {:?}",
                        candidate.url, bytes, path
                    );
                    attempt.success = true;
                    attempt.bytes = bytes;
                    break;
                }
                TryOutcome::Fatal(reason) => {
                    debug!("Candidate {} failed fatally: {}", candidate.url, reason);
                    attempt.error = Some(reason);
                    break;
                }
                TryOutcome::Retryable {
                    reason,
                    retry_after,
                } => {
                    warn!(
                        "Candidate {} attempt {} failed: {}",
                        candidate.url, attempt.attempts, reason
                    );
                    attempt.error = Some(reason);
                    if attempt.attempts < self.retry.max_attempts {
                        // a Retry-After header from the server trumps
                        // the backoff schedule
                        let delay = retry_after.map_or_else(
                            || self.retry.backoff_delay(attempt.attempts - 1),
                            |hint| hint.min(self.retry.max_delay),
                        );
                        tokio::select! {
                            () = cancel.cancelled() => break,
                            () = tokio::time::sleep(delay) => {}
                        }
                    }
                }
            }
        }

        attempt.latency_ms = started.elapsed().as_millis() as u64;
        attempt
    }

    /// One HTTP try: stream to a temp file, validate, atomic rename
    async fn try_once(&self, url: &str, target: &Path) -> TryOutcome {
        if let Some(parent) = target.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                return TryOutcome::Fatal(format!("cannot create download directory: {e}"));
            }
        }

        let response = match self.client.get(url).send().await {
            Ok(response) => response,
            Err(e) if e.is_timeout() || e.is_connect() => {
                return TryOutcome::Retryable {
                    reason: format!("transport: {e}"),
                    retry_after: None,
                };
            }
            Err(e) => return TryOutcome::Fatal(format!("request: {e}")),
        };

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = response
                .headers()
                .get(reqwest::header::RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(|v| v.parse::<u64>().ok())
                .map(Duration::from_secs);
            return TryOutcome::Retryable {
                reason: "rate limited".to_string(),
                retry_after,
            };
        }
        if status.is_server_error() {
            return TryOutcome::Retryable {
                reason: format!("HTTP {status}"),
                retry_after: None,
            };
        }
        if !status.is_success() {
            return TryOutcome::Fatal(format!("HTTP {status}"));
        }

        let content_type_pdf = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .is_some_and(|v| v.starts_with("application/pdf"));

        if let Some(length) = response.content_length() {
            if length > self.config.max_pdf_bytes {
                return TryOutcome::Fatal(format!(
                    "content length {length} exceeds limit {}",
                    self.config.max_pdf_bytes
                ));
            }
        }

        let temp = target.with_extension("pdf.part");
        let mut file = match File::create(&temp).await {
            Ok(file) => file,
            Err(e) => return TryOutcome::Fatal(format!("cannot create temp file: {e}")),
        };

        let mut stream = response.bytes_stream();
        let mut written: u64 = 0;
        let mut head: Vec<u8> = Vec::with_capacity(PDF_MAGIC.len());

        while let Some(chunk) = stream.next().await {
            let chunk = match chunk {
                Ok(chunk) => chunk,
                Err(e) => {
                    drop(file);
                    let _ = tokio::fs::remove_file(&temp).await;
                    return TryOutcome::Retryable {
                        reason: format!("stream: {e}"),
                        retry_after: None,
                    };
                }
            };

            if head.len() < PDF_MAGIC.len() {
                let take = (PDF_MAGIC.len() - head.len()).min(chunk.len());
                head.extend_from_slice(&chunk[..take]);
                if head.len() == PDF_MAGIC.len() && !content_type_pdf && head != PDF_MAGIC {
                    drop(file);
                    let _ = tokio::fs::remove_file(&temp).await;
                    return TryOutcome::Fatal("response is not a PDF".to_string());
                }
            }

            written += chunk.len() as u64;
            if written > self.config.max_pdf_bytes {
                drop(file);
                let _ = tokio::fs::remove_file(&temp).await;
                return TryOutcome::Fatal(format!(
                    "body exceeds limit {}",
                    self.config.max_pdf_bytes
                ));
            }

            if let Err(e) = file.write_all(&chunk).await {
                drop(file);
                let _ = tokio::fs::remove_file(&temp).await;
                return TryOutcome::Fatal(format!("write: {e}"));
            }
        }

        if let Err(e) = file.flush().await {
            let _ = tokio::fs::remove_file(&temp).await;
            return TryOutcome::Fatal(format!("flush: {e}"));
        }
        drop(file);

        // accepted when either the header or the magic bytes say PDF
        if !content_type_pdf && head != PDF_MAGIC {
            let _ = tokio::fs::remove_file(&temp).await;
            return TryOutcome::Fatal("body does not start with %PDF-".to_string());
        }
        if written < MIN_PDF_BYTES {
            let _ = tokio::fs::remove_file(&temp).await;
            return TryOutcome::Fatal(format!(
                "file too small ({written} bytes, minimum {MIN_PDF_BYTES})"
            ));
        }

        if let Err(e) = tokio::fs::rename(&temp, target).await {
            let _ = tokio::fs::remove_file(&temp).await;
            return TryOutcome::Fatal(format!("rename: {e}"));
        }

        TryOutcome::Success {
            path: target.to_path_buf(),
            bytes: written,
        }
    }

    /// Convert a failed report into the error recorded per publication
    #[must_use]
    pub fn failure_error(report: &DownloadReport) -> Error {
        Error::AllDownloadsFailed {
            publication: report.publication.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn downloader(dir: &Path) -> PdfDownloader {
        let config = DownloadConfig {
            directory: dir.to_path_buf(),
            max_pdf_bytes: 1024 * 1024,
            max_concurrent: 2,
            max_redirects: 5,
            attempts_per_url: 2,
            initial_backoff_seconds: 0,
            timeout_seconds: 5,
        };
        PdfDownloader::new(config).unwrap()
    }

    #[test]
    fn target_path_is_hash_named_and_inside_base() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = downloader(dir.path());
        let path = downloader.target_path("https://example.org/../../../etc/passwd");
        assert!(path.starts_with(dir.path()));
        let name = path.file_name().unwrap().to_string_lossy().to_string();
        assert!(name.ends_with(".pdf"));
        assert_eq!(name.len(), 64 + 4);
    }

    #[test]
    fn same_url_same_path() {
        let dir = tempfile::tempdir().unwrap();
        let downloader = downloader(dir.path());
        assert_eq!(
            downloader.target_path("https://a/b.pdf"),
            downloader.target_path("https://a/b.pdf")
        );
        assert_ne!(
            downloader.target_path("https://a/b.pdf"),
            downloader.target_path("https://a/c.pdf")
        );
    }
}
