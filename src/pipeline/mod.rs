//! The publication discovery pipeline: fan-out over enabled sources,
//! fuse, rank, and optionally enrich.

pub mod dedup;
pub mod rank;

pub use dedup::{dedupe, DedupKey};
pub use rank::{detect_intent, QueryIntent, Ranker, RankWeights};

use crate::cache::{CacheKey, CacheLayer};
use crate::citations::{CitationTracker, CitationTrackerConfig, GeoSeriesMetadata};
use crate::client::providers::{
    EuropePmcClient, OpenAlexClient, PubMedClient, ScholarClient, SearchQuery,
    SemanticScholarClient, SourceClient, UnpaywallClient,
};
use crate::client::{
    HttpClientConfig, Publication, RateLimiterRegistry, SourceFailure, SourceId,
};
use crate::config::SearchConfig;
use crate::fulltext::{DownloadReport, FullTextResolver, PdfDownloader};
use crate::resilience::RetryConfig;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

/// Phase timings, milliseconds
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct Timings {
    pub total_ms: u64,
    pub sources_ms: u64,
    pub dedup_ms: u64,
    pub rank_ms: u64,
    pub enrich_ms: u64,
}

/// Ordered, scored publications plus aggregate metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublicationResult {
    pub publications: Vec<Publication>,
    /// Candidates collected across sources before merging
    pub total_found: usize,
    pub per_source_counts: BTreeMap<SourceId, usize>,
    pub failures: Vec<SourceFailure>,
    pub query_echo: String,
    pub intent: QueryIntent,
    pub timings: Timings,
    pub cache_hit: bool,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub download_reports: Vec<DownloadReport>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub datasets: Vec<GeoSeriesMetadata>,
}

/// Per-call options beyond the query string
#[derive(Default)]
pub struct SearchOptions {
    /// Cooperative cancellation signal
    pub cancel: Option<CancellationToken>,
    /// GEO dataset metadata accompanying the query, for citation
    /// tracking
    pub datasets: Vec<GeoSeriesMetadata>,
}

/// The orchestrator. Owns every in-flight publication between fan-out
/// and the returned result; shared state is limited to the rate-limiter
/// registry and the cache, both passed in explicitly.
pub struct PublicationPipeline {
    config: SearchConfig,
    sources: Vec<Arc<dyn SourceClient>>,
    limiters: Arc<RateLimiterRegistry>,
    cache: Arc<CacheLayer>,
    resolver: Option<Arc<FullTextResolver>>,
    downloader: Option<Arc<PdfDownloader>>,
    tracker: Option<CitationTracker>,
    ranker: Ranker,
}

impl PublicationPipeline {
    /// Build the pipeline with real clients for every enabled source
    pub fn new(config: SearchConfig) -> Result<Self> {
        config.validate()?;

        let mut sources: Vec<Arc<dyn SourceClient>> = Vec::new();
        for source in config.enabled_sources() {
            let source_config = config.sources.get(source);
            let http = HttpClientConfig {
                timeout: source_config.timeout(),
                proxy: source_config.proxy_url.clone(),
                ..HttpClientConfig::default()
            };
            let client: Arc<dyn SourceClient> = match source {
                SourceId::Pubmed => Arc::new(
                    PubMedClient::new(&http, source_config.api_key.clone())
                        .map_err(|e| Error::from_source(source, e))?,
                ),
                SourceId::EuropePmc => Arc::new(
                    EuropePmcClient::new(&http).map_err(|e| Error::from_source(source, e))?,
                ),
                SourceId::SemanticScholar => Arc::new(
                    SemanticScholarClient::new(&http, source_config.api_key.clone())
                        .map_err(|e| Error::from_source(source, e))?,
                ),
                SourceId::OpenAlex => Arc::new(
                    OpenAlexClient::new(&http, Some(config.contact_email.clone()))
                        .map_err(|e| Error::from_source(source, e))?,
                ),
                SourceId::Scholar => Arc::new(
                    ScholarClient::new(&http).map_err(|e| Error::from_source(source, e))?,
                ),
                SourceId::Unpaywall => continue,
            };
            sources.push(client);
        }

        let mut limiters =
            RateLimiterRegistry::new(Duration::from_secs(1), config.pipeline.api_concurrency);
        for source in SourceId::ALL {
            limiters.register(source, config.sources.get(source).rate_limit());
        }

        let cache = Arc::new(if config.enable_cache {
            CacheLayer::open(&config.cache)
        } else {
            CacheLayer::memory()
        });

        let unpaywall = if config.enable_unpaywall {
            let http = HttpClientConfig {
                timeout: config.sources.unpaywall.timeout(),
                ..HttpClientConfig::default()
            };
            Some(Arc::new(
                UnpaywallClient::new(&http, config.contact_email.clone())
                    .map_err(|e| Error::from_source(SourceId::Unpaywall, e))?,
            ))
        } else {
            None
        };

        let resolver = if config.enable_full_text_resolve || config.enable_pdf_download {
            Some(Arc::new(FullTextResolver::new(
                &HttpClientConfig::default(),
                unpaywall,
                config.institutions.clone(),
                config.enable_institutional_access,
                config.enable_web_scrape,
            )?))
        } else {
            None
        };

        let downloader = if config.enable_pdf_download {
            Some(Arc::new(PdfDownloader::new(config.downloads.clone())?))
        } else {
            None
        };

        let tracker = if config.enable_citation_tracking {
            let http = HttpClientConfig {
                timeout: config.sources.semantic_scholar.timeout(),
                ..HttpClientConfig::default()
            };
            let client = Arc::new(
                SemanticScholarClient::new(&http, config.sources.semantic_scholar.api_key.clone())
                    .map_err(|e| Error::from_source(SourceId::SemanticScholar, e))?,
            );
            Some(CitationTracker::new(
                client,
                CitationTrackerConfig::default(),
            ))
        } else {
            None
        };

        Ok(Self {
            config,
            sources,
            limiters: Arc::new(limiters),
            cache,
            resolver,
            downloader,
            tracker,
            ranker: Ranker::new(),
        })
    }

    /// Assemble a pipeline from pre-built parts (tests, embedding)
    #[must_use]
    pub fn from_parts(
        config: SearchConfig,
        sources: Vec<Arc<dyn SourceClient>>,
        limiters: Arc<RateLimiterRegistry>,
        cache: Arc<CacheLayer>,
        resolver: Option<Arc<FullTextResolver>>,
        downloader: Option<Arc<PdfDownloader>>,
        tracker: Option<CitationTracker>,
    ) -> Self {
        Self {
            config,
            sources,
            limiters,
            cache,
            resolver,
            downloader,
            tracker,
            ranker: Ranker::new(),
        }
    }

    #[must_use]
    pub const fn config(&self) -> &SearchConfig {
        &self.config
    }

    /// Run one discovery search.
    ///
    /// Hard failures are limited to invalid input, cancellation, and
    /// deadline exhaustion; per-source failures are recorded in the
    /// result instead.
    pub async fn search(&self, query: &str, options: SearchOptions) -> Result<PublicationResult> {
        let started = Instant::now();
        let overall_deadline =
            started + Duration::from_secs(self.config.pipeline.total_deadline_seconds);
        let cancel = options.cancel.clone().unwrap_or_default();

        // 1. validation
        if query.trim().is_empty() {
            return Err(Error::InvalidInput {
                field: "query".to_string(),
                reason: "query must be non-empty".to_string(),
            });
        }
        if self.sources.is_empty() {
            return Err(Error::InvalidInput {
                field: "config".to_string(),
                reason: "all sources are disabled".to_string(),
            });
        }

        // 2. cache probe
        let cache_key = self.cache_key(query);
        if self.config.enable_cache {
            match self.cache.get::<PublicationResult>(cache_key.as_str()) {
                Ok(Some(mut cached)) => {
                    info!("Cache hit for query: {query}");
                    cached.cache_hit = true;
                    cached.timings.total_ms = started.elapsed().as_millis() as u64;
                    return Ok(cached);
                }
                Ok(None) => {}
                Err(e) => warn!("Cache read failed, continuing uncached: {e}"),
            }
        }

        // 3-5. fan-out and bounded fan-in
        let sources_started = Instant::now();
        let fanin = self.run_sources(query, &cancel, overall_deadline).await;
        let mut timings = Timings {
            sources_ms: sources_started.elapsed().as_millis() as u64,
            ..Timings::default()
        };

        let FanIn {
            staged,
            per_source_counts,
            failures,
            cancelled,
            deadline_hit,
        } = fanin;

        if cancelled && !self.config.pipeline.return_partial_on_cancel {
            return Err(Error::Cancelled);
        }
        if deadline_hit && !self.config.pipeline.return_partial_on_cancel {
            return Err(Error::DeadlineExceeded);
        }

        let total_found = staged.len();
        info!(
            "Collected {} candidates from {} sources ({} failures)",
            total_found,
            per_source_counts.len(),
            failures.len()
        );

        // 6. fuse
        let dedup_started = Instant::now();
        let mut publications = dedupe(staged);
        timings.dedup_ms = dedup_started.elapsed().as_millis() as u64;

        // 7. rank
        let rank_started = Instant::now();
        let intent = detect_intent(query, chrono::Datelike::year(&self.ranker.today()));
        let weights = RankWeights::preset(intent);
        weights.validate()?;
        debug!("Query intent: {intent}");
        self.ranker.rank(&mut publications, query, &weights);
        timings.rank_ms = rank_started.elapsed().as_millis() as u64;

        // 8-9. full-text enrichment for the top K
        let enrich_started = Instant::now();
        let mut download_reports = Vec::new();
        if Instant::now() < overall_deadline {
            if self.config.enable_full_text_resolve {
                self.attach_fulltext_urls(&mut publications).await;
            }
            if self.config.enable_pdf_download {
                download_reports = self.download_pdfs(&mut publications, &cancel).await;
            }
        } else {
            warn!("Skipping enrichment: deadline exhausted");
        }

        // 10. dataset citation tracking
        let mut datasets = options.datasets;
        if let Some(tracker) = &self.tracker {
            for dataset in &mut datasets {
                if dataset.validate().is_ok() {
                    dataset.citing_papers = Some(tracker.citing_papers(dataset).await);
                }
            }
        }
        timings.enrich_ms = enrich_started.elapsed().as_millis() as u64;
        timings.total_ms = started.elapsed().as_millis() as u64;

        let result = PublicationResult {
            publications,
            total_found,
            per_source_counts,
            failures,
            query_echo: query.to_string(),
            intent,
            timings,
            cache_hit: false,
            download_reports,
            datasets,
        };

        // 12. cache store
        if self.config.enable_cache {
            if let Err(e) =
                self.cache
                    .set(cache_key.as_str(), &result, self.config.cache.result_ttl())
            {
                warn!("Cache write failed: {e}");
            }
        }

        Ok(result)
    }

    fn cache_key(&self, query: &str) -> CacheKey {
        let mut params = BTreeMap::new();
        for source in self.config.enabled_sources() {
            params.insert(
                format!("{source}.max_results"),
                self.config.sources.get(source).max_results.to_string(),
            );
        }
        params.insert("top_k".to_string(), self.config.pipeline.top_k.to_string());
        CacheKey::compute(query, &self.config.enabled_toggle_names(), &params)
    }

    /// Spawn one task per source and collect within the fan-in window
    async fn run_sources(
        &self,
        query: &str,
        cancel: &CancellationToken,
        overall_deadline: Instant,
    ) -> FanIn {
        let (tx, mut rx) = mpsc::channel::<(SourceId, Result<Vec<Publication>>)>(
            self.sources.len().max(1),
        );
        let mut handles = Vec::new();

        for client in &self.sources {
            let source = client.id();
            let client = client.clone();
            let pacer = self.limiters.get(source);
            let source_config = self.config.sources.get(source);
            let search_query = SearchQuery {
                query: query.to_string(),
                max_results: source_config.max_results,
                year_from: None,
                year_to: None,
            };
            let timeout = source_config.timeout();
            let threshold = self.config.pipeline.consecutive_failure_threshold;
            let tx = tx.clone();
            let cancel = cancel.clone();

            handles.push(tokio::spawn(async move {
                let outcome =
                    run_one_source(client, source, pacer, search_query, timeout, threshold, cancel)
                        .await;
                let _ = tx.send((source, outcome)).await;
            }));
        }
        drop(tx);

        let window = Duration::from_secs(self.config.pipeline.deadline_seconds);
        let fanin_deadline = (Instant::now() + window).min(overall_deadline);

        let mut staged: Vec<Publication> = Vec::new();
        let mut per_source_counts = BTreeMap::new();
        let mut failures = Vec::new();
        let mut finished = 0usize;
        let mut cancelled = false;
        let mut deadline_hit = false;

        while finished < handles.len() {
            tokio::select! {
                () = cancel.cancelled() => {
                    cancelled = true;
                    break;
                }
                () = tokio::time::sleep_until(fanin_deadline.into()) => {
                    let global = Instant::now() >= overall_deadline;
                    warn!(
                        "Fan-in window elapsed with {} of {} sources finished",
                        finished,
                        handles.len()
                    );
                    deadline_hit = global && finished == 0;
                    break;
                }
                message = rx.recv() => {
                    let Some((source, outcome)) = message else { break };
                    finished += 1;
                    match outcome {
                        Ok(publications) => {
                            debug!(source = %source, state = "done", count = publications.len());
                            per_source_counts.insert(source, publications.len());
                            staged.extend(publications);
                        }
                        Err(error) => {
                            debug!(source = %source, state = "failed");
                            warn!("Source {source} failed: {error}");
                            per_source_counts.insert(source, 0);
                            failures.push(SourceFailure::from_error(source, &error));
                        }
                    }
                }
            }
        }

        // a token cancelled mid-collection may lose the select race to a
        // task that already reported; the flag must still stick
        if cancel.is_cancelled() {
            cancelled = true;
        }

        // terminal state for stragglers: cancelled
        for handle in &handles {
            handle.abort();
        }
        if finished < handles.len() && !cancelled {
            for client in &self.sources {
                let source = client.id();
                if !per_source_counts.contains_key(&source) {
                    debug!(source = %source, state = "cancelled");
                    per_source_counts.insert(source, 0);
                    failures.push(SourceFailure {
                        source,
                        kind: "timeout".to_string(),
                    });
                }
            }
        }

        FanIn {
            staged,
            per_source_counts,
            failures,
            cancelled,
            deadline_hit,
        }
    }

    /// Step 8: attach resolved candidate URLs to the top K, no fetch
    async fn attach_fulltext_urls(&self, publications: &mut [Publication]) {
        let Some(resolver) = &self.resolver else {
            return;
        };
        let top_k = self.config.pipeline.top_k.min(publications.len());

        for publication in publications.iter_mut().take(top_k) {
            let mut stream = resolver.candidates(publication);
            let candidates = stream.collect(3).await;
            if candidates.is_empty() {
                continue;
            }
            if publication.fulltext_url.is_none() {
                publication.fulltext_url = candidates
                    .iter()
                    .find(|c| !c.requires_manual_auth)
                    .map(|c| c.url.clone());
            }
            for candidate in candidates {
                if publication
                    .institutional_urls
                    .iter()
                    .all(|existing| existing.url != candidate.url)
                {
                    publication.institutional_urls.push(candidate);
                }
            }
        }
    }

    /// Step 9: download PDFs for the top K, bounded by the downloader's
    /// global concurrency cap
    async fn download_pdfs(
        &self,
        publications: &mut [Publication],
        cancel: &CancellationToken,
    ) -> Vec<DownloadReport> {
        let (Some(resolver), Some(downloader)) = (&self.resolver, &self.downloader) else {
            return Vec::new();
        };
        let top_k = self.config.pipeline.top_k.min(publications.len());

        let futures = publications[..top_k].iter().enumerate().map(|(i, p)| {
            let mut publication = p.clone();
            let resolver = resolver.clone();
            let downloader = downloader.clone();
            let cancel = cancel.clone();
            async move {
                if publication.pdf_local_path.is_some() {
                    return (i, publication, None);
                }
                let mut stream = resolver.candidates(&publication);
                let report = downloader
                    .acquire(&mut publication, &mut stream, &cancel)
                    .await;
                (i, publication, Some(report))
            }
        });

        let mut reports = Vec::new();
        for (i, updated, report) in futures::future::join_all(futures).await {
            publications[i] = updated;
            if let Some(report) = report {
                if !report.success {
                    debug!(
                        "{}",
                        PdfDownloader::failure_error(&report)
                    );
                }
                reports.push(report);
            }
        }
        reports
    }
}

struct FanIn {
    staged: Vec<Publication>,
    per_source_counts: BTreeMap<SourceId, usize>,
    failures: Vec<SourceFailure>,
    cancelled: bool,
    deadline_hit: bool,
}

/// One source task: `queued → waiting_rate_limit → requesting →
/// parsing → done | failed | cancelled`. Rate-limited and 5xx outcomes
/// are retried on the `RetryConfig` schedules; `Blocked` and
/// `AuthRequired` are terminal. A run of consecutive failures marks the
/// source unhealthy for the rest of the call.
async fn run_one_source(
    client: Arc<dyn SourceClient>,
    source: SourceId,
    pacer: Arc<crate::client::SourcePacer>,
    query: SearchQuery,
    timeout: Duration,
    failure_threshold: u32,
    cancel: CancellationToken,
) -> Result<Vec<Publication>> {
    debug!(source = %source, state = "queued");
    let upstream_schedule = RetryConfig::source_search();
    let rate_limited_schedule = RetryConfig::rate_limited_source();
    let mut consecutive_failures = 0u32;

    loop {
        debug!(source = %source, state = "waiting_rate_limit");
        let guard = tokio::select! {
            () = cancel.cancelled() => {
                debug!(source = %source, state = "cancelled");
                return Err(Error::Cancelled);
            }
            guard = pacer.acquire() => guard,
        };

        debug!(source = %source, state = "requesting");
        let attempt = tokio::select! {
            () = cancel.cancelled() => {
                debug!(source = %source, state = "cancelled");
                return Err(Error::Cancelled);
            }
            result = tokio::time::timeout(timeout, client.search(&query)) => result,
        };
        drop(guard);

        let error = match attempt {
            Err(_elapsed) => {
                // per-source timeout: skipped, no retry
                return Err(Error::SourceTimeout { source });
            }
            Ok(Ok(publications)) => {
                debug!(source = %source, state = "parsing", count = publications.len());
                return Ok(publications);
            }
            Ok(Err(source_error)) => Error::from_source(source, source_error),
        };

        consecutive_failures += 1;
        if consecutive_failures >= failure_threshold {
            warn!("Source {source} marked unhealthy for this call");
            return Err(error);
        }

        let schedule = match &error {
            Error::SourceRateLimited { .. } => &rate_limited_schedule,
            Error::SourceUpstream { .. } => &upstream_schedule,
            _ => return Err(error),
        };
        if !schedule.should_retry(&error, consecutive_failures) {
            return Err(error);
        }

        let delay = schedule.next_delay(&error, consecutive_failures);
        debug!("Source {source} retrying after {delay:?}: {error}");
        tokio::select! {
            () = cancel.cancelled() => return Err(Error::Cancelled),
            () = tokio::time::sleep(delay) => {}
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use crate::client::providers::SourceError;

    struct StaticSource {
        id: SourceId,
        publications: Vec<Publication>,
        fail_with: Option<fn() -> SourceError>,
    }

    #[async_trait]
    impl SourceClient for StaticSource {
        fn id(&self) -> SourceId {
            self.id
        }

        async fn search(&self, _query: &SearchQuery) -> std::result::Result<Vec<Publication>, SourceError> {
            match self.fail_with {
                Some(make_error) => Err(make_error()),
                None => Ok(self.publications.clone()),
            }
        }
    }

    fn test_config() -> SearchConfig {
        let mut config = SearchConfig::default();
        config.enable_cache = false;
        config.pipeline.deadline_seconds = 5;
        config.pipeline.total_deadline_seconds = 10;
        for source in SourceId::ALL {
            config.sources.get_mut(source).rate_limit_seconds = 0.0;
        }
        config
    }

    fn pipeline_with(sources: Vec<Arc<dyn SourceClient>>) -> PublicationPipeline {
        let config = test_config();
        let limiters = Arc::new(RateLimiterRegistry::new(Duration::from_millis(0), 4));
        PublicationPipeline::from_parts(
            config,
            sources,
            limiters,
            Arc::new(CacheLayer::memory()),
            None,
            None,
            None,
        )
    }

    fn sample(source: SourceId, title: &str, doi: Option<&str>) -> Publication {
        let mut p = Publication::new(title, source);
        p.doi = doi.map(String::from);
        p.year = Some(2023);
        p
    }

    #[tokio::test]
    async fn empty_query_is_invalid() {
        let pipeline = pipeline_with(vec![Arc::new(StaticSource {
            id: SourceId::Pubmed,
            publications: vec![],
            fail_with: None,
        })]);
        let result = pipeline.search("   ", SearchOptions::default()).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn no_sources_is_invalid() {
        let pipeline = pipeline_with(vec![]);
        let result = pipeline.search("crispr", SearchOptions::default()).await;
        assert!(matches!(result, Err(Error::InvalidInput { .. })));
    }

    #[tokio::test]
    async fn merges_across_sources_and_records_counts() {
        let pipeline = pipeline_with(vec![
            Arc::new(StaticSource {
                id: SourceId::Pubmed,
                publications: vec![sample(SourceId::Pubmed, "CRISPR review", Some("10.1/x"))],
                fail_with: None,
            }),
            Arc::new(StaticSource {
                id: SourceId::OpenAlex,
                publications: vec![sample(SourceId::OpenAlex, "CRISPR review", Some("10.1/x"))],
                fail_with: None,
            }),
        ]);

        let result = pipeline
            .search("CRISPR review", SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(result.total_found, 2);
        assert_eq!(result.publications.len(), 1);
        assert_eq!(result.per_source_counts[&SourceId::Pubmed], 1);
        assert_eq!(result.per_source_counts[&SourceId::OpenAlex], 1);
        assert_eq!(result.intent, QueryIntent::Review);
        assert!(!result.cache_hit);
    }

    #[tokio::test]
    async fn one_failing_source_never_blocks_the_rest() {
        let pipeline = pipeline_with(vec![
            Arc::new(StaticSource {
                id: SourceId::Scholar,
                publications: vec![],
                fail_with: Some(|| SourceError::Blocked),
            }),
            Arc::new(StaticSource {
                id: SourceId::Pubmed,
                publications: vec![sample(SourceId::Pubmed, "TP53 and cancer", None)],
                fail_with: None,
            }),
        ]);

        let result = pipeline
            .search("TP53 cancer genetics", SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(result.publications.len(), 1);
        assert_eq!(result.failures.len(), 1);
        assert_eq!(result.failures[0].source, SourceId::Scholar);
        assert_eq!(result.failures[0].kind, "blocked");
    }

    #[tokio::test]
    async fn all_sources_failing_is_ok_and_empty() {
        let pipeline = pipeline_with(vec![
            Arc::new(StaticSource {
                id: SourceId::Pubmed,
                publications: vec![],
                fail_with: Some(|| SourceError::Upstream { status: 500 }),
            }),
            Arc::new(StaticSource {
                id: SourceId::OpenAlex,
                publications: vec![],
                fail_with: Some(|| SourceError::Blocked),
            }),
        ]);

        let result = pipeline
            .search("anything at all", SearchOptions::default())
            .await
            .unwrap();
        assert!(result.publications.is_empty());
        assert_eq!(result.failures.len(), 2);
    }

    #[tokio::test]
    async fn cancellation_surfaces_as_error_by_default() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let pipeline = pipeline_with(vec![Arc::new(StaticSource {
            id: SourceId::Pubmed,
            publications: vec![sample(SourceId::Pubmed, "x", None)],
            fail_with: None,
        })]);

        let result = pipeline
            .search(
                "query",
                SearchOptions {
                    cancel: Some(cancel),
                    datasets: Vec::new(),
                },
            )
            .await;
        assert!(matches!(result, Err(Error::Cancelled)));
    }

    #[tokio::test]
    async fn results_are_sorted_by_score() {
        let mut strong = sample(SourceId::Pubmed, "single cell RNA sequencing atlas", None);
        strong.abstract_text = Some("single cell RNA sequencing across tissues".to_string());
        strong.citations = 500;
        let weak = sample(SourceId::Pubmed, "unrelated plant genomics", None);

        let pipeline = pipeline_with(vec![Arc::new(StaticSource {
            id: SourceId::Pubmed,
            publications: vec![weak, strong],
            fail_with: None,
        })]);

        let result = pipeline
            .search("single cell RNA sequencing", SearchOptions::default())
            .await
            .unwrap();
        assert_eq!(result.publications.len(), 2);
        assert!(result.publications[0].score >= result.publications[1].score);
        assert!(result.publications[0]
            .title
            .contains("single cell RNA sequencing"));
        for p in &result.publications {
            assert!(p.score >= 0.0 && p.score <= 1.0 + 1e-6);
            assert!(!p.sources.is_empty());
        }
    }

    #[tokio::test]
    async fn cache_round_trip_yields_identical_publications() {
        let mut config = test_config();
        config.enable_cache = true;
        let limiters = Arc::new(RateLimiterRegistry::new(Duration::from_millis(0), 4));
        let source: Arc<dyn SourceClient> = Arc::new(StaticSource {
            id: SourceId::Pubmed,
            publications: vec![sample(SourceId::Pubmed, "cached paper", Some("10.9/c"))],
            fail_with: None,
        });
        let pipeline = PublicationPipeline::from_parts(
            config,
            vec![source],
            limiters,
            Arc::new(CacheLayer::memory()),
            None,
            None,
            None,
        );

        let first = pipeline
            .search("cached paper", SearchOptions::default())
            .await
            .unwrap();
        assert!(!first.cache_hit);

        let second = pipeline
            .search("cached paper", SearchOptions::default())
            .await
            .unwrap();
        assert!(second.cache_hit);
        assert_eq!(
            serde_json::to_value(&first.publications).unwrap(),
            serde_json::to_value(&second.publications).unwrap()
        );
    }
}
