//! OmicsOracle publication discovery core.
//!
//! Fans a biomedical query out across publication sources (PubMed,
//! Europe PMC, Semantic Scholar, OpenAlex, Google Scholar), fuses and
//! deduplicates the results, ranks them under query-intent-adaptive
//! weights, and optionally resolves full text, downloads PDFs, and
//! tracks citations of GEO datasets.

pub mod adapters;
pub mod cache;
pub mod citations;
pub mod client;
pub mod config;
pub mod error;
pub mod fulltext;
pub mod pipeline;
pub mod resilience;

pub use adapters::{LegacyGeoResponse, LegacySearchRequest};
pub use cache::{CacheKey, CacheLayer};
pub use citations::{CitationTracker, CitationTrackerConfig, GeoSeriesMetadata};
pub use client::{
    Author, CandidateUrl, Doi, HttpClientConfig, Publication, RateLimiterRegistry, SourceClient,
    SourceFailure, SourceId, UrlKind,
};
pub use config::{SearchConfig, SourceConfig};
pub use error::{Error, ErrorCategory, Result};
pub use fulltext::{DownloadReport, FullTextResolver, PdfDownloader};
pub use pipeline::{
    detect_intent, dedupe, PublicationPipeline, PublicationResult, QueryIntent, Ranker,
    RankWeights, SearchOptions,
};
pub use resilience::RetryConfig;
