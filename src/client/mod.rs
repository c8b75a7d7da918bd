pub mod providers;
pub mod rate_limiter;

pub use providers::{SearchQuery, SourceClient, SourceError};
pub use rate_limiter::{RateLimiterRegistry, SourcePacer};

use crate::Result;
use chrono::NaiveDate;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeSet, HashMap};
use std::path::PathBuf;
use std::time::Duration;

/// Identity tag for a publication source. Clients declare exactly one;
/// merged publications accumulate the union.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SourceId {
    Pubmed,
    Scholar,
    EuropePmc,
    SemanticScholar,
    OpenAlex,
    Unpaywall,
}

impl SourceId {
    /// All sources the pipeline can enumerate, in default fan-out order
    pub const ALL: [Self; 6] = [
        Self::Pubmed,
        Self::EuropePmc,
        Self::SemanticScholar,
        Self::OpenAlex,
        Self::Scholar,
        Self::Unpaywall,
    ];

    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Pubmed => "pubmed",
            Self::Scholar => "scholar",
            Self::EuropePmc => "europe_pmc",
            Self::SemanticScholar => "semantic_scholar",
            Self::OpenAlex => "openalex",
            Self::Unpaywall => "unpaywall",
        }
    }

    /// Precedence for bibliographic field merging: lower wins.
    /// PubMed > Europe PMC > OpenAlex > Semantic Scholar > Scholar.
    #[must_use]
    pub const fn bibliographic_rank(self) -> u8 {
        match self {
            Self::Pubmed => 0,
            Self::EuropePmc => 1,
            Self::OpenAlex => 2,
            Self::SemanticScholar => 3,
            Self::Scholar => 4,
            Self::Unpaywall => 5,
        }
    }

    /// Scraping sources get a concurrency cap of one
    #[must_use]
    pub const fn is_scraping(self) -> bool {
        matches!(self, Self::Scholar)
    }
}

impl std::fmt::Display for SourceId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::error::Error for SourceId {}

impl std::str::FromStr for SourceId {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "pubmed" => Ok(Self::Pubmed),
            "scholar" | "google_scholar" => Ok(Self::Scholar),
            "europe_pmc" | "europepmc" => Ok(Self::EuropePmc),
            "semantic_scholar" | "s2" => Ok(Self::SemanticScholar),
            "openalex" => Ok(Self::OpenAlex),
            "unpaywall" => Ok(Self::Unpaywall),
            other => Err(crate::Error::InvalidInput {
                field: "source".to_string(),
                reason: format!("unknown source: {other}"),
            }),
        }
    }
}

/// HTTP client configuration shared by all source clients
#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    /// Request timeout duration
    pub timeout: Duration,
    /// Connection timeout duration
    pub connect_timeout: Duration,
    /// Maximum redirects to follow
    pub max_redirects: u32,
    /// User agent string
    pub user_agent: String,
    /// Proxy URL (optional)
    pub proxy: Option<String>,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            max_redirects: 10,
            user_agent: format!(
                "omics-oracle/{} (Biomedical Literature Discovery)",
                env!("CARGO_PKG_VERSION")
            ),
            proxy: None,
        }
    }
}

impl HttpClientConfig {
    /// Build a reqwest client from this configuration
    pub fn build(&self) -> Result<reqwest::Client> {
        let mut builder = reqwest::Client::builder()
            .timeout(self.timeout)
            .connect_timeout(self.connect_timeout)
            .redirect(reqwest::redirect::Policy::limited(
                self.max_redirects as usize,
            ))
            .user_agent(self.user_agent.clone());

        if let Some(proxy_url) = &self.proxy {
            builder = builder.proxy(reqwest::Proxy::all(proxy_url)?);
        }

        Ok(builder.build()?)
    }
}

/// DOI (Digital Object Identifier) wrapper for type safety
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Doi(String);

impl Doi {
    /// Create a new DOI from a string, validating the format.
    /// DOIs are case-insensitive; stored lowercased so they can serve as
    /// deduplication keys.
    pub fn new(doi: &str) -> Result<Self> {
        let cleaned = doi
            .trim()
            .trim_start_matches("doi:")
            .trim_start_matches("https://doi.org/")
            .trim_start_matches("http://doi.org/")
            .trim_start_matches("https://dx.doi.org/");

        if cleaned.is_empty() {
            return Err(crate::Error::InvalidInput {
                field: "doi".to_string(),
                reason: "DOI cannot be empty".to_string(),
            });
        }

        if !cleaned.starts_with("10.") || !cleaned.contains('/') {
            return Err(crate::Error::InvalidInput {
                field: "doi".to_string(),
                reason: format!("not a valid DOI: {cleaned}"),
            });
        }

        Ok(Self(cleaned.to_lowercase()))
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Convert to a URL-safe format
    #[must_use]
    pub fn url_encoded(&self) -> String {
        urlencoding::encode(&self.0).to_string()
    }

    /// Resolver URL at doi.org
    #[must_use]
    pub fn resolver_url(&self) -> String {
        format!("https://doi.org/{}", self.0)
    }
}

impl std::fmt::Display for Doi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl std::str::FromStr for Doi {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self> {
        Self::new(s)
    }
}

/// One author of a publication
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Author {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub affiliation: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub h_index: Option<u32>,
}

impl Author {
    #[must_use]
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            affiliation: None,
            h_index: None,
        }
    }

    /// Name key used when merging author lists across sources
    #[must_use]
    pub fn normalized_name(&self) -> String {
        self.name
            .to_lowercase()
            .split_whitespace()
            .collect::<Vec<_>>()
            .join(" ")
    }
}

/// Classification of a full-text candidate URL
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UrlKind {
    /// PubMed Central full text
    Pmc,
    /// Open-access location reported by Unpaywall
    OpenAccess,
    /// Publisher landing page or direct publisher PDF
    Publisher,
    /// Europe PMC full-text service
    EuropePmc,
    /// EZProxy-rewritten institutional URL
    Institutional,
    /// Preprint server (arXiv, bioRxiv, medRxiv)
    Preprint,
    /// Scraped from an academic social network results page
    Scrape,
}

/// A candidate location for full-text acquisition
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CandidateUrl {
    pub url: String,
    pub kind: UrlKind,
    /// EZProxy links need a manual institutional sign-in
    pub requires_manual_auth: bool,
}

impl CandidateUrl {
    #[must_use]
    pub fn new(url: impl Into<String>, kind: UrlKind) -> Self {
        Self {
            url: url.into(),
            kind,
            requires_manual_auth: false,
        }
    }
}

/// Per-factor score components, exposed at the result boundary
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct ScoreBreakdown {
    pub title: f64,
    #[serde(rename = "abstract")]
    pub abstract_text: f64,
    pub citations: f64,
    pub recency: f64,
}

/// A normalized record of one scholarly work.
///
/// Created by a source client; mutated only by the deduplicator (merging)
/// and the enrichment steps (appending access fields); frozen once ranked.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Publication {
    // Identity (any may be absent, but see `has_identity`)
    pub doi: Option<String>,
    pub pmid: Option<String>,
    pub pmcid: Option<String>,
    pub scholar_id: Option<String>,
    pub s2_paper_id: Option<String>,

    // Bibliographic
    pub title: String,
    #[serde(rename = "abstract")]
    pub abstract_text: Option<String>,
    pub authors: Vec<Author>,
    pub year: Option<i32>,
    pub publication_date: Option<NaiveDate>,
    pub venue: Option<String>,

    // Impact
    pub citations: u32,
    pub citations_last_3_years: Option<u32>,
    pub influential_citations: Option<u32>,

    // Access
    pub is_open_access: bool,
    pub fulltext_url: Option<String>,
    pub pdf_local_path: Option<PathBuf>,
    pub institutional_urls: Vec<CandidateUrl>,

    // Provenance
    pub sources: BTreeSet<SourceId>,
    pub source_specific: HashMap<String, serde_json::Value>,
    pub merged_from: Vec<String>,

    // Ranking (filled by the ranker)
    pub score: f64,
    pub score_breakdown: ScoreBreakdown,
}

impl Publication {
    /// Create a bare publication from a title and the producing source
    #[must_use]
    pub fn new(title: impl Into<String>, source: SourceId) -> Self {
        let mut sources = BTreeSet::new();
        sources.insert(source);
        Self {
            doi: None,
            pmid: None,
            pmcid: None,
            scholar_id: None,
            s2_paper_id: None,
            title: title.into(),
            abstract_text: None,
            authors: Vec::new(),
            year: None,
            publication_date: None,
            venue: None,
            citations: 0,
            citations_last_3_years: None,
            influential_citations: None,
            is_open_access: false,
            fulltext_url: None,
            pdf_local_path: None,
            institutional_urls: Vec::new(),
            sources,
            source_specific: HashMap::new(),
            merged_from: Vec::new(),
            score: 0.0,
            score_breakdown: ScoreBreakdown::default(),
        }
    }

    /// At least one of {doi, pmid, scholar_id, title+year} must be present
    #[must_use]
    pub fn has_identity(&self) -> bool {
        self.doi.is_some()
            || self.pmid.is_some()
            || self.scholar_id.is_some()
            || (!self.title.trim().is_empty() && self.year.is_some())
    }

    /// Enforce the record invariants, clamping where the model allows it
    pub fn validate(&mut self) -> Result<()> {
        if self.title.trim().is_empty() {
            return Err(crate::Error::InvalidInput {
                field: "title".to_string(),
                reason: "publication title must be non-empty".to_string(),
            });
        }
        if !self.has_identity() {
            return Err(crate::Error::InvalidInput {
                field: "identity".to_string(),
                reason: "publication needs one of doi, pmid, scholar_id, or title+year"
                    .to_string(),
            });
        }
        if let Some(recent) = self.citations_last_3_years {
            if recent > self.citations {
                self.citations_last_3_years = Some(self.citations);
            }
        }
        Ok(())
    }

    /// Best-known date: explicit date, else January 1 of the year
    #[must_use]
    pub fn effective_date(&self) -> Option<NaiveDate> {
        self.publication_date
            .or_else(|| self.year.and_then(|y| NaiveDate::from_ymd_opt(y, 1, 1)))
    }

    /// Age in fractional years relative to `now`; None without a date
    #[must_use]
    pub fn age_years(&self, now: NaiveDate) -> Option<f64> {
        self.effective_date()
            .map(|date| ((now - date).num_days().max(0) as f64) / 365.25)
    }

    /// Identifier used in logs and download reports
    #[must_use]
    pub fn display_id(&self) -> String {
        self.doi
            .clone()
            .or_else(|| self.pmid.as_ref().map(|p| format!("pmid:{p}")))
            .or_else(|| self.s2_paper_id.as_ref().map(|s| format!("s2:{s}")))
            .unwrap_or_else(|| self.title.chars().take(60).collect())
    }
}

/// A failure from one source, recorded in result metadata
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SourceFailure {
    pub source: SourceId,
    pub kind: String,
}

impl SourceFailure {
    #[must_use]
    pub fn from_error(source: SourceId, err: &crate::Error) -> Self {
        let kind = match err {
            crate::Error::SourceRateLimited { .. } => "rate_limited",
            crate::Error::SourceBlocked { .. } => "blocked",
            crate::Error::SourceUpstream { .. } => "upstream",
            crate::Error::SourceTimeout { .. } | crate::Error::Timeout { .. } => "timeout",
            crate::Error::SourceAuthRequired { .. } => "auth_required",
            crate::Error::Cancelled => "cancelled",
            crate::Error::Parse { .. } => "parse",
            _ => "other",
        };
        Self {
            source,
            kind: kind.to_string(),
        }
    }
}
