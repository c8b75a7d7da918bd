use crate::client::SourceId;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

/// Configuration for one external source
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SourceConfig {
    /// Maximum results requested per search, 1..=200
    pub max_results: u32,
    /// Minimum interval between requests to this source, in seconds
    pub rate_limit_seconds: f64,
    /// Per-request timeout, in seconds
    pub timeout_seconds: u64,
    /// Optional proxy for this source's traffic
    pub proxy_url: Option<String>,
    /// Optional API key
    pub api_key: Option<String>,
}

impl Default for SourceConfig {
    fn default() -> Self {
        Self {
            max_results: 20,
            rate_limit_seconds: 1.0,
            timeout_seconds: 30,
            proxy_url: None,
            api_key: None,
        }
    }
}

impl SourceConfig {
    #[must_use]
    pub fn rate_limit(&self) -> Duration {
        Duration::from_secs_f64(self.rate_limit_seconds.max(0.0))
    }

    #[must_use]
    pub const fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_seconds)
    }
}

/// Per-source configuration table
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct SourcesConfig {
    pub pubmed: SourceConfig,
    pub scholar: SourceConfig,
    pub europe_pmc: SourceConfig,
    pub semantic_scholar: SourceConfig,
    pub openalex: SourceConfig,
    pub unpaywall: SourceConfig,
}

impl SourcesConfig {
    #[must_use]
    pub const fn get(&self, source: SourceId) -> &SourceConfig {
        match source {
            SourceId::Pubmed => &self.pubmed,
            SourceId::Scholar => &self.scholar,
            SourceId::EuropePmc => &self.europe_pmc,
            SourceId::SemanticScholar => &self.semantic_scholar,
            SourceId::OpenAlex => &self.openalex,
            SourceId::Unpaywall => &self.unpaywall,
        }
    }

    pub fn get_mut(&mut self, source: SourceId) -> &mut SourceConfig {
        match source {
            SourceId::Pubmed => &mut self.pubmed,
            SourceId::Scholar => &mut self.scholar,
            SourceId::EuropePmc => &mut self.europe_pmc,
            SourceId::SemanticScholar => &mut self.semantic_scholar,
            SourceId::OpenAlex => &mut self.openalex,
            SourceId::Unpaywall => &mut self.unpaywall,
        }
    }
}

/// Orchestration limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Fan-in collection window for source tasks, in seconds
    pub deadline_seconds: u64,
    /// End-to-end deadline including enrichment, in seconds
    pub total_deadline_seconds: u64,
    /// How many top-ranked publications get full-text enrichment
    pub top_k: usize,
    /// Return the partial result instead of an error on cancellation
    pub return_partial_on_cancel: bool,
    /// Consecutive failures before a source is unhealthy for the call
    pub consecutive_failure_threshold: u32,
    /// In-flight request cap for API sources (scrapers are fixed at 1)
    pub api_concurrency: usize,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            deadline_seconds: 30,
            total_deadline_seconds: 60,
            top_k: 20,
            return_partial_on_cancel: false,
            consecutive_failure_threshold: 3,
            api_concurrency: 4,
        }
    }
}

/// PDF acquisition limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadConfig {
    /// Base directory for downloaded PDFs
    pub directory: PathBuf,
    /// Reject files larger than this
    pub max_pdf_bytes: u64,
    /// Global concurrent download cap
    pub max_concurrent: usize,
    /// Redirects to follow per request
    pub max_redirects: u32,
    /// Attempts per candidate URL
    pub attempts_per_url: u32,
    /// First backoff delay between attempts, in seconds
    pub initial_backoff_seconds: u64,
    /// Per-download timeout, in seconds
    pub timeout_seconds: u64,
}

impl Default for DownloadConfig {
    fn default() -> Self {
        let directory = dirs::download_dir()
            .or_else(dirs::home_dir)
            .unwrap_or_else(|| PathBuf::from("/tmp"))
            .join("omics-oracle");
        Self {
            directory,
            max_pdf_bytes: 200 * 1024 * 1024,
            max_concurrent: 4,
            max_redirects: 10,
            attempts_per_url: 3,
            initial_backoff_seconds: 2,
            timeout_seconds: 60,
        }
    }
}

/// Cache backend configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    /// Primary backend location (sled directory); None selects a
    /// per-user default path
    pub path: Option<PathBuf>,
    /// TTL for cached query results, in days
    pub result_ttl_days: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            path: None,
            result_ttl_days: 30,
        }
    }
}

impl CacheConfig {
    #[must_use]
    pub const fn result_ttl(&self) -> Duration {
        Duration::from_secs(self.result_ttl_days * 24 * 60 * 60)
    }
}

/// One institution's EZProxy endpoint for institutional access links
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InstitutionConfig {
    pub name: String,
    /// EZProxy host, e.g. `ezproxy.example.edu`
    pub ezproxy_host: String,
}

/// Top-level configuration: feature toggles plus per-component configs.
///
/// Sources of values, later wins: struct defaults, optional TOML file,
/// environment overrides.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SearchConfig {
    // Feature toggles
    pub enable_pubmed: bool,
    pub enable_scholar: bool,
    pub enable_europe_pmc: bool,
    pub enable_semantic_scholar: bool,
    pub enable_openalex: bool,
    pub enable_unpaywall: bool,
    pub enable_citation_tracking: bool,
    pub enable_full_text_resolve: bool,
    pub enable_pdf_download: bool,
    pub enable_institutional_access: bool,
    pub enable_cache: bool,
    pub enable_web_scrape: bool,

    pub sources: SourcesConfig,
    pub pipeline: PipelineConfig,
    pub downloads: DownloadConfig,
    pub cache: CacheConfig,
    pub institutions: Vec<InstitutionConfig>,

    /// Contact email sent to polite-pool APIs (Unpaywall, OpenAlex)
    pub contact_email: String,
}

impl Default for SearchConfig {
    fn default() -> Self {
        let mut sources = SourcesConfig::default();
        // NCBI allows 3 req/s without a key; Scholar needs generous spacing
        sources.pubmed.rate_limit_seconds = 0.34;
        sources.scholar.rate_limit_seconds = 2.0;

        Self {
            enable_pubmed: true,
            enable_scholar: false,
            enable_europe_pmc: true,
            enable_semantic_scholar: true,
            enable_openalex: true,
            enable_unpaywall: true,
            enable_citation_tracking: false,
            enable_full_text_resolve: false,
            enable_pdf_download: false,
            enable_institutional_access: false,
            enable_cache: true,
            enable_web_scrape: false,
            sources,
            pipeline: PipelineConfig::default(),
            downloads: DownloadConfig::default(),
            cache: CacheConfig::default(),
            institutions: Vec::new(),
            contact_email: "contact@omicsoracle.org".to_string(),
        }
    }
}

/// Well-known environment variables, parsed as a typed struct
#[derive(Debug, Default, Deserialize)]
struct EnvOverrides {
    pubmed_api_key: Option<String>,
    s2_api_key: Option<String>,
    cache_url: Option<String>,
    cache_enabled: Option<bool>,
    max_pdf_bytes: Option<u64>,
    http_timeout_seconds: Option<u64>,
}

impl SearchConfig {
    /// Load configuration: defaults, then an optional TOML file, then
    /// environment variables.
    pub fn load(file: Option<&Path>) -> Result<Self> {
        let mut builder = config::Config::builder();
        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("OMICS")
                .separator("__")
                .try_parsing(true),
        );

        let mut loaded: Self = match builder.build()?.try_deserialize() {
            Ok(config) => config,
            Err(e) if file.is_some() => return Err(e.into()),
            Err(e) => {
                debug!("No usable configuration sources ({e}); using defaults");
                Self::default()
            }
        };

        loaded.apply_env_overrides()?;
        loaded.validate()?;
        Ok(loaded)
    }

    /// Apply the §6 well-known environment variables
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        let env: EnvOverrides = envy::from_env().unwrap_or_default();

        if let Some(key) = env.pubmed_api_key {
            self.sources.pubmed.api_key = Some(key);
        }
        if let Some(key) = env.s2_api_key {
            self.sources.semantic_scholar.api_key = Some(key);
        }
        if let Some(url) = env.cache_url {
            debug!("Cache path override from CACHE_URL");
            self.cache.path = Some(PathBuf::from(url));
        }
        if let Some(enabled) = env.cache_enabled {
            self.cache.enabled = enabled;
            self.enable_cache = enabled;
        }
        if let Some(bytes) = env.max_pdf_bytes {
            self.downloads.max_pdf_bytes = bytes;
        }
        if let Some(secs) = env.http_timeout_seconds {
            for source in SourceId::ALL {
                self.sources.get_mut(source).timeout_seconds = secs;
            }
        }
        Ok(())
    }

    /// Enforce configuration invariants
    pub fn validate(&self) -> Result<()> {
        for source in SourceId::ALL {
            let cfg = self.sources.get(source);
            if cfg.max_results == 0 || cfg.max_results > 200 {
                return Err(Error::InvalidInput {
                    field: format!("sources.{source}.max_results"),
                    reason: format!("must be in 1..=200, got {}", cfg.max_results),
                });
            }
            if cfg.timeout_seconds == 0 {
                return Err(Error::InvalidInput {
                    field: format!("sources.{source}.timeout_seconds"),
                    reason: "must be positive".to_string(),
                });
            }
            if cfg.rate_limit_seconds < 0.0 {
                return Err(Error::InvalidInput {
                    field: format!("sources.{source}.rate_limit_seconds"),
                    reason: "must be non-negative".to_string(),
                });
            }
        }
        if self.pipeline.top_k == 0 {
            return Err(Error::InvalidInput {
                field: "pipeline.top_k".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.pipeline.deadline_seconds == 0 || self.pipeline.total_deadline_seconds == 0 {
            return Err(Error::InvalidInput {
                field: "pipeline.deadline_seconds".to_string(),
                reason: "deadlines must be positive".to_string(),
            });
        }
        if self.downloads.max_concurrent == 0 {
            return Err(Error::InvalidInput {
                field: "downloads.max_concurrent".to_string(),
                reason: "must be positive".to_string(),
            });
        }
        if self.downloads.max_pdf_bytes <= crate::fulltext::MIN_PDF_BYTES {
            return Err(Error::InvalidInput {
                field: "downloads.max_pdf_bytes".to_string(),
                reason: format!(
                    "must exceed the {} byte minimum",
                    crate::fulltext::MIN_PDF_BYTES
                ),
            });
        }
        Ok(())
    }

    /// Search sources enabled by the toggles, in default fan-out order.
    /// Unpaywall is an enrichment source, never a search source.
    #[must_use]
    pub fn enabled_sources(&self) -> Vec<SourceId> {
        let mut enabled = Vec::new();
        for source in SourceId::ALL {
            let on = match source {
                SourceId::Pubmed => self.enable_pubmed,
                SourceId::Scholar => self.enable_scholar,
                SourceId::EuropePmc => self.enable_europe_pmc,
                SourceId::SemanticScholar => self.enable_semantic_scholar,
                SourceId::OpenAlex => self.enable_openalex,
                SourceId::Unpaywall => false,
            };
            if on {
                enabled.push(source);
            }
        }
        enabled
    }

    /// Names of enabled toggles, sorted; part of the canonical cache key
    #[must_use]
    pub fn enabled_toggle_names(&self) -> Vec<&'static str> {
        let toggles = [
            ("enable_pubmed", self.enable_pubmed),
            ("enable_scholar", self.enable_scholar),
            ("enable_europe_pmc", self.enable_europe_pmc),
            ("enable_semantic_scholar", self.enable_semantic_scholar),
            ("enable_openalex", self.enable_openalex),
            ("enable_unpaywall", self.enable_unpaywall),
            ("enable_citation_tracking", self.enable_citation_tracking),
            ("enable_full_text_resolve", self.enable_full_text_resolve),
            ("enable_pdf_download", self.enable_pdf_download),
            (
                "enable_institutional_access",
                self.enable_institutional_access,
            ),
            ("enable_cache", self.enable_cache),
            ("enable_web_scrape", self.enable_web_scrape),
        ];
        let mut names: Vec<&'static str> = toggles
            .into_iter()
            .filter_map(|(name, on)| on.then_some(name))
            .collect();
        names.sort_unstable();
        names
    }
}
