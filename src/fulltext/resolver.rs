use crate::client::providers::UnpaywallClient;
use crate::client::{CandidateUrl, HttpClientConfig, Publication, UrlKind};
use crate::config::InstitutionConfig;
use scraper::{Html, Selector};
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::{debug, warn};

const DEFAULT_PMC_BASE: &str = "https://www.ncbi.nlm.nih.gov/pmc/articles";
const DEFAULT_DOI_RESOLVER: &str = "https://doi.org";
const DEFAULT_EUROPE_PMC_ARTICLES: &str = "https://europepmc.org/articles";
const DEFAULT_ARXIV_API: &str = "http://export.arxiv.org/api/query";
const DEFAULT_BIORXIV_CONTENT: &str = "https://www.biorxiv.org/content";

/// Ordered source chain for full-text candidate URLs.
///
/// Each step is consulted lazily: only when every earlier step's
/// candidates are exhausted and the consumer asks for more. A consumer
/// that succeeds on the first candidate never touches the rest of the
/// chain.
pub struct FullTextResolver {
    client: reqwest::Client,
    unpaywall: Option<Arc<UnpaywallClient>>,
    institutions: Vec<InstitutionConfig>,
    enable_institutional: bool,
    enable_web_scrape: bool,
    pmc_base: String,
    doi_resolver_base: String,
    europe_pmc_articles_base: String,
    arxiv_api_base: String,
    biorxiv_content_base: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    Pmc,
    Unpaywall,
    DoiLanding,
    EuropePmc,
    Institutional,
    Preprint,
    WebScrape,
    Done,
}

impl Step {
    const fn next(self) -> Self {
        match self {
            Self::Pmc => Self::Unpaywall,
            Self::Unpaywall => Self::DoiLanding,
            Self::DoiLanding => Self::EuropePmc,
            Self::EuropePmc => Self::Institutional,
            Self::Institutional => Self::Preprint,
            Self::Preprint => Self::WebScrape,
            Self::WebScrape | Self::Done => Self::Done,
        }
    }
}

impl FullTextResolver {
    pub fn new(
        http: &HttpClientConfig,
        unpaywall: Option<Arc<UnpaywallClient>>,
        institutions: Vec<InstitutionConfig>,
        enable_institutional: bool,
        enable_web_scrape: bool,
    ) -> crate::Result<Self> {
        Ok(Self {
            client: http.build()?,
            unpaywall,
            institutions,
            enable_institutional,
            enable_web_scrape,
            pmc_base: DEFAULT_PMC_BASE.to_string(),
            doi_resolver_base: DEFAULT_DOI_RESOLVER.to_string(),
            europe_pmc_articles_base: DEFAULT_EUROPE_PMC_ARTICLES.to_string(),
            arxiv_api_base: DEFAULT_ARXIV_API.to_string(),
            biorxiv_content_base: DEFAULT_BIORXIV_CONTENT.to_string(),
        })
    }

    /// Redirect the external endpoints at a mock server (tests)
    #[must_use]
    pub fn with_endpoint_base(mut self, base: &str) -> Self {
        self.pmc_base = format!("{base}/pmc/articles");
        self.doi_resolver_base = format!("{base}/doi");
        self.europe_pmc_articles_base = format!("{base}/europepmc/articles");
        self.arxiv_api_base = format!("{base}/arxiv/api/query");
        self.biorxiv_content_base = format!("{base}/biorxiv/content");
        self
    }

    /// Begin lazy resolution for one publication. The stream snapshots
    /// the identifiers it needs, so the caller may mutate the original
    /// record while consuming candidates.
    #[must_use]
    pub fn candidates(&self, publication: &Publication) -> CandidateStream<'_> {
        CandidateStream {
            resolver: self,
            publication: publication.clone(),
            queue: VecDeque::new(),
            step: Step::Pmc,
        }
    }

    /// PMC full text is always free when a PMCID exists
    fn pmc_candidates(&self, publication: &Publication) -> Vec<CandidateUrl> {
        publication
            .pmcid
            .as_deref()
            .map(|pmcid| {
                vec![CandidateUrl::new(
                    format!("{}/{}/pdf/", self.pmc_base, pmcid),
                    UrlKind::Pmc,
                )]
            })
            .unwrap_or_default()
    }

    async fn unpaywall_candidates(&self, publication: &Publication) -> Vec<CandidateUrl> {
        let (Some(client), Some(doi)) = (&self.unpaywall, publication.doi.as_deref()) else {
            return Vec::new();
        };
        match client.pdf_candidates(doi).await {
            Ok(candidates) => candidates,
            Err(e) => {
                warn!("Unpaywall lookup failed for {doi}: {e}");
                Vec::new()
            }
        }
    }

    /// Resolve the DOI landing page and inspect it for PDF pointers
    async fn landing_candidates(&self, publication: &Publication) -> Vec<CandidateUrl> {
        let Some(doi) = publication.doi.as_deref() else {
            return Vec::new();
        };
        let url = format!("{}/{}", self.doi_resolver_base, doi);

        let response = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => response,
            Ok(response) => {
                debug!("DOI landing for {doi} returned {}", response.status());
                return Vec::new();
            }
            Err(e) => {
                debug!("DOI landing fetch failed for {doi}: {e}");
                return Vec::new();
            }
        };

        let final_url = response.url().to_string();
        let content_type = response
            .headers()
            .get(reqwest::header::CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_string();

        if content_type.starts_with("application/pdf") {
            return vec![CandidateUrl::new(final_url, UrlKind::Publisher)];
        }

        let Ok(body) = response.text().await else {
            return Vec::new();
        };
        Self::extract_pdf_links(&body, &final_url)
    }

    /// citation_pdf_url meta tags and .pdf anchors on a landing page
    fn extract_pdf_links(html: &str, base_url: &str) -> Vec<CandidateUrl> {
        let document = Html::parse_document(html);
        let meta_sel =
            Selector::parse(r#"meta[name="citation_pdf_url"]"#).expect("static selector");
        let anchor_sel = Selector::parse("a[href]").expect("static selector");
        let base = url::Url::parse(base_url).ok();

        let absolutize = |href: &str| -> Option<String> {
            if href.starts_with("http://") || href.starts_with("https://") {
                return Some(href.to_string());
            }
            base.as_ref()?.join(href).ok().map(|u| u.to_string())
        };

        let mut candidates = Vec::new();
        for meta in document.select(&meta_sel) {
            if let Some(content) = meta.value().attr("content") {
                if let Some(url) = absolutize(content) {
                    candidates.push(CandidateUrl::new(url, UrlKind::Publisher));
                }
            }
        }
        for anchor in document.select(&anchor_sel) {
            if candidates.len() >= 3 {
                break;
            }
            let Some(href) = anchor.value().attr("href") else {
                continue;
            };
            if href.split('?').next().is_some_and(|p| p.ends_with(".pdf")) {
                if let Some(url) = absolutize(href) {
                    if candidates.iter().all(|c: &CandidateUrl| c.url != url) {
                        candidates.push(CandidateUrl::new(url, UrlKind::Publisher));
                    }
                }
            }
        }
        candidates
    }

    /// Europe PMC full text by PMID. Records with a PMCID were already
    /// covered by the PMC step.
    fn europe_pmc_candidates(&self, publication: &Publication) -> Vec<CandidateUrl> {
        if publication.pmcid.is_some() {
            return Vec::new();
        }
        publication
            .pmid
            .as_deref()
            .map(|pmid| {
                vec![CandidateUrl::new(
                    format!("{}/med/{}", self.europe_pmc_articles_base, pmid),
                    UrlKind::EuropePmc,
                )]
            })
            .unwrap_or_default()
    }

    /// EZProxy builders, one per configured institution
    fn institutional_candidates(&self, publication: &Publication) -> Vec<CandidateUrl> {
        if !self.enable_institutional {
            return Vec::new();
        }
        let Some(doi) = publication.doi.as_deref() else {
            return Vec::new();
        };
        self.institutions
            .iter()
            .map(|institution| {
                let target = format!("https://doi.org/{doi}");
                CandidateUrl {
                    url: format!(
                        "https://{}/login?url={}",
                        institution.ezproxy_host,
                        urlencoding::encode(&target)
                    ),
                    kind: UrlKind::Institutional,
                    requires_manual_auth: true,
                }
            })
            .collect()
    }

    /// Preprint servers: bioRxiv/medRxiv by DOI prefix, arXiv by DOI or
    /// title lookup
    async fn preprint_candidates(&self, publication: &Publication) -> Vec<CandidateUrl> {
        let mut candidates = Vec::new();

        if let Some(doi) = publication.doi.as_deref() {
            // Cold Spring Harbor preprints share the 10.1101 prefix
            if doi.starts_with("10.1101/") {
                candidates.push(CandidateUrl::new(
                    format!("{}/{}v1.full.pdf", self.biorxiv_content_base, doi),
                    UrlKind::Preprint,
                ));
            }
            if let Some(arxiv_id) = doi.strip_prefix("10.48550/arxiv.") {
                candidates.push(CandidateUrl::new(
                    format!("https://arxiv.org/pdf/{arxiv_id}.pdf"),
                    UrlKind::Preprint,
                ));
            }
        }

        if candidates.is_empty() {
            candidates.extend(self.arxiv_title_lookup(publication).await);
        }
        candidates
    }

    /// Title+author lookup against the arXiv Atom API
    async fn arxiv_title_lookup(&self, publication: &Publication) -> Vec<CandidateUrl> {
        let mut url = match url::Url::parse(&self.arxiv_api_base) {
            Ok(url) => url,
            Err(_) => return Vec::new(),
        };
        let mut search_query = format!("ti:\"{}\"", publication.title);
        if let Some(author) = publication.authors.first() {
            search_query.push_str(&format!(" AND au:\"{}\"", author.name));
        }
        url.query_pairs_mut()
            .append_pair("search_query", &search_query)
            .append_pair("max_results", "1");

        let body = match self.client.get(url).send().await {
            Ok(response) if response.status().is_success() => {
                response.text().await.unwrap_or_default()
            }
            _ => return Vec::new(),
        };

        let Ok(doc) = roxmltree::Document::parse(&body) else {
            return Vec::new();
        };
        doc.descendants()
            .filter(|n| n.has_tag_name("link"))
            .filter(|n| n.attribute("type") == Some("application/pdf"))
            .filter_map(|n| n.attribute("href"))
            .map(|href| CandidateUrl::new(href, UrlKind::Preprint))
            .take(1)
            .collect()
    }

    /// Last-resort scrape of an academic network search page, gated by
    /// its own toggle
    async fn scrape_candidates(&self, publication: &Publication) -> Vec<CandidateUrl> {
        if !self.enable_web_scrape {
            return Vec::new();
        }
        let query = urlencoding::encode(&publication.title).to_string();
        let url = format!("https://www.researchgate.net/search?q={query}");

        let body = match self.client.get(&url).send().await {
            Ok(response) if response.status().is_success() => {
                response.text().await.unwrap_or_default()
            }
            _ => return Vec::new(),
        };

        Self::extract_pdf_links(&body, &url)
            .into_iter()
            .map(|mut candidate| {
                candidate.kind = UrlKind::Scrape;
                candidate
            })
            .take(2)
            .collect()
    }
}

/// Lazily resolved sequence of candidate URLs for one publication
pub struct CandidateStream<'a> {
    resolver: &'a FullTextResolver,
    publication: Publication,
    queue: VecDeque<CandidateUrl>,
    step: Step,
}

impl CandidateStream<'_> {
    /// The next candidate, consulting further chain steps on demand
    pub async fn next(&mut self) -> Option<CandidateUrl> {
        loop {
            if let Some(candidate) = self.queue.pop_front() {
                return Some(candidate);
            }
            if self.step == Step::Done {
                return None;
            }

            let produced = match self.step {
                Step::Pmc => self.resolver.pmc_candidates(&self.publication),
                Step::Unpaywall => self.resolver.unpaywall_candidates(&self.publication).await,
                Step::DoiLanding => self.resolver.landing_candidates(&self.publication).await,
                Step::EuropePmc => self.resolver.europe_pmc_candidates(&self.publication),
                Step::Institutional => self.resolver.institutional_candidates(&self.publication),
                Step::Preprint => self.resolver.preprint_candidates(&self.publication).await,
                Step::WebScrape => self.resolver.scrape_candidates(&self.publication).await,
                Step::Done => Vec::new(),
            };
            if !produced.is_empty() {
                debug!(
                    "Resolver step {:?} produced {} candidates for {}",
                    self.step,
                    produced.len(),
                    self.publication.display_id()
                );
            }
            self.queue.extend(produced);
            self.step = self.step.next();
        }
    }

    /// Drain up to `limit` candidates (attaching URLs without download)
    pub async fn collect(&mut self, limit: usize) -> Vec<CandidateUrl> {
        let mut collected = Vec::new();
        while collected.len() < limit {
            match self.next().await {
                Some(candidate) => collected.push(candidate),
                None => break,
            }
        }
        collected
    }
}
