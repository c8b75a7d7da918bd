use super::traits::{retry_after_header, SearchQuery, SourceClient, SourceError};
use crate::client::{Author, HttpClientConfig, Publication, SourceId};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.semanticscholar.org/graph/v1";
const API_KEY_HEADER: &str = "x-api-key";

const SEARCH_FIELDS: &str = "paperId,externalIds,title,abstract,year,publicationDate,venue,\
                             authors,citationCount,influentialCitationCount,isOpenAccess,\
                             openAccessPdf";
const CITATIONS_FIELDS: &str = "title,year,citationCount,\
                                citations.title,citations.year,citations.citationCount,\
                                citations.externalIds,citations.isOpenAccess";

/// Semantic Scholar Graph API client. Also serves the citation tracker
/// through `citing_papers_for_pmid`.
pub struct SemanticScholarClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(default)]
    total: u64,
    #[serde(default)]
    data: Vec<S2Paper>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2Paper {
    #[serde(default)]
    paper_id: Option<String>,
    #[serde(default)]
    external_ids: Option<HashMap<String, serde_json::Value>>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "abstract", default)]
    abstract_text: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    venue: Option<String>,
    #[serde(default)]
    authors: Vec<S2Author>,
    #[serde(default)]
    citation_count: Option<u32>,
    #[serde(default)]
    influential_citation_count: Option<u32>,
    #[serde(default)]
    is_open_access: Option<bool>,
    #[serde(default)]
    open_access_pdf: Option<S2OpenAccessPdf>,
}

#[derive(Debug, Default, Deserialize)]
struct S2Author {
    #[serde(default)]
    name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct S2OpenAccessPdf {
    #[serde(default)]
    url: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct S2PaperWithCitations {
    #[serde(default)]
    title: Option<String>,
    #[serde(default)]
    year: Option<i32>,
    #[serde(default)]
    citation_count: Option<u32>,
    #[serde(default)]
    citations: Vec<S2Paper>,
}

/// The original paper plus the papers citing it, normalized
#[derive(Debug)]
pub struct CitingPapers {
    pub original: Option<Publication>,
    pub citing: Vec<Publication>,
}

impl SemanticScholarClient {
    pub fn new(http: &HttpClientConfig, api_key: Option<String>) -> Result<Self, SourceError> {
        let client = http
            .build()
            .map_err(|e| SourceError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            api_key,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: Url) -> Result<T, SourceError> {
        let mut request = self.client.get(url);
        if let Some(key) = &self.api_key {
            request = request.header(API_KEY_HEADER, key);
        }

        let response = request
            .send()
            .await
            .map_err(|e| SourceError::from_http(&e))?;

        if !response.status().is_success() {
            let retry_after = retry_after_header(&response);
            return Err(SourceError::from_status(response.status(), retry_after));
        }

        response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Semantic Scholar JSON: {e}")))
    }

    fn convert(paper: S2Paper) -> Option<Publication> {
        let title = paper.title?.trim().to_string();
        if title.is_empty() {
            return None;
        }

        let mut publication = Publication::new(title, SourceId::SemanticScholar);
        publication.s2_paper_id = paper.paper_id;
        publication.abstract_text = paper.abstract_text;
        publication.year = paper.year;
        publication.publication_date = paper
            .publication_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        publication.venue = paper.venue.filter(|v| !v.is_empty());
        publication.citations = paper.citation_count.unwrap_or(0);
        publication.influential_citations = paper.influential_citation_count;
        publication.is_open_access = paper.is_open_access.unwrap_or(false);
        publication.fulltext_url = paper.open_access_pdf.and_then(|pdf| pdf.url);
        publication.authors = paper
            .authors
            .into_iter()
            .filter_map(|a| a.name)
            .map(Author::new)
            .collect();

        if let Some(ids) = paper.external_ids {
            if let Some(doi) = ids.get("DOI").and_then(|v| v.as_str()) {
                publication.doi = crate::client::Doi::new(doi)
                    .ok()
                    .map(|d| d.as_str().to_string());
            }
            if let Some(pmid) = ids.get("PubMed").and_then(value_as_id) {
                publication.pmid = Some(pmid);
            }
            if let Some(pmcid) = ids.get("PubMedCentral").and_then(value_as_id) {
                publication.pmcid = Some(format!("PMC{}", pmcid.trim_start_matches("PMC")));
            }
        }

        publication.validate().ok()?;
        Some(publication)
    }

    /// Papers citing the publication behind a PubMed id. Used by the GEO
    /// citation tracker; the returned list is unranked.
    pub async fn citing_papers_for_pmid(&self, pmid: &str) -> Result<CitingPapers, SourceError> {
        let mut url = Url::parse(&format!("{}/paper/PMID:{}", self.base_url, pmid))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("fields", CITATIONS_FIELDS);

        debug!("Semantic Scholar citations URL: {}", url);
        let body: S2PaperWithCitations = self.get_json(url).await?;

        let original = body.title.as_ref().map(|title| {
            let mut publication = Publication::new(title.clone(), SourceId::SemanticScholar);
            publication.pmid = Some(pmid.to_string());
            publication.year = body.year;
            publication.citations = body.citation_count.unwrap_or(0);
            publication
        });

        let citing = body
            .citations
            .into_iter()
            .filter_map(Self::convert)
            .collect();

        Ok(CitingPapers { original, citing })
    }
}

fn value_as_id(value: &serde_json::Value) -> Option<String> {
    match value {
        serde_json::Value::String(s) => Some(s.clone()),
        serde_json::Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

#[async_trait]
impl SourceClient for SemanticScholarClient {
    fn id(&self) -> SourceId {
        SourceId::SemanticScholar
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Publication>, SourceError> {
        query.validate()?;
        let started = Instant::now();

        let mut url = Url::parse(&format!("{}/paper/search", self.base_url))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;
        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("query", &query.query)
                .append_pair("limit", &query.max_results.to_string())
                .append_pair("fields", SEARCH_FIELDS);
            if query.year_from.is_some() || query.year_to.is_some() {
                let from = query.year_from.map_or_else(String::new, |y| y.to_string());
                let to = query.year_to.map_or_else(String::new, |y| y.to_string());
                pairs.append_pair("year", &format!("{from}-{to}"));
            }
        }
        debug!("Semantic Scholar search URL: {}", url);

        let body: SearchResponse = self.get_json(url).await?;
        let publications: Vec<Publication> =
            body.data.into_iter().filter_map(Self::convert).collect();

        info!(
            "Semantic Scholar search returned {} of {} publications in {:?}",
            publications.len(),
            body.total,
            started.elapsed()
        );
        Ok(publications)
    }

    async fn fetch_by_doi(&self, doi: &str) -> Result<Option<Publication>, SourceError> {
        let mut url = Url::parse(&format!("{}/paper/DOI:{}", self.base_url, doi))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;
        url.query_pairs_mut().append_pair("fields", SEARCH_FIELDS);

        match self.get_json::<S2Paper>(url).await {
            Ok(paper) => Ok(Self::convert(paper)),
            Err(SourceError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn fetch_by_id(&self, native_id: &str) -> Result<Option<Publication>, SourceError> {
        let mut url = Url::parse(&format!("{}/paper/{}", self.base_url, native_id))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;
        url.query_pairs_mut().append_pair("fields", SEARCH_FIELDS);

        match self.get_json::<S2Paper>(url).await {
            Ok(paper) => Ok(Self::convert(paper)),
            Err(SourceError::NotFound) => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn get_citations(&self, publication: &Publication) -> Result<u32, SourceError> {
        let id = publication
            .s2_paper_id
            .clone()
            .or_else(|| publication.doi.as_ref().map(|d| format!("DOI:{d}")))
            .or_else(|| publication.pmid.as_ref().map(|p| format!("PMID:{p}")))
            .ok_or(SourceError::InvalidQuery(
                "publication has no identifier Semantic Scholar understands".to_string(),
            ))?;

        let mut url = Url::parse(&format!("{}/paper/{}", self.base_url, id))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;
        url.query_pairs_mut()
            .append_pair("fields", "citationCount");

        let paper: S2Paper = self.get_json(url).await?;
        Ok(paper.citation_count.unwrap_or(0))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn convert_search_hit() {
        let raw = r#"{
            "paperId": "abc123",
            "externalIds": {"DOI": "10.1016/J.CELL.2023.01.001", "PubMed": "36600000"},
            "title": "CRISPR screening at scale",
            "abstract": "We screened.",
            "year": 2023,
            "publicationDate": "2023-02-15",
            "venue": "Cell",
            "authors": [{"authorId": "1", "name": "A. Researcher"}],
            "citationCount": 128,
            "influentialCitationCount": 17,
            "isOpenAccess": true,
            "openAccessPdf": {"url": "https://example.org/paper.pdf"}
        }"#;
        let paper: S2Paper = serde_json::from_str(raw).unwrap();
        let p = SemanticScholarClient::convert(paper).unwrap();
        assert_eq!(p.s2_paper_id.as_deref(), Some("abc123"));
        assert_eq!(p.doi.as_deref(), Some("10.1016/j.cell.2023.01.001"));
        assert_eq!(p.pmid.as_deref(), Some("36600000"));
        assert_eq!(p.citations, 128);
        assert_eq!(p.influential_citations, Some(17));
        assert!(p.is_open_access);
        assert_eq!(p.fulltext_url.as_deref(), Some("https://example.org/paper.pdf"));
        assert_eq!(p.publication_date, NaiveDate::from_ymd_opt(2023, 2, 15));
    }

    #[test]
    fn convert_numeric_pmid() {
        let raw = r#"{"title": "T", "year": 2020, "externalIds": {"PubMed": 123456}}"#;
        let paper: S2Paper = serde_json::from_str(raw).unwrap();
        let p = SemanticScholarClient::convert(paper).unwrap();
        assert_eq!(p.pmid.as_deref(), Some("123456"));
    }

    #[test]
    fn citations_payload_parses() {
        let raw = r#"{
            "title": "Original dataset paper",
            "year": 2018,
            "citationCount": 3,
            "citations": [
                {"title": "Citing one", "year": 2021, "citationCount": 5,
                 "externalIds": {"DOI": "10.1/a"}, "isOpenAccess": true},
                {"title": null, "year": 2022}
            ]
        }"#;
        let body: S2PaperWithCitations = serde_json::from_str(raw).unwrap();
        assert_eq!(body.citations.len(), 2);
        let converted: Vec<_> = body
            .citations
            .into_iter()
            .filter_map(SemanticScholarClient::convert)
            .collect();
        assert_eq!(converted.len(), 1);
        assert_eq!(converted[0].citations, 5);
    }
}
