use super::traits::{retry_after_header, SearchQuery, SourceClient, SourceError};
use crate::client::{Author, HttpClientConfig, Publication, SourceId};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use serde::Deserialize;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://www.ebi.ac.uk/europepmc/webservices/rest";

/// Europe PMC REST client
pub struct EuropePmcClient {
    client: Client,
    base_url: String,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    #[serde(rename = "hitCount", default)]
    hit_count: u64,
    #[serde(rename = "resultList", default)]
    result_list: Option<ResultList>,
}

#[derive(Debug, Default, Deserialize)]
struct ResultList {
    #[serde(default)]
    result: Vec<EpmcResult>,
}

#[derive(Debug, Deserialize)]
struct EpmcResult {
    #[serde(default)]
    pmid: Option<String>,
    #[serde(default)]
    pmcid: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    title: Option<String>,
    #[serde(rename = "abstractText", default)]
    abstract_text: Option<String>,
    #[serde(rename = "authorList", default)]
    author_list: Option<AuthorList>,
    #[serde(rename = "authorString", default)]
    author_string: Option<String>,
    #[serde(rename = "journalTitle", default)]
    journal_title: Option<String>,
    #[serde(rename = "pubYear", default)]
    pub_year: Option<String>,
    #[serde(rename = "firstPublicationDate", default)]
    first_publication_date: Option<String>,
    #[serde(rename = "citedByCount", default)]
    cited_by_count: Option<u32>,
    #[serde(rename = "isOpenAccess", default)]
    is_open_access: Option<String>,
}

#[derive(Debug, Deserialize)]
struct AuthorList {
    #[serde(default)]
    author: Vec<EpmcAuthor>,
}

#[derive(Debug, Deserialize)]
struct EpmcAuthor {
    #[serde(rename = "fullName", default)]
    full_name: Option<String>,
    #[serde(rename = "affiliation", default)]
    affiliation: Option<String>,
}

impl EuropePmcClient {
    pub fn new(http: &HttpClientConfig) -> Result<Self, SourceError> {
        let client = http
            .build()
            .map_err(|e| SourceError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_search_url(&self, query: &SearchQuery) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/search", self.base_url))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;

        // Year bounds are expressed inside the query language itself
        let mut term = query.query.clone();
        if query.year_from.is_some() || query.year_to.is_some() {
            let from = query.year_from.map_or_else(|| "1800".to_string(), |y| y.to_string());
            let to = query.year_to.map_or_else(|| "3000".to_string(), |y| y.to_string());
            term = format!("({term}) AND (PUB_YEAR:[{from} TO {to}])");
        }

        url.query_pairs_mut()
            .append_pair("query", &term)
            .append_pair("format", "json")
            .append_pair("resultType", "core")
            .append_pair("pageSize", &query.max_results.to_string());

        Ok(url)
    }

    fn convert(result: EpmcResult) -> Option<Publication> {
        let title = result.title?.trim().to_string();
        if title.is_empty() {
            return None;
        }

        let mut publication = Publication::new(title, SourceId::EuropePmc);
        publication.pmid = result.pmid;
        publication.pmcid = result.pmcid;
        publication.doi = result
            .doi
            .as_deref()
            .and_then(|d| crate::client::Doi::new(d).ok())
            .map(|d| d.as_str().to_string());
        publication.abstract_text = result.abstract_text;
        publication.venue = result.journal_title;
        publication.year = result.pub_year.as_deref().and_then(|y| y.parse().ok());
        publication.publication_date = result
            .first_publication_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        publication.citations = result.cited_by_count.unwrap_or(0);
        publication.is_open_access = result.is_open_access.as_deref() == Some("Y");

        if let Some(list) = result.author_list {
            for author in list.author {
                if let Some(name) = author.full_name {
                    let mut entry = Author::new(name);
                    entry.affiliation = author.affiliation;
                    publication.authors.push(entry);
                }
            }
        } else if let Some(author_string) = result.author_string {
            publication.authors = author_string
                .split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(|s| Author::new(s.trim_end_matches('.')))
                .collect();
        }

        publication.validate().ok()?;
        Some(publication)
    }
}

#[async_trait]
impl SourceClient for EuropePmcClient {
    fn id(&self) -> SourceId {
        SourceId::EuropePmc
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Publication>, SourceError> {
        query.validate()?;
        let started = Instant::now();

        let url = self.build_search_url(query)?;
        debug!("Europe PMC search URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::from_http(&e))?;

        if !response.status().is_success() {
            let retry_after = retry_after_header(&response);
            return Err(SourceError::from_status(response.status(), retry_after));
        }

        let body: SearchResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Europe PMC JSON: {e}")))?;

        let publications: Vec<Publication> = body
            .result_list
            .unwrap_or_default()
            .result
            .into_iter()
            .filter_map(Self::convert)
            .collect();

        info!(
            "Europe PMC search returned {} of {} publications in {:?}",
            publications.len(),
            body.hit_count,
            started.elapsed()
        );
        Ok(publications)
    }

    async fn fetch_by_doi(&self, doi: &str) -> Result<Option<Publication>, SourceError> {
        let query = SearchQuery::new(format!("DOI:\"{doi}\"")).with_max_results(1);
        Ok(self.search(&query).await?.into_iter().next())
    }
}
