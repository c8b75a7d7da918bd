use super::traits::{retry_after_header, SearchQuery, SourceClient, SourceError};
use crate::client::{Author, HttpClientConfig, Publication, SourceId};
use async_trait::async_trait;
use chrono::{Datelike, NaiveDate, Utc};
use reqwest::Client;
use serde::Deserialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.openalex.org";

/// OpenAlex works API client. Joins the polite pool when an email is
/// configured.
pub struct OpenAlexClient {
    client: Client,
    base_url: String,
    mailto: Option<String>,
}

#[derive(Debug, Deserialize)]
struct WorksResponse {
    #[serde(default)]
    meta: Option<Meta>,
    #[serde(default)]
    results: Vec<Work>,
}

#[derive(Debug, Deserialize)]
struct Meta {
    #[serde(default)]
    count: u64,
}

#[derive(Debug, Default, Deserialize)]
struct Work {
    #[serde(default)]
    id: Option<String>,
    #[serde(default)]
    doi: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    publication_year: Option<i32>,
    #[serde(default)]
    publication_date: Option<String>,
    #[serde(default)]
    ids: Option<WorkIds>,
    #[serde(default)]
    cited_by_count: Option<u32>,
    #[serde(default)]
    counts_by_year: Vec<YearCount>,
    #[serde(default)]
    open_access: Option<OpenAccess>,
    #[serde(default)]
    primary_location: Option<Location>,
    #[serde(default)]
    authorships: Vec<Authorship>,
    #[serde(default)]
    abstract_inverted_index: Option<HashMap<String, Vec<u32>>>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkIds {
    #[serde(default)]
    pmid: Option<String>,
    #[serde(default)]
    pmcid: Option<String>,
}

#[derive(Debug, Deserialize)]
struct YearCount {
    year: i32,
    #[serde(default)]
    cited_by_count: u32,
}

#[derive(Debug, Default, Deserialize)]
struct OpenAccess {
    #[serde(default)]
    is_oa: bool,
    #[serde(default)]
    oa_url: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Location {
    #[serde(default)]
    pdf_url: Option<String>,
    #[serde(default)]
    source: Option<LocationSource>,
}

#[derive(Debug, Default, Deserialize)]
struct LocationSource {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Authorship {
    #[serde(default)]
    author: Option<WorkAuthor>,
    #[serde(default)]
    institutions: Vec<Institution>,
}

#[derive(Debug, Default, Deserialize)]
struct WorkAuthor {
    #[serde(default)]
    display_name: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct Institution {
    #[serde(default)]
    display_name: Option<String>,
}

impl OpenAlexClient {
    pub fn new(http: &HttpClientConfig, mailto: Option<String>) -> Result<Self, SourceError> {
        let client = http
            .build()
            .map_err(|e| SourceError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            mailto,
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_search_url(&self, query: &SearchQuery) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/works", self.base_url))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("search", &query.query)
                .append_pair("per-page", &query.max_results.to_string());

            let mut filters = Vec::new();
            if let Some(from) = query.year_from {
                filters.push(format!("from_publication_date:{from}-01-01"));
            }
            if let Some(to) = query.year_to {
                filters.push(format!("to_publication_date:{to}-12-31"));
            }
            if !filters.is_empty() {
                pairs.append_pair("filter", &filters.join(","));
            }
            if let Some(email) = &self.mailto {
                pairs.append_pair("mailto", email);
            }
        }

        Ok(url)
    }

    /// Rebuild abstract text from OpenAlex's inverted index representation
    fn reconstruct_abstract(index: &HashMap<String, Vec<u32>>) -> Option<String> {
        let mut positions: Vec<(u32, &str)> = index
            .iter()
            .flat_map(|(word, occurrences)| occurrences.iter().map(move |&i| (i, word.as_str())))
            .collect();
        if positions.is_empty() {
            return None;
        }
        positions.sort_unstable_by_key(|(i, _)| *i);
        Some(
            positions
                .into_iter()
                .map(|(_, word)| word)
                .collect::<Vec<_>>()
                .join(" "),
        )
    }

    fn convert(work: Work, current_year: i32) -> Option<Publication> {
        let title = work.display_name?.trim().to_string();
        if title.is_empty() {
            return None;
        }

        let mut publication = Publication::new(title, SourceId::OpenAlex);
        publication.doi = work
            .doi
            .as_deref()
            .and_then(|d| crate::client::Doi::new(d).ok())
            .map(|d| d.as_str().to_string());
        publication.year = work.publication_year;
        publication.publication_date = work
            .publication_date
            .as_deref()
            .and_then(|d| NaiveDate::parse_from_str(d, "%Y-%m-%d").ok());
        publication.citations = work.cited_by_count.unwrap_or(0);

        // The per-year histogram gives citation velocity over the last
        // three calendar years
        let recent: u32 = work
            .counts_by_year
            .iter()
            .filter(|c| c.year > current_year - 3)
            .map(|c| c.cited_by_count)
            .sum();
        if !work.counts_by_year.is_empty() {
            publication.citations_last_3_years = Some(recent.min(publication.citations));
        }

        if let Some(ids) = work.ids {
            publication.pmid = ids
                .pmid
                .as_deref()
                .map(|p| p.trim_start_matches("https://pubmed.ncbi.nlm.nih.gov/"))
                .map(|p| p.trim_matches('/').to_string());
            publication.pmcid = ids
                .pmcid
                .as_deref()
                .map(|p| p.rsplit('/').next().unwrap_or(p).to_string());
        }

        if let Some(oa) = work.open_access {
            publication.is_open_access = oa.is_oa;
            publication.fulltext_url = oa.oa_url;
        }
        if let Some(location) = work.primary_location {
            if publication.fulltext_url.is_none() {
                publication.fulltext_url = location.pdf_url;
            }
            publication.venue = location.source.and_then(|s| s.display_name);
        }

        publication.authors = work
            .authorships
            .into_iter()
            .filter_map(|authorship| {
                let name = authorship.author?.display_name?;
                let mut entry = Author::new(name);
                entry.affiliation = authorship
                    .institutions
                    .into_iter()
                    .find_map(|i| i.display_name);
                Some(entry)
            })
            .collect();

        publication.abstract_text = work
            .abstract_inverted_index
            .as_ref()
            .and_then(Self::reconstruct_abstract);

        if let Some(id) = work.id {
            publication
                .source_specific
                .insert("openalex_id".to_string(), serde_json::Value::String(id));
        }

        publication.validate().ok()?;
        Some(publication)
    }
}

#[async_trait]
impl SourceClient for OpenAlexClient {
    fn id(&self) -> SourceId {
        SourceId::OpenAlex
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Publication>, SourceError> {
        query.validate()?;
        let started = Instant::now();

        let url = self.build_search_url(query)?;
        debug!("OpenAlex search URL: {}", url);

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

        let body: WorksResponse = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("OpenAlex JSON: {e}")))?;

        let current_year = Utc::now().year();
        let publications: Vec<Publication> = body
            .results
            .into_iter()
            .filter_map(|work| Self::convert(work, current_year))
            .collect();

        info!(
            "OpenAlex search returned {} of {} publications in {:?}",
            publications.len(),
            body.meta.map_or(0, |m| m.count),
            started.elapsed()
        );
        Ok(publications)
    }

    async fn fetch_by_doi(&self, doi: &str) -> Result<Option<Publication>, SourceError> {
        let mut url = Url::parse(&format!("{}/works/https://doi.org/{}", self.base_url, doi))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;
        if let Some(email) = &self.mailto {
            url.query_pairs_mut().append_pair("mailto", email);
        }

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::from_http(&e))?;

        if response.status() == reqwest::StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !response.status().is_success() {
            let retry_after = retry_after_header(&response);
            return Err(SourceError::from_status(response.status(), retry_after));
        }

        let work: Work = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("OpenAlex JSON: {e}")))?;
        Ok(Self::convert(work, Utc::now().year()))
    }
}
