//! Bridges for the legacy GEO-oriented caller contract.

use crate::client::providers::SearchQuery;
use crate::client::Publication;
use crate::pipeline::PublicationResult;
use crate::{Error, Result};
use serde::{Deserialize, Serialize};

/// Legacy request shape: a list of search terms instead of one query
/// string
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacySearchRequest {
    pub search_terms: Vec<String>,
    #[serde(default)]
    pub max_results: Option<u32>,
}

impl LegacySearchRequest {
    /// Convert into the canonical search query
    pub fn into_query(self) -> Result<SearchQuery> {
        let joined = self
            .search_terms
            .iter()
            .map(|term| term.trim())
            .filter(|term| !term.is_empty())
            .collect::<Vec<_>>()
            .join(" ");
        if joined.is_empty() {
            return Err(Error::InvalidInput {
                field: "search_terms".to_string(),
                reason: "at least one non-empty search term is required".to_string(),
            });
        }

        let mut query = SearchQuery::new(joined);
        if let Some(max_results) = self.max_results {
            query.max_results = max_results;
        }
        Ok(query)
    }
}

/// Legacy per-record shape with GEO-oriented field names
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyGeoRecord {
    pub title: String,
    pub authors: Vec<String>,
    pub journal: Option<String>,
    pub pub_date: Option<String>,
    pub pmid: Option<String>,
    pub doi: Option<String>,
    pub citation_count: u32,
    /// Legacy linear relevance, not the pipeline score
    pub relevance_score: f64,
    pub open_access: bool,
}

/// Legacy response envelope
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LegacyGeoResponse {
    pub status: String,
    pub total: usize,
    pub geo_summaries: Vec<LegacyGeoRecord>,
}

/// The legacy linear citation form, `min(C/100, 1)`. Kept only for
/// callers of the old contract; the ranker uses the tiered curve.
#[must_use]
pub fn legacy_citation_score(citations: u32) -> f64 {
    (f64::from(citations) / 100.0).min(1.0)
}

fn to_record(publication: &Publication) -> LegacyGeoRecord {
    LegacyGeoRecord {
        title: publication.title.clone(),
        authors: publication.authors.iter().map(|a| a.name.clone()).collect(),
        journal: publication.venue.clone(),
        pub_date: publication
            .publication_date
            .map(|d| d.format("%Y-%m-%d").to_string())
            .or_else(|| publication.year.map(|y| y.to_string())),
        pmid: publication.pmid.clone(),
        doi: publication.doi.clone(),
        citation_count: publication.citations,
        relevance_score: legacy_citation_score(publication.citations),
        open_access: publication.is_open_access,
    }
}

impl From<&PublicationResult> for LegacyGeoResponse {
    fn from(result: &PublicationResult) -> Self {
        Self {
            status: "ok".to_string(),
            total: result.publications.len(),
            geo_summaries: result.publications.iter().map(to_record).collect(),
        }
    }
}
