//! Citation tracking for GEO datasets: papers citing a dataset's
//! original publication.

use crate::client::providers::SemanticScholarClient;
use crate::client::Publication;
use chrono::{Datelike, NaiveDate, Utc};
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::sync::OnceLock;
use tracing::{debug, info, warn};

fn geo_accession_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^GSE\d+$").expect("static regex"))
}

/// Descriptor of one GEO series
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeoSeriesMetadata {
    /// Accession, `GSE<digits>`
    pub geo_id: String,
    pub title: String,
    pub platform: Option<String>,
    pub organism: Option<String>,
    pub publication_date: Option<NaiveDate>,
    /// PubMed ids of the original publications, in series order
    pub pubmed_ids: Vec<String>,
    /// Attached by the citation tracker
    #[serde(skip_serializing_if = "Option::is_none")]
    pub citing_papers: Option<Vec<Publication>>,
}

impl GeoSeriesMetadata {
    #[must_use]
    pub fn new(geo_id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            geo_id: geo_id.into(),
            title: title.into(),
            platform: None,
            organism: None,
            publication_date: None,
            pubmed_ids: Vec::new(),
            citing_papers: None,
        }
    }

    pub fn validate(&self) -> crate::Result<()> {
        if !geo_accession_regex().is_match(&self.geo_id) {
            return Err(crate::Error::InvalidInput {
                field: "geo_id".to_string(),
                reason: format!("not a GEO series accession: {}", self.geo_id),
            });
        }
        Ok(())
    }

    /// True iff the series was published within `days` of `today`
    #[must_use]
    pub fn is_recent_at(&self, days: i64, today: NaiveDate) -> bool {
        self.publication_date
            .is_some_and(|date| (today - date).num_days() <= days)
    }

    #[must_use]
    pub fn is_recent(&self, days: i64) -> bool {
        self.is_recent_at(days, Utc::now().date_naive())
    }
}

/// Tracker limits
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CitationTrackerConfig {
    /// Citations older than this many years are dropped
    pub years_back: i32,
    /// Maximum citing papers attached per dataset
    pub max_papers: usize,
}

impl Default for CitationTrackerConfig {
    fn default() -> Self {
        Self {
            years_back: 5,
            max_papers: 10,
        }
    }
}

/// Retrieves and ranks papers citing a dataset's original publication.
///
/// Failure semantics: transient upstream errors produce an empty list
/// and a logged warning, never a pipeline error.
pub struct CitationTracker {
    client: Arc<SemanticScholarClient>,
    config: CitationTrackerConfig,
    today: NaiveDate,
}

impl CitationTracker {
    #[must_use]
    pub fn new(client: Arc<SemanticScholarClient>, config: CitationTrackerConfig) -> Self {
        Self {
            client,
            config,
            today: Utc::now().date_naive(),
        }
    }

    /// Fix the reference date (tests)
    #[must_use]
    pub const fn with_today(mut self, today: NaiveDate) -> Self {
        self.today = today;
        self
    }

    /// Papers citing the dataset's original publication, ranked and
    /// truncated. Never fabricates citing papers: a recent dataset
    /// yields at most its own original paper.
    pub async fn citing_papers(&self, dataset: &GeoSeriesMetadata) -> Vec<Publication> {
        if dataset.pubmed_ids.is_empty() {
            debug!("{} has no linked publications", dataset.geo_id);
            return Vec::new();
        }

        if dataset.is_recent_at(365, self.today) {
            // too young to have accumulated citations
            debug!(
                "{} is recent; returning the original paper only",
                dataset.geo_id
            );
            return match self
                .client
                .citing_papers_for_pmid(&dataset.pubmed_ids[0])
                .await
            {
                Ok(result) => result.original.into_iter().collect(),
                Err(e) => {
                    warn!("Citation lookup failed for {}: {e}", dataset.geo_id);
                    Vec::new()
                }
            };
        }

        let mut citing: Vec<Publication> = Vec::new();
        for pmid in &dataset.pubmed_ids {
            match self.client.citing_papers_for_pmid(pmid).await {
                Ok(result) => citing.extend(result.citing),
                Err(e) => {
                    warn!(
                        "Citation lookup failed for {} (PMID {pmid}): {e}",
                        dataset.geo_id
                    );
                }
            }
        }

        let min_year = self.today.year() - self.config.years_back;
        citing.retain(|p| p.year.map_or(false, |y| y >= min_year));

        for publication in &mut citing {
            publication.score = self.score(publication, min_year);
        }
        citing.sort_by(|a, b| {
            b.score
                .partial_cmp(&a.score)
                .unwrap_or(std::cmp::Ordering::Equal)
                .then_with(|| b.citations.cmp(&a.citations))
        });
        citing.truncate(self.config.max_papers);

        info!(
            "{}: {} citing papers after filtering and ranking",
            dataset.geo_id,
            citing.len()
        );
        citing
    }

    /// Fixed tracker scoring: 0.4 recency + 0.3 citation impact + 0.3
    /// access
    fn score(&self, publication: &Publication, min_year: i32) -> f64 {
        let recency_norm = publication.year.map_or(0.0, |year| {
            (f64::from(year - min_year) / f64::from(self.config.years_back)).clamp(0.0, 1.0)
        });
        let citation_impact = (f64::from(publication.citations) / 100.0).min(1.0);
        let access = if publication.is_open_access { 1.0 } else { 0.5 };

        0.4 * recency_norm + 0.3 * citation_impact + 0.3 * access
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accession_validation() {
        assert!(GeoSeriesMetadata::new("GSE123456", "t").validate().is_ok());
        assert!(GeoSeriesMetadata::new("GSE", "t").validate().is_err());
        assert!(GeoSeriesMetadata::new("GPL570", "t").validate().is_err());
        assert!(GeoSeriesMetadata::new("gse123", "t").validate().is_err());
    }

    #[test]
    fn recency_window() {
        let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
        let mut dataset = GeoSeriesMetadata::new("GSE999999", "t");
        dataset.publication_date = NaiveDate::from_ymd_opt(2025, 5, 2);
        assert!(dataset.is_recent_at(365, today));

        dataset.publication_date = NaiveDate::from_ymd_opt(2020, 5, 2);
        assert!(!dataset.is_recent_at(365, today));

        dataset.publication_date = None;
        assert!(!dataset.is_recent_at(365, today));
    }

    #[test]
    fn tracker_scoring_prefers_recent_open_access() {
        use crate::client::{HttpClientConfig, SourceId};
        let client = Arc::new(
            SemanticScholarClient::new(&HttpClientConfig::default(), None).unwrap(),
        );
        let tracker = CitationTracker::new(client, CitationTrackerConfig::default())
            .with_today(NaiveDate::from_ymd_opt(2025, 1, 1).unwrap());
        let min_year = 2020;

        let mut fresh_open = Publication::new("a", SourceId::SemanticScholar);
        fresh_open.year = Some(2025);
        fresh_open.citations = 10;
        fresh_open.is_open_access = true;

        let mut old_closed = Publication::new("b", SourceId::SemanticScholar);
        old_closed.year = Some(2020);
        old_closed.citations = 10;

        assert!(tracker.score(&fresh_open, min_year) > tracker.score(&old_closed, min_year));
        assert!(tracker.score(&fresh_open, min_year) <= 1.0);
    }
}
