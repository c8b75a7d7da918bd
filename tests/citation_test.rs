//! Citation tracker tests against a mocked Semantic Scholar API.

use chrono::NaiveDate;
use omics_oracle::citations::{CitationTracker, CitationTrackerConfig, GeoSeriesMetadata};
use omics_oracle::client::providers::SemanticScholarClient;
use omics_oracle::client::HttpClientConfig;
use std::sync::Arc;
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

const CITATIONS_JSON: &str = r#"{
  "title": "Original GSE paper",
  "year": 2018,
  "citationCount": 4,
  "citations": [
    {"title": "Fresh open citer", "year": 2024, "citationCount": 20,
     "externalIds": {"DOI": "10.1/fresh"}, "isOpenAccess": true},
    {"title": "Old citer", "year": 2015, "citationCount": 900,
     "externalIds": {"DOI": "10.1/old"}},
    {"title": "Recent closed citer", "year": 2023, "citationCount": 5,
     "externalIds": {"DOI": "10.1/closed"}}
  ]
}"#;

fn tracker(server: &MockServer, today: NaiveDate) -> CitationTracker {
    let client = SemanticScholarClient::new(&HttpClientConfig::default(), None)
        .unwrap()
        .with_base_url(server.uri());
    CitationTracker::new(Arc::new(client), CitationTrackerConfig::default()).with_today(today)
}

fn dataset(published: Option<NaiveDate>) -> GeoSeriesMetadata {
    let mut dataset = GeoSeriesMetadata::new("GSE999999", "A single-cell atlas series");
    dataset.publication_date = published;
    dataset.pubmed_ids = vec!["123".to_string()];
    dataset
}

#[tokio::test]
async fn recent_dataset_returns_only_the_original_paper() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/paper/PMID:123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CITATIONS_JSON))
        .mount(&server)
        .await;

    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let tracker = tracker(&server, today);
    let recent = dataset(Some(today - chrono::Duration::days(30)));

    let papers = tracker.citing_papers(&recent).await;
    assert_eq!(papers.len(), 1);
    assert_eq!(papers[0].title, "Original GSE paper");
    assert_eq!(papers[0].pmid.as_deref(), Some("123"));
}

#[tokio::test]
async fn older_dataset_gets_filtered_ranked_citers() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/paper/PMID:123"))
        .respond_with(ResponseTemplate::new(200).set_body_string(CITATIONS_JSON))
        .mount(&server)
        .await;

    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let tracker = tracker(&server, today);
    let old = dataset(NaiveDate::from_ymd_opt(2018, 3, 1));

    let papers = tracker.citing_papers(&old).await;
    // the 2015 citer falls outside the 5-year window
    assert_eq!(papers.len(), 2);
    assert!(papers.iter().all(|p| p.year.unwrap() >= 2020));
    // recent + open access outranks recent + closed
    assert_eq!(papers[0].title, "Fresh open citer");
    assert!(papers[0].score >= papers[1].score);
}

#[tokio::test]
async fn upstream_failure_yields_empty_list() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/paper/PMID:123"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let tracker = tracker(&server, today);
    let old = dataset(NaiveDate::from_ymd_opt(2018, 3, 1));

    assert!(tracker.citing_papers(&old).await.is_empty());
}

#[tokio::test]
async fn dataset_without_publications_short_circuits() {
    // no mock mounted: a network call would fail loudly
    let server = MockServer::start().await;
    let today = NaiveDate::from_ymd_opt(2025, 6, 1).unwrap();
    let tracker = tracker(&server, today);

    let mut no_pmids = dataset(NaiveDate::from_ymd_opt(2018, 3, 1));
    no_pmids.pubmed_ids.clear();
    assert!(tracker.citing_papers(&no_pmids).await.is_empty());
}
