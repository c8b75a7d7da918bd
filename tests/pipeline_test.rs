//! End-to-end pipeline tests against mocked source APIs. No test here
//! ever touches a live service.

use omics_oracle::cache::CacheLayer;
use omics_oracle::client::providers::{EuropePmcClient, PubMedClient, ScholarClient};
use omics_oracle::client::{HttpClientConfig, RateLimiterRegistry, SourceClient};
use omics_oracle::pipeline::{PublicationPipeline, QueryIntent, SearchOptions};
use omics_oracle::{SearchConfig, SourceId};
use std::sync::Arc;
use std::time::Duration;
use wiremock::matchers::{method, path, query_param};
use wiremock::{Mock, MockServer, ResponseTemplate};

const ESEARCH_XML: &str = r#"<?xml version="1.0"?>
<eSearchResult><Count>1</Count><IdList><Id>1001</Id></IdList></eSearchResult>"#;

const EFETCH_XML: &str = r#"<?xml version="1.0"?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">1001</PMID>
      <Article>
        <Journal>
          <Title>Nature Medicine</Title>
          <JournalIssue><PubDate><Year>2022</Year><Month>Mar</Month></PubDate></JournalIssue>
        </Journal>
        <ArticleTitle>CRISPR gene editing therapeutics</ArticleTitle>
        <Abstract><AbstractText>Therapeutic genome editing in humans.</AbstractText></Abstract>
        <AuthorList>
          <Author><LastName>Doe</LastName><ForeName>Jane</ForeName></Author>
        </AuthorList>
      </Article>
    </MedlineCitation>
    <PubmedData>
      <ArticleIdList>
        <ArticleId IdType="doi">10.1038/test-0001</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

const EPMC_JSON: &str = r#"{
  "hitCount": 1,
  "resultList": {
    "result": [{
      "pmid": "1001",
      "doi": "10.1038/TEST-0001",
      "title": "CRISPR gene editing therapeutics",
      "abstractText": "Therapeutic genome editing in humans.",
      "journalTitle": "Nature Medicine",
      "pubYear": "2022",
      "firstPublicationDate": "2022-03-10",
      "citedByCount": 77,
      "isOpenAccess": "Y",
      "authorString": "Doe J."
    }]
  }
}"#;

fn test_config() -> SearchConfig {
    let mut config = SearchConfig::default();
    config.enable_cache = false;
    config.pipeline.deadline_seconds = 10;
    config.pipeline.total_deadline_seconds = 20;
    for source in SourceId::ALL {
        config.sources.get_mut(source).rate_limit_seconds = 0.0;
    }
    config
}

fn build_pipeline(
    config: SearchConfig,
    sources: Vec<Arc<dyn SourceClient>>,
) -> PublicationPipeline {
    let limiters = Arc::new(RateLimiterRegistry::new(Duration::from_millis(0), 4));
    PublicationPipeline::from_parts(
        config,
        sources,
        limiters,
        Arc::new(CacheLayer::memory()),
        None,
        None,
        None,
    )
}

async fn mount_pubmed(server: &MockServer) {
    Mock::given(method("GET"))
        .and(path("/pubmed/esearch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ESEARCH_XML))
        .mount(server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pubmed/efetch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EFETCH_XML))
        .mount(server)
        .await;
}

fn pubmed_client(server: &MockServer) -> Arc<dyn SourceClient> {
    Arc::new(
        PubMedClient::new(&HttpClientConfig::default(), None)
            .unwrap()
            .with_base_url(format!("{}/pubmed", server.uri())),
    )
}

fn epmc_client(server: &MockServer) -> Arc<dyn SourceClient> {
    Arc::new(
        EuropePmcClient::new(&HttpClientConfig::default())
            .unwrap()
            .with_base_url(format!("{}/epmc", server.uri())),
    )
}

#[tokio::test]
async fn two_sources_merge_into_one_publication() {
    let server = MockServer::start().await;
    mount_pubmed(&server).await;
    Mock::given(method("GET"))
        .and(path("/epmc/search"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EPMC_JSON))
        .mount(&server)
        .await;

    let pipeline = build_pipeline(
        test_config(),
        vec![pubmed_client(&server), epmc_client(&server)],
    );
    let result = pipeline
        .search("CRISPR gene editing therapeutics", SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.total_found, 2);
    assert_eq!(result.publications.len(), 1);

    let p = &result.publications[0];
    assert_eq!(p.doi.as_deref(), Some("10.1038/test-0001"));
    assert_eq!(p.pmid.as_deref(), Some("1001"));
    assert_eq!(p.citations, 77);
    assert!(p.is_open_access);
    assert!(p.sources.contains(&SourceId::Pubmed));
    assert!(p.sources.contains(&SourceId::EuropePmc));
    assert!(p.score > 0.0 && p.score <= 1.0);

    assert_eq!(result.per_source_counts[&SourceId::Pubmed], 1);
    assert_eq!(result.per_source_counts[&SourceId::EuropePmc], 1);
    assert!(result.failures.is_empty());
}

#[tokio::test]
async fn upstream_failure_is_isolated_and_recorded() {
    let server = MockServer::start().await;
    mount_pubmed(&server).await;
    Mock::given(method("GET"))
        .and(path("/epmc/search"))
        .respond_with(ResponseTemplate::new(500))
        .mount(&server)
        .await;

    let pipeline = build_pipeline(
        test_config(),
        vec![pubmed_client(&server), epmc_client(&server)],
    );
    let result = pipeline
        .search("CRISPR gene editing therapeutics", SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.publications.len(), 1);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].source, SourceId::EuropePmc);
    assert_eq!(result.failures[0].kind, "upstream");
    assert_eq!(result.per_source_counts[&SourceId::EuropePmc], 0);
}

#[tokio::test]
async fn scholar_anti_bot_page_is_a_blocked_failure() {
    let server = MockServer::start().await;
    mount_pubmed(&server).await;
    Mock::given(method("GET"))
        .and(path("/scholar"))
        .respond_with(ResponseTemplate::new(200).set_body_string(
            "<html>Our systems have detected unusual traffic from your computer network.</html>",
        ))
        .mount(&server)
        .await;

    let scholar: Arc<dyn SourceClient> = Arc::new(
        ScholarClient::new(&HttpClientConfig::default())
            .unwrap()
            .with_base_url(server.uri()),
    );

    let pipeline = build_pipeline(test_config(), vec![pubmed_client(&server), scholar]);
    let result = pipeline
        .search("CRISPR gene editing therapeutics", SearchOptions::default())
        .await
        .unwrap();

    assert_eq!(result.publications.len(), 1);
    assert_eq!(result.failures.len(), 1);
    assert_eq!(result.failures[0].source, SourceId::Scholar);
    assert_eq!(result.failures[0].kind, "blocked");
}

#[tokio::test]
async fn review_query_selects_review_weights() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/pubmed/esearch.fcgi"))
        .and(query_param("db", "pubmed"))
        .respond_with(ResponseTemplate::new(200).set_body_string(ESEARCH_XML))
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/pubmed/efetch.fcgi"))
        .respond_with(ResponseTemplate::new(200).set_body_string(EFETCH_XML))
        .mount(&server)
        .await;

    let pipeline = build_pipeline(test_config(), vec![pubmed_client(&server)]);
    let result = pipeline
        .search("review of CRISPR gene editing", SearchOptions::default())
        .await
        .unwrap();
    assert_eq!(result.intent, QueryIntent::Review);
}

#[tokio::test]
async fn cached_search_replays_identical_publications() {
    let server = MockServer::start().await;
    mount_pubmed(&server).await;

    let mut config = test_config();
    config.enable_cache = true;
    let pipeline = build_pipeline(config, vec![pubmed_client(&server)]);

    let first = pipeline
        .search("CRISPR gene editing therapeutics", SearchOptions::default())
        .await
        .unwrap();
    let second = pipeline
        .search("CRISPR gene editing therapeutics", SearchOptions::default())
        .await
        .unwrap();

    assert!(!first.cache_hit);
    assert!(second.cache_hit);
    assert_eq!(
        serde_json::to_value(&first.publications).unwrap(),
        serde_json::to_value(&second.publications).unwrap()
    );
}
