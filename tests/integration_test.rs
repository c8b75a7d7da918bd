use omics_oracle::{Error, SearchConfig, SourceId};

#[test]
fn test_config_default() {
    let config = SearchConfig::default();
    assert!(config.enable_pubmed);
    assert!(config.enable_europe_pmc);
    assert!(config.enable_semantic_scholar);
    assert!(config.enable_openalex);
    assert!(!config.enable_scholar);
    assert!(config.enable_cache);
    assert!(!config.enable_pdf_download);
    assert_eq!(config.pipeline.top_k, 20);
    assert_eq!(config.pipeline.deadline_seconds, 30);
    assert_eq!(config.pipeline.total_deadline_seconds, 60);
    assert_eq!(config.downloads.max_pdf_bytes, 200 * 1024 * 1024);
    assert_eq!(config.downloads.max_concurrent, 4);
    assert_eq!(config.cache.result_ttl_days, 30);
}

#[test]
fn test_config_validation() {
    let mut config = SearchConfig::default();
    assert!(config.validate().is_ok());

    // Out-of-range per-source max_results
    config.sources.pubmed.max_results = 0;
    assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));
    config.sources.pubmed.max_results = 20;

    // Zero timeout
    config.sources.openalex.timeout_seconds = 0;
    assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));
    config.sources.openalex.timeout_seconds = 30;

    // Zero deadline
    config.pipeline.deadline_seconds = 0;
    assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));
    config.pipeline.deadline_seconds = 30;

    // Zero concurrent downloads
    config.downloads.max_concurrent = 0;
    assert!(matches!(config.validate(), Err(Error::InvalidInput { .. })));
    config.downloads.max_concurrent = 4;

    assert!(config.validate().is_ok());
}

#[test]
fn test_error_chain() {
    let err = Error::InvalidInput {
        field: "query".to_string(),
        reason: "query must be non-empty".to_string(),
    };
    assert_eq!(
        format!("{err}"),
        "Invalid input: query - query must be non-empty"
    );

    let err = Error::SourceUpstream {
        source: SourceId::EuropePmc,
        status: 503,
    };
    assert_eq!(format!("{err}"), "Source europe_pmc upstream failure: HTTP 503");
}

#[test]
fn test_source_parsing_accepts_aliases() {
    assert_eq!("pubmed".parse::<SourceId>().unwrap(), SourceId::Pubmed);
    assert_eq!("europepmc".parse::<SourceId>().unwrap(), SourceId::EuropePmc);
    assert_eq!("s2".parse::<SourceId>().unwrap(), SourceId::SemanticScholar);
    assert!("crossref".parse::<SourceId>().is_err());
}

#[test]
fn test_build_info() {
    let _version = env!("CARGO_PKG_VERSION");
    let _name = env!("CARGO_PKG_NAME");
}
