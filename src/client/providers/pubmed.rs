use super::traits::{retry_after_header, SearchQuery, SourceClient, SourceError};
use crate::client::{Author, HttpClientConfig, Publication, SourceId};
use async_trait::async_trait;
use chrono::NaiveDate;
use reqwest::Client;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://eutils.ncbi.nlm.nih.gov/entrez/eutils";

/// PubMed source client built on the NCBI E-utilities API.
///
/// Search is a two-step esearch → efetch conversation; both payloads are
/// XML.
pub struct PubMedClient {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl PubMedClient {
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

    /// Override the E-utilities endpoint (mocked servers in tests)
    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    fn build_esearch_url(&self, query: &SearchQuery) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/esearch.fcgi", self.base_url))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("db", "pubmed")
                .append_pair("term", &query.query)
                .append_pair("retmax", &query.max_results.to_string())
                .append_pair("retmode", "xml")
                .append_pair("sort", "relevance");

            if query.year_from.is_some() || query.year_to.is_some() {
                pairs.append_pair("datetype", "pdat");
                if let Some(from) = query.year_from {
                    pairs.append_pair("mindate", &format!("{from}/01/01"));
                }
                if let Some(to) = query.year_to {
                    pairs.append_pair("maxdate", &format!("{to}/12/31"));
                }
            }
            if let Some(key) = &self.api_key {
                pairs.append_pair("api_key", key);
            }
        }

        Ok(url)
    }

    fn build_efetch_url(&self, pmids: &[String]) -> Result<Url, SourceError> {
        let mut url = Url::parse(&format!("{}/efetch.fcgi", self.base_url))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("db", "pubmed")
                .append_pair("id", &pmids.join(","))
                .append_pair("retmode", "xml");
            if let Some(key) = &self.api_key {
                pairs.append_pair("api_key", key);
            }
        }

        Ok(url)
    }

    async fn get_xml(&self, url: Url) -> Result<String, SourceError> {
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

        response
            .text()
            .await
            .map_err(|e| SourceError::Network(format!("failed to read response: {e}")))
    }

    /// Parse the esearch id list
    fn parse_esearch(xml: &str) -> Result<Vec<String>, SourceError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| SourceError::Parse(format!("esearch XML: {e}")))?;

        Ok(doc
            .descendants()
            .filter(|n| n.has_tag_name("IdList"))
            .flat_map(|list| list.children())
            .filter(|n| n.has_tag_name("Id"))
            .filter_map(|n| n.text())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .collect())
    }

    /// Parse an efetch PubmedArticleSet into normalized publications
    fn parse_efetch(xml: &str) -> Result<Vec<Publication>, SourceError> {
        let doc = roxmltree::Document::parse(xml)
            .map_err(|e| SourceError::Parse(format!("efetch XML: {e}")))?;

        let mut publications = Vec::new();

        for article in doc.descendants().filter(|n| n.has_tag_name("PubmedArticle")) {
            let title = article
                .descendants()
                .find(|n| n.has_tag_name("ArticleTitle"))
                .map(|n| collect_text(&n))
                .unwrap_or_default();
            if title.is_empty() {
                continue;
            }

            let mut publication = Publication::new(title, SourceId::Pubmed);

            publication.pmid = article
                .descendants()
                .find(|n| n.has_tag_name("MedlineCitation"))
                .and_then(|c| c.children().find(|n| n.has_tag_name("PMID")))
                .and_then(|n| n.text())
                .map(|s| s.trim().to_string());

            let abstract_text = article
                .descendants()
                .filter(|n| n.has_tag_name("AbstractText"))
                .map(|n| collect_text(&n))
                .collect::<Vec<_>>()
                .join(" ");
            if !abstract_text.is_empty() {
                publication.abstract_text = Some(abstract_text);
            }

            publication.venue = article
                .descendants()
                .find(|n| n.has_tag_name("Journal"))
                .and_then(|j| j.descendants().find(|n| n.has_tag_name("Title")))
                .map(|n| collect_text(&n));

            for author in article.descendants().filter(|n| n.has_tag_name("Author")) {
                let last = author
                    .children()
                    .find(|n| n.has_tag_name("LastName"))
                    .and_then(|n| n.text());
                let fore = author
                    .children()
                    .find(|n| n.has_tag_name("ForeName"))
                    .and_then(|n| n.text());
                let name = match (fore, last) {
                    (Some(f), Some(l)) => format!("{f} {l}"),
                    (None, Some(l)) => l.to_string(),
                    _ => continue,
                };
                let mut entry = Author::new(name);
                entry.affiliation = author
                    .descendants()
                    .find(|n| n.has_tag_name("Affiliation"))
                    .map(|n| collect_text(&n));
                publication.authors.push(entry);
            }

            if let Some(pub_date) = article
                .descendants()
                .find(|n| n.has_tag_name("PubDate"))
            {
                let year = pub_date
                    .children()
                    .find(|n| n.has_tag_name("Year"))
                    .and_then(|n| n.text())
                    .and_then(|s| s.trim().parse::<i32>().ok());
                publication.year = year;
                if let Some(y) = year {
                    let month = pub_date
                        .children()
                        .find(|n| n.has_tag_name("Month"))
                        .and_then(|n| n.text())
                        .map_or(1, parse_month);
                    let day = pub_date
                        .children()
                        .find(|n| n.has_tag_name("Day"))
                        .and_then(|n| n.text())
                        .and_then(|s| s.trim().parse::<u32>().ok())
                        .unwrap_or(1);
                    publication.publication_date = NaiveDate::from_ymd_opt(y, month, day)
                        .or_else(|| NaiveDate::from_ymd_opt(y, month, 1));
                }
            }

            for id in article.descendants().filter(|n| n.has_tag_name("ArticleId")) {
                let Some(value) = id.text().map(str::trim) else {
                    continue;
                };
                match id.attribute("IdType") {
                    Some("doi") => {
                        if let Ok(doi) = crate::client::Doi::new(value) {
                            publication.doi = Some(doi.as_str().to_string());
                        }
                    }
                    Some("pmc") => publication.pmcid = Some(value.to_string()),
                    _ => {}
                }
            }

            if publication.validate().is_ok() {
                publications.push(publication);
            } else {
                warn!("Dropping PubMed record without identity: {:?}", publication.pmid);
            }
        }

        Ok(publications)
    }
}

/// Concatenated text of a node's descendant text nodes, whitespace
/// normalized. PubMed titles and abstracts embed markup elements
/// (italics, sub/sup).
fn collect_text(node: &roxmltree::Node) -> String {
    let mut out = String::new();
    for descendant in node.descendants().filter(roxmltree::Node::is_text) {
        if let Some(text) = descendant.text() {
            out.push_str(text);
        }
    }
    out.split_whitespace().collect::<Vec<_>>().join(" ")
}

fn parse_month(raw: &str) -> u32 {
    let trimmed = raw.trim();
    if let Ok(n) = trimmed.parse::<u32>() {
        return n.clamp(1, 12);
    }
    match trimmed.get(..3).map(str::to_ascii_lowercase).as_deref() {
        Some("jan") => 1,
        Some("feb") => 2,
        Some("mar") => 3,
        Some("apr") => 4,
        Some("may") => 5,
        Some("jun") => 6,
        Some("jul") => 7,
        Some("aug") => 8,
        Some("sep") => 9,
        Some("oct") => 10,
        Some("nov") => 11,
        Some("dec") => 12,
        _ => 1,
    }
}

#[async_trait]
impl SourceClient for PubMedClient {
    fn id(&self) -> SourceId {
        SourceId::Pubmed
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Publication>, SourceError> {
        query.validate()?;
        let started = Instant::now();

        let esearch_url = self.build_esearch_url(query)?;
        debug!("PubMed esearch URL: {}", esearch_url);

        let esearch_xml = self.get_xml(esearch_url).await?;
        let pmids = Self::parse_esearch(&esearch_xml)?;
        if pmids.is_empty() {
            debug!("PubMed esearch returned no ids for: {}", query.query);
            return Ok(Vec::new());
        }

        let efetch_url = self.build_efetch_url(&pmids)?;
        let efetch_xml = self.get_xml(efetch_url).await?;
        let publications = Self::parse_efetch(&efetch_xml)?;

        info!(
            "PubMed search returned {} publications in {:?}",
            publications.len(),
            started.elapsed()
        );
        Ok(publications)
    }

    async fn fetch_by_id(&self, native_id: &str) -> Result<Option<Publication>, SourceError> {
        let url = self.build_efetch_url(&[native_id.to_string()])?;
        let xml = self.get_xml(url).await?;
        Ok(Self::parse_efetch(&xml)?.into_iter().next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const EFETCH_SAMPLE: &str = r#"<?xml version="1.0" ?>
<PubmedArticleSet>
  <PubmedArticle>
    <MedlineCitation>
      <PMID Version="1">31452104</PMID>
      <Article>
        <Journal><Title>Nature methods</Title></Journal>
        <ArticleTitle>Single-cell RNA sequencing of <i>human</i> tissue</ArticleTitle>
        <Abstract>
          <AbstractText Label="BACKGROUND">First part.</AbstractText>
          <AbstractText Label="RESULTS">Second part.</AbstractText>
        </Abstract>
        <AuthorList>
          <Author>
            <LastName>Doe</LastName>
            <ForeName>Jane</ForeName>
            <AffiliationInfo><Affiliation>Example University</Affiliation></AffiliationInfo>
          </Author>
        </AuthorList>
      </Article>
      <DateCompleted/>
    </MedlineCitation>
    <PubmedData>
      <History>
        <PubMedPubDate PubStatus="pubmed"><Year>2019</Year></PubMedPubDate>
      </History>
      <ArticleIdList>
        <ArticleId IdType="doi">10.1038/s41592-019-0000-0</ArticleId>
        <ArticleId IdType="pmc">PMC6700000</ArticleId>
      </ArticleIdList>
    </PubmedData>
  </PubmedArticle>
</PubmedArticleSet>"#;

    #[test]
    fn parse_esearch_ids() {
        let xml = r#"<eSearchResult><Count>2</Count><IdList><Id>111</Id><Id>222</Id></IdList></eSearchResult>"#;
        assert_eq!(PubMedClient::parse_esearch(xml).unwrap(), vec!["111", "222"]);
    }

    #[test]
    fn parse_efetch_publication() {
        let publications = PubMedClient::parse_efetch(EFETCH_SAMPLE).unwrap();
        assert_eq!(publications.len(), 1);
        let p = &publications[0];
        assert_eq!(p.title, "Single-cell RNA sequencing of human tissue");
        assert_eq!(p.pmid.as_deref(), Some("31452104"));
        assert_eq!(p.doi.as_deref(), Some("10.1038/s41592-019-0000-0"));
        assert_eq!(p.pmcid.as_deref(), Some("PMC6700000"));
        assert_eq!(p.abstract_text.as_deref(), Some("First part. Second part."));
        assert_eq!(p.venue.as_deref(), Some("Nature methods"));
        assert_eq!(p.authors.len(), 1);
        assert_eq!(p.authors[0].name, "Jane Doe");
        assert!(p.sources.contains(&SourceId::Pubmed));
    }

    #[test]
    fn month_names_parse() {
        assert_eq!(parse_month("Jan"), 1);
        assert_eq!(parse_month("sep"), 9);
        assert_eq!(parse_month("12"), 12);
        assert_eq!(parse_month("bogus"), 1);
    }

    #[test]
    fn esearch_url_includes_year_bounds() {
        let client = PubMedClient::new(&HttpClientConfig::default(), Some("k".into())).unwrap();
        let mut query = SearchQuery::new("crispr");
        query.year_from = Some(2020);
        query.year_to = Some(2023);
        let url = client.build_esearch_url(&query).unwrap();
        let url = url.as_str();
        assert!(url.contains("mindate=2020%2F01%2F01"));
        assert!(url.contains("maxdate=2023%2F12%2F31"));
        assert!(url.contains("api_key=k"));
    }
}
