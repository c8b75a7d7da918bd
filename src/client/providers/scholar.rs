use super::traits::{retry_after_header, SearchQuery, SourceClient, SourceError};
use crate::client::{Author, HttpClientConfig, Publication, SourceId};
use async_trait::async_trait;
use regex::Regex;
use reqwest::Client;
use scraper::{Html, Selector};
use std::sync::OnceLock;
use std::time::Instant;
use tracing::{debug, info, warn};
use url::Url;

const DEFAULT_BASE_URL: &str = "https://scholar.google.com";

// Scholar blocks non-browser clients aggressively; a desktop UA is the
// minimum requirement for getting a result page at all.
const BROWSER_USER_AGENT: &str = "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) \
     AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

fn cited_by_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"Cited by (\d+)").expect("static regex"))
}

fn year_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"\b(19|20)\d{2}\b").expect("static regex"))
}

/// Google Scholar client. Scrapes the result page HTML; access without a
/// proxy is unreliable and the pipeline treats this source as
/// best-effort.
pub struct ScholarClient {
    client: Client,
    base_url: String,
}

impl ScholarClient {
    pub fn new(http: &HttpClientConfig) -> Result<Self, SourceError> {
        let mut config = http.clone();
        config.user_agent = BROWSER_USER_AGENT.to_string();
        let client = config
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
        let mut url = Url::parse(&format!("{}/scholar", self.base_url))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;

        {
            let mut pairs = url.query_pairs_mut();
            pairs
                .append_pair("q", &query.query)
                .append_pair("hl", "en")
                .append_pair("num", &query.max_results.min(20).to_string());
            if let Some(from) = query.year_from {
                pairs.append_pair("as_ylo", &from.to_string());
            }
            if let Some(to) = query.year_to {
                pairs.append_pair("as_yhi", &to.to_string());
            }
        }

        Ok(url)
    }

    fn is_blocked(body: &str) -> bool {
        body.contains("unusual traffic from your computer network")
            || body.contains("id=\"gs_captcha")
            || body.contains("/sorry/index")
    }

    /// Parse one result page into publications
    fn parse_results(html: &str, max_results: usize) -> Vec<Publication> {
        let document = Html::parse_document(html);
        let result_sel = Selector::parse("div.gs_r.gs_or.gs_scl").expect("static selector");
        let title_sel = Selector::parse("h3.gs_rt").expect("static selector");
        let link_sel = Selector::parse("h3.gs_rt a").expect("static selector");
        let byline_sel = Selector::parse("div.gs_a").expect("static selector");
        let snippet_sel = Selector::parse("div.gs_rs").expect("static selector");
        let footer_link_sel = Selector::parse("div.gs_fl a").expect("static selector");
        let pdf_sel = Selector::parse("div.gs_or_ggsm a").expect("static selector");

        let mut publications = Vec::new();

        for element in document.select(&result_sel).take(max_results) {
            let Some(title_node) = element.select(&title_sel).next() else {
                continue;
            };
            let mut title = title_node.text().collect::<String>();
            for marker in ["[PDF]", "[HTML]", "[BOOK]", "[B]", "[CITATION]", "[C]"] {
                title = title.replace(marker, " ");
            }
            let title = title.split_whitespace().collect::<Vec<_>>().join(" ");
            if title.is_empty() {
                continue;
            }

            let mut publication = Publication::new(title, SourceId::Scholar);
            publication.scholar_id = element.value().attr("data-cid").map(String::from);
            publication.fulltext_url = element
                .select(&pdf_sel)
                .next()
                .and_then(|a| a.value().attr("href"))
                .map(String::from)
                .or_else(|| {
                    element
                        .select(&link_sel)
                        .next()
                        .and_then(|a| a.value().attr("href"))
                        .map(String::from)
                });

            if let Some(byline) = element.select(&byline_sel).next() {
                let byline_text = byline.text().collect::<String>();
                let mut segments = byline_text.splitn(3, " - ");

                if let Some(author_segment) = segments.next() {
                    publication.authors = author_segment
                        .split(',')
                        .map(str::trim)
                        .filter(|s| !s.is_empty() && !s.contains('…'))
                        .map(Author::new)
                        .collect();
                }
                if let Some(venue_segment) = segments.next() {
                    publication.year = year_regex()
                        .find(venue_segment)
                        .and_then(|m| m.as_str().parse().ok());
                    let venue = venue_segment
                        .split(',')
                        .map(str::trim)
                        .filter(|part| year_regex().find(part).map_or(true, |m| m.as_str() != *part))
                        .collect::<Vec<_>>()
                        .join(", ");
                    if !venue.is_empty() {
                        publication.venue = Some(venue);
                    }
                }
            }

            publication.abstract_text = element
                .select(&snippet_sel)
                .next()
                .map(|node| node.text().collect::<String>())
                .map(|text| text.split_whitespace().collect::<Vec<_>>().join(" "))
                .filter(|text| !text.is_empty());

            for footer_link in element.select(&footer_link_sel) {
                let text = footer_link.text().collect::<String>();
                if let Some(captures) = cited_by_regex().captures(&text) {
                    publication.citations = captures[1].parse().unwrap_or(0);
                    break;
                }
            }

            if publication.validate().is_ok() {
                publications.push(publication);
            } else {
                debug!("Dropping Scholar hit without identity");
            }
        }

        publications
    }
}

#[async_trait]
impl SourceClient for ScholarClient {
    fn id(&self) -> SourceId {
        SourceId::Scholar
    }

    async fn search(&self, query: &SearchQuery) -> Result<Vec<Publication>, SourceError> {
        query.validate()?;
        let started = Instant::now();

        let url = self.build_search_url(query)?;
        debug!("Scholar search URL: {}", url);

        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|e| SourceError::from_http(&e))?;

        let status = response.status();
        if status == reqwest::StatusCode::TOO_MANY_REQUESTS {
            let retry_after = retry_after_header(&response);
            return Err(SourceError::RateLimited { retry_after });
        }
        if status == reqwest::StatusCode::FORBIDDEN {
            warn!("Scholar returned 403, treating as blocked");
            return Err(SourceError::Blocked);
        }
        if !status.is_success() {
            return Err(SourceError::from_status(status, None));
        }

        let body = response
            .text()
            .await
            .map_err(|e| SourceError::Network(format!("failed to read response: {e}")))?;

        if Self::is_blocked(&body) {
            warn!("Scholar served an anti-bot interstitial");
            return Err(SourceError::Blocked);
        }

        let publications = Self::parse_results(&body, query.max_results as usize);
        info!(
            "Scholar search returned {} publications in {:?}",
            publications.len(),
            started.elapsed()
        );
        Ok(publications)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const RESULT_PAGE: &str = r#"<html><body>
      <div class="gs_r gs_or gs_scl" data-cid="AbCdEf123">
        <div class="gs_ggs gs_fl"><div class="gs_or_ggsm">
          <a href="https://example.org/paper.pdf">[PDF] example.org</a>
        </div></div>
        <div class="gs_ri">
          <h3 class="gs_rt"><span class="gs_ctg2">[PDF]</span>
            <a href="https://journal.example/view">A novel CRISPR method</a></h3>
          <div class="gs_a">J Doe, R Roe… - Nature Biotechnology, 2023 - nature.com</div>
          <div class="gs_rs">We present a novel method for gene editing…</div>
          <div class="gs_fl"><a href="/cites">Cited by 214</a><a href="/related">Related articles</a></div>
        </div>
      </div>
    </body></html>"#;

    #[test]
    fn parse_result_page() {
        let publications = ScholarClient::parse_results(RESULT_PAGE, 10);
        assert_eq!(publications.len(), 1);
        let p = &publications[0];
        assert_eq!(p.title, "A novel CRISPR method");
        assert_eq!(p.scholar_id.as_deref(), Some("AbCdEf123"));
        assert_eq!(p.year, Some(2023));
        assert_eq!(p.citations, 214);
        assert_eq!(p.venue.as_deref(), Some("Nature Biotechnology"));
        assert_eq!(p.fulltext_url.as_deref(), Some("https://example.org/paper.pdf"));
        // the truncated trailing author fragment is dropped
        assert_eq!(p.authors.len(), 1);
        assert_eq!(p.authors[0].name, "J Doe");
    }

    #[test]
    fn detects_anti_bot_page() {
        assert!(ScholarClient::is_blocked(
            "<html>Our systems have detected unusual traffic from your computer network.</html>"
        ));
        assert!(!ScholarClient::is_blocked("<html>normal results</html>"));
    }

    #[test]
    fn empty_page_yields_nothing() {
        assert!(ScholarClient::parse_results("<html></html>", 10).is_empty());
    }
}
