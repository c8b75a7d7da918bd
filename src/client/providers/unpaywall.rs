use super::traits::{retry_after_header, SourceError};
use crate::client::{CandidateUrl, HttpClientConfig, UrlKind};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

const DEFAULT_BASE_URL: &str = "https://api.unpaywall.org/v2";

/// Unpaywall client. This source maps identifiers to open-access
/// locations; it is not a search source and therefore does not implement
/// `SourceClient`. The full-text resolver consumes it directly.
pub struct UnpaywallClient {
    client: Client,
    base_url: String,
    email: String,
}

#[derive(Debug, Default, Deserialize)]
pub struct UnpaywallRecord {
    #[serde(default)]
    pub is_oa: bool,
    #[serde(default)]
    pub best_oa_location: Option<OaLocation>,
    #[serde(default)]
    pub oa_locations: Vec<OaLocation>,
}

#[derive(Debug, Default, Deserialize)]
pub struct OaLocation {
    #[serde(default)]
    pub url_for_pdf: Option<String>,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default)]
    pub host_type: Option<String>,
}

impl UnpaywallClient {
    pub fn new(http: &HttpClientConfig, email: impl Into<String>) -> Result<Self, SourceError> {
        let client = http
            .build()
            .map_err(|e| SourceError::Network(format!("failed to create HTTP client: {e}")))?;

        Ok(Self {
            client,
            base_url: DEFAULT_BASE_URL.to_string(),
            email: email.into(),
        })
    }

    #[must_use]
    pub fn with_base_url(mut self, base_url: impl Into<String>) -> Self {
        self.base_url = base_url.into();
        self
    }

    /// Fetch the open-access record for a DOI. `Ok(None)` when Unpaywall
    /// does not know the DOI.
    pub async fn fetch_by_doi(&self, doi: &str) -> Result<Option<UnpaywallRecord>, SourceError> {
        let mut url = Url::parse(&format!("{}/{}", self.base_url, doi))
            .map_err(|e| SourceError::Network(format!("invalid base URL: {e}")))?;
        url.query_pairs_mut().append_pair("email", &self.email);

        debug!("Unpaywall lookup URL: {}", url);
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

        let record: UnpaywallRecord = response
            .json()
            .await
            .map_err(|e| SourceError::Parse(format!("Unpaywall JSON: {e}")))?;
        Ok(Some(record))
    }

    /// Ordered open-access PDF candidates for a DOI: best location first,
    /// then the remaining locations, PDF URLs preferred over landing URLs.
    pub async fn pdf_candidates(&self, doi: &str) -> Result<Vec<CandidateUrl>, SourceError> {
        let Some(record) = self.fetch_by_doi(doi).await? else {
            return Ok(Vec::new());
        };
        if !record.is_oa {
            return Ok(Vec::new());
        }

        let mut candidates = Vec::new();
        let mut push = |location: &OaLocation| {
            let Some(url) = location.url_for_pdf.clone().or_else(|| location.url.clone()) else {
                return;
            };
            if candidates.iter().all(|c: &CandidateUrl| c.url != url) {
                candidates.push(CandidateUrl::new(url, UrlKind::OpenAccess));
            }
        };

        if let Some(best) = &record.best_oa_location {
            push(best);
        }
        for location in &record.oa_locations {
            push(location);
        }

        Ok(candidates)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_parses_and_orders_candidates() {
        let raw = r#"{
            "is_oa": true,
            "best_oa_location": {"url_for_pdf": "https://a.example/best.pdf", "host_type": "repository"},
            "oa_locations": [
                {"url_for_pdf": "https://a.example/best.pdf"},
                {"url": "https://b.example/landing", "url_for_pdf": null}
            ]
        }"#;
        let record: UnpaywallRecord = serde_json::from_str(raw).unwrap();
        assert!(record.is_oa);
        assert_eq!(record.oa_locations.len(), 2);
        assert_eq!(
            record.best_oa_location.unwrap().url_for_pdf.as_deref(),
            Some("https://a.example/best.pdf")
        );
    }

    #[test]
    fn closed_access_record() {
        let record: UnpaywallRecord =
            serde_json::from_str(r#"{"is_oa": false, "oa_locations": []}"#).unwrap();
        assert!(!record.is_oa);
    }
}
