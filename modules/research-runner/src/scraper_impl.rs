//! A minimal, dependency-light `PageScraper`: fetches the URL over HTTP and
//! keeps the raw body as the artifact's content, tagged with its kind. Real
//! deployments would swap this for a headless-browser or platform-API
//! scraper per kind; the factory wiring in `main.rs` is what changes, not
//! the control plane in `research-scraping`.

use async_trait::async_trait;
use chrono::Utc;
use research_common::types::{Artifact, ArtifactMetadata, LinkKind};
use research_scraping::PageScraper;
use research_scraping::ScrapingError;

pub struct HttpScraper {
    kind: LinkKind,
    client: reqwest::Client,
}

impl HttpScraper {
    pub fn new(kind: LinkKind) -> Self {
        Self { kind, client: reqwest::Client::new() }
    }
}

#[async_trait]
impl PageScraper for HttpScraper {
    fn name(&self) -> &'static str {
        "http-fetch"
    }

    async fn extract(&self, url: &str, link_id: &str) -> Result<Artifact, ScrapingError> {
        let response = self
            .client
            .get(url)
            .send()
            .await
            .map_err(|err| ScrapingError::ScraperFailed(err.to_string()))?;
        if !response.status().is_success() {
            return Err(ScrapingError::ScraperFailed(format!("http status {}", response.status())));
        }
        let body = response
            .text()
            .await
            .map_err(|err| ScrapingError::ScraperFailed(err.to_string()))?;
        let word_count = body.split_whitespace().count();

        Ok(Artifact {
            link_id: link_id.to_string(),
            link_kind: self.kind,
            url: url.to_string(),
            content: serde_json::json!({ "text": body }),
            metadata: ArtifactMetadata { source: "http-fetch".into(), extracted_at: Utc::now(), word_count, language: None },
        })
    }
}
