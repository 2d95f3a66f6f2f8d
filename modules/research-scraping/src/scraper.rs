//! Scraper Factory (C4): the extraction contract and the kind-to-constructor
//! mapping. Scrapers are created fresh per task rather than pooled, so one
//! scraper panicking or wedging a browser session cannot take down a
//! sibling task.

use async_trait::async_trait;
use research_common::types::{Artifact, ScraperKind};

use crate::error::ScrapingError;

/// What a scraper hands back for one URL.
#[async_trait]
pub trait PageScraper: Send + Sync {
    /// Human-readable name for logging, e.g. `"chrome"` or `"forum-api"`.
    fn name(&self) -> &'static str;

    /// Fetch and parse `url`, returning a populated `Artifact`.
    async fn extract(&self, url: &str, link_id: &str) -> Result<Artifact, ScrapingError>;

    /// Release any held resources (browser tabs, connections). Called once
    /// after `extract` returns, success or failure.
    async fn close(&self) {}

    /// Cheap pre-flight check before `extract` is attempted. Default
    /// accepts every url; scrapers with a narrower domain (a platform API
    /// client that only handles its own host, say) override this.
    fn validate_url(&self, _url: &str) -> bool {
        true
    }
}

/// Builds a fresh `PageScraper` for `kind`. One `ScraperFactory` per process;
/// cloned into every worker.
pub trait ScraperFactory: Send + Sync {
    fn build(&self, kind: ScraperKind) -> Result<Box<dyn PageScraper>, ScrapingError>;
}

/// A `ScraperFactory` backed by a static map from kind to constructor
/// closure, open to registration so tests and alternate deployments can
/// swap in fakes without touching this crate.
pub struct RegisteredScraperFactory {
    video: Box<dyn Fn() -> Box<dyn PageScraper> + Send + Sync>,
    forum: Box<dyn Fn() -> Box<dyn PageScraper> + Send + Sync>,
    article: Box<dyn Fn() -> Box<dyn PageScraper> + Send + Sync>,
}

impl RegisteredScraperFactory {
    pub fn new(
        video: impl Fn() -> Box<dyn PageScraper> + Send + Sync + 'static,
        forum: impl Fn() -> Box<dyn PageScraper> + Send + Sync + 'static,
        article: impl Fn() -> Box<dyn PageScraper> + Send + Sync + 'static,
    ) -> Self {
        Self {
            video: Box::new(video),
            forum: Box::new(forum),
            article: Box::new(article),
        }
    }
}

impl ScraperFactory for RegisteredScraperFactory {
    fn build(&self, kind: ScraperKind) -> Result<Box<dyn PageScraper>, ScrapingError> {
        let scraper = match kind {
            ScraperKind::Video => (self.video)(),
            ScraperKind::Forum => (self.forum)(),
            ScraperKind::Article => (self.article)(),
        };
        Ok(scraper)
    }
}

#[cfg(any(test, feature = "test-support"))]
pub mod fakes {
    use super::*;
    use chrono::Utc;
    use research_common::types::{ArtifactMetadata, LinkKind};
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    /// A scraper that always succeeds with a deterministic artifact body,
    /// counting invocations for assertions.
    pub struct FakeScraper {
        pub name: &'static str,
        pub link_kind: LinkKind,
        pub calls: Arc<AtomicUsize>,
    }

    impl FakeScraper {
        pub fn new(name: &'static str, link_kind: LinkKind) -> Self {
            Self {
                name,
                link_kind,
                calls: Arc::new(AtomicUsize::new(0)),
            }
        }
    }

    #[async_trait]
    impl PageScraper for FakeScraper {
        fn name(&self) -> &'static str {
            self.name
        }

        async fn extract(&self, url: &str, link_id: &str) -> Result<Artifact, ScrapingError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(Artifact {
                link_id: link_id.to_string(),
                link_kind: self.link_kind,
                url: url.to_string(),
                content: serde_json::json!({ "body": format!("content for {url}") }),
                metadata: ArtifactMetadata {
                    source: self.name.to_string(),
                    extracted_at: Utc::now(),
                    word_count: 3,
                    language: Some("en".to_string()),
                },
            })
        }
    }

    /// A scraper that always fails, for exercising the failure path.
    pub struct FailingScraper {
        pub reason: String,
    }

    #[async_trait]
    impl PageScraper for FailingScraper {
        fn name(&self) -> &'static str {
            "failing"
        }

        async fn extract(&self, _url: &str, _link_id: &str) -> Result<Artifact, ScrapingError> {
            Err(ScrapingError::ScraperFailed(self.reason.clone()))
        }
    }

    /// A scraper that rejects every url at the pre-flight check, so
    /// `extract` should never run.
    pub struct RejectingScraper {
        pub extract_calls: Arc<AtomicUsize>,
    }

    impl RejectingScraper {
        pub fn new() -> Self {
            Self { extract_calls: Arc::new(AtomicUsize::new(0)) }
        }
    }

    impl Default for RejectingScraper {
        fn default() -> Self {
            Self::new()
        }
    }

    #[async_trait]
    impl PageScraper for RejectingScraper {
        fn name(&self) -> &'static str {
            "rejecting"
        }

        fn validate_url(&self, _url: &str) -> bool {
            false
        }

        async fn extract(&self, url: &str, link_id: &str) -> Result<Artifact, ScrapingError> {
            self.extract_calls.fetch_add(1, Ordering::SeqCst);
            Ok(Artifact {
                link_id: link_id.to_string(),
                link_kind: LinkKind::Article,
                url: url.to_string(),
                content: serde_json::json!({}),
                metadata: ArtifactMetadata {
                    source: "rejecting".into(),
                    extracted_at: Utc::now(),
                    word_count: 0,
                    language: None,
                },
            })
        }
    }
}
