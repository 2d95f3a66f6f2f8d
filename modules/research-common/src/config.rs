use std::env;
use std::path::PathBuf;

/// Application configuration loaded from environment variables.
///
/// Built once at startup and passed by reference or `Arc`; never mutated
/// after construction (see spec's "global mutable configuration" note).
#[derive(Debug, Clone)]
pub struct Config {
    // LLM provider
    pub llm_api_key: String,
    pub llm_base_url: String,
    pub llm_model: String,

    // Embedding provider (used by the novelty filter)
    pub embedding_api_key: String,
    pub embedding_base_url: String,
    pub embedding_model: String,

    // Storage
    pub storage_root: PathBuf,

    // Scraping
    pub scraping_worker_pool_size: usize,
    pub scraping_queue_check_interval_ms: u64,
    pub scraping_persistence_retry_attempts: u32,

    // Summarization
    pub summarization_worker_pool_size: usize,
    pub summarization_settle_delay_ms: u64,

    // Research
    pub research_page_window_size_chars: usize,
    pub research_novelty_threshold: f64,
    pub research_heartbeat_seconds: u64,
    pub research_stream_include_usage: bool,

    // Event bus
    pub event_bus_subscriber_buffer: usize,
}

impl Config {
    /// Load configuration from environment variables.
    /// Panics with a clear message if a required var is missing.
    pub fn from_env() -> Self {
        Self {
            llm_api_key: required_env("LLM_API_KEY"),
            llm_base_url: env::var("LLM_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            llm_model: env::var("LLM_MODEL").unwrap_or_else(|_| "gpt-4o-mini".to_string()),

            embedding_api_key: env::var("EMBEDDING_API_KEY").unwrap_or_default(),
            embedding_base_url: env::var("EMBEDDING_BASE_URL")
                .unwrap_or_else(|_| "https://api.openai.com/v1".to_string()),
            embedding_model: env::var("EMBEDDING_MODEL")
                .unwrap_or_else(|_| "text-embedding-3-small".to_string()),

            storage_root: env::var("STORAGE_ROOT")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),

            scraping_worker_pool_size: env_parse("SCRAPING_WORKER_POOL_SIZE", 8),
            scraping_queue_check_interval_ms: env_parse("SCRAPING_QUEUE_CHECK_INTERVAL_MS", 100),
            scraping_persistence_retry_attempts: env_parse("SCRAPING_PERSISTENCE_ATTEMPTS", 3),

            summarization_worker_pool_size: env_parse("SUMMARIZATION_WORKER_POOL_SIZE", 3),
            summarization_settle_delay_ms: env_parse("SUMMARIZATION_SETTLE_DELAY_MS", 200),

            research_page_window_size_chars: env_parse("RESEARCH_PAGE_WINDOW_SIZE_CHARS", 20_000),
            research_novelty_threshold: env_parse("RESEARCH_NOVELTY_THRESHOLD", 0.85),
            research_heartbeat_seconds: env_parse("RESEARCH_HEARTBEAT_SECONDS", 15),
            research_stream_include_usage: env::var("RESEARCH_STREAM_INCLUDE_USAGE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(true),

            event_bus_subscriber_buffer: env_parse("EVENT_BUS_SUBSCRIBER_BUFFER", 1024),
        }
    }

    /// Log whether each sensitive env var is set, without leaking its value.
    pub fn log_redacted(&self) {
        let vars = [
            ("LLM_API_KEY", &self.llm_api_key),
            ("EMBEDDING_API_KEY", &self.embedding_api_key),
        ];
        for (name, value) in vars {
            if value.is_empty() {
                tracing::info!("{name} = (empty)");
            } else {
                tracing::info!("{name} = ({} chars)", value.len());
            }
        }
    }
}

fn required_env(key: &str) -> String {
    env::var(key).unwrap_or_else(|_| panic!("{key} environment variable is required"))
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}
