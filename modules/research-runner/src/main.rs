//! End-to-end driver: scrape a list of URLs, summarize them, then run a
//! research session over the results and print the report path.

mod scraper_impl;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use research_common::types::{LinkKind, ScrapingTask};
use research_common::Config;
use research_events::EventBus;
use research_llm::{EmbeddingClient, EmbeddingModel, OpenAiClient, StreamingLlmClient};
use research_orchestrator::{OrchestratorConfig, ResearchOrchestrator};
use research_scraping::{ControlCenter, RegisteredScraperFactory, ResultPersister};
use research_summarize::SummarizationManager;
use scraper_impl::HttpScraper;

#[derive(Parser)]
#[command(name = "research-runner")]
#[command(about = "Scrapes a batch of links, summarizes them, and runs a research session")]
struct Cli {
    /// URLs to scrape as one batch.
    #[arg(required = true)]
    urls: Vec<String>,

    /// Guidance captured from the user before Phase 0.5.
    #[arg(long, default_value = "Find anything notable or unexpected.")]
    user_guidance: String,

    /// Overrides the generated batch id.
    #[arg(long)]
    batch_id: Option<String>,
}

/// Prints the prompt and choices, reads one line from stdin, and delivers
/// the pick back to the suspended orchestrator. An empty line picks the
/// first choice so the runner stays usable non-interactively.
async fn answer_prompt(bus: &EventBus, prompt_id: &str, prompt_text: &str, choices: Option<&[String]>) {
    println!("\n{prompt_text}");
    if let Some(choices) = choices {
        for (i, choice) in choices.iter().enumerate() {
            println!("  [{i}] {choice}");
        }
    }
    println!("Enter a number (default 0): ");

    let line = tokio::task::spawn_blocking(|| {
        let mut line = String::new();
        std::io::stdin().read_line(&mut line).ok();
        line
    })
    .await
    .unwrap_or_default();

    let selected = choices
        .and_then(|choices| line.trim().parse::<usize>().ok().and_then(|i| choices.get(i)))
        .or_else(|| choices.and_then(|c| c.first()))
        .cloned()
        .unwrap_or_default();

    let response = serde_json::json!({ "goal_text": selected }).to_string();
    if let Err(err) = bus.deliver_user_response(prompt_id, response) {
        tracing::warn!(error = %err, prompt_id, "failed to deliver user response");
    }
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env().add_directive("research=info".parse()?))
        .init();

    let cli = Cli::parse();
    let config = Config::from_env();
    config.log_redacted();

    let batch_id = cli.batch_id.unwrap_or_else(|| uuid::Uuid::new_v4().to_string());
    info!(batch_id = %batch_id, url_count = cli.urls.len(), "starting batch");

    let bus = EventBus::new(config.event_bus_subscriber_buffer);
    let mut batch_events = bus.subscribe(&batch_id);
    let bus_for_prompts = bus.clone();
    tokio::spawn(async move {
        while let Some(event) = batch_events.recv().await {
            if let research_common::event::EventPayload::UserInputRequired { prompt_id, prompt_text, choices } =
                &event.payload
            {
                answer_prompt(&bus_for_prompts, prompt_id, prompt_text, choices.as_deref()).await;
            } else {
                info!(?event, "event");
            }
        }
    });

    let factory = Arc::new(RegisteredScraperFactory::new(
        || Box::new(HttpScraper::new(LinkKind::VideoTranscript)),
        || Box::new(HttpScraper::new(LinkKind::ForumThread)),
        || Box::new(HttpScraper::new(LinkKind::Article)),
    ));
    let persister = Arc::new(ResultPersister::new(
        config.storage_root.clone(),
        config.scraping_persistence_retry_attempts,
    ));
    let control_center = Arc::new(ControlCenter::new(
        factory,
        persister,
        bus.clone(),
        config.scraping_worker_pool_size,
        config.scraping_queue_check_interval_ms,
    ));

    let tasks: Vec<ScrapingTask> = cli
        .urls
        .iter()
        .enumerate()
        .map(|(i, url)| {
            ScrapingTask::new(
                format!("task-{i}"),
                batch_id.clone(),
                format!("link-{i}"),
                url.clone(),
                LinkKind::Article,
            )
        })
        .collect();
    let expected_total = tasks.len() as u64;

    control_center.run_batch(&batch_id, tasks, expected_total).await;
    info!("scraping complete, race_count={}", control_center.race_count());

    let llm: Arc<dyn StreamingLlmClient> = Arc::new(OpenAiClient::new(config.llm_api_key.clone(), config.llm_base_url.clone()));
    let summarizer = SummarizationManager::new(
        bus.clone(),
        llm.clone(),
        config.llm_model.clone(),
        config.storage_root.clone(),
        config.summarization_worker_pool_size,
        config.summarization_settle_delay_ms,
    );
    summarizer.start_batch(&batch_id);
    summarizer
        .wait_for_completion(&batch_id, Duration::from_secs(60))
        .await
        .context("summarization did not reach quiescence")?;

    let embeddings: Arc<dyn EmbeddingClient> = Arc::new(EmbeddingModel {
        client: OpenAiClient::new(config.embedding_api_key.clone(), config.embedding_base_url.clone()),
        model: config.embedding_model.clone(),
    });
    let orchestrator = ResearchOrchestrator::new(
        bus.clone(),
        llm,
        embeddings,
        OrchestratorConfig {
            model: config.llm_model.clone(),
            window_size_chars: config.research_page_window_size_chars,
            novelty_threshold: config.research_novelty_threshold,
            heartbeat: Duration::from_secs(config.research_heartbeat_seconds),
            storage_root: config.storage_root.clone(),
        },
    );

    let session_id = uuid::Uuid::new_v4().to_string();
    let data_overview = format!("{} scraped links in batch {batch_id}", cli.urls.len());
    let report = orchestrator
        .run(&session_id, &batch_id, &data_overview, &cli.user_guidance)
        .await
        .context("research session failed")?;

    let report_path = research_common::paths::report_path(&config.storage_root, &session_id);
    info!(path = %report_path.display(), "research report written");
    println!("{}", report_path.display());
    println!("\n{report}");

    Ok(())
}
