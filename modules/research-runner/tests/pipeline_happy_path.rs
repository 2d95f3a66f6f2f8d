//! Full scrape -> summarize -> research pipeline, wired the same way
//! `main.rs` wires it but with fake scrapers and a scripted LLM standing in
//! for `HttpScraper`/`OpenAiClient`.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex as StdMutex};
use std::time::Duration;

use research_common::event::EventPayload;
use research_common::types::{LinkKind, ScrapingTask};
use research_events::EventBus;
use research_llm::fakes::{FakeEmbeddingClient, FakeLlmClient};
use research_llm::{EmbeddingClient, Message, StreamOptions, StreamingLlmClient};
use research_orchestrator::{OrchestratorConfig, ResearchOrchestrator};
use research_scraping::scraper::fakes::FakeScraper;
use research_scraping::{ControlCenter, RegisteredScraperFactory, ResultPersister};
use research_summarize::SummarizationManager;

/// Replays a fixed sequence of responses, one per `stream()` call.
struct ScriptedLlm {
    calls: StdMutex<VecDeque<FakeLlmClient>>,
}

impl ScriptedLlm {
    fn new(scripts: Vec<FakeLlmClient>) -> Self {
        Self { calls: StdMutex::new(scripts.into()) }
    }
}

impl StreamingLlmClient for ScriptedLlm {
    fn stream(&self, messages: Vec<Message>, options: StreamOptions) -> research_llm::ChunkStream {
        let next = self.calls.lock().unwrap().pop_front().expect("no more scripted calls");
        next.stream(messages, options)
    }
}

#[tokio::test]
async fn a_small_batch_flows_end_to_end_to_a_written_report() {
    let dir = tempfile::tempdir().unwrap();
    let batch_id = "batch-1";

    let bus = EventBus::new(128);
    let mut batch_events = bus.subscribe(batch_id);
    let bus_for_prompts = bus.clone();
    tokio::spawn(async move {
        while let Some(event) = batch_events.recv().await {
            if let EventPayload::UserInputRequired { prompt_id, .. } = event.payload {
                let _ = bus_for_prompts.deliver_user_response(
                    &prompt_id,
                    serde_json::json!({"goal_text": "understand what shipped"}).to_string(),
                );
            }
        }
    });

    let factory = Arc::new(RegisteredScraperFactory::new(
        || Box::new(FakeScraper::new("video", LinkKind::VideoTranscript)),
        || Box::new(FakeScraper::new("forum", LinkKind::ForumThread)),
        || Box::new(FakeScraper::new("article", LinkKind::Article)),
    ));
    let persister = Arc::new(ResultPersister::new(dir.path().to_path_buf(), 2));
    let control_center = Arc::new(ControlCenter::new(factory, persister, bus.clone(), 4, 5));

    // One article (link-0) and a video (link-1) scraped as two kinds that
    // later merge into a single summary.
    let tasks = vec![
        ScrapingTask::new("task-0", batch_id, "link-0", "https://example.com/0", LinkKind::Article),
        ScrapingTask::new("task-1", batch_id, "link-1", "https://example.com/1", LinkKind::VideoTranscript),
        ScrapingTask::new("task-2", batch_id, "link-1", "https://example.com/1", LinkKind::VideoComments),
    ];

    let mut scrape_events = bus.subscribe(batch_id);
    control_center.run_batch(batch_id, tasks, 3).await;

    let mut scrape_complete_count = 0;
    let mut all_complete = None;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), scrape_events.recv()).await {
        match event.payload {
            EventPayload::ScrapeComplete { success: true, .. } => scrape_complete_count += 1,
            EventPayload::AllScrapingComplete { completion_rate, registered, expected_total } => {
                all_complete = Some((completion_rate, registered, expected_total));
            }
            _ => {}
        }
    }
    assert_eq!(scrape_complete_count, 3, "all three scrape tasks succeed");
    assert_eq!(all_complete, Some((1.0, 3, 3)));

    let summarizer_llm: Arc<dyn StreamingLlmClient> = Arc::new(FakeLlmClient::text("a one-sentence summary"));
    let summarizer = SummarizationManager::new(bus.clone(), summarizer_llm, "test-model", dir.path().to_path_buf(), 2, 200);

    let mut summary_events = bus.subscribe(batch_id);
    summarizer.start_batch(batch_id);
    summarizer.wait_for_completion(batch_id, Duration::from_secs(5)).await.unwrap();

    let mut summary_complete_count = 0;
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), summary_events.recv()).await {
        if matches!(event.payload, EventPayload::SummaryComplete { success: true, .. }) {
            summary_complete_count += 1;
        }
    }
    assert_eq!(summary_complete_count, 3, "one summarize job per (link_id, kind) pair");

    let link0_summary = research_common::paths::summary_path(dir.path(), batch_id, "link-0");
    let link1_summary = research_common::paths::summary_path(dir.path(), batch_id, "link-1");
    assert!(link0_summary.exists());
    assert!(link1_summary.exists());
    let merged: research_common::types::Summary = research_common::persist::verify_json_file(&link1_summary).unwrap();
    assert!(merged.transcript_summary.is_some(), "the video-transcript job filled its half");
    assert!(merged.comments_summary.is_some(), "the video-comments job filled its half");

    let goals = serde_json::json!({"goals": [
        {"goal_text": "understand what shipped", "rationale": "r", "feasibility": "high"}
    ]});
    let plan = serde_json::json!({"steps": [
        {"step_id": 1, "goal": "review what shipped", "required_data": "launch notes", "notes": null}
    ]});
    let step_output = serde_json::json!({
        "summary": "a feature launched", "points_of_interest": ["mechanic A"],
        "analysis_details": "details", "article": null, "insights": "insight",
        "confidence": 0.75, "sources": ["link-0", "link-1"]
    });
    let research_llm_client = Arc::new(ScriptedLlm::new(vec![
        FakeLlmClient::text("a pragmatic product analyst"),
        FakeLlmClient::json(&goals),
        FakeLlmClient::json(&plan),
        FakeLlmClient::json(&step_output),
        FakeLlmClient::text("# Report\n\nShipped. [EVID-01]\n\n## Evidence\n[EVID-01]: link-0"),
    ])) as Arc<dyn StreamingLlmClient>;
    let embeddings: Arc<dyn EmbeddingClient> = Arc::new(FakeEmbeddingClient::new(16));

    let orchestrator = ResearchOrchestrator::new(
        bus.clone(),
        research_llm_client,
        embeddings,
        OrchestratorConfig {
            model: "test-model".to_string(),
            window_size_chars: 20_000,
            novelty_threshold: 0.85,
            heartbeat: Duration::from_secs(60),
            storage_root: dir.path().to_path_buf(),
        },
    );

    let mut phase_events = bus.subscribe(batch_id);
    let session_id = "session-1";
    let report = orchestrator
        .run(session_id, batch_id, "2 scraped links in batch-1", "find anything notable")
        .await
        .unwrap();
    assert!(report.contains("Report"));

    let report_path = research_common::paths::report_path(dir.path(), session_id);
    assert!(report_path.exists(), "the report file is written to the expected location");
    let on_disk = std::fs::read_to_string(&report_path).unwrap();
    assert_eq!(on_disk, report);

    let mut entering = Vec::new();
    let mut exiting = Vec::new();
    while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), phase_events.recv()).await {
        if let EventPayload::ResearchPhaseChange { phase, entering: is_entering, .. } = event.payload {
            if is_entering {
                entering.push(phase);
            } else {
                exiting.push(phase);
            }
        }
    }
    for phase in ["0.5", "1", "2", "3", "4"] {
        assert!(entering.contains(&phase.to_string()), "phase {phase} should have an entering event");
        assert!(exiting.contains(&phase.to_string()), "phase {phase} should have an exiting event");
    }
}
