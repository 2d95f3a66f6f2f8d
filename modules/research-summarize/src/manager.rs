//! Streaming Summarization Manager (C7): subscribes to the event bus for
//! `scrape_complete` events and turns each successful one into a
//! summarization job, run by a small worker pool.

use std::collections::{HashMap, HashSet, VecDeque};
use std::path::PathBuf;
use std::sync::{Arc, Mutex};
use std::time::{Duration, Instant};

use research_common::event::EventPayload;
use research_common::types::{Artifact, LinkKind, Summary};
use research_events::EventBus;
use research_llm::{Message, StreamOptions, StreamingLlmClient};
use tracing::warn;

use crate::error::SummarizeError;

/// A single summarization job: one `scrape_complete` artifact of one kind
/// for one link. A link with both a transcript-kind and a comments-kind
/// scrape produces two jobs, which are merged into one `Summary` file.
type JobKey = (String, LinkKind);

#[derive(Default)]
struct BatchQueues {
    in_queue: HashSet<JobKey>,
    in_progress: HashSet<JobKey>,
    cancelled: HashSet<String>,
    queue: VecDeque<JobKey>,
    busy_workers: usize,
    producer_done: bool,
}

pub struct SummarizationManager {
    bus: EventBus,
    llm: Arc<dyn StreamingLlmClient>,
    model: String,
    storage_root: PathBuf,
    pool_size: usize,
    settle_delay: Duration,
    poll_interval: Duration,
    state: Mutex<HashMap<String, BatchQueues>>,
    /// Guards the read-modify-write of a link's merged `Summary` file, so
    /// the transcript-kind and comments-kind jobs for the same link_id
    /// never clobber each other's half of the file.
    summary_locks: Mutex<HashMap<(String, String), Arc<tokio::sync::Mutex<()>>>>,
}

impl SummarizationManager {
    pub fn new(
        bus: EventBus,
        llm: Arc<dyn StreamingLlmClient>,
        model: impl Into<String>,
        storage_root: PathBuf,
        pool_size: usize,
        settle_delay_ms: u64,
    ) -> Arc<Self> {
        Arc::new(Self {
            bus,
            llm,
            model: model.into(),
            storage_root,
            pool_size: pool_size.max(1),
            settle_delay: Duration::from_millis(settle_delay_ms.max(200)),
            poll_interval: Duration::from_millis(20),
            state: Mutex::new(HashMap::new()),
            summary_locks: Mutex::new(HashMap::new()),
        })
    }

    /// Begin tracking `batch_id`: spawns the event subscriber and a fixed
    /// pool of workers, both running in the background. Call
    /// `wait_for_completion` to block until the batch's summarization work
    /// has drained.
    pub fn start_batch(self: &Arc<Self>, batch_id: &str) {
        self.state.lock().expect("summarize state lock poisoned").insert(batch_id.to_string(), BatchQueues::default());

        let manager = Arc::clone(self);
        let bid = batch_id.to_string();
        tokio::spawn(async move { manager.subscriber_loop(bid).await });

        for _ in 0..self.pool_size {
            let manager = Arc::clone(self);
            let bid = batch_id.to_string();
            tokio::spawn(async move { manager.worker_loop(bid).await });
        }
    }

    async fn subscriber_loop(self: Arc<Self>, batch_id: String) {
        let mut subscription = self.bus.subscribe(&batch_id);
        while let Some(event) = subscription.recv().await {
            match event.payload {
                EventPayload::ScrapeComplete { link_id, link_kind, success: true, .. } => {
                    self.enqueue(&batch_id, link_id, link_kind)
                }
                EventPayload::AllScrapingComplete { .. } => break,
                _ => {}
            }
        }
        if let Some(q) = self.state.lock().expect("summarize state lock poisoned").get_mut(&batch_id) {
            q.producer_done = true;
        }
    }

    /// The idempotent enqueue decision: skip if this `(link_id, kind)` job
    /// is already queued or in progress, skip if the link was cancelled,
    /// otherwise admit.
    fn enqueue(&self, batch_id: &str, link_id: String, kind: LinkKind) {
        let mut state = self.state.lock().expect("summarize state lock poisoned");
        let Some(q) = state.get_mut(batch_id) else { return };
        let key = (link_id.clone(), kind);
        if q.in_queue.contains(&key) || q.in_progress.contains(&key) || q.cancelled.contains(&link_id) {
            return;
        }
        q.in_queue.insert(key.clone());
        q.queue.push_back(key);
    }

    /// Abandon `link_id`'s summarization, whether it is queued, in
    /// progress, or not yet seen, across every kind outstanding for it — a
    /// later `scrape_complete` for the same id is still admitted fresh,
    /// since `cancelled` only suppresses the attempt that was already
    /// running.
    pub fn cancel_item(&self, batch_id: &str, link_id: &str) {
        let mut state = self.state.lock().expect("summarize state lock poisoned");
        if let Some(q) = state.get_mut(batch_id) {
            q.in_queue.retain(|(id, _)| id != link_id);
            q.in_progress.retain(|(id, _)| id != link_id);
            q.cancelled.insert(link_id.to_string());
        }
    }

    async fn worker_loop(self: Arc<Self>, batch_id: String) {
        loop {
            let (item, should_exit) = {
                let mut state = self.state.lock().expect("summarize state lock poisoned");
                let Some(q) = state.get_mut(&batch_id) else { return };
                if let Some(key) = q.queue.pop_front() {
                    q.in_queue.remove(&key);
                    q.in_progress.insert(key.clone());
                    q.busy_workers += 1;
                    (Some(key), false)
                } else {
                    (None, q.producer_done)
                }
            };

            match item {
                Some((link_id, kind)) => {
                    self.process_one(&batch_id, &link_id, kind).await;
                    let mut state = self.state.lock().expect("summarize state lock poisoned");
                    if let Some(q) = state.get_mut(&batch_id) {
                        q.in_progress.remove(&(link_id, kind));
                        q.busy_workers -= 1;
                    }
                }
                None => {
                    if should_exit {
                        break;
                    }
                    tokio::time::sleep(self.poll_interval).await;
                }
            }
        }
    }

    fn is_cancelled(&self, batch_id: &str, link_id: &str) -> bool {
        self.state
            .lock()
            .expect("summarize state lock poisoned")
            .get(batch_id)
            .map(|q| q.cancelled.contains(link_id))
            .unwrap_or(false)
    }

    /// The lock serializing reads and writes of `link_id`'s merged
    /// `Summary` file across the two kinds that can target it.
    fn summary_lock(&self, batch_id: &str, link_id: &str) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.summary_locks.lock().expect("summarize locks poisoned");
        locks
            .entry((batch_id.to_string(), link_id.to_string()))
            .or_insert_with(|| Arc::new(tokio::sync::Mutex::new(())))
            .clone()
    }

    async fn process_one(&self, batch_id: &str, link_id: &str, kind: LinkKind) {
        if self.is_cancelled(batch_id, link_id) {
            return;
        }

        let artifact_path = research_common::paths::artifact_path(&self.storage_root, batch_id, link_id, kind);
        let artifact: Artifact = match research_common::persist::verify_json_file(&artifact_path) {
            Ok(a) => a,
            Err(e) => {
                warn!(batch_id, link_id, %kind, error = %e, "failed to open artifact for summarization");
                self.publish_failure(batch_id, link_id, e.to_string());
                return;
            }
        };

        let messages = vec![
            Message::system("Summarize the following scraped content in one or two sentences."),
            Message::user(format!("Content: {}", artifact.content)),
        ];
        let stream = self.llm.stream(messages, StreamOptions::new(&self.model));
        let collected = research_llm::collect_text(stream).await;

        if self.is_cancelled(batch_id, link_id) {
            return;
        }

        match collected {
            Ok(text) => {
                if let Err(e) = self.merge_summary(batch_id, link_id, kind, text.text.trim().to_string()).await {
                    self.publish_failure(batch_id, link_id, e.to_string());
                    return;
                }
                self.bus.publish(
                    batch_id,
                    EventPayload::SummaryComplete {
                        link_id: link_id.to_string(),
                        success: true,
                        error: None,
                    },
                );
            }
            Err(e) => self.publish_failure(batch_id, link_id, e.to_string()),
        }
    }

    /// Read-modify-write `link_id`'s `Summary` file, filling in the field
    /// for `kind` without disturbing whatever the other kind already wrote.
    /// Comments-kind jobs fill `comments_summary`; every other kind is a
    /// transcript-shaped source and fills `transcript_summary`.
    async fn merge_summary(
        &self,
        batch_id: &str,
        link_id: &str,
        kind: LinkKind,
        text: String,
    ) -> Result<(), research_common::CoreError> {
        let lock = self.summary_lock(batch_id, link_id);
        let _guard = lock.lock().await;

        let summary_path = research_common::paths::summary_path(&self.storage_root, batch_id, link_id);
        let mut summary = research_common::persist::verify_json_file(&summary_path).unwrap_or(Summary {
            link_id: link_id.to_string(),
            transcript_summary: None,
            comments_summary: None,
        });

        match kind {
            LinkKind::VideoComments => summary.comments_summary = Some(text),
            _ => summary.transcript_summary = Some(text),
        }

        research_common::persist::atomic_write_json(&summary_path, &summary)
    }

    fn publish_failure(&self, batch_id: &str, link_id: &str, reason: String) {
        self.bus.publish(
            batch_id,
            EventPayload::SummaryComplete {
                link_id: link_id.to_string(),
                success: false,
                error: Some(reason),
            },
        );
    }

    /// The completion predicate: the queue is empty, every worker
    /// is genuinely idle between iterations, and that condition holds
    /// again after a brief settle delay.
    pub async fn wait_for_completion(&self, batch_id: &str, timeout: Duration) -> Result<(), SummarizeError> {
        let start = Instant::now();
        loop {
            if self.is_quiescent(batch_id) {
                tokio::time::sleep(self.settle_delay).await;
                if self.is_quiescent(batch_id) {
                    return Ok(());
                }
            }
            if start.elapsed() >= timeout {
                return Err(SummarizeError::PartialCompletion(format!(
                    "batch {batch_id} did not settle within {timeout:?}"
                )));
            }
            tokio::time::sleep(self.poll_interval).await;
        }
    }

    fn is_quiescent(&self, batch_id: &str) -> bool {
        self.state
            .lock()
            .expect("summarize state lock poisoned")
            .get(batch_id)
            .map(|q| q.queue.is_empty() && q.busy_workers == 0)
            .unwrap_or(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use research_common::types::{ArtifactMetadata, LinkKind};
    use research_llm::fakes::FakeLlmClient;

    fn write_artifact(root: &std::path::Path, batch_id: &str, link_id: &str, kind: LinkKind) {
        let artifact = Artifact {
            link_id: link_id.to_string(),
            link_kind: kind,
            url: "https://example.com".into(),
            content: serde_json::json!({"body": "some scraped text"}),
            metadata: ArtifactMetadata {
                source: "test".into(),
                extracted_at: Utc::now(),
                word_count: 4,
                language: None,
            },
        };
        let path = research_common::paths::artifact_path(root, batch_id, link_id, kind);
        research_common::persist::atomic_write_json(&path, &artifact).unwrap();
    }

    #[tokio::test]
    async fn scrape_complete_events_drive_summarization_to_a_written_file() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "b1", "l1", LinkKind::Article);

        let bus = EventBus::new(64);
        let llm: Arc<dyn StreamingLlmClient> = Arc::new(FakeLlmClient::text("a short summary"));
        let manager = SummarizationManager::new(bus.clone(), llm, "test-model", dir.path().to_path_buf(), 2, 200);

        manager.start_batch("b1");
        bus.publish(
            "b1",
            EventPayload::ScrapeComplete {
                link_id: "l1".into(),
                link_kind: LinkKind::Article,
                success: true,
                error: None,
                artifact_path: None,
            },
        );
        bus.publish(
            "b1",
            EventPayload::AllScrapingComplete {
                completion_rate: 1.0,
                registered: 1,
                expected_total: 1,
            },
        );

        manager.wait_for_completion("b1", Duration::from_secs(2)).await.unwrap();

        let summary_path = research_common::paths::summary_path(dir.path(), "b1", "l1");
        let summary: Summary = research_common::persist::verify_json_file(&summary_path).unwrap();
        assert_eq!(summary.transcript_summary.as_deref(), Some("a short summary"));
    }

    #[tokio::test]
    async fn video_transcript_and_comments_kinds_merge_into_one_summary() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "b1", "l1", LinkKind::VideoTranscript);
        write_artifact(dir.path(), "b1", "l1", LinkKind::VideoComments);

        let bus = EventBus::new(64);
        let llm: Arc<dyn StreamingLlmClient> = Arc::new(FakeLlmClient::text("summarized text"));
        let manager = SummarizationManager::new(bus.clone(), llm, "test-model", dir.path().to_path_buf(), 2, 200);

        manager.start_batch("b1");
        bus.publish(
            "b1",
            EventPayload::ScrapeComplete {
                link_id: "l1".into(),
                link_kind: LinkKind::VideoTranscript,
                success: true,
                error: None,
                artifact_path: None,
            },
        );
        bus.publish(
            "b1",
            EventPayload::ScrapeComplete {
                link_id: "l1".into(),
                link_kind: LinkKind::VideoComments,
                success: true,
                error: None,
                artifact_path: None,
            },
        );
        bus.publish(
            "b1",
            EventPayload::AllScrapingComplete {
                completion_rate: 1.0,
                registered: 2,
                expected_total: 2,
            },
        );

        manager.wait_for_completion("b1", Duration::from_secs(2)).await.unwrap();

        let summary_path = research_common::paths::summary_path(dir.path(), "b1", "l1");
        let summary: Summary = research_common::persist::verify_json_file(&summary_path).unwrap();
        assert_eq!(summary.transcript_summary.as_deref(), Some("summarized text"));
        assert_eq!(summary.comments_summary.as_deref(), Some("summarized text"));
    }

    #[tokio::test]
    async fn duplicate_scrape_complete_events_are_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "b1", "l1", LinkKind::Article);

        let bus = EventBus::new(64);
        let llm: Arc<dyn StreamingLlmClient> = Arc::new(FakeLlmClient::text("x"));
        let manager = SummarizationManager::new(bus.clone(), llm, "test-model", dir.path().to_path_buf(), 1, 200);

        manager.start_batch("b1");
        for _ in 0..3 {
            bus.publish(
                "b1",
                EventPayload::ScrapeComplete {
                    link_id: "l1".into(),
                    link_kind: LinkKind::Article,
                    success: true,
                    error: None,
                    artifact_path: None,
                },
            );
        }
        bus.publish(
            "b1",
            EventPayload::AllScrapingComplete {
                completion_rate: 1.0,
                registered: 1,
                expected_total: 1,
            },
        );

        manager.wait_for_completion("b1", Duration::from_secs(2)).await.unwrap();
        // No panics/double-writes; a single summary file with the expected content is enough
        // evidence the second and third scrape_complete events were no-ops.
        let summary_path = research_common::paths::summary_path(dir.path(), "b1", "l1");
        assert!(summary_path.exists());
    }

    #[tokio::test]
    async fn wait_for_completion_times_out_on_stalled_batch() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(64);
        let llm: Arc<dyn StreamingLlmClient> = Arc::new(FakeLlmClient::text("x"));
        let manager = SummarizationManager::new(bus.clone(), llm, "test-model", dir.path().to_path_buf(), 1, 200);

        manager.start_batch("b1");
        // No scrape_complete, no all_scraping_complete: producer never finishes.
        let err = manager.wait_for_completion("b1", Duration::from_millis(100)).await.unwrap_err();
        assert!(matches!(err, SummarizeError::PartialCompletion(_)));
    }

    #[tokio::test]
    async fn cancel_item_prevents_a_pending_job_from_running() {
        let dir = tempfile::tempdir().unwrap();
        write_artifact(dir.path(), "b1", "l1", LinkKind::Article);

        let bus = EventBus::new(64);
        let llm: Arc<dyn StreamingLlmClient> = Arc::new(FakeLlmClient::text("should not appear"));
        let manager = SummarizationManager::new(bus.clone(), llm, "test-model", dir.path().to_path_buf(), 1, 200);

        manager.start_batch("b1");
        bus.publish(
            "b1",
            EventPayload::ScrapeComplete {
                link_id: "l1".into(),
                link_kind: LinkKind::Article,
                success: true,
                error: None,
                artifact_path: None,
            },
        );
        manager.cancel_item("b1", "l1");
        bus.publish(
            "b1",
            EventPayload::AllScrapingComplete {
                completion_rate: 1.0,
                registered: 1,
                expected_total: 1,
            },
        );

        manager.wait_for_completion("b1", Duration::from_secs(2)).await.unwrap();
        let summary_path = research_common::paths::summary_path(dir.path(), "b1", "l1");
        assert!(!summary_path.exists());
    }
}
