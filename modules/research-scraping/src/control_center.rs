//! Scraping Control Center (C5): owns a fixed pool of workers and the
//! single assignment lock that is the sole correctness guarantee against
//! simultaneous worker-completion races.

use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use research_common::event::EventPayload;
use research_common::types::{ScrapingTask, TaskStatus, WorkerState, WorkerStats};
use research_events::EventBus;
use tracing::{info, warn};

use crate::persister::ResultPersister;
use crate::queue::TaskQueue;
use crate::scraper::ScraperFactory;
use crate::state_tracker::TaskStateTracker;

/// Per-batch bookkeeping that outlives any single worker: the declared
/// size, whether a cancellation was requested, and whether
/// `all_scraping_complete` has already fired (it must fire exactly once).
struct BatchMeta {
    expected_total: u64,
    cancelled: bool,
    confirmed: bool,
}

enum AssignmentOutcome {
    Assigned(ScrapingTask),
    NoAssignment,
}

pub struct ControlCenter {
    tracker: Arc<TaskStateTracker>,
    queue: Arc<TaskQueue>,
    factory: Arc<dyn ScraperFactory>,
    persister: Arc<ResultPersister>,
    bus: EventBus,
    assignment_lock: Mutex<()>,
    workers: Mutex<HashMap<String, WorkerStats>>,
    batches: Mutex<HashMap<String, BatchMeta>>,
    race_counter: AtomicU64,
    pool_size: usize,
    queue_check_interval: Duration,
}

impl ControlCenter {
    pub fn new(
        factory: Arc<dyn ScraperFactory>,
        persister: Arc<ResultPersister>,
        bus: EventBus,
        pool_size: usize,
        queue_check_interval_ms: u64,
    ) -> Self {
        Self {
            tracker: Arc::new(TaskStateTracker::new()),
            queue: Arc::new(TaskQueue::new()),
            factory,
            persister,
            bus,
            assignment_lock: Mutex::new(()),
            workers: Mutex::new(HashMap::new()),
            batches: Mutex::new(HashMap::new()),
            race_counter: AtomicU64::new(0),
            pool_size: pool_size.max(1),
            queue_check_interval: Duration::from_millis(queue_check_interval_ms.max(1)),
        }
    }

    pub fn tracker(&self) -> &TaskStateTracker {
        &self.tracker
    }

    pub fn race_count(&self) -> u64 {
        self.race_counter.load(Ordering::SeqCst)
    }

    /// Register every task of a batch, enqueue the Pending ones (C3's
    /// policy: only Pending ids ever enter the queue), and spawn a fixed
    /// pool of workers to drain it. Resolves once `confirm_all_complete`
    /// holds or the batch is cancelled and all in-flight tasks finish.
    pub async fn run_batch(
        self: &Arc<Self>,
        batch_id: &str,
        tasks: Vec<ScrapingTask>,
        expected_total: u64,
    ) {
        self.batches.lock().expect("batch meta lock poisoned").insert(
            batch_id.to_string(),
            BatchMeta {
                expected_total,
                cancelled: false,
                confirmed: false,
            },
        );

        for task in tasks {
            let task_id = task.task_id.clone();
            let status = task.status;
            if self.tracker.register(task).is_ok() && status == TaskStatus::Pending {
                self.queue.enqueue(task_id);
            }
        }

        let mut handles = Vec::with_capacity(self.pool_size);
        for i in 0..self.pool_size {
            let worker_id = format!("{batch_id}-worker-{i}");
            self.workers.lock().expect("worker map lock poisoned").insert(
                worker_id.clone(),
                WorkerStats {
                    worker_id: worker_id.clone(),
                    state: WorkerState::Idle,
                    current_task: None,
                    tasks_completed: 0,
                    tasks_failed: 0,
                },
            );
            let center = Arc::clone(self);
            let batch_id = batch_id.to_string();
            handles.push(tokio::spawn(async move {
                center.run_worker_with_restart(batch_id, worker_id).await;
            }));
        }

        for handle in handles {
            if let Err(e) = handle.await {
                warn!(error = %e, "scraping worker restart loop itself panicked");
            }
        }

        self.try_confirm_complete(batch_id);
    }

    /// Runs `worker_loop` for `worker_id`, and if it panics, spawns a fresh
    /// instance in its place so the pool never runs the rest of the batch
    /// short a worker. Returns once a `worker_loop` run exits normally.
    async fn run_worker_with_restart(self: Arc<Self>, batch_id: String, worker_id: String) {
        loop {
            let center = Arc::clone(&self);
            let bid = batch_id.clone();
            let wid = worker_id.clone();
            match tokio::spawn(async move { center.worker_loop(bid, wid).await }).await {
                Ok(()) => return,
                Err(e) => {
                    warn!(error = %e, worker_id, "scraping worker panicked; replacing it");
                }
            }
        }
    }

    /// Sets the batch-wide cancel flag. Pending tasks are moved to
    /// Cancelled immediately; Processing tasks are allowed to finish.
    pub fn cancel(&self, batch_id: &str) {
        if let Some(meta) = self.batches.lock().expect("batch meta lock poisoned").get_mut(batch_id) {
            meta.cancelled = true;
        }
        let cancelled = self.tracker.cancel_pending(batch_id);
        info!(batch_id, count = cancelled.len(), "cancelled pending scraping tasks");
    }

    fn is_cancelled(&self, batch_id: &str) -> bool {
        self.batches
            .lock()
            .expect("batch meta lock poisoned")
            .get(batch_id)
            .map(|m| m.cancelled)
            .unwrap_or(false)
    }

    async fn worker_loop(self: Arc<Self>, batch_id: String, worker_id: String) {
        loop {
            if self.is_cancelled(&batch_id) && self.queue.is_empty() {
                break;
            }
            match self.assign_one(&worker_id) {
                AssignmentOutcome::Assigned(task) => {
                    self.run_task(&batch_id, &worker_id, task).await;
                    self.try_confirm_complete(&batch_id);
                }
                AssignmentOutcome::NoAssignment => {
                    if self.queue.is_empty() && self.no_tasks_in_progress(&batch_id) {
                        break;
                    }
                    tokio::time::sleep(self.queue_check_interval).await;
                }
            }
        }
        self.set_worker_state(&worker_id, WorkerState::Terminated, None);
    }

    fn no_tasks_in_progress(&self, batch_id: &str) -> bool {
        self.tracker
            .list_by_batch(batch_id)
            .iter()
            .all(|t| t.status != TaskStatus::Processing)
    }

    /// The assignment algorithm: at most one caller runs this body
    /// at a time, guaranteed by `assignment_lock`. Bounded retries drain
    /// stale or raced entries without looping forever on a queue that only
    /// ever yields bad ids.
    fn assign_one(&self, worker_id: &str) -> AssignmentOutcome {
        let _guard = self.assignment_lock.lock().expect("assignment lock poisoned");

        {
            let workers = self.workers.lock().expect("worker map lock poisoned");
            if workers.get(worker_id).map(|w| w.state) != Some(WorkerState::Idle) {
                return AssignmentOutcome::NoAssignment;
            }
        }

        const MAX_RETRIES: usize = 10_000;
        for _ in 0..MAX_RETRIES {
            let task_id = match self.queue.dequeue() {
                Some(id) => id,
                None => return AssignmentOutcome::NoAssignment,
            };

            let task = match self.tracker.get(&task_id) {
                Some(t) => t,
                None => continue,
            };
            if task.status != TaskStatus::Pending {
                continue;
            }

            let worker_id_owned = worker_id.to_string();
            match self.tracker.transition(
                &task_id,
                TaskStatus::Pending,
                TaskStatus::Processing,
                move |t| {
                    t.assigned_worker_id = Some(worker_id_owned.clone());
                    t.started_at = Some(Utc::now());
                },
            ) {
                Ok(task) => {
                    self.set_worker_state(worker_id, WorkerState::Processing, Some(task.task_id.clone()));
                    return AssignmentOutcome::Assigned(task);
                }
                Err(_) => {
                    self.race_counter.fetch_add(1, Ordering::SeqCst);
                    continue;
                }
            }
        }
        AssignmentOutcome::NoAssignment
    }

    async fn run_task(&self, batch_id: &str, worker_id: &str, task: ScrapingTask) {
        let scraper = match self.factory.build(task.scraper_kind) {
            Ok(s) => s,
            Err(e) => {
                self.finish_failed(batch_id, worker_id, &task, e.to_string());
                return;
            }
        };

        if !scraper.validate_url(&task.url) {
            self.finish_failed(batch_id, worker_id, &task, format!("invalid url for {}: {}", scraper.name(), task.url));
            return;
        }

        let outcome = scraper.extract(&task.url, &task.link_id).await;
        scraper.close().await;

        match outcome {
            Ok(artifact) => match self.persister.persist(batch_id, &artifact).await {
                Ok(path) => {
                    let path_str = path.to_string_lossy().to_string();
                    let result = artifact.content.clone();
                    let _ = self.tracker.transition(
                        &task.task_id,
                        TaskStatus::Processing,
                        TaskStatus::Completed,
                        {
                            let path_str = path_str.clone();
                            move |t| {
                                t.completed_at = Some(Utc::now());
                                t.artifact_path = Some(path_str.clone());
                                t.result = Some(result.clone());
                            }
                        },
                    );
                    self.bus.publish(
                        batch_id,
                        EventPayload::ScrapeComplete {
                            link_id: task.link_id.clone(),
                            link_kind: task.link_kind,
                            success: true,
                            error: None,
                            artifact_path: Some(path_str),
                        },
                    );
                    self.bump_worker_outcome(worker_id, true);
                }
                Err(e) => self.finish_failed(batch_id, worker_id, &task, e.to_string()),
            },
            Err(e) => self.finish_failed(batch_id, worker_id, &task, e.to_string()),
        }

        self.set_worker_state(worker_id, WorkerState::Idle, None);
    }

    fn finish_failed(&self, batch_id: &str, worker_id: &str, task: &ScrapingTask, reason: String) {
        let reason_for_task = reason.clone();
        let _ = self.tracker.transition(
            &task.task_id,
            TaskStatus::Processing,
            TaskStatus::Failed,
            move |t| {
                t.completed_at = Some(Utc::now());
                t.error = Some(reason_for_task.clone());
            },
        );
        self.bus.publish(
            batch_id,
            EventPayload::ScrapeComplete {
                link_id: task.link_id.clone(),
                link_kind: task.link_kind,
                success: false,
                error: Some(reason),
                artifact_path: None,
            },
        );
        self.bump_worker_outcome(worker_id, false);
    }

    fn bump_worker_outcome(&self, worker_id: &str, success: bool) {
        if let Some(w) = self.workers.lock().expect("worker map lock poisoned").get_mut(worker_id) {
            if success {
                w.tasks_completed += 1;
            } else {
                w.tasks_failed += 1;
            }
        }
    }

    fn set_worker_state(&self, worker_id: &str, state: WorkerState, current_task: Option<String>) {
        if let Some(w) = self.workers.lock().expect("worker map lock poisoned").get_mut(worker_id) {
            w.state = state;
            w.current_task = current_task;
        }
    }

    /// Confirms batch completion and publishes `all_scraping_complete`
    /// exactly once per batch.
    fn try_confirm_complete(&self, batch_id: &str) -> bool {
        let expected_total = match self.batches.lock().expect("batch meta lock poisoned").get(batch_id) {
            Some(meta) if !meta.confirmed => meta.expected_total,
            _ => return false,
        };

        let progress = self.tracker.statistics(batch_id, expected_total);
        if !progress.is_complete {
            return false;
        }

        let mut batches = self.batches.lock().expect("batch meta lock poisoned");
        let meta = match batches.get_mut(batch_id) {
            Some(m) if !m.confirmed => m,
            _ => return false,
        };
        meta.confirmed = true;
        drop(batches);

        self.bus.publish(
            batch_id,
            EventPayload::AllScrapingComplete {
                completion_rate: progress.completion_rate,
                registered: progress.registered_count,
                expected_total: progress.expected_total,
            },
        );
        true
    }

    pub fn worker_snapshot(&self) -> Vec<WorkerStats> {
        self.workers.lock().expect("worker map lock poisoned").values().cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scraper::fakes::{FailingScraper, FakeScraper, RejectingScraper};
    use crate::scraper::{PageScraper, RegisteredScraperFactory};
    use research_common::types::LinkKind;
    use std::sync::atomic::AtomicUsize;

    fn task(id: &str, batch: &str, kind: LinkKind) -> ScrapingTask {
        ScrapingTask::new(id, batch, format!("{id}-link"), format!("https://example.com/{id}"), kind)
    }

    fn always_succeeding_factory() -> Arc<dyn ScraperFactory> {
        Arc::new(RegisteredScraperFactory::new(
            || Box::new(FakeScraper::new("video", LinkKind::VideoTranscript)) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("forum", LinkKind::ForumThread)) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("article", LinkKind::Article)) as Box<dyn PageScraper>,
        ))
    }

    #[tokio::test]
    async fn batch_of_tasks_all_complete_and_fire_completion_event() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(64);
        let mut sub = bus.subscribe("b1");
        let center = Arc::new(ControlCenter::new(
            always_succeeding_factory(),
            Arc::new(ResultPersister::new(dir.path().to_path_buf(), 3)),
            bus,
            4,
            5,
        ));

        let tasks: Vec<_> = (0..10).map(|i| task(&format!("t{i}"), "b1", LinkKind::Article)).collect();
        center.run_batch("b1", tasks, 10).await;

        let stats = center.tracker().statistics("b1", 10);
        assert_eq!(stats.completed, 10);
        assert!(stats.is_complete);

        let mut saw_all_complete = false;
        while let Ok(Some(event)) = tokio::time::timeout(Duration::from_millis(200), sub.recv()).await {
            if matches!(event.payload, EventPayload::AllScrapingComplete { .. }) {
                saw_all_complete = true;
            }
        }
        assert!(saw_all_complete);
    }

    #[tokio::test]
    async fn failing_scraper_marks_task_failed_without_stalling_batch() {
        let dir = tempfile::tempdir().unwrap();
        let factory: Arc<dyn ScraperFactory> = Arc::new(RegisteredScraperFactory::new(
            || Box::new(FailingScraper { reason: "boom".into() }) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("forum", LinkKind::ForumThread)) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("article", LinkKind::Article)) as Box<dyn PageScraper>,
        ));
        let bus = EventBus::new(64);
        let center = Arc::new(ControlCenter::new(
            factory,
            Arc::new(ResultPersister::new(dir.path().to_path_buf(), 2)),
            bus,
            2,
            5,
        ));

        let tasks = vec![task("t0", "b1", LinkKind::VideoTranscript), task("t1", "b1", LinkKind::Article)];
        center.run_batch("b1", tasks, 2).await;

        let stats = center.tracker().statistics("b1", 2);
        assert_eq!(stats.failed, 1);
        assert_eq!(stats.completed, 1);
        assert!(stats.is_complete);
    }

    #[tokio::test]
    async fn concurrent_workers_never_double_assign_a_task() {
        // Eight workers racing against a small task list must never both
        // transition the same task id: the assignment lock serializes it.
        let dir = tempfile::tempdir().unwrap();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_for_factory = Arc::clone(&calls);
        struct CountingScraper(Arc<AtomicUsize>);
        #[async_trait::async_trait]
        impl PageScraper for CountingScraper {
            fn name(&self) -> &'static str {
                "counting"
            }
            async fn extract(
                &self,
                url: &str,
                link_id: &str,
            ) -> Result<research_common::types::Artifact, crate::error::ScrapingError> {
                self.0.fetch_add(1, Ordering::SeqCst);
                tokio::time::sleep(Duration::from_millis(1)).await;
                Ok(research_common::types::Artifact {
                    link_id: link_id.to_string(),
                    link_kind: LinkKind::Article,
                    url: url.to_string(),
                    content: serde_json::json!({}),
                    metadata: research_common::types::ArtifactMetadata {
                        source: "counting".into(),
                        extracted_at: Utc::now(),
                        word_count: 0,
                        language: None,
                    },
                })
            }
        }
        let factory: Arc<dyn ScraperFactory> = Arc::new(RegisteredScraperFactory::new(
            move || Box::new(CountingScraper(Arc::clone(&calls_for_factory))) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("forum", LinkKind::ForumThread)) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("article", LinkKind::Article)) as Box<dyn PageScraper>,
        ));
        let bus = EventBus::new(64);
        let center = Arc::new(ControlCenter::new(
            factory,
            Arc::new(ResultPersister::new(dir.path().to_path_buf(), 2)),
            bus,
            8,
            2,
        ));

        let tasks: Vec<_> = (0..30).map(|i| task(&format!("t{i}"), "b1", LinkKind::VideoTranscript)).collect();
        center.run_batch("b1", tasks, 30).await;

        assert_eq!(calls.load(Ordering::SeqCst), 30);
        let stats = center.tracker().statistics("b1", 30);
        assert_eq!(stats.completed, 30);
    }

    #[tokio::test]
    async fn panicking_worker_is_replaced_so_the_rest_of_the_batch_keeps_going() {
        // Pool of one: if a worker dies with the batch unfinished and is
        // never replaced, every remaining task starves forever. t0's
        // extract panics exactly once; t1 must still get picked up by the
        // replacement worker.
        let dir = tempfile::tempdir().unwrap();
        let panicked_once = Arc::new(std::sync::atomic::AtomicBool::new(false));
        let panicked_once_for_factory = Arc::clone(&panicked_once);

        struct PanicOnceScraper(Arc<std::sync::atomic::AtomicBool>);
        #[async_trait::async_trait]
        impl PageScraper for PanicOnceScraper {
            fn name(&self) -> &'static str {
                "panic-once"
            }
            async fn extract(
                &self,
                url: &str,
                link_id: &str,
            ) -> Result<research_common::types::Artifact, crate::error::ScrapingError> {
                if !self.0.swap(true, Ordering::SeqCst) {
                    panic!("simulated worker crash");
                }
                Ok(research_common::types::Artifact {
                    link_id: link_id.to_string(),
                    link_kind: LinkKind::Article,
                    url: url.to_string(),
                    content: serde_json::json!({}),
                    metadata: research_common::types::ArtifactMetadata {
                        source: "panic-once".into(),
                        extracted_at: Utc::now(),
                        word_count: 0,
                        language: None,
                    },
                })
            }
        }

        let factory: Arc<dyn ScraperFactory> = Arc::new(RegisteredScraperFactory::new(
            move || Box::new(PanicOnceScraper(Arc::clone(&panicked_once_for_factory))) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("forum", LinkKind::ForumThread)) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("article", LinkKind::Article)) as Box<dyn PageScraper>,
        ));
        let bus = EventBus::new(64);
        let center = Arc::new(ControlCenter::new(
            factory,
            Arc::new(ResultPersister::new(dir.path().to_path_buf(), 2)),
            bus,
            1,
            2,
        ));

        let tasks = vec![task("t0", "b1", LinkKind::VideoTranscript), task("t1", "b1", LinkKind::VideoTranscript)];
        let center_for_run = Arc::clone(&center);
        tokio::spawn(async move {
            center_for_run.run_batch("b1", tasks, 2).await;
        });

        // t0 never resolves past Processing since its panic unwinds before
        // the tracker transition runs; only t1's completion proves the
        // single-worker pool was replenished rather than left at zero.
        let deadline = tokio::time::Instant::now() + Duration::from_secs(2);
        loop {
            if center.tracker().get("t1").map(|t| t.status) == Some(TaskStatus::Completed) {
                break;
            }
            assert!(
                tokio::time::Instant::now() < deadline,
                "t1 never completed; the worker pool was not replenished after the panic"
            );
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    }

    #[tokio::test]
    async fn invalid_url_fails_the_task_without_ever_calling_extract() {
        let dir = tempfile::tempdir().unwrap();
        let rejecting = Arc::new(RejectingScraper::new());
        let extract_calls = Arc::clone(&rejecting.extract_calls);
        let factory: Arc<dyn ScraperFactory> = Arc::new(RegisteredScraperFactory::new(
            {
                let extract_calls = Arc::clone(&extract_calls);
                move || Box::new(RejectingScraper { extract_calls: Arc::clone(&extract_calls) }) as Box<dyn PageScraper>
            },
            || Box::new(FakeScraper::new("forum", LinkKind::ForumThread)) as Box<dyn PageScraper>,
            || Box::new(FakeScraper::new("article", LinkKind::Article)) as Box<dyn PageScraper>,
        ));
        let bus = EventBus::new(64);
        let center = Arc::new(ControlCenter::new(
            factory,
            Arc::new(ResultPersister::new(dir.path().to_path_buf(), 2)),
            bus,
            1,
            2,
        ));

        let tasks = vec![task("t0", "b1", LinkKind::VideoTranscript)];
        center.run_batch("b1", tasks, 1).await;

        assert_eq!(extract_calls.load(Ordering::SeqCst), 0);
        let stats = center.tracker().statistics("b1", 1);
        assert_eq!(stats.failed, 1);
    }

    #[tokio::test]
    async fn cancel_moves_pending_tasks_to_cancelled() {
        let dir = tempfile::tempdir().unwrap();
        let bus = EventBus::new(64);
        let center = Arc::new(ControlCenter::new(
            always_succeeding_factory(),
            Arc::new(ResultPersister::new(dir.path().to_path_buf(), 2)),
            bus,
            1,
            5,
        ));

        // Register without running workers, so everything stays Pending.
        center.batches.lock().unwrap().insert(
            "b1".to_string(),
            BatchMeta {
                expected_total: 3,
                cancelled: false,
                confirmed: false,
            },
        );
        for i in 0..3 {
            let t = task(&format!("t{i}"), "b1", LinkKind::Article);
            center.tracker.register(t).unwrap();
        }
        center.cancel("b1");
        let stats = center.tracker().statistics("b1", 3);
        assert_eq!(stats.cancelled, 3);
    }
}
