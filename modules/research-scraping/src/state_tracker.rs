//! Task State Tracker (C2): the authoritative, single-locked registry of
//! every scraping task. All mutation goes through `register`/`transition`;
//! `statistics` is computed fresh from the current snapshot on every call,
//! never cached, so there are no derived counters to keep in sync.

use std::collections::HashMap;
use std::sync::Mutex;

use chrono::Utc;
use research_common::types::{BatchProgress, ScrapingTask, TaskStatus};

use crate::error::ScrapingError;

pub struct TaskStateTracker {
    tasks: Mutex<HashMap<String, ScrapingTask>>,
}

impl Default for TaskStateTracker {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskStateTracker {
    pub fn new() -> Self {
        Self {
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Insert `task` in `Pending`. Fails if `task_id` is already registered.
    pub fn register(&self, task: ScrapingTask) -> Result<(), ScrapingError> {
        let mut tasks = self.tasks.lock().expect("task tracker lock poisoned");
        if tasks.contains_key(&task.task_id) {
            return Err(ScrapingError::DuplicateTaskId(task.task_id));
        }
        tasks.insert(task.task_id.clone(), task);
        Ok(())
    }

    /// Compare-and-swap: only succeeds if the task's current status equals
    /// `from`. `patch` is applied atomically with the status change.
    pub fn transition(
        &self,
        task_id: &str,
        from: TaskStatus,
        to: TaskStatus,
        patch: impl FnOnce(&mut ScrapingTask),
    ) -> Result<ScrapingTask, ScrapingError> {
        if !from.can_transition_to(to) {
            return Err(ScrapingError::StateMismatch {
                task_id: task_id.to_string(),
                expected: from.to_string(),
                found: to.to_string(),
            });
        }

        let mut tasks = self.tasks.lock().expect("task tracker lock poisoned");
        let task = tasks
            .get_mut(task_id)
            .ok_or_else(|| ScrapingError::UnknownTask(task_id.to_string()))?;

        if task.status != from {
            return Err(ScrapingError::StateMismatch {
                task_id: task_id.to_string(),
                expected: from.to_string(),
                found: task.status.to_string(),
            });
        }

        task.status = to;
        patch(task);
        Ok(task.clone())
    }

    pub fn get(&self, task_id: &str) -> Option<ScrapingTask> {
        self.tasks
            .lock()
            .expect("task tracker lock poisoned")
            .get(task_id)
            .cloned()
    }

    pub fn list_by_batch(&self, batch_id: &str) -> Vec<ScrapingTask> {
        self.tasks
            .lock()
            .expect("task tracker lock poisoned")
            .values()
            .filter(|t| t.batch_id == batch_id)
            .cloned()
            .collect()
    }

    /// Statistics computed fresh from the current snapshot; `expected_total`
    /// is supplied by the caller (the batch's declared size, or 0 for the
    /// recovery path).
    pub fn statistics(&self, batch_id: &str, expected_total: u64) -> BatchProgress {
        let tasks = self.list_by_batch(batch_id);
        let registered = tasks.len() as u64;
        let mut completed = 0u64;
        let mut failed = 0u64;
        let mut in_progress = 0u64;
        let mut pending = 0u64;
        let mut cancelled = 0u64;
        for t in &tasks {
            match t.status {
                TaskStatus::Completed => completed += 1,
                TaskStatus::Failed => failed += 1,
                TaskStatus::Processing => in_progress += 1,
                TaskStatus::Pending => pending += 1,
                TaskStatus::Cancelled => cancelled += 1,
            }
        }
        BatchProgress::compute(
            expected_total,
            registered,
            completed,
            failed,
            in_progress,
            pending,
            cancelled,
        )
    }

    /// Mark every `Pending` task in `batch_id` as `Cancelled`. Used by C5's
    /// `cancel` for the already-queued-but-not-yet-assigned tasks.
    pub fn cancel_pending(&self, batch_id: &str) -> Vec<String> {
        let mut tasks = self.tasks.lock().expect("task tracker lock poisoned");
        let mut cancelled_ids = Vec::new();
        for task in tasks.values_mut() {
            if task.batch_id == batch_id && task.status == TaskStatus::Pending {
                task.status = TaskStatus::Cancelled;
                task.completed_at = Some(Utc::now());
                cancelled_ids.push(task.task_id.clone());
            }
        }
        cancelled_ids
    }
}
