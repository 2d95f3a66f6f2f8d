//! Task Queue (C3): a plain FIFO of task ids. The authoritative task record
//! lives in `TaskStateTracker`; this queue only orders work. Enforcing the
//! "only Pending ids may enter" policy is the caller's job (see
//! `ControlCenter::enqueue_pending`) since the queue itself has no view of
//! task status.

use std::collections::VecDeque;
use std::sync::Mutex;

pub struct TaskQueue {
    ids: Mutex<VecDeque<String>>,
}

impl Default for TaskQueue {
    fn default() -> Self {
        Self::new()
    }
}

impl TaskQueue {
    pub fn new() -> Self {
        Self {
            ids: Mutex::new(VecDeque::new()),
        }
    }

    pub fn enqueue(&self, task_id: impl Into<String>) {
        self.ids.lock().expect("queue lock poisoned").push_back(task_id.into());
    }

    /// Non-blocking; `None` if empty.
    pub fn dequeue(&self) -> Option<String> {
        self.ids.lock().expect("queue lock poisoned").pop_front()
    }

    /// Put a dequeued-but-unusable id back at the front, preserving its
    /// priority relative to ids enqueued after it.
    pub fn return_to_front(&self, task_id: impl Into<String>) {
        self.ids.lock().expect("queue lock poisoned").push_front(task_id.into());
    }

    pub fn size(&self) -> usize {
        self.ids.lock().expect("queue lock poisoned").len()
    }

    pub fn is_empty(&self) -> bool {
        self.size() == 0
    }
}
