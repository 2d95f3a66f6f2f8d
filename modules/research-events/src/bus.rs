//! The event bus (C1): single-producer-many-consumer, per-batch publish/
//! subscribe with monotone sequence numbers and a small inbound command
//! surface for delivering user responses back to a suspended orchestrator.
//!
//! One struct owns the authoritative per-batch state behind a lock, with a
//! side channel used to wake subscribers. There is nothing to persist or
//! catch up on here, so it stays a pure in-process fan-out with bounded
//! per-subscriber buffers and at-most-once, drop-on-full delivery.

use std::collections::HashMap;
use std::sync::Mutex;

use research_common::event::{Event, EventPayload};
use research_common::types::BatchId;
use tokio::sync::{mpsc, oneshot};
use tracing::warn;

use crate::error::EventBusError;
use crate::subscription::Subscription;

struct BatchState {
    next_seq: u64,
    subscribers: Vec<mpsc::Sender<Event>>,
}

impl BatchState {
    fn new() -> Self {
        Self {
            next_seq: 0,
            subscribers: Vec::new(),
        }
    }
}

struct Inner {
    buffer_size: usize,
    batches: Mutex<HashMap<BatchId, BatchState>>,
    pending_prompts: Mutex<HashMap<String, oneshot::Sender<String>>>,
}

/// Cloneable handle to the event bus. Cheap to clone (wraps an `Arc`);
/// components hold a non-owning handle rather than the bus itself, per the
/// "break cyclic references" redesign note.
#[derive(Clone)]
pub struct EventBus {
    inner: std::sync::Arc<Inner>,
}

impl EventBus {
    pub fn new(subscriber_buffer: usize) -> Self {
        Self {
            inner: std::sync::Arc::new(Inner {
                buffer_size: subscriber_buffer.max(1),
                batches: Mutex::new(HashMap::new()),
                pending_prompts: Mutex::new(HashMap::new()),
            }),
        }
    }

    /// Publish an event for `batch_id`. Never blocks: a subscriber whose
    /// buffer is full is dropped (detached) rather than backpressuring the
    /// producer; other subscribers keep receiving events in order.
    pub fn publish(&self, batch_id: impl Into<String>, payload: EventPayload) {
        let batch_id = batch_id.into();
        let mut batches = self.inner.batches.lock().expect("event bus lock poisoned");
        let state = batches
            .entry(batch_id.clone())
            .or_insert_with(BatchState::new);

        let seq = state.next_seq;
        state.next_seq += 1;
        let event = Event::new(batch_id.clone(), seq, payload);

        let mut dropped = false;
        state.subscribers.retain(|sender| match sender.try_send(event.clone()) {
            Ok(()) => true,
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!(seq, "subscriber buffer full, dropping subscriber");
                dropped = true;
                false
            }
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });

        if dropped {
            let error_seq = state.next_seq;
            state.next_seq += 1;
            let error_event = Event::new(
                batch_id,
                error_seq,
                EventPayload::Error {
                    where_: "event_bus".into(),
                    code: "subscriber_buffer_full".into(),
                    message: format!("a subscriber's buffer was full at seq {seq} and was dropped"),
                },
            );
            state
                .subscribers
                .retain(|sender| sender.try_send(error_event.clone()).is_ok());
        }
    }

    /// Subscribe to `batch_id`. Returns a bounded, in-order stream of
    /// events published for that batch from this point forward.
    pub fn subscribe(&self, batch_id: impl Into<String>) -> Subscription {
        let batch_id = batch_id.into();
        let (tx, rx) = mpsc::channel(self.inner.buffer_size);
        let mut batches = self.inner.batches.lock().expect("event bus lock poisoned");
        batches
            .entry(batch_id)
            .or_insert_with(BatchState::new)
            .subscribers
            .push(tx);
        Subscription::new(rx)
    }

    /// Register a wait for a response to `prompt_id`. The caller (C12)
    /// calls this before publishing `user_input_required`, then awaits the
    /// returned receiver; `deliver_user_response` resolves it.
    pub fn await_user_response(&self, prompt_id: impl Into<String>) -> oneshot::Receiver<String> {
        let (tx, rx) = oneshot::channel();
        self.inner
            .pending_prompts
            .lock()
            .expect("event bus lock poisoned")
            .insert(prompt_id.into(), tx);
        rx
    }

    /// Resolve the pending prompt `prompt_id` with `response`. Fails with
    /// `UnknownPrompt` if no such prompt is outstanding (already answered,
    /// or never created).
    pub fn deliver_user_response(
        &self,
        prompt_id: &str,
        response: impl Into<String>,
    ) -> Result<(), EventBusError> {
        let sender = self
            .inner
            .pending_prompts
            .lock()
            .expect("event bus lock poisoned")
            .remove(prompt_id);
        match sender {
            Some(sender) => {
                let _ = sender.send(response.into());
                Ok(())
            }
            None => Err(EventBusError::UnknownPrompt(prompt_id.to_string())),
        }
    }

    /// Cancel a pending prompt wait without a response (used when a batch
    /// or session is cancelled while a prompt is outstanding).
    pub fn cancel_prompt(&self, prompt_id: &str) {
        self.inner
            .pending_prompts
            .lock()
            .expect("event bus lock poisoned")
            .remove(prompt_id);
    }
}
