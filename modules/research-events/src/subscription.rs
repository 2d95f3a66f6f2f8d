use research_common::event::Event;
use tokio::sync::mpsc;

/// A bounded, in-order stream of events for one batch. Closing is
/// idempotent: dropping it (or calling `close`) more than once is safe.
pub struct Subscription {
    receiver: mpsc::Receiver<Event>,
}

impl Subscription {
    pub(crate) fn new(receiver: mpsc::Receiver<Event>) -> Self {
        Self { receiver }
    }

    /// Await the next event, or `None` once the bus has no more senders
    /// (the bus itself was dropped).
    pub async fn recv(&mut self) -> Option<Event> {
        self.receiver.recv().await
    }

    /// Idempotent close — further `recv()` calls return `None`.
    pub fn close(&mut self) {
        self.receiver.close();
    }
}
