//! Status reporting capability passed into the orchestrator (spec §4.7).
//!
//! Four channels — URB trace, progress, status text, and error — backed by
//! a single bounded `common::async_std::channel`. Writers never block: a
//! full channel silently drops the event, matching the rest of this
//! codebase's non-blocking notifier idiom (e.g.
//! `connection_event_sender.try_send(..)` in the HTTP/2 connection state
//! machine).

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use common::async_std::channel;

#[derive(Debug, Clone)]
pub enum Event {
    /// A USB Request Block index, for cross-referencing against a
    /// reference bus trace. Only emitted when URB tracing is enabled.
    Urb(u64),
    /// Overall progress of the current operation, 0..=100.
    Progress(u8),
    Status(String),
    Error(String),
}

const CHANNEL_CAPACITY: usize = 256;

/// The sending half of the event channel, cloned freely and held by the
/// orchestrator and everything it calls into.
#[derive(Clone)]
pub struct EventSink {
    sender: channel::Sender<Event>,
    urb_trace: bool,
    next_urb: Arc<AtomicU64>,
}

impl EventSink {
    /// Creates a sink/receiver pair. The receiver is typically drained by
    /// a task that prints events to stdout.
    pub fn channel(urb_trace: bool) -> (Self, channel::Receiver<Event>) {
        let (sender, receiver) = channel::bounded(CHANNEL_CAPACITY);
        (
            Self {
                sender,
                urb_trace,
                next_urb: Arc::new(AtomicU64::new(0)),
            },
            receiver,
        )
    }

    /// Emits the next URB index if tracing is enabled; a no-op otherwise.
    pub fn urb(&self) {
        if !self.urb_trace {
            return;
        }
        let index = self.next_urb.fetch_add(1, Ordering::Relaxed);
        let _ = self.sender.try_send(Event::Urb(index));
    }

    pub fn progress(&self, percent: u8) {
        let _ = self.sender.try_send(Event::Progress(percent.min(100)));
    }

    pub fn status(&self, text: impl Into<String>) {
        let _ = self.sender.try_send(Event::Status(text.into()));
    }

    pub fn error(&self, text: impl Into<String>) {
        let _ = self.sender.try_send(Event::Error(text.into()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use common::async_std::task;

    #[test]
    fn urb_suppressed_when_tracing_disabled() {
        task::block_on(async {
            let (sink, receiver) = EventSink::channel(false);
            sink.urb();
            sink.progress(50);

            match receiver.recv().await.unwrap() {
                Event::Progress(50) => {}
                other => panic!("expected Progress(50), got {:?}", other),
            }
            assert!(receiver.try_recv().is_err());
        });
    }

    #[test]
    fn urb_indices_increase_monotonically() {
        task::block_on(async {
            let (sink, receiver) = EventSink::channel(true);
            sink.urb();
            sink.urb();

            match receiver.recv().await.unwrap() {
                Event::Urb(0) => {}
                other => panic!("expected Urb(0), got {:?}", other),
            }
            match receiver.recv().await.unwrap() {
                Event::Urb(1) => {}
                other => panic!("expected Urb(1), got {:?}", other),
            }
        });
    }
}
