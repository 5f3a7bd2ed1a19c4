//! The delivery queue between an engine and a watcher's delivery thread.
//!
//! Regular events travel through a bounded queue. When it is full the event
//! is dropped and an `EventQueue` overflow is queued ahead of the next event
//! that fits. The terminal event travels on a separate closing channel so it
//! can never be dropped; the receiving side drains the regular queue before
//! it hands out anything from the closing channel.

use std::sync::Arc;

use crossbeam_channel::{Receiver, RecvError, Sender, TrySendError, bounded, select, unbounded};
use parking_lot::Mutex;

use crate::error::FileEventsError;
use crate::event::{OverflowType, WatchEvent};

#[derive(Debug, Default)]
struct SinkState {
    closed: bool,
    /// An overflow marker is owed to the consumer.
    overflowed: bool,
    dropped: usize,
}

#[derive(Debug)]
struct SinkInner {
    events: Sender<WatchEvent>,
    closing: Sender<WatchEvent>,
    state: Mutex<SinkState>,
}

/// Producer half of a watcher's delivery queue. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventSink {
    inner: Arc<SinkInner>,
}

fn queue_overflow() -> WatchEvent {
    WatchEvent::Overflow {
        kind: OverflowType::EventQueue,
        path: None,
    }
}

impl EventSink {
    /// Create a sink and the queue it feeds.
    pub fn channel(capacity: usize) -> (EventSink, EventQueue) {
        let (events_tx, events_rx) = bounded(capacity.max(1));
        let (closing_tx, closing_rx) = unbounded();
        let sink = EventSink {
            inner: Arc::new(SinkInner {
                events: events_tx,
                closing: closing_tx,
                state: Mutex::new(SinkState::default()),
            }),
        };
        let queue = EventQueue {
            events: events_rx,
            closing: closing_rx,
            pending: None,
            closing_started: false,
            finished: false,
        };
        (sink, queue)
    }

    /// Offer an event. Returns whether it was queued.
    ///
    /// A terminal event closes the sink, like [`fail`](Self::fail) and
    /// [`terminate`](Self::terminate) do.
    pub fn send(&self, event: WatchEvent) -> bool {
        if event.is_terminal() {
            return self.close_with(event);
        }
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }

        if state.overflowed {
            match self.inner.events.try_send(queue_overflow()) {
                Ok(()) => state.overflowed = false,
                Err(_) => {
                    state.dropped += 1;
                    return false;
                }
            }
        }

        match self.inner.events.try_send(event) {
            Ok(()) => true,
            Err(TrySendError::Full(event)) => {
                state.overflowed = true;
                state.dropped += 1;
                crate::debug_event!("sink", "queue full, dropped", "{event:?}");
                false
            }
            Err(TrySendError::Disconnected(_)) => {
                state.closed = true;
                false
            }
        }
    }

    /// Close the sink with a failure. Returns `false` if already closed.
    pub fn fail(&self, error: FileEventsError) -> bool {
        self.close_with(WatchEvent::Failure { error })
    }

    /// Close the sink after an orderly shutdown. Returns `false` if already closed.
    pub fn terminate(&self) -> bool {
        self.close_with(WatchEvent::Terminated)
    }

    pub fn is_closed(&self) -> bool {
        self.inner.state.lock().closed
    }

    /// Number of events dropped because the queue was full.
    pub fn dropped(&self) -> usize {
        self.inner.state.lock().dropped
    }

    fn close_with(&self, terminal: WatchEvent) -> bool {
        let mut state = self.inner.state.lock();
        if state.closed {
            return false;
        }
        state.closed = true;
        // The receiver may already be gone; nothing is waiting for these then
        if state.overflowed {
            let _ = self.inner.closing.send(queue_overflow());
        }
        let _ = self.inner.closing.send(terminal);
        true
    }
}

enum Next {
    Event(Result<WatchEvent, RecvError>),
    Closing(Result<WatchEvent, RecvError>),
}

/// Consumer half of a watcher's delivery queue.
#[derive(Debug)]
pub struct EventQueue {
    events: Receiver<WatchEvent>,
    closing: Receiver<WatchEvent>,
    pending: Option<WatchEvent>,
    closing_started: bool,
    finished: bool,
}

impl EventQueue {
    /// Block for the next event in delivery order.
    ///
    /// Returns `None` once the terminal event has been handed out, or if
    /// every sink was dropped without closing.
    pub fn recv(&mut self) -> Option<WatchEvent> {
        if self.finished {
            return None;
        }

        if !self.closing_started {
            let next = select! {
                recv(self.events) -> msg => Next::Event(msg),
                recv(self.closing) -> msg => Next::Closing(msg),
            };
            match next {
                Next::Event(Ok(event)) => return Some(event),
                Next::Closing(Ok(event)) => {
                    self.closing_started = true;
                    self.pending = Some(event);
                }
                Next::Event(Err(_)) | Next::Closing(Err(_)) => {
                    self.finished = true;
                    return None;
                }
            }
        }

        // Closed sinks accept nothing new, so whatever is queued precedes
        // the closing events
        if let Ok(event) = self.events.try_recv() {
            return Some(event);
        }

        match self.pending.take().or_else(|| self.closing.recv().ok()) {
            Some(event) => {
                self.finished = event.is_terminal();
                Some(event)
            }
            None => {
                self.finished = true;
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::event::ChangeType;

    fn created(path: &str) -> WatchEvent {
        WatchEvent::change(ChangeType::Created, path)
    }

    fn collect(queue: &mut EventQueue) -> Vec<WatchEvent> {
        std::iter::from_fn(|| queue.recv()).collect()
    }

    #[test]
    fn test_terminal_follows_queued_events() {
        let (sink, mut queue) = EventSink::channel(8);
        assert!(sink.send(created("/a")));
        assert!(sink.send(created("/b")));
        assert!(sink.terminate());

        assert_eq!(
            collect(&mut queue),
            vec![created("/a"), created("/b"), WatchEvent::Terminated]
        );
    }

    #[test]
    fn test_only_first_terminal_is_accepted() {
        let (sink, mut queue) = EventSink::channel(8);
        assert!(sink.fail(FileEventsError::bridge("crashed")));
        assert!(!sink.terminate());
        assert!(!sink.send(created("/late")));

        let events = collect(&mut queue);
        assert_eq!(events.len(), 1);
        assert!(matches!(events[0], WatchEvent::Failure { .. }));
        assert!(queue.recv().is_none());
    }

    #[test]
    fn test_full_queue_reports_overflow_before_next_event() {
        let (sink, mut queue) = EventSink::channel(2);
        assert!(sink.send(created("/1")));
        assert!(sink.send(created("/2")));
        assert!(!sink.send(created("/3")));
        assert_eq!(sink.dropped(), 1);

        assert_eq!(queue.recv(), Some(created("/1")));
        assert_eq!(queue.recv(), Some(created("/2")));

        assert!(sink.send(created("/4")));
        assert!(sink.terminate());

        assert_eq!(
            collect(&mut queue),
            vec![queue_overflow(), created("/4"), WatchEvent::Terminated]
        );
    }

    #[test]
    fn test_owed_overflow_is_delivered_on_close() {
        let (sink, mut queue) = EventSink::channel(1);
        assert!(sink.send(created("/1")));
        assert!(!sink.send(created("/2")));
        assert!(sink.terminate());

        assert_eq!(
            collect(&mut queue),
            vec![created("/1"), queue_overflow(), WatchEvent::Terminated]
        );
    }

    #[test]
    fn test_dropped_sink_ends_queue() {
        let (sink, mut queue) = EventSink::channel(4);
        drop(sink);
        assert!(queue.recv().is_none());
    }
}
