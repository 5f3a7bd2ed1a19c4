//! Events delivered to watcher handlers.
//!
//! A watcher produces one ordered stream of [`WatchEvent`]s. The stream ends
//! with exactly one terminal event: [`WatchEvent::Failure`] if the engine
//! stopped on its own, [`WatchEvent::Terminated`] after an orderly shutdown.

use std::path::{Path, PathBuf};
use std::time::Duration;

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender};
use serde::Serialize;

use crate::error::FileEventsError;

/// The type of file-system change that happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ChangeType {
    /// An item with the given path has been created.
    Created,
    /// An item with the given path has been removed.
    Removed,
    /// An item with the given path has been modified.
    Modified,
    /// Some undisclosed changes happened under the given path,
    /// all information about descendants must be discarded.
    Invalidated,
}

/// The subsystem that suffered an overflow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OverflowType {
    /// The operating system dropped change information.
    OperatingSystem,
    /// The watcher's own delivery queue filled up.
    EventQueue,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum WatchEvent {
    /// An actual change to a file-system entry. The path is absolute.
    Change { kind: ChangeType, path: PathBuf },
    /// The engine reported something it could not classify.
    Unknown { path: PathBuf },
    /// Change information was lost. Treat the scope as needing a re-scan;
    /// `None` means the scope is unknown.
    Overflow {
        kind: OverflowType,
        path: Option<PathBuf>,
    },
    /// The engine failed; watching has stopped. Terminal.
    Failure { error: FileEventsError },
    /// Watching ended after shutdown. Terminal.
    Terminated,
}

impl WatchEvent {
    pub fn change(kind: ChangeType, path: impl Into<PathBuf>) -> Self {
        WatchEvent::Change {
            kind,
            path: path.into(),
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, WatchEvent::Failure { .. } | WatchEvent::Terminated)
    }

    /// The path the event refers to, if any.
    pub fn path(&self) -> Option<&Path> {
        match self {
            WatchEvent::Change { path, .. } | WatchEvent::Unknown { path } => Some(path),
            WatchEvent::Overflow { path, .. } => path.as_deref(),
            WatchEvent::Failure { .. } | WatchEvent::Terminated => None,
        }
    }

    /// Route this event to the matching handler method.
    pub fn handle_event(&self, handler: &mut dyn WatchEventHandler) {
        match self {
            WatchEvent::Change { kind, path } => handler.handle_change(*kind, path),
            WatchEvent::Unknown { path } => handler.handle_unknown(path),
            WatchEvent::Overflow { kind, path } => handler.handle_overflow(*kind, path.as_deref()),
            WatchEvent::Failure { error } => handler.handle_failure(error),
            WatchEvent::Terminated => handler.handle_terminated(),
        }
    }
}

/// Consumer of a watcher's event stream.
///
/// Methods are called from the watcher's delivery thread, one at a time and
/// in the order the engine produced the events.
pub trait WatchEventHandler: Send + 'static {
    /// An actual change to a file-system entry.
    fn handle_change(&mut self, kind: ChangeType, path: &Path);

    /// An event that is not recognized.
    fn handle_unknown(&mut self, path: &Path);

    /// Either the operating system or the delivery queue could not keep up.
    fn handle_overflow(&mut self, kind: OverflowType, path: Option<&Path>);

    /// Watching failed. No further events follow.
    fn handle_failure(&mut self, error: &FileEventsError);

    /// Watching terminated in an orderly fashion. No further events follow.
    fn handle_terminated(&mut self);
}

/// Handler backed by a closure that sees every event.
pub struct FnHandler<F>(pub F);

impl<F> WatchEventHandler for FnHandler<F>
where
    F: FnMut(WatchEvent) + Send + 'static,
{
    fn handle_change(&mut self, kind: ChangeType, path: &Path) {
        (self.0)(WatchEvent::change(kind, path))
    }

    fn handle_unknown(&mut self, path: &Path) {
        (self.0)(WatchEvent::Unknown {
            path: path.to_path_buf(),
        })
    }

    fn handle_overflow(&mut self, kind: OverflowType, path: Option<&Path>) {
        (self.0)(WatchEvent::Overflow {
            kind,
            path: path.map(Path::to_path_buf),
        })
    }

    fn handle_failure(&mut self, error: &FileEventsError) {
        (self.0)(WatchEvent::Failure {
            error: error.clone(),
        })
    }

    fn handle_terminated(&mut self) {
        (self.0)(WatchEvent::Terminated)
    }
}

/// Handler that forwards events into a channel so they can be pulled.
pub struct ChannelHandler {
    sender: Sender<WatchEvent>,
}

impl ChannelHandler {
    /// Create a handler and the stream it feeds.
    pub fn new() -> (Self, EventStream) {
        let (sender, receiver) = crossbeam_channel::unbounded();
        (Self { sender }, EventStream { receiver, done: false })
    }

    fn forward(&self, event: WatchEvent) {
        // The stream may have been dropped; events have nowhere to go then
        let _ = self.sender.send(event);
    }
}

impl WatchEventHandler for ChannelHandler {
    fn handle_change(&mut self, kind: ChangeType, path: &Path) {
        self.forward(WatchEvent::change(kind, path));
    }

    fn handle_unknown(&mut self, path: &Path) {
        self.forward(WatchEvent::Unknown {
            path: path.to_path_buf(),
        });
    }

    fn handle_overflow(&mut self, kind: OverflowType, path: Option<&Path>) {
        self.forward(WatchEvent::Overflow {
            kind,
            path: path.map(Path::to_path_buf),
        });
    }

    fn handle_failure(&mut self, error: &FileEventsError) {
        self.forward(WatchEvent::Failure {
            error: error.clone(),
        });
    }

    fn handle_terminated(&mut self) {
        self.forward(WatchEvent::Terminated);
    }
}

/// Blocking iterator over events fed by a [`ChannelHandler`].
///
/// Iteration ends after the terminal event.
pub struct EventStream {
    receiver: Receiver<WatchEvent>,
    done: bool,
}

impl EventStream {
    /// Wait up to `timeout` for the next event.
    pub fn next_timeout(&mut self, timeout: Duration) -> Option<WatchEvent> {
        if self.done {
            return None;
        }
        match self.receiver.recv_timeout(timeout) {
            Ok(event) => {
                self.done = event.is_terminal();
                Some(event)
            }
            Err(RecvTimeoutError::Timeout) => None,
            Err(RecvTimeoutError::Disconnected) => {
                self.done = true;
                None
            }
        }
    }

    /// Take every event already delivered without blocking.
    pub fn drain(&mut self) -> Vec<WatchEvent> {
        let mut events = Vec::new();
        while !self.done {
            match self.receiver.try_recv() {
                Ok(event) => {
                    self.done = event.is_terminal();
                    events.push(event);
                }
                Err(_) => break,
            }
        }
        events
    }
}

impl Iterator for EventStream {
    type Item = WatchEvent;

    fn next(&mut self) -> Option<WatchEvent> {
        if self.done {
            return None;
        }
        let event = self.receiver.recv().ok();
        self.done = event.as_ref().is_none_or(WatchEvent::is_terminal);
        event
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Default)]
    struct Recording(Vec<String>);

    impl WatchEventHandler for Recording {
        fn handle_change(&mut self, kind: ChangeType, path: &Path) {
            self.0.push(format!("{kind:?} {}", path.display()));
        }
        fn handle_unknown(&mut self, path: &Path) {
            self.0.push(format!("unknown {}", path.display()));
        }
        fn handle_overflow(&mut self, kind: OverflowType, path: Option<&Path>) {
            self.0.push(format!("overflow {kind:?} {path:?}"));
        }
        fn handle_failure(&mut self, error: &FileEventsError) {
            self.0.push(format!("failure {error}"));
        }
        fn handle_terminated(&mut self) {
            self.0.push("terminated".to_string());
        }
    }

    #[test]
    fn test_handle_event_routes_each_shape() {
        let events = vec![
            WatchEvent::change(ChangeType::Created, "/a"),
            WatchEvent::Unknown {
                path: PathBuf::from("/b"),
            },
            WatchEvent::Overflow {
                kind: OverflowType::EventQueue,
                path: None,
            },
            WatchEvent::Failure {
                error: FileEventsError::bridge("lost connection"),
            },
        ];

        let mut handler = Recording::default();
        for event in &events {
            event.handle_event(&mut handler);
        }

        assert_eq!(
            handler.0,
            vec![
                "Created /a",
                "unknown /b",
                "overflow EventQueue None",
                "failure lost connection",
            ]
        );
    }

    #[test]
    fn test_terminal_events() {
        assert!(WatchEvent::Terminated.is_terminal());
        assert!(
            WatchEvent::Failure {
                error: FileEventsError::bridge("x")
            }
            .is_terminal()
        );
        assert!(!WatchEvent::change(ChangeType::Invalidated, "/a").is_terminal());
        assert_eq!(
            WatchEvent::change(ChangeType::Modified, "/a/b").path(),
            Some(Path::new("/a/b"))
        );
        assert_eq!(WatchEvent::Terminated.path(), None);
    }

    #[test]
    fn test_event_stream_stops_after_terminal() {
        let (mut handler, stream) = ChannelHandler::new();
        handler.handle_change(ChangeType::Removed, Path::new("/x"));
        handler.handle_terminated();
        handler.handle_change(ChangeType::Created, Path::new("/late"));

        let events: Vec<_> = stream.collect();
        assert_eq!(
            events,
            vec![
                WatchEvent::change(ChangeType::Removed, "/x"),
                WatchEvent::Terminated
            ]
        );
    }

    #[test]
    fn test_change_type_serializes_like_constants() {
        let json = serde_json::to_string(&ChangeType::Invalidated).unwrap();
        assert_eq!(json, "\"INVALIDATED\"");
        let json = serde_json::to_string(&OverflowType::OperatingSystem).unwrap();
        assert_eq!(json, "\"OPERATING_SYSTEM\"");
    }
}
