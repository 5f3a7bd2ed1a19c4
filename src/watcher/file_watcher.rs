//! Lifecycle of one watching session.
//!
//! ```text
//! CREATED -> INITIALIZING -> RUNNING -> SHUTTING_DOWN -> TERMINATED
//!                  |            |
//!                  +--> FAILED <+
//! ```
//!
//! Control-plane calls (`start_watching`, `stop_watching`, `shutdown`) take
//! `&mut self`, so they are serialized by the borrow checker. Events are
//! delivered on a dedicated thread; the terminal event moves the watcher to
//! its final state once the handler has returned.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use super::path_registry::WatchedPaths;
use crate::bridge::FileEvents;
use crate::config::WatcherSettings;
use crate::engine::{EngineSession, EventQueue, EventSink, SessionOptions, WatchEngine};
use crate::error::{FileEventsError, FileEventsResult};
use crate::event::{WatchEvent, WatchEventHandler};

const START_WAIT: &str = "watcher to start";
const TERMINATION_WAIT: &str = "watcher to terminate";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum WatcherState {
    Created,
    Initializing,
    Running,
    ShuttingDown,
    Terminated,
    Failed,
}

impl WatcherState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WatcherState::Created => "CREATED",
            WatcherState::Initializing => "INITIALIZING",
            WatcherState::Running => "RUNNING",
            WatcherState::ShuttingDown => "SHUTTING_DOWN",
            WatcherState::Terminated => "TERMINATED",
            WatcherState::Failed => "FAILED",
        }
    }

    /// `Terminated` and `Failed` are absorbing.
    pub fn is_terminal(&self) -> bool {
        matches!(self, WatcherState::Terminated | WatcherState::Failed)
    }
}

impl fmt::Display for WatcherState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

type StartOutcome = FileEventsResult<Box<dyn EngineSession>>;

struct Status {
    state: WatcherState,
    /// Pending interrupt, consumed by the waiter that observes it.
    interrupted: bool,
    /// Result handed over by the start thread.
    started: Option<StartOutcome>,
    /// `initialize` stopped waiting for the start thread.
    abandoned: bool,
}

struct Shared {
    status: Mutex<Status>,
    changed: Condvar,
}

impl Shared {
    fn new() -> Self {
        Self {
            status: Mutex::new(Status {
                state: WatcherState::Created,
                interrupted: false,
                started: None,
                abandoned: false,
            }),
            changed: Condvar::new(),
        }
    }

    fn state(&self) -> WatcherState {
        self.status.lock().state
    }

    fn set_state(&self, state: WatcherState) {
        self.status.lock().state = state;
        self.changed.notify_all();
    }

    fn interrupt(&self) {
        self.status.lock().interrupted = true;
        self.changed.notify_all();
    }

    fn wait_for_termination(&self, timeout: Duration) -> FileEventsResult<bool> {
        let deadline = Instant::now().checked_add(timeout);
        let mut status = self.status.lock();
        loop {
            if status.state.is_terminal() {
                return Ok(true);
            }
            if std::mem::take(&mut status.interrupted) {
                return Err(FileEventsError::Interrupted {
                    operation: TERMINATION_WAIT,
                });
            }
            match deadline {
                Some(deadline) => {
                    if self.changed.wait_until(&mut status, deadline).timed_out() {
                        return Ok(status.state.is_terminal());
                    }
                }
                None => self.changed.wait(&mut status),
            }
        }
    }
}

fn illegal_state(operation: &'static str, state: WatcherState) -> FileEventsError {
    FileEventsError::IllegalState {
        operation,
        state: state.to_string(),
    }
}

fn absolute_paths<P: AsRef<Path>>(
    paths: impl IntoIterator<Item = P>,
) -> FileEventsResult<Vec<PathBuf>> {
    paths
        .into_iter()
        .map(|path| {
            let path = path.as_ref();
            if path.is_absolute() {
                Ok(path.to_path_buf())
            } else {
                Err(FileEventsError::RelativePath {
                    path: path.to_path_buf(),
                })
            }
        })
        .collect()
}

/// Wakes a watcher's blocked `initialize` or `await_termination`.
///
/// An interrupt that arrives while nobody waits stays pending until the
/// next wait observes it.
#[derive(Clone)]
pub struct Interrupter {
    shared: Arc<Shared>,
}

impl Interrupter {
    pub fn interrupt(&self) {
        self.shared.interrupt();
    }
}

/// Waits for a watcher's terminal state from any thread.
#[derive(Clone)]
pub struct Termination {
    shared: Arc<Shared>,
}

impl Termination {
    /// Block until the watcher terminated or failed, or `timeout` elapsed.
    /// Returns whether termination was observed.
    pub fn wait(&self, timeout: Duration) -> FileEventsResult<bool> {
        self.shared.wait_for_termination(timeout)
    }

    pub fn is_terminated(&self) -> bool {
        self.shared.state().is_terminal()
    }

    pub fn state(&self) -> WatcherState {
        self.shared.state()
    }
}

/// A watching session reporting to one handler.
///
/// # Examples
/// ```ignore
/// let events = FileEvents::init()?;
/// let (handler, stream) = ChannelHandler::new();
/// let mut watcher = FileWatcher::new(&events, WatcherSettings::default(), handler);
/// watcher.initialize(Duration::from_secs(5))?;
/// watcher.start_watching(["/tmp/project"])?;
/// ```
pub struct FileWatcher {
    engine: Arc<dyn WatchEngine>,
    settings: WatcherSettings,
    shared: Arc<Shared>,
    handler: Option<Box<dyn WatchEventHandler>>,
    sink: Option<EventSink>,
    session: Option<Box<dyn EngineSession>>,
    paths: WatchedPaths,
    dispatcher: Option<JoinHandle<()>>,
}

impl FileWatcher {
    pub fn new(
        events: &FileEvents,
        settings: WatcherSettings,
        handler: impl WatchEventHandler,
    ) -> Self {
        Self {
            engine: events.engine(),
            settings,
            shared: Arc::new(Shared::new()),
            handler: Some(Box::new(handler)),
            sink: None,
            session: None,
            paths: WatchedPaths::new(),
            dispatcher: None,
        }
    }

    pub fn state(&self) -> WatcherState {
        self.shared.state()
    }

    pub fn settings(&self) -> &WatcherSettings {
        &self.settings
    }

    pub fn interrupter(&self) -> Interrupter {
        Interrupter {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn termination(&self) -> Termination {
        Termination {
            shared: Arc::clone(&self.shared),
        }
    }

    /// Start the engine session and the delivery thread.
    ///
    /// Blocks until the engine confirms it is watching. On timeout,
    /// interruption or engine failure the watcher ends up `Failed` and no
    /// events are delivered.
    ///
    /// # Errors
    /// - `IllegalState` unless the watcher is `Created`
    /// - `Timeout` / `Interrupted` while waiting
    /// - any engine start failure, e.g. an instance-limit error
    pub fn initialize(&mut self, timeout: Duration) -> FileEventsResult<()> {
        let handler = {
            let mut status = self.shared.status.lock();
            let handler = match (status.state, self.handler.take()) {
                (WatcherState::Created, Some(handler)) => handler,
                (state, _) => return Err(illegal_state("initialize", state)),
            };
            status.state = WatcherState::Initializing;
            handler
        };

        let (sink, queue) = EventSink::channel(self.settings.event_queue_capacity);
        self.sink = Some(sink.clone());
        let options = SessionOptions {
            recursive: self.settings.recursive,
        };

        let session = match self.start_session(options, sink.clone(), timeout) {
            Ok(session) => session,
            Err(e) => return Err(self.fail_initialization(&sink, e)),
        };
        self.session = Some(session);
        self.shared.set_state(WatcherState::Running);

        match spawn_dispatcher(queue, handler, Arc::clone(&self.shared)) {
            Ok(dispatcher) => self.dispatcher = Some(dispatcher),
            Err(e) => {
                if let Some(mut session) = self.session.take() {
                    session.stop();
                }
                let error =
                    FileEventsError::bridge(format!("Could not start delivery thread: {e}"));
                return Err(self.fail_initialization(&sink, error));
            }
        }

        crate::log_event!(
            "watcher",
            "running",
            "{} engine, queue capacity {}",
            self.engine.name(),
            self.settings.event_queue_capacity
        );
        Ok(())
    }

    fn start_session(
        &self,
        options: SessionOptions,
        sink: EventSink,
        timeout: Duration,
    ) -> StartOutcome {
        let engine = Arc::clone(&self.engine);
        let shared = Arc::clone(&self.shared);
        std::thread::Builder::new()
            .name("file-events-start".to_string())
            .spawn(move || {
                let outcome = engine.start(&options, sink);
                let mut status = shared.status.lock();
                if !status.abandoned {
                    status.started = Some(outcome);
                    shared.changed.notify_all();
                    return;
                }
                drop(status);
                if let Ok(mut session) = outcome {
                    crate::debug_event!("watcher", "stopping session started too late");
                    session.stop();
                }
            })
            .map_err(|e| FileEventsError::bridge(format!("Could not start watcher thread: {e}")))?;

        let deadline = Instant::now().checked_add(timeout);
        let mut status = self.shared.status.lock();
        loop {
            if let Some(outcome) = status.started.take() {
                return outcome;
            }
            if std::mem::take(&mut status.interrupted) {
                status.abandoned = true;
                return Err(FileEventsError::Interrupted {
                    operation: START_WAIT,
                });
            }
            match deadline {
                Some(deadline) => {
                    if self.shared.changed.wait_until(&mut status, deadline).timed_out() {
                        if let Some(outcome) = status.started.take() {
                            return outcome;
                        }
                        status.abandoned = true;
                        return Err(FileEventsError::Timeout {
                            operation: START_WAIT,
                            waited: timeout,
                        });
                    }
                }
                None => self.shared.changed.wait(&mut status),
            }
        }
    }

    fn fail_initialization(&self, sink: &EventSink, error: FileEventsError) -> FileEventsError {
        // A session that still completes must not reach the handler
        sink.fail(error.clone());
        self.shared.set_state(WatcherState::Failed);
        tracing::warn!("[watcher] initialization failed: {error}");
        error
    }

    fn require_running(&self, operation: &'static str) -> FileEventsResult<()> {
        match self.state() {
            WatcherState::Running => Ok(()),
            state => Err(illegal_state(operation, state)),
        }
    }

    /// Add absolute paths to the watched set.
    ///
    /// Paths already watched are skipped. Either every new path is added or
    /// none is: on failure the paths added by this call are unwatched again
    /// and the error is returned.
    pub fn start_watching<P: AsRef<Path>>(
        &mut self,
        paths: impl IntoIterator<Item = P>,
    ) -> FileEventsResult<()> {
        self.require_running("start watching")?;
        let requested = absolute_paths(paths)?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| illegal_state("start watching", WatcherState::Failed))?;

        let mut added: Vec<PathBuf> = Vec::new();
        for path in requested {
            if self.paths.contains(&path) || added.contains(&path) {
                continue;
            }
            if let Err(e) = session.watch(&path) {
                for undo in added.iter().rev() {
                    if let Err(undo_error) = session.unwatch(undo) {
                        tracing::warn!(
                            "[watcher] failed to roll back {}: {undo_error}",
                            undo.display()
                        );
                    }
                }
                crate::debug_event!("watcher", "start watching failed", "{e}");
                return Err(e);
            }
            added.push(path);
        }

        let count = self.paths.extend(added);
        crate::debug_event!(
            "watcher",
            "watching",
            "{count} new, {} total",
            self.paths.len()
        );
        Ok(())
    }

    /// Remove absolute paths from the watched set.
    ///
    /// Returns `true` only if every requested path was being watched and is
    /// no longer. Paths that were not watched are skipped without error.
    /// Removing a path never affects its watched parents or children.
    pub fn stop_watching<P: AsRef<Path>>(
        &mut self,
        paths: impl IntoIterator<Item = P>,
    ) -> FileEventsResult<bool> {
        self.require_running("stop watching")?;
        let requested = absolute_paths(paths)?;
        let session = self
            .session
            .as_mut()
            .ok_or_else(|| illegal_state("stop watching", WatcherState::Failed))?;

        let mut all_removed = true;
        for path in requested {
            if !self.paths.contains(&path) {
                crate::debug_event!("watcher", "not watched", "{}", path.display());
                all_removed = false;
                continue;
            }
            let engine_removed = session.unwatch(&path)?;
            self.paths.remove(&path);
            all_removed &= engine_removed;
        }
        Ok(all_removed)
    }

    /// Snapshot of the watched roots.
    pub fn watched_paths(&self) -> Vec<Arc<PathBuf>> {
        self.paths.snapshot()
    }

    pub fn is_watching(&self, path: &Path) -> bool {
        self.paths.contains(path)
    }

    /// Stop producing events and release the engine session.
    ///
    /// Returns immediately. Events already queued are still delivered, then
    /// the terminal event. Calling it again is a no-op.
    pub fn shutdown(&mut self) -> FileEventsResult<()> {
        let was_running = {
            let mut status = self.shared.status.lock();
            match status.state {
                WatcherState::Created | WatcherState::Initializing => {
                    return Err(illegal_state("shut down", status.state));
                }
                WatcherState::Running => {
                    status.state = WatcherState::ShuttingDown;
                    self.shared.changed.notify_all();
                    true
                }
                WatcherState::ShuttingDown | WatcherState::Terminated | WatcherState::Failed => {
                    false
                }
            }
        };

        if was_running {
            if let Some(sink) = &self.sink {
                sink.terminate();
            }
            crate::log_event!("watcher", "shutting down", "{} paths", self.paths.len());
        }
        if let Some(mut session) = self.session.take() {
            session.stop();
        }
        Ok(())
    }

    /// Block until the watcher terminated or failed, or `timeout` elapsed.
    ///
    /// Returns whether termination was observed. A timeout leaves the state
    /// untouched.
    pub fn await_termination(&self, timeout: Duration) -> FileEventsResult<bool> {
        match self.state() {
            WatcherState::Created => Err(illegal_state("await termination", WatcherState::Created)),
            _ => self.shared.wait_for_termination(timeout),
        }
    }
}

impl fmt::Debug for FileWatcher {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FileWatcher")
            .field("engine", &self.engine.name())
            .field("state", &self.state())
            .field("paths", &self.paths.len())
            .finish()
    }
}

impl Drop for FileWatcher {
    fn drop(&mut self) {
        let _ = self.shutdown();
        if let Some(dispatcher) = self.dispatcher.take() {
            // A handler dropping its own watcher must not join itself
            if dispatcher.thread().id() != std::thread::current().id()
                && dispatcher.join().is_err()
            {
                tracing::error!("[watcher] delivery thread panicked");
            }
        }
    }
}

fn spawn_dispatcher(
    mut queue: EventQueue,
    mut handler: Box<dyn WatchEventHandler>,
    shared: Arc<Shared>,
) -> std::io::Result<JoinHandle<()>> {
    std::thread::Builder::new()
        .name("file-events-dispatch".to_string())
        .spawn(move || {
            while let Some(event) = queue.recv() {
                deliver(&event, handler.as_mut());
                if event.is_terminal() {
                    let state = match event {
                        WatchEvent::Failure { .. } => WatcherState::Failed,
                        _ => WatcherState::Terminated,
                    };
                    crate::debug_event!("watcher", "delivered terminal event", "{state}");
                    shared.set_state(state);
                    return;
                }
            }

            // Every sink went away without a terminal event
            let event = WatchEvent::Failure {
                error: FileEventsError::bridge("Event queue closed unexpectedly"),
            };
            deliver(&event, handler.as_mut());
            shared.set_state(WatcherState::Failed);
        })
}

fn deliver(event: &WatchEvent, handler: &mut dyn WatchEventHandler) {
    if catch_unwind(AssertUnwindSafe(|| event.handle_event(handler))).is_err() {
        tracing::error!("[watcher] handler panicked on {event:?}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_names() {
        assert_eq!(WatcherState::ShuttingDown.to_string(), "SHUTTING_DOWN");
        assert!(WatcherState::Failed.is_terminal());
        assert!(!WatcherState::ShuttingDown.is_terminal());
    }

    #[test]
    fn test_relative_paths_are_rejected() {
        let err = absolute_paths(["/ok", "relative/path"]).unwrap_err();
        assert_eq!(
            err,
            FileEventsError::RelativePath {
                path: PathBuf::from("relative/path")
            }
        );
    }

    #[test]
    fn test_pending_interrupt_is_consumed_once() {
        let shared = Arc::new(Shared::new());
        shared.set_state(WatcherState::Running);
        Interrupter {
            shared: Arc::clone(&shared),
        }
        .interrupt();

        let err = shared
            .wait_for_termination(Duration::from_secs(5))
            .unwrap_err();
        assert!(matches!(err, FileEventsError::Interrupted { .. }));

        let observed = shared
            .wait_for_termination(Duration::from_millis(20))
            .unwrap();
        assert!(!observed);
        assert_eq!(shared.state(), WatcherState::Running);
    }

    #[test]
    fn test_termination_wakes_waiters() {
        let shared = Arc::new(Shared::new());
        shared.set_state(WatcherState::ShuttingDown);

        let waiters: Vec<_> = (0..3)
            .map(|_| {
                let termination = Termination {
                    shared: Arc::clone(&shared),
                };
                std::thread::spawn(move || termination.wait(Duration::from_secs(5)))
            })
            .collect();

        std::thread::sleep(Duration::from_millis(20));
        shared.set_state(WatcherState::Terminated);

        for waiter in waiters {
            assert_eq!(waiter.join().unwrap(), Ok(true));
        }
    }
}
