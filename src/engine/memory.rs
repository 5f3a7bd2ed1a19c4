//! In-process engine with scripted behavior.
//!
//! Useful wherever a deterministic event stream is needed: tests, replaying
//! recorded events, or exercising resource-limit handling without touching
//! kernel limits.

use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use super::{EngineSession, EventSink, SessionOptions, WatchEngine};
use crate::error::{FileEventsError, FileEventsResult};
use crate::event::{ChangeType, WatchEvent};

#[derive(Debug, Clone)]
struct MemoryConfig {
    version: String,
    instance_limit: Option<usize>,
    watch_limit: Option<usize>,
    instance_per_root: bool,
    start_delay: Option<Duration>,
    start_failure: Option<FileEventsError>,
}

#[derive(Debug)]
struct SessionRecord {
    id: u64,
    sink: EventSink,
    roots: HashSet<PathBuf>,
}

#[derive(Debug, Default)]
struct MemoryState {
    sessions: Vec<SessionRecord>,
    next_id: u64,
    starts: usize,
}

impl MemoryState {
    fn session_mut(&mut self, id: u64) -> Option<&mut SessionRecord> {
        self.sessions.iter_mut().find(|s| s.id == id)
    }

    fn total_roots(&self) -> usize {
        self.sessions.iter().map(|s| s.roots.len()).sum()
    }
}

#[derive(Debug)]
struct MemoryInner {
    config: MemoryConfig,
    state: Mutex<MemoryState>,
}

/// Scriptable engine. Clones share state, so keep one to drive the
/// sessions started from it.
#[derive(Debug, Clone)]
pub struct MemoryEngine {
    inner: Arc<MemoryInner>,
}

/// Builder for [`MemoryEngine`].
#[derive(Debug, Clone)]
pub struct MemoryEngineBuilder {
    config: MemoryConfig,
}

impl MemoryEngineBuilder {
    /// Report a different protocol version.
    pub fn version(mut self, version: impl Into<String>) -> Self {
        self.config.version = version.into();
        self
    }

    /// Maximum number of concurrent watch instances.
    pub fn instance_limit(mut self, limit: usize) -> Self {
        self.config.instance_limit = Some(limit);
        self
    }

    /// Maximum number of watched roots per session.
    pub fn watch_limit(mut self, limit: usize) -> Self {
        self.config.watch_limit = Some(limit);
        self
    }

    /// Every watched root consumes its own instance instead of every
    /// session, like backends that open one stream per hierarchy.
    pub fn instance_per_root(mut self, enabled: bool) -> Self {
        self.config.instance_per_root = enabled;
        self
    }

    /// Delay before a session confirms it is watching.
    pub fn start_delay(mut self, delay: Duration) -> Self {
        self.config.start_delay = Some(delay);
        self
    }

    /// Fail every session start with `error`.
    pub fn fail_start(mut self, error: FileEventsError) -> Self {
        self.config.start_failure = Some(error);
        self
    }

    pub fn build(self) -> MemoryEngine {
        MemoryEngine {
            inner: Arc::new(MemoryInner {
                config: self.config,
                state: Mutex::new(MemoryState::default()),
            }),
        }
    }
}

impl MemoryEngine {
    pub fn builder() -> MemoryEngineBuilder {
        MemoryEngineBuilder {
            config: MemoryConfig {
                version: crate::FILE_EVENTS_VERSION.to_string(),
                instance_limit: None,
                watch_limit: None,
                instance_per_root: false,
                start_delay: None,
                start_failure: None,
            },
        }
    }

    /// An engine without limits reporting the built-in version.
    pub fn new() -> Self {
        Self::builder().build()
    }

    /// Deliver an event to every live session. Returns how many received it.
    pub fn emit(&self, event: WatchEvent) -> usize {
        let state = self.inner.state.lock();
        state
            .sessions
            .iter()
            .filter(|session| session.sink.send(event.clone()))
            .count()
    }

    /// Deliver a change to sessions watching `path` or one of its ancestors.
    pub fn emit_change(&self, kind: ChangeType, path: impl AsRef<Path>) -> usize {
        let path = path.as_ref();
        let state = self.inner.state.lock();
        state
            .sessions
            .iter()
            .filter(|session| session.roots.iter().any(|root| path.starts_with(root)))
            .filter(|session| session.sink.send(WatchEvent::change(kind, path)))
            .count()
    }

    /// Simulate the backend dying: every live session fails and stops.
    pub fn fail_all(&self, error: FileEventsError) -> usize {
        let mut state = self.inner.state.lock();
        state
            .sessions
            .drain(..)
            .filter(|session| session.sink.fail(error.clone()))
            .count()
    }

    /// Roots watched across all live sessions.
    pub fn watched_paths(&self) -> HashSet<PathBuf> {
        let state = self.inner.state.lock();
        state
            .sessions
            .iter()
            .flat_map(|s| s.roots.iter().cloned())
            .collect()
    }

    pub fn active_sessions(&self) -> usize {
        self.inner.state.lock().sessions.len()
    }

    /// Number of successful session starts so far.
    pub fn start_count(&self) -> usize {
        self.inner.state.lock().starts
    }
}

impl Default for MemoryEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchEngine for MemoryEngine {
    fn name(&self) -> &str {
        "memory"
    }

    fn version(&self) -> &str {
        &self.inner.config.version
    }

    fn start(
        &self,
        _options: &SessionOptions,
        sink: EventSink,
    ) -> FileEventsResult<Box<dyn EngineSession>> {
        let config = &self.inner.config;
        if let Some(delay) = config.start_delay {
            std::thread::sleep(delay);
        }
        if let Some(error) = &config.start_failure {
            return Err(error.clone());
        }

        let mut state = self.inner.state.lock();
        if let Some(limit) = config.instance_limit {
            if !config.instance_per_root && state.sessions.len() >= limit {
                return Err(FileEventsError::instance_limit(format!(
                    "{limit} watch instances already in use"
                )));
            }
        }

        let id = state.next_id;
        state.next_id += 1;
        state.starts += 1;
        state.sessions.push(SessionRecord {
            id,
            sink,
            roots: HashSet::new(),
        });

        Ok(Box::new(MemorySession {
            id,
            inner: Arc::clone(&self.inner),
        }))
    }
}

struct MemorySession {
    id: u64,
    inner: Arc<MemoryInner>,
}

impl EngineSession for MemorySession {
    fn watch(&mut self, path: &Path) -> FileEventsResult<()> {
        let config = &self.inner.config;
        let mut state = self.inner.state.lock();
        let total_roots = state.total_roots();
        let session = state
            .session_mut(self.id)
            .ok_or_else(|| FileEventsError::bridge("Watcher already stopped"))?;

        if session.roots.contains(path) {
            return Ok(());
        }
        if let Some(limit) = config.instance_limit {
            if config.instance_per_root && total_roots >= limit {
                return Err(FileEventsError::instance_limit(format!(
                    "{limit} watch instances already in use"
                )));
            }
        }
        if let Some(limit) = config.watch_limit {
            if session.roots.len() >= limit {
                return Err(FileEventsError::watches_limit(format!(
                    "{limit} watches already in use"
                )));
            }
        }

        session.roots.insert(path.to_path_buf());
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> FileEventsResult<bool> {
        let mut state = self.inner.state.lock();
        let session = state
            .session_mut(self.id)
            .ok_or_else(|| FileEventsError::bridge("Watcher already stopped"))?;
        Ok(session.roots.remove(path))
    }

    fn stop(&mut self) {
        self.inner.state.lock().sessions.retain(|s| s.id != self.id);
    }
}

impl Drop for MemorySession {
    fn drop(&mut self) {
        self.stop();
    }
}
