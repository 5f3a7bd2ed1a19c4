//! Watch engines: the backends that observe the file system.
//!
//! # Architecture
//!
//! ```text
//! FileWatcher (control plane)
//!   - owns one EngineSession
//!         |
//!   EngineSession --events--> EventSink ==queue==> delivery thread --> handler
//! ```
//!
//! An engine is selected once when the bridge initializes and stored behind
//! [`WatchEngine`]; each watcher then starts its own session from it.

mod memory;
mod notify_engine;
mod sink;

pub use memory::{MemoryEngine, MemoryEngineBuilder};
pub use notify_engine::NotifyEngine;
pub use sink::{EventQueue, EventSink};

use std::path::Path;

use crate::error::FileEventsResult;

/// Options fixed for the lifetime of a session.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SessionOptions {
    /// Watch whole hierarchies rather than single directories.
    pub recursive: bool,
}

/// A loaded watch engine.
pub trait WatchEngine: Send + Sync + 'static {
    /// Engine name for logging.
    fn name(&self) -> &str;

    /// The protocol version the engine reports about itself.
    fn version(&self) -> &str;

    /// Start a new watch context that reports into `sink`.
    ///
    /// Returns once the engine is actively watching. Fails with an
    /// instance-limit error when the OS cannot provide another context.
    fn start(
        &self,
        options: &SessionOptions,
        sink: EventSink,
    ) -> FileEventsResult<Box<dyn EngineSession>>;
}

/// One active watch context.
pub trait EngineSession: Send {
    /// Start watching a single absolute path.
    fn watch(&mut self, path: &Path) -> FileEventsResult<()>;

    /// Stop watching a path. Returns `false` if it was not being watched.
    fn unwatch(&mut self, path: &Path) -> FileEventsResult<bool>;

    /// Release native resources. No events are produced afterwards.
    fn stop(&mut self);
}
