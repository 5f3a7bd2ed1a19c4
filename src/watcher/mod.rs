//! File watchers built on a loaded engine.
//!
//! # Architecture
//!
//! ```text
//! FileWatcher
//!   - WatchedPaths (interned roots)
//!   - EngineSession (started by initialize)
//!   - delivery thread
//!         |
//!   WatchEventHandler (called sequentially)
//! ```

mod file_watcher;
mod path_registry;

pub use file_watcher::{FileWatcher, Interrupter, Termination, WatcherState};
pub use path_registry::WatchedPaths;
