//! Cross-platform file-system change notifications.
//!
//! Initialize the integration once with [`FileEvents::init`], then create
//! [`FileWatcher`]s from it. Each watcher delivers an ordered stream of
//! [`WatchEvent`]s to its handler and ends with exactly one terminal event.

pub mod bridge;
pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod event;
pub mod logging;
pub mod platform;
pub mod watcher;

/// Protocol version engines must report to be accepted.
pub const FILE_EVENTS_VERSION: &str = env!("CARGO_PKG_VERSION");

pub use bridge::{BridgeGuard, BuiltinLoader, EngineLoader, FileEvents};
pub use config::{LoggingConfig, Settings, WatcherSettings};
pub use engine::{MemoryEngine, NotifyEngine, WatchEngine};
pub use error::{ErrorCategory, FileEventsError, FileEventsResult, ResourceLimit};
pub use event::{
    ChangeType, ChannelHandler, EventStream, FnHandler, OverflowType, WatchEvent,
    WatchEventHandler,
};
pub use platform::{EngineArtifact, Platform};
pub use watcher::{FileWatcher, Interrupter, Termination, WatcherState};
