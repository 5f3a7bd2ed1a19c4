//! Built-in engine on top of the `notify` crate.
//!
//! Uses the platform's recommended backend: inotify on Linux, FSEvents on
//! macOS and ReadDirectoryChangesW on Windows.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use notify::event::{ModifyKind, RenameMode};
use notify::{ErrorKind, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};

use super::{EngineSession, EventSink, SessionOptions, WatchEngine};
use crate::error::{FileEventsError, FileEventsResult, ResourceLimit};
use crate::event::{ChangeType, OverflowType, WatchEvent};
use crate::logging::{LogLevelCache, NativeLogLevel};

/// Engine backed by `notify::RecommendedWatcher`.
#[derive(Debug, Clone)]
pub struct NotifyEngine {
    version: String,
}

impl NotifyEngine {
    pub fn new() -> Self {
        Self::with_version(crate::FILE_EVENTS_VERSION)
    }

    /// Report a specific protocol version instead of the built-in one.
    pub fn with_version(version: impl Into<String>) -> Self {
        Self {
            version: version.into(),
        }
    }
}

impl Default for NotifyEngine {
    fn default() -> Self {
        Self::new()
    }
}

impl WatchEngine for NotifyEngine {
    fn name(&self) -> &str {
        "notify"
    }

    fn version(&self) -> &str {
        &self.version
    }

    fn start(
        &self,
        options: &SessionOptions,
        sink: EventSink,
    ) -> FileEventsResult<Box<dyn EngineSession>> {
        let levels = Arc::new(LogLevelCache::new());
        let callback_sink = sink.clone();
        let callback_levels = Arc::clone(&levels);

        let watcher = notify::recommended_watcher(move |res: notify::Result<Event>| match res {
            Ok(event) => {
                callback_levels.log(NativeLogLevel::Trace, || format!("received {event:?}"));
                for translated in translate(&event) {
                    callback_sink.send(translated);
                }
            }
            Err(error) => handle_async_error(&callback_sink, &callback_levels, error),
        })
        .map_err(|e| map_error(e, None))?;

        let mode = if options.recursive {
            RecursiveMode::Recursive
        } else {
            RecursiveMode::NonRecursive
        };

        levels.log(NativeLogLevel::Debug, || format!("started watcher ({mode:?})"));

        Ok(Box::new(NotifySession {
            watcher: Some(watcher),
            mode,
            roots: Vec::new(),
            levels,
        }))
    }
}

/// Whether the backend keys watches by inode and removes recursive watches
/// by path prefix. Removing one root then also drops the watches of roots
/// above or below it.
const SHARED_SUBTREE_WATCHES: bool = cfg!(any(target_os = "linux", target_os = "android"));

struct NotifySession {
    watcher: Option<RecommendedWatcher>,
    mode: RecursiveMode,
    /// Roots registered through this session, in registration order.
    roots: Vec<PathBuf>,
    levels: Arc<LogLevelCache>,
}

impl NotifySession {
    fn watcher(&mut self) -> FileEventsResult<&mut RecommendedWatcher> {
        self.watcher
            .as_mut()
            .ok_or_else(|| FileEventsError::bridge("Watcher already stopped"))
    }

    /// Re-register the remaining roots that share a subtree with `removed`.
    fn restore_overlapping(&mut self, removed: &Path) {
        if !SHARED_SUBTREE_WATCHES || !matches!(self.mode, RecursiveMode::Recursive) {
            return;
        }
        let overlapping: Vec<PathBuf> = self
            .roots
            .iter()
            .filter(|root| root.starts_with(removed) || removed.starts_with(root))
            .cloned()
            .collect();
        let mode = self.mode;
        let Some(watcher) = self.watcher.as_mut() else {
            return;
        };
        for root in overlapping {
            match watcher.watch(&root, mode) {
                Ok(()) => self
                    .levels
                    .log(NativeLogLevel::Debug, || format!("re-watched {}", root.display())),
                Err(e) => self.levels.log(NativeLogLevel::Warn, || {
                    format!("could not re-watch {}: {e}", root.display())
                }),
            }
        }
    }
}

impl EngineSession for NotifySession {
    fn watch(&mut self, path: &Path) -> FileEventsResult<()> {
        let mode = self.mode;
        if let Err(e) = self.watcher()?.watch(path, mode) {
            // A recursive walk can fail partway and leave the directories
            // visited so far registered
            if matches!(mode, RecursiveMode::Recursive) {
                let _ = self.watcher()?.unwatch(path);
                self.restore_overlapping(path);
            }
            return Err(map_error(e, Some(path)));
        }
        if !self.roots.iter().any(|root| root == path) {
            self.roots.push(path.to_path_buf());
        }
        self.levels
            .log(NativeLogLevel::Debug, || format!("watching {}", path.display()));
        Ok(())
    }

    fn unwatch(&mut self, path: &Path) -> FileEventsResult<bool> {
        let registered = self.roots.iter().position(|root| root == path);
        if let Some(index) = registered {
            self.roots.remove(index);
        }
        let result = self.watcher()?.unwatch(path);
        self.restore_overlapping(path);
        match result {
            Ok(()) => {
                self.levels
                    .log(NativeLogLevel::Debug, || format!("unwatched {}", path.display()));
                Ok(registered.is_some())
            }
            Err(e) if matches!(e.kind, ErrorKind::WatchNotFound) => Ok(false),
            Err(e) => Err(map_error(e, Some(path))),
        }
    }

    fn stop(&mut self) {
        if self.watcher.take().is_some() {
            self.levels
                .log(NativeLogLevel::Debug, || "stopped watcher".to_string());
        }
    }
}

impl Drop for NotifySession {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Translate one backend event into zero or more watch events.
fn translate(event: &Event) -> Vec<WatchEvent> {
    if event.need_rescan() {
        return vec![match event.paths.first() {
            Some(path) => WatchEvent::change(ChangeType::Invalidated, path),
            None => WatchEvent::Overflow {
                kind: OverflowType::OperatingSystem,
                path: None,
            },
        }];
    }

    let changes = |kind: ChangeType| -> Vec<WatchEvent> {
        event
            .paths
            .iter()
            .map(|path| WatchEvent::change(kind, path))
            .collect()
    };

    match event.kind {
        EventKind::Access(_) => Vec::new(),
        EventKind::Create(_) => changes(ChangeType::Created),
        EventKind::Remove(_) => changes(ChangeType::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::From)) => changes(ChangeType::Removed),
        EventKind::Modify(ModifyKind::Name(RenameMode::To)) => changes(ChangeType::Created),
        // Backends that pair a move report both halves first
        EventKind::Modify(ModifyKind::Name(RenameMode::Both)) => Vec::new(),
        // One side of a rename without a pairing: whether the entry is
        // still there tells which side it was
        EventKind::Modify(ModifyKind::Name(_)) => event
            .paths
            .iter()
            .map(|path| {
                let kind = if path.exists() {
                    ChangeType::Created
                } else {
                    ChangeType::Removed
                };
                WatchEvent::change(kind, path)
            })
            .collect(),
        EventKind::Modify(_) => changes(ChangeType::Modified),
        EventKind::Any | EventKind::Other => event
            .paths
            .iter()
            .map(|path| WatchEvent::Unknown { path: path.clone() })
            .collect(),
    }
}

/// Errors reported from the backend thread after a successful start.
///
/// Losing a single path only loses information for that scope; anything
/// else means the backend can no longer be trusted.
fn handle_async_error(sink: &EventSink, levels: &LogLevelCache, error: notify::Error) {
    match error.kind {
        ErrorKind::MaxFilesWatch | ErrorKind::PathNotFound | ErrorKind::WatchNotFound => {
            levels.log(NativeLogLevel::Warn, || format!("lost watch: {error}"));
            sink.send(WatchEvent::Overflow {
                kind: OverflowType::OperatingSystem,
                path: error.paths.first().cloned(),
            });
        }
        _ => {
            levels.log(NativeLogLevel::Error, || format!("watcher failed: {error}"));
            sink.fail(map_error(error, None));
        }
    }
}

#[cfg(unix)]
fn io_resource_limit(error: &std::io::Error) -> Option<ResourceLimit> {
    const EMFILE: i32 = 24;
    const ENOSPC: i32 = 28;
    match error.raw_os_error() {
        Some(EMFILE) => Some(ResourceLimit::Instances),
        Some(ENOSPC) => Some(ResourceLimit::Watches),
        _ => None,
    }
}

#[cfg(not(unix))]
fn io_resource_limit(_error: &std::io::Error) -> Option<ResourceLimit> {
    None
}

fn map_error(error: notify::Error, path: Option<&Path>) -> FileEventsError {
    let limit = match &error.kind {
        ErrorKind::MaxFilesWatch => Some(ResourceLimit::Watches),
        ErrorKind::Io(io) => io_resource_limit(io),
        _ => None,
    };

    match (limit, path) {
        (Some(ResourceLimit::Instances), _) => {
            FileEventsError::instance_limit(format!("Inotify instance limit too low: {error}"))
        }
        (Some(ResourceLimit::Watches), _) => {
            FileEventsError::watches_limit(format!("Inotify watches limit too low: {error}"))
        }
        (None, Some(path)) => FileEventsError::WatchFailed {
            path: path.to_path_buf(),
            reason: error.to_string(),
        },
        (None, None) => FileEventsError::bridge(error.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use notify::event::{AccessKind, CreateKind, DataChange, Flag, RemoveKind};
    use std::path::PathBuf;

    fn event(kind: EventKind, paths: &[&str]) -> Event {
        paths
            .iter()
            .fold(Event::new(kind), |event, path| event.add_path(PathBuf::from(path)))
    }

    #[test]
    fn test_translate_basic_kinds() {
        let created = event(EventKind::Create(CreateKind::File), &["/w/a"]);
        assert_eq!(
            translate(&created),
            vec![WatchEvent::change(ChangeType::Created, "/w/a")]
        );

        let removed = event(EventKind::Remove(RemoveKind::Any), &["/w/a"]);
        assert_eq!(
            translate(&removed),
            vec![WatchEvent::change(ChangeType::Removed, "/w/a")]
        );

        let modified = event(
            EventKind::Modify(ModifyKind::Data(DataChange::Content)),
            &["/w/a"],
        );
        assert_eq!(
            translate(&modified),
            vec![WatchEvent::change(ChangeType::Modified, "/w/a")]
        );

        let access = event(EventKind::Access(AccessKind::Any), &["/w/a"]);
        assert!(translate(&access).is_empty());

        let other = event(EventKind::Other, &["/w/a"]);
        assert_eq!(
            translate(&other),
            vec![WatchEvent::Unknown {
                path: PathBuf::from("/w/a")
            }]
        );
    }

    #[test]
    fn test_translate_renames() {
        let from = event(EventKind::Modify(ModifyKind::Name(RenameMode::From)), &["/w/old"]);
        assert_eq!(
            translate(&from),
            vec![WatchEvent::change(ChangeType::Removed, "/w/old")]
        );

        let to = event(EventKind::Modify(ModifyKind::Name(RenameMode::To)), &["/w/new"]);
        assert_eq!(
            translate(&to),
            vec![WatchEvent::change(ChangeType::Created, "/w/new")]
        );

        // The pairing event repeats what From and To already reported
        let both = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Both)),
            &["/w/old", "/w/new"],
        );
        assert!(translate(&both).is_empty());

        // Unpaired rename of a path that no longer exists
        let any = event(
            EventKind::Modify(ModifyKind::Name(RenameMode::Any)),
            &["/definitely/not/here"],
        );
        assert_eq!(
            translate(&any),
            vec![WatchEvent::change(ChangeType::Removed, "/definitely/not/here")]
        );
    }

    #[test]
    fn test_translate_rescan() {
        let scoped = event(EventKind::Other, &["/w/dir"]).set_flag(Flag::Rescan);
        assert_eq!(
            translate(&scoped),
            vec![WatchEvent::change(ChangeType::Invalidated, "/w/dir")]
        );

        let unscoped = Event::new(EventKind::Other).set_flag(Flag::Rescan);
        assert_eq!(
            translate(&unscoped),
            vec![WatchEvent::Overflow {
                kind: OverflowType::OperatingSystem,
                path: None
            }]
        );
    }

    #[test]
    fn test_map_error_resource_limits() {
        let max = map_error(notify::Error::new(ErrorKind::MaxFilesWatch), None);
        assert_eq!(max.resource_limit(), Some(ResourceLimit::Watches));

        let missing = map_error(
            notify::Error::path_not_found(),
            Some(Path::new("/missing")),
        );
        assert!(matches!(missing, FileEventsError::WatchFailed { .. }));

        let generic = map_error(notify::Error::generic("boom"), None);
        assert_eq!(generic.category(), crate::ErrorCategory::Bridge);
    }

    #[cfg(unix)]
    #[test]
    fn test_map_error_os_codes() {
        let emfile = notify::Error::io(std::io::Error::from_raw_os_error(24));
        assert_eq!(
            map_error(emfile, None).resource_limit(),
            Some(ResourceLimit::Instances)
        );

        let enospc = notify::Error::io(std::io::Error::from_raw_os_error(28));
        assert_eq!(
            map_error(enospc, Some(Path::new("/w"))).resource_limit(),
            Some(ResourceLimit::Watches)
        );
    }

    #[test]
    fn test_async_path_loss_is_overflow_not_failure() {
        let (sink, mut queue) = EventSink::channel(4);
        let levels = LogLevelCache::new();

        handle_async_error(
            &sink,
            &levels,
            notify::Error::new(ErrorKind::MaxFilesWatch).add_path(PathBuf::from("/w")),
        );
        assert!(!sink.is_closed());

        handle_async_error(&sink, &levels, notify::Error::generic("backend died"));
        assert!(sink.is_closed());

        assert_eq!(
            queue.recv(),
            Some(WatchEvent::Overflow {
                kind: OverflowType::OperatingSystem,
                path: Some(PathBuf::from("/w")),
            })
        );
        assert!(matches!(queue.recv(), Some(WatchEvent::Failure { .. })));
    }
}
