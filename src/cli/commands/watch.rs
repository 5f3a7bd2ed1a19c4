//! Watch command: print events for a set of paths.

use std::path::PathBuf;
use std::time::{Duration, Instant};

use anyhow::Context;
use serde::Serialize;

use crate::bridge::FileEvents;
use crate::config::Settings;
use crate::event::{ChannelHandler, EventStream, WatchEvent};
use crate::watcher::FileWatcher;

/// Poll interval while waiting for events without a deadline.
const IDLE_POLL: Duration = Duration::from_millis(500);

#[derive(Debug, Serialize)]
struct EventRecord {
    event: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    kind: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    path: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

fn constant_name<T: Serialize>(value: &T) -> Option<String> {
    serde_json::to_value(value)
        .ok()
        .and_then(|v| v.as_str().map(str::to_string))
}

impl From<&WatchEvent> for EventRecord {
    fn from(event: &WatchEvent) -> Self {
        let path = event.path().map(|p| p.display().to_string());
        match event {
            WatchEvent::Change { kind, .. } => EventRecord {
                event: "change",
                kind: constant_name(kind),
                path,
                error: None,
            },
            WatchEvent::Unknown { .. } => EventRecord {
                event: "unknown",
                kind: None,
                path,
                error: None,
            },
            WatchEvent::Overflow { kind, .. } => EventRecord {
                event: "overflow",
                kind: constant_name(kind),
                path,
                error: None,
            },
            WatchEvent::Failure { error } => EventRecord {
                event: "failure",
                kind: None,
                path: None,
                error: Some(error.to_string()),
            },
            WatchEvent::Terminated => EventRecord {
                event: "terminated",
                kind: None,
                path: None,
                error: None,
            },
        }
    }
}

fn format_event(event: &WatchEvent, json: bool) -> anyhow::Result<String> {
    let record = EventRecord::from(event);
    if json {
        return Ok(serde_json::to_string(&record)?);
    }
    let mut line = record.event.to_string();
    for part in [record.kind, record.path, record.error].into_iter().flatten() {
        line.push(' ');
        line.push_str(&part);
    }
    Ok(line)
}

/// Resolve relative arguments against the current directory.
fn absolute_paths(paths: &[PathBuf]) -> anyhow::Result<Vec<PathBuf>> {
    paths
        .iter()
        .map(|p| {
            std::path::absolute(p).with_context(|| format!("Invalid path {}", p.display()))
        })
        .collect()
}

/// Print events until `deadline` passes or the stream ends. Returns whether
/// the terminal event was seen.
fn print_until(
    stream: &mut EventStream,
    deadline: Option<Instant>,
    json: bool,
) -> anyhow::Result<bool> {
    loop {
        let wait = match deadline {
            Some(deadline) => match deadline.checked_duration_since(Instant::now()) {
                Some(remaining) if !remaining.is_zero() => remaining,
                _ => return Ok(false),
            },
            None => IDLE_POLL,
        };
        if let Some(event) = stream.next_timeout(wait) {
            println!("{}", format_event(&event, json)?);
            if event.is_terminal() {
                return Ok(true);
            }
        }
    }
}

/// Run watch command.
pub fn run_watch(
    settings: &Settings,
    paths: &[PathBuf],
    timeout: Option<u64>,
    json: bool,
    recursive: bool,
) -> anyhow::Result<()> {
    let paths = absolute_paths(paths)?;
    let events = FileEvents::init().context("Failed to initialize file events")?;

    let mut watcher_settings = settings.watcher.clone();
    watcher_settings.recursive |= recursive;

    let (handler, mut stream) = ChannelHandler::new();
    let mut watcher = FileWatcher::new(&events, watcher_settings, handler);
    watcher.initialize(settings.watcher.start_timeout())?;
    watcher.start_watching(&paths)?;

    eprintln!(
        "Watching {} path(s) with the {} engine",
        paths.len(),
        events.engine_name()
    );

    let deadline = timeout.map(|secs| Instant::now() + Duration::from_secs(secs));
    if print_until(&mut stream, deadline, json)? {
        // The engine ended the stream on its own
        return Ok(());
    }

    watcher.shutdown()?;
    let termination_deadline = Instant::now() + settings.watcher.termination_timeout();
    print_until(&mut stream, Some(termination_deadline), json)?;

    if !watcher.await_termination(Duration::ZERO)? {
        anyhow::bail!(
            "Watcher did not terminate within {:?}",
            settings.watcher.termination_timeout()
        );
    }
    Ok(())
}
