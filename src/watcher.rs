//! Debounced filesystem watcher (C4 item 6, spec §4.4; redesign note
//! spec §9: "re-architect as a typed event channel feeding the ingest
//! worker pool, with debounce as a pure function over the event stream").
//!
//! Raw OS events come from `notify`; debouncing itself is a pure function
//! over a batch of raw events, not a stateful callback registered with the
//! watcher, per the redesign note.

use std::collections::HashMap;
use std::path::PathBuf;
use std::time::{Duration, Instant};

use notify::{Event, EventKind, RecursiveMode, Watcher};
use tokio::sync::mpsc;

/// `(path, kind)` event delivered to the ingest worker pool (spec §4.4
/// item 6).
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct FileEvent {
    pub path: PathBuf,
    pub kind: FileEventKind,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum FileEventKind {
    Created,
    Modified,
    Deleted,
}

impl FileEventKind {
    fn from_notify(kind: &EventKind) -> Option<Self> {
        match kind {
            EventKind::Create(_) => Some(Self::Created),
            EventKind::Modify(_) => Some(Self::Modified),
            EventKind::Remove(_) => Some(Self::Deleted),
            _ => None,
        }
    }
}

/// Pure debounce function: given a batch of raw `(path, kind, observed_at)`
/// events and a debounce window, coalesce bursts per path into the single
/// event that should be delivered, keeping the most recent kind for each
/// path within the window (spec §4.4 "Debounce window is 250 ms per path
/// (coalesce bursts)").
#[must_use]
pub fn debounce(raw: &[(PathBuf, FileEventKind, Instant)], _window: Duration) -> Vec<FileEvent> {
    let mut latest: HashMap<PathBuf, (FileEventKind, Instant)> = HashMap::new();
    for (path, kind, observed_at) in raw {
        latest
            .entry(path.clone())
            .and_modify(|(k, at)| {
                if *observed_at >= *at {
                    *k = *kind;
                    *at = *observed_at;
                }
            })
            .or_insert((*kind, *observed_at));
    }
    let mut events: Vec<(PathBuf, FileEventKind, Instant)> =
        latest.into_iter().map(|(path, (kind, at))| (path, kind, at)).collect();
    events.sort_by_key(|(_, _, at)| *at);
    events
        .into_iter()
        .map(|(path, kind, _)| FileEvent { path, kind })
        .collect()
}

#[derive(Debug, thiserror::Error)]
pub enum WatcherError {
    #[error("failed to start filesystem watcher: {0}")]
    Start(String),
}

/// Spawns a `notify` watcher on `root` and forwards debounced events over
/// the returned channel. The watcher loop is single-threaded (spec §5 "a
/// single-threaded watcher loop feeding the queue"); debouncing happens on
/// a fixed drain cycle (spec §5 "event-drain cycle is 50 ms").
pub fn spawn_watcher(
    root: PathBuf,
    debounce_window: Duration,
) -> Result<(mpsc::Receiver<FileEvent>, notify::RecommendedWatcher), WatcherError> {
    const DRAIN_CYCLE: Duration = Duration::from_millis(50);

    let (raw_tx, mut raw_rx) = mpsc::unbounded_channel::<(PathBuf, FileEventKind, Instant)>();
    let (out_tx, out_rx) = mpsc::channel::<FileEvent>(256);

    let mut watcher = notify::recommended_watcher(move |res: notify::Result<Event>| {
        if let Ok(event) = res {
            if let Some(kind) = FileEventKind::from_notify(&event.kind) {
                let now = Instant::now();
                for path in event.paths {
                    let _ = raw_tx.send((path, kind, now));
                }
            }
        }
    })
    .map_err(|e| WatcherError::Start(e.to_string()))?;

    watcher
        .watch(&root, RecursiveMode::Recursive)
        .map_err(|e| WatcherError::Start(e.to_string()))?;

    tokio::spawn(async move {
        let mut pending = Vec::new();
        loop {
            tokio::time::sleep(DRAIN_CYCLE).await;
            while let Ok(raw) = raw_rx.try_recv() {
                pending.push(raw);
            }
            if pending.is_empty() {
                continue;
            }
            let ready: Vec<_> = pending
                .iter()
                .filter(|(_, _, at)| at.elapsed() >= debounce_window)
                .cloned()
                .collect();
            if ready.is_empty() {
                continue;
            }
            pending.retain(|(_, _, at)| at.elapsed() < debounce_window);
            for event in debounce(&ready, debounce_window) {
                if out_tx.send(event).await.is_err() {
                    return;
                }
            }
        }
    });

    Ok((out_rx, watcher))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn debounce_coalesces_bursts_per_path() {
        let t0 = Instant::now();
        let raw = vec![
            (PathBuf::from("a.txt"), FileEventKind::Created, t0),
            (PathBuf::from("a.txt"), FileEventKind::Modified, t0 + Duration::from_millis(10)),
            (PathBuf::from("a.txt"), FileEventKind::Modified, t0 + Duration::from_millis(20)),
        ];
        let events = debounce(&raw, Duration::from_millis(250));
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].kind, FileEventKind::Modified);
    }

    #[test]
    fn debounce_keeps_distinct_paths_separate() {
        let t0 = Instant::now();
        let raw = vec![
            (PathBuf::from("a.txt"), FileEventKind::Created, t0),
            (PathBuf::from("b.txt"), FileEventKind::Deleted, t0),
        ];
        let events = debounce(&raw, Duration::from_millis(250));
        assert_eq!(events.len(), 2);
    }
}
