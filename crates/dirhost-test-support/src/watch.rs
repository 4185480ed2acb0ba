//! Watch backend that records subscriptions and replays synthetic events

use dirhost_cache::{WatchBackend, WatchEvent, WatchEventKind, WatchSink};
use dirhost_foundation::{normalize_path, HostError, HostResult};
use parking_lot::Mutex;
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// In-memory [`WatchBackend`]
///
/// Counts every `subscribe` call per directory and lets tests push events
/// through the installed sinks without touching the filesystem.
#[derive(Default)]
pub struct RecordingWatchBackend {
    sinks: Mutex<HashMap<String, Vec<WatchSink>>>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
}

impl RecordingWatchBackend {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make future subscriptions for `directory` fail
    pub fn fail_on(&self, directory: &str) {
        self.failing.lock().insert(normalize_path(directory));
    }

    /// Number of subscriptions opened for `directory`
    pub fn subscription_count(&self, directory: &str) -> usize {
        let key = normalize_path(directory);
        self.calls.lock().iter().filter(|d| **d == key).count()
    }

    /// Number of subscriptions opened overall
    pub fn total_subscriptions(&self) -> usize {
        self.calls.lock().len()
    }

    /// Deliver an event to every sink installed for `directory`
    ///
    /// Returns how many sinks received it.
    pub fn emit(&self, directory: &str, kind: WatchEventKind, file_name: &str) -> usize {
        let key = normalize_path(directory);
        // Sinks run without the lock held; they may subscribe again
        let sinks = self.sinks.lock().get(&key).cloned().unwrap_or_default();
        for sink in &sinks {
            sink(WatchEvent {
                kind,
                file_name: file_name.to_string(),
            });
        }
        sinks.len()
    }

    /// Deliver a modification event for an absolute file path
    ///
    /// The event goes to the watched directory that contains the file, the
    /// same way a recursive subscription would report it.
    pub fn touch(&self, file: &str) -> usize {
        let file = normalize_path(file);
        let watched: Vec<String> = self.sinks.lock().keys().cloned().collect();
        watched
            .iter()
            .filter_map(|dir| {
                let relative = file.strip_prefix(dir.as_str())?.strip_prefix('/')?;
                Some((dir.clone(), relative.to_string()))
            })
            .map(|(dir, relative)| self.emit(&dir, WatchEventKind::Modified, &relative))
            .sum()
    }
}

impl WatchBackend for RecordingWatchBackend {
    fn subscribe(&self, directory: &Path, sink: WatchSink) -> HostResult<()> {
        let key = normalize_path(directory);
        if self.failing.lock().contains(&key) {
            return Err(HostError::watch(key, "simulated subscription failure"));
        }
        self.calls.lock().push(key.clone());
        self.sinks.lock().entry(key).or_default().push(sink);
        Ok(())
    }
}
