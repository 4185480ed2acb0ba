//! Watch registrar
//!
//! Keeps at most one filesystem subscription per directory. Several
//! dependency files living in the same directory share that subscription.
//! Subscriptions stay open for the lifetime of the backend; their number is
//! bounded by the number of distinct dependency directories, not by
//! traffic.
//!
//! Events are not debounced. Every event for a script file turns into one
//! call of the change handler.

use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use dirhost_foundation::{normalize_path, HostError, HostResult};
use notify::{event::ModifyKind, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use parking_lot::Mutex;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::SystemTime;
use tracing::{debug, trace, warn};

/// Kind of change reported by a watch backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchEventKind {
    Created,
    Modified,
    Removed,
    Renamed,
}

/// Change inside a watched directory
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WatchEvent {
    pub kind: WatchEventKind,
    /// Path of the changed file relative to the watched directory
    pub file_name: String,
}

/// Receiver for the raw events of one subscription
pub type WatchSink = Arc<dyn Fn(WatchEvent) + Send + Sync>;

/// Called with the full path of a changed script file
pub type ChangeHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Source of recursive, persistent directory subscriptions
pub trait WatchBackend: Send + Sync {
    /// Start delivering events for everything under `directory` to `sink`
    fn subscribe(&self, directory: &Path, sink: WatchSink) -> HostResult<()>;
}

/// Deduplicates subscriptions per directory and filters their events
pub struct WatchRegistrar {
    backend: Arc<dyn WatchBackend>,
    /// Lowercased suffix including the dot, e.g. `.js`
    suffix: String,
    /// Watched directory → when the subscription was opened
    watched: DashMap<String, SystemTime>,
}

impl WatchRegistrar {
    pub fn new(backend: Arc<dyn WatchBackend>, script_extension: &str) -> Self {
        Self {
            backend,
            suffix: format!(".{}", script_extension.trim_start_matches('.').to_lowercase()),
            watched: DashMap::new(),
        }
    }

    /// Make sure `directory` is watched
    ///
    /// Returns `true` when a new subscription was opened and `false` when the
    /// directory was already covered. A failed subscription is not recorded,
    /// so a later call tries again.
    pub fn ensure_watch(&self, directory: &str, on_change: ChangeHandler) -> HostResult<bool> {
        let directory = normalize_path(directory);

        match self.watched.entry(directory.clone()) {
            Entry::Occupied(_) => {
                trace!(directory = %directory, "Directory already watched");
                return Ok(false);
            }
            Entry::Vacant(slot) => {
                slot.insert(SystemTime::now());
            }
        }

        // The shard lock is released here; backends may deliver events from
        // inside `subscribe`
        let sink = self.filter(directory.clone(), on_change);
        if let Err(err) = self.backend.subscribe(Path::new(&directory), sink) {
            self.watched.remove(&directory);
            return Err(err);
        }

        debug!(directory = %directory, "Watching directory for changes");
        Ok(true)
    }

    /// Wrap a change handler so it only sees script files, as full paths
    fn filter(&self, directory: String, on_change: ChangeHandler) -> WatchSink {
        let suffix = self.suffix.clone();
        Arc::new(move |event: WatchEvent| {
            if !event.file_name.to_lowercase().ends_with(&suffix) {
                trace!(file = %event.file_name, "Ignoring non-script change");
                return;
            }
            let full_path = normalize_path(format!("{}/{}", directory, event.file_name));
            debug!(path = %full_path, kind = ?event.kind, "Script changed");
            on_change(full_path);
        })
    }

    pub fn is_watched(&self, directory: &str) -> bool {
        self.watched.contains_key(&normalize_path(directory))
    }

    /// Every watched directory, sorted
    pub fn watched_directories(&self) -> Vec<String> {
        let mut dirs: Vec<String> = self.watched.iter().map(|e| e.key().clone()).collect();
        dirs.sort();
        dirs
    }

    pub fn len(&self) -> usize {
        self.watched.len()
    }

    pub fn is_empty(&self) -> bool {
        self.watched.is_empty()
    }
}

/// Watch backend on top of the platform's native file watcher
#[derive(Default)]
pub struct NotifyBackend {
    /// Dropping a watcher ends its subscription, so they are kept here
    watchers: Mutex<Vec<RecommendedWatcher>>,
}

impl NotifyBackend {
    pub fn new() -> Self {
        Self::default()
    }
}

impl WatchBackend for NotifyBackend {
    fn subscribe(&self, directory: &Path, sink: WatchSink) -> HostResult<()> {
        let label = directory.display().to_string();
        let base = directory.to_path_buf();
        // Platform watchers may report resolved paths (/private/var vs /var)
        let canonical_base = std::fs::canonicalize(directory).unwrap_or_else(|_| base.clone());

        let mut watcher =
            notify::recommended_watcher(move |res: Result<Event, notify::Error>| match res {
                Ok(event) => {
                    for change in translate_event(&event, &base, &canonical_base) {
                        sink(change);
                    }
                }
                Err(err) => warn!(error = %err, "File watcher reported an error"),
            })
            .map_err(|e| HostError::watch(label.clone(), e))?;

        watcher
            .watch(directory, RecursiveMode::Recursive)
            .map_err(|e| HostError::watch(label, e))?;

        self.watchers.lock().push(watcher);
        Ok(())
    }
}

/// Turn a notify event into relative-path watch events
fn translate_event(event: &Event, base: &Path, canonical_base: &Path) -> Vec<WatchEvent> {
    let kind = match event.kind {
        EventKind::Create(_) => WatchEventKind::Created,
        EventKind::Modify(ModifyKind::Name(_)) => WatchEventKind::Renamed,
        EventKind::Modify(_) => WatchEventKind::Modified,
        EventKind::Remove(_) => WatchEventKind::Removed,
        _ => return Vec::new(),
    };

    event
        .paths
        .iter()
        .filter_map(|path| relative_name(path, base, canonical_base))
        .map(|file_name| WatchEvent { kind, file_name })
        .collect()
}

fn relative_name(path: &Path, base: &Path, canonical_base: &Path) -> Option<String> {
    let relative: PathBuf = path
        .strip_prefix(base)
        .or_else(|_| path.strip_prefix(canonical_base))
        .map(Path::to_path_buf)
        .ok()
        .or_else(|| path.file_name().map(PathBuf::from))?;

    let name = relative.to_string_lossy().replace('\\', "/");
    (!name.is_empty()).then_some(name)
}
