//! Module cache coordinator
//!
//! Owns the instance cache, the dependency graph and the watch registrar
//! for one running host. Loading an application snapshots the runtime's
//! module table before and after the load; every key that appeared is
//! treated as part of the application's co-load group, linked in the graph
//! and covered by a directory watch. A change event for any of those files
//! walks the graph and evicts everything reachable from it, so the next
//! request for the affected directories loads them from scratch.
//!
//! Each invalidation walk runs under the state lock from start to finish;
//! no reader can observe a half-invalidated cache. Walks requested while a
//! load is diffing the module table are queued and run as soon as that load
//! has stored its record, so a walk never evicts keys out of a diff.

use crate::graph::DependencyGraph;
use crate::instances::{CacheRecord, InstanceCache};
use crate::runtime::{AppInstance, ModuleRuntime};
use crate::watch::{ChangeHandler, WatchBackend, WatchRegistrar};
use dashmap::DashMap;
use dirhost_config::logging::directory_span;
use dirhost_config::CacheConfig;
use dirhost_foundation::{
    containing_directory, is_within, normalize_path, resolve_against, HostError, HostResult,
};
use futures::future::join_all;
use parking_lot::Mutex;
use std::collections::{BTreeSet, HashSet};
use std::path::Path;
use std::sync::{Arc, Weak};
use std::time::SystemTime;
use tracing::{debug, info, trace, warn};

/// What one invalidation walk touched
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InvalidationReport {
    /// Every path the walk processed, in visiting order
    pub visited: Vec<String>,
    /// Module table keys that were removed
    pub evicted_modules: Vec<String>,
    /// Instance cache directories that were removed
    pub evicted_records: Vec<String>,
    /// The walk was queued behind a running load instead of running now
    pub deferred: bool,
}

impl InvalidationReport {
    pub fn is_empty(&self) -> bool {
        self.evicted_modules.is_empty() && self.evicted_records.is_empty()
    }
}

/// Outcome of a successful `stop_all`
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StopReport {
    /// Directories whose instance was stopped
    pub stopped: Vec<String>,
    /// Directories whose instance has no teardown hook
    pub skipped: Vec<String>,
}

/// Cache statistics for monitoring and debugging
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CacheStats {
    pub hits: u64,
    pub misses: u64,
    pub loads: u64,
    /// Invalidation walks started
    pub invalidations: u64,
    /// Module entries plus instance records removed by walks
    pub evictions: u64,
    pub records: usize,
    pub watched_directories: usize,
    pub graph_entries: usize,
}

/// Walks held back while a load diffs the module table
#[derive(Default)]
struct PendingWalks {
    loading: bool,
    paths: Vec<String>,
}

#[derive(Default)]
struct CacheState {
    instances: InstanceCache,
    graph: DependencyGraph,
}

struct CacheInner {
    config: CacheConfig,
    document_root: String,
    exclude_prefix: Option<String>,
    runtime: Arc<dyn ModuleRuntime>,
    registrar: WatchRegistrar,
    state: Mutex<CacheState>,
    /// Serializes loads so module table diffs never overlap
    load_guard: Mutex<()>,
    /// Held for the whole of every walk; lock order is pending, then state
    pending: Mutex<PendingWalks>,
    stats: DashMap<&'static str, u64>,
}

/// Directory application cache with dependency-aware hot invalidation
///
/// Cloning is cheap and every clone shares the same state. Application
/// factories run while the load lock is held and must not call back into
/// the cache.
#[derive(Clone)]
pub struct ModuleCache {
    inner: Arc<CacheInner>,
}

impl ModuleCache {
    /// Create the cache for one host
    pub fn new(
        config: CacheConfig,
        runtime: Arc<dyn ModuleRuntime>,
        watch_backend: Arc<dyn WatchBackend>,
    ) -> Self {
        let document_root = normalize_path(&config.document_root);
        let exclude_prefix = config.exclude_prefix.as_ref().map(|p| normalize_path(p));
        let registrar = WatchRegistrar::new(watch_backend, &config.script_extension);

        debug!(
            document_root = %document_root,
            dev_mode = config.dev_mode,
            "ModuleCache initialized"
        );

        Self {
            inner: Arc::new(CacheInner {
                config,
                document_root,
                exclude_prefix,
                runtime,
                registrar,
                state: Mutex::new(CacheState::default()),
                load_guard: Mutex::new(()),
                pending: Mutex::new(PendingWalks::default()),
                stats: DashMap::new(),
            }),
        }
    }

    pub fn config(&self) -> &CacheConfig {
        &self.inner.config
    }

    /// Normalized document root
    pub fn document_root(&self) -> &str {
        &self.inner.document_root
    }

    /// Exact-key lookup of a directory record
    pub fn get_record(&self, full_path: &str) -> Option<CacheRecord> {
        let key = normalize_path(full_path);
        self.inner.state.lock().instances.get(&key).cloned()
    }

    /// Insert or overwrite the record for `full_path`
    pub fn set_record(
        &self,
        instance: Arc<dyn AppInstance>,
        script_modified_time: Option<SystemTime>,
        script_path: &str,
        full_path: &str,
    ) -> &Self {
        let record = CacheRecord {
            instance,
            script_modified_time,
            script_path: normalize_path(script_path),
            directory_full_path: normalize_path(full_path),
        };
        if let Some(old) = self.inner.state.lock().instances.insert(record) {
            trace!(directory = %old.directory_full_path, "Replaced cached record");
        }
        self
    }

    /// First cached record among `candidates`, resolved against the document root
    ///
    /// Lets a nested request path fall back to the nearest ancestor
    /// application when none is registered at the requested depth.
    pub fn find_ancestor_index_record<P: AsRef<Path>>(&self, candidates: &[P]) -> Option<CacheRecord> {
        let state = self.inner.state.lock();
        candidates
            .iter()
            .map(|candidate| resolve_against(&self.inner.document_root, candidate))
            .find_map(|key| state.instances.get(&key).cloned())
    }

    /// Cached record for `directory`, loading it on a miss
    ///
    /// `index_names` overrides the configured entry-script candidates. The
    /// first candidate the runtime can load is used.
    pub fn get_or_load(&self, directory: &str, index_names: Option<&[String]>) -> HostResult<CacheRecord> {
        let key = resolve_against(&self.inner.document_root, directory);

        if let Some(record) = self.get_record(&key) {
            self.inner.increment_stat("hits");
            trace!(directory = %key, "Cache hit");
            return Ok(record);
        }
        self.inner.increment_stat("misses");
        debug!(directory = %key, "Cache miss");

        let names = index_names.unwrap_or(self.inner.config.index_names.as_slice());
        let script = names
            .iter()
            .map(|name| resolve_against(&key, name))
            .find(|script| self.inner.runtime.exists(script))
            .ok_or_else(|| {
                HostError::not_found(format!(
                    "index script ({}) in '{}'",
                    names.join(", "),
                    key
                ))
            })?;

        self.load_app(&key, &script)
    }

    /// Load `script_path` as the application for `directory`
    ///
    /// Records the co-load group, watches the directories of everything that
    /// was loaded and stores the new record. Nothing is recorded when the
    /// load or a watch subscription fails, and the keys the attempt added to
    /// the module table are evicted again.
    ///
    /// Change events that arrive while the load runs are applied once it has
    /// finished, so the returned record may already have been evicted.
    pub fn load_app(&self, directory: &str, script_path: &str) -> HostResult<CacheRecord> {
        let inner = &self.inner;
        let directory = normalize_path(directory);
        let script_path = normalize_path(script_path);
        let _span = directory_span(&directory).entered();
        let _load = inner.load_guard.lock();

        inner.pending.lock().loading = true;
        let result = inner.load_locked(&directory, &script_path);
        let queued = {
            let mut pending = inner.pending.lock();
            pending.loading = false;
            std::mem::take(&mut pending.paths)
        };

        for path in queued {
            debug!(path = %path, "Running invalidation queued during load");
            inner.handle_change(&path);
        }

        result
    }

    /// Invalidation walk starting at `path`
    ///
    /// Paths already in `visited` are skipped; every path reached is added to
    /// it. Each reached path loses its module table entry, its instance
    /// record and its graph entry.
    ///
    /// While a load is running the walk is queued instead and the returned
    /// report is empty with `deferred` set.
    pub fn invalidate(&self, path: &str, visited: &mut HashSet<String>) -> InvalidationReport {
        self.inner.invalidate(&normalize_path(path), visited)
    }

    /// Fresh invalidation walk for a changed file
    pub fn handle_change(&self, path: &str) -> InvalidationReport {
        self.inner.handle_change(path)
    }

    /// Drop every instance record; dependency data and watches stay
    pub fn clear_all(&self) {
        let mut state = self.inner.state.lock();
        let count = state.instances.len();
        state.instances.clear();
        debug!("Cleared {} cached directory applications", count);
    }

    /// Stop every instance that has a teardown hook
    ///
    /// All teardowns run concurrently, each bounded by the configured stop
    /// timeout, and every one of them settles before this returns. Stopped
    /// instances lose their module table entry. Instances without a hook
    /// are skipped. Failures and timeouts are collected into one
    /// [`HostError::Teardown`].
    pub async fn stop_all(&self) -> HostResult<StopReport> {
        let inner = &self.inner;
        let records = inner.state.lock().instances.records();
        let limit = inner.config.stop_timeout();

        let mut report = StopReport::default();
        let mut pending = Vec::new();
        for record in records {
            if record.instance.can_stop() {
                pending.push(async move {
                    let outcome = tokio::time::timeout(limit, record.instance.stop()).await;
                    (record, outcome)
                });
            } else {
                report.skipped.push(record.directory_full_path);
            }
        }

        let mut failures = Vec::new();
        for (record, outcome) in join_all(pending).await {
            inner.evict_module(&record.script_path);
            let directory = record.directory_full_path;
            match outcome {
                Ok(Ok(())) => {
                    debug!(directory = %directory, "Stopped application");
                    report.stopped.push(directory);
                }
                Ok(Err(err)) => {
                    warn!(directory = %directory, error = %err, "Application teardown failed");
                    failures.push((directory, format!("{:#}", err)));
                }
                Err(_) => {
                    warn!(
                        directory = %directory,
                        timeout = ?limit,
                        "Application teardown timed out"
                    );
                    failures.push((directory, format!("timed out after {:?}", limit)));
                }
            }
        }

        if failures.is_empty() {
            Ok(report)
        } else {
            Err(HostError::teardown(failures))
        }
    }

    /// Stop every instance, then drop all records
    pub async fn shutdown(&self) -> HostResult<StopReport> {
        let result = self.stop_all().await;
        self.clear_all();
        info!("Module cache shut down");
        result
    }

    /// Record a co-load group that was loaded outside [`ModuleCache::load_app`]
    pub fn record_co_load(&self, required_by: &str, loaded: &[String]) {
        let loaded: Vec<String> = loaded.iter().map(|p| normalize_path(p)).collect();
        self.inner
            .state
            .lock()
            .graph
            .record_co_load(&normalize_path(required_by), &loaded);
    }

    /// Dependents recorded for `path`
    pub fn dependents_of(&self, path: &str) -> Option<BTreeSet<String>> {
        let key = normalize_path(path);
        self.inner.state.lock().graph.dependents_of(&key).cloned()
    }

    /// Every cached record, ordered by directory
    pub fn records(&self) -> Vec<CacheRecord> {
        self.inner.state.lock().instances.records()
    }

    pub fn watched_directories(&self) -> Vec<String> {
        self.inner.registrar.watched_directories()
    }

    pub fn stats(&self) -> CacheStats {
        let state = self.inner.state.lock();
        CacheStats {
            hits: self.inner.get_stat("hits"),
            misses: self.inner.get_stat("misses"),
            loads: self.inner.get_stat("loads"),
            invalidations: self.inner.get_stat("invalidations"),
            evictions: self.inner.get_stat("evictions"),
            records: state.instances.len(),
            watched_directories: self.inner.registrar.len(),
            graph_entries: state.graph.len(),
        }
    }
}

impl CacheInner {
    /// Diffing load; the caller holds the load lock and has marked the load as running
    fn load_locked(self: &Arc<Self>, directory: &str, script_path: &str) -> HostResult<CacheRecord> {
        let before = self.runtime.loaded_keys();
        let loaded = self.runtime.load(script_path);
        let after = self.runtime.loaded_keys();
        let added: Vec<String> = after.difference(&before).cloned().collect();

        let instance = match loaded {
            Ok(instance) => instance,
            Err(err) => {
                warn!(script = %script_path, error = %err, "Application failed to load");
                self.discard(&added);
                return Err(err);
            }
        };

        let dependencies = self.dependencies_from(added.iter());
        let handler = self.change_handler();
        let directories: BTreeSet<String> =
            dependencies.iter().map(|dep| containing_directory(dep)).collect();

        for dir in &directories {
            if let Err(err) = self.registrar.ensure_watch(dir, handler.clone()) {
                warn!(directory = %dir, error = %err, "Could not watch dependency directory");
                self.discard(&added);
                return Err(err);
            }
        }

        let record = CacheRecord {
            instance,
            script_modified_time: self.runtime.modified_time(script_path),
            script_path: script_path.to_string(),
            directory_full_path: directory.to_string(),
        };

        {
            let mut state = self.state.lock();
            state.graph.record_co_load(directory, &dependencies);
            state.instances.insert(record.clone());
        }
        self.increment_stat("loads");

        info!(
            script = %script_path,
            dependencies = dependencies.len(),
            watched = directories.len(),
            "Loaded directory application"
        );

        Ok(record)
    }

    fn handle_change(&self, path: &str) -> InvalidationReport {
        let mut visited = HashSet::new();
        let report = self.invalidate(&normalize_path(path), &mut visited);
        if !report.deferred {
            debug!(
                path = %path,
                visited = report.visited.len(),
                evicted_records = report.evicted_records.len(),
                "Invalidation walk finished"
            );
        }
        report
    }

    fn invalidate(&self, path: &str, visited: &mut HashSet<String>) -> InvalidationReport {
        let mut pending = self.pending.lock();
        if pending.loading {
            debug!(path = %path, "Load in progress, queueing invalidation");
            pending.paths.push(path.to_string());
            return InvalidationReport {
                deferred: true,
                ..InvalidationReport::default()
            };
        }

        self.increment_stat("invalidations");
        let mut report = InvalidationReport::default();
        let mut state = self.state.lock();
        self.walk(&mut state, path, visited, &mut report);
        report
    }

    fn walk(
        &self,
        state: &mut CacheState,
        path: &str,
        visited: &mut HashSet<String>,
        report: &mut InvalidationReport,
    ) {
        if !visited.insert(path.to_string()) {
            return;
        }
        report.visited.push(path.to_string());

        if self.evict_module(path) {
            report.evicted_modules.push(path.to_string());
        }

        if state.instances.remove(path).is_some() {
            self.increment_stat("evictions");
            self.log_cleared(path, "Cleared directory application");
            report.evicted_records.push(path.to_string());
        }

        // The entry goes before recursing so the walk cannot come back to it
        let Some(dependents) = state.graph.remove_entry(path) else {
            return;
        };
        for dependent in dependents {
            if !visited.contains(&dependent) {
                self.walk(state, &dependent, visited, report);
            }
        }
    }

    fn evict_module(&self, key: &str) -> bool {
        let removed = self.runtime.evict(key);
        if removed {
            self.increment_stat("evictions");
            self.log_cleared(key, "Cleared module cache entry");
        }
        removed
    }

    fn log_cleared(&self, path: &str, message: &'static str) {
        if self.config.dev_mode {
            info!(path = %path, "{}", message);
        } else {
            trace!(path = %path, "{}", message);
        }
    }

    /// New module keys that count as application dependencies
    fn dependencies_from<'a>(&self, added: impl Iterator<Item = &'a String>) -> Vec<String> {
        let loader = self.runtime.loader_key();
        added
            .filter(|key| loader.as_deref() != Some(key.as_str()))
            .filter(|key| match &self.exclude_prefix {
                Some(prefix) => !is_within(key, prefix),
                None => true,
            })
            .cloned()
            .collect()
    }

    /// Undo the module table side effects of a failed load
    fn discard(&self, added: &[String]) {
        for key in added {
            self.runtime.evict(key);
        }
    }

    /// Handler installed on every watch; holds the cache weakly
    fn change_handler(self: &Arc<Self>) -> ChangeHandler {
        let weak: Weak<CacheInner> = Arc::downgrade(self);
        Arc::new(move |path: String| {
            if let Some(inner) = weak.upgrade() {
                inner.handle_change(&path);
            }
        })
    }

    fn increment_stat(&self, key: &'static str) {
        self.stats.entry(key).and_modify(|e| *e += 1).or_insert(1);
    }

    fn get_stat(&self, key: &'static str) -> u64 {
        self.stats.get(key).map(|v| *v).unwrap_or(0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::runtime::RegistryRuntime;
    use crate::watch::WatchSink;
    use async_trait::async_trait;
    use std::path::PathBuf;

    struct NullBackend;

    impl WatchBackend for NullBackend {
        fn subscribe(&self, _directory: &Path, _sink: WatchSink) -> HostResult<()> {
            Ok(())
        }
    }

    struct Plain;

    #[async_trait]
    impl AppInstance for Plain {}

    fn cache_with(runtime: Arc<RegistryRuntime>, exclude: Option<&str>) -> ModuleCache {
        let config = CacheConfig {
            document_root: PathBuf::from("/site"),
            exclude_prefix: exclude.map(PathBuf::from),
            ..CacheConfig::default()
        };
        ModuleCache::new(config, runtime, Arc::new(NullBackend))
    }

    #[test]
    fn test_loader_and_excluded_keys_are_not_dependencies() {
        let runtime = Arc::new(RegistryRuntime::new());
        runtime.register_app(
            "/site/blog/index.js",
            &["/opt/host/helpers.js", "./render.js"],
            || Arc::new(Plain),
        );
        runtime.register_module("/opt/host/helpers.js", &[]);
        runtime.register_module("/site/blog/render.js", &[]);

        let cache = cache_with(runtime, Some("/opt/host"));
        cache.get_or_load("blog", None).unwrap();

        assert!(cache.dependents_of("/opt/host/helpers.js").is_none());
        assert!(cache.dependents_of("/site/blog/render.js").is_some());
        assert_eq!(cache.watched_directories(), vec!["/site/blog"]);
    }

    #[test]
    fn test_loader_key_is_skipped_when_it_appears_during_load() {
        let runtime = Arc::new(RegistryRuntime::with_loader_key("/opt/host/loader.js"));
        runtime.evict("/opt/host/loader.js");
        runtime.register_module("/opt/host/loader.js", &[]);
        runtime.register_app("/site/a/index.js", &["/opt/host/loader.js"], || Arc::new(Plain));

        let cache = cache_with(runtime, None);
        cache.get_or_load("/site/a", None).unwrap();

        assert!(cache.dependents_of("/opt/host/loader.js").is_none());
        assert!(cache.dependents_of("/site/a/index.js").is_some());
    }

    #[test]
    fn test_exclude_prefix_matches_whole_segments() {
        let runtime = Arc::new(RegistryRuntime::new());
        runtime.register_app(
            "/srv/app/index.js",
            &["./host.js", "/srv/app-lib/util.js"],
            || Arc::new(Plain),
        );
        runtime.register_module("/srv/app/host.js", &[]);
        runtime.register_module("/srv/app-lib/util.js", &[]);

        let cache = cache_with(runtime, Some("/srv/app"));
        cache.load_app("/srv/app", "/srv/app/index.js").unwrap();

        assert!(cache.dependents_of("/srv/app/host.js").is_none());
        assert_eq!(
            cache.dependents_of("/srv/app-lib/util.js"),
            Some(BTreeSet::from(["/srv/app".to_string()]))
        );
        assert_eq!(cache.watched_directories(), vec!["/srv/app-lib"]);
    }

    #[test]
    fn test_set_record_chains_and_normalizes() {
        let cache = cache_with(Arc::new(RegistryRuntime::new()), None);
        cache
            .set_record(Arc::new(Plain), None, "/site/a/index.js", "/site/a/")
            .set_record(Arc::new(Plain), None, "/site/b/./index.js", "/site/b");

        assert_eq!(cache.get_record("/site/a").unwrap().script_path, "/site/a/index.js");
        assert_eq!(cache.get_record("/site/b/").unwrap().script_path, "/site/b/index.js");
        assert_eq!(cache.records().len(), 2);
    }

    #[test]
    fn test_stats_track_hits_and_misses() {
        let runtime = Arc::new(RegistryRuntime::new());
        runtime.register_app("/site/a/index.js", &[], || Arc::new(Plain));
        let cache = cache_with(runtime, None);

        cache.get_or_load("a", None).unwrap();
        cache.get_or_load("a", None).unwrap();
        cache.get_or_load("a/", None).unwrap();

        let stats = cache.stats();
        assert_eq!(stats.misses, 1);
        assert_eq!(stats.hits, 2);
        assert_eq!(stats.loads, 1);
        assert_eq!(stats.records, 1);
        assert_eq!(stats.graph_entries, 1);
        assert_eq!(stats.watched_directories, 1);
    }
}
