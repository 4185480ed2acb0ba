//! In-process module registry
//!
//! Scripts are registered as factories under their normalized path. Loading
//! a script runs its factory once and keeps the result in the module table
//! until the key is evicted; requiring a key that is already in the table
//! runs nothing. This gives hosts that embed their applications in-process
//! the same introspectable module table a scripting runtime would have.

use super::{AppInstance, ModuleRuntime};
use anyhow::anyhow;
use dirhost_foundation::{containing_directory, normalize_path, resolve_against, HostError, HostResult};
use parking_lot::{Mutex, RwLock};
use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, trace};

/// Factory run when a script is first required
///
/// Returns the application the script exports, or `None` for plain modules.
pub type ScriptFactory =
    Arc<dyn Fn(&LoadContext<'_>) -> anyhow::Result<Option<Arc<dyn AppInstance>>> + Send + Sync>;

type Exports = Option<Arc<dyn AppInstance>>;

enum Slot {
    /// Factory is running; requiring the key again yields empty exports
    Loading,
    Ready(Exports),
}

/// Handle passed to a running factory
pub struct LoadContext<'a> {
    runtime: &'a RegistryRuntime,
    current: String,
}

impl LoadContext<'_> {
    /// Key of the script being loaded
    pub fn current(&self) -> &str {
        &self.current
    }

    /// Require another script, resolved relative to the current one
    pub fn require(&self, specifier: &str) -> anyhow::Result<Exports> {
        let key = resolve_against(containing_directory(&self.current), specifier);
        self.runtime.require_key(&key)
    }
}

/// Module runtime backed by registered factories
#[derive(Default)]
pub struct RegistryRuntime {
    scripts: RwLock<HashMap<String, ScriptFactory>>,
    table: Mutex<BTreeMap<String, Slot>>,
    executions: Mutex<HashMap<String, usize>>,
    loader_key: Option<String>,
}

impl RegistryRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    /// Runtime whose loader occupies `key` in the module table
    pub fn with_loader_key(key: impl AsRef<Path>) -> Self {
        let key = normalize_path(key);
        let runtime = Self {
            loader_key: Some(key.clone()),
            ..Self::default()
        };
        runtime.table.lock().insert(key, Slot::Ready(None));
        runtime
    }

    /// Register a script factory, replacing any previous one for the path
    pub fn register_script<F>(&self, path: impl AsRef<Path>, factory: F)
    where
        F: Fn(&LoadContext<'_>) -> anyhow::Result<Exports> + Send + Sync + 'static,
    {
        let key = normalize_path(path);
        trace!(script = %key, "Registered script factory");
        self.scripts.write().insert(key, Arc::new(factory));
    }

    /// Register a plain module that requires `requires` and exports nothing
    pub fn register_module(&self, path: impl AsRef<Path>, requires: &[&str]) {
        let requires: Vec<String> = requires.iter().map(|r| r.to_string()).collect();
        self.register_script(path, move |ctx| {
            for specifier in &requires {
                ctx.require(specifier)?;
            }
            Ok(None)
        });
    }

    /// Register an entry script that requires `requires` and exports an application
    pub fn register_app<F>(&self, path: impl AsRef<Path>, requires: &[&str], make: F)
    where
        F: Fn() -> Arc<dyn AppInstance> + Send + Sync + 'static,
    {
        let requires: Vec<String> = requires.iter().map(|r| r.to_string()).collect();
        self.register_script(path, move |ctx| {
            for specifier in &requires {
                ctx.require(specifier)?;
            }
            Ok(Some(make()))
        });
    }

    /// How many times the factory for `path` has run
    pub fn execution_count(&self, path: impl AsRef<Path>) -> usize {
        let key = normalize_path(path);
        self.executions.lock().get(&key).copied().unwrap_or(0)
    }

    pub fn is_loaded(&self, path: impl AsRef<Path>) -> bool {
        let key = normalize_path(path);
        self.table.lock().contains_key(&key)
    }

    fn require_key(&self, key: &str) -> anyhow::Result<Exports> {
        match self.table.lock().get(key) {
            Some(Slot::Ready(exports)) => return Ok(exports.clone()),
            Some(Slot::Loading) => return Ok(None),
            None => {}
        }

        let factory = self
            .scripts
            .read()
            .get(key)
            .cloned()
            .ok_or_else(|| anyhow!("Cannot find module '{}'", key))?;

        self.table.lock().insert(key.to_string(), Slot::Loading);
        *self.executions.lock().entry(key.to_string()).or_default() += 1;

        let ctx = LoadContext {
            runtime: self,
            current: key.to_string(),
        };

        // No lock is held while the factory runs; it may require other keys
        match factory(&ctx) {
            Ok(exports) => {
                self.table
                    .lock()
                    .insert(key.to_string(), Slot::Ready(exports.clone()));
                Ok(exports)
            }
            Err(err) => {
                self.table.lock().remove(key);
                Err(err.context(format!("while loading '{}'", key)))
            }
        }
    }
}

impl ModuleRuntime for RegistryRuntime {
    fn loaded_keys(&self) -> BTreeSet<String> {
        self.table.lock().keys().cloned().collect()
    }

    fn load(&self, script_path: &str) -> HostResult<Arc<dyn AppInstance>> {
        let key = normalize_path(script_path);
        match self.require_key(&key) {
            Ok(Some(instance)) => Ok(instance),
            Ok(None) => Err(HostError::load(key, "script does not export an application")),
            Err(err) => Err(HostError::load(key, format!("{:#}", err))),
        }
    }

    fn evict(&self, key: &str) -> bool {
        let removed = self.table.lock().remove(key).is_some();
        if removed {
            debug!(key = %key, "Evicted module table entry");
        }
        removed
    }

    fn loader_key(&self) -> Option<String> {
        self.loader_key.clone()
    }

    fn exists(&self, script_path: &str) -> bool {
        let key = normalize_path(script_path);
        self.scripts.read().contains_key(&key) || Path::new(script_path).is_file()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    struct Plain;

    #[async_trait]
    impl AppInstance for Plain {}

    #[test]
    fn test_load_records_every_required_key() {
        let runtime = RegistryRuntime::new();
        runtime.register_app("/site/blog/index.js", &["./render.js"], || Arc::new(Plain));
        runtime.register_module("/site/blog/render.js", &["../lib/util.js"]);
        runtime.register_module("/site/lib/util.js", &[]);

        runtime.load("/site/blog/index.js").unwrap();

        let keys: Vec<String> = runtime.loaded_keys().into_iter().collect();
        assert_eq!(
            keys,
            vec![
                "/site/blog/index.js",
                "/site/blog/render.js",
                "/site/lib/util.js"
            ]
        );
    }

    #[test]
    fn test_loaded_keys_are_not_executed_twice() {
        let runtime = RegistryRuntime::new();
        runtime.register_module("/lib/shared.js", &[]);
        runtime.register_app("/a/index.js", &["/lib/shared.js"], || Arc::new(Plain));
        runtime.register_app("/b/index.js", &["/lib/shared.js"], || Arc::new(Plain));

        runtime.load("/a/index.js").unwrap();
        runtime.load("/b/index.js").unwrap();
        assert_eq!(runtime.execution_count("/lib/shared.js"), 1);

        assert!(runtime.evict("/lib/shared.js"));
        assert!(!runtime.evict("/lib/shared.js"));
        runtime.register_app("/c/index.js", &["/lib/shared.js"], || Arc::new(Plain));
        runtime.load("/c/index.js").unwrap();
        assert_eq!(runtime.execution_count("/lib/shared.js"), 2);
    }

    #[test]
    fn test_cyclic_requires_terminate() {
        let runtime = RegistryRuntime::new();
        runtime.register_app("/app/index.js", &["./a.js"], || Arc::new(Plain));
        runtime.register_module("/app/a.js", &["./b.js"]);
        runtime.register_module("/app/b.js", &["./a.js"]);

        runtime.load("/app/index.js").unwrap();
        assert_eq!(runtime.execution_count("/app/a.js"), 1);
        assert_eq!(runtime.execution_count("/app/b.js"), 1);
    }

    #[test]
    fn test_failing_script_is_removed_but_its_deps_stay() {
        let runtime = RegistryRuntime::new();
        runtime.register_module("/app/ok.js", &[]);
        runtime.register_script("/app/index.js", |ctx| {
            ctx.require("./ok.js")?;
            Err(anyhow!("boom"))
        });

        let err = runtime.load("/app/index.js").err().expect("load should fail");
        assert!(err.to_string().contains("boom"));
        assert!(!runtime.is_loaded("/app/index.js"));
        assert!(runtime.is_loaded("/app/ok.js"));
    }

    #[test]
    fn test_missing_module_and_missing_export() {
        let runtime = RegistryRuntime::new();
        let err = runtime.load("/nowhere/index.js").err().expect("load should fail");
        assert!(err.to_string().contains("Cannot find module '/nowhere/index.js'"));

        runtime.register_module("/lib/only.js", &[]);
        let err = runtime.load("/lib/only.js").err().expect("load should fail");
        assert!(err.to_string().contains("does not export an application"));
    }

    #[test]
    fn test_loader_key_is_preloaded() {
        let runtime = RegistryRuntime::with_loader_key("/opt/dirhost/loader.js");
        assert_eq!(runtime.loader_key().as_deref(), Some("/opt/dirhost/loader.js"));
        assert!(runtime.loaded_keys().contains("/opt/dirhost/loader.js"));
    }

    #[test]
    fn test_exists_checks_registry_then_disk() {
        let runtime = RegistryRuntime::new();
        runtime.register_module("/virtual/index.js", &[]);
        assert!(runtime.exists("/virtual/./index.js"));
        assert!(!runtime.exists("/virtual/missing.js"));
    }
}
