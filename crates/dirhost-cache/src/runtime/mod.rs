//! Capabilities the cache needs from the module-loading runtime
//!
//! The cache never loads code itself. It asks a [`ModuleRuntime`] to load an
//! entry script, snapshots the runtime's module table around the load, and
//! evicts single table keys when files change.

mod registry;

pub use registry::{LoadContext, RegistryRuntime, ScriptFactory};

use async_trait::async_trait;
use dirhost_foundation::HostResult;
use std::collections::BTreeSet;
use std::path::Path;
use std::sync::Arc;
use std::time::SystemTime;

/// A loaded directory application
///
/// Opaque to the cache except for the optional teardown hook.
#[async_trait]
pub trait AppInstance: Send + Sync {
    /// Whether this instance has a teardown hook
    fn can_stop(&self) -> bool {
        false
    }

    /// Tear the instance down; only called when [`AppInstance::can_stop`] is true
    async fn stop(&self) -> anyhow::Result<()> {
        Ok(())
    }
}

/// Module-loading runtime with an introspectable module table
pub trait ModuleRuntime: Send + Sync {
    /// Keys currently present in the module table
    fn loaded_keys(&self) -> BTreeSet<String>;

    /// Load an entry script and return the application it exports
    fn load(&self, script_path: &str) -> HostResult<Arc<dyn AppInstance>>;

    /// Remove one key from the module table; false when it was not there
    fn evict(&self, key: &str) -> bool;

    /// Key of the loader itself, never treated as an application dependency
    fn loader_key(&self) -> Option<String> {
        None
    }

    /// Whether `script_path` can be loaded
    fn exists(&self, script_path: &str) -> bool {
        Path::new(script_path).is_file()
    }

    /// Modification time of a script, when the runtime knows one
    fn modified_time(&self, script_path: &str) -> Option<SystemTime> {
        std::fs::metadata(script_path)
            .and_then(|meta| meta.modified())
            .ok()
    }
}
