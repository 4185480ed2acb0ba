//! Directory application cache with dependency-aware hot invalidation
//!
//! Each directory under the document root may hold an entry script. The
//! [`ModuleCache`] loads it once, keeps the instance for later requests and
//! drops it again as soon as the script, or anything loaded alongside it,
//! changes on disk.
//!
//! # Architecture
//!
//! - [`DependencyGraph`]: which paths must go when a given file changes
//! - [`WatchRegistrar`]: one filesystem subscription per directory
//! - [`InstanceCache`]: directory → loaded instance record
//! - [`ModuleCache`]: ties them together around a [`ModuleRuntime`]

pub mod cache;
pub mod graph;
pub mod instances;
pub mod runtime;
pub mod watch;

pub use cache::{CacheStats, InvalidationReport, ModuleCache, StopReport};
pub use graph::DependencyGraph;
pub use instances::{CacheRecord, InstanceCache};
pub use runtime::{AppInstance, LoadContext, ModuleRuntime, RegistryRuntime, ScriptFactory};
pub use watch::{
    ChangeHandler, NotifyBackend, WatchBackend, WatchEvent, WatchEventKind, WatchRegistrar,
    WatchSink,
};

pub use dirhost_foundation::{HostError, HostResult};
