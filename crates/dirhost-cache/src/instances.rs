//! Instance cache: application directory → loaded instance record

use crate::runtime::AppInstance;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use std::time::SystemTime;

/// One loaded directory application
///
/// Records are replaced wholesale on reload and never mutated in place.
#[derive(Clone)]
pub struct CacheRecord {
    /// The application object
    pub instance: Arc<dyn AppInstance>,
    /// Modification time of the entry script when it was loaded
    pub script_modified_time: Option<SystemTime>,
    /// Entry script that was loaded for this directory
    pub script_path: String,
    /// Normalized absolute directory path; the cache key
    pub directory_full_path: String,
}

impl fmt::Debug for CacheRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheRecord")
            .field("script_modified_time", &self.script_modified_time)
            .field("script_path", &self.script_path)
            .field("directory_full_path", &self.directory_full_path)
            .field("can_stop", &self.instance.can_stop())
            .finish()
    }
}

/// Directory-keyed record map
///
/// Keys are expected to be normalized already (see
/// [`dirhost_foundation::normalize_path`]).
#[derive(Debug, Default)]
pub struct InstanceCache {
    records: HashMap<String, CacheRecord>,
}

impl InstanceCache {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a record under its own directory key, returning the one it replaced
    pub fn insert(&mut self, record: CacheRecord) -> Option<CacheRecord> {
        self.records
            .insert(record.directory_full_path.clone(), record)
    }

    pub fn get(&self, directory: &str) -> Option<&CacheRecord> {
        self.records.get(directory)
    }

    pub fn remove(&mut self, directory: &str) -> Option<CacheRecord> {
        self.records.remove(directory)
    }

    pub fn contains(&self, directory: &str) -> bool {
        self.records.contains_key(directory)
    }

    pub fn clear(&mut self) {
        self.records.clear();
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    /// Snapshot of every record, ordered by directory
    pub fn records(&self) -> Vec<CacheRecord> {
        let mut records: Vec<CacheRecord> = self.records.values().cloned().collect();
        records.sort_by(|a, b| a.directory_full_path.cmp(&b.directory_full_path));
        records
    }
}
