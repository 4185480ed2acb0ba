//! Dependency graph store
//!
//! Maps a loaded file to every path that has to be invalidated with it.
//! Edges come from co-load groups: all files that appeared in the module
//! table while one application was being loaded are linked to each other
//! and to the application that required them. Two files in the same group
//! are linked even when neither imports the other; the graph never looks
//! inside a file.

use std::collections::{BTreeSet, HashMap};
use tracing::trace;

/// Path → set of dependent paths
#[derive(Debug, Default, Clone)]
pub struct DependencyGraph {
    edges: HashMap<String, BTreeSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record one co-load group
    ///
    /// Every path in `loaded` gains every other path in `loaded` plus
    /// `required_by` as dependents. Re-recording the same group is a no-op.
    pub fn record_co_load(&mut self, required_by: &str, loaded: &[String]) {
        for (i, path) in loaded.iter().enumerate() {
            let dependents = self.edges.entry(path.clone()).or_default();

            for (j, other) in loaded.iter().enumerate() {
                if i != j && other != path {
                    dependents.insert(other.clone());
                }
            }

            if required_by != path {
                dependents.insert(required_by.to_string());
            }

            trace!(
                path = %path,
                dependents = dependents.len(),
                "Recorded co-load dependents"
            );
        }
    }

    /// Dependents recorded for `path`, if any
    pub fn dependents_of(&self, path: &str) -> Option<&BTreeSet<String>> {
        self.edges.get(path)
    }

    /// Drop the entry for `path`, handing back its dependents
    pub fn remove_entry(&mut self, path: &str) -> Option<BTreeSet<String>> {
        self.edges.remove(path)
    }

    pub fn contains(&self, path: &str) -> bool {
        self.edges.contains_key(path)
    }

    /// Number of paths with a dependent set
    pub fn len(&self) -> usize {
        self.edges.len()
    }

    pub fn is_empty(&self) -> bool {
        self.edges.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    fn group(paths: &[&str]) -> Vec<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    fn set(paths: &[&str]) -> BTreeSet<String> {
        paths.iter().map(|p| p.to_string()).collect()
    }

    #[test]
    fn test_co_load_links_siblings_and_requirer() {
        let mut graph = DependencyGraph::new();
        graph.record_co_load("/app/index", &group(&["/app/a.js", "/app/b.js", "/app/c.js"]));

        assert_eq!(
            graph.dependents_of("/app/a.js"),
            Some(&set(&["/app/b.js", "/app/c.js", "/app/index"]))
        );
        assert_eq!(
            graph.dependents_of("/app/c.js"),
            Some(&set(&["/app/a.js", "/app/b.js", "/app/index"]))
        );
        // the requirer is a dependent, not a key
        assert!(graph.dependents_of("/app/index").is_none());
        assert_eq!(graph.len(), 3);
    }

    #[test]
    fn test_co_load_edges_are_symmetric_within_group() {
        let mut graph = DependencyGraph::new();
        let loaded = group(&["/x.js", "/y.js", "/z.js"]);
        graph.record_co_load("/app", &loaded);

        for a in &loaded {
            for b in &loaded {
                if a != b {
                    assert!(graph.dependents_of(a).unwrap().contains(b));
                    assert!(graph.dependents_of(b).unwrap().contains(a));
                }
            }
        }
    }

    #[test]
    fn test_record_co_load_is_idempotent() {
        let mut graph = DependencyGraph::new();
        let loaded = group(&["/app/a.js", "/app/b.js"]);
        graph.record_co_load("/app/index", &loaded);
        let before = graph.dependents_of("/app/a.js").unwrap().len();

        graph.record_co_load("/app/index", &loaded);
        assert_eq!(graph.dependents_of("/app/a.js").unwrap().len(), before);
        assert_eq!(graph.len(), 2);
    }

    #[test]
    fn test_groups_accumulate() {
        let mut graph = DependencyGraph::new();
        graph.record_co_load("/site/blog", &group(&["/site/lib/util.js"]));
        graph.record_co_load("/site/shop", &group(&["/site/lib/util.js"]));

        assert_eq!(
            graph.dependents_of("/site/lib/util.js"),
            Some(&set(&["/site/blog", "/site/shop"]))
        );
    }

    #[test]
    fn test_requirer_inside_group_does_not_self_link() {
        let mut graph = DependencyGraph::new();
        graph.record_co_load("/app/a.js", &group(&["/app/a.js", "/app/b.js"]));

        assert_eq!(graph.dependents_of("/app/a.js"), Some(&set(&["/app/b.js"])));
        assert_eq!(graph.dependents_of("/app/b.js"), Some(&set(&["/app/a.js"])));
    }

    #[test]
    fn test_remove_entry_returns_dependents() {
        let mut graph = DependencyGraph::new();
        graph.record_co_load("/app", &group(&["/a.js", "/b.js"]));

        let removed = graph.remove_entry("/a.js").unwrap();
        assert_eq!(removed, set(&["/app", "/b.js"]));
        assert!(!graph.contains("/a.js"));
        assert!(graph.contains("/b.js"));
        assert!(graph.remove_entry("/a.js").is_none());
    }
}
