//! Module dependency edges.

use rustc_hash::{FxHashMap, FxHashSet};
use std::path::{Path, PathBuf};

type PathSet = FxHashSet<PathBuf>;
type PathSetMap = FxHashMap<PathBuf, PathSet>;

/// Bidirectional module dependency graph.
///
/// Maintains both forward (module → dependencies) and reverse
/// (dependency → dependents) mappings for lookups in either direction.
///
/// # Invariants
/// - Forward and reverse mappings are always consistent
/// - Self-references are excluded
/// - Cycles are allowed; traversals guard with a visited set
#[derive(Debug, Default)]
pub struct DependencyGraph {
    /// Forward: module → modules it imports
    forward: PathSetMap,
    /// Reverse: module → modules importing it
    reverse: PathSetMap,
}

impl DependencyGraph {
    #[inline]
    pub fn new() -> Self {
        Self::default()
    }

    /// Record that `from` imports `to`. Returns whether the edge is new.
    pub fn add_edge(&mut self, from: &Path, to: &Path) -> bool {
        if from == to {
            return false;
        }
        let added = self
            .forward
            .entry(from.to_path_buf())
            .or_default()
            .insert(to.to_path_buf());
        if added {
            self.reverse
                .entry(to.to_path_buf())
                .or_default()
                .insert(from.to_path_buf());
        }
        added
    }

    /// Replace every dependency of `from`.
    pub fn record(&mut self, from: &Path, dependencies: &[PathBuf]) {
        self.remove(from);
        for dep in dependencies {
            self.add_edge(from, dep);
        }
    }

    /// Modules importing `file`.
    #[inline]
    pub fn dependents(&self, file: &Path) -> Option<&PathSet> {
        self.reverse.get(file)
    }

    /// Modules imported by `file`.
    #[inline]
    pub fn dependencies(&self, file: &Path) -> Option<&PathSet> {
        self.forward.get(file)
    }

    /// Every module that transitively imports `file`, nearest first.
    pub fn transitive_dependents(&self, file: &Path) -> Vec<PathBuf> {
        let mut seen: PathSet = FxHashSet::default();
        let mut order = Vec::new();
        let mut stack = vec![file.to_path_buf()];
        seen.insert(file.to_path_buf());

        while let Some(current) = stack.pop() {
            let Some(dependents) = self.reverse.get(&current) else {
                continue;
            };
            let mut next: Vec<_> = dependents.iter().filter(|d| !seen.contains(*d)).collect();
            next.sort();
            for dependent in next {
                seen.insert(dependent.clone());
                order.push(dependent.clone());
                stack.push(dependent.clone());
            }
        }
        order
    }

    /// Drop the outgoing edges of `file`.
    ///
    /// Edges pointing at `file` are left alone: they belong to its dependents.
    pub fn remove(&mut self, file: &Path) {
        let Some(old_deps) = self.forward.remove(file) else {
            return;
        };

        for dep in old_deps {
            if let Some(dependents) = self.reverse.get_mut(&dep) {
                dependents.remove(file);
                if dependents.is_empty() {
                    self.reverse.remove(&dep);
                }
            }
        }
    }

    #[inline]
    pub fn clear(&mut self) {
        self.forward.clear();
        self.reverse.clear();
    }

    /// Number of modules with at least one dependency.
    #[inline]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn path(s: &str) -> PathBuf {
        PathBuf::from(s)
    }

    #[test]
    fn new_graph_is_empty() {
        let graph = DependencyGraph::new();
        assert!(graph.is_empty());
        assert!(graph.dependents(&path("/any.js")).is_none());
    }

    #[test]
    fn edge_is_recorded_both_ways() {
        let mut graph = DependencyGraph::new();

        assert!(graph.add_edge(&path("/a.js"), &path("/b.js")));
        assert!(!graph.add_edge(&path("/a.js"), &path("/b.js")));

        assert!(graph.dependents(&path("/b.js")).unwrap().contains(&path("/a.js")));
        assert!(graph.dependencies(&path("/a.js")).unwrap().contains(&path("/b.js")));
    }

    #[test]
    fn self_reference_excluded() {
        let mut graph = DependencyGraph::new();

        assert!(!graph.add_edge(&path("/a.js"), &path("/a.js")));
        assert!(graph.dependents(&path("/a.js")).is_none());
    }

    #[test]
    fn record_replaces_old_dependencies() {
        let mut graph = DependencyGraph::new();
        let a = path("/a.js");

        graph.record(&a, &[path("/old.js")]);
        graph.record(&a, &[path("/new.js")]);

        assert!(graph.dependents(&path("/old.js")).is_none());
        assert!(graph.dependents(&path("/new.js")).unwrap().contains(&a));
    }

    #[test]
    fn remove_keeps_incoming_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&path("/a.js"), &path("/b.js"));
        graph.add_edge(&path("/b.js"), &path("/c.js"));

        graph.remove(&path("/b.js"));

        assert!(graph.dependents(&path("/c.js")).is_none());
        assert!(graph.dependents(&path("/b.js")).unwrap().contains(&path("/a.js")));
    }

    #[test]
    fn transitive_dependents_tolerate_cycles() {
        let mut graph = DependencyGraph::new();
        // a → b → c, c → a
        graph.add_edge(&path("/a.js"), &path("/b.js"));
        graph.add_edge(&path("/b.js"), &path("/c.js"));
        graph.add_edge(&path("/c.js"), &path("/a.js"));
        graph.add_edge(&path("/d.js"), &path("/c.js"));

        let mut found = graph.transitive_dependents(&path("/c.js"));
        found.sort();

        assert_eq!(found, [path("/a.js"), path("/b.js"), path("/d.js")]);
    }

    #[test]
    fn clear_removes_all() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&path("/a.js"), &path("/b.js"));

        graph.clear();

        assert!(graph.is_empty());
        assert!(graph.dependents(&path("/b.js")).is_none());
    }
}
