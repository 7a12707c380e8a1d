//! Dependency Graph Module
//!
//! Tracks which keys depend on which, so that removing a key can cascade to
//! every entry built on top of it.
//!
//! Two maps mirror each other:
//! - `dependencies`: key -> keys it depends on (forward edges)
//! - `dependents`: key -> keys that depend on it (reverse edges)
//!
//! A dependency does not have to be a stored entry; it may be a pure tag.

use std::collections::{HashMap, HashSet, VecDeque};

use crate::error::{CacheError, Result};

// == Dependency Graph ==
#[derive(Debug, Default)]
pub struct DependencyGraph {
    dependencies: HashMap<String, HashSet<String>>,
    dependents: HashMap<String, HashSet<String>>,
}

impl DependencyGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // == Cycle Check ==
    /// Fails if making `key` depend on any of `dependencies` would close a
    /// cycle. Runs before any mutation.
    pub fn check_edges<S: AsRef<str>>(&self, key: &str, dependencies: &[S]) -> Result<()> {
        if dependencies.is_empty() {
            return Ok(());
        }

        let upstream_of_key = self.transitive_dependents(key);
        for dependency in dependencies {
            let dependency = dependency.as_ref();
            if dependency == key || upstream_of_key.contains(dependency) {
                return Err(CacheError::CycleDetected {
                    key: key.to_string(),
                    dependency: dependency.to_string(),
                });
            }
        }
        Ok(())
    }

    // == Add Edges ==
    /// Registers `key` as a dependent of each dependency, keeping existing edges.
    pub fn add_edges<S: AsRef<str>>(&mut self, key: &str, dependencies: &[S]) -> Result<()> {
        self.check_edges(key, dependencies)?;
        self.link(key, dependencies);
        Ok(())
    }

    // == Replace Edges ==
    /// Swaps the outgoing edges of `key` for `dependencies` in one step.
    ///
    /// On `CycleDetected` the graph is left untouched, old edges included.
    pub fn replace_edges<S: AsRef<str>>(&mut self, key: &str, dependencies: &[S]) -> Result<()> {
        self.check_edges(key, dependencies)?;
        self.unlink_dependencies(key);
        self.link(key, dependencies);
        Ok(())
    }

    // == Remove Node ==
    /// Removes `key` from the graph, both as dependent and as dependency.
    pub fn remove_node(&mut self, key: &str) {
        self.unlink_dependencies(key);

        if let Some(dependents) = self.dependents.remove(key) {
            for dependent in dependents {
                if let Some(deps) = self.dependencies.get_mut(&dependent) {
                    deps.remove(key);
                    if deps.is_empty() {
                        self.dependencies.remove(&dependent);
                    }
                }
            }
        }
    }

    /// Direct dependents of `key`.
    pub fn dependents(&self, key: &str) -> HashSet<String> {
        self.dependents.get(key).cloned().unwrap_or_default()
    }

    /// Direct dependencies of `key`.
    pub fn dependencies(&self, key: &str) -> HashSet<String> {
        self.dependencies.get(key).cloned().unwrap_or_default()
    }

    pub fn has_dependents(&self, key: &str) -> bool {
        self.dependents.contains_key(key)
    }

    // == Transitive Dependents ==
    /// Every key that depends on `key`, directly or through other keys.
    ///
    /// Breadth-first; each key is visited once even if the graph were cyclic.
    /// `key` itself is never part of the result.
    pub fn transitive_dependents(&self, key: &str) -> HashSet<String> {
        Self::closure(&self.dependents, key)
    }

    /// Every key that `key` depends on, directly or through other keys.
    pub fn transitive_dependencies(&self, key: &str) -> HashSet<String> {
        Self::closure(&self.dependencies, key)
    }

    /// True when the forward and reverse maps describe the same edges and
    /// hold no empty sets.
    pub fn is_consistent(&self) -> bool {
        let forward_ok = self.dependencies.iter().all(|(key, deps)| {
            !deps.is_empty()
                && deps
                    .iter()
                    .all(|d| self.dependents.get(d).is_some_and(|set| set.contains(key)))
        });
        let reverse_ok = self.dependents.iter().all(|(dep, keys)| {
            !keys.is_empty()
                && keys
                    .iter()
                    .all(|k| self.dependencies.get(k).is_some_and(|set| set.contains(dep)))
        });
        forward_ok && reverse_ok
    }

    /// Number of keys that appear on either side of an edge.
    pub fn len(&self) -> usize {
        self.dependencies
            .keys()
            .chain(self.dependents.keys())
            .collect::<HashSet<_>>()
            .len()
    }

    pub fn is_empty(&self) -> bool {
        self.dependencies.is_empty() && self.dependents.is_empty()
    }

    pub fn clear(&mut self) {
        self.dependencies.clear();
        self.dependents.clear();
    }

    fn link<S: AsRef<str>>(&mut self, key: &str, dependencies: &[S]) {
        for dependency in dependencies {
            let dependency = dependency.as_ref();
            self.dependencies
                .entry(key.to_string())
                .or_default()
                .insert(dependency.to_string());
            self.dependents
                .entry(dependency.to_string())
                .or_default()
                .insert(key.to_string());
        }
    }

    fn unlink_dependencies(&mut self, key: &str) {
        if let Some(dependencies) = self.dependencies.remove(key) {
            for dependency in dependencies {
                if let Some(keys) = self.dependents.get_mut(&dependency) {
                    keys.remove(key);
                    if keys.is_empty() {
                        self.dependents.remove(&dependency);
                    }
                }
            }
        }
    }

    fn closure(edges: &HashMap<String, HashSet<String>>, start: &str) -> HashSet<String> {
        let mut visited = HashSet::new();
        let mut queue = VecDeque::from([start.to_string()]);

        while let Some(current) = queue.pop_front() {
            if let Some(next) = edges.get(&current) {
                for key in next {
                    if key != start && visited.insert(key.clone()) {
                        queue.push_back(key.clone());
                    }
                }
            }
        }

        visited
    }
}

// == Unit Tests ==
#[cfg(test)]
mod tests {
    use super::*;

    fn set(keys: &[&str]) -> HashSet<String> {
        keys.iter().map(|k| k.to_string()).collect()
    }

    /// a <- b <- c, and d depends on both a and c
    fn diamond() -> DependencyGraph {
        let mut graph = DependencyGraph::new();
        graph.add_edges("b", &["a"]).unwrap();
        graph.add_edges("c", &["b"]).unwrap();
        graph.add_edges("d", &["a", "c"]).unwrap();
        graph
    }

    #[test]
    fn test_add_edges_registers_both_directions() {
        let graph = diamond();

        assert_eq!(graph.dependents("a"), set(&["b", "d"]));
        assert_eq!(graph.dependencies("d"), set(&["a", "c"]));
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_transitive_dependents() {
        let graph = diamond();

        assert_eq!(graph.transitive_dependents("a"), set(&["b", "c", "d"]));
        assert_eq!(graph.transitive_dependents("c"), set(&["d"]));
        assert!(graph.transitive_dependents("d").is_empty());
        assert!(graph.transitive_dependents("unknown").is_empty());
    }

    #[test]
    fn test_transitive_dependencies() {
        let graph = diamond();
        assert_eq!(graph.transitive_dependencies("d"), set(&["a", "b", "c"]));
        assert!(graph.transitive_dependencies("a").is_empty());
    }

    #[test]
    fn test_self_dependency_rejected() {
        let mut graph = DependencyGraph::new();
        let result = graph.add_edges("a", &["a"]);

        assert!(matches!(result, Err(CacheError::CycleDetected { .. })));
        assert!(graph.is_empty());
    }

    #[test]
    fn test_two_node_cycle_rejected_without_mutation() {
        let mut graph = DependencyGraph::new();
        graph.add_edges("a", &["b"]).unwrap();

        let result = graph.add_edges("b", &["a"]);
        assert_eq!(
            result,
            Err(CacheError::CycleDetected {
                key: "b".to_string(),
                dependency: "a".to_string(),
            })
        );
        assert_eq!(graph.dependents("b"), set(&["a"]));
        assert!(graph.dependents("a").is_empty());
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_transitive_cycle_rejected() {
        let mut graph = diamond();
        // a is upstream of d, so a depending on d closes a loop
        let result = graph.replace_edges("a", &["x", "d"]);

        assert!(matches!(result, Err(CacheError::CycleDetected { .. })));
        assert!(graph.dependencies("a").is_empty());
        assert!(graph.dependents("x").is_empty());
    }

    #[test]
    fn test_replace_edges_drops_old_edges() {
        let mut graph = DependencyGraph::new();
        graph.add_edges("k", &["old1", "old2"]).unwrap();
        graph.replace_edges("k", &["new"]).unwrap();

        assert_eq!(graph.dependencies("k"), set(&["new"]));
        assert!(!graph.has_dependents("old1"));
        assert!(!graph.has_dependents("old2"));
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_replace_with_empty_makes_leaf() {
        let mut graph = DependencyGraph::new();
        graph.add_edges("k", &["a"]).unwrap();
        graph.replace_edges::<&str>("k", &[]).unwrap();

        assert!(graph.is_empty());
    }

    #[test]
    fn test_remove_node_both_sides() {
        let mut graph = diamond();
        graph.remove_node("b");

        assert!(graph.dependencies("c").is_empty());
        assert_eq!(graph.dependents("a"), set(&["d"]));
        assert!(graph.is_consistent());
    }

    #[test]
    fn test_closure_terminates_on_cycles() {
        // Build a cycle directly, bypassing the check
        let mut graph = DependencyGraph::new();
        graph.link("a", &["b"]);
        graph.link("b", &["a"]);

        assert_eq!(graph.transitive_dependents("a"), set(&["b"]));
    }

    #[test]
    fn test_len_counts_distinct_nodes() {
        let graph = diamond();
        assert_eq!(graph.len(), 4);
    }
}
