//! Property-Based Tests for Cache Module
//!
//! Uses proptest to check the dependency invariants over random operation
//! sequences.

use proptest::prelude::*;
use std::collections::HashSet;

use crate::cache::{CacheManager, DependencyGraph};
use crate::config::CacheConfig;
use crate::error::CacheError;

// == Strategies ==
// A small key space so that operations collide and build real graphs.
const KEYS: &[&str] = &["a", "b", "c", "d", "e", "f"];

fn key_strategy() -> impl Strategy<Value = &'static str> {
    prop::sample::select(KEYS)
}

fn dependencies_strategy() -> impl Strategy<Value = Vec<&'static str>> {
    prop::collection::vec(key_strategy(), 0..3)
}

#[derive(Debug, Clone)]
enum CacheOp {
    Put { key: &'static str, deps: Vec<&'static str> },
    Remove { key: &'static str },
    Invalidate { key: &'static str },
}

fn cache_op_strategy() -> impl Strategy<Value = CacheOp> {
    prop_oneof![
        3 => (key_strategy(), dependencies_strategy())
            .prop_map(|(key, deps)| CacheOp::Put { key, deps }),
        1 => key_strategy().prop_map(|key| CacheOp::Remove { key }),
        1 => key_strategy().prop_map(|key| CacheOp::Invalidate { key }),
    ]
}

fn cache() -> CacheManager<u32> {
    CacheManager::new(CacheConfig::default())
}

/// Every stored entry is listed under each of its dependencies, and no
/// entry reaches itself through its dependencies.
fn assert_index_matches_entries(cache: &CacheManager<u32>) -> Result<(), TestCaseError> {
    prop_assert!(cache.graph_is_consistent(), "Forward and reverse edges diverged");

    for key in cache.keys().unwrap() {
        let declared = cache.stored_dependencies(&key).unwrap_or_default();
        prop_assert_eq!(&declared, &cache.dependencies(&key), "Edges differ for {}", key);
        for dependency in &declared {
            prop_assert!(
                cache.dependents(dependency).contains(&key),
                "{} missing from dependents of {}",
                key,
                dependency
            );
            prop_assert!(
                !cache.transitive_dependents(&key).contains(dependency),
                "Cycle through {} and {}",
                key,
                dependency
            );
        }
    }
    Ok(())
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    // The reverse index mirrors the stored entries after every operation.
    #[test]
    fn prop_index_consistent_after_any_sequence(
        ops in prop::collection::vec(cache_op_strategy(), 1..40)
    ) {
        let cache = cache();

        for (i, op) in ops.into_iter().enumerate() {
            match op {
                CacheOp::Put { key, deps } => {
                    match cache.put(key, i as u32, &deps) {
                        Ok(()) | Err(CacheError::CycleDetected { .. }) => {}
                        Err(other) => prop_assert!(false, "Unexpected error: {}", other),
                    }
                }
                CacheOp::Remove { key } => {
                    cache.remove(key).unwrap();
                }
                CacheOp::Invalidate { key } => {
                    cache.invalidate_dependents(key).unwrap();
                }
            }
            assert_index_matches_entries(&cache)?;
        }
    }

    // Removing a key leaves nothing that depended on it, directly or not.
    #[test]
    fn prop_remove_leaves_no_dependents(
        puts in prop::collection::vec((key_strategy(), dependencies_strategy()), 1..30),
        target in key_strategy()
    ) {
        let cache = cache();
        for (i, (key, deps)) in puts.into_iter().enumerate() {
            let _ = cache.put(key, i as u32, &deps);
        }

        let doomed = cache.transitive_dependents(target);
        let stored_before: HashSet<String> = cache.keys().unwrap().into_iter().collect();
        let evicted = cache.remove(target).unwrap();

        let expected = doomed
            .iter()
            .chain(std::iter::once(&target.to_string()))
            .filter(|k| stored_before.contains(*k))
            .count();
        prop_assert_eq!(evicted, expected);
        for key in doomed {
            prop_assert!(!cache.contains_key(&key).unwrap(), "{} survived", key);
        }
        prop_assert!(!cache.contains_key(target).unwrap());
        prop_assert!(cache.dependents(target).is_empty());
    }

    // Re-putting a key leaves only the second set of edges.
    #[test]
    fn prop_replace_keeps_only_latest_edges(
        first in dependencies_strategy(),
        second in dependencies_strategy()
    ) {
        // "z" is outside the key space, so neither edge set can form a cycle
        let cache = cache();
        cache.put("z", 1, &first).unwrap();
        cache.put("z", 2, &second).unwrap();

        let expected: HashSet<String> = second.iter().map(|d| d.to_string()).collect();
        prop_assert_eq!(cache.dependencies("z"), expected.clone());
        for dependency in first {
            prop_assert_eq!(
                cache.dependents(dependency).contains("z"),
                expected.contains(dependency)
            );
        }
    }

    // A rejected edge set never mutates the graph.
    #[test]
    fn prop_cycle_rejection_is_side_effect_free(
        edges in prop::collection::vec((key_strategy(), dependencies_strategy()), 1..20),
        key in key_strategy(),
        deps in dependencies_strategy()
    ) {
        let mut graph = DependencyGraph::new();
        for (k, d) in &edges {
            let _ = graph.replace_edges(k, d);
        }

        let before: Vec<_> = KEYS
            .iter()
            .map(|k| (graph.dependencies(k), graph.dependents(k)))
            .collect();

        if graph.replace_edges(key, &deps).is_err() {
            let after: Vec<_> = KEYS
                .iter()
                .map(|k| (graph.dependencies(k), graph.dependents(k)))
                .collect();
            prop_assert_eq!(before, after);
        }
        prop_assert!(graph.is_consistent());
    }
}
