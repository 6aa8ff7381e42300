use alloy_primitives::{Bytes, B256};
use parking_lot::RwLock;
use std::collections::HashMap;

/// In-memory set of trie nodes reachable from the retained window of roots.
///
/// Born during the background scan, maintained incrementally while the
/// collector is ready, and consumed exactly once when the swap executor
/// stages it. Writers are externally serialized (the scan worker until
/// handoff, the controller thereafter); the lock only makes that handoff
/// sound.
#[derive(Debug, Default)]
pub struct ReachableSet {
    nodes: RwLock<HashMap<B256, Bytes>>,
}

impl ReachableSet {
    /// Creates an empty set.
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts the node if its hash is absent.
    ///
    /// Returns `false` when the hash was already present; the stored body is
    /// never overwritten.
    pub fn insert_new(&self, hash: B256, node: &[u8]) -> bool {
        use std::collections::hash_map::Entry;
        match self.nodes.write().entry(hash) {
            Entry::Occupied(_) => false,
            Entry::Vacant(entry) => {
                entry.insert(Bytes::copy_from_slice(node));
                true
            }
        }
    }

    /// Whether the hash is captured.
    pub fn contains(&self, hash: &B256) -> bool {
        self.nodes.read().contains_key(hash)
    }

    /// Number of captured nodes.
    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    /// Whether the set is empty.
    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// Visits every `(hash, body)` pair. Iteration order is unspecified.
    ///
    /// Only used while staging.
    pub fn for_each<F>(&self, mut f: F)
    where
        F: FnMut(&B256, &Bytes),
    {
        for (hash, body) in self.nodes.read().iter() {
            f(hash, body);
        }
    }
}
