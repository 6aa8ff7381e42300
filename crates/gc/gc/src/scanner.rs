use crate::{
    error::ScanError,
    provider::StateReader,
    reachable::ReachableSet,
    visitor::{StoreHash, StoreUnseenHash},
};
use alloy_primitives::{BlockNumber, B256};
use std::time::Instant;
use tracing::{debug, trace};

/// Walks account tries by height and folds their nodes into a
/// [`ReachableSet`].
#[derive(Debug, Clone)]
pub struct Scanner<P> {
    provider: P,
}

impl<P: StateReader> Scanner<P> {
    /// Creates a scanner over the given chain view.
    pub const fn new(provider: P) -> Self {
        Self { provider }
    }

    /// Resolves the account trie root at a height.
    fn root_at(&self, height: BlockNumber) -> Result<B256, ScanError> {
        let block_hash = self
            .provider
            .key_block_hash(height)?
            .ok_or(ScanError::TrieUnavailable { height })?;
        self.provider
            .account_state_root(block_hash)?
            .ok_or(ScanError::TrieUnavailable { height })
    }

    /// Captures every node reachable from the root at `height` into a fresh
    /// set. Cost is proportional to the size of that trie.
    pub fn full_scan(&self, height: BlockNumber) -> Result<ReachableSet, ScanError> {
        let root = self.root_at(height)?;
        let set = ReachableSet::new();
        let started = Instant::now();
        self.provider.visit_reachable_nodes(root, &mut StoreHash::new(&set))?;
        debug!(
            target: "gc",
            height,
            nodes = set.len(),
            elapsed = ?started.elapsed(),
            "Full scan finished"
        );
        Ok(set)
    }

    /// Merges nodes reachable at `height` into `set`.
    ///
    /// Subtrees whose root is already captured are skipped entirely, so the
    /// work is proportional to the difference between this trie and the ones
    /// already folded in. The set is never shrunk; on failure it is left as
    /// it was for the heights that did complete.
    pub fn delta_scan(&self, height: BlockNumber, set: &ReachableSet) -> Result<(), ScanError> {
        let root = self.root_at(height)?;
        self.provider.visit_reachable_nodes(root, &mut StoreUnseenHash::new(set))?;
        trace!(target: "gc", height, nodes = set.len(), "Delta scan finished");
        Ok(())
    }

    /// Applies a delta scan at every height in `(lo, hi]`, ascending.
    ///
    /// A no-op when `hi <= lo`. Ascending order only matters for cost
    /// (earlier deltas shrink later ones); the union is the same in any
    /// order.
    pub fn range_scan(
        &self,
        lo: BlockNumber,
        hi: BlockNumber,
        set: &ReachableSet,
    ) -> Result<(), ScanError> {
        for height in lo.saturating_add(1)..=hi {
            self.delta_scan(height, set)?;
        }
        Ok(())
    }
}
