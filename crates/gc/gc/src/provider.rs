use crate::visitor::TrieVisitor;
use alloy_primitives::{BlockNumber, B256};

/// Failure raised by the chain store or trie backend.
#[derive(Debug, thiserror::Error)]
pub enum ProviderError {
    /// No state is committed for the given block hash.
    #[error("no committed state for block {0}")]
    StateMissing(B256),
    /// Backend-specific failure.
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Read-only view of the chain store and account trie.
///
/// Trie roots obtained through this trait are read-only snapshots; the
/// collector never interprets node bodies, it only copies them.
#[auto_impl::auto_impl(&, Arc)]
pub trait StateReader: Send + Sync + 'static {
    /// Resolves a height to its canonical key-block hash, or `None` if the
    /// chain store has no key block at that height.
    fn key_block_hash(&self, height: BlockNumber) -> Result<Option<B256>, ProviderError>;

    /// Root of the account trie in the state committed by the given block,
    /// or `None` if that state is gone.
    fn account_state_root(&self, block_hash: B256) -> Result<Option<B256>, ProviderError>;

    /// Performs a reachability traversal from `root`, invoking the visitor
    /// exactly once per reachable node.
    ///
    /// Returning [`VisitControl::SkipSubtree`](crate::VisitControl::SkipSubtree)
    /// from the visitor prunes the traversal below that node.
    fn visit_reachable_nodes(
        &self,
        root: B256,
        visitor: &mut dyn TrieVisitor,
    ) -> Result<(), ProviderError>;
}

/// Hooks into the embedding node's lifecycle, used to serialize the swap.
#[auto_impl::auto_impl(&, Arc)]
pub trait NodeHandle: Send + Sync + 'static {
    /// Cooperatively stops the consensus conductor so no further blocks are
    /// produced before the restart.
    fn stop_consensus(&self);

    /// Triggers the controlled process restart that promotes staged state.
    fn restart(&self);
}
