use crate::{provider::ProviderError, store::StoreError};
use alloy_primitives::BlockNumber;

/// Error produced while scanning tries for reachable nodes.
#[derive(Debug, thiserror::Error)]
pub enum ScanError {
    /// The trie root for a requested height could not be resolved, e.g. the
    /// chain store raced with a reorg.
    #[error("account trie unavailable at height {height}")]
    TrieUnavailable {
        /// Height whose root was requested.
        height: BlockNumber,
    },
    /// The chain store failed during traversal.
    #[error(transparent)]
    Provider(#[from] ProviderError),
}

/// Error produced by the stage/promote swap.
#[derive(Debug, thiserror::Error)]
pub enum SwapError {
    /// The staging transaction aborted; the live table is untouched.
    #[error("staging the reachable set failed: {0}")]
    StageFailed(StoreError),
    /// The promote transaction aborted at startup. Fatal: the node must not
    /// proceed with an inconsistent account table.
    #[error("promoting staged account state failed: {0}")]
    PromoteFailed(StoreError),
}

/// Umbrella error for collector operations.
#[derive(Debug, thiserror::Error)]
pub enum GcError {
    /// Scan failure.
    #[error(transparent)]
    Scan(#[from] ScanError),
    /// Swap failure.
    #[error(transparent)]
    Swap(#[from] SwapError),
    /// The collector service is no longer running.
    #[error("gc service unavailable")]
    ServiceUnavailable,
}
