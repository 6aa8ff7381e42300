use alloy_primitives::BlockNumber;
use std::time::Duration;

/// Whether a block advances consensus height or only bundles transactions.
///
/// Only key blocks move the account trie root in a way the collector cares
/// about.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlockKind {
    /// A block that advances consensus height.
    Key,
    /// A block that only bundles transactions.
    Micro,
}

impl BlockKind {
    /// Returns `true` for a key block.
    pub const fn is_key(&self) -> bool {
        matches!(self, Self::Key)
    }

    /// Returns `true` for a micro block.
    pub const fn is_micro(&self) -> bool {
        matches!(self, Self::Micro)
    }
}

/// Notification that the chain store adopted a new top block.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TopChanged {
    /// Kind of the new top block.
    pub kind: BlockKind,
    /// Height of the new top block. Monotone along the main chain but may
    /// step sideways or down across a short fork.
    pub height: BlockNumber,
}

impl TopChanged {
    /// A key-block top at the given height.
    pub const fn key(height: BlockNumber) -> Self {
        Self { kind: BlockKind::Key, height }
    }

    /// A micro-block top at the given height.
    pub const fn micro(height: BlockNumber) -> Self {
        Self { kind: BlockKind::Micro, height }
    }
}

/// Reply to the conductor's quiescence call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QuiesceOutcome {
    /// The reachable set was staged and a controlled restart is underway.
    Restarting,
    /// Nothing was collected; the node keeps running.
    Nop,
}

/// An event emitted by the collector. Observational only.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GcEvent {
    /// A background reachability scan started.
    ScanStarted {
        /// Lowest height whose trie root the scan covers.
        base: BlockNumber,
        /// Top height at the moment the scan started.
        top: BlockNumber,
    },
    /// The background scan finished and the reachable set is live.
    ScanFinished {
        /// Lowest covered height.
        base: BlockNumber,
        /// Highest covered height.
        top: BlockNumber,
        /// Number of nodes in the reachable set.
        nodes: usize,
        /// Wall time the scan took.
        elapsed: Duration,
    },
    /// The reachable set was written to the staging table.
    Staged {
        /// Rows written.
        rows: u64,
    },
}
