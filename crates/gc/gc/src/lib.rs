//! Account-state trie garbage collector.
//!
//! A blockchain node keeps account state in a persistent Merkle-Patricia
//! Trie; every block commits a new root, and the backing store accumulates
//! nodes no longer reachable from any root of interest. This crate prunes
//! that long tail: a background scan captures every node reachable from a
//! sliding window of recent roots into an in-memory [`ReachableSet`], the set
//! is maintained incrementally as the chain advances, and at a quiescent
//! point it is staged durably and swapped into the live table across a
//! controlled restart.
//!
//! The embedding node supplies three seams: a [`StateReader`] resolving
//! heights to trie roots and driving reachability traversals, a
//! [`StateStore`] giving transactional access to the account-state tables,
//! and a [`NodeHandle`] that can stop consensus and restart the process.
//! The [`GcService`] drives everything from chain events; on boot,
//! [`promote_staged`] must run before anything reads account state.

#![cfg_attr(not(test), warn(unused_crate_dependencies))]
#![cfg_attr(docsrs, feature(doc_cfg, doc_auto_cfg))]

mod error;
mod events;
mod metrics;
mod provider;
mod reachable;
mod scanner;
mod service;
mod store;
mod swap;
mod visitor;

pub use error::{GcError, ScanError, SwapError};
pub use events::spawn_event_bridge;
pub use provider::{NodeHandle, ProviderError, StateReader};
pub use reachable::ReachableSet;
pub use scanner::Scanner;
pub use service::{GcHandle, GcService};
pub use store::{StateStore, StateTable, StateTxMut, StoreError};
pub use swap::{promote_staged, stage, PromoteOutcome};
pub use visitor::{StoreHash, StoreUnseenHash, TrieVisitor, VisitControl};

pub use trie_gc_types::{
    BlockKind, GcConfig, GcConfigError, GcEvent, QuiesceOutcome, TopChanged,
};

#[cfg(any(test, feature = "test-utils"))]
pub mod test_utils;
