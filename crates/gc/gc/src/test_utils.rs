//! In-memory chain, storage, and node-lifecycle implementations for tests.

use crate::{
    provider::{NodeHandle, ProviderError, StateReader},
    store::{StateStore, StateTable, StateTxMut, StoreError},
    visitor::{TrieVisitor, VisitControl},
};
use alloy_primitives::{BlockNumber, Bytes, B256};
use parking_lot::Mutex;
use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::{
        atomic::{AtomicBool, AtomicUsize, Ordering},
        Arc,
    },
};

/// Deterministic node hash for fixtures.
pub fn node_hash(id: u64) -> B256 {
    B256::left_padding_from(&id.to_be_bytes())
}

#[derive(Debug, Clone)]
struct MockTrieNode {
    body: Bytes,
    children: Vec<B256>,
}

#[derive(Debug, Default)]
struct ChainInner {
    key_blocks: BTreeMap<BlockNumber, B256>,
    roots: HashMap<B256, B256>,
    nodes: HashMap<B256, MockTrieNode>,
}

/// In-memory chain store holding per-height account tries that may share
/// structure. Counts visitor invocations so tests can assert that delta
/// scans skip captured subtrees.
#[derive(Debug, Default, Clone)]
pub struct MockChain {
    inner: Arc<Mutex<ChainInner>>,
    visits: Arc<AtomicUsize>,
}

impl MockChain {
    /// Creates an empty chain.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a trie node. Re-registering a hash keeps the first version,
    /// matching content addressing.
    pub fn insert_node(&self, hash: B256, body: &[u8], children: &[B256]) {
        self.inner.lock().nodes.entry(hash).or_insert_with(|| MockTrieNode {
            body: Bytes::copy_from_slice(body),
            children: children.to_vec(),
        });
    }

    /// Commits `root` as the account-state root of the key block at
    /// `height`.
    pub fn commit(&self, height: BlockNumber, root: B256) {
        let block_hash = Self::block_hash(height);
        let mut inner = self.inner.lock();
        inner.key_blocks.insert(height, block_hash);
        inner.roots.insert(block_hash, root);
    }

    /// Forgets the key block at `height`, simulating a store raced by a
    /// reorg.
    pub fn evict(&self, height: BlockNumber) {
        let mut inner = self.inner.lock();
        if let Some(block_hash) = inner.key_blocks.remove(&height) {
            inner.roots.remove(&block_hash);
        }
    }

    /// Total visitor invocations since construction or the last reset.
    pub fn visits(&self) -> usize {
        self.visits.load(Ordering::Relaxed)
    }

    /// Resets the visit counter.
    pub fn reset_visits(&self) {
        self.visits.store(0, Ordering::Relaxed);
    }

    fn block_hash(height: BlockNumber) -> B256 {
        let mut raw = [0u8; 32];
        raw[0] = 0xb1;
        raw[24..].copy_from_slice(&height.to_be_bytes());
        B256::new(raw)
    }
}

impl StateReader for MockChain {
    fn key_block_hash(&self, height: BlockNumber) -> Result<Option<B256>, ProviderError> {
        Ok(self.inner.lock().key_blocks.get(&height).copied())
    }

    fn account_state_root(&self, block_hash: B256) -> Result<Option<B256>, ProviderError> {
        Ok(self.inner.lock().roots.get(&block_hash).copied())
    }

    fn visit_reachable_nodes(
        &self,
        root: B256,
        visitor: &mut dyn TrieVisitor,
    ) -> Result<(), ProviderError> {
        let inner = self.inner.lock();
        let mut stack = vec![root];
        let mut seen = HashSet::new();
        while let Some(hash) = stack.pop() {
            if !seen.insert(hash) {
                continue
            }
            let node = inner
                .nodes
                .get(&hash)
                .ok_or_else(|| ProviderError::Backend(format!("missing trie node {hash}").into()))?;
            self.visits.fetch_add(1, Ordering::Relaxed);
            if visitor.visit(hash, &node.body) == VisitControl::Descend {
                stack.extend(node.children.iter().copied());
            }
        }
        Ok(())
    }
}

#[derive(Debug, Default)]
struct StoreInner {
    tables: HashMap<StateTable, BTreeMap<B256, Bytes>>,
    fail_next_commit: bool,
}

/// In-memory [`StateStore`] with snapshot transactions and commit-failure
/// injection.
///
/// Single-writer only: concurrent transactions would overwrite each other on
/// commit, which the collector never does.
#[derive(Debug, Clone)]
pub struct MockStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl Default for MockStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MockStore {
    /// Creates a store with an empty live account-state table.
    pub fn new() -> Self {
        let tables = HashMap::from([(StateTable::AccountState, BTreeMap::new())]);
        Self { inner: Arc::new(Mutex::new(StoreInner { tables, fail_next_commit: false })) }
    }

    /// Makes the next transaction commit fail.
    pub fn fail_next_commit(&self) {
        self.inner.lock().fail_next_commit = true;
    }

    /// Seeds one committed row, creating the table if needed.
    pub fn put_row(&self, table: StateTable, key: B256, body: &[u8]) {
        self.inner
            .lock()
            .tables
            .entry(table)
            .or_default()
            .insert(key, Bytes::copy_from_slice(body));
    }

    /// Committed rows of the table, if it exists.
    pub fn rows(&self, table: StateTable) -> Option<Vec<(B256, Bytes)>> {
        self.inner
            .lock()
            .tables
            .get(&table)
            .map(|rows| rows.iter().map(|(key, body)| (*key, body.clone())).collect())
    }

    /// Whether the table exists, without going through the trait.
    pub fn table_exists_raw(&self, table: StateTable) -> bool {
        self.inner.lock().tables.contains_key(&table)
    }
}

impl StateStore for MockStore {
    type TxMut = MockTx;

    fn tx_mut(&self) -> Result<Self::TxMut, StoreError> {
        let snapshot = self.inner.lock().tables.clone();
        Ok(MockTx { store: Arc::clone(&self.inner), tables: snapshot })
    }

    fn create_table(&self, table: StateTable) -> Result<(), StoreError> {
        self.inner.lock().tables.entry(table).or_default();
        Ok(())
    }

    fn drop_table(&self, table: StateTable) -> Result<(), StoreError> {
        self.inner.lock().tables.remove(&table);
        Ok(())
    }

    fn table_exists(&self, table: StateTable) -> Result<bool, StoreError> {
        Ok(self.table_exists_raw(table))
    }

    fn is_empty(&self, table: StateTable) -> Result<bool, StoreError> {
        self.inner
            .lock()
            .tables
            .get(&table)
            .map(BTreeMap::is_empty)
            .ok_or(StoreError::TableNotFound(table.name()))
    }
}

/// Transaction over a [`MockStore`]: mutates a snapshot that replaces the
/// committed state atomically on commit.
#[derive(Debug)]
pub struct MockTx {
    store: Arc<Mutex<StoreInner>>,
    tables: HashMap<StateTable, BTreeMap<B256, Bytes>>,
}

impl StateTxMut for MockTx {
    fn put(&mut self, table: StateTable, key: B256, node: &[u8]) -> Result<(), StoreError> {
        self.tables
            .get_mut(&table)
            .ok_or(StoreError::TableNotFound(table.name()))?
            .insert(key, Bytes::copy_from_slice(node));
        Ok(())
    }

    fn clear(&mut self, table: StateTable) -> Result<(), StoreError> {
        self.tables
            .get_mut(&table)
            .ok_or(StoreError::TableNotFound(table.name()))?
            .clear();
        Ok(())
    }

    fn for_each(
        &self,
        table: StateTable,
        f: &mut dyn FnMut(B256, &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError> {
        let rows = self.tables.get(&table).ok_or(StoreError::TableNotFound(table.name()))?;
        for (key, body) in rows {
            f(*key, body)?;
        }
        Ok(())
    }

    fn commit(self) -> Result<(), StoreError> {
        let mut store = self.store.lock();
        if store.fail_next_commit {
            store.fail_next_commit = false;
            return Err(StoreError::Backend("injected commit failure".into()))
        }
        store.tables = self.tables;
        Ok(())
    }
}

/// Records the lifecycle calls the collector makes while swapping.
#[derive(Debug, Default, Clone)]
pub struct MockNode {
    consensus_stopped: Arc<AtomicBool>,
    restarted: Arc<AtomicBool>,
}

impl MockNode {
    /// Creates an idle node handle.
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether the conductor was terminated.
    pub fn consensus_stopped(&self) -> bool {
        self.consensus_stopped.load(Ordering::Relaxed)
    }

    /// Whether a process restart was requested.
    pub fn restarted(&self) -> bool {
        self.restarted.load(Ordering::Relaxed)
    }
}

impl NodeHandle for MockNode {
    fn stop_consensus(&self) {
        self.consensus_stopped.store(true, Ordering::Relaxed);
    }

    fn restart(&self) {
        self.restarted.store(true, Ordering::Relaxed);
    }
}
