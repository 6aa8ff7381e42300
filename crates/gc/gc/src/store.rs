use alloy_primitives::B256;
use std::fmt;

/// Tables of the account-state keyspace the collector touches.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StateTable {
    /// Live table holding the serialized account-trie nodes.
    AccountState,
    /// Durable side table holding the pruned row set between the two swap
    /// phases. Its presence on boot signals an in-progress swap.
    AccountStateStaging,
}

impl StateTable {
    /// Table name in the backing store.
    pub const fn name(&self) -> &'static str {
        match self {
            Self::AccountState => "account_state",
            Self::AccountStateStaging => "account_state_staging",
        }
    }
}

impl fmt::Display for StateTable {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Failure raised by the key/value backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// The table has not been created.
    #[error("unknown table {0}")]
    TableNotFound(&'static str),
    /// Backend-specific failure.
    #[error(transparent)]
    Backend(#[from] Box<dyn std::error::Error + Send + Sync>),
}

/// Transactional access to the account-state tables.
///
/// The staging table must be creatable with the same schema and backend
/// flags as the live table; the collector only ever copies opaque
/// `hash -> body` rows between them.
pub trait StateStore: Send + Sync + 'static {
    /// Read-write transaction type.
    type TxMut: StateTxMut;

    /// Opens a read-write transaction with synchronous durability.
    fn tx_mut(&self) -> Result<Self::TxMut, StoreError>;

    /// Creates the table if it does not exist, with the account-state
    /// schema.
    fn create_table(&self, table: StateTable) -> Result<(), StoreError>;

    /// Removes the table and all of its rows.
    fn drop_table(&self, table: StateTable) -> Result<(), StoreError>;

    /// Whether the table exists.
    fn table_exists(&self, table: StateTable) -> Result<bool, StoreError>;

    /// Whether the table holds no rows.
    fn is_empty(&self, table: StateTable) -> Result<bool, StoreError>;
}

/// A read-write transaction over the account-state tables.
///
/// Writes buffer inside the transaction and become visible, durably, only on
/// [`commit`](Self::commit). Dropping an uncommitted transaction discards
/// every buffered write; this all-or-nothing behavior is what the swap's
/// crash-safety rests on.
pub trait StateTxMut: Send {
    /// Upserts one `hash -> body` row.
    fn put(&mut self, table: StateTable, key: B256, node: &[u8]) -> Result<(), StoreError>;

    /// Deletes every row of the table.
    fn clear(&mut self, table: StateTable) -> Result<(), StoreError>;

    /// Iterates the table's rows as visible to this transaction.
    fn for_each(
        &self,
        table: StateTable,
        f: &mut dyn FnMut(B256, &[u8]) -> Result<(), StoreError>,
    ) -> Result<(), StoreError>;

    /// Commits atomically: either every buffered write lands or none does.
    fn commit(self) -> Result<(), StoreError>;
}
