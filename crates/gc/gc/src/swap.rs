//! The two-phase swap that persists the reachable set.
//!
//! Phase A ([`stage`]) runs at a quiescent point and writes the set into the
//! staging table; the process then restarts. Phase B ([`promote_staged`])
//! runs on the next boot, before anything reads account state, and replaces
//! the live table with the staged rows. The restart is the serialization
//! point: no reader ever observes a half-swapped table.

use crate::{
    error::SwapError,
    reachable::ReachableSet,
    store::{StateStore, StateTable, StateTxMut, StoreError},
};
use alloy_primitives::Bytes;
use tracing::{info, warn};

/// Outcome of the startup promotion.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PromoteOutcome {
    /// Staged rows replaced the live account-state table.
    Promoted {
        /// Rows copied into the live table.
        rows: u64,
    },
    /// No staging table (or an empty one) was found; nothing was touched.
    Nothing,
}

/// Phase A: writes the reachable set into the staging table.
///
/// All rows land in a single synchronous transaction. On failure the live
/// table is untouched and the staging table is removed again, so a later
/// boot cannot mistake the attempt for a completed Phase A. Returns the
/// number of rows staged.
pub fn stage<S: StateStore>(store: &S, set: &ReachableSet) -> Result<u64, SwapError> {
    store
        .create_table(StateTable::AccountStateStaging)
        .map_err(SwapError::StageFailed)?;

    let staged = write_staging_rows(store, set);
    if staged.is_err() {
        if let Err(err) = store.drop_table(StateTable::AccountStateStaging) {
            warn!(target: "gc", %err, "Failed to remove staging table after aborted stage");
        }
    }
    staged
}

fn write_staging_rows<S: StateStore>(store: &S, set: &ReachableSet) -> Result<u64, SwapError> {
    let mut tx = store.tx_mut().map_err(SwapError::StageFailed)?;
    // a stale staging table from an earlier aborted attempt must not leak
    // rows into this one
    tx.clear(StateTable::AccountStateStaging).map_err(SwapError::StageFailed)?;

    let mut rows = 0u64;
    let mut write_err: Option<StoreError> = None;
    set.for_each(|hash, body| {
        if write_err.is_none() {
            match tx.put(StateTable::AccountStateStaging, *hash, body) {
                Ok(()) => rows += 1,
                Err(err) => write_err = Some(err),
            }
        }
    });
    if let Some(err) = write_err {
        // dropping the uncommitted tx discards every buffered row
        return Err(SwapError::StageFailed(err))
    }
    tx.commit().map_err(SwapError::StageFailed)?;

    info!(target: "gc", rows, "Staged reachable account state");
    Ok(rows)
}

/// Phase B: replaces the live account-state table with the staged rows.
///
/// Must run on boot before anything reads account state. The clear-and-copy
/// is one transaction, and the staging table is dropped only after it
/// commits; a crash anywhere in between is repaired by running this again on
/// the next boot.
pub fn promote_staged<S: StateStore>(store: &S) -> Result<PromoteOutcome, SwapError> {
    if !store
        .table_exists(StateTable::AccountStateStaging)
        .map_err(SwapError::PromoteFailed)?
    {
        return Ok(PromoteOutcome::Nothing)
    }
    if store
        .is_empty(StateTable::AccountStateStaging)
        .map_err(SwapError::PromoteFailed)?
    {
        return Ok(PromoteOutcome::Nothing)
    }

    let mut tx = store.tx_mut().map_err(SwapError::PromoteFailed)?;
    tx.clear(StateTable::AccountState).map_err(SwapError::PromoteFailed)?;

    let mut staged = Vec::new();
    tx.for_each(StateTable::AccountStateStaging, &mut |key, body| {
        staged.push((key, Bytes::copy_from_slice(body)));
        Ok(())
    })
    .map_err(SwapError::PromoteFailed)?;

    let rows = staged.len() as u64;
    for (key, body) in staged {
        tx.put(StateTable::AccountState, key, &body).map_err(SwapError::PromoteFailed)?;
    }
    tx.commit().map_err(SwapError::PromoteFailed)?;

    store
        .drop_table(StateTable::AccountStateStaging)
        .map_err(SwapError::PromoteFailed)?;

    info!(target: "gc", rows, "Promoted staged account state");
    Ok(PromoteOutcome::Promoted { rows })
}
