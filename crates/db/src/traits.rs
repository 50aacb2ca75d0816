//! Trait definitions for the lifecycle store and progress checkpoint.
//!
//! Operations are durable when they return: a successful `put_*` must
//! survive a crash, since the event publisher is told to emit only after the
//! write lands.  That ordering is what makes delivery at-least-once.

use bitcoin::{OutPoint, Txid};

use crate::{
    errors::DbResult,
    types::{StoredStakingTx, StoredUnbondingTx},
};

/// Store of recognised staking and unbonding transactions, keyed by txid and
/// indexed by inclusion height and by protocol outpoint.
pub trait StakingIndexerDatabase: Send + Sync + 'static {
    /// Inserts a staking record.  Errors with
    /// [`DbError::AlreadyExists`](crate::DbError::AlreadyExists) on a
    /// duplicate; callers replaying blocks treat that as a no-op.
    fn put_staking_tx(&self, txid: Txid, record: StoredStakingTx) -> DbResult<()>;

    fn get_staking_tx(&self, txid: Txid) -> DbResult<Option<StoredStakingTx>>;

    /// Looks up the staking record whose staking output is `outpoint`.
    fn get_staking_tx_by_outpoint(
        &self,
        outpoint: OutPoint,
    ) -> DbResult<Option<(Txid, StoredStakingTx)>>;

    /// All staking records at `height` or later, ascending by inclusion
    /// height (ties in insertion order).  Used to rebuild derived state on
    /// startup.
    fn staking_txs_from_height(&self, height: u64) -> DbResult<Vec<(Txid, StoredStakingTx)>>;

    /// Inserts an unbonding record.  Errors with `AlreadyExists` on a
    /// duplicate and with `MissingParent` when the referenced staking tx is
    /// not stored.
    fn put_unbonding_tx(&self, txid: Txid, record: StoredUnbondingTx) -> DbResult<()>;

    fn get_unbonding_tx(&self, txid: Txid) -> DbResult<Option<StoredUnbondingTx>>;

    /// Looks up the unbonding record whose (sole) output is `outpoint`.
    fn get_unbonding_tx_by_outpoint(
        &self,
        outpoint: OutPoint,
    ) -> DbResult<Option<(Txid, StoredUnbondingTx)>>;

    /// All unbonding records at `height` or later, ascending by inclusion
    /// height.
    fn unbonding_txs_from_height(&self, height: u64)
        -> DbResult<Vec<(Txid, StoredUnbondingTx)>>;
}

/// Single-record checkpoint of scanner progress.
pub trait ProgressDatabase: Send + Sync + 'static {
    /// Height of the last fully processed block, if any block has completed.
    fn get_last_processed_height(&self) -> DbResult<Option<u64>>;

    /// Atomically records that every event from blocks up to and including
    /// `height` has been handed to the publisher.
    fn set_last_processed_height(&self, height: u64) -> DbResult<()>;
}
