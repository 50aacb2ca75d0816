//! Store-backed spend lookup for the classifier.

use std::sync::Arc;

use bitcoin::OutPoint;
use stakeidx_db::StakingIndexerDatabase;
use stakeidx_staketx::{StakeLookup, StakedOutputInfo, UnbondingOutputInfo};
use tracing::error;

/// Adapts the lifecycle store to the classifier's read-only view.
pub struct DbStakeLookup<D> {
    db: Arc<D>,
}

impl<D> DbStakeLookup<D> {
    pub fn new(db: Arc<D>) -> Self {
        Self { db }
    }
}

impl<D: StakingIndexerDatabase> StakeLookup for DbStakeLookup<D> {
    fn staking_output(&self, outpoint: &OutPoint) -> Option<StakedOutputInfo> {
        let (txid, record) = match self.db.get_staking_tx_by_outpoint(*outpoint) {
            Ok(found) => found?,
            Err(e) => {
                error!(%outpoint, err = %e, "staking lookup failed");
                return None;
            }
        };
        let (staker_pk, finality_provider_pk) =
            match (record.staker_pk(), record.finality_provider_pk()) {
                (Ok(s), Ok(f)) => (s, f),
                _ => {
                    error!(%txid, "stored staking record has undecodable keys");
                    return None;
                }
            };
        Some(StakedOutputInfo {
            staking_txid: txid,
            staker_pk,
            finality_provider_pk,
            staking_time: record.staking_time(),
            staking_value: record.staking_value(),
            params_version: record.params_version(),
        })
    }

    fn unbonding_output(&self, outpoint: &OutPoint) -> Option<UnbondingOutputInfo> {
        let (_, unbonding) = match self.db.get_unbonding_tx_by_outpoint(*outpoint) {
            Ok(found) => found?,
            Err(e) => {
                error!(%outpoint, err = %e, "unbonding lookup failed");
                return None;
            }
        };
        let staking_txid = unbonding.staking_txid();
        let stake = match self.db.get_staking_tx(staking_txid) {
            Ok(Some(stake)) => stake,
            Ok(None) => {
                // Insertion-time invariant says this cannot happen.
                error!(%staking_txid, "unbonding record without parent stake");
                return None;
            }
            Err(e) => {
                error!(%staking_txid, err = %e, "parent stake lookup failed");
                return None;
            }
        };
        let staker_pk = match stake.staker_pk() {
            Ok(pk) => pk,
            Err(e) => {
                error!(%staking_txid, err = %e, "stored staking record has undecodable key");
                return None;
            }
        };
        Some(UnbondingOutputInfo {
            staking_txid,
            staker_pk,
            params_version: stake.params_version(),
        })
    }
}
