//! Tip-level (one confirmation) scanning for the unconfirmed TVL
//! projection.
//!
//! This worker shares the lifecycle store read-only and owns the
//! unconfirmed counter through the tracker.  The tip view is advisory, so
//! per-tx problems are logged rather than escalated; only a dead publisher
//! stops it.

use std::sync::Arc;

use stakeidx_btcio::TipBlock;
use stakeidx_db::StakingIndexerDatabase;
use stakeidx_params::VersionedStakingParams;
use stakeidx_staketx::{classify_tx, ClassifierError, TxClassification};
use stakeidx_tasks::ShutdownGuard;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::{lookup::DbStakeLookup, tracker::UnconfirmedTracker};

pub async fn run_tip_worker<D: StakingIndexerDatabase>(
    db: Arc<D>,
    params: Arc<VersionedStakingParams>,
    tracker: Arc<UnconfirmedTracker>,
    mut tip_rx: mpsc::Receiver<TipBlock>,
    shutdown: ShutdownGuard,
) -> anyhow::Result<()> {
    info!("started tip worker");
    let lookup = DbStakeLookup::new(db.clone());

    while let Some(ev) = tip_rx.recv().await {
        if shutdown.should_shutdown() {
            break;
        }
        debug!(height = %ev.height, "scanning tip block");

        for tx in &ev.block.txdata {
            match classify_tx(tx, ev.height, &params, &lookup) {
                Ok(TxClassification::Staking(tx_info)) => {
                    tracker
                        .on_tip_staking(tx.compute_txid(), tx_info.staking_value)
                        .await?;
                }
                Ok(TxClassification::Unbonding { staking_txid })
                | Ok(TxClassification::Withdraw {
                    staking_txid,
                    from_unbonding: false,
                }) => {
                    // The stake leaves the tip view as soon as its spend has
                    // one confirmation.
                    match db.get_staking_tx(staking_txid) {
                        Ok(Some(stake)) if !stake.is_overflow() => {
                            tracker
                                .on_tip_exit(tx.compute_txid(), stake.staking_value())
                                .await?;
                        }
                        Ok(_) => {}
                        Err(e) => {
                            warn!(%staking_txid, err = %e, "stake lookup failed in tip scan");
                        }
                    }
                }
                Ok(TxClassification::Withdraw {
                    from_unbonding: true,
                    ..
                })
                | Ok(TxClassification::Irrelevant) => {}
                Err(ClassifierError::Ambiguous(txid)) => {
                    warn!(%txid, height = %ev.height, "ambiguous tx in tip scan ignored");
                }
                Err(e) => {
                    warn!(height = %ev.height, err = %e, "tip classification failed");
                }
            }
        }
    }

    info!("tip worker exiting");
    Ok(())
}
