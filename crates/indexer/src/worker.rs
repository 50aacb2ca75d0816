//! The confirmed-block pipeline.
//!
//! A single logical worker consumes depth-k blocks in strict height order
//! and, per transaction, runs classify → store → cap → publish, then writes
//! the checkpoint and acks the block back to the poller.  Durability always
//! precedes publishing, and the checkpoint always comes last; restarting
//! from the checkpoint therefore re-emits anything not known to be
//! delivered (at-least-once) and never skips an event.

use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{anyhow, Context};
use bitcoin::{Amount, Block, Transaction, Txid};
use stakeidx_btcio::ConfirmedBlock;
use stakeidx_db::{DbError, ProgressDatabase, StakingIndexerDatabase, StoredStakingTx, StoredUnbondingTx};
use stakeidx_events::{Publisher, StakingEvent};
use stakeidx_params::VersionedStakingParams;
use stakeidx_staketx::{classify_tx, ClassifierError, StakingTxInfo, TxClassification};
use stakeidx_tasks::ShutdownGuard;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::{cap::CapEnforcer, lookup::DbStakeLookup, tracker::UnconfirmedTracker};

/// Retry policy for transient failures while processing a block.  The
/// budget bounds the backoff growth and escalates logging; the pipeline
/// itself keeps blocking rather than drop work.
#[derive(Clone, Copy, Debug)]
pub struct ExecConfig {
    pub retry_base_dur: Duration,
    pub retry_cnt_max: u32,
    /// Per-mille backoff multiplier applied between attempts.
    pub retry_backoff_mult: u64,
}

impl Default for ExecConfig {
    fn default() -> Self {
        Self {
            retry_base_dur: Duration::from_millis(500),
            retry_cnt_max: 10,
            retry_backoff_mult: 1500,
        }
    }
}

impl ExecConfig {
    fn compute_retry_backoff(&self, dur: Duration) -> Duration {
        Duration::from_millis(dur.as_millis() as u64 * self.retry_backoff_mult / 1000)
    }
}

/// Mutable pipeline state.  Not shared; everything downstream is reached
/// through explicit calls.
pub struct IndexerState<D> {
    params: Arc<VersionedStakingParams>,
    db: Arc<D>,
    lookup: DbStakeLookup<D>,
    publisher: Publisher,
    tracker: Arc<UnconfirmedTracker>,
    cap: CapEnforcer,
    /// Stakes whose graduation already reached the TVL tracker.
    counted_stakes: HashSet<Txid>,
    /// Stakes whose exit already reached the cap enforcer and tracker.
    exited_stakes: HashSet<Txid>,
}

impl<D> IndexerState<D>
where
    D: StakingIndexerDatabase + ProgressDatabase,
{
    /// Rebuilds derived state from the durable store and computes the
    /// height to resume scanning from.
    ///
    /// Returns the state, the TVL tracker (shared with the tip worker) and
    /// the start height.
    pub fn open(
        params: Arc<VersionedStakingParams>,
        db: Arc<D>,
        publisher: Publisher,
        start_height_override: Option<u64>,
    ) -> anyhow::Result<(Self, Arc<UnconfirmedTracker>, u64)> {
        let mut cap = CapEnforcer::new();
        let mut confirmed_tvl = Amount::ZERO;
        let mut counted_stakes = HashSet::new();
        let mut exited_stakes = HashSet::new();

        for (txid, stake) in db.staking_txs_from_height(0)? {
            counted_stakes.insert(txid);
            if !stake.is_overflow() {
                cap.note_active_stake(stake.params_version(), stake.staking_value());
                confirmed_tvl = confirmed_tvl
                    .checked_add(stake.staking_value())
                    .unwrap_or(Amount::MAX_MONEY);
            }
        }

        for (ub_txid, unbonding) in db.unbonding_txs_from_height(0)? {
            let parent = unbonding.staking_txid();
            let stake = db
                .get_staking_tx(parent)?
                .with_context(|| format!("unbonding {ub_txid} without parent {parent} in store"))?;
            if !stake.is_overflow() && exited_stakes.insert(parent) {
                cap.on_stake_exit(stake.params_version(), stake.staking_value(), false);
                confirmed_tvl = confirmed_tvl
                    .checked_sub(stake.staking_value())
                    .unwrap_or(Amount::ZERO);
            }
        }

        let checkpoint = db.get_last_processed_height()?;
        let mut start_height = checkpoint
            .map(|h| h + 1)
            .unwrap_or_else(|| params.earliest_activation_height());
        if let Some(forced) = start_height_override {
            if forced < start_height {
                info!(%forced, "operator-forced backfill from below checkpoint");
                start_height = forced;
            } else {
                warn!(%forced, %start_height, "ignoring start height override beyond resume point");
            }
        }

        info!(
            %start_height,
            ?checkpoint,
            active_stakes = cap.active_stake_count(),
            confirmed_tvl = %confirmed_tvl,
            "rebuilt indexer state from store"
        );

        let tracker = Arc::new(UnconfirmedTracker::new(publisher.clone(), confirmed_tvl));
        let state = Self {
            params,
            lookup: DbStakeLookup::new(db.clone()),
            db,
            publisher,
            tracker: tracker.clone(),
            cap,
            counted_stakes,
            exited_stakes,
        };
        Ok((state, tracker, start_height))
    }

    /// Processes one confirmed block: every tx in block order, then the
    /// checkpoint.
    pub async fn process_block(&mut self, height: u64, block: &Block) -> anyhow::Result<()> {
        debug!(%height, txs = block.txdata.len(), "processing confirmed block");

        for tx in &block.txdata {
            match classify_tx(tx, height, &self.params, &self.lookup) {
                Ok(TxClassification::Staking(info)) => {
                    self.handle_staking(tx, &info, height).await?;
                }
                Ok(TxClassification::Unbonding { staking_txid }) => {
                    self.handle_unbonding(tx, staking_txid, height).await?;
                }
                Ok(TxClassification::Withdraw {
                    staking_txid,
                    from_unbonding,
                }) => {
                    self.handle_withdraw(staking_txid, from_unbonding, height).await?;
                }
                Ok(TxClassification::Irrelevant) => {}
                Err(ClassifierError::Ambiguous(txid)) => {
                    // No record is written, so correctness is preserved;
                    // just leave a trace for the operator.
                    warn!(%txid, %height, "ambiguous tx ignored");
                }
                Err(e) => return Err(anyhow!(e).context("classifier failed")),
            }
        }

        self.db.set_last_processed_height(height)?;
        debug!(%height, "checkpoint advanced");
        Ok(())
    }

    async fn handle_staking(
        &mut self,
        tx: &Transaction,
        info: &StakingTxInfo,
        height: u64,
    ) -> anyhow::Result<()> {
        let txid = tx.compute_txid();

        // A replayed stake keeps its original overflow flag; deciding again
        // would double-count the accumulator.
        let is_overflow = match self.db.get_staking_tx(txid)? {
            Some(existing) => existing.is_overflow(),
            None => {
                let params = self
                    .params
                    .params_for_version(info.params_version)
                    .ok_or_else(|| anyhow!("params version {} disappeared", info.params_version))?;
                let is_overflow = self.cap.decide(info.staking_value, height, params);
                let record = StoredStakingTx::new(
                    tx,
                    info.staking_output_index,
                    height,
                    info.data.staking_time,
                    info.staking_value,
                    &info.data.staker_pk,
                    &info.data.finality_provider_pk,
                    is_overflow,
                    info.params_version,
                );
                match self.db.put_staking_tx(txid, record) {
                    Ok(()) | Err(DbError::AlreadyExists) => {}
                    Err(e) => return Err(e.into()),
                }
                is_overflow
            }
        };

        info!(
            %txid,
            %height,
            value = %info.staking_value,
            %is_overflow,
            "staking tx confirmed"
        );

        self.publisher
            .publish(StakingEvent::ActiveStaking {
                staking_tx_hash: txid,
                staker_pk: info.data.staker_pk,
                finality_provider_pk: info.data.finality_provider_pk,
                staking_value: info.staking_value,
                staking_time: info.data.staking_time,
                is_overflow,
                inclusion_height: height,
            })
            .await?;

        if self.counted_stakes.insert(txid) {
            self.tracker
                .on_confirmed_stake(txid, info.staking_value, is_overflow)
                .await?;
        }
        Ok(())
    }

    async fn handle_unbonding(
        &mut self,
        tx: &Transaction,
        staking_txid: Txid,
        height: u64,
    ) -> anyhow::Result<()> {
        let txid = tx.compute_txid();
        let stake = self.db.get_staking_tx(staking_txid)?.ok_or_else(|| {
            anyhow!("invariant violated: unbonding {txid} references unknown stake {staking_txid}")
        })?;

        if self.db.get_unbonding_tx(txid)?.is_none() {
            let record = StoredUnbondingTx::new(tx, staking_txid, height);
            match self.db.put_unbonding_tx(txid, record) {
                Ok(()) | Err(DbError::AlreadyExists) => {}
                Err(DbError::MissingParent(parent)) => {
                    return Err(anyhow!(
                        "invariant violated: parent stake {parent} vanished during insert"
                    ));
                }
                Err(e) => return Err(e.into()),
            }
        }

        info!(%txid, %staking_txid, %height, "unbonding tx confirmed");

        self.publisher
            .publish(StakingEvent::Unbonding {
                staking_tx_hash: staking_txid,
                unbonding_tx_hash: txid,
                inclusion_height: height,
            })
            .await?;

        self.exit_stake(staking_txid, &stake).await
    }

    async fn handle_withdraw(
        &mut self,
        staking_txid: Txid,
        from_unbonding: bool,
        height: u64,
    ) -> anyhow::Result<()> {
        info!(%staking_txid, %from_unbonding, %height, "withdraw tx confirmed");

        self.publisher
            .publish(StakingEvent::Withdraw {
                staking_tx_hash: staking_txid,
                is_from_unbonding: from_unbonding,
                inclusion_height: height,
            })
            .await?;

        // A withdraw from an unbonding output exits nothing further; the
        // stake already left at the unbonding.
        if !from_unbonding {
            let stake = self.db.get_staking_tx(staking_txid)?.ok_or_else(|| {
                anyhow!("invariant violated: withdraw references unknown stake {staking_txid}")
            })?;
            self.exit_stake(staking_txid, &stake).await?;
        }
        Ok(())
    }

    /// Applies the cap and TVL effects of a stake leaving, exactly once per
    /// stake.  Overflow stakes never contributed, so their exits are no-ops.
    async fn exit_stake(
        &mut self,
        staking_txid: Txid,
        stake: &StoredStakingTx,
    ) -> anyhow::Result<()> {
        if stake.is_overflow() || !self.exited_stakes.insert(staking_txid) {
            return Ok(());
        }
        self.cap
            .on_stake_exit(stake.params_version(), stake.staking_value(), false);
        self.tracker.on_confirmed_exit(stake.staking_value()).await?;
        Ok(())
    }

    pub fn tracker(&self) -> &Arc<UnconfirmedTracker> {
        &self.tracker
    }
}

/// Receives confirmed blocks and drives the pipeline until shutdown.
pub async fn run_confirmed_worker<D>(
    mut state: IndexerState<D>,
    mut confirmed_rx: mpsc::Receiver<ConfirmedBlock>,
    config: ExecConfig,
    shutdown: ShutdownGuard,
) -> anyhow::Result<()>
where
    D: StakingIndexerDatabase + ProgressDatabase,
{
    info!("started confirmed-block worker");

    while let Some(ev) = confirmed_rx.recv().await {
        if shutdown.should_shutdown() {
            break;
        }
        if !process_block_with_retries(&mut state, ev.height, &ev.block, &config, &shutdown)
            .await?
        {
            // Interrupted by shutdown; the block is not acked and the
            // checkpoint still points at the previous one.
            break;
        }
        let _ = ev.ack.send(());
    }

    info!("confirmed-block worker exiting");
    Ok(())
}

/// Retries transient failures with bounded backoff growth.  Returns
/// `Ok(false)` when shutdown interrupted the block mid-retry.
async fn process_block_with_retries<D>(
    state: &mut IndexerState<D>,
    height: u64,
    block: &Block,
    config: &ExecConfig,
    shutdown: &ShutdownGuard,
) -> anyhow::Result<bool>
where
    D: StakingIndexerDatabase + ProgressDatabase,
{
    let mut tries = 0u32;
    let mut wait_dur = config.retry_base_dur;
    loop {
        let e = match state.process_block(height, block).await {
            Ok(()) => return Ok(true),
            Err(e) => e,
        };

        if !is_transient(&e) {
            error!(%height, err = %e, "fatal error processing block, aborting");
            return Err(e);
        }

        tries += 1;
        if tries > config.retry_cnt_max {
            error!(%height, %tries, err = %e, "retry budget exhausted, pipeline stalled");
        } else {
            warn!(%height, %tries, err = %e, "transient failure, retrying block");
            wait_dur = config.compute_retry_backoff(wait_dur);
        }

        tokio::select! {
            _ = shutdown.wait_for_shutdown() => return Ok(false),
            _ = tokio::time::sleep(wait_dur) => {}
        }
    }
}

fn is_transient(e: &anyhow::Error) -> bool {
    matches!(e.downcast_ref::<DbError>(), Some(DbError::Backend(_)))
}
