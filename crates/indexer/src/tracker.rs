//! Live TVL projection.
//!
//! Two satoshi counters: `confirmed` follows the depth-k pipeline,
//! `unconfirmed` follows the chain tip at one confirmation.  The pair is
//! mutated and published under one lock so consumers always observe
//! consistent snapshots.  Only non-overflow stakes count toward TVL.

use std::collections::HashSet;

use bitcoin::{Amount, Txid};
use stakeidx_events::{EventError, Publisher, StakingEvent};
use tokio::sync::Mutex;
use tracing::{debug, warn};

#[derive(Debug, Default)]
struct TvlInner {
    confirmed: Amount,
    unconfirmed: Amount,
    /// Stakes already counted at one confirmation.
    seen_tip_stakes: HashSet<Txid>,
    /// Spend txs already deducted at one confirmation.
    seen_tip_exits: HashSet<Txid>,
}

pub struct UnconfirmedTracker {
    inner: Mutex<TvlInner>,
    publisher: Publisher,
}

impl UnconfirmedTracker {
    /// `initial_confirmed` comes from replaying the store on startup; the
    /// unconfirmed side always restarts at zero and is rebuilt from the tip
    /// stream.
    pub fn new(publisher: Publisher, initial_confirmed: Amount) -> Self {
        Self {
            inner: Mutex::new(TvlInner {
                confirmed: initial_confirmed,
                unconfirmed: Amount::ZERO,
                seen_tip_stakes: HashSet::new(),
                seen_tip_exits: HashSet::new(),
            }),
            publisher,
        }
    }

    async fn emit(&self, inner: &TvlInner) -> Result<(), EventError> {
        self.publisher
            .publish(StakingEvent::UnconfirmedTvl {
                confirmed_tvl: inner.confirmed.to_sat(),
                unconfirmed_tvl: inner.unconfirmed.to_sat(),
                seq: self.publisher.next_tvl_seq(),
            })
            .await
    }

    /// Publishes the current snapshot without changing it.
    pub async fn emit_snapshot(&self) -> Result<(), EventError> {
        let inner = self.inner.lock().await;
        self.emit(&inner).await
    }

    /// A structurally valid staking tx reached one confirmation.
    pub async fn on_tip_staking(&self, txid: Txid, value: Amount) -> Result<(), EventError> {
        let mut inner = self.inner.lock().await;
        if !inner.seen_tip_stakes.insert(txid) {
            return Ok(());
        }
        inner.unconfirmed = inner.unconfirmed.checked_add(value).unwrap_or(Amount::MAX_MONEY);
        debug!(%txid, %value, "unconfirmed stake observed");
        self.emit(&inner).await
    }

    /// A spend of an active stake reached one confirmation.
    pub async fn on_tip_exit(&self, spend_txid: Txid, value: Amount) -> Result<(), EventError> {
        let mut inner = self.inner.lock().await;
        if !inner.seen_tip_exits.insert(spend_txid) {
            return Ok(());
        }
        inner.unconfirmed = sat_sub(inner.unconfirmed, value, "unconfirmed");
        debug!(%spend_txid, %value, "unconfirmed exit observed");
        self.emit(&inner).await
    }

    /// A staking tx graduated to depth k.  Overflow stakes are inactive for
    /// TVL; if one was counted at the tip it is uncounted here.
    pub async fn on_confirmed_stake(
        &self,
        txid: Txid,
        value: Amount,
        is_overflow: bool,
    ) -> Result<(), EventError> {
        let mut inner = self.inner.lock().await;
        if is_overflow {
            if inner.seen_tip_stakes.contains(&txid) {
                inner.unconfirmed = sat_sub(inner.unconfirmed, value, "unconfirmed");
                return self.emit(&inner).await;
            }
            return Ok(());
        }
        inner.confirmed = inner.confirmed.checked_add(value).unwrap_or(Amount::MAX_MONEY);
        self.emit(&inner).await
    }

    /// An exit (unbonding or direct withdraw) of a non-overflow stake
    /// graduated to depth k.
    pub async fn on_confirmed_exit(&self, value: Amount) -> Result<(), EventError> {
        let mut inner = self.inner.lock().await;
        inner.confirmed = sat_sub(inner.confirmed, value, "confirmed");
        self.emit(&inner).await
    }

    pub async fn confirmed_tvl(&self) -> Amount {
        self.inner.lock().await.confirmed
    }

    pub async fn unconfirmed_tvl(&self) -> Amount {
        self.inner.lock().await.unconfirmed
    }
}

/// Counters never go below zero; hitting zero from above is a logic-error
/// signal worth a log line, not a crash.
fn sat_sub(current: Amount, value: Amount, counter: &str) -> Amount {
    match current.checked_sub(value) {
        Some(v) => v,
        None => {
            warn!(%counter, %current, %value, "TVL counter underflow, clamping to zero");
            Amount::ZERO
        }
    }
}
