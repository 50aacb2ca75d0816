//! Event bodies and stable identifiers.

use bitcoin::{Amount, Txid, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

/// One lifecycle event, tagged by kind in the serialized form so consumers
/// can dispatch without out-of-band context.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "event_type", rename_all = "snake_case")]
pub enum StakingEvent {
    ActiveStaking {
        staking_tx_hash: Txid,
        staker_pk: XOnlyPublicKey,
        finality_provider_pk: XOnlyPublicKey,
        #[serde(with = "bitcoin::amount::serde::as_sat")]
        staking_value: Amount,
        staking_time: u16,
        is_overflow: bool,
        inclusion_height: u64,
    },
    Unbonding {
        staking_tx_hash: Txid,
        unbonding_tx_hash: Txid,
        inclusion_height: u64,
    },
    Withdraw {
        staking_tx_hash: Txid,
        is_from_unbonding: bool,
        inclusion_height: u64,
    },
    UnconfirmedTvl {
        confirmed_tvl: u64,
        unconfirmed_tvl: u64,
        /// Monotone per-process sequence; orders TVL snapshots relative to
        /// each other only.
        seq: u64,
    },
}

impl StakingEvent {
    /// The logical queue this event belongs to.
    pub fn queue(&self) -> &'static str {
        match self {
            Self::ActiveStaking { .. } => "staking",
            Self::Unbonding { .. } => "unbonding",
            Self::Withdraw { .. } => "withdraw",
            Self::UnconfirmedTvl { .. } => "unconfirmed_tvl",
        }
    }

    /// Stable unique id, `kind:tx_hash:height`, letting consumers dedupe
    /// at-least-once deliveries.
    pub fn event_id(&self) -> String {
        match self {
            Self::ActiveStaking {
                staking_tx_hash,
                inclusion_height,
                ..
            } => format!("active_staking:{staking_tx_hash}:{inclusion_height}"),
            Self::Unbonding {
                unbonding_tx_hash,
                inclusion_height,
                ..
            } => format!("unbonding:{unbonding_tx_hash}:{inclusion_height}"),
            Self::Withdraw {
                staking_tx_hash,
                is_from_unbonding,
                inclusion_height,
            } => {
                format!("withdraw:{staking_tx_hash}:{is_from_unbonding}:{inclusion_height}")
            }
            Self::UnconfirmedTvl { seq, .. } => format!("unconfirmed_tvl:{seq}"),
        }
    }
}

/// What actually goes over the wire: the event plus its id.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct EventEnvelope {
    pub event_id: String,
    #[serde(flatten)]
    pub event: StakingEvent,
}

impl EventEnvelope {
    pub fn new(event: StakingEvent) -> Self {
        Self {
            event_id: event.event_id(),
            event,
        }
    }
}
