use bitcoin::{Amount, XOnlyPublicKey};
use serde::{Deserialize, Serialize};

use crate::serde_helpers::hex_tag;

/// One published version of the staking-protocol parameters.
///
/// Immutable once published.  Heights and times are in BTC blocks, values in
/// satoshis.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct StakingParams {
    /// Monotonically increasing version stamp, starting at 0.
    pub version: u16,

    /// First BTC height at which this version is active.
    pub activation_height: u64,

    /// Magic bytes opening the OP_RETURN payload of a staking tx.
    #[serde(with = "hex_tag")]
    pub tag: [u8; 4],

    /// Covenant committee public keys.
    pub covenant_pks: Vec<XOnlyPublicKey>,

    /// Number of covenant signatures required on the unbonding path.
    pub covenant_quorum: u32,

    /// Relative timelock of the unbonding output.
    pub unbonding_time: u16,

    /// Fee deducted by the unbonding transaction.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub unbonding_fee: Amount,

    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub min_staking_amount: Amount,

    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub max_staking_amount: Amount,

    pub min_staking_time: u16,

    pub max_staking_time: u16,

    /// Confirmations (counting the including block) before a block is final
    /// for the indexer.
    pub confirmation_depth: u32,

    /// Value-based cap on the total active stake under this version.
    /// Zero when the version uses a height-based cap instead.
    #[serde(with = "bitcoin::amount::serde::as_sat")]
    pub staking_cap: Amount,

    /// Height after which every new stake under this version overflows.
    /// Zero when the version uses a value-based cap instead.
    pub cap_height: u64,
}

impl StakingParams {
    /// Whether a staking amount/time pair is inside this version's bounds.
    pub fn accepts(&self, value: Amount, staking_time: u16) -> bool {
        value >= self.min_staking_amount
            && value <= self.max_staking_amount
            && staking_time >= self.min_staking_time
            && staking_time <= self.max_staking_time
    }
}
