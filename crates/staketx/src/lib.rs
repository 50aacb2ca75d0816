//! Staking-protocol transaction processing.
//!
//! Builds the staking and unbonding output templates from protocol
//! parameters, parses the OP_RETURN identification payload, and classifies
//! confirmed transactions as staking / unbonding / withdraw spends.

pub mod classify;
pub mod scripts;
pub mod tagged;

pub use classify::{
    classify_tx, ClassifierError, StakeLookup, StakedOutputInfo, StakingTxInfo, TxClassification,
    UnbondingOutputInfo,
};
pub use scripts::{staking_taproot, unbonding_taproot, ScriptError};
pub use tagged::{TaggedStakingData, TaggedDataError};
