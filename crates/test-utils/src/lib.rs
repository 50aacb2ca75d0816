//! Shared test fixtures: keys, parameter sets, protocol transactions with
//! real taproot witnesses, an in-process chain and a channel-backed event
//! sink.

pub mod chain;
pub mod keys;
pub mod params;
pub mod sink;
pub mod transactions;

pub use chain::MockChain;
pub use keys::{gen_keypair, keypair_from_bytes};
pub use params::{test_params, test_params_versions, TestParamsBuilder};
pub use sink::ChannelSink;
pub use transactions::{
    build_staking_tx, build_unbonding_tx, build_withdraw_tx, WithdrawSource,
};
