//! Parameter fixtures.

use bitcoin::Amount;
use stakeidx_params::{StakingParams, VersionedStakingParams};

use crate::keys::keypair_from_bytes;

pub const TEST_TAG: [u8; 4] = *b"tidx";

/// Builder for one params version with sensible test defaults.
#[derive(Clone, Debug)]
pub struct TestParamsBuilder {
    version: u16,
    activation_height: u64,
    staking_cap: Amount,
    cap_height: u64,
    confirmation_depth: u32,
    unbonding_time: u16,
}

impl TestParamsBuilder {
    pub fn new(version: u16, activation_height: u64) -> Self {
        Self {
            version,
            activation_height,
            staking_cap: Amount::from_sat(50_000_000),
            cap_height: 0,
            confirmation_depth: 6,
            unbonding_time: 10,
        }
    }

    pub fn staking_cap(mut self, cap: Amount) -> Self {
        self.staking_cap = cap;
        self.cap_height = 0;
        self
    }

    pub fn cap_height(mut self, height: u64) -> Self {
        self.cap_height = height;
        self.staking_cap = Amount::ZERO;
        self
    }

    pub fn confirmation_depth(mut self, k: u32) -> Self {
        self.confirmation_depth = k;
        self
    }

    pub fn unbonding_time(mut self, blocks: u16) -> Self {
        self.unbonding_time = blocks;
        self
    }

    pub fn build(self) -> StakingParams {
        let (_, covenant_pk) = keypair_from_bytes([0x42; 32]);
        StakingParams {
            version: self.version,
            activation_height: self.activation_height,
            tag: TEST_TAG,
            covenant_pks: vec![covenant_pk],
            covenant_quorum: 1,
            unbonding_time: self.unbonding_time,
            unbonding_fee: Amount::from_sat(1_000),
            min_staking_amount: Amount::from_sat(10_000),
            max_staking_amount: Amount::from_sat(10_000_000),
            min_staking_time: 10,
            max_staking_time: 65_000,
            confirmation_depth: self.confirmation_depth,
            staking_cap: self.staking_cap,
            cap_height: self.cap_height,
        }
    }
}

/// A single-version table activating at `activation_height`.
pub fn test_params(activation_height: u64) -> VersionedStakingParams {
    test_params_versions(vec![TestParamsBuilder::new(0, activation_height).build()])
}

/// A table from explicit versions.
pub fn test_params_versions(versions: Vec<StakingParams>) -> VersionedStakingParams {
    VersionedStakingParams::new(versions).expect("valid test params")
}
