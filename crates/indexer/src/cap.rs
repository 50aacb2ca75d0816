//! Staking-cap enforcement.
//!
//! The enforcer owns a running total of accepted (non-overflow) stake value
//! per params version.  Decisions are deterministic given that state, so the
//! whole thing is rebuilt on startup by replaying the store in height order.

use std::collections::HashMap;

use bitcoin::Amount;
use stakeidx_params::StakingParams;
use tracing::warn;

#[derive(Debug, Default)]
pub struct CapEnforcer {
    /// Accumulated active value per params version.
    accumulated: HashMap<u16, Amount>,
    active_stake_count: u64,
}

impl CapEnforcer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Decides whether a staking tx of `value` confirmed at `height`
    /// overflows the cap of `params`.  Accepting accumulates.
    ///
    /// Value-capped versions gate on the pre-add total: a stake is admitted
    /// while the accumulator is still below the cap, so the last admitted
    /// stake may straddle it.
    pub fn decide(&mut self, value: Amount, height: u64, params: &StakingParams) -> bool {
        if params.cap_height > 0 && height > params.cap_height {
            return true;
        }

        let accumulated = self.accumulated.entry(params.version).or_insert(Amount::ZERO);
        if params.staking_cap > Amount::ZERO && *accumulated >= params.staking_cap {
            return true;
        }

        *accumulated = accumulated.checked_add(value).unwrap_or(Amount::MAX_MONEY);
        self.active_stake_count += 1;
        false
    }

    /// Accounts for an already-decided active stake during startup replay.
    pub fn note_active_stake(&mut self, version: u16, value: Amount) {
        let accumulated = self.accumulated.entry(version).or_insert(Amount::ZERO);
        *accumulated = accumulated.checked_add(value).unwrap_or(Amount::MAX_MONEY);
        self.active_stake_count += 1;
    }

    /// An active stake exited (unbonded or withdrawn).  Exits of overflow
    /// stakes are no-ops since they never accumulated.
    pub fn on_stake_exit(&mut self, version: u16, value: Amount, is_overflow: bool) {
        if is_overflow {
            return;
        }
        let accumulated = self.accumulated.entry(version).or_insert(Amount::ZERO);
        if *accumulated < value {
            warn!(%version, %value, current = %accumulated, "cap accumulator underflow, clamping");
            *accumulated = Amount::ZERO;
        } else {
            *accumulated -= value;
        }
        self.active_stake_count = self.active_stake_count.saturating_sub(1);
    }

    pub fn active_stake_count(&self) -> u64 {
        self.active_stake_count
    }

    pub fn accumulated_for(&self, version: u16) -> Amount {
        self.accumulated.get(&version).copied().unwrap_or(Amount::ZERO)
    }
}
