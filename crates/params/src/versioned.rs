use std::path::Path;

use bitcoin::Amount;
use serde::{Deserialize, Serialize};

use crate::{error::ParamsError, types::StakingParams};

/// The full time-indexed table of published parameter versions.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct VersionedStakingParams {
    pub versions: Vec<StakingParams>,
}

impl VersionedStakingParams {
    /// Loads and validates a params file.
    pub fn load_from_file(path: &Path) -> Result<Self, ParamsError> {
        let raw = std::fs::read_to_string(path)?;
        let parsed: Self = serde_json::from_str(&raw)?;
        parsed.validate()?;
        Ok(parsed)
    }

    /// Builds a table from already-parsed versions, validating them.
    pub fn new(versions: Vec<StakingParams>) -> Result<Self, ParamsError> {
        let vp = Self { versions };
        vp.validate()?;
        Ok(vp)
    }

    fn validate(&self) -> Result<(), ParamsError> {
        if self.versions.is_empty() {
            return Err(ParamsError::Empty);
        }

        let mut prev_activation = 0u64;
        for (idx, p) in self.versions.iter().enumerate() {
            let expected = idx as u16;
            if p.version != expected {
                return Err(ParamsError::VersionOutOfOrder(p.version, expected));
            }
            if idx > 0 && p.activation_height < prev_activation {
                return Err(ParamsError::ActivationNotMonotonic(
                    p.version,
                    p.activation_height,
                    prev_activation,
                ));
            }
            prev_activation = p.activation_height;

            if p.covenant_quorum == 0 || p.covenant_quorum as usize > p.covenant_pks.len() {
                return Err(ParamsError::BadQuorum(
                    p.version,
                    p.covenant_quorum,
                    p.covenant_pks.len(),
                ));
            }
            if p.min_staking_amount > p.max_staking_amount {
                return Err(ParamsError::BadAmountRange(p.version));
            }
            if p.min_staking_time > p.max_staking_time {
                return Err(ParamsError::BadTimeRange(p.version));
            }
            if p.confirmation_depth == 0 {
                return Err(ParamsError::ZeroConfirmationDepth(p.version));
            }
            // Each version caps stake by value or by height, never both and
            // never neither.
            let value_capped = p.staking_cap > Amount::ZERO;
            let height_capped = p.cap_height > 0;
            if value_capped == height_capped {
                return Err(ParamsError::BadCap(p.version));
            }
        }

        Ok(())
    }

    /// Returns the version active at `height`, or `None` before the first
    /// activation.
    pub fn params_for_height(&self, height: u64) -> Option<&StakingParams> {
        self.versions
            .iter()
            .rev()
            .find(|p| p.activation_height <= height)
    }

    /// Looks a version up by its stamp.
    pub fn params_for_version(&self, version: u16) -> Option<&StakingParams> {
        self.versions.get(version as usize)
    }

    /// Height the scanner starts from when there is no checkpoint.
    pub fn earliest_activation_height(&self) -> u64 {
        self.versions[0].activation_height
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::key::Secp256k1;

    use super::*;

    fn test_covenant_pk() -> bitcoin::XOnlyPublicKey {
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[7u8; 32]).unwrap();
        sk.x_only_public_key(&secp).0
    }

    fn gen_version(version: u16, activation_height: u64) -> StakingParams {
        StakingParams {
            version,
            activation_height,
            tag: *b"tidx",
            covenant_pks: vec![test_covenant_pk()],
            covenant_quorum: 1,
            unbonding_time: 10,
            unbonding_fee: Amount::from_sat(1_000),
            min_staking_amount: Amount::from_sat(10_000),
            max_staking_amount: Amount::from_sat(10_000_000),
            min_staking_time: 10,
            max_staking_time: 65_000,
            confirmation_depth: 6,
            staking_cap: Amount::from_sat(50_000_000),
            cap_height: 0,
        }
    }

    #[test]
    fn selects_greatest_activation_at_or_below() {
        let vp = VersionedStakingParams::new(vec![
            gen_version(0, 100),
            gen_version(1, 200),
            gen_version(2, 300),
        ])
        .unwrap();

        assert!(vp.params_for_height(99).is_none());
        assert_eq!(vp.params_for_height(100).unwrap().version, 0);
        assert_eq!(vp.params_for_height(199).unwrap().version, 0);
        assert_eq!(vp.params_for_height(200).unwrap().version, 1);
        assert_eq!(vp.params_for_height(5_000).unwrap().version, 2);
    }

    #[test]
    fn rejects_unordered_versions() {
        let res = VersionedStakingParams::new(vec![gen_version(1, 100)]);
        assert!(matches!(res, Err(ParamsError::VersionOutOfOrder(1, 0))));
    }

    #[test]
    fn rejects_nonmonotonic_activation() {
        let res = VersionedStakingParams::new(vec![gen_version(0, 200), gen_version(1, 100)]);
        assert!(matches!(res, Err(ParamsError::ActivationNotMonotonic(1, 100, 200))));
    }

    #[test]
    fn rejects_double_capped_version() {
        let mut bad = gen_version(0, 100);
        bad.cap_height = 500;
        let res = VersionedStakingParams::new(vec![bad]);
        assert!(matches!(res, Err(ParamsError::BadCap(0))));
    }

    #[test]
    fn rejects_uncapped_version() {
        let mut bad = gen_version(0, 100);
        bad.staking_cap = Amount::ZERO;
        let res = VersionedStakingParams::new(vec![bad]);
        assert!(matches!(res, Err(ParamsError::BadCap(0))));
    }

    #[test]
    fn rejects_bad_quorum() {
        let mut bad = gen_version(0, 100);
        bad.covenant_quorum = 2;
        let res = VersionedStakingParams::new(vec![bad]);
        assert!(matches!(res, Err(ParamsError::BadQuorum(0, 2, 1))));
    }

    #[test]
    fn json_round_trip() {
        let vp = VersionedStakingParams::new(vec![gen_version(0, 100)]).unwrap();
        let encoded = serde_json::to_string(&vp).unwrap();
        let decoded: VersionedStakingParams = serde_json::from_str(&encoded).unwrap();
        assert_eq!(decoded.versions, vp.versions);
    }

    #[test]
    fn rejects_unknown_keys() {
        let raw = r#"{"versions": [], "extra": true}"#;
        assert!(serde_json::from_str::<VersionedStakingParams>(raw).is_err());
    }
}
