//! Confirmed-transaction classification.
//!
//! [`classify_tx`] is a pure function of the transaction, the params table
//! and a read-only view of the stored stakes; it performs no I/O so the full
//! space of transaction shapes can be enumerated in tests.

use bitcoin::{Amount, OutPoint, Transaction, Txid, XOnlyPublicKey};
use stakeidx_params::VersionedStakingParams;
use thiserror::Error;

use crate::{
    scripts::{self, ScriptError},
    tagged::TaggedStakingData,
};

/// Read-only view of the lifecycle store the classifier matches spends
/// against.
pub trait StakeLookup {
    /// Stored staking record owning `outpoint` as its staking output.
    fn staking_output(&self, outpoint: &OutPoint) -> Option<StakedOutputInfo>;

    /// Stored unbonding record owning `outpoint` as its sole output.
    fn unbonding_output(&self, outpoint: &OutPoint) -> Option<UnbondingOutputInfo>;
}

/// What the classifier needs to know about a stored staking output.
#[derive(Clone, Debug)]
pub struct StakedOutputInfo {
    pub staking_txid: Txid,
    pub staker_pk: XOnlyPublicKey,
    pub finality_provider_pk: XOnlyPublicKey,
    pub staking_time: u16,
    pub staking_value: Amount,
    pub params_version: u16,
}

/// What the classifier needs to know about a stored unbonding output.
#[derive(Clone, Debug)]
pub struct UnbondingOutputInfo {
    pub staking_txid: Txid,
    pub staker_pk: XOnlyPublicKey,
    pub params_version: u16,
}

/// Recognised staking transaction.
#[derive(Clone, Debug)]
pub struct StakingTxInfo {
    pub staking_output_index: u32,
    pub staking_value: Amount,
    pub data: TaggedStakingData,
    pub params_version: u16,
}

/// Outcome of classifying one confirmed transaction.
#[derive(Clone, Debug)]
pub enum TxClassification {
    Staking(StakingTxInfo),
    Unbonding {
        staking_txid: Txid,
    },
    Withdraw {
        staking_txid: Txid,
        from_unbonding: bool,
    },
    Irrelevant,
}

#[derive(Debug, Error)]
pub enum ClassifierError {
    /// The tx matches more than one staking interpretation; treated as
    /// irrelevant by the pipeline since no single record can be written.
    #[error("tx {0} matches multiple staking interpretations")]
    Ambiguous(Txid),

    /// A stored record references a params version the table doesn't have.
    #[error("stored record references unknown params version {0}")]
    UnknownParamsVersion(u16),

    #[error(transparent)]
    Script(#[from] ScriptError),
}

/// Classifies a confirmed transaction at `height`.
///
/// A spend of a known staking or unbonding output always wins over a
/// structural staking match, so a tx that both looks like a stake and
/// consumes an existing one is reported as the spend.
pub fn classify_tx(
    tx: &Transaction,
    height: u64,
    params_table: &VersionedStakingParams,
    lookup: &dyn StakeLookup,
) -> Result<TxClassification, ClassifierError> {
    if let Some(spend) = classify_spend(tx, params_table, lookup)? {
        return Ok(spend);
    }

    let Some(params) = params_table.params_for_height(height) else {
        return Ok(TxClassification::Irrelevant);
    };

    classify_staking(tx, params)
}

fn classify_spend(
    tx: &Transaction,
    params_table: &VersionedStakingParams,
    lookup: &dyn StakeLookup,
) -> Result<Option<TxClassification>, ClassifierError> {
    // Protocol spends consume exactly one prior output.
    if tx.input.len() != 1 {
        return Ok(None);
    }
    let txin = &tx.input[0];
    let prevout = txin.previous_output;

    if let Some(stake) = lookup.staking_output(&prevout) {
        let params = params_table
            .params_for_version(stake.params_version)
            .ok_or(ClassifierError::UnknownParamsVersion(stake.params_version))?;

        // The witness leaf script tells the paths apart: the timelock leaf
        // means a direct withdraw, anything else may be an unbonding spend.
        let timelock = scripts::timelock_script(&stake.staker_pk, stake.staking_time);
        if txin.witness.tapscript() == Some(timelock.as_script()) {
            return Ok(Some(TxClassification::Withdraw {
                staking_txid: stake.staking_txid,
                from_unbonding: false,
            }));
        }

        let expected_script = scripts::unbonding_output_script(
            &stake.staker_pk,
            &stake.finality_provider_pk,
            params,
        )?;
        let expected_value = stake
            .staking_value
            .checked_sub(params.unbonding_fee)
            .unwrap_or(Amount::ZERO);
        let is_unbonding = tx.output.len() == 1
            && tx.output[0].script_pubkey == expected_script
            && tx.output[0].value == expected_value;
        if is_unbonding {
            return Ok(Some(TxClassification::Unbonding {
                staking_txid: stake.staking_txid,
            }));
        }

        // Some other spend path (e.g. slashing); not ours to track.
        return Ok(Some(TxClassification::Irrelevant));
    }

    if let Some(unbonding) = lookup.unbonding_output(&prevout) {
        let params = params_table
            .params_for_version(unbonding.params_version)
            .ok_or(ClassifierError::UnknownParamsVersion(unbonding.params_version))?;

        let timelock = scripts::timelock_script(&unbonding.staker_pk, params.unbonding_time);
        if txin.witness.tapscript() == Some(timelock.as_script()) {
            return Ok(Some(TxClassification::Withdraw {
                staking_txid: unbonding.staking_txid,
                from_unbonding: true,
            }));
        }

        return Ok(Some(TxClassification::Irrelevant));
    }

    Ok(None)
}

fn classify_staking(
    tx: &Transaction,
    params: &stakeidx_params::StakingParams,
) -> Result<TxClassification, ClassifierError> {
    // Exactly one tagged OP_RETURN identifies a staking tx.
    let mut tagged = None;
    for out in &tx.output {
        if !out.script_pubkey.is_op_return() {
            continue;
        }
        let Ok(data) = TaggedStakingData::parse_from_script(&out.script_pubkey, &params.tag)
        else {
            continue;
        };
        if tagged.replace(data).is_some() {
            return Err(ClassifierError::Ambiguous(tx.compute_txid()));
        }
    }
    let Some(data) = tagged else {
        return Ok(TxClassification::Irrelevant);
    };

    let expected_script = scripts::staking_output_script(
        &data.staker_pk,
        &data.finality_provider_pk,
        data.staking_time,
        params,
    )?;

    let mut matched = None;
    for (idx, out) in tx.output.iter().enumerate() {
        if out.script_pubkey != expected_script {
            continue;
        }
        if matched.replace((idx as u32, out.value)).is_some() {
            return Err(ClassifierError::Ambiguous(tx.compute_txid()));
        }
    }
    let Some((staking_output_index, staking_value)) = matched else {
        return Ok(TxClassification::Irrelevant);
    };

    // Out-of-bounds terms are not protocol stakes; nothing is stored.
    if !params.accepts(staking_value, data.staking_time) {
        return Ok(TxClassification::Irrelevant);
    }

    Ok(TxClassification::Staking(StakingTxInfo {
        staking_output_index,
        staking_value,
        data,
        params_version: params.version,
    }))
}

#[cfg(test)]
mod tests {
    use std::collections::HashMap;

    use bitcoin::{
        absolute::LockTime, key::Secp256k1, transaction::Version, Amount, ScriptBuf, Sequence,
        TxIn, TxOut, Witness,
    };
    use stakeidx_params::StakingParams;

    use super::*;

    fn key(byte: u8) -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[byte; 32]).unwrap();
        sk.x_only_public_key(&secp).0
    }

    fn params() -> VersionedStakingParams {
        VersionedStakingParams::new(vec![StakingParams {
            version: 0,
            activation_height: 100,
            tag: *b"tidx",
            covenant_pks: vec![key(9)],
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
        }])
        .unwrap()
    }

    #[derive(Default)]
    struct MapLookup {
        stakes: HashMap<OutPoint, StakedOutputInfo>,
        unbondings: HashMap<OutPoint, UnbondingOutputInfo>,
    }

    impl StakeLookup for MapLookup {
        fn staking_output(&self, outpoint: &OutPoint) -> Option<StakedOutputInfo> {
            self.stakes.get(outpoint).cloned()
        }

        fn unbonding_output(&self, outpoint: &OutPoint) -> Option<UnbondingOutputInfo> {
            self.unbondings.get(outpoint).cloned()
        }
    }

    fn dummy_input(prevout: OutPoint) -> TxIn {
        TxIn {
            previous_output: prevout,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness: Witness::new(),
        }
    }

    fn funding_outpoint(n: u8) -> OutPoint {
        OutPoint {
            txid: Txid::from_raw_hash(bitcoin::hashes::Hash::from_byte_array([n; 32])),
            vout: 0,
        }
    }

    fn staking_tx(value: Amount, staking_time: u16) -> Transaction {
        let p = params();
        let active = p.params_for_height(200).unwrap();
        let data = TaggedStakingData {
            tag: active.tag,
            staker_pk: key(1),
            finality_provider_pk: key(2),
            staking_time,
        };
        let script =
            scripts::staking_output_script(&key(1), &key(2), staking_time, active).unwrap();
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![dummy_input(funding_outpoint(0xaa))],
            output: vec![
                TxOut {
                    value: Amount::ZERO,
                    script_pubkey: data.op_return_script(),
                },
                TxOut {
                    value,
                    script_pubkey: script,
                },
            ],
        }
    }

    fn script_path_witness(leaf: &ScriptBuf) -> Witness {
        let mut w = Witness::new();
        w.push([0u8; 64]);
        w.push(leaf.as_bytes());
        w.push([0xc0u8; 33]);
        w
    }

    #[test]
    fn recognises_staking_tx() {
        let tx = staking_tx(Amount::from_sat(100_000), 100);
        let cls = classify_tx(&tx, 200, &params(), &MapLookup::default()).unwrap();
        match cls {
            TxClassification::Staking(info) => {
                assert_eq!(info.staking_output_index, 1);
                assert_eq!(info.staking_value, Amount::from_sat(100_000));
                assert_eq!(info.data.staking_time, 100);
                assert_eq!(info.params_version, 0);
            }
            other => panic!("expected staking, got {other:?}"),
        }
    }

    #[test]
    fn ignores_tx_before_activation() {
        let tx = staking_tx(Amount::from_sat(100_000), 100);
        let cls = classify_tx(&tx, 50, &params(), &MapLookup::default()).unwrap();
        assert!(matches!(cls, TxClassification::Irrelevant));
    }

    #[test]
    fn ignores_out_of_bounds_amount() {
        let tx = staking_tx(Amount::from_sat(5_000), 100);
        let cls = classify_tx(&tx, 200, &params(), &MapLookup::default()).unwrap();
        assert!(matches!(cls, TxClassification::Irrelevant));
    }

    #[test]
    fn ignores_mismatched_staking_output() {
        let mut tx = staking_tx(Amount::from_sat(100_000), 100);
        // Break the commitment: OP_RETURN advertises a different time.
        let data = TaggedStakingData {
            tag: *b"tidx",
            staker_pk: key(1),
            finality_provider_pk: key(2),
            staking_time: 101,
        };
        tx.output[0].script_pubkey = data.op_return_script();
        let cls = classify_tx(&tx, 200, &params(), &MapLookup::default()).unwrap();
        assert!(matches!(cls, TxClassification::Irrelevant));
    }

    #[test]
    fn duplicate_tagged_outputs_are_ambiguous() {
        let mut tx = staking_tx(Amount::from_sat(100_000), 100);
        let dup = tx.output[0].clone();
        tx.output.push(dup);
        let err = classify_tx(&tx, 200, &params(), &MapLookup::default()).unwrap_err();
        assert!(matches!(err, ClassifierError::Ambiguous(_)));
    }

    fn stored_stake(tx: &Transaction) -> (OutPoint, StakedOutputInfo) {
        let outpoint = OutPoint {
            txid: tx.compute_txid(),
            vout: 1,
        };
        let info = StakedOutputInfo {
            staking_txid: tx.compute_txid(),
            staker_pk: key(1),
            finality_provider_pk: key(2),
            staking_time: 100,
            staking_value: tx.output[1].value,
            params_version: 0,
        };
        (outpoint, info)
    }

    #[test]
    fn recognises_unbonding_tx() {
        let p = params();
        let active = p.params_for_height(200).unwrap();
        let stake_tx = staking_tx(Amount::from_sat(100_000), 100);
        let (outpoint, info) = stored_stake(&stake_tx);
        let mut lookup = MapLookup::default();
        lookup.stakes.insert(outpoint, info);

        let unbonding = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![dummy_input(outpoint)],
            output: vec![TxOut {
                value: Amount::from_sat(99_000),
                script_pubkey: scripts::unbonding_output_script(&key(1), &key(2), active)
                    .unwrap(),
            }],
        };

        let cls = classify_tx(&unbonding, 210, &p, &lookup).unwrap();
        match cls {
            TxClassification::Unbonding { staking_txid } => {
                assert_eq!(staking_txid, stake_tx.compute_txid())
            }
            other => panic!("expected unbonding, got {other:?}"),
        }
    }

    #[test]
    fn unbonding_with_wrong_value_is_irrelevant() {
        let p = params();
        let active = p.params_for_height(200).unwrap();
        let stake_tx = staking_tx(Amount::from_sat(100_000), 100);
        let (outpoint, info) = stored_stake(&stake_tx);
        let mut lookup = MapLookup::default();
        lookup.stakes.insert(outpoint, info);

        let spend = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![dummy_input(outpoint)],
            output: vec![TxOut {
                value: Amount::from_sat(90_000),
                script_pubkey: scripts::unbonding_output_script(&key(1), &key(2), active)
                    .unwrap(),
            }],
        };

        let cls = classify_tx(&spend, 210, &p, &lookup).unwrap();
        assert!(matches!(cls, TxClassification::Irrelevant));
    }

    #[test]
    fn recognises_direct_withdraw() {
        let stake_tx = staking_tx(Amount::from_sat(100_000), 100);
        let (outpoint, info) = stored_stake(&stake_tx);
        let mut lookup = MapLookup::default();
        lookup.stakes.insert(outpoint, info);

        let timelock = scripts::timelock_script(&key(1), 100);
        let mut withdraw = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![dummy_input(outpoint)],
            output: vec![TxOut {
                value: Amount::from_sat(99_000),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        withdraw.input[0].witness = script_path_witness(&timelock);

        let cls = classify_tx(&withdraw, 310, &params(), &lookup).unwrap();
        match cls {
            TxClassification::Withdraw {
                staking_txid,
                from_unbonding,
            } => {
                assert_eq!(staking_txid, stake_tx.compute_txid());
                assert!(!from_unbonding);
            }
            other => panic!("expected withdraw, got {other:?}"),
        }
    }

    #[test]
    fn recognises_withdraw_from_unbonding() {
        let ub_outpoint = funding_outpoint(0xbb);
        let staking_txid = Txid::from_raw_hash(bitcoin::hashes::Hash::from_byte_array([1; 32]));
        let mut lookup = MapLookup::default();
        lookup.unbondings.insert(
            ub_outpoint,
            UnbondingOutputInfo {
                staking_txid,
                staker_pk: key(1),
                params_version: 0,
            },
        );

        let timelock = scripts::timelock_script(&key(1), 10);
        let mut withdraw = Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![dummy_input(ub_outpoint)],
            output: vec![TxOut {
                value: Amount::from_sat(98_000),
                script_pubkey: ScriptBuf::new(),
            }],
        };
        withdraw.input[0].witness = script_path_witness(&timelock);

        let cls = classify_tx(&withdraw, 320, &params(), &lookup).unwrap();
        match cls {
            TxClassification::Withdraw {
                staking_txid: parent,
                from_unbonding,
            } => {
                assert_eq!(parent, staking_txid);
                assert!(from_unbonding);
            }
            other => panic!("expected withdraw, got {other:?}"),
        }
    }

    #[test]
    fn spend_of_known_stake_beats_staking_shape() {
        // A tx that both spends a stored stake through the timelock path and
        // carries a fresh staking commitment must classify as the spend.
        let stake_tx = staking_tx(Amount::from_sat(100_000), 100);
        let (outpoint, info) = stored_stake(&stake_tx);
        let mut lookup = MapLookup::default();
        lookup.stakes.insert(outpoint, info);

        let mut hybrid = staking_tx(Amount::from_sat(100_000), 100);
        hybrid.input = vec![dummy_input(outpoint)];
        hybrid.input[0].witness = script_path_witness(&scripts::timelock_script(&key(1), 100));

        let cls = classify_tx(&hybrid, 310, &params(), &lookup).unwrap();
        assert!(matches!(
            cls,
            TxClassification::Withdraw {
                from_unbonding: false,
                ..
            }
        ));
    }
}
