//! Protocol transaction builders.
//!
//! Outputs and witnesses are built with the real script templates so the
//! classifier exercises the same byte-level matching as against a live
//! chain.  Covenant signatures are placeholders (nothing here validates
//! them); staker timelock spends carry a real schnorr signature.

use bitcoin::{
    absolute::LockTime,
    key::{Keypair, Secp256k1},
    secp256k1::Message,
    sighash::{Prevouts, SighashCache},
    taproot::LeafVersion,
    transaction::Version,
    Amount, OutPoint, ScriptBuf, Sequence, TapSighashType, Transaction, TxIn, TxOut, Txid,
    Witness, XOnlyPublicKey,
};
use rand::RngCore;
use stakeidx_params::StakingParams;
use stakeidx_staketx::{
    scripts::{
        staking_output_script, staking_taproot, timelock_script, unbonding_output_script,
        unbonding_path_script, unbonding_taproot,
    },
    TaggedStakingData,
};

fn random_funding_input(rng: &mut impl RngCore) -> TxIn {
    let mut txid_bytes = [0u8; 32];
    rng.fill_bytes(&mut txid_bytes);
    TxIn {
        previous_output: OutPoint {
            txid: Txid::from_raw_hash(bitcoin::hashes::Hash::from_byte_array(txid_bytes)),
            vout: 0,
        },
        script_sig: ScriptBuf::new(),
        sequence: Sequence::MAX,
        witness: Witness::new(),
    }
}

/// Builds a staking tx: OP_RETURN commitment at index 0, staking output at
/// index 1.  The funding input is a random outpoint, making txids unique.
pub fn build_staking_tx(
    rng: &mut impl RngCore,
    staker_pk: &XOnlyPublicKey,
    finality_provider_pk: &XOnlyPublicKey,
    staking_time: u16,
    value: Amount,
    params: &StakingParams,
) -> Transaction {
    let data = TaggedStakingData {
        tag: params.tag,
        staker_pk: *staker_pk,
        finality_provider_pk: *finality_provider_pk,
        staking_time,
    };
    let script = staking_output_script(staker_pk, finality_provider_pk, staking_time, params)
        .expect("valid staking script");

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![random_funding_input(rng)],
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

/// Builds an unbonding tx spending `staking_tx`'s staking output through the
/// unbonding path.  Covenant/staker signatures are placeholders.
pub fn build_unbonding_tx(
    staking_tx: &Transaction,
    staking_output_index: u32,
    staker_pk: &XOnlyPublicKey,
    finality_provider_pk: &XOnlyPublicKey,
    staking_time: u16,
    params: &StakingParams,
) -> Transaction {
    let staking_value = staking_tx.output[staking_output_index as usize].value;
    let spend_info = staking_taproot(staker_pk, finality_provider_pk, staking_time, params)
        .expect("valid staking taproot");
    let path_script = unbonding_path_script(staker_pk, params).expect("valid unbonding path");
    let control = spend_info
        .control_block(&(path_script.clone(), LeafVersion::TapScript))
        .expect("unbonding path is in the tree");

    let mut witness = Witness::new();
    // Covenant then staker signatures, consumed in script order.
    witness.push([1u8; 64]);
    witness.push([2u8; 64]);
    witness.push(path_script.as_bytes());
    witness.push(control.serialize());

    Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: OutPoint {
                txid: staking_tx.compute_txid(),
                vout: staking_output_index,
            },
            script_sig: ScriptBuf::new(),
            sequence: Sequence::MAX,
            witness,
        }],
        output: vec![TxOut {
            value: staking_value - params.unbonding_fee,
            script_pubkey: unbonding_output_script(staker_pk, finality_provider_pk, params)
                .expect("valid unbonding script"),
        }],
    }
}

/// Which timelocked output a withdraw spends.
pub enum WithdrawSource<'a> {
    /// Directly off the staking output after `staking_time` blocks.
    Staking {
        staking_tx: &'a Transaction,
        staking_output_index: u32,
        staking_time: u16,
    },
    /// Off the unbonding output after `unbonding_time` blocks.
    Unbonding { unbonding_tx: &'a Transaction },
}

/// Builds a withdraw tx spending the timelock path, signed by the staker.
pub fn build_withdraw_tx(
    source: WithdrawSource<'_>,
    staker: &Keypair,
    finality_provider_pk: &XOnlyPublicKey,
    params: &StakingParams,
) -> Transaction {
    let (staker_pk, _) = staker.x_only_public_key();
    let fee = Amount::from_sat(1_000);

    let (prevout, prev_txout, leaf, spend_info, lock_blocks) = match source {
        WithdrawSource::Staking {
            staking_tx,
            staking_output_index,
            staking_time,
        } => (
            OutPoint {
                txid: staking_tx.compute_txid(),
                vout: staking_output_index,
            },
            staking_tx.output[staking_output_index as usize].clone(),
            timelock_script(&staker_pk, staking_time),
            staking_taproot(&staker_pk, finality_provider_pk, staking_time, params)
                .expect("valid staking taproot"),
            staking_time,
        ),
        WithdrawSource::Unbonding { unbonding_tx } => (
            OutPoint {
                txid: unbonding_tx.compute_txid(),
                vout: 0,
            },
            unbonding_tx.output[0].clone(),
            timelock_script(&staker_pk, params.unbonding_time),
            unbonding_taproot(&staker_pk, finality_provider_pk, params)
                .expect("valid unbonding taproot"),
            params.unbonding_time,
        ),
    };

    let secp = Secp256k1::new();
    let destination = ScriptBuf::new_p2tr(&secp, staker_pk, None);
    let mut tx = Transaction {
        version: Version::TWO,
        lock_time: LockTime::ZERO,
        input: vec![TxIn {
            previous_output: prevout,
            script_sig: ScriptBuf::new(),
            sequence: Sequence::from_height(lock_blocks),
            witness: Witness::new(),
        }],
        output: vec![TxOut {
            value: prev_txout.value - fee,
            script_pubkey: destination,
        }],
    };

    let mut sighash_cache = SighashCache::new(&tx);
    let sighash = sighash_cache
        .taproot_script_spend_signature_hash(
            0,
            &Prevouts::All(&[prev_txout]),
            bitcoin::taproot::TapLeafHash::from_script(&leaf, LeafVersion::TapScript),
            TapSighashType::Default,
        )
        .expect("sighash computation");
    let msg = Message::from_digest_slice(sighash.as_ref()).expect("32-byte sighash");
    let signature = secp.sign_schnorr_no_aux_rand(&msg, staker);

    let control = spend_info
        .control_block(&(leaf.clone(), LeafVersion::TapScript))
        .expect("timelock path is in the tree");
    let mut witness = Witness::new();
    witness.push(signature.as_ref());
    witness.push(leaf.as_bytes());
    witness.push(control.serialize());
    tx.input[0].witness = witness;

    tx
}
