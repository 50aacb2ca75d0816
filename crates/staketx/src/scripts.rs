//! Taproot script templates for staking and unbonding outputs.
//!
//! A staking output commits to three script paths: a staker timelock
//! (withdraw after expiry), an unbonding path (staker + covenant quorum) and
//! a slashing path (staker + finality provider + covenant quorum).  An
//! unbonding output keeps only the timelock and slashing paths, with the
//! unbonding time as the lock.  The internal key is the BIP-341 NUMS point,
//! so only script-path spends are possible.

use bitcoin::{
    key::Secp256k1,
    opcodes::all::{
        OP_CHECKSIG, OP_CHECKSIGADD, OP_CHECKSIGVERIFY, OP_CSV, OP_NUMEQUAL, OP_NUMEQUALVERIFY,
    },
    script::Builder,
    taproot::{TaprootBuilder, TaprootSpendInfo},
    ScriptBuf, XOnlyPublicKey,
};
use stakeidx_params::StakingParams;
use thiserror::Error;

/// BIP-341 "nothing up my sleeve" x-only key; no known discrete log, so the
/// key-spend path is unusable.
const NUMS_KEY_BYTES: [u8; 32] = [
    0x50, 0x92, 0x9b, 0x74, 0xc1, 0xa0, 0x49, 0x54, 0xb7, 0x8b, 0x4b, 0x60, 0x35, 0xe9, 0x7a,
    0x5e, 0x07, 0x8a, 0x5a, 0x0f, 0x28, 0xec, 0x96, 0xd5, 0x47, 0xbf, 0xee, 0x9a, 0xce, 0x80,
    0x3a, 0xc0,
];

/// Errors building a script template from parameters.
#[derive(Debug, Error)]
pub enum ScriptError {
    #[error("no covenant keys provided")]
    NoKeys,

    #[error("quorum {0} larger than key set {1}")]
    QuorumTooLarge(u32, usize),

    #[error("duplicate key in covenant set")]
    DuplicateKey,

    #[error("taproot tree construction failed")]
    TaprootBuild,
}

pub(crate) fn unspendable_internal_key() -> XOnlyPublicKey {
    XOnlyPublicKey::from_slice(&NUMS_KEY_BYTES).expect("static NUMS point")
}

/// `<pk> OP_CHECKSIGVERIFY <blocks> OP_CSV` — spendable by `pk` once the
/// output is `blocks` deep.
pub fn timelock_script(pk: &XOnlyPublicKey, blocks: u16) -> ScriptBuf {
    Builder::new()
        .push_x_only_key(pk)
        .push_opcode(OP_CHECKSIGVERIFY)
        .push_int(blocks as i64)
        .push_opcode(OP_CSV)
        .into_script()
}

fn single_key_script(pk: &XOnlyPublicKey, verify: bool) -> ScriptBuf {
    let b = Builder::new().push_x_only_key(pk);
    if verify {
        b.push_opcode(OP_CHECKSIGVERIFY).into_script()
    } else {
        b.push_opcode(OP_CHECKSIG).into_script()
    }
}

/// k-of-n multisig over sorted x-only keys using OP_CHECKSIGADD.
fn multisig_script(
    pks: &[XOnlyPublicKey],
    quorum: u32,
    verify: bool,
) -> Result<ScriptBuf, ScriptError> {
    if pks.is_empty() {
        return Err(ScriptError::NoKeys);
    }
    if quorum as usize > pks.len() {
        return Err(ScriptError::QuorumTooLarge(quorum, pks.len()));
    }
    if pks.len() == 1 {
        return Ok(single_key_script(&pks[0], verify));
    }

    let mut sorted: Vec<XOnlyPublicKey> = pks.to_vec();
    sorted.sort_by_key(|pk| pk.serialize());
    if sorted.windows(2).any(|w| w[0] == w[1]) {
        return Err(ScriptError::DuplicateKey);
    }

    let mut b = Builder::new();
    for (i, pk) in sorted.iter().enumerate() {
        b = b.push_x_only_key(pk);
        b = b.push_opcode(if i == 0 { OP_CHECKSIG } else { OP_CHECKSIGADD });
    }
    b = b.push_int(quorum as i64);
    b = b.push_opcode(if verify { OP_NUMEQUALVERIFY } else { OP_NUMEQUAL });
    Ok(b.into_script())
}

fn concat_scripts(parts: &[ScriptBuf]) -> ScriptBuf {
    let mut bytes = Vec::new();
    for part in parts {
        bytes.extend_from_slice(part.as_bytes());
    }
    ScriptBuf::from_bytes(bytes)
}

/// Script for the cooperative unbonding path: staker plus covenant quorum.
pub fn unbonding_path_script(
    staker: &XOnlyPublicKey,
    params: &StakingParams,
) -> Result<ScriptBuf, ScriptError> {
    Ok(concat_scripts(&[
        single_key_script(staker, true),
        multisig_script(&params.covenant_pks, params.covenant_quorum, false)?,
    ]))
}

/// Script for the slashing path: staker, the finality provider and the
/// covenant quorum all sign.
pub fn slashing_path_script(
    staker: &XOnlyPublicKey,
    finality_provider: &XOnlyPublicKey,
    params: &StakingParams,
) -> Result<ScriptBuf, ScriptError> {
    Ok(concat_scripts(&[
        single_key_script(staker, true),
        multisig_script(std::slice::from_ref(finality_provider), 1, true)?,
        multisig_script(&params.covenant_pks, params.covenant_quorum, false)?,
    ]))
}

/// Taproot tree of a staking output.
pub fn staking_taproot(
    staker: &XOnlyPublicKey,
    finality_provider: &XOnlyPublicKey,
    staking_time: u16,
    params: &StakingParams,
) -> Result<TaprootSpendInfo, ScriptError> {
    let timelock = timelock_script(staker, staking_time);
    let unbonding = unbonding_path_script(staker, params)?;
    let slashing = slashing_path_script(staker, finality_provider, params)?;

    TaprootBuilder::new()
        .add_leaf(2, timelock)
        .and_then(|b| b.add_leaf(2, unbonding))
        .and_then(|b| b.add_leaf(1, slashing))
        .map_err(|_| ScriptError::TaprootBuild)?
        .finalize(&Secp256k1::new(), unspendable_internal_key())
        .map_err(|_| ScriptError::TaprootBuild)
}

/// Taproot tree of an unbonding output.
pub fn unbonding_taproot(
    staker: &XOnlyPublicKey,
    finality_provider: &XOnlyPublicKey,
    params: &StakingParams,
) -> Result<TaprootSpendInfo, ScriptError> {
    let timelock = timelock_script(staker, params.unbonding_time);
    let slashing = slashing_path_script(staker, finality_provider, params)?;

    TaprootBuilder::new()
        .add_leaf(1, timelock)
        .and_then(|b| b.add_leaf(1, slashing))
        .map_err(|_| ScriptError::TaprootBuild)?
        .finalize(&Secp256k1::new(), unspendable_internal_key())
        .map_err(|_| ScriptError::TaprootBuild)
}

/// Script pubkey of the staking output for the given stake terms.
pub fn staking_output_script(
    staker: &XOnlyPublicKey,
    finality_provider: &XOnlyPublicKey,
    staking_time: u16,
    params: &StakingParams,
) -> Result<ScriptBuf, ScriptError> {
    let info = staking_taproot(staker, finality_provider, staking_time, params)?;
    Ok(ScriptBuf::new_p2tr_tweaked(info.output_key()))
}

/// Script pubkey of the unbonding output for the given stake terms.
pub fn unbonding_output_script(
    staker: &XOnlyPublicKey,
    finality_provider: &XOnlyPublicKey,
    params: &StakingParams,
) -> Result<ScriptBuf, ScriptError> {
    let info = unbonding_taproot(staker, finality_provider, params)?;
    Ok(ScriptBuf::new_p2tr_tweaked(info.output_key()))
}
