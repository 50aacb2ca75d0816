//! Key encodings for the sled trees.
//!
//! Height-index keys are big-endian so sled's lexicographic iteration walks
//! them in numeric order; the txid suffix makes them unique per record while
//! preserving that order.

use bitcoin::{hashes::Hash, OutPoint, Txid};

pub(crate) fn txid_key(txid: Txid) -> [u8; 32] {
    txid.to_byte_array()
}

pub(crate) fn outpoint_key(outpoint: OutPoint) -> [u8; 36] {
    let mut key = [0u8; 36];
    key[0..32].copy_from_slice(&outpoint.txid.to_byte_array());
    key[32..36].copy_from_slice(&outpoint.vout.to_be_bytes());
    key
}

pub(crate) fn height_idx_key(height: u64, txid: Txid) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[0..8].copy_from_slice(&height.to_be_bytes());
    key[8..40].copy_from_slice(&txid.to_byte_array());
    key
}

pub(crate) fn height_idx_start(height: u64) -> [u8; 40] {
    let mut key = [0u8; 40];
    key[0..8].copy_from_slice(&height.to_be_bytes());
    key
}

pub(crate) fn decode_txid(bytes: &[u8]) -> Option<Txid> {
    let arr: [u8; 32] = bytes.try_into().ok()?;
    Some(Txid::from_byte_array(arr))
}
