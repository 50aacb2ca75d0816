//! Persisted record types.
//!
//! Records carry the raw transaction plus the fields the indexer needs
//! without re-parsing it.  Bitcoin types are stored as their canonical byte
//! encodings so the records borsh-serialize directly.

use bitcoin::{
    consensus,
    hashes::Hash,
    Amount, OutPoint, Transaction, Txid, XOnlyPublicKey,
};
use borsh::{BorshDeserialize, BorshSerialize};

use crate::errors::{DbError, DbResult};

/// A staking transaction accepted by the indexer.  Written once when the tx
/// confirms, never mutated, never deleted.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StoredStakingTx {
    raw_tx: Vec<u8>,
    staking_output_index: u32,
    inclusion_height: u64,
    staking_time: u16,
    staking_value_sats: u64,
    staker_pk: [u8; 32],
    finality_provider_pk: [u8; 32],
    is_overflow: bool,
    params_version: u16,
}

impl StoredStakingTx {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        tx: &Transaction,
        staking_output_index: u32,
        inclusion_height: u64,
        staking_time: u16,
        staking_value: Amount,
        staker_pk: &XOnlyPublicKey,
        finality_provider_pk: &XOnlyPublicKey,
        is_overflow: bool,
        params_version: u16,
    ) -> Self {
        Self {
            raw_tx: consensus::serialize(tx),
            staking_output_index,
            inclusion_height,
            staking_time,
            staking_value_sats: staking_value.to_sat(),
            staker_pk: staker_pk.serialize(),
            finality_provider_pk: finality_provider_pk.serialize(),
            is_overflow,
            params_version,
        }
    }

    pub fn transaction(&self) -> DbResult<Transaction> {
        consensus::deserialize(&self.raw_tx)
            .map_err(|e| DbError::CorruptRecord(format!("staking tx: {e}")))
    }

    pub fn staking_output_index(&self) -> u32 {
        self.staking_output_index
    }

    pub fn inclusion_height(&self) -> u64 {
        self.inclusion_height
    }

    pub fn staking_time(&self) -> u16 {
        self.staking_time
    }

    pub fn staking_value(&self) -> Amount {
        Amount::from_sat(self.staking_value_sats)
    }

    pub fn staker_pk(&self) -> DbResult<XOnlyPublicKey> {
        XOnlyPublicKey::from_slice(&self.staker_pk)
            .map_err(|e| DbError::CorruptRecord(format!("staker pk: {e}")))
    }

    pub fn finality_provider_pk(&self) -> DbResult<XOnlyPublicKey> {
        XOnlyPublicKey::from_slice(&self.finality_provider_pk)
            .map_err(|e| DbError::CorruptRecord(format!("finality provider pk: {e}")))
    }

    pub fn is_overflow(&self) -> bool {
        self.is_overflow
    }

    pub fn params_version(&self) -> u16 {
        self.params_version
    }

    /// The outpoint of the staking output, given this record's key.
    pub fn staking_outpoint(&self, staking_txid: Txid) -> OutPoint {
        OutPoint {
            txid: staking_txid,
            vout: self.staking_output_index,
        }
    }
}

/// An unbonding transaction accepted by the indexer.  The referenced staking
/// tx is guaranteed to be in the store.
#[derive(Clone, Debug, PartialEq, Eq, BorshSerialize, BorshDeserialize)]
pub struct StoredUnbondingTx {
    raw_tx: Vec<u8>,
    staking_txid: [u8; 32],
    inclusion_height: u64,
}

impl StoredUnbondingTx {
    pub fn new(tx: &Transaction, staking_txid: Txid, inclusion_height: u64) -> Self {
        Self {
            raw_tx: consensus::serialize(tx),
            staking_txid: staking_txid.to_byte_array(),
            inclusion_height,
        }
    }

    pub fn transaction(&self) -> DbResult<Transaction> {
        consensus::deserialize(&self.raw_tx)
            .map_err(|e| DbError::CorruptRecord(format!("unbonding tx: {e}")))
    }

    pub fn staking_txid(&self) -> Txid {
        Txid::from_byte_array(self.staking_txid)
    }

    pub fn inclusion_height(&self) -> u64 {
        self.inclusion_height
    }

    /// The single unbonding output, given this record's key.
    pub fn unbonding_outpoint(&self, unbonding_txid: Txid) -> OutPoint {
        OutPoint {
            txid: unbonding_txid,
            vout: 0,
        }
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{absolute::LockTime, key::Secp256k1, transaction::Version, TxOut};

    use super::*;

    fn test_key() -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[5u8; 32]).unwrap();
        sk.x_only_public_key(&secp).0
    }

    fn test_tx() -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::ZERO,
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(100_000),
                script_pubkey: bitcoin::ScriptBuf::new(),
            }],
        }
    }

    #[test]
    fn staking_record_borsh_round_trip() {
        let tx = test_tx();
        let record = StoredStakingTx::new(
            &tx,
            0,
            150,
            100,
            Amount::from_sat(100_000),
            &test_key(),
            &test_key(),
            false,
            0,
        );

        let bytes = borsh::to_vec(&record).unwrap();
        let decoded: StoredStakingTx = borsh::from_slice(&bytes).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(decoded.transaction().unwrap(), tx);
        assert_eq!(decoded.staker_pk().unwrap(), test_key());
        assert_eq!(decoded.staking_value(), Amount::from_sat(100_000));
    }

    #[test]
    fn unbonding_record_keeps_parent() {
        let tx = test_tx();
        let parent = tx.compute_txid();
        let record = StoredUnbondingTx::new(&tx, parent, 160);

        let bytes = borsh::to_vec(&record).unwrap();
        let decoded: StoredUnbondingTx = borsh::from_slice(&bytes).unwrap();
        assert_eq!(decoded.staking_txid(), parent);
        assert_eq!(decoded.inclusion_height(), 160);
    }
}
