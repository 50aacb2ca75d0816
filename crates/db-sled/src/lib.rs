//! Sled backend for the staking indexer store.
//!
//! One tree per keyspace: the primary record trees are keyed by txid,
//! secondary trees index records by inclusion height (for startup replay)
//! and by protocol outpoint (for spend matching).  Writes flush before
//! returning, which is what lets the pipeline treat a returned `put` as
//! durable.

mod keys;

use std::path::Path;

use bitcoin::{OutPoint, Txid};
use stakeidx_db::{
    DbError, DbResult, ProgressDatabase, StakingIndexerDatabase, StoredStakingTx,
    StoredUnbondingTx,
};

use crate::keys::{decode_txid, height_idx_key, height_idx_start, outpoint_key, txid_key};

const DB_NAME: &str = "stakeidx";

const LAST_HEIGHT_KEY: &[u8] = b"last_height";

/// Opens (or creates) the indexer database under `datadir`.
pub fn open_sled_database(datadir: &Path) -> DbResult<sled::Db> {
    let path = datadir.join(DB_NAME);
    sled::open(path).map_err(backend_err)
}

fn backend_err(e: sled::Error) -> DbError {
    DbError::Backend(e.to_string())
}

/// Sled-backed implementation of the store and progress traits.
#[derive(Debug)]
pub struct StakingIndexerDBSled {
    db: sled::Db,
    staking_txs: sled::Tree,
    staking_height_idx: sled::Tree,
    staking_outpoint_idx: sled::Tree,
    unbonding_txs: sled::Tree,
    unbonding_height_idx: sled::Tree,
    unbonding_outpoint_idx: sled::Tree,
    progress: sled::Tree,
}

impl StakingIndexerDBSled {
    pub fn new(db: sled::Db) -> DbResult<Self> {
        let open = |name: &str| db.open_tree(name).map_err(backend_err);
        Ok(Self {
            staking_txs: open("staking_txs")?,
            staking_height_idx: open("staking_height_idx")?,
            staking_outpoint_idx: open("staking_outpoint_idx")?,
            unbonding_txs: open("unbonding_txs")?,
            unbonding_height_idx: open("unbonding_height_idx")?,
            unbonding_outpoint_idx: open("unbonding_outpoint_idx")?,
            progress: open("progress")?,
            db,
        })
    }

    fn flush(&self) -> DbResult<()> {
        self.db.flush().map_err(backend_err)?;
        Ok(())
    }

    fn decode_staking(&self, bytes: &[u8]) -> DbResult<StoredStakingTx> {
        borsh::from_slice(bytes).map_err(|e| DbError::CorruptRecord(format!("staking: {e}")))
    }

    fn decode_unbonding(&self, bytes: &[u8]) -> DbResult<StoredUnbondingTx> {
        borsh::from_slice(bytes).map_err(|e| DbError::CorruptRecord(format!("unbonding: {e}")))
    }

    fn records_from_height<R, F>(
        &self,
        idx_tree: &sled::Tree,
        record_tree: &sled::Tree,
        height: u64,
        decode: F,
    ) -> DbResult<Vec<(Txid, R)>>
    where
        F: Fn(&[u8]) -> DbResult<R>,
    {
        let mut out = Vec::new();
        for item in idx_tree.range(height_idx_start(height).to_vec()..) {
            let (_, txid_bytes) = item.map_err(backend_err)?;
            let Some(txid) = decode_txid(&txid_bytes) else {
                return Err(DbError::CorruptRecord("height index entry".into()));
            };
            // A crash between index and record writes can leave a dangling
            // index entry; skip those.
            let Some(raw) = record_tree.get(txid_key(txid)).map_err(backend_err)? else {
                continue;
            };
            out.push((txid, decode(&raw)?));
        }
        Ok(out)
    }
}

impl StakingIndexerDatabase for StakingIndexerDBSled {
    fn put_staking_tx(&self, txid: Txid, record: StoredStakingTx) -> DbResult<()> {
        if self.staking_txs.contains_key(txid_key(txid)).map_err(backend_err)? {
            return Err(DbError::AlreadyExists);
        }

        let encoded = borsh::to_vec(&record)
            .map_err(|e| DbError::CorruptRecord(format!("encode staking: {e}")))?;

        // Index entries land before the record so a torn write can leave a
        // dangling index but never a record invisible to the indexes.
        self.staking_height_idx
            .insert(
                height_idx_key(record.inclusion_height(), txid).to_vec(),
                txid_key(txid).to_vec(),
            )
            .map_err(backend_err)?;
        self.staking_outpoint_idx
            .insert(
                outpoint_key(record.staking_outpoint(txid)).to_vec(),
                txid_key(txid).to_vec(),
            )
            .map_err(backend_err)?;
        self.staking_txs
            .insert(txid_key(txid).to_vec(), encoded)
            .map_err(backend_err)?;
        self.flush()
    }

    fn get_staking_tx(&self, txid: Txid) -> DbResult<Option<StoredStakingTx>> {
        self.staking_txs
            .get(txid_key(txid))
            .map_err(backend_err)?
            .map(|raw| self.decode_staking(&raw))
            .transpose()
    }

    fn get_staking_tx_by_outpoint(
        &self,
        outpoint: OutPoint,
    ) -> DbResult<Option<(Txid, StoredStakingTx)>> {
        let Some(txid_bytes) = self
            .staking_outpoint_idx
            .get(outpoint_key(outpoint))
            .map_err(backend_err)?
        else {
            return Ok(None);
        };
        let Some(txid) = decode_txid(&txid_bytes) else {
            return Err(DbError::CorruptRecord("outpoint index entry".into()));
        };
        Ok(self.get_staking_tx(txid)?.map(|r| (txid, r)))
    }

    fn staking_txs_from_height(&self, height: u64) -> DbResult<Vec<(Txid, StoredStakingTx)>> {
        self.records_from_height(&self.staking_height_idx, &self.staking_txs, height, |raw| {
            self.decode_staking(raw)
        })
    }

    fn put_unbonding_tx(&self, txid: Txid, record: StoredUnbondingTx) -> DbResult<()> {
        if self
            .unbonding_txs
            .contains_key(txid_key(txid))
            .map_err(backend_err)?
        {
            return Err(DbError::AlreadyExists);
        }
        let parent = record.staking_txid();
        if !self
            .staking_txs
            .contains_key(txid_key(parent))
            .map_err(backend_err)?
        {
            return Err(DbError::MissingParent(parent));
        }

        let encoded = borsh::to_vec(&record)
            .map_err(|e| DbError::CorruptRecord(format!("encode unbonding: {e}")))?;

        self.unbonding_height_idx
            .insert(
                height_idx_key(record.inclusion_height(), txid).to_vec(),
                txid_key(txid).to_vec(),
            )
            .map_err(backend_err)?;
        self.unbonding_outpoint_idx
            .insert(
                outpoint_key(record.unbonding_outpoint(txid)).to_vec(),
                txid_key(txid).to_vec(),
            )
            .map_err(backend_err)?;
        self.unbonding_txs
            .insert(txid_key(txid).to_vec(), encoded)
            .map_err(backend_err)?;
        self.flush()
    }

    fn get_unbonding_tx(&self, txid: Txid) -> DbResult<Option<StoredUnbondingTx>> {
        self.unbonding_txs
            .get(txid_key(txid))
            .map_err(backend_err)?
            .map(|raw| self.decode_unbonding(&raw))
            .transpose()
    }

    fn get_unbonding_tx_by_outpoint(
        &self,
        outpoint: OutPoint,
    ) -> DbResult<Option<(Txid, StoredUnbondingTx)>> {
        let Some(txid_bytes) = self
            .unbonding_outpoint_idx
            .get(outpoint_key(outpoint))
            .map_err(backend_err)?
        else {
            return Ok(None);
        };
        let Some(txid) = decode_txid(&txid_bytes) else {
            return Err(DbError::CorruptRecord("outpoint index entry".into()));
        };
        Ok(self.get_unbonding_tx(txid)?.map(|r| (txid, r)))
    }

    fn unbonding_txs_from_height(
        &self,
        height: u64,
    ) -> DbResult<Vec<(Txid, StoredUnbondingTx)>> {
        self.records_from_height(
            &self.unbonding_height_idx,
            &self.unbonding_txs,
            height,
            |raw| self.decode_unbonding(raw),
        )
    }
}

impl ProgressDatabase for StakingIndexerDBSled {
    fn get_last_processed_height(&self) -> DbResult<Option<u64>> {
        let Some(raw) = self.progress.get(LAST_HEIGHT_KEY).map_err(backend_err)? else {
            return Ok(None);
        };
        let arr: [u8; 8] = raw
            .as_ref()
            .try_into()
            .map_err(|_| DbError::CorruptRecord("last_height value".into()))?;
        Ok(Some(u64::from_be_bytes(arr)))
    }

    fn set_last_processed_height(&self, height: u64) -> DbResult<()> {
        self.progress
            .insert(LAST_HEIGHT_KEY, &height.to_be_bytes())
            .map_err(backend_err)?;
        self.flush()
    }
}

#[cfg(test)]
mod tests {
    use bitcoin::{
        absolute::LockTime, hashes::Hash, key::Secp256k1, transaction::Version, Amount,
        ScriptBuf, Transaction, TxOut, XOnlyPublicKey,
    };

    use super::*;

    fn setup_db() -> StakingIndexerDBSled {
        let db = sled::Config::new().temporary(true).open().unwrap();
        StakingIndexerDBSled::new(db).unwrap()
    }

    fn test_key() -> XOnlyPublicKey {
        let secp = Secp256k1::new();
        let sk = bitcoin::secp256k1::SecretKey::from_slice(&[5u8; 32]).unwrap();
        sk.x_only_public_key(&secp).0
    }

    fn test_tx(marker: u32) -> Transaction {
        Transaction {
            version: Version::TWO,
            lock_time: LockTime::from_consensus(marker),
            input: vec![],
            output: vec![TxOut {
                value: Amount::from_sat(100_000),
                script_pubkey: ScriptBuf::new(),
            }],
        }
    }

    fn staking_record(tx: &Transaction, height: u64) -> StoredStakingTx {
        StoredStakingTx::new(
            tx,
            0,
            height,
            100,
            Amount::from_sat(100_000),
            &test_key(),
            &test_key(),
            false,
            0,
        )
    }

    #[test]
    fn duplicate_staking_put_rejected() {
        let db = setup_db();
        let tx = test_tx(1);
        let txid = tx.compute_txid();
        db.put_staking_tx(txid, staking_record(&tx, 150)).unwrap();
        let err = db.put_staking_tx(txid, staking_record(&tx, 150)).unwrap_err();
        assert!(matches!(err, DbError::AlreadyExists));
    }

    #[test]
    fn outpoint_lookup_finds_record() {
        let db = setup_db();
        let tx = test_tx(1);
        let txid = tx.compute_txid();
        db.put_staking_tx(txid, staking_record(&tx, 150)).unwrap();

        let outpoint = OutPoint { txid, vout: 0 };
        let (found_txid, found) = db.get_staking_tx_by_outpoint(outpoint).unwrap().unwrap();
        assert_eq!(found_txid, txid);
        assert_eq!(found.inclusion_height(), 150);

        let miss = OutPoint { txid, vout: 1 };
        assert!(db.get_staking_tx_by_outpoint(miss).unwrap().is_none());
    }

    #[test]
    fn height_iteration_is_ordered() {
        let db = setup_db();
        // Insert out of height order.
        for (marker, height) in [(1u32, 300u64), (2, 100), (3, 200), (4, 100)] {
            let tx = test_tx(marker);
            db.put_staking_tx(tx.compute_txid(), staking_record(&tx, height))
                .unwrap();
        }

        let all = db.staking_txs_from_height(0).unwrap();
        let heights: Vec<u64> = all.iter().map(|(_, r)| r.inclusion_height()).collect();
        assert_eq!(heights, vec![100, 100, 200, 300]);

        let later = db.staking_txs_from_height(200).unwrap();
        assert_eq!(later.len(), 2);
    }

    #[test]
    fn unbonding_requires_parent() {
        let db = setup_db();
        let orphan_parent = Txid::from_byte_array([9u8; 32]);
        let tx = test_tx(1);
        let err = db
            .put_unbonding_tx(tx.compute_txid(), StoredUnbondingTx::new(&tx, orphan_parent, 160))
            .unwrap_err();
        assert!(matches!(err, DbError::MissingParent(p) if p == orphan_parent));

        // With the parent present the insert lands and is indexed.
        let stake = test_tx(2);
        let stake_txid = stake.compute_txid();
        db.put_staking_tx(stake_txid, staking_record(&stake, 150)).unwrap();
        let unbonding = test_tx(3);
        let ub_txid = unbonding.compute_txid();
        db.put_unbonding_tx(ub_txid, StoredUnbondingTx::new(&unbonding, stake_txid, 160))
            .unwrap();

        let outpoint = OutPoint { txid: ub_txid, vout: 0 };
        let (found, record) = db.get_unbonding_tx_by_outpoint(outpoint).unwrap().unwrap();
        assert_eq!(found, ub_txid);
        assert_eq!(record.staking_txid(), stake_txid);
    }

    #[test]
    fn opens_database_under_datadir() {
        let dir = tempfile::tempdir().unwrap();
        let db = open_sled_database(dir.path()).unwrap();
        let store = StakingIndexerDBSled::new(db).unwrap();
        store.set_last_processed_height(1).unwrap();
        assert_eq!(store.get_last_processed_height().unwrap(), Some(1));
    }

    #[test]
    fn progress_round_trip() {
        let db = setup_db();
        assert!(db.get_last_processed_height().unwrap().is_none());
        db.set_last_processed_height(123).unwrap();
        assert_eq!(db.get_last_processed_height().unwrap(), Some(123));
        db.set_last_processed_height(124).unwrap();
        assert_eq!(db.get_last_processed_height().unwrap(), Some(124));
    }
}
