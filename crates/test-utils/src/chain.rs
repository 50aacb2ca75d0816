//! In-process chain for driving the poller without a node.

use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use bitcoin::{
    block::{Header, Version},
    hashes::Hash,
    Block, BlockHash, CompactTarget, Transaction, TxMerkleNode,
};
use stakeidx_btcio::{ChainSource, ClientError};

/// A programmable chain: start it at some height, then mine empty blocks or
/// blocks carrying specific transactions.
#[derive(Clone)]
pub struct MockChain {
    blocks: Arc<Mutex<Vec<Block>>>,
}

impl MockChain {
    /// A chain whose tip is at `initial_height` (so `initial_height + 1`
    /// blocks counting genesis).
    pub fn with_height(initial_height: u64) -> Self {
        let chain = Self {
            blocks: Arc::new(Mutex::new(Vec::new())),
        };
        for _ in 0..=initial_height {
            chain.mine_block(vec![]);
        }
        chain
    }

    fn make_block(prev: Option<&Block>, height: u64, txdata: Vec<Transaction>) -> Block {
        let prev_blockhash = prev
            .map(|b| b.block_hash())
            .unwrap_or_else(BlockHash::all_zeros);
        Block {
            header: Header {
                version: Version::TWO,
                prev_blockhash,
                merkle_root: TxMerkleNode::all_zeros(),
                time: height as u32,
                bits: CompactTarget::from_consensus(0x207f_ffff),
                nonce: height as u32,
            },
            txdata,
        }
    }

    /// Appends one block carrying `txdata`; returns its height.
    pub fn mine_block(&self, txdata: Vec<Transaction>) -> u64 {
        let mut blocks = self.blocks.lock().unwrap();
        let height = blocks.len() as u64;
        let block = Self::make_block(blocks.last(), height, txdata);
        blocks.push(block);
        height
    }

    /// Appends `n` empty blocks; returns the new tip height.
    pub fn mine_blocks(&self, n: u64) -> u64 {
        let mut tip = self.tip_height();
        for _ in 0..n {
            tip = self.mine_block(vec![]);
        }
        tip
    }

    pub fn tip_height(&self) -> u64 {
        self.blocks.lock().unwrap().len() as u64 - 1
    }
}

#[async_trait]
impl ChainSource for MockChain {
    async fn get_block_count(&self) -> Result<u64, ClientError> {
        Ok(self.tip_height())
    }

    async fn get_block_at(&self, height: u64) -> Result<Block, ClientError> {
        self.blocks
            .lock()
            .unwrap()
            .get(height as usize)
            .cloned()
            .ok_or_else(|| ClientError::Rpc(format!("no block at height {height}")))
    }
}
