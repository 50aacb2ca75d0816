//! Confirmation-tracked block polling.
//!
//! The poller walks the chain in strict height order and emits a block to
//! the confirmed stream only once it has `k` confirmations (counting
//! itself).  Emission is cooperative: the poller does not advance past a
//! block until the pipeline acked it, which happens only after the block's
//! events and checkpoint write landed.  Reorgs deeper than `k` are out of
//! scope; shallower ones are invisible because nothing is emitted before
//! depth.
//!
//! Independently, every newly seen block is pushed to the tip stream at one
//! confirmation for the unconfirmed-TVL projection.

use std::{sync::Arc, time::Duration};

use bitcoin::Block;
use stakeidx_tasks::ShutdownGuard;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use crate::client::{with_retry, ChainSource, RetryConfig};

/// A block at depth ≥ k, to be processed exactly once and acked.
#[derive(Debug)]
pub struct ConfirmedBlock {
    pub height: u64,
    pub block: Block,
    /// Completed by the pipeline after storage and checkpoint writes.
    pub ack: oneshot::Sender<()>,
}

/// A block at one confirmation, for the tip-of-chain projection.
#[derive(Clone, Debug)]
pub struct TipBlock {
    pub height: u64,
    pub block: Block,
}

#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    pub poll_interval: Duration,
    /// Confirmations required, counting the including block.
    pub confirmation_depth: u32,
    pub retry: RetryConfig,
}

/// Runs until shutdown or until a receiver goes away.
pub async fn run_block_poller<C: ChainSource>(
    client: Arc<C>,
    config: PollerConfig,
    start_height: u64,
    confirmed_tx: mpsc::Sender<ConfirmedBlock>,
    tip_tx: mpsc::Sender<TipBlock>,
    shutdown: ShutdownGuard,
) -> anyhow::Result<()> {
    let k = config.confirmation_depth as u64;
    let mut next_height = start_height;
    let mut next_tip_height = start_height;

    info!(%start_height, confirmation_depth = %k, "starting block poller");

    let mut ticker = tokio::time::interval(config.poll_interval);
    ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            _ = shutdown.wait_for_shutdown() => {
                info!("block poller shutting down");
                return Ok(());
            }
            _ = ticker.tick() => {}
        }

        let tip = match with_retry(&config.retry, "get_block_count", || {
            client.get_block_count()
        })
        .await
        {
            Ok(tip) => tip,
            Err(e) => {
                // This round is lost; the node may be back next tick.
                warn!(err = %e, "could not learn chain tip");
                continue;
            }
        };

        // Tip stream first so the unconfirmed projection always leads the
        // confirmed one.
        while next_tip_height <= tip {
            let height = next_tip_height;
            let block = match with_retry(&config.retry, "get_block_at", || {
                client.get_block_at(height)
            })
            .await
            {
                Ok(b) => b,
                Err(e) => {
                    warn!(%height, err = %e, "could not fetch tip block");
                    break;
                }
            };
            if tip_tx.send(TipBlock { height, block }).await.is_err() {
                info!("tip receiver dropped, poller exiting");
                return Ok(());
            }
            next_tip_height += 1;
        }

        // Confirmed stream: everything buried at least k deep.
        while tip + 1 >= next_height + k {
            if shutdown.should_shutdown() {
                return Ok(());
            }
            let height = next_height;
            let block = match with_retry(&config.retry, "get_block_at", || {
                client.get_block_at(height)
            })
            .await
            {
                Ok(b) => b,
                Err(e) => {
                    warn!(%height, err = %e, "could not fetch confirmed block");
                    break;
                }
            };

            let (ack_tx, ack_rx) = oneshot::channel();
            let event = ConfirmedBlock {
                height,
                block,
                ack: ack_tx,
            };
            if confirmed_tx.send(event).await.is_err() {
                info!("confirmed receiver dropped, poller exiting");
                return Ok(());
            }

            // Hold here until the pipeline finished the block.
            tokio::select! {
                _ = shutdown.wait_for_shutdown() => {
                    info!("block poller shutting down mid-block");
                    return Ok(());
                }
                acked = ack_rx => {
                    if acked.is_err() {
                        info!("pipeline dropped without ack, poller exiting");
                        return Ok(());
                    }
                }
            }
            debug!(%height, "block acked");
            next_height += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Mutex;

    use async_trait::async_trait;
    use bitcoin::{
        block::{Header, Version},
        hashes::Hash,
        BlockHash, CompactTarget, TxMerkleNode,
    };
    use stakeidx_tasks::TaskManager;

    use super::*;
    use crate::client::ClientError;

    fn dummy_block(height: u64) -> Block {
        Block {
            header: Header {
                version: Version::TWO,
                prev_blockhash: BlockHash::all_zeros(),
                merkle_root: TxMerkleNode::all_zeros(),
                time: height as u32,
                bits: CompactTarget::from_consensus(0x207f_ffff),
                nonce: height as u32,
            },
            txdata: vec![],
        }
    }

    struct StaticChain {
        tip: Mutex<u64>,
    }

    #[async_trait]
    impl ChainSource for StaticChain {
        async fn get_block_count(&self) -> Result<u64, ClientError> {
            Ok(*self.tip.lock().unwrap())
        }

        async fn get_block_at(&self, height: u64) -> Result<Block, ClientError> {
            if height > *self.tip.lock().unwrap() {
                return Err(ClientError::Rpc("height beyond tip".into()));
            }
            Ok(dummy_block(height))
        }
    }

    fn poller_config() -> PollerConfig {
        PollerConfig {
            poll_interval: Duration::from_millis(10),
            confirmation_depth: 6,
            retry: RetryConfig::default(),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn emits_only_buried_blocks_in_order() {
        let chain = Arc::new(StaticChain {
            tip: Mutex::new(20),
        });
        let (confirmed_tx, mut confirmed_rx) = mpsc::channel(1);
        let (tip_tx, mut tip_rx) = mpsc::channel(64);

        let rt_handle = tokio::runtime::Handle::current();
        let manager = TaskManager::new(rt_handle);
        let shutdown = manager.executor().shutdown_guard();

        tokio::spawn(run_block_poller(
            chain,
            poller_config(),
            10,
            confirmed_tx,
            tip_tx,
            shutdown,
        ));

        // Tip 20, k = 6: confirmed blocks are 10..=15.
        let mut got = Vec::new();
        for _ in 0..6 {
            let ev = confirmed_rx.recv().await.unwrap();
            got.push(ev.height);
            ev.ack.send(()).unwrap();
        }
        assert_eq!(got, vec![10, 11, 12, 13, 14, 15]);

        // Nothing deeper than depth k is available yet.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), confirmed_rx.recv())
                .await
                .is_err()
        );

        // The tip stream saw everything from the start height.
        let mut tips = Vec::new();
        while let Ok(Some(ev)) =
            tokio::time::timeout(Duration::from_millis(100), tip_rx.recv()).await
        {
            tips.push(ev.height);
            if ev.height == 20 {
                break;
            }
        }
        assert_eq!(tips, (10..=20).collect::<Vec<_>>());

        manager.shutdown_signal().trigger();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn does_not_advance_past_unacked_block() {
        let chain = Arc::new(StaticChain {
            tip: Mutex::new(20),
        });
        let (confirmed_tx, mut confirmed_rx) = mpsc::channel(1);
        let (tip_tx, mut tip_rx) = mpsc::channel(64);
        tokio::spawn(async move { while tip_rx.recv().await.is_some() {} });

        let manager = TaskManager::new(tokio::runtime::Handle::current());
        let shutdown = manager.executor().shutdown_guard();

        tokio::spawn(run_block_poller(
            chain,
            poller_config(),
            10,
            confirmed_tx,
            tip_tx,
            shutdown,
        ));

        let first = confirmed_rx.recv().await.unwrap();
        assert_eq!(first.height, 10);
        // No ack: the next block must not arrive.
        assert!(
            tokio::time::timeout(Duration::from_millis(200), confirmed_rx.recv())
                .await
                .is_err()
        );

        first.ack.send(()).unwrap();
        let second = confirmed_rx.recv().await.unwrap();
        assert_eq!(second.height, 11);

        manager.shutdown_signal().trigger();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn follows_a_growing_chain() {
        let chain = Arc::new(StaticChain {
            tip: Mutex::new(10),
        });
        let (confirmed_tx, mut confirmed_rx) = mpsc::channel(1);
        let (tip_tx, mut tip_rx) = mpsc::channel(64);
        tokio::spawn(async move { while tip_rx.recv().await.is_some() {} });

        let manager = TaskManager::new(tokio::runtime::Handle::current());
        let shutdown = manager.executor().shutdown_guard();

        tokio::spawn(run_block_poller(
            chain.clone(),
            poller_config(),
            10,
            confirmed_tx,
            tip_tx,
            shutdown,
        ));

        // Tip 10: block 10 has 1 confirmation, nothing is confirmed.
        assert!(
            tokio::time::timeout(Duration::from_millis(100), confirmed_rx.recv())
                .await
                .is_err()
        );

        // Mine five more: block 10 reaches exactly k confirmations.
        *chain.tip.lock().unwrap() = 15;
        let ev = confirmed_rx.recv().await.unwrap();
        assert_eq!(ev.height, 10);
        ev.ack.send(()).unwrap();

        manager.shutdown_signal().trigger();
    }
}
