//! Chain access: the node RPC seam and the confirmation-tracked block
//! poller feeding the indexer pipeline.

pub mod client;
pub mod reader;

pub use client::{ChainSource, ClientError, RetryConfig};
pub use reader::{run_block_poller, ConfirmedBlock, PollerConfig, TipBlock};
