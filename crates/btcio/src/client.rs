//! The node RPC seam.
//!
//! [`ChainSource`] is the narrow read-only view of the Bitcoin node the
//! indexer needs.  The production impl delegates to
//! [`bitcoind_async_client::Client`]; tests substitute an in-process chain.

use std::{future::Future, time::Duration};

use async_trait::async_trait;
use bitcoin::Block;
use bitcoind_async_client::traits::Reader;
use thiserror::Error;
use tracing::warn;

#[derive(Debug, Error)]
pub enum ClientError {
    /// A single RPC round failed; retried locally.
    #[error("rpc: {0}")]
    Rpc(String),

    /// The retry budget for one operation ran out.  Fatal for the current
    /// poll round only; the next tick starts over.
    #[error("{op} still failing after {attempts} attempts: {last}")]
    RetriesExhausted {
        op: &'static str,
        attempts: u32,
        last: String,
    },
}

/// Read-only chain access.
#[async_trait]
pub trait ChainSource: Send + Sync + 'static {
    /// Height of the current chain tip.
    async fn get_block_count(&self) -> Result<u64, ClientError>;

    /// The canonical block at `height` (`0 ≤ height ≤ tip`).
    async fn get_block_at(&self, height: u64) -> Result<Block, ClientError>;
}

#[async_trait]
impl ChainSource for bitcoind_async_client::Client {
    async fn get_block_count(&self) -> Result<u64, ClientError> {
        Reader::get_block_count(self)
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))
    }

    async fn get_block_at(&self, height: u64) -> Result<Block, ClientError> {
        Reader::get_block_at(self, height)
            .await
            .map_err(|e| ClientError::Rpc(e.to_string()))
    }
}

/// Bounded exponential backoff for transient RPC failures.
#[derive(Clone, Copy, Debug)]
pub struct RetryConfig {
    pub max_retries: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_retries: 5,
            base_delay: Duration::from_millis(250),
            max_delay: Duration::from_secs(10),
        }
    }
}

impl RetryConfig {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay.saturating_mul(factor).min(self.max_delay)
    }
}

/// Runs `f` until it succeeds or the retry budget is spent.
pub(crate) async fn with_retry<T, F, Fut>(
    retry: &RetryConfig,
    op: &'static str,
    f: F,
) -> Result<T, ClientError>
where
    F: Fn() -> Fut,
    Fut: Future<Output = Result<T, ClientError>>,
{
    let mut attempt = 0u32;
    loop {
        match f().await {
            Ok(v) => return Ok(v),
            Err(e) => {
                if attempt >= retry.max_retries {
                    return Err(ClientError::RetriesExhausted {
                        op,
                        attempts: attempt + 1,
                        last: e.to_string(),
                    });
                }
                warn!(%op, %attempt, err = %e, "rpc failed, retrying");
                tokio::time::sleep(retry.delay_for(attempt)).await;
                attempt += 1;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use super::*;

    #[tokio::test(start_paused = true)]
    async fn retry_recovers_from_transient_failures() {
        let failures = AtomicU32::new(2);
        let retry = RetryConfig::default();
        let result = with_retry(&retry, "test_op", || async {
            if failures.fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1)).is_ok() {
                Err(ClientError::Rpc("flaky".into()))
            } else {
                Ok(42u64)
            }
        })
        .await;
        assert_eq!(result.unwrap(), 42);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_budget_is_bounded() {
        let retry = RetryConfig {
            max_retries: 2,
            ..Default::default()
        };
        let calls = AtomicU32::new(0);
        let result: Result<(), _> = with_retry(&retry, "test_op", || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Err(ClientError::Rpc("down".into()))
        })
        .await;
        assert!(matches!(
            result,
            Err(ClientError::RetriesExhausted { attempts: 3, .. })
        ));
        assert_eq!(calls.load(Ordering::SeqCst), 3);
    }
}
