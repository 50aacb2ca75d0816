//! Reliable publishing on top of a sink.

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use tracing::{error, warn};

use crate::{
    sink::{EventError, EventSink},
    types::{EventEnvelope, StakingEvent},
};

/// Exponential backoff settings for broker retries.
#[derive(Clone, Copy, Debug)]
pub struct BackoffPolicy {
    pub base_delay: Duration,
    pub max_delay: Duration,
    /// Attempts after which the stall is escalated from warn to error logs.
    /// Retrying itself never stops; dropping an event would break the
    /// at-least-once contract.
    pub attempts_before_escalation: u32,
}

impl Default for BackoffPolicy {
    fn default() -> Self {
        Self {
            base_delay: Duration::from_millis(500),
            max_delay: Duration::from_secs(30),
            attempts_before_escalation: 10,
        }
    }
}

impl BackoffPolicy {
    fn delay_for(&self, attempt: u32) -> Duration {
        let factor = 1u32 << attempt.min(16);
        self.base_delay
            .saturating_mul(factor)
            .min(self.max_delay)
    }
}

/// Publishes events through a sink, retrying until the broker acks.
#[derive(Clone)]
pub struct Publisher {
    sink: Arc<dyn EventSink>,
    backoff: BackoffPolicy,
    tvl_seq: Arc<AtomicU64>,
}

impl Publisher {
    pub fn new(sink: Arc<dyn EventSink>, backoff: BackoffPolicy) -> Self {
        Self {
            sink,
            backoff,
            tvl_seq: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Next sequence number for a TVL snapshot event.
    pub fn next_tvl_seq(&self) -> u64 {
        self.tvl_seq.fetch_add(1, Ordering::Relaxed)
    }

    /// Publishes one event, blocking until the broker acknowledges it.
    ///
    /// The surrounding task is expected to race this against the shutdown
    /// signal; cancelling mid-retry is safe because the checkpoint only
    /// advances after this returns.
    pub async fn publish(&self, event: StakingEvent) -> Result<(), EventError> {
        let queue = event.queue();
        let envelope = EventEnvelope::new(event);

        let mut attempt: u32 = 0;
        loop {
            match self.sink.publish(queue, &envelope).await {
                Ok(()) => return Ok(()),
                Err(EventError::Serialization(e)) => {
                    // Not retryable; the caller escalates.
                    return Err(EventError::Serialization(e));
                }
                Err(EventError::Broker(e)) => {
                    let delay = self.backoff.delay_for(attempt);
                    if attempt >= self.backoff.attempts_before_escalation {
                        error!(
                            %queue,
                            event_id = %envelope.event_id,
                            %attempt,
                            err = %e,
                            "broker still unreachable, pipeline is stalled"
                        );
                    } else {
                        warn!(
                            %queue,
                            event_id = %envelope.event_id,
                            %attempt,
                            err = %e,
                            "publish failed, retrying"
                        );
                    }
                    tokio::time::sleep(delay).await;
                    attempt = attempt.saturating_add(1);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicU32, Ordering};

    use async_trait::async_trait;
    use tokio::sync::Mutex;

    use super::*;

    /// Fails the first `failures` publishes, then records the rest.
    struct FlakySink {
        failures: AtomicU32,
        delivered: Mutex<Vec<(String, EventEnvelope)>>,
    }

    impl FlakySink {
        fn new(failures: u32) -> Self {
            Self {
                failures: AtomicU32::new(failures),
                delivered: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl EventSink for FlakySink {
        async fn publish(
            &self,
            queue: &str,
            envelope: &EventEnvelope,
        ) -> Result<(), EventError> {
            if self
                .failures
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
                .is_ok()
            {
                return Err(EventError::Broker("down".into()));
            }
            self.delivered
                .lock()
                .await
                .push((queue.to_owned(), envelope.clone()));
            Ok(())
        }
    }

    fn tvl_event(seq: u64) -> StakingEvent {
        StakingEvent::UnconfirmedTvl {
            confirmed_tvl: 1,
            unconfirmed_tvl: 2,
            seq,
        }
    }

    #[tokio::test(start_paused = true)]
    async fn retries_until_acked() {
        let sink = Arc::new(FlakySink::new(3));
        let publisher = Publisher::new(sink.clone(), BackoffPolicy::default());

        publisher.publish(tvl_event(0)).await.unwrap();

        let delivered = sink.delivered.lock().await;
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].0, "unconfirmed_tvl");
    }

    #[tokio::test]
    async fn delivers_immediately_when_broker_up() {
        let sink = Arc::new(FlakySink::new(0));
        let publisher = Publisher::new(sink.clone(), BackoffPolicy::default());
        publisher.publish(tvl_event(1)).await.unwrap();
        assert_eq!(sink.delivered.lock().await.len(), 1);
    }

    #[test]
    fn backoff_is_capped() {
        let policy = BackoffPolicy {
            base_delay: Duration::from_millis(100),
            max_delay: Duration::from_secs(5),
            attempts_before_escalation: 3,
        };
        assert_eq!(policy.delay_for(0), Duration::from_millis(100));
        assert_eq!(policy.delay_for(1), Duration::from_millis(200));
        assert_eq!(policy.delay_for(20), Duration::from_secs(5));
    }

    #[test]
    fn tvl_sequence_increments() {
        let publisher = Publisher::new(
            Arc::new(FlakySink::new(0)),
            BackoffPolicy::default(),
        );
        assert_eq!(publisher.next_tvl_seq(), 0);
        assert_eq!(publisher.next_tvl_seq(), 1);
    }
}
