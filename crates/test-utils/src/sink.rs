//! Channel-backed event sink for asserting on published events.

use async_trait::async_trait;
use stakeidx_events::{EventEnvelope, EventError, EventSink};
use tokio::sync::mpsc;

/// Acks every publish immediately and forwards it to a channel.
pub struct ChannelSink {
    tx: mpsc::UnboundedSender<(String, EventEnvelope)>,
}

impl ChannelSink {
    pub fn new() -> (Self, mpsc::UnboundedReceiver<(String, EventEnvelope)>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (Self { tx }, rx)
    }
}

#[async_trait]
impl EventSink for ChannelSink {
    async fn publish(&self, queue: &str, envelope: &EventEnvelope) -> Result<(), EventError> {
        self.tx
            .send((queue.to_owned(), envelope.clone()))
            .map_err(|_| EventError::Broker("event receiver dropped".into()))
    }
}
