//! Broker sinks.

use async_trait::async_trait;
use thiserror::Error;

use crate::types::EventEnvelope;

#[derive(Debug, Error)]
pub enum EventError {
    /// The broker could not be reached or rejected the enqueue; retryable.
    #[error("broker: {0}")]
    Broker(String),

    #[error("serialization: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// A destination that durably accepts events.  `publish` must return `Ok`
/// only once the broker has acknowledged the enqueue.
#[async_trait]
pub trait EventSink: Send + Sync + 'static {
    async fn publish(&self, queue: &str, envelope: &EventEnvelope) -> Result<(), EventError>;
}

/// Pushes envelopes to `{endpoint}/{queue}` and treats any 2xx response as
/// the broker's ack.
#[derive(Debug, Clone)]
pub struct HttpSink {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpSink {
    pub fn new(endpoint: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint,
        }
    }
}

#[async_trait]
impl EventSink for HttpSink {
    async fn publish(&self, queue: &str, envelope: &EventEnvelope) -> Result<(), EventError> {
        let url = format!("{}/{queue}", self.endpoint.trim_end_matches('/'));
        let resp = self
            .client
            .post(&url)
            .json(envelope)
            .send()
            .await
            .map_err(|e| EventError::Broker(e.to_string()))?;

        if resp.status().is_success() {
            Ok(())
        } else {
            Err(EventError::Broker(format!(
                "{url} returned {}",
                resp.status()
            )))
        }
    }
}
