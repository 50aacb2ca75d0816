//! Lifecycle event publishing.
//!
//! Events are self-describing JSON records pushed to one of four logical
//! queues.  Delivery is at-least-once: the publisher returns success only
//! after the broker acknowledged the enqueue, and it never drops an event —
//! on a dead broker it blocks (and with it the pipeline checkpoint).

mod publisher;
mod sink;
mod types;

pub use publisher::{BackoffPolicy, Publisher};
pub use sink::{EventError, EventSink, HttpSink};
pub use types::{EventEnvelope, StakingEvent};
