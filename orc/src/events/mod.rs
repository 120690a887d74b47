//! Event publication fabric
//!
//! Typed pub/sub with bounded per-subscriber queues. Publishers never block
//! on slow subscribers; overflow drops the oldest event for that subscriber
//! only. Per-task publish order is preserved for every subscriber.

mod bus;
mod stream;
mod types;

pub use bus::{DEFAULT_SUBSCRIBER_CAPACITY, EventBus, EventFilter, Subscription};
pub use stream::{JsonFrameEncoder, format_event, run_json_sink, run_text_sink};
pub use types::Event;
