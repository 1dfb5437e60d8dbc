//! Cross-partition row transport used by splitter-injected shim steps.
//!
//! A hop crossing a partition boundary becomes a sender/receiver shim pair
//! sharing one named channel; within a channel the receiver observes rows in
//! the sender's emission order. Channels are bounded, so a fast sender
//! suspends when the destination falls behind.

pub mod channel;

pub use channel::{ChannelId, RelayRegistry, DEFAULT_CHANNEL_CAPACITY};
