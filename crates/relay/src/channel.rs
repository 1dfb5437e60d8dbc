use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;

use rowmill_common::{Result, Row, RowmillError};
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::debug;

/// Default per-channel capacity in rows. A full channel blocks the sending
/// shim until the receiver drains it.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Identifies one cross-partition row channel.
///
/// Derived deterministically from the hop endpoints and the destination
/// partition so repeated splits of the same pipeline produce identical
/// wiring.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(pub String);

impl ChannelId {
    /// Derive the channel id for a hop from `src` to `dst` landing in
    /// `dst_partition`.
    pub fn derive(src: &str, dst: &str, dst_partition: &str) -> Self {
        Self(format!("{src} -> {dst} @ {dst_partition}"))
    }
}

impl fmt::Display for ChannelId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

struct Slot {
    sender: Option<mpsc::Sender<Row>>,
    receiver: Option<mpsc::Receiver<Row>>,
}

/// Registry of named bounded FIFO row channels.
///
/// Each channel has exactly one sending shim and one receiving shim; each
/// endpoint is taken out of the registry exactly once. Dropping the sender
/// is the end-of-stream signal for the receiver.
pub struct RelayRegistry {
    capacity: usize,
    slots: Mutex<HashMap<String, Slot>>,
}

impl Default for RelayRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl RelayRegistry {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_CHANNEL_CAPACITY)
    }

    /// Registry whose channels buffer up to `capacity` rows.
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            slots: Mutex::new(HashMap::new()),
        }
    }

    fn slot_endpoint<T>(
        &self,
        id: &str,
        pick: impl FnOnce(&mut Slot) -> Option<T>,
        side: &str,
    ) -> Result<T> {
        let mut slots = self.slots.lock().expect("relay registry lock poisoned");
        let slot = slots.entry(id.to_string()).or_insert_with(|| {
            debug!(channel = %id, capacity = self.capacity, "relay channel opened");
            let (tx, rx) = mpsc::channel(self.capacity);
            Slot {
                sender: Some(tx),
                receiver: Some(rx),
            }
        });
        let endpoint = pick(slot).ok_or_else(|| {
            RowmillError::Execution(format!("relay channel '{id}' {side} already taken"))
        })?;
        // A slot hands out one sender and one receiver, then retires so a
        // later run of the same pipeline re-opens the channel fresh.
        if slot.sender.is_none() && slot.receiver.is_none() {
            slots.remove(id);
        }
        Ok(endpoint)
    }

    /// Take the sending endpoint of `id`. Fails on the second take.
    pub fn take_sender(&self, id: &str) -> Result<mpsc::Sender<Row>> {
        self.slot_endpoint(id, |s| s.sender.take(), "sender")
    }

    /// Take the receiving endpoint of `id`. Fails on the second take.
    pub fn take_receiver(&self, id: &str) -> Result<mpsc::Receiver<Row>> {
        self.slot_endpoint(id, |s| s.receiver.take(), "receiver")
    }
}
