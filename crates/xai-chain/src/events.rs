use tokio::sync::broadcast;

use xai_core::types::{BlockHash, Height, TxId};

/// Tip and pool changes published by the coordinator. Consumers must
/// tolerate coalesced or dropped deliveries — the broadcast channel drops
/// the oldest events for slow subscribers.
#[derive(Clone, Debug)]
pub enum NodeEvent {
    TipChanged {
        height: Height,
        hash: BlockHash,
    },
    MempoolChanged {
        added: Vec<TxId>,
        removed: Vec<TxId>,
    },
    ReorgCompleted {
        depth: u64,
        new_tip: BlockHash,
    },
}

/// Fan-out event bus over a tokio broadcast channel.
pub struct EventBus {
    sender: broadcast::Sender<NodeEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self { sender }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<NodeEvent> {
        self.sender.subscribe()
    }

    /// Publish to all current subscribers; a send with no subscribers is
    /// not an error.
    pub fn publish(&self, event: NodeEvent) {
        let _ = self.sender.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(256)
    }
}
