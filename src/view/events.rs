//! Change notifications from a view to its observers.
//!
//! Observers hold only a receiver; the view keeps no reference back to them.
//! A lagging receiver loses old events, which is harmless because every
//! event only means "re-read the rows you show".

use serde::Serialize;
use tokio::sync::broadcast;

const EVENT_CAPACITY: usize = 256;

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum ViewEvent {
    /// Rows in `[anchor, end)` became available.
    ChunkLoaded { anchor: u64, end: u64, rows: usize },
    /// Every cached row was dropped.
    Invalidated { generation: u64 },
    /// Fetching the chunk at `anchor` failed; its rows stay unavailable.
    LoadFailed { anchor: u64, error: String },
}

#[derive(Debug)]
pub(crate) struct EventHub {
    tx: broadcast::Sender<ViewEvent>,
}

impl EventHub {
    pub(crate) fn new() -> Self {
        let (tx, _) = broadcast::channel(EVENT_CAPACITY);
        Self { tx }
    }

    pub(crate) fn emit(&self, event: ViewEvent) {
        // No receivers is fine.
        let _ = self.tx.send(event);
    }

    pub(crate) fn subscribe(&self) -> broadcast::Receiver<ViewEvent> {
        self.tx.subscribe()
    }
}
