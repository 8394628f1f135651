// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Diagnostic events for external observers.
//!
//! Every event is also logged through `tracing`; the bus exists so a host
//! (UI shell, telemetry agent) can react without scraping logs, e.g. prompt
//! for re-login when a merge aborts.
//!
//! # Example
//!
//! ```
//! use progress_sync::{EventBus, SyncEvent};
//!
//! let bus = EventBus::new(16);
//! let mut rx = bus.subscribe();
//!
//! bus.publish(SyncEvent::QueueEvicted { discarded: 2, cap: 500 });
//! assert_eq!(rx.try_recv().unwrap(), SyncEvent::QueueEvicted { discarded: 2, cap: 500 });
//! ```

use tokio::sync::broadcast;

use crate::merger::MergeAbortReason;

/// Something an observer may want to know about.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncEvent {
    /// Oldest queued operations were dropped to honor the queue cap
    QueueEvicted { discarded: usize, cap: usize },
    /// A storage operation did not settle within its window
    TransactionTimeout { label: String, timeout_ms: u64 },
    /// An account merge was refused; the user should re-confirm identity
    MergeAborted { reason: MergeAbortReason },
    /// A flush finished with these queue counts
    FlushCompleted { delivered: usize, remaining: usize },
}

/// Broadcast fan-out of [`SyncEvent`]s. Cheap to clone.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<SyncEvent>,
}

impl EventBus {
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let (tx, _) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.tx.subscribe()
    }

    /// Publish to current subscribers. Having none is fine.
    pub fn publish(&self, event: SyncEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(64)
    }
}
