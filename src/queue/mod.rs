// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Bounded, consolidating, durably-persisted mutation queue.
//!
//! # Invariants
//!
//! - Length never exceeds the cap; overflow evicts the *oldest* entries and
//!   reports how many.
//! - At most one entry per `(type, identity)`: re-enqueueing a record replaces
//!   the queued payload in place and bumps its timestamp.
//! - Every mutation rewrites the whole queue to storage before returning.
//! - A flush works on a point-in-time copy and only removes entries that are
//!   still exactly as they were when copied. Anything enqueued or
//!   consolidated meanwhile stays for the next cycle.
//!
//! # Example
//!
//! ```rust,no_run
//! # use progress_sync::{MutationQueue, RecordType};
//! # use serde_json::json;
//! # async fn example(queue: &MutationQueue) -> Result<(), progress_sync::SyncError> {
//! queue.enqueue(RecordType::Schedules, json!({"id": "abc", "due": 1700000000})).await?;
//! queue.enqueue(RecordType::Schedules, json!({"id": "abc", "due": 1700086400})).await?;
//! assert_eq!(queue.len().await, 1);
//! # Ok(())
//! # }
//! ```

mod operation;

pub use operation::Operation;

use std::sync::Arc;

use serde_json::Value;
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::clock::Clock;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::gateway::TransactionGateway;
use crate::metrics;
use crate::record::{record_identity, RecordType};
use crate::remote::{NetworkAdapter, RecordStatus, RemoteError};

/// What a single enqueue did.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EnqueueReport {
    /// An existing entry for the same record was replaced
    pub consolidated: bool,
    /// Oldest entries dropped to honor the cap
    pub evicted: usize,
    /// Queue length afterwards
    pub len: usize,
}

/// What a flush delivered.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FlushReport {
    /// Entries in the snapshot that was uploaded
    pub attempted: usize,
    /// Entries the remote confirmed (applied, duplicate or rejected)
    pub delivered: usize,
    /// Of `delivered`, entries the remote refused permanently
    pub rejected: usize,
    /// Entries the remote asked to resend
    pub retained: usize,
    /// Queue length after acknowledging
    pub remaining: usize,
}

/// A flush that stopped part-way. `report` covers what was confirmed and
/// acknowledged before the failure.
#[derive(Error, Debug)]
#[error("flush interrupted: {source}")]
pub struct FlushError {
    pub report: FlushReport,
    pub source: SyncError,
}

struct QueueState {
    ops: Vec<Operation>,
    last_enqueued_at: i64,
}

pub struct MutationQueue {
    gateway: Arc<TransactionGateway>,
    storage_key: String,
    max_size: usize,
    clock: Arc<dyn Clock>,
    events: EventBus,
    state: Mutex<QueueState>,
}

impl MutationQueue {
    /// Restore the queue persisted under `storage_key`.
    ///
    /// If the persisted queue is longer than `max_size` (the cap was lowered
    /// since it was written) it is trimmed and rewritten immediately.
    pub async fn load(
        gateway: Arc<TransactionGateway>,
        storage_key: impl Into<String>,
        max_size: usize,
        clock: Arc<dyn Clock>,
        events: EventBus,
    ) -> Result<Self, SyncError> {
        let storage_key = storage_key.into();
        let max_size = max_size.max(1);
        let ops = gateway.read_queue(&storage_key).await?;
        let last_enqueued_at = ops.iter().map(|op| op.enqueued_at).max().unwrap_or(i64::MIN);

        if !ops.is_empty() {
            info!(pending = ops.len(), key = %storage_key, "Restored pending sync operations");
        }

        let queue = Self {
            gateway,
            storage_key,
            max_size,
            clock,
            events,
            state: Mutex::new(QueueState { ops, last_enqueued_at }),
        };

        {
            let mut state = queue.state.lock().await;
            if queue.trim(&mut state.ops) > 0 {
                queue.persist(&state.ops).await?;
            }
            metrics::set_queue_depth(state.ops.len());
        }

        Ok(queue)
    }

    #[must_use]
    pub fn max_size(&self) -> usize {
        self.max_size
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.ops.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.state.lock().await.ops.is_empty()
    }

    /// Point-in-time copy of the queue, oldest first.
    pub async fn snapshot(&self) -> Vec<Operation> {
        self.state.lock().await.ops.clone()
    }

    /// Queue a write, consolidating with a pending write of the same record.
    ///
    /// If persisting fails the in-memory queue keeps the change and the
    /// next successful mutation writes it out.
    pub async fn enqueue(&self, record_type: RecordType, payload: Value) -> Result<EnqueueReport, SyncError> {
        let mut state = self.state.lock().await;

        let enqueued_at = self.clock.now_millis().max(state.last_enqueued_at);
        state.last_enqueued_at = enqueued_at;

        let identity = record_identity(record_type, &payload);
        let existing = identity.as_deref().and_then(|id| {
            state.ops.iter().position(|op| op.same_record(record_type, id))
        });

        let consolidated = match existing {
            Some(index) => {
                let op = &mut state.ops[index];
                op.payload = payload;
                op.enqueued_at = enqueued_at;
                debug!(record_type = %record_type, id = ?identity, "Consolidated queued operation");
                metrics::record_consolidation(record_type.as_str());
                true
            }
            None => {
                state.ops.push(Operation::new(record_type, payload, enqueued_at));
                false
            }
        };

        let evicted = self.trim(&mut state.ops);
        self.persist(&state.ops).await?;
        metrics::set_queue_depth(state.ops.len());

        Ok(EnqueueReport { consolidated, evicted, len: state.ops.len() })
    }

    /// Upload a snapshot of the queue, one bulk call per category.
    ///
    /// Categories go in order of first appearance. The first failing upload
    /// ends the flush; whatever was confirmed before it is still removed and
    /// counted in the [`FlushError`] report.
    pub async fn flush(&self, remote: &dyn NetworkAdapter) -> Result<FlushReport, FlushError> {
        let snapshot = self.snapshot().await;
        let mut report = FlushReport { attempted: snapshot.len(), ..Default::default() };
        if snapshot.is_empty() {
            return Ok(report);
        }

        let mut groups: Vec<(RecordType, Vec<Operation>)> = Vec::new();
        for op in snapshot {
            match groups.iter_mut().find(|(rt, _)| *rt == op.record_type) {
                Some((_, ops)) => ops.push(op),
                None => groups.push((op.record_type, vec![op])),
            }
        }

        let mut delivered: Vec<Operation> = Vec::new();
        let mut failure: Option<RemoteError> = None;

        for (record_type, ops) in groups {
            let payloads: Vec<Value> = ops.iter().map(|op| op.payload.clone()).collect();
            debug!(record_type = %record_type, count = payloads.len(), "Uploading queued operations");

            let outcomes = match remote.upload(record_type, &payloads).await {
                Ok(outcomes) if outcomes.len() == payloads.len() => outcomes,
                Ok(outcomes) => {
                    failure = Some(RemoteError::Decode(format!(
                        "expected {} outcomes for {}, got {}",
                        payloads.len(),
                        record_type,
                        outcomes.len()
                    )));
                    break;
                }
                Err(e) => {
                    failure = Some(e);
                    break;
                }
            };

            for (op, outcome) in ops.into_iter().zip(outcomes) {
                metrics::record_flush_records(record_type.as_str(), outcome.status.as_str(), 1);
                if !outcome.is_delivered() {
                    report.retained += 1;
                    continue;
                }
                if outcome.status == RecordStatus::Rejected {
                    warn!(
                        record_type = %record_type,
                        id = ?op.identity(),
                        error = ?outcome.error,
                        "Remote rejected queued operation, dropping it"
                    );
                    report.rejected += 1;
                }
                delivered.push(op);
            }
        }

        report.delivered = delivered.len();
        report.remaining = match self.acknowledge(&delivered).await {
            Ok(remaining) => remaining,
            Err(source) => return Err(FlushError { report, source }),
        };

        if let Some(e) = failure {
            warn!(error = %e, delivered = report.delivered, "Flush interrupted by remote failure");
            return Err(FlushError { report, source: e.into() });
        }

        self.events.publish(SyncEvent::FlushCompleted {
            delivered: report.delivered,
            remaining: report.remaining,
        });
        Ok(report)
    }

    /// Remove delivered operations that are still unchanged in the queue.
    /// Returns the remaining length.
    pub async fn acknowledge(&self, delivered: &[Operation]) -> Result<usize, SyncError> {
        let mut state = self.state.lock().await;
        if delivered.is_empty() {
            return Ok(state.ops.len());
        }

        let before = state.ops.len();
        for done in delivered {
            if let Some(index) = state.ops.iter().position(|op| op == done) {
                state.ops.remove(index);
            }
        }

        if state.ops.len() != before {
            self.persist(&state.ops).await?;
            metrics::set_queue_depth(state.ops.len());
        }
        Ok(state.ops.len())
    }

    /// Drop the oldest entries beyond the cap. Returns how many were dropped.
    fn trim(&self, ops: &mut Vec<Operation>) -> usize {
        if ops.len() <= self.max_size {
            return 0;
        }
        let discarded = ops.len() - self.max_size;
        ops.drain(..discarded);

        warn!(discarded, cap = self.max_size, "Sync queue over capacity, evicted oldest operations");
        metrics::record_queue_eviction(discarded);
        self.events.publish(SyncEvent::QueueEvicted { discarded, cap: self.max_size });
        discarded
    }

    async fn persist(&self, ops: &[Operation]) -> Result<(), SyncError> {
        self.gateway.write_queue(&self.storage_key, ops).await
    }
}
