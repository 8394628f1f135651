// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Timeout-guarded access to durable local storage.
//!
//! Every read and write made by the queue and the merger goes through
//! [`TransactionGateway`]. Each call runs on its own task and is raced against
//! a timer: a stalled storage handle turns into a labeled
//! [`SyncError::Timeout`] instead of hanging the sync cycle. The task is
//! detached, not cancelled, so a late write still lands; its result is simply
//! dropped. Queue writes are ordered per key so a late one cannot clobber a
//! newer queue.

use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, error, warn};

use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::metrics::{self, LatencyTimer};
use crate::queue::Operation;
use crate::record::RecordType;
use crate::storage::traits::{StorageAdapter, StorageError};

/// Default window for a single storage operation.
pub const DEFAULT_TRANSACTION_TIMEOUT: Duration = Duration::from_secs(10);

/// Race `operation` against `timeout`.
///
/// On expiry returns [`SyncError::Timeout`] carrying `label`; the operation
/// keeps running in the background and its outcome is discarded.
pub async fn with_timeout<F, T>(operation: F, timeout: Duration, label: &str) -> Result<T, SyncError>
where
    F: Future<Output = Result<T, StorageError>> + Send + 'static,
    T: Send + 'static,
{
    let handle = tokio::spawn(operation);

    match tokio::time::timeout(timeout, handle).await {
        Ok(Ok(result)) => result.map_err(SyncError::from),
        Ok(Err(join_err)) => Err(SyncError::Storage(StorageError::Backend(format!(
            "{} task failed: {}",
            label, join_err
        )))),
        Err(_elapsed) => {
            let timeout_ms = timeout.as_millis() as u64;
            warn!(label, timeout_ms, "Storage operation timed out");
            metrics::record_timeout(label);
            Err(SyncError::Timeout {
                label: label.to_string(),
                timeout_ms,
            })
        }
    }
}

/// The only component allowed to touch the durable store.
pub struct TransactionGateway {
    store: Arc<dyn StorageAdapter>,
    timeout_ms: AtomicU64,
    events: EventBus,
    /// Issued to every queue write, in call order
    queue_generation: AtomicU64,
    /// Per queue key: held for the duration of a put, holds the last committed generation
    queue_slots: DashMap<String, Arc<Mutex<u64>>>,
}

impl TransactionGateway {
    pub fn new(store: Arc<dyn StorageAdapter>, timeout: Duration, events: EventBus) -> Self {
        Self {
            store,
            timeout_ms: AtomicU64::new(timeout.as_millis() as u64),
            events,
            queue_generation: AtomicU64::new(0),
            queue_slots: DashMap::new(),
        }
    }

    #[must_use]
    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms.load(Ordering::Relaxed))
    }

    /// Applies to operations started after the call.
    pub fn set_timeout(&self, timeout: Duration) {
        self.timeout_ms.store(timeout.as_millis() as u64, Ordering::Relaxed);
    }

    async fn guarded<F, T>(&self, label: &'static str, operation: F) -> Result<T, SyncError>
    where
        F: Future<Output = Result<T, StorageError>> + Send + 'static,
        T: Send + 'static,
    {
        let _timer = LatencyTimer::new(label);
        let result = with_timeout(operation, self.timeout(), label).await;
        if let Err(SyncError::Timeout { label, timeout_ms }) = &result {
            self.events.publish(SyncEvent::TransactionTimeout {
                label: label.clone(),
                timeout_ms: *timeout_ms,
            });
        }
        result
    }

    pub async fn get_value(&self, key: &str) -> Result<Option<Value>, SyncError> {
        let store = self.store.clone();
        let key = key.to_string();
        self.guarded("kv.read", async move { store.get(&key).await }).await
    }

    pub async fn put_value(&self, key: &str, value: Value) -> Result<(), SyncError> {
        let store = self.store.clone();
        let key = key.to_string();
        self.guarded("kv.write", async move { store.put(&key, &value).await }).await
    }

    /// Load the persisted queue.
    ///
    /// Entries that no longer deserialize are dropped with an error log; a
    /// value that is not an array at all yields an empty queue. Either way
    /// the next write replaces the damaged value.
    pub async fn read_queue(&self, key: &str) -> Result<Vec<Operation>, SyncError> {
        let store = self.store.clone();
        let owned_key = key.to_string();
        let raw = self
            .guarded("queue.read", async move { store.get(&owned_key).await })
            .await?;

        let entries = match raw {
            None => return Ok(Vec::new()),
            Some(Value::Array(entries)) => entries,
            Some(other) => {
                error!(key, kind = ?other, "Persisted sync queue is not an array, starting empty");
                return Ok(Vec::new());
            }
        };

        let total = entries.len();
        let ops: Vec<Operation> = entries
            .into_iter()
            .filter_map(|entry| match serde_json::from_value::<Operation>(entry) {
                Ok(op) => Some(op),
                Err(e) => {
                    error!(key, error = %e, "Dropping unreadable queue entry");
                    None
                }
            })
            .collect();

        if ops.len() < total {
            warn!(key, kept = ops.len(), dropped = total - ops.len(), "Recovered partially corrupt sync queue");
        }
        Ok(ops)
    }

    /// Persist the full queue under `key`, replacing whatever was there.
    ///
    /// Writes to one key are serialized, and a write whose generation is
    /// older than the last committed one is skipped. A write that timed out
    /// and finishes late therefore never replaces a newer copy.
    pub async fn write_queue(&self, key: &str, ops: &[Operation]) -> Result<(), SyncError> {
        let value = serde_json::to_value(ops)?;
        let generation = self.queue_generation.fetch_add(1, Ordering::SeqCst) + 1;
        let slot = self.queue_slots.entry(key.to_string()).or_default().value().clone();
        let store = self.store.clone();
        let key = key.to_string();

        self.guarded("queue.write", async move {
            let mut committed = slot.lock().await;
            if *committed > generation {
                debug!(key = %key, generation, committed = *committed, "Skipping superseded queue write");
                return Ok(());
            }
            store.put(&key, &value).await?;
            *committed = generation;
            Ok(())
        })
        .await
    }

    pub async fn load_records(&self, record_type: RecordType) -> Result<Vec<Value>, SyncError> {
        let store = self.store.clone();
        self.guarded("records.load", async move { store.load_records(record_type).await })
            .await
    }

    pub async fn insert_records(
        &self,
        record_type: RecordType,
        records: Vec<Value>,
    ) -> Result<usize, SyncError> {
        if records.is_empty() {
            return Ok(0);
        }
        let store = self.store.clone();
        self.guarded("records.insert", async move {
            store.insert_records(record_type, &records).await
        })
        .await
    }
}
