// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;

use crate::record::RecordType;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("Storage backend error: {0}")]
    Backend(String),
    #[error("Corrupt value under '{key}': {reason}")]
    Corruption {
        key: String,
        reason: String,
    },
}

/// Durable local storage: a small key-value area plus per-category record tables.
///
/// Implementations are only ever called through
/// [`TransactionGateway`](crate::gateway::TransactionGateway), which adds the
/// timeout guard.
#[async_trait]
pub trait StorageAdapter: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError>;
    async fn put(&self, key: &str, value: &Value) -> Result<(), StorageError>;

    /// All local records of one category, in insertion order.
    async fn load_records(&self, record_type: RecordType) -> Result<Vec<Value>, StorageError>;

    /// Insert records in a single transaction.
    ///
    /// A record whose identity already exists locally is left untouched
    /// (never overwritten). Returns the number actually inserted.
    async fn insert_records(
        &self,
        record_type: RecordType,
        records: &[Value],
    ) -> Result<usize, StorageError>;
}
