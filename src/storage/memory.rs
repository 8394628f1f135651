// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use async_trait::async_trait;
use dashmap::DashMap;
use serde_json::Value;

use crate::record::{record_identity, RecordType};
use super::traits::{StorageAdapter, StorageError};

/// Process-local store. Nothing survives a restart, but the queue/merge
/// semantics are identical to the SQL backend.
pub struct InMemoryStore {
    kv: DashMap<String, Value>,
    records: DashMap<RecordType, Vec<Value>>,
}

impl InMemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            kv: DashMap::new(),
            records: DashMap::new(),
        }
    }

    /// Total records across all categories
    #[must_use]
    pub fn record_count(&self) -> usize {
        self.records.iter().map(|r| r.value().len()).sum()
    }

    /// Clear all keys and records
    pub fn clear(&self) {
        self.kv.clear();
        self.records.clear();
    }
}

impl Default for InMemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl StorageAdapter for InMemoryStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        Ok(self.kv.get(key).map(|r| r.value().clone()))
    }

    async fn put(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        self.kv.insert(key.to_string(), value.clone());
        Ok(())
    }

    async fn load_records(&self, record_type: RecordType) -> Result<Vec<Value>, StorageError> {
        Ok(self
            .records
            .get(&record_type)
            .map(|r| r.value().clone())
            .unwrap_or_default())
    }

    async fn insert_records(
        &self,
        record_type: RecordType,
        records: &[Value],
    ) -> Result<usize, StorageError> {
        // The entry guard holds the shard lock for the whole batch.
        let mut existing = self.records.entry(record_type).or_default();
        let mut inserted = 0;
        for record in records {
            let Some(id) = record_identity(record_type, record) else {
                continue;
            };
            let taken = existing
                .iter()
                .any(|r| record_identity(record_type, r).as_deref() == Some(id.as_str()));
            if !taken {
                existing.push(record.clone());
                inserted += 1;
            }
        }
        Ok(inserted)
    }
}
