// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::record::{record_identity, RecordType};

/// A pending write awaiting delivery to the remote.
///
/// Serialized as `{"type", "payload", "enqueuedAt"}`, the persisted queue format.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Operation {
    #[serde(rename = "type")]
    pub record_type: RecordType,
    pub payload: Value,
    /// Epoch millis, non-decreasing across enqueues
    #[serde(rename = "enqueuedAt")]
    pub enqueued_at: i64,
}

impl Operation {
    #[must_use]
    pub fn new(record_type: RecordType, payload: Value, enqueued_at: i64) -> Self {
        Self { record_type, payload, enqueued_at }
    }

    /// The payload's identity, if it has one.
    #[must_use]
    pub fn identity(&self) -> Option<String> {
        record_identity(self.record_type, &self.payload)
    }

    /// Same category and same identity. Payloads without identity never match.
    #[must_use]
    pub fn same_record(&self, record_type: RecordType, identity: &str) -> bool {
        self.record_type == record_type && self.identity().as_deref() == Some(identity)
    }
}
