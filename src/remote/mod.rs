// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The remote authority, as seen by the engine.
//!
//! The engine owns none of the remote's behavior; it only needs a bulk upload
//! per category, a bulk download, a warm-up ping and an online flag. Those
//! four make up [`NetworkAdapter`]. [`HttpRemote`] is the reqwest-backed
//! implementation; tests substitute scripted fakes.
//!
//! # Wire format
//!
//! ```text
//! POST {base}/sync/{type}   {"records": [...]}
//!   → {"results": [{"id": "a1", "status": "applied"}, {"id": "a2", "status": "retry", "error": "..."}]}
//!
//! GET  {base}/sync/download
//!   → {"attempts": [...], "mastery": [...], "schedules": [...], "settings": [...]}
//!
//! GET  {base}/health        (warm-up, body ignored)
//! ```

pub mod http;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::record::RecordType;

pub use http::HttpRemote;

/// Failures talking to the remote. All of them are transient from the
/// engine's point of view: the next cycle simply tries again.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote unreachable: {0}")]
    Unreachable(String),
    #[error("remote returned HTTP {status}: {body}")]
    Status { status: u16, body: String },
    #[error("unexpected remote response: {0}")]
    Decode(String),
    #[error("remote request timed out")]
    Timeout,
}

/// What the remote did with one uploaded record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordStatus {
    /// Stored
    Applied,
    /// Already had it
    Duplicate,
    /// Refused permanently (validation); resending cannot help
    Rejected,
    /// Not processed; send again next cycle
    Retry,
}

impl RecordStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Applied => "applied",
            Self::Duplicate => "duplicate",
            Self::Rejected => "rejected",
            Self::Retry => "retry",
        }
    }
}

/// Per-record result of a bulk upload. Results are positional: the n-th
/// outcome belongs to the n-th uploaded record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordOutcome {
    #[serde(default)]
    pub id: Option<String>,
    pub status: RecordStatus,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RecordOutcome {
    #[must_use]
    pub fn new(id: impl Into<String>, status: RecordStatus) -> Self {
        Self { id: Some(id.into()), status, error: None }
    }

    /// The remote has processed the record; it must leave the queue.
    #[must_use]
    pub fn is_delivered(&self) -> bool {
        !matches!(self.status, RecordStatus::Retry)
    }
}

/// Account data pulled from the remote for one merge pass.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteSnapshot {
    #[serde(default)]
    pub attempts: Vec<Value>,
    #[serde(default)]
    pub mastery: Vec<Value>,
    #[serde(default)]
    pub schedules: Vec<Value>,
    #[serde(default)]
    pub settings: Vec<Value>,
}

impl RemoteSnapshot {
    #[must_use]
    pub fn records(&self, record_type: RecordType) -> &[Value] {
        match record_type {
            RecordType::Attempts => &self.attempts,
            RecordType::Mastery => &self.mastery,
            RecordType::Schedules => &self.schedules,
            RecordType::Settings => &self.settings,
        }
    }

    #[must_use]
    pub fn total(&self) -> usize {
        RecordType::ALL.iter().map(|rt| self.records(*rt).len()).sum()
    }
}

/// Transport to the remote authority.
#[async_trait]
pub trait NetworkAdapter: Send + Sync {
    /// Best current knowledge of connectivity. Must not block.
    fn is_online(&self) -> bool;

    /// Warm-up request to absorb remote cold-start latency.
    async fn wake_up(&self) -> Result<(), RemoteError>;

    /// Upload one category; returns one outcome per record, in order.
    async fn upload(
        &self,
        record_type: RecordType,
        records: &[Value],
    ) -> Result<Vec<RecordOutcome>, RemoteError>;

    /// Download the signed-in account's data.
    async fn download(&self) -> Result<RemoteSnapshot, RemoteError>;
}
