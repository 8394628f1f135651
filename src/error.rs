// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Top-level error type for the sync engine.

use thiserror::Error;

use crate::remote::RemoteError;
use crate::storage::traits::StorageError;

/// Errors surfaced by the queue, merger and coordinator.
///
/// Expected conditions (signed out, offline, sync disabled, missing identity)
/// are *not* errors: they come back as structured outcomes. What remains here
/// is either retryable on the next cycle ([`SyncError::is_retryable`]) or a
/// genuinely unexpected failure.
#[derive(Error, Debug)]
pub enum SyncError {
    #[error("storage error: {0}")]
    Storage(#[from] StorageError),

    #[error("{label} timed out after {timeout_ms}ms")]
    Timeout { label: String, timeout_ms: u64 },

    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("remote circuit open, request rejected")]
    CircuitOpen,

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl SyncError {
    /// Whether the next externally-scheduled cycle may succeed.
    #[must_use]
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            Self::Timeout { .. } | Self::Remote(_) | Self::CircuitOpen
        )
    }
}
