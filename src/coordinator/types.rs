// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Public types for the sync coordinator.

use std::sync::Arc;

use crate::auth::AuthBridge;
use crate::clock::{Clock, SystemClock};
use crate::merger::MergeResult;
use crate::remote::NetworkAdapter;
use crate::resilience::circuit_breaker::CircuitConfig;
use crate::storage::traits::StorageAdapter;

/// Where the coordinator is within a cycle.
///
/// ```text
/// Idle → CheckAuth → CheckOnline → WakeRemote → FlushQueue → (MergeRemote) → Idle
/// ```
///
/// Use [`super::SyncCoordinator::phase()`] to check the current phase or
/// [`super::SyncCoordinator::phase_receiver()`] to watch for changes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SyncPhase {
    Idle,
    CheckAuth,
    CheckOnline,
    WakeRemote,
    FlushQueue,
    MergeRemote,
}

impl std::fmt::Display for SyncPhase {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Idle => write!(f, "Idle"),
            Self::CheckAuth => write!(f, "CheckAuth"),
            Self::CheckOnline => write!(f, "CheckOnline"),
            Self::WakeRemote => write!(f, "WakeRemote"),
            Self::FlushQueue => write!(f, "FlushQueue"),
            Self::MergeRemote => write!(f, "MergeRemote"),
        }
    }
}

/// Why a cycle did not (fully) succeed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncReason {
    NotAuthenticated,
    SyncDisabled,
    Offline,
    /// Another cycle was already running
    InProgress,
    NetworkError,
    /// A storage operation timed out
    Timeout,
    /// The remote circuit is open
    RemoteUnavailable,
    MissingUserId,
}

impl SyncReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NotAuthenticated => "not_authenticated",
            Self::SyncDisabled => "sync_disabled",
            Self::Offline => "offline",
            Self::InProgress => "in_progress",
            Self::NetworkError => "network_error",
            Self::Timeout => "timeout",
            Self::RemoteUnavailable => "remote_unavailable",
            Self::MissingUserId => "missing_user_id",
        }
    }
}

impl std::fmt::Display for SyncReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Result of [`super::SyncCoordinator::sync_now`] or
/// [`super::SyncCoordinator::sync_account_data`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SyncOutcome {
    pub success: bool,
    pub reason: Option<SyncReason>,
    /// Queue entries confirmed by the remote this cycle
    pub flushed: usize,
    /// Queue length when the cycle ended
    pub remaining: usize,
    /// Present once the merge phase was reached
    pub merge: Option<MergeResult>,
}

impl SyncOutcome {
    pub(super) fn completed(flushed: usize, remaining: usize) -> Self {
        Self { success: true, reason: None, flushed, remaining, merge: None }
    }

    pub(super) fn stopped(reason: SyncReason, flushed: usize, remaining: usize) -> Self {
        Self { success: false, reason: Some(reason), flushed, remaining, merge: None }
    }

    /// Label used for logs and the cycle metric.
    #[must_use]
    pub fn result_label(&self) -> &'static str {
        match self.reason {
            None => "success",
            Some(reason) => reason.as_str(),
        }
    }
}

/// Collaborators injected into the coordinator.
pub struct SyncDeps {
    pub storage: Arc<dyn StorageAdapter>,
    pub remote: Arc<dyn NetworkAdapter>,
    /// Shared with the remote so both see the same endpoint and token
    pub auth: Arc<AuthBridge>,
    pub clock: Arc<dyn Clock>,
    pub circuit: CircuitConfig,
}

impl SyncDeps {
    pub fn new(
        storage: Arc<dyn StorageAdapter>,
        remote: Arc<dyn NetworkAdapter>,
        auth: Arc<AuthBridge>,
    ) -> Self {
        Self {
            storage,
            remote,
            auth,
            clock: Arc::new(SystemClock),
            circuit: CircuitConfig::default(),
        }
    }

    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    #[must_use]
    pub fn with_circuit(mut self, circuit: CircuitConfig) -> Self {
        self.circuit = circuit;
        self
    }
}
