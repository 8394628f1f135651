// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Shared cycle steps: guard, early exits, wake-up and flush.

use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::watch;
use tracing::{debug, info, warn};

use super::{SyncCoordinator, SyncOutcome, SyncPhase, SyncReason};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::metrics;
use crate::queue::FlushError;
use crate::resilience::circuit_breaker::CircuitError;

/// Marks a cycle as running; clears the flag and returns to Idle on drop.
pub(super) struct CycleGuard<'a> {
    running: &'a AtomicBool,
    phase: &'a watch::Sender<SyncPhase>,
}

impl<'a> CycleGuard<'a> {
    pub(super) fn acquire(running: &'a AtomicBool, phase: &'a watch::Sender<SyncPhase>) -> Option<Self> {
        running
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self { running, phase })
    }

    pub(super) fn enter(&self, phase: SyncPhase) {
        let _ = self.phase.send_replace(phase);
    }
}

impl Drop for CycleGuard<'_> {
    fn drop(&mut self) {
        let _ = self.phase.send_replace(SyncPhase::Idle);
        self.running.store(false, Ordering::Release);
    }
}

/// How far a cycle got before the merge phase.
pub(super) enum Preflight {
    /// Stop here with this outcome
    Stop(SyncOutcome),
    /// Queue flushed; carry on
    Flushed { flushed: usize, remaining: usize },
}

/// Map an error to a cycle reason if it is one the next cycle may fix.
pub(super) fn transient_reason(err: &SyncError) -> Option<SyncReason> {
    if !err.is_retryable() {
        return None;
    }
    Some(match err {
        SyncError::Timeout { .. } => SyncReason::Timeout,
        SyncError::CircuitOpen => SyncReason::RemoteUnavailable,
        _ => SyncReason::NetworkError,
    })
}

pub(super) fn circuit_error(err: CircuitError<SyncError>) -> SyncError {
    match err {
        CircuitError::Rejected => SyncError::CircuitOpen,
        CircuitError::Inner(e) => e,
    }
}

/// Split a guarded flush failure into the error and what was delivered first.
fn flush_failure(err: CircuitError<FlushError>) -> (SyncError, usize) {
    match err {
        CircuitError::Rejected => (SyncError::CircuitOpen, 0),
        CircuitError::Inner(e) => (e.source, e.report.delivered),
    }
}

impl SyncCoordinator {
    /// Flush the queue to the remote. Used for periodic or explicit triggers.
    #[tracing::instrument(skip(self))]
    pub async fn sync_now(&self) -> Result<SyncOutcome, SyncError> {
        let Some(guard) = CycleGuard::acquire(&self.cycle_running, &self.phase) else {
            return Ok(self.in_progress("flush"));
        };

        let config = self.refresh_config();
        let outcome = match self.preflight_and_flush(&guard, &config).await? {
            Preflight::Stop(outcome) => outcome,
            Preflight::Flushed { flushed, remaining } => SyncOutcome::completed(flushed, remaining),
        };

        Ok(self.finish("flush", outcome))
    }

    /// Early exits, wake-up and flush. Shared by both public cycles.
    pub(super) async fn preflight_and_flush(
        &self,
        guard: &CycleGuard<'_>,
        config: &SyncConfig,
    ) -> Result<Preflight, SyncError> {
        if !config.sync_enabled {
            debug!("Sync disabled by config, skipping cycle");
            return Ok(Preflight::Stop(self.stopped(SyncReason::SyncDisabled, 0).await));
        }
        match self.sync_preference().await {
            Ok(true) => {}
            Ok(false) => {
                debug!("Sync turned off by the user, skipping cycle");
                return Ok(Preflight::Stop(self.stopped(SyncReason::SyncDisabled, 0).await));
            }
            Err(e) => return self.transient_outcome(e, 0).await.map(Preflight::Stop),
        }

        guard.enter(SyncPhase::CheckAuth);
        if !config.local_sync_mode && !self.auth.is_authenticated().await {
            debug!("Not authenticated, skipping cycle");
            return Ok(Preflight::Stop(self.stopped(SyncReason::NotAuthenticated, 0).await));
        }

        guard.enter(SyncPhase::CheckOnline);
        if !self.remote.is_online() {
            debug!("Offline, leaving queue for a later cycle");
            return Ok(Preflight::Stop(self.stopped(SyncReason::Offline, 0).await));
        }

        if !config.local_sync_mode {
            guard.enter(SyncPhase::WakeRemote);
            self.wake_remote(config).await;
        }

        guard.enter(SyncPhase::FlushQueue);
        let flushed = self
            .circuit
            .call(|| self.queue.flush(self.remote.as_ref()))
            .await;

        match flushed {
            Ok(report) => Ok(Preflight::Flushed {
                flushed: report.delivered,
                remaining: report.remaining,
            }),
            Err(e) => {
                let (err, delivered) = flush_failure(e);
                self.transient_outcome(err, delivered).await.map(Preflight::Stop)
            }
        }
    }

    /// Turn a retryable error into a stopped outcome; anything else propagates.
    pub(super) async fn transient_outcome(&self, err: SyncError, flushed: usize) -> Result<SyncOutcome, SyncError> {
        match transient_reason(&err) {
            Some(reason) => {
                warn!(error = %err, reason = %reason, "Sync cycle interrupted");
                Ok(self.stopped(reason, flushed).await)
            }
            None => Err(err),
        }
    }

    /// Best-effort warm-up; failures and timeouts are only logged.
    async fn wake_remote(&self, config: &SyncConfig) {
        match tokio::time::timeout(config.wake_timeout(), self.remote.wake_up()).await {
            Ok(Ok(())) => debug!("Remote awake"),
            Ok(Err(e)) => debug!(error = %e, "Remote wake-up failed, continuing"),
            Err(_) => debug!(timeout_ms = config.wake_timeout_ms, "Remote wake-up timed out, continuing"),
        }
    }

    pub(super) async fn stopped(&self, reason: SyncReason, flushed: usize) -> SyncOutcome {
        SyncOutcome::stopped(reason, flushed, self.queue.len().await)
    }

    pub(super) fn in_progress(&self, kind: &'static str) -> SyncOutcome {
        debug!(kind, "Sync cycle already running");
        metrics::record_sync_cycle(kind, SyncReason::InProgress.as_str());
        SyncOutcome::stopped(SyncReason::InProgress, 0, 0)
    }

    pub(super) fn finish(&self, kind: &'static str, outcome: SyncOutcome) -> SyncOutcome {
        metrics::record_sync_cycle(kind, outcome.result_label());
        info!(
            kind,
            result = outcome.result_label(),
            flushed = outcome.flushed,
            remaining = outcome.remaining,
            "Sync cycle finished"
        );
        outcome
    }
}
