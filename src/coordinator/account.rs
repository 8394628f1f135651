// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Account-level operations: full sync with merge, and the sync preference.

use serde_json::Value;
use tracing::{debug, warn};

use super::cycle::{circuit_error, CycleGuard, Preflight};
use super::{SyncCoordinator, SyncOutcome, SyncPhase, SyncReason};
use crate::error::SyncError;
use crate::merger::MergeAbortReason;

impl SyncCoordinator {
    /// Flush, then pull the account's remote data and merge it locally.
    /// Used after login or account linking.
    #[tracing::instrument(skip(self))]
    pub async fn sync_account_data(&self) -> Result<SyncOutcome, SyncError> {
        let Some(guard) = CycleGuard::acquire(&self.cycle_running, &self.phase) else {
            return Ok(self.in_progress("account"));
        };

        let config = self.refresh_config();
        let (flushed, remaining) = match self.preflight_and_flush(&guard, &config).await? {
            Preflight::Stop(outcome) => return Ok(self.finish("account", outcome)),
            Preflight::Flushed { flushed, remaining } => (flushed, remaining),
        };

        guard.enter(SyncPhase::MergeRemote);

        // Settle the identity before downloading anything.
        let identity = match self.merger.ensure_identity().await {
            Ok(identity) => identity,
            Err(e) => return self.stop_on_transient("account", e, flushed).await,
        };
        if identity.is_none() {
            let merge = self.merger.abort(MergeAbortReason::MissingUserId);
            let outcome = SyncOutcome {
                merge: Some(merge),
                ..SyncOutcome::stopped(SyncReason::MissingUserId, flushed, remaining)
            };
            return Ok(self.finish("account", outcome));
        }

        let snapshot = match self
            .circuit
            .call(|| async { self.remote.download().await.map_err(SyncError::from) })
            .await
            .map_err(circuit_error)
        {
            Ok(snapshot) => snapshot,
            Err(e) => return self.stop_on_transient("account", e, flushed).await,
        };
        debug!(records = snapshot.total(), "Downloaded remote account data");

        let merge = match self.merger.merge_account_data_locally(&snapshot).await {
            Ok(merge) => merge,
            Err(e) => return self.stop_on_transient("account", e, flushed).await,
        };

        let mut outcome = if merge.aborted {
            SyncOutcome::stopped(SyncReason::MissingUserId, flushed, remaining)
        } else {
            SyncOutcome::completed(flushed, remaining)
        };
        outcome.merge = Some(merge);
        Ok(self.finish("account", outcome))
    }

    /// Persist the user's sync on/off choice.
    pub async fn set_sync_preference(&self, enabled: bool) -> Result<(), SyncError> {
        let key = self.config_rx.borrow().sync_preference_key.clone();
        self.gateway.put_value(&key, Value::Bool(enabled)).await
    }

    /// The user's sync on/off choice; enabled unless explicitly turned off.
    pub async fn sync_preference(&self) -> Result<bool, SyncError> {
        let key = self.config_rx.borrow().sync_preference_key.clone();
        match self.gateway.get_value(&key).await? {
            None => Ok(true),
            Some(Value::Bool(enabled)) => Ok(enabled),
            Some(other) => {
                warn!(key = %key, value = %other, "Unreadable sync preference, treating as enabled");
                Ok(true)
            }
        }
    }

    async fn stop_on_transient(
        &self,
        kind: &'static str,
        err: SyncError,
        flushed: usize,
    ) -> Result<SyncOutcome, SyncError> {
        let outcome = self.transient_outcome(err, flushed).await?;
        Ok(self.finish(kind, outcome))
    }
}
