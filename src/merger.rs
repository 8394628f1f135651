// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Folding a remote account snapshot into local storage.
//!
//! The merge is strictly additive. A remote record is inserted only when no
//! local record of the same category carries its identity; on a collision the
//! local copy is kept untouched, whatever either side's timestamps say. That
//! makes the merge idempotent: replaying a snapshot inserts nothing.
//!
//! Before writing anything the merger settles *whose* data this is. The
//! authenticated identity always wins. A locally-persisted pseudo-identity is
//! accepted only if it does not look like a placeholder (`temp-…`, `guest`,
//! ...). With neither, the merge aborts and nothing is written.

use std::collections::{BTreeMap, HashSet};
use std::sync::Arc;

use parking_lot::RwLock;
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::auth::AuthBridge;
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::gateway::TransactionGateway;
use crate::metrics;
use crate::record::{record_identity, RecordType};
use crate::remote::RemoteSnapshot;

/// Field stamped onto merged records that do not name their owner.
pub const OWNER_FIELD: &str = "userId";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergeAbortReason {
    /// No authenticated identity and no usable local one
    MissingUserId,
}

impl MergeAbortReason {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::MissingUserId => "missing_user_id",
        }
    }
}

impl std::fmt::Display for MergeAbortReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Identity candidates gathered before a merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeContext {
    pub authenticated_id: Option<String>,
    pub local_id: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentitySource {
    Authenticated,
    Local,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserIdentity {
    pub id: String,
    pub source: IdentitySource,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MergeResult {
    pub user_id: Option<String>,
    /// Records inserted per category
    pub counts: BTreeMap<RecordType, usize>,
    pub aborted: bool,
    pub reason: Option<MergeAbortReason>,
}

impl MergeResult {
    fn aborted(reason: MergeAbortReason) -> Self {
        Self { aborted: true, reason: Some(reason), ..Default::default() }
    }

    #[must_use]
    pub fn inserted(&self, record_type: RecordType) -> usize {
        self.counts.get(&record_type).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn total_inserted(&self) -> usize {
        self.counts.values().sum()
    }
}

pub struct AccountMerger {
    gateway: Arc<TransactionGateway>,
    auth: Arc<AuthBridge>,
    events: EventBus,
    config: RwLock<SyncConfig>,
}

impl AccountMerger {
    pub fn new(
        gateway: Arc<TransactionGateway>,
        auth: Arc<AuthBridge>,
        events: EventBus,
        config: SyncConfig,
    ) -> Self {
        Self { gateway, auth, events, config: RwLock::new(config) }
    }

    /// Pick up a new transient-id policy or identity key.
    pub fn update_config(&self, config: SyncConfig) {
        *self.config.write() = config;
    }

    /// Choose the merge target: authenticated id first, then a non-placeholder
    /// local id.
    #[must_use]
    pub fn resolve_merge_user_id(&self, ctx: &MergeContext) -> Option<UserIdentity> {
        if let Some(id) = ctx.authenticated_id.as_deref().map(str::trim).filter(|id| !id.is_empty()) {
            return Some(UserIdentity { id: id.to_string(), source: IdentitySource::Authenticated });
        }

        let local = ctx.local_id.as_deref()?.trim();
        if self.config.read().is_transient_id(local) {
            debug!(local_id = local, "Ignoring placeholder local identity");
            return None;
        }
        Some(UserIdentity { id: local.to_string(), source: IdentitySource::Local })
    }

    /// Gather identity candidates from the session and local storage.
    pub async fn merge_context(&self) -> Result<MergeContext, SyncError> {
        let authenticated_id = self.auth.authenticated_identity().await;
        let key = self.config.read().local_user_id_key.clone();
        let local_id = self.gateway.get_value(&key).await?.as_ref().and_then(value_as_id);
        Ok(MergeContext { authenticated_id, local_id })
    }

    /// Resolve the merge target from the current session and local storage.
    pub async fn ensure_identity(&self) -> Result<Option<UserIdentity>, SyncError> {
        let ctx = self.merge_context().await?;
        Ok(self.resolve_merge_user_id(&ctx))
    }

    /// Insert every remote record whose identity is not already stored locally.
    pub async fn merge_account_data_locally(
        &self,
        snapshot: &RemoteSnapshot,
    ) -> Result<MergeResult, SyncError> {
        let ctx = self.merge_context().await?;
        let Some(identity) = self.resolve_merge_user_id(&ctx) else {
            return Ok(self.abort(MergeAbortReason::MissingUserId));
        };

        let mut result = MergeResult { user_id: Some(identity.id.clone()), ..Default::default() };

        for record_type in RecordType::ALL {
            let remote = snapshot.records(record_type);
            if remote.is_empty() {
                result.counts.insert(record_type, 0);
                continue;
            }

            let local = self.gateway.load_records(record_type).await?;
            let mut known: HashSet<String> =
                local.iter().filter_map(|r| record_identity(record_type, r)).collect();

            let mut fresh = Vec::new();
            let mut skipped_anonymous = 0usize;
            for record in remote {
                let Some(id) = record_identity(record_type, record) else {
                    skipped_anonymous += 1;
                    continue;
                };
                if known.insert(id) {
                    fresh.push(stamp_owner(record.clone(), &identity.id));
                }
            }

            if skipped_anonymous > 0 {
                debug!(record_type = %record_type, skipped = skipped_anonymous, "Skipped remote records without identity");
            }

            let inserted = self.gateway.insert_records(record_type, fresh).await?;
            metrics::record_merge_inserted(record_type.as_str(), inserted);
            result.counts.insert(record_type, inserted);
        }

        if identity.source == IdentitySource::Authenticated
            && ctx.local_id.as_deref() != Some(identity.id.as_str())
        {
            let key = self.config.read().local_user_id_key.clone();
            self.gateway.put_value(&key, Value::String(identity.id.clone())).await?;
        }

        info!(
            user_id = %identity.id,
            inserted = result.total_inserted(),
            "Merged remote account data"
        );
        Ok(result)
    }

    /// Report an abandoned merge. Nothing is written.
    pub fn abort(&self, reason: MergeAbortReason) -> MergeResult {
        warn!(reason = %reason, "Account merge aborted");
        metrics::record_merge_aborted(reason.as_str());
        self.events.publish(SyncEvent::MergeAborted { reason });
        MergeResult::aborted(reason)
    }
}

fn value_as_id(value: &Value) -> Option<String> {
    match value {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn stamp_owner(mut record: Value, user_id: &str) -> Value {
    if let Value::Object(fields) = &mut record {
        fields
            .entry(OWNER_FIELD)
            .or_insert_with(|| Value::String(user_id.to_string()));
    }
    record
}
