// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync coordinator.
//!
//! The [`SyncCoordinator`] is the only component callers talk to. It ties
//! together:
//! - the [`MutationQueue`] of pending local writes
//! - the [`AccountMerger`] that folds remote account data into local storage
//! - the [`AuthBridge`] view of the session
//! - a circuit breaker around bulk remote calls
//!
//! # Cycle
//!
//! ```text
//! Idle → CheckAuth → CheckOnline → WakeRemote → FlushQueue → (MergeRemote) → Idle
//! ```
//!
//! Expected conditions (sync disabled, signed out, offline, a cycle already
//! running) end the cycle early with a structured [`SyncOutcome`]; only
//! unexpected storage failures surface as `Err`.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use std::time::Duration;
//! use progress_sync::{
//!     AuthBridge, HttpRemote, InMemoryStore, RecordType, SessionAuth, SyncConfig,
//!     SyncCoordinator, SyncDeps,
//! };
//! use serde_json::json;
//! use tokio::sync::watch;
//!
//! # #[tokio::main]
//! # async fn main() -> Result<(), Box<dyn std::error::Error>> {
//! let config = SyncConfig::default();
//! let (_tx, rx) = watch::channel(config.clone());
//!
//! let auth = Arc::new(AuthBridge::from_config(Arc::new(SessionAuth::new()), &config));
//! let remote = Arc::new(HttpRemote::new(auth.clone(), config.request_timeout())?);
//! let deps = SyncDeps::new(Arc::new(InMemoryStore::new()), remote, auth);
//!
//! let coordinator = SyncCoordinator::open(rx, deps).await?;
//! coordinator.enqueue(RecordType::Attempts, json!({"id": "a1", "correct": true})).await?;
//!
//! let outcome = coordinator.sync_now().await?;
//! println!("flushed {} ({:?})", outcome.flushed, outcome.reason);
//! # Ok(())
//! # }
//! ```

mod types;
mod cycle;
mod account;

pub use types::{SyncDeps, SyncOutcome, SyncPhase, SyncReason};

use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::{broadcast, watch};
use tracing::{debug, info};

use crate::auth::{AuthBridge, EndpointConfig};
use crate::config::SyncConfig;
use crate::error::SyncError;
use crate::events::{EventBus, SyncEvent};
use crate::gateway::TransactionGateway;
use crate::merger::AccountMerger;
use crate::queue::{EnqueueReport, MutationQueue};
use crate::record::RecordType;
use crate::remote::NetworkAdapter;
use crate::resilience::circuit_breaker::CircuitBreaker;

pub struct SyncCoordinator {
    /// Configuration (re-read at the start of every cycle)
    pub(super) config_rx: watch::Receiver<SyncConfig>,

    pub(super) gateway: Arc<TransactionGateway>,
    pub(super) queue: MutationQueue,
    pub(super) merger: AccountMerger,
    pub(super) auth: Arc<AuthBridge>,
    /// Endpoint last taken from config; direct bridge setters win until it changes
    pub(super) config_endpoint: Mutex<EndpointConfig>,
    pub(super) remote: Arc<dyn NetworkAdapter>,

    /// Guards bulk upload and download
    pub(super) circuit: CircuitBreaker,

    pub(super) events: EventBus,

    /// Current phase (broadcast to watchers)
    pub(super) phase: watch::Sender<SyncPhase>,
    pub(super) phase_rx: watch::Receiver<SyncPhase>,

    /// Set while a cycle runs
    pub(super) cycle_running: AtomicBool,
}

impl SyncCoordinator {
    /// Build the coordinator and restore the persisted queue.
    ///
    /// `max_queue_size`, `queue_storage_key` and `event_channel_capacity` are
    /// taken from the config at this point and never change afterwards.
    pub async fn open(config_rx: watch::Receiver<SyncConfig>, deps: SyncDeps) -> Result<Self, SyncError> {
        let config = config_rx.borrow().clone();
        let events = EventBus::new(config.event_channel_capacity);

        let gateway = Arc::new(TransactionGateway::new(
            deps.storage,
            config.transaction_timeout(),
            events.clone(),
        ));
        let queue = MutationQueue::load(
            gateway.clone(),
            config.queue_storage_key.clone(),
            config.max_queue_size,
            deps.clock,
            events.clone(),
        )
        .await?;

        let config_endpoint = EndpointConfig::from(&config);
        deps.auth.update_endpoint(config_endpoint.clone());
        let merger = AccountMerger::new(gateway.clone(), deps.auth.clone(), events.clone(), config.clone());
        let (phase_tx, phase_rx) = watch::channel(SyncPhase::Idle);

        info!(
            max_queue_size = queue.max_size(),
            pending = queue.len().await,
            local_sync_mode = config.local_sync_mode,
            "Sync coordinator opened"
        );

        Ok(Self {
            config_rx,
            gateway,
            queue,
            merger,
            auth: deps.auth,
            config_endpoint: Mutex::new(config_endpoint),
            remote: deps.remote,
            circuit: CircuitBreaker::new("remote", deps.circuit),
            events,
            phase: phase_tx,
            phase_rx,
            cycle_running: AtomicBool::new(false),
        })
    }

    /// Record a local domain write for later delivery.
    pub async fn enqueue(&self, record_type: RecordType, payload: Value) -> Result<EnqueueReport, SyncError> {
        self.queue.enqueue(record_type, payload).await
    }

    #[must_use]
    pub fn phase(&self) -> SyncPhase {
        *self.phase_rx.borrow()
    }

    #[must_use]
    pub fn phase_receiver(&self) -> watch::Receiver<SyncPhase> {
        self.phase_rx.clone()
    }

    /// Diagnostic events: evictions, timeouts, merge aborts, flushes.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SyncEvent> {
        self.events.subscribe()
    }

    #[must_use]
    pub fn queue(&self) -> &MutationQueue {
        &self.queue
    }

    #[must_use]
    pub fn auth(&self) -> &Arc<AuthBridge> {
        &self.auth
    }

    #[must_use]
    pub fn circuit(&self) -> &CircuitBreaker {
        &self.circuit
    }

    /// Snapshot the latest config and push the runtime-adjustable parts into
    /// the components that use them.
    ///
    /// The endpoint is only pushed when the config's own value changed, so
    /// values set through [`AuthBridge::set_base_url`] and
    /// [`AuthBridge::set_auth_header_name`] survive later cycles.
    pub(super) fn refresh_config(&self) -> SyncConfig {
        let config = self.config_rx.borrow().clone();
        let endpoint = EndpointConfig::from(&config);
        {
            let mut applied = self.config_endpoint.lock();
            if *applied != endpoint {
                debug!(base_url = %endpoint.base_url, "Endpoint config changed");
                self.auth.update_endpoint(endpoint.clone());
                *applied = endpoint;
            }
        }
        self.gateway.set_timeout(config.transaction_timeout());
        self.merger.update_config(config.clone());
        config
    }
}
