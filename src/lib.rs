// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! # Progress Sync
//!
//! An offline-first sync engine for learner progress: attempts, mastery,
//! review schedules and settings.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                      SyncCoordinator                        │
//! │  • enqueue() from the app, sync_now() / sync_account_data() │
//! │  • Early exits: disabled, signed out, offline, in progress  │
//! └─────────────────────────────────────────────────────────────┘
//!          │                     │                      │
//!          ▼                     ▼                      ▼
//! ┌─────────────────┐  ┌──────────────────┐  ┌────────────────────┐
//! │  MutationQueue  │  │  AccountMerger   │  │     AuthBridge     │
//! │ • bounded FIFO  │  │ • identity pick  │  │ • session surface  │
//! │ • consolidation │  │ • additive merge │  │ • endpoint/header  │
//! └─────────────────┘  └──────────────────┘  └────────────────────┘
//!          │                     │
//!          └──────────┬──────────┘
//!                     ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │                   TransactionGateway                        │
//! │  • every durable read/write raced against a timeout         │
//! └─────────────────────────────────────────────────────────────┘
//!                     │
//!                     ▼
//!           StorageAdapter (memory / SQLite / MySQL)
//! ```
//!
//! The remote authority sits behind [`NetworkAdapter`]; [`HttpRemote`] talks
//! to it over HTTP and a circuit breaker keeps a dead server from costing a
//! full request timeout on every cycle.
//!
//! ## Modules
//!
//! - [`coordinator`]: The [`SyncCoordinator`] orchestrating a cycle
//! - [`queue`]: The bounded, consolidating [`MutationQueue`]
//! - [`merger`]: [`AccountMerger`] and identity resolution
//! - [`gateway`]: Timeout-guarded storage access
//! - [`storage`]: Storage backends (Memory, SQL)
//! - [`remote`]: Remote transport trait and HTTP implementation
//! - [`auth`]: Session view consumed by the engine
//! - [`resilience`]: Circuit breaker and startup retry

pub mod auth;
pub mod clock;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod events;
pub mod gateway;
pub mod merger;
pub mod metrics;
pub mod queue;
pub mod record;
pub mod remote;
pub mod resilience;
pub mod storage;

// Note: We don't expose a `tracing` module to avoid conflict with the tracing crate

pub use auth::{AuthBridge, AuthError, AuthProvider, AuthenticatedAccount, AuthenticatedUser, EndpointConfig, SessionAuth};
pub use clock::{Clock, ManualClock, SystemClock};
pub use config::SyncConfig;
pub use coordinator::{SyncCoordinator, SyncDeps, SyncOutcome, SyncPhase, SyncReason};
pub use error::SyncError;
pub use events::{EventBus, SyncEvent};
pub use gateway::{with_timeout, TransactionGateway, DEFAULT_TRANSACTION_TIMEOUT};
pub use merger::{AccountMerger, IdentitySource, MergeAbortReason, MergeContext, MergeResult, UserIdentity};
pub use queue::{EnqueueReport, FlushError, FlushReport, MutationQueue, Operation};
pub use record::{record_identity, RecordType};
pub use remote::{HttpRemote, NetworkAdapter, RecordOutcome, RecordStatus, RemoteError, RemoteSnapshot};
pub use resilience::circuit_breaker::{CircuitBreaker, CircuitConfig, CircuitError};
pub use resilience::retry::RetryConfig;
pub use storage::{InMemoryStore, SqlStore, StorageAdapter, StorageError};
pub use metrics::LatencyTimer;
