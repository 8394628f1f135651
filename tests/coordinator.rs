//! End-to-end sync cycles with scripted remote and auth fakes.
//!
//! Run with: `cargo test --test coordinator`
//!
//! # Test Organization
//! - `exit_*` - Early exits: disabled, signed out, offline, in progress
//! - `flush_*` - Queue delivery and failure handling
//! - `account_*` - Full account sync with merge

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::{watch, Semaphore};
use tracing_subscriber::EnvFilter;

use progress_sync::{
    AuthBridge, AuthenticatedUser, CircuitConfig, InMemoryStore, ManualClock, MergeAbortReason,
    NetworkAdapter, RecordOutcome, RecordStatus, RecordType, RemoteError, RemoteSnapshot,
    SessionAuth, StorageAdapter, StorageError, SyncConfig, SyncCoordinator, SyncDeps, SyncEvent,
    SyncPhase, SyncReason, record_identity,
};

// =============================================================================
// Fakes
// =============================================================================

#[derive(Default)]
struct FakeRemote {
    offline: AtomicBool,
    fail_uploads: AtomicBool,
    /// Upload of this category fails; others succeed
    fail_category: Mutex<Option<RecordType>>,
    fail_wake: AtomicBool,
    hang_wake: AtomicBool,
    wake_calls: AtomicUsize,
    downloads: AtomicUsize,
    uploads: Mutex<Vec<(RecordType, Vec<Value>)>>,
    snapshot: Mutex<RemoteSnapshot>,
    /// When set, each upload needs a permit
    gate: Option<Arc<Semaphore>>,
}

impl FakeRemote {
    fn upload_calls(&self) -> usize {
        self.uploads.lock().len()
    }
}

#[async_trait]
impl NetworkAdapter for FakeRemote {
    fn is_online(&self) -> bool {
        !self.offline.load(Ordering::SeqCst)
    }

    async fn wake_up(&self) -> Result<(), RemoteError> {
        self.wake_calls.fetch_add(1, Ordering::SeqCst);
        if self.hang_wake.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        if self.fail_wake.load(Ordering::SeqCst) {
            return Err(RemoteError::Status { status: 502, body: "bad gateway".into() });
        }
        Ok(())
    }

    async fn upload(&self, record_type: RecordType, records: &[Value]) -> Result<Vec<RecordOutcome>, RemoteError> {
        let _permit = match &self.gate {
            Some(gate) => Some(gate.acquire().await.map_err(|e| RemoteError::Unreachable(e.to_string()))?),
            None => None,
        };
        self.uploads.lock().push((record_type, records.to_vec()));
        if self.fail_uploads.load(Ordering::SeqCst) || *self.fail_category.lock() == Some(record_type) {
            return Err(RemoteError::Unreachable("connection refused".into()));
        }
        Ok(records
            .iter()
            .map(|r| RecordOutcome {
                id: record_identity(record_type, r),
                status: RecordStatus::Applied,
                error: None,
            })
            .collect())
    }

    async fn download(&self) -> Result<RemoteSnapshot, RemoteError> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        Ok(self.snapshot.lock().clone())
    }
}

/// Store whose writes can be made to hang forever and whose reads can fail.
#[derive(Default)]
struct StallingStore {
    inner: InMemoryStore,
    stall_writes: AtomicBool,
    fail_reads: AtomicBool,
}

#[async_trait]
impl StorageAdapter for StallingStore {
    async fn get(&self, key: &str) -> Result<Option<Value>, StorageError> {
        if self.fail_reads.load(Ordering::SeqCst) {
            return Err(StorageError::Backend("disk io".into()));
        }
        self.inner.get(key).await
    }
    async fn put(&self, key: &str, value: &Value) -> Result<(), StorageError> {
        if self.stall_writes.load(Ordering::SeqCst) {
            std::future::pending::<()>().await;
        }
        self.inner.put(key, value).await
    }
    async fn load_records(&self, rt: RecordType) -> Result<Vec<Value>, StorageError> {
        self.inner.load_records(rt).await
    }
    async fn insert_records(&self, rt: RecordType, records: &[Value]) -> Result<usize, StorageError> {
        self.inner.insert_records(rt, records).await
    }
}

// =============================================================================
// Harness
// =============================================================================

struct Harness {
    store: Arc<StallingStore>,
    remote: Arc<FakeRemote>,
    session: Arc<SessionAuth>,
    config_tx: watch::Sender<SyncConfig>,
    coordinator: SyncCoordinator,
}

/// Logs show up with `RUST_LOG=progress_sync=debug cargo test -- --nocapture`.
fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

async fn harness_with(config: SyncConfig, remote: FakeRemote, circuit: CircuitConfig) -> Harness {
    init_tracing();
    let store = Arc::new(StallingStore::default());
    let remote = Arc::new(remote);
    let session = Arc::new(SessionAuth::new());
    let auth = Arc::new(AuthBridge::from_config(session.clone(), &config));
    let (config_tx, config_rx) = watch::channel(config);

    let deps = SyncDeps::new(store.clone(), remote.clone(), auth)
        .with_clock(Arc::new(ManualClock::new(1_700_000_000_000)))
        .with_circuit(circuit);
    let coordinator = SyncCoordinator::open(config_rx, deps).await.unwrap();

    Harness { store, remote, session, config_tx, coordinator }
}

async fn harness() -> Harness {
    harness_with(SyncConfig::default(), FakeRemote::default(), CircuitConfig::default()).await
}

impl Harness {
    fn login(&self, user_id: &str) {
        self.session.login("tok", AuthenticatedUser::new(user_id));
    }

    async fn enqueue_sample(&self) {
        let c = &self.coordinator;
        c.enqueue(RecordType::Attempts, json!({"id": "a1", "correct": true})).await.unwrap();
        c.enqueue(RecordType::Mastery, json!({"id": "m1", "level": 2})).await.unwrap();
        c.enqueue(RecordType::Attempts, json!({"id": "a2", "correct": false})).await.unwrap();
    }
}

// =============================================================================
// Early exits
// =============================================================================

#[tokio::test]
async fn exit_disabled_by_config_makes_no_network_calls() {
    let config = SyncConfig { sync_enabled: false, ..Default::default() };
    let h = harness_with(config, FakeRemote::default(), CircuitConfig::default()).await;
    h.login("user-1");
    h.enqueue_sample().await;

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(SyncReason::SyncDisabled));
    assert_eq!(outcome.remaining, 3);
    assert_eq!(h.remote.wake_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.remote.upload_calls(), 0);
}

#[tokio::test]
async fn exit_disabled_by_config_never_reads_storage() {
    let config = SyncConfig { sync_enabled: false, ..Default::default() };
    let h = harness_with(config, FakeRemote::default(), CircuitConfig::default()).await;
    h.login("user-1");
    h.store.fail_reads.store(true, Ordering::SeqCst);

    let outcome = h.coordinator.sync_now().await.unwrap();
    assert_eq!(outcome.reason, Some(SyncReason::SyncDisabled));

    let outcome = h.coordinator.sync_account_data().await.unwrap();
    assert_eq!(outcome.reason, Some(SyncReason::SyncDisabled));
    assert_eq!(h.remote.downloads.load(Ordering::SeqCst), 0);
}

#[tokio::test]
async fn exit_disabled_by_user_preference() {
    let h = harness().await;
    h.login("user-1");
    assert!(h.coordinator.sync_preference().await.unwrap());

    h.coordinator.set_sync_preference(false).await.unwrap();
    let outcome = h.coordinator.sync_now().await.unwrap();
    assert_eq!(outcome.reason, Some(SyncReason::SyncDisabled));
    assert_eq!(h.remote.wake_calls.load(Ordering::SeqCst), 0);

    h.coordinator.set_sync_preference(true).await.unwrap();
    assert!(h.coordinator.sync_now().await.unwrap().success);
}

#[tokio::test]
async fn exit_config_changes_apply_on_next_cycle() {
    let h = harness().await;
    h.login("user-1");
    assert!(h.coordinator.sync_now().await.unwrap().success);

    h.config_tx.send_modify(|c| c.sync_enabled = false);
    assert_eq!(h.coordinator.sync_now().await.unwrap().reason, Some(SyncReason::SyncDisabled));
}

#[tokio::test]
async fn exit_endpoint_setters_survive_cycles_until_config_changes() {
    let h = harness().await;
    h.login("user-1");
    let auth = h.coordinator.auth();
    auth.set_base_url("https://prod.example.com");
    auth.set_auth_header_name("X-Api-Token");

    h.coordinator.sync_now().await.unwrap();
    h.coordinator.sync_now().await.unwrap();
    assert_eq!(auth.base_url(), "https://prod.example.com");
    assert_eq!(auth.auth_header_name(), "X-Api-Token");

    h.config_tx.send_modify(|c| c.api_base_url = "https://staging.example.com".into());
    h.coordinator.sync_now().await.unwrap();
    assert_eq!(auth.base_url(), "https://staging.example.com");
    assert_eq!(auth.auth_header_name(), "Authorization");
}

#[tokio::test]
async fn exit_not_authenticated() {
    let h = harness().await;
    h.enqueue_sample().await;

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert_eq!(outcome.reason, Some(SyncReason::NotAuthenticated));
    assert_eq!(h.remote.wake_calls.load(Ordering::SeqCst), 0);
    assert_eq!(h.remote.upload_calls(), 0);
    assert_eq!(h.coordinator.queue().len().await, 3);
}

#[tokio::test]
async fn exit_offline_leaves_queue_untouched() {
    let h = harness().await;
    h.login("user-1");
    h.enqueue_sample().await;
    h.remote.offline.store(true, Ordering::SeqCst);

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert_eq!(outcome.reason, Some(SyncReason::Offline));
    assert_eq!(outcome.remaining, 3);
    assert_eq!(h.remote.upload_calls(), 0);
}

#[tokio::test]
async fn exit_overlapping_cycle_reports_in_progress() {
    let gate = Arc::new(Semaphore::new(0));
    let remote = FakeRemote { gate: Some(gate.clone()), ..Default::default() };
    let h = harness_with(SyncConfig::default(), remote, CircuitConfig::default()).await;
    h.login("user-1");
    h.enqueue_sample().await;

    let (first, second) = tokio::join!(h.coordinator.sync_now(), async {
        let outcome = h.coordinator.sync_now().await;
        gate.add_permits(1);
        outcome
    });

    let second = second.unwrap();
    assert_eq!(second.reason, Some(SyncReason::InProgress));
    assert_eq!(second.flushed, 0);

    let first = first.unwrap();
    assert!(first.success);
    assert_eq!(first.flushed, 3);
    assert_eq!(h.coordinator.phase(), SyncPhase::Idle);
}

#[tokio::test]
async fn exit_local_mode_skips_auth_and_wake_up() {
    let config = SyncConfig { local_sync_mode: true, ..Default::default() };
    let h = harness_with(config, FakeRemote::default(), CircuitConfig::default()).await;
    h.enqueue_sample().await;

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.flushed, 3);
    assert_eq!(h.remote.wake_calls.load(Ordering::SeqCst), 0);
}

// =============================================================================
// Flush
// =============================================================================

#[tokio::test]
async fn flush_delivers_and_empties_queue() {
    let h = harness().await;
    h.login("user-1");
    h.enqueue_sample().await;
    let mut events = h.coordinator.subscribe();
    let mut phases = h.coordinator.phase_receiver();

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.reason, None);
    assert_eq!(outcome.flushed, 3);
    assert_eq!(outcome.remaining, 0);
    assert_eq!(h.remote.wake_calls.load(Ordering::SeqCst), 1);

    let uploads = h.remote.uploads.lock().clone();
    assert_eq!(uploads.len(), 2);
    assert_eq!(uploads[0].0, RecordType::Attempts);
    assert_eq!(uploads[0].1.len(), 2);
    assert_eq!(uploads[1].0, RecordType::Mastery);

    assert_eq!(
        events.try_recv().unwrap(),
        SyncEvent::FlushCompleted { delivered: 3, remaining: 0 }
    );
    assert!(phases.has_changed().unwrap());
    assert_eq!(*phases.borrow_and_update(), SyncPhase::Idle);
    assert_eq!(h.store.inner.get("sync_queue").await.unwrap(), Some(json!([])));
}

#[tokio::test]
async fn flush_network_error_keeps_queue() {
    let h = harness().await;
    h.login("user-1");
    h.enqueue_sample().await;
    h.remote.fail_uploads.store(true, Ordering::SeqCst);

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(SyncReason::NetworkError));
    assert_eq!(outcome.remaining, 3);

    h.remote.fail_uploads.store(false, Ordering::SeqCst);
    let outcome = h.coordinator.sync_now().await.unwrap();
    assert!(outcome.success);
    assert_eq!(outcome.remaining, 0);
}

#[tokio::test]
async fn flush_partial_failure_reports_delivered_categories() {
    let h = harness().await;
    h.login("user-1");
    h.enqueue_sample().await;
    *h.remote.fail_category.lock() = Some(RecordType::Mastery);

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(SyncReason::NetworkError));
    assert_eq!(outcome.flushed, 2);
    assert_eq!(outcome.remaining, 1);
    let left = h.coordinator.queue().snapshot().await;
    assert_eq!(left[0].record_type, RecordType::Mastery);
}

#[tokio::test]
async fn flush_continues_after_failed_wake_up() {
    let h = harness().await;
    h.login("user-1");
    h.enqueue_sample().await;
    h.remote.fail_wake.store(true, Ordering::SeqCst);

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.flushed, 3);
    assert_eq!(h.remote.wake_calls.load(Ordering::SeqCst), 1);
    assert_eq!(h.remote.upload_calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn flush_continues_after_hanging_wake_up() {
    let config = SyncConfig { wake_timeout_ms: 100, ..Default::default() };
    let h = harness_with(config, FakeRemote::default(), CircuitConfig::default()).await;
    h.login("user-1");
    h.enqueue_sample().await;
    h.remote.hang_wake.store(true, Ordering::SeqCst);

    let outcome = h.coordinator.sync_now().await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.flushed, 3);
    assert_eq!(outcome.remaining, 0);
}

#[tokio::test]
async fn flush_open_circuit_short_circuits() {
    let h = harness_with(SyncConfig::default(), FakeRemote::default(), CircuitConfig::sensitive()).await;
    h.login("user-1");
    h.enqueue_sample().await;
    h.remote.fail_uploads.store(true, Ordering::SeqCst);

    let mut reasons = Vec::new();
    for _ in 0..6 {
        let before = h.remote.upload_calls();
        let outcome = h.coordinator.sync_now().await.unwrap();
        if outcome.reason == Some(SyncReason::RemoteUnavailable) {
            assert_eq!(h.remote.upload_calls(), before, "open circuit must not reach the remote");
        }
        reasons.push(outcome.reason);
    }

    assert_eq!(reasons[0], Some(SyncReason::NetworkError));
    assert!(reasons.contains(&Some(SyncReason::RemoteUnavailable)));
    assert!(h.coordinator.circuit().rejections() >= 1);
    assert_eq!(h.coordinator.queue().len().await, 3);
}

#[tokio::test(start_paused = true)]
async fn flush_storage_timeout_is_reported_as_timeout() {
    let config = SyncConfig { transaction_timeout_ms: 50, ..Default::default() };
    let h = harness_with(config, FakeRemote::default(), CircuitConfig::default()).await;
    h.login("user-1");
    h.enqueue_sample().await;
    let mut events = h.coordinator.subscribe();

    h.store.stall_writes.store(true, Ordering::SeqCst);
    let outcome = h.coordinator.sync_now().await.unwrap();

    assert_eq!(outcome.reason, Some(SyncReason::Timeout));

    let mut saw_timeout = false;
    while let Ok(event) = events.try_recv() {
        if let SyncEvent::TransactionTimeout { label, timeout_ms } = event {
            assert_eq!(label, "queue.write");
            assert_eq!(timeout_ms, 50);
            saw_timeout = true;
        }
    }
    assert!(saw_timeout);
}

#[tokio::test]
async fn flush_queue_survives_restart() {
    let store = Arc::new(InMemoryStore::new());
    let session = Arc::new(SessionAuth::new());
    let config = SyncConfig::default();

    for round in 0..2 {
        let remote = Arc::new(FakeRemote { offline: AtomicBool::new(round == 0), ..Default::default() });
        let auth = Arc::new(AuthBridge::from_config(session.clone(), &config));
        let (_tx, rx) = watch::channel(config.clone());
        let coordinator = SyncCoordinator::open(rx, SyncDeps::new(store.clone(), remote.clone(), auth))
            .await
            .unwrap();

        if round == 0 {
            session.login("tok", AuthenticatedUser::new("user-1"));
            coordinator
                .enqueue(RecordType::Settings, json!({"key": "theme", "value": "dark"}))
                .await
                .unwrap();
            let outcome = coordinator.sync_now().await.unwrap();
            assert_eq!(outcome.reason, Some(SyncReason::Offline));
        } else {
            assert_eq!(coordinator.queue().len().await, 1);
            let outcome = coordinator.sync_now().await.unwrap();
            assert_eq!(outcome.flushed, 1);
            assert_eq!(remote.uploads.lock()[0].0, RecordType::Settings);
        }
    }
}

// =============================================================================
// Account sync
// =============================================================================

fn remote_snapshot() -> RemoteSnapshot {
    RemoteSnapshot {
        attempts: vec![json!({"id": "a1"}), json!({"id": "r-attempt"})],
        mastery: vec![json!({"id": "r-mastery", "level": 4})],
        schedules: vec![json!({"id": "r-schedule", "due": 1_700_086_400})],
        settings: vec![json!({"key": "theme", "value": "light"})],
    }
}

#[tokio::test]
async fn account_sync_flushes_then_merges() {
    let h = harness().await;
    h.login("user-1");
    h.enqueue_sample().await;
    h.store
        .inner
        .insert_records(RecordType::Attempts, &[json!({"id": "a1", "correct": true})])
        .await
        .unwrap();
    *h.remote.snapshot.lock() = remote_snapshot();

    let outcome = h.coordinator.sync_account_data().await.unwrap();

    assert!(outcome.success);
    assert_eq!(outcome.flushed, 3);
    let merge = outcome.merge.unwrap();
    assert_eq!(merge.user_id.as_deref(), Some("user-1"));
    assert_eq!(merge.inserted(RecordType::Attempts), 1);
    assert_eq!(merge.inserted(RecordType::Mastery), 1);
    assert_eq!(merge.inserted(RecordType::Schedules), 1);
    assert_eq!(merge.inserted(RecordType::Settings), 1);

    // Local copy of a1 kept as-is.
    let attempts = h.store.inner.load_records(RecordType::Attempts).await.unwrap();
    assert_eq!(attempts[0], json!({"id": "a1", "correct": true}));
    assert_eq!(attempts[1]["userId"], "user-1");
    assert_eq!(h.store.inner.get("user_id").await.unwrap(), Some(json!("user-1")));

    // Replaying the same snapshot adds nothing.
    let again = h.coordinator.sync_account_data().await.unwrap();
    assert_eq!(again.merge.unwrap().total_inserted(), 0);
}

#[tokio::test]
async fn account_local_mode_without_identity_aborts_before_download() {
    let config = SyncConfig { local_sync_mode: true, ..Default::default() };
    let h = harness_with(config, FakeRemote::default(), CircuitConfig::default()).await;
    h.store.inner.put("user_id", &json!("temp-42")).await.unwrap();
    *h.remote.snapshot.lock() = remote_snapshot();
    let mut events = h.coordinator.subscribe();

    let outcome = h.coordinator.sync_account_data().await.unwrap();

    assert!(!outcome.success);
    assert_eq!(outcome.reason, Some(SyncReason::MissingUserId));
    let merge = outcome.merge.unwrap();
    assert!(merge.aborted);
    assert_eq!(merge.reason, Some(MergeAbortReason::MissingUserId));
    assert_eq!(h.remote.downloads.load(Ordering::SeqCst), 0);
    assert_eq!(h.store.inner.record_count(), 0);

    let mut saw_abort = false;
    while let Ok(event) = events.try_recv() {
        if event == (SyncEvent::MergeAborted { reason: MergeAbortReason::MissingUserId }) {
            saw_abort = true;
        }
    }
    assert!(saw_abort);
}

#[tokio::test]
async fn account_local_mode_with_usable_local_identity() {
    let config = SyncConfig { local_sync_mode: true, ..Default::default() };
    let h = harness_with(config, FakeRemote::default(), CircuitConfig::default()).await;
    h.store.inner.put("user_id", &json!("learner-7")).await.unwrap();
    *h.remote.snapshot.lock() = remote_snapshot();

    let outcome = h.coordinator.sync_account_data().await.unwrap();

    assert!(outcome.success);
    let merge = outcome.merge.unwrap();
    assert_eq!(merge.user_id.as_deref(), Some("learner-7"));
    assert_eq!(merge.total_inserted(), 5);
}

#[tokio::test]
async fn account_sync_not_authenticated_skips_merge() {
    let h = harness().await;
    *h.remote.snapshot.lock() = remote_snapshot();

    let outcome = h.coordinator.sync_account_data().await.unwrap();

    assert_eq!(outcome.reason, Some(SyncReason::NotAuthenticated));
    assert!(outcome.merge.is_none());
    assert_eq!(h.remote.downloads.load(Ordering::SeqCst), 0);
}
