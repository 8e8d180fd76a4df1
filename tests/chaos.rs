//! Chaos tests: collaborators that fail, stall or disappear.
//!
//! A [`FailingCollection`] decorator wraps the in-memory store and fails the
//! selected operations on demand; [`FlakyTransport`] does the same for the
//! carrier. The orchestrator must surface every failure, never retry on its
//! own, and never leave metered state half-updated.
//!
//! Run with: `cargo test --test chaos`

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use serde_json::json;

use inbox_sync::remote::memory::{InMemoryCollection, LoopbackTransport};
use inbox_sync::remote::{DeliveryReceipt, Query, Snapshot, SnapshotListener, WriteOp};
use inbox_sync::subscription::SubscriptionHandle;
use inbox_sync::{
    AggregateView, Callback, CircuitBreaker, CircuitConfig, Origin, OriginConfig, OutboundTransport, Page,
    RemoteCircuits, RemoteCollection, RemoteError, Session, SubscriptionState, SyncConfig, SyncError,
    SyncOrchestrator, TransportError,
};

// =============================================================================
// Fault injection
// =============================================================================

#[derive(Default)]
struct Faults {
    queries: AtomicBool,
    subscribes: AtomicBool,
    writes: AtomicBool,
}

/// Store decorator that fails selected operations while the switch is on.
struct FailingCollection {
    inner: Arc<InMemoryCollection>,
    faults: Faults,
    query_attempts: AtomicU64,
    subscribe_attempts: AtomicU64,
    write_attempts: AtomicU64,
}

impl FailingCollection {
    fn new(inner: Arc<InMemoryCollection>) -> Self {
        Self {
            inner,
            faults: Faults::default(),
            query_attempts: AtomicU64::new(0),
            subscribe_attempts: AtomicU64::new(0),
            write_attempts: AtomicU64::new(0),
        }
    }
}

#[async_trait]
impl RemoteCollection for FailingCollection {
    async fn query(&self, query: &Query) -> Result<Snapshot, RemoteError> {
        self.query_attempts.fetch_add(1, Ordering::SeqCst);
        if self.faults.queries.load(Ordering::SeqCst) {
            return Err(RemoteError::Unavailable("injected query failure".into()));
        }
        self.inner.query(query).await
    }

    async fn subscribe(&self, query: Query, listener: SnapshotListener) -> Result<SubscriptionHandle, RemoteError> {
        self.subscribe_attempts.fetch_add(1, Ordering::SeqCst);
        if self.faults.subscribes.load(Ordering::SeqCst) {
            return Err(RemoteError::PermissionDenied("injected subscribe failure".into()));
        }
        self.inner.subscribe(query, listener).await
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        self.write_attempts.fetch_add(1, Ordering::SeqCst);
        if self.faults.writes.load(Ordering::SeqCst) {
            return Err(RemoteError::Timeout);
        }
        self.inner.batch_write(ops).await
    }
}

/// Carrier that rejects everything while `down` is set.
#[derive(Default)]
struct FlakyTransport {
    down: AtomicBool,
    attempts: AtomicU64,
    delivered: Mutex<Vec<String>>,
}

#[async_trait]
impl OutboundTransport for FlakyTransport {
    async fn send(&self, recipient_id: &str, _text: &str) -> Result<DeliveryReceipt, TransportError> {
        self.attempts.fetch_add(1, Ordering::SeqCst);
        if self.down.load(Ordering::SeqCst) {
            return Err(TransportError::Unreachable("injected carrier outage".into()));
        }
        self.delivered.lock().push(recipient_id.to_string());
        Ok(DeliveryReceipt {
            delivery_id: format!("d-{}", self.attempts.load(Ordering::SeqCst)),
        })
    }
}

// =============================================================================
// Helpers
// =============================================================================

struct Rig {
    orchestrator: SyncOrchestrator,
    memory: Arc<InMemoryCollection>,
    store: Arc<FailingCollection>,
    transport: Arc<FlakyTransport>,
}

fn rig(config: SyncConfig) -> Rig {
    rig_with_circuits(config, RemoteCircuits::new())
}

fn rig_with_circuits(config: SyncConfig, circuits: RemoteCircuits) -> Rig {
    let memory = Arc::new(InMemoryCollection::new());
    let store = Arc::new(FailingCollection::new(Arc::clone(&memory)));
    let transport = Arc::new(FlakyTransport::default());
    let orchestrator = SyncOrchestrator::with_circuits(config, store.clone(), transport.clone(), circuits).unwrap();
    orchestrator.set_session(Some(Session::new("op-1", "Dee")));
    Rig {
        orchestrator,
        memory,
        store,
        transport,
    }
}

fn live_only() -> SyncConfig {
    SyncConfig {
        origins: vec![OriginConfig::push(Origin::LiveStore, "messages")],
        ..SyncConfig::default()
    }
}

fn collector<T: Send + 'static>() -> (Callback<T>, Arc<Mutex<Vec<Result<T, SyncError>>>>) {
    let received = Arc::new(Mutex::new(Vec::new()));
    let sink = Arc::clone(&received);
    (Arc::new(move |event| sink.lock().push(event)), received)
}

fn seed(memory: &InMemoryCollection, conversation: &str, count: i64) {
    for n in 0..count {
        memory.insert("messages", &format!("{conversation}-{n}"), json!({
            "conversationId": conversation,
            "phone": conversation,
            "message": format!("hello {n}"),
            "timestamp": 1_790_000_000_000_i64 + n,
            "sender": "customer",
        }));
    }
}

async fn settle() {
    tokio::time::sleep(Duration::from_millis(400)).await;
}

// =============================================================================
// Subscription failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_subscribe_rejected_reports_error_without_retry() {
    let rig = rig(live_only());
    rig.store.faults.subscribes.store(true, Ordering::SeqCst);

    let (callback, received) = collector::<Page>();
    let _sub = rig.orchestrator.subscribe_messages("+1", callback);
    settle().await;

    assert_eq!(received.lock().len(), 1);
    assert!(matches!(
        received.lock()[0],
        Err(SyncError::Remote(RemoteError::PermissionDenied(_)))
    ));
    assert!(matches!(
        rig.orchestrator.subscription_state("messages:+1"),
        SubscriptionState::Error(_)
    ));

    // Nothing re-attempts on its own
    tokio::time::sleep(Duration::from_secs(600)).await;
    assert_eq!(rig.store.subscribe_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(received.lock().len(), 1);

    // A manual re-subscribe after recovery goes live
    rig.store.faults.subscribes.store(false, Ordering::SeqCst);
    let (callback, recovered) = collector::<Page>();
    let _again = rig.orchestrator.subscribe_messages("+1", callback);
    settle().await;
    assert!(matches!(recovered.lock().last(), Some(Ok(_))));
    assert_eq!(rig.orchestrator.subscription_state("messages:+1"), SubscriptionState::Live);
}

#[tokio::test(start_paused = true)]
async fn chaos_listener_error_moves_live_subscription_to_error() {
    let rig = rig(live_only());
    seed(&rig.memory, "+1", 2);

    let (callback, received) = collector::<Page>();
    let _sub = rig.orchestrator.subscribe_messages("+1", callback);
    settle().await;
    assert_eq!(rig.orchestrator.subscription_state("messages:+1"), SubscriptionState::Live);

    rig.memory
        .fail_listeners("messages", RemoteError::Unavailable("stream reset".into()));

    assert!(matches!(received.lock().last(), Some(Err(SyncError::Remote(_)))));
    assert!(matches!(
        rig.orchestrator.subscription_state("messages:+1"),
        SubscriptionState::Error(_)
    ));
    assert_eq!(rig.store.subscribe_attempts.load(Ordering::SeqCst), 1);
}

#[tokio::test(start_paused = true)]
async fn chaos_poll_failure_stops_loop() {
    let config = SyncConfig {
        origins: vec![OriginConfig::poll(Origin::Sheet, "sheet_orders", Duration::from_secs(10))],
        primary_origin: Origin::Sheet,
        ..SyncConfig::default()
    };
    let rig = rig(config);
    rig.store.faults.queries.store(true, Ordering::SeqCst);

    let (callback, received) = collector::<AggregateView>();
    let _feed = rig.orchestrator.subscribe_feed(callback);
    settle().await;

    assert!(matches!(received.lock().last(), Some(Err(SyncError::Remote(_)))));
    assert!(matches!(
        rig.orchestrator.subscription_state("feed:sheet"),
        SubscriptionState::Error(_)
    ));

    let attempts = rig.store.query_attempts.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_secs(60)).await;
    assert_eq!(rig.store.query_attempts.load(Ordering::SeqCst), attempts);
}

#[tokio::test(start_paused = true)]
async fn chaos_teardown_during_settle_never_subscribes() {
    let rig = rig(live_only());
    seed(&rig.memory, "+1", 1);

    let (callback, received) = collector::<Page>();
    let sub = rig.orchestrator.subscribe_messages("+1", callback);
    tokio::time::sleep(Duration::from_millis(100)).await;
    sub.unsubscribe();
    settle().await;

    assert!(received.lock().is_empty());
    assert_eq!(rig.store.subscribe_attempts.load(Ordering::SeqCst), 0);
    assert_eq!(rig.memory.listener_count(), 0);
}

// =============================================================================
// Write failures
// =============================================================================

#[tokio::test(start_paused = true)]
async fn chaos_delivery_failure_writes_nothing() {
    let rig = rig(live_only());
    rig.transport.down.store(true, Ordering::SeqCst);

    let err = rig.orchestrator.send_message("+1", "hello").await.unwrap_err();
    assert!(matches!(err, SyncError::Delivery(TransportError::Unreachable(_))));
    assert!(err.is_transient());
    assert_eq!(rig.store.write_attempts.load(Ordering::SeqCst), 0);
    assert_eq!(rig.orchestrator.usage().writes, 0);
    assert!(rig.memory.is_empty("messages"));
}

#[tokio::test(start_paused = true)]
async fn chaos_batch_failure_after_delivery_is_not_metered() {
    let rig = rig(live_only());
    rig.store.faults.writes.store(true, Ordering::SeqCst);

    let err = rig.orchestrator.send_message("+1", "hello").await.unwrap_err();
    assert_eq!(err, SyncError::Remote(RemoteError::Timeout));
    assert_eq!(rig.transport.delivered.lock().len(), 1);
    assert_eq!(rig.store.write_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(rig.orchestrator.usage().writes, 0);
    assert!(rig.memory.is_empty("messages"));
    assert!(rig.memory.is_empty("conversations"));
}

#[tokio::test(start_paused = true)]
async fn chaos_store_circuit_opens_and_fails_fast() {
    let circuits = RemoteCircuits {
        store: CircuitBreaker::new(
            "store",
            CircuitConfig {
                error_rate: 0.5,
                window: 4,
                half_open_probes: 1,
                recovery_timeout: Duration::from_secs(3600),
            },
        ),
        transport: CircuitBreaker::new("transport", CircuitConfig::aggressive()),
    };
    let rig = rig_with_circuits(live_only(), circuits);
    rig.store.faults.queries.store(true, Ordering::SeqCst);

    let mut errors = Vec::new();
    for n in 0..8 {
        errors.push(rig.orchestrator.load_more(&format!("+{n}"), None).await.unwrap_err());
    }

    assert!(errors
        .iter()
        .any(|e| matches!(e, SyncError::Remote(RemoteError::CircuitOpen(name)) if name == "store")));
    assert!(rig.store.query_attempts.load(Ordering::SeqCst) < 8);
    assert!(rig.orchestrator.circuits().store.rejections() > 0);
    assert_eq!(rig.orchestrator.usage().reads, 0);
}

#[tokio::test(start_paused = true)]
async fn chaos_concurrent_sends_all_metered() {
    let rig = rig(live_only());
    let orchestrator = Arc::new(rig.orchestrator);

    let mut tasks = Vec::new();
    for n in 0..20 {
        let orchestrator = Arc::clone(&orchestrator);
        tasks.push(tokio::spawn(async move {
            orchestrator
                .send_message(&format!("+{}", n % 4), &format!("reply {n}"))
                .await
        }));
    }
    for task in tasks {
        assert!(task.await.unwrap().is_ok());
    }

    assert_eq!(orchestrator.usage().writes, 40);
    assert_eq!(rig.transport.delivered.lock().len(), 20);
    assert_eq!(rig.memory.len("messages"), 20);
    assert_eq!(orchestrator.conversations().len(), 4);
}

#[tokio::test(start_paused = true)]
async fn chaos_session_cleared_mid_typing() {
    let rig = rig(live_only());
    rig.orchestrator.notify_typing("c1").await.unwrap();
    assert!(rig.orchestrator.is_typing("c1"));

    rig.orchestrator.set_session(None);
    tokio::time::sleep(Duration::from_secs(10)).await;

    // The aborted timer never wrote the clear
    assert_eq!(rig.store.write_attempts.load(Ordering::SeqCst), 1);
    assert_eq!(
        rig.orchestrator.notify_typing("c1").await.unwrap_err(),
        SyncError::Unauthenticated
    );
}
