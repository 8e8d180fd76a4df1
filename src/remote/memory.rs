use std::collections::{BTreeMap, HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use parking_lot::{Mutex, RwLock};
use serde_json::Value;

use super::document::{Document, Fields};
use super::query::{Query, Snapshot, WriteOp};
use super::traits::{
    DeliveryReceipt, OutboundTransport, RemoteCollection, RemoteError, SnapshotListener,
    TransportError,
};
use crate::subscription::SubscriptionHandle;

struct Listener {
    id: u64,
    query: Query,
    callback: SnapshotListener,
}

type Collections = HashMap<String, BTreeMap<String, Fields>>;

/// Process-local remote store with push listeners.
///
/// Listeners are re-run after every committed batch that touches their
/// collection. Batches are validated in full before anything is applied.
pub struct InMemoryCollection {
    data: RwLock<Collections>,
    listeners: Arc<Mutex<Vec<Listener>>>,
    next_listener: AtomicU64,
    queries: AtomicU64,
    subscribes: AtomicU64,
    batches: AtomicU64,
}

impl InMemoryCollection {
    #[must_use]
    pub fn new() -> Self {
        Self {
            data: RwLock::new(HashMap::new()),
            listeners: Arc::new(Mutex::new(Vec::new())),
            next_listener: AtomicU64::new(0),
            queries: AtomicU64::new(0),
            subscribes: AtomicU64::new(0),
            batches: AtomicU64::new(0),
        }
    }

    /// Insert or replace one document and notify listeners, as an external
    /// writer (webhook ingester, another device) would.
    pub fn insert(&self, collection: &str, id: &str, value: Value) {
        let doc = Document::from_json(id, value);
        self.data
            .write()
            .entry(collection.to_string())
            .or_default()
            .insert(doc.id, doc.fields);
        self.notify(&HashSet::from([collection.to_string()]));
    }

    /// Push an error to every listener on `collection`.
    pub fn fail_listeners(&self, collection: &str, error: RemoteError) {
        for (_, callback) in self.callbacks_for(&HashSet::from([collection.to_string()])) {
            callback(Err(error.clone()));
        }
    }

    #[must_use]
    pub fn document(&self, collection: &str, id: &str) -> Option<Document> {
        self.data
            .read()
            .get(collection)
            .and_then(|docs| docs.get(id))
            .map(|fields| Document::new(id, fields.clone()))
    }

    #[must_use]
    pub fn len(&self, collection: &str) -> usize {
        self.data.read().get(collection).map_or(0, BTreeMap::len)
    }

    #[must_use]
    pub fn is_empty(&self, collection: &str) -> bool {
        self.len(collection) == 0
    }

    #[must_use]
    pub fn listener_count(&self) -> usize {
        self.listeners.lock().len()
    }

    #[must_use]
    pub fn query_count(&self) -> u64 {
        self.queries.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn subscribe_count(&self) -> u64 {
        self.subscribes.load(Ordering::Relaxed)
    }

    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.batches.load(Ordering::Relaxed)
    }

    fn run(&self, query: &Query) -> Snapshot {
        let data = self.data.read();
        let mut documents: Vec<Document> = data
            .get(&query.collection)
            .map(|docs| {
                docs.iter()
                    .map(|(id, fields)| Document::new(id.clone(), fields.clone()))
                    .filter(|doc| query.matches(doc))
                    .collect()
            })
            .unwrap_or_default();
        drop(data);

        documents.sort_by(|a, b| query.compare(a, b));
        if let Some(cursor) = &query.start_after {
            documents.retain(|doc| query.is_after_cursor(doc, cursor));
        }
        if let Some(limit) = query.limit {
            documents.truncate(limit);
        }
        Snapshot::new(documents)
    }

    fn callbacks_for(&self, touched: &HashSet<String>) -> Vec<(Query, SnapshotListener)> {
        self.listeners
            .lock()
            .iter()
            .filter(|l| touched.contains(&l.query.collection))
            .map(|l| (l.query.clone(), Arc::clone(&l.callback)))
            .collect()
    }

    fn notify(&self, touched: &HashSet<String>) {
        // Listeners run outside every lock so they may cancel themselves.
        for (query, callback) in self.callbacks_for(touched) {
            callback(Ok(self.run(&query)));
        }
    }
}

impl Default for InMemoryCollection {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RemoteCollection for InMemoryCollection {
    async fn query(&self, query: &Query) -> Result<Snapshot, RemoteError> {
        self.queries.fetch_add(1, Ordering::Relaxed);
        Ok(self.run(query))
    }

    async fn subscribe(
        &self,
        query: Query,
        listener: SnapshotListener,
    ) -> Result<SubscriptionHandle, RemoteError> {
        self.subscribes.fetch_add(1, Ordering::Relaxed);
        let id = self.next_listener.fetch_add(1, Ordering::Relaxed);
        let initial = self.run(&query);
        self.listeners.lock().push(Listener {
            id,
            query,
            callback: Arc::clone(&listener),
        });
        listener(Ok(initial));

        let listeners = Arc::clone(&self.listeners);
        Ok(SubscriptionHandle::new(move || {
            listeners.lock().retain(|l| l.id != id);
        }))
    }

    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError> {
        if let Some(bad) = ops.iter().find(|op| op.id().is_empty() || op.collection().is_empty()) {
            return Err(RemoteError::InvalidArgument(format!(
                "write op without collection or id: {:?}",
                bad
            )));
        }
        self.batches.fetch_add(1, Ordering::Relaxed);

        let mut touched = HashSet::new();
        {
            let mut data = self.data.write();
            for op in ops {
                touched.insert(op.collection().to_string());
                match op {
                    WriteOp::Set { collection, id, fields } => {
                        data.entry(collection).or_default().insert(id, fields);
                    }
                    WriteOp::Merge { collection, id, fields } => {
                        data.entry(collection)
                            .or_default()
                            .entry(id)
                            .or_default()
                            .extend(fields);
                    }
                    WriteOp::Delete { collection, id } => {
                        if let Some(docs) = data.get_mut(&collection) {
                            docs.remove(&id);
                        }
                    }
                }
            }
        }
        self.notify(&touched);
        Ok(())
    }
}

/// Transport that accepts every message and remembers it.
#[derive(Default)]
pub struct LoopbackTransport {
    sent: Mutex<Vec<(String, String)>>,
}

impl LoopbackTransport {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// `(recipient, text)` pairs in send order.
    #[must_use]
    pub fn sent(&self) -> Vec<(String, String)> {
        self.sent.lock().clone()
    }
}

#[async_trait]
impl OutboundTransport for LoopbackTransport {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<DeliveryReceipt, TransportError> {
        let mut sent = self.sent.lock();
        sent.push((recipient_id.to_string(), text.to_string()));
        Ok(DeliveryReceipt {
            delivery_id: format!("loopback-{}", sent.len()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::SortDirection;
    use serde_json::json;

    fn message_fields(conv: &str, ts: i64) -> Fields {
        match json!({"conversationId": conv, "timestamp": ts}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_query_filters_orders_and_limits() {
        let store = InMemoryCollection::new();
        for i in 0..5 {
            store.insert("messages", &format!("m{i}"), json!({"conversationId": "c1", "timestamp": 1_000 + i}));
        }
        store.insert("messages", "other", json!({"conversationId": "c2", "timestamp": 9_999}));

        let q = Query::collection("messages")
            .filter_eq("conversationId", "c1")
            .order_by("timestamp", SortDirection::Desc)
            .limit(3);
        let snap = store.query(&q).await.unwrap();
        let ids: Vec<_> = snap.documents.iter().map(|d| d.id.as_str()).collect();
        assert_eq!(ids, vec!["m4", "m3", "m2"]);
        assert_eq!(store.query_count(), 1);
    }

    #[tokio::test]
    async fn test_subscribe_delivers_initial_and_updates() {
        let store = InMemoryCollection::new();
        let seen = Arc::new(Mutex::new(Vec::new()));
        let seen_clone = Arc::clone(&seen);
        let listener: SnapshotListener = Arc::new(move |event| {
            seen_clone.lock().push(event.map(|s| s.len()).unwrap_or(usize::MAX));
        });

        let handle = store
            .subscribe(Query::collection("messages"), listener)
            .await
            .unwrap();
        store.insert("messages", "a", json!({"timestamp": 1}));
        store.insert("unrelated", "x", json!({}));

        assert_eq!(*seen.lock(), vec![0, 1]);

        handle.cancel();
        handle.cancel();
        store.insert("messages", "b", json!({"timestamp": 2}));
        assert_eq!(*seen.lock(), vec![0, 1]);
        assert_eq!(store.listener_count(), 0);
    }

    #[tokio::test]
    async fn test_batch_is_all_or_nothing() {
        let store = InMemoryCollection::new();
        let ops = vec![
            WriteOp::Set {
                collection: "messages".into(),
                id: "m1".into(),
                fields: message_fields("c1", 1),
            },
            WriteOp::Set {
                collection: "messages".into(),
                id: String::new(),
                fields: message_fields("c1", 2),
            },
        ];
        assert!(matches!(
            store.batch_write(ops).await,
            Err(RemoteError::InvalidArgument(_))
        ));
        assert!(store.is_empty("messages"));
    }

    #[tokio::test]
    async fn test_merge_keeps_other_fields() {
        let store = InMemoryCollection::new();
        store.insert("conversations", "c1", json!({"customerName": "Ava", "unreadCount": 4}));
        let fields = match json!({"unreadCount": 0}) {
            Value::Object(map) => map,
            _ => unreachable!(),
        };
        store
            .batch_write(vec![WriteOp::Merge {
                collection: "conversations".into(),
                id: "c1".into(),
                fields,
            }])
            .await
            .unwrap();

        let doc = store.document("conversations", "c1").unwrap();
        assert_eq!(doc.fields["customerName"], "Ava");
        assert_eq!(doc.fields["unreadCount"], 0);
    }

    #[tokio::test]
    async fn test_loopback_transport_records() {
        let transport = LoopbackTransport::new();
        let receipt = transport.send("+1", "hi").await.unwrap();
        assert_eq!(receipt.delivery_id, "loopback-1");
        assert_eq!(transport.sent(), vec![("+1".to_string(), "hi".to_string())]);
    }
}
