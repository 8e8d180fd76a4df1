//! Push subscriptions: conversations and messages, plus the guarded
//! listener every read path shares.

use std::sync::Arc;

use parking_lot::Mutex;

use tracing::{debug, warn};

use crate::feed::normalize_document;
use crate::model::{Conversation, Origin};
use crate::remote::{Query, RemoteError, Snapshot, SnapshotListener, SortDirection};
use crate::subscription::{Subscription, SubscriptionCoalescer, SubscriptionTicket};
use crate::usage::UsageKind;

use super::types::{conversations_key, messages_key};
use super::{Callback, ConversationScope, MessageKey, Page, Shared, SyncError, SyncOrchestrator};

/// Turns a snapshot into the value a callback receives, updating caches and
/// local state on the way.
pub(super) type Decoder<T> = Arc<dyn Fn(&Shared, Snapshot) -> T + Send + Sync>;

/// How a listener meters the snapshots it receives.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(super) enum Metering {
    /// Each snapshot is a fresh query.
    Full,
    /// Push updates: after the first snapshot only changed documents are billed.
    Changes,
}

/// Listener that drops late snapshots, meters reads and tears itself down
/// once the read ceiling is crossed.
pub(super) fn guarded_listener<T: Send + 'static>(
    shared: Arc<Shared>,
    coalescer: SubscriptionCoalescer,
    ticket: SubscriptionTicket,
    metering: Metering,
    decode: Decoder<T>,
    callback: Callback<T>,
) -> SnapshotListener {
    let previous: Mutex<Option<Snapshot>> = Mutex::new(None);
    Arc::new(move |event: Result<Snapshot, RemoteError>| {
        if !coalescer.is_current(&ticket) {
            discard(&ticket);
            return;
        }
        match event {
            Ok(snapshot) => {
                let cost = match metering {
                    Metering::Full => snapshot.read_cost(),
                    Metering::Changes => {
                        let mut last = previous.lock();
                        let cost = last
                            .as_ref()
                            .map_or_else(|| snapshot.read_cost(), |prev| snapshot.changed_cost(prev));
                        *last = Some(snapshot.clone());
                        cost
                    }
                };
                shared.account_reads(cost);
                let value = decode(&shared, snapshot);
                // superseded while decoding
                if !coalescer.is_current(&ticket) {
                    discard(&ticket);
                    return;
                }
                coalescer.mark_live(&ticket);
                callback(Ok(value));
                if !shared.usage.under_limit() {
                    warn!(key = %ticket.key(), "Read ceiling crossed, closing subscription for the rest of the window");
                    crate::metrics::record_quota_skip("subscription");
                    coalescer.cancel_if_current(&ticket);
                }
            }
            Err(e) => {
                warn!(key = %ticket.key(), error = %e, "Subscription failed");
                coalescer.mark_error(&ticket, &e);
                callback(Err(SyncError::Remote(e)));
            }
        }
    })
}

fn discard(ticket: &SubscriptionTicket) {
    debug!(
        key = %ticket.key(),
        generation = ticket.generation(),
        "Discarding payload from superseded subscription"
    );
    crate::metrics::record_discarded_snapshot(stream_of(ticket.key()));
}

/// Metrics label for a coalescer key: the part before the first `:`.
fn stream_of(key: &str) -> &str {
    key.split(':').next().unwrap_or(key)
}

impl SyncOrchestrator {
    /// Register a push subscription for `key` through the coalescer.
    ///
    /// After the settle delay the factory checks the read budget, then
    /// subscribes with a guarded listener. Remote failures reach `callback`;
    /// quota skips do not.
    pub(super) fn ensure_push<T: Send + 'static>(
        &self,
        key: &str,
        query: Query,
        decode: Decoder<T>,
        callback: Callback<T>,
    ) -> SubscriptionTicket {
        let shared = Arc::clone(&self.shared);
        let coalescer = self.coalescer.clone();
        let delay = self.shared.config.settle_delay();

        let ticket = self.coalescer.ensure(key, delay, move |ticket| async move {
            if !shared.reads_allowed("subscribe") {
                debug!(key = %ticket.key(), "Read budget spent, subscription not opened");
                return Err(shared.quota_error(UsageKind::Reads));
            }
            let listener = guarded_listener(
                Arc::clone(&shared),
                coalescer.clone(),
                ticket.clone(),
                Metering::Changes,
                decode,
                Arc::clone(&callback),
            );
            let result = {
                let _timer = crate::metrics::LatencyTimer::new("subscribe");
                shared
                    .circuits
                    .store_call(|| shared.remote.subscribe(query, listener))
                    .await
            };
            match result {
                Ok(handle) => {
                    crate::metrics::record_remote_op("subscribe", "success");
                    crate::metrics::set_live_subscriptions(coalescer.live_count() + 1);
                    Ok(handle)
                }
                Err(e) => {
                    crate::metrics::record_remote_op("subscribe", "error");
                    if coalescer.is_current(&ticket) {
                        callback(Err(SyncError::Remote(e.clone())));
                    }
                    Err(SyncError::Remote(e))
                }
            }
        });
        debug!(key = %key, generation = ticket.generation(), "Subscription requested");
        ticket
    }

    /// Live conversation list for `scope`, most recent first.
    ///
    /// Cached data (if any) is delivered immediately; the live subscription
    /// opens after the settle delay.
    #[tracing::instrument(skip(self, scope, callback), fields(scope = %scope))]
    pub fn subscribe_conversations(
        &self,
        scope: ConversationScope,
        callback: Callback<Vec<Conversation>>,
    ) -> Subscription {
        if let Some(cached) = self.shared.conversation_cache.get(&scope) {
            callback(Ok(cached));
        }

        let config = &self.shared.config;
        let mut query = Query::collection(&config.conversations_collection)
            .order_by("lastMessageAt", SortDirection::Desc)
            .limit(config.conversation_limit);
        query = match &scope {
            ConversationScope::All => query,
            ConversationScope::AssignedTo(op) => query.filter_eq("assignedTo", op.as_str()),
            ConversationScope::Status(status) => query.filter_eq("status", status.as_str()),
        };

        let cache_scope = scope.clone();
        let decode: Decoder<Vec<Conversation>> = Arc::new(move |shared: &Shared, snapshot: Snapshot| {
            let conversations: Vec<Conversation> =
                snapshot.documents.iter().map(Conversation::from_document).collect();
            for conversation in &conversations {
                shared
                    .conversations
                    .insert(conversation.id.clone(), conversation.clone());
            }
            shared.conversation_cache.set_default(cache_scope.clone(), conversations.clone());
            conversations
        });

        let ticket = self.ensure_push(&conversations_key(&scope), query, decode, callback);
        Subscription::new(self.coalescer.clone(), vec![ticket])
    }

    /// Newest page of one conversation's messages, newest first.
    #[tracing::instrument(skip(self, callback))]
    pub fn subscribe_messages(&self, conversation_key: &str, callback: Callback<Page>) -> Subscription {
        let first_page = MessageKey::new(conversation_key, None);
        if let Some(cached) = self.shared.message_cache.get(&first_page) {
            callback(Ok(cached));
        }

        let config = &self.shared.config;
        let query = Query::collection(&config.messages_collection)
            .filter_eq("conversationId", conversation_key)
            .order_by("timestamp", SortDirection::Desc)
            .limit(config.page_size);

        let page_size = config.page_size;
        let decode: Decoder<Page> = Arc::new(move |shared: &Shared, snapshot: Snapshot| {
            let page = page_from_snapshot(&snapshot, page_size);
            shared.track_messages(&page.items);
            shared.message_cache.set_default(first_page.clone(), page.clone());
            page
        });

        let ticket = self.ensure_push(&messages_key(conversation_key), query, decode, callback);
        Subscription::new(self.coalescer.clone(), vec![ticket])
    }

    /// Tear down one subscription key regardless of who owns it.
    pub fn unsubscribe_key(&self, key: &str) -> bool {
        let cancelled = self.coalescer.cancel(key);
        crate::metrics::set_live_subscriptions(self.coalescer.live_count());
        cancelled
    }
}

/// Normalize a live-store message snapshot into a page. A full page gets a
/// cursor at its last document.
pub(super) fn page_from_snapshot(snapshot: &Snapshot, page_size: usize) -> Page {
    let items = snapshot
        .documents
        .iter()
        .map(|doc| normalize_document(Origin::LiveStore, doc))
        .collect();
    let next_cursor = if snapshot.len() >= page_size {
        snapshot.documents.last().map(|doc| crate::remote::Cursor {
            position: doc.position("timestamp"),
            id: doc.id.clone(),
        })
    } else {
        None
    };
    Page {
        items,
        next_cursor,
        throttled: false,
    }
}
