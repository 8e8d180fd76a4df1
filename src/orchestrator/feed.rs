//! Aggregated inbox across every enabled origin.
//!
//! Push origins subscribe through the coalescer like any other key. Poll
//! origins (spreadsheets) run an interval loop owned by the same coalescer
//! slot, so cancelling the key stops the loop.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, warn};

use crate::aggregate::AggregateView;
use crate::config::OriginConfig;
use crate::feed::normalize_document;
use crate::model::{Origin, UnifiedMessage};
use crate::remote::{Query, Snapshot};
use crate::subscription::{Subscription, SubscriptionHandle, SubscriptionTicket};
use crate::usage::UsageKind;

use super::subscribe::{guarded_listener, Decoder, Metering};
use super::types::feed_key;
use super::{Callback, FeedKey, Shared, SyncError, SyncOrchestrator};

impl Shared {
    /// Replace one origin's feed and recompute the aggregate.
    fn apply_feed(&self, origin: Origin, messages: Vec<UnifiedMessage>) -> AggregateView {
        let view = {
            let mut feeds = self.feeds.lock();
            feeds.insert(origin, messages);
            self.aggregator.aggregate(&feeds)
        };
        self.track_messages(&view.messages);
        self.feed_cache.set_default(FeedKey::Aggregate, view.clone());
        debug!(
            origin = %origin,
            messages = view.len(),
            duplicates = view.duplicates_dropped,
            truncated = view.truncated,
            "Aggregate recomputed"
        );
        view
    }

    /// Current aggregate without touching the remote store.
    pub(super) fn current_view(&self) -> AggregateView {
        let feeds = self.feeds.lock();
        self.aggregator.aggregate(&feeds)
    }
}

impl SyncOrchestrator {
    /// Unified, deduplicated, newest-first inbox across all enabled origins.
    ///
    /// Every origin's update re-delivers the whole view.
    #[tracing::instrument(skip(self, callback))]
    pub fn subscribe_feed(&self, callback: Callback<AggregateView>) -> Subscription {
        if let Some(cached) = self.shared.feed_cache.get(&FeedKey::Aggregate) {
            callback(Ok(cached));
        }

        let tickets = self
            .shared
            .config
            .origins
            .clone()
            .into_iter()
            .map(|origin_config| {
                let origin = origin_config.origin;
                let decode: Decoder<AggregateView> = Arc::new(move |shared: &Shared, snapshot: Snapshot| {
                    let messages = snapshot
                        .documents
                        .iter()
                        .map(|doc| normalize_document(origin, doc))
                        .collect();
                    shared.apply_feed(origin, messages)
                });
                let query = Query::collection(&origin_config.collection);
                match origin_config.poll_interval() {
                    Some(every) => self.ensure_poll(&origin_config, every, query, decode, Arc::clone(&callback)),
                    None => self.ensure_push(&feed_key(origin), query, decode, Arc::clone(&callback)),
                }
            })
            .collect();

        Subscription::new(self.coalescer.clone(), tickets)
    }

    /// Aggregate of whatever feeds have been received so far.
    #[must_use]
    pub fn feed_view(&self) -> AggregateView {
        self.shared.current_view()
    }

    fn ensure_poll(
        &self,
        origin: &OriginConfig,
        every: Duration,
        query: Query,
        decode: Decoder<AggregateView>,
        callback: Callback<AggregateView>,
    ) -> SubscriptionTicket {
        let shared = Arc::clone(&self.shared);
        let coalescer = self.coalescer.clone();
        let name = origin.origin;

        self.coalescer
            .ensure(&feed_key(name), self.shared.config.settle_delay(), move |ticket| async move {
                if !shared.reads_allowed("poll") {
                    return Err::<SubscriptionHandle, _>(shared.quota_error(UsageKind::Reads));
                }
                let listener = guarded_listener(
                    Arc::clone(&shared),
                    coalescer.clone(),
                    ticket.clone(),
                    Metering::Full,
                    decode,
                    callback,
                );
                let task = tokio::spawn(async move {
                    let mut interval = tokio::time::interval(every);
                    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Skip);
                    loop {
                        interval.tick().await;
                        if !coalescer.is_current(&ticket) {
                            break;
                        }
                        if !shared.reads_allowed("poll") {
                            debug!(origin = %name, "Read budget spent, skipping poll");
                            continue;
                        }
                        let result = {
                            let _timer = crate::metrics::LatencyTimer::new("query");
                            shared.circuits.store_call(|| shared.remote.query(&query)).await
                        };
                        match result {
                            Ok(snapshot) => {
                                crate::metrics::record_remote_op("query", "success");
                                listener(Ok(snapshot));
                            }
                            Err(e) => {
                                crate::metrics::record_remote_op("query", "error");
                                warn!(origin = %name, error = %e, "Poll failed, stopping until re-subscribed");
                                listener(Err(e));
                                break;
                            }
                        }
                    }
                });
                Ok::<_, SyncError>(SubscriptionHandle::from_task(task))
            })
    }
}
