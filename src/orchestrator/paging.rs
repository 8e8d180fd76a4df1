//! Cursor pagination over a conversation's history.

use tracing::debug;

use crate::remote::{Cursor, Query, SortDirection};

use super::subscribe::page_from_snapshot;
use super::{MessageKey, Page, SyncError, SyncOrchestrator};

impl SyncOrchestrator {
    /// The page of messages older than `cursor` (`None` for the newest).
    ///
    /// Served from cache when possible. With the read budget spent this
    /// returns an empty page flagged `throttled` that keeps the cursor, so
    /// the UI can try again after the window resets.
    #[tracing::instrument(skip(self))]
    pub async fn load_more(&self, conversation_key: &str, cursor: Option<Cursor>) -> Result<Page, SyncError> {
        let shared = &self.shared;
        let key = MessageKey::new(conversation_key, cursor.clone());
        if let Some(cached) = shared.message_cache.get(&key) {
            return Ok(cached);
        }
        if !shared.reads_allowed("load_more") {
            debug!("Read budget spent, returning throttled page");
            return Ok(Page::throttled(cursor));
        }

        let page_size = shared.config.page_size;
        let query = Query::collection(&shared.config.messages_collection)
            .filter_eq("conversationId", conversation_key)
            .order_by("timestamp", SortDirection::Desc)
            .start_after(cursor)
            .limit(page_size);

        let snapshot = {
            let _timer = crate::metrics::LatencyTimer::new("query");
            shared.circuits.store_call(|| shared.remote.query(&query)).await
        }
        .inspect_err(|_| crate::metrics::record_remote_op("query", "error"))?;
        crate::metrics::record_remote_op("query", "success");
        shared.account_reads(snapshot.read_cost());

        let page = page_from_snapshot(&snapshot, page_size);
        shared.track_messages(&page.items);
        shared.message_cache.set_default(key, page.clone());
        debug!(items = page.items.len(), has_more = page.next_cursor.is_some(), "Loaded page");
        Ok(page)
    }
}
