//! Presence: who is looking at or typing in a conversation.
//!
//! Typing indicators are debounced per (operator, conversation): the first
//! keystroke writes `typing: true`, later keystrokes only push the idle
//! timer back, and the timer writes `typing: false` once it fires. These
//! timers are independent of the subscription coalescer.

use std::sync::Arc;

use serde_json::{json, Value};
use tracing::debug;

use crate::model::now_millis;
use crate::remote::{Query, Snapshot, WriteOp};
use crate::subscription::Subscription;

use super::subscribe::Decoder;
use super::types::presence_key;
use super::{Callback, Presence, Session, Shared, SyncError, SyncOrchestrator};

impl Shared {
    async fn write_presence(&self, session: &Session, conversation_key: &str, typing: bool) -> Result<(), SyncError> {
        self.check_write_budget("presence")?;
        let fields = match json!({
            "operatorId": session.operator_id,
            "operatorName": session.display_name,
            "conversationId": conversation_key,
            "typing": typing,
            "updatedAt": now_millis(),
        }) {
            Value::Object(map) => map,
            _ => Default::default(),
        };
        let op = WriteOp::Merge {
            collection: self.config.presence_collection.clone(),
            id: Presence::document_id(&session.operator_id, conversation_key),
            fields,
        };
        self.commit("presence", vec![op]).await
    }
}

impl SyncOrchestrator {
    /// Operators present in a conversation.
    #[tracing::instrument(skip(self, callback))]
    pub fn subscribe_presence(&self, conversation_key: &str, callback: Callback<Vec<Presence>>) -> Subscription {
        let cache_key = conversation_key.to_string();
        if let Some(cached) = self.shared.presence_cache.get(&cache_key) {
            callback(Ok(cached));
        }

        let query = Query::collection(&self.shared.config.presence_collection)
            .filter_eq("conversationId", conversation_key);
        let decode: Decoder<Vec<Presence>> = Arc::new(move |shared: &Shared, snapshot: Snapshot| {
            let present: Vec<Presence> = snapshot.documents.iter().map(Presence::from_document).collect();
            shared.presence_cache.set_default(cache_key.clone(), present.clone());
            present
        });

        let ticket = self.ensure_push(&presence_key(conversation_key), query, decode, callback);
        Subscription::new(self.coalescer.clone(), vec![ticket])
    }

    /// Signal a keystroke in `conversation_key`.
    #[tracing::instrument(skip(self))]
    pub async fn notify_typing(&self, conversation_key: &str) -> Result<(), SyncError> {
        let session = self.shared.session()?;
        let key = (session.operator_id.clone(), conversation_key.to_string());

        if !self.shared.typing.contains_key(&key) {
            self.shared.write_presence(&session, conversation_key, true).await?;
        }

        let generation = self.shared.next_generation();
        let shared = Arc::clone(&self.shared);
        let idle = self.shared.config.typing_idle();
        let timer_key = key.clone();
        let timer = tokio::spawn(async move {
            tokio::time::sleep(idle).await;
            let expired = shared
                .typing
                .remove_if(&timer_key, |_, (current, _)| *current == generation)
                .is_some();
            if expired {
                if let Err(e) = shared.write_presence(&session, &timer_key.1, false).await {
                    debug!(conversation = %timer_key.1, error = %e, "Could not clear typing indicator");
                }
            }
        });

        if let Some((_, previous)) = self.shared.typing.insert(key, (generation, timer)) {
            previous.abort();
        }
        Ok(())
    }

    /// Clear the typing indicator now. No-op when not typing.
    #[tracing::instrument(skip(self))]
    pub async fn stop_typing(&self, conversation_key: &str) -> Result<(), SyncError> {
        let session = self.shared.session()?;
        let key = (session.operator_id.clone(), conversation_key.to_string());
        match self.shared.typing.remove(&key) {
            Some((_, (_, timer))) => {
                timer.abort();
                self.shared.write_presence(&session, conversation_key, false).await
            }
            None => Ok(()),
        }
    }

    /// Whether the current operator has a live typing indicator here.
    #[must_use]
    pub fn is_typing(&self, conversation_key: &str) -> bool {
        self.session().is_some_and(|s| {
            self.shared
                .typing
                .contains_key(&(s.operator_id, conversation_key.to_string()))
        })
    }
}
