//! Write operations: sending, assignment and closing.

use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::feed::{UNKNOWN_CUSTOMER, UNKNOWN_SUBJECT};
use crate::model::{now_millis, Category, Conversation, Direction, Origin, SenderRole, UnifiedMessage};
use crate::remote::{Query, WriteOp, DOCUMENT_ID};

use super::{Session, Shared, SyncError, SyncOrchestrator};

/// Longest text the carrier accepts in one message.
pub const MAX_MESSAGE_CHARS: usize = 4096;

impl Shared {
    /// Local conversation, else one remote lookup when the read budget allows.
    async fn resolve_conversation(&self, id: &str) -> Result<Option<Conversation>, SyncError> {
        if let Some(local) = self.conversations.get(id) {
            return Ok(Some(local.clone()));
        }
        if !self.reads_allowed("resolve_conversation") {
            return Ok(None);
        }
        let query = Query::collection(&self.config.conversations_collection)
            .filter_eq(DOCUMENT_ID, id)
            .limit(1);
        let snapshot = {
            let _timer = crate::metrics::LatencyTimer::new("query");
            self.circuits.store_call(|| self.remote.query(&query)).await
        }
        .inspect_err(|_| crate::metrics::record_remote_op("query", "error"))?;
        crate::metrics::record_remote_op("query", "success");
        self.account_reads(snapshot.read_cost());

        let found = snapshot.documents.first().map(Conversation::from_document);
        if let Some(conversation) = &found {
            self.conversations.insert(conversation.id.clone(), conversation.clone());
        }
        Ok(found)
    }

    pub(super) async fn commit(&self, operation: &str, ops: Vec<WriteOp>) -> Result<(), SyncError> {
        let writes = ops.len() as u64;
        let result = {
            let _timer = crate::metrics::LatencyTimer::new("batch_write");
            self.circuits.store_call(|| self.remote.batch_write(ops)).await
        };
        match result {
            Ok(()) => {
                crate::metrics::record_remote_op("batch_write", "success");
                self.account_writes(writes);
                Ok(())
            }
            Err(e) => {
                crate::metrics::record_remote_op("batch_write", "error");
                warn!(operation, error = %e, "Batch write failed");
                Err(e.into())
            }
        }
    }

    async fn update_status(
        &self,
        operation: &str,
        conversation_id: &str,
        change: impl FnOnce(&mut Conversation),
    ) -> Result<Conversation, SyncError> {
        self.session()?;
        self.check_write_budget(operation)?;
        let mut conversation = self
            .resolve_conversation(conversation_id)
            .await?
            .ok_or_else(|| SyncError::ConversationNotFound(conversation_id.to_string()))?;
        change(&mut conversation);

        self.commit(
            operation,
            vec![WriteOp::Merge {
                collection: self.config.conversations_collection.clone(),
                id: conversation.id.clone(),
                fields: conversation.status_fields(),
            }],
        )
        .await?;

        self.conversations.insert(conversation.id.clone(), conversation.clone());
        self.conversation_cache.clear();
        Ok(conversation)
    }
}

impl SyncOrchestrator {
    /// Deliver `text` to the conversation's counterparty and record it.
    ///
    /// Order: validate, session, write ceiling, carrier delivery, one atomic
    /// batch (message + conversation), account writes, invalidate cached
    /// pages, update local state. Reads over their ceiling do not block this.
    #[tracing::instrument(skip(self, text), fields(len = text.len()))]
    pub async fn send_message(&self, conversation_key: &str, text: &str) -> Result<UnifiedMessage, SyncError> {
        let shared = &self.shared;
        let text = validate_text(text)?;
        let session = shared.session()?;
        shared.check_write_budget("send_message")?;

        let conversation = shared.resolve_conversation(conversation_key).await?;
        let recipient = conversation
            .as_ref()
            .map(|c| c.counterparty_id.clone())
            .unwrap_or_else(|| conversation_key.to_string());

        let receipt = shared
            .circuits
            .transport_call(|| shared.transport.send(&recipient, &text))
            .await
            .inspect_err(|e| {
                crate::metrics::record_message_sent("failed");
                warn!(recipient = %recipient, error = %e, "Delivery failed");
            })?;

        let message = outbound_message(conversation_key, &recipient, conversation.as_ref(), text);

        let ops = vec![
            WriteOp::Set {
                collection: shared.config.messages_collection.clone(),
                id: message.id.clone(),
                fields: message.to_live_fields(&receipt.delivery_id, &session.operator_id),
            },
            WriteOp::Merge {
                collection: shared.config.conversations_collection.clone(),
                id: conversation_key.to_string(),
                fields: conversation_update(&message, &session),
            },
        ];
        if let Err(e) = shared.commit("send_message", ops).await {
            // delivered but not recorded
            crate::metrics::record_message_sent("unrecorded");
            return Err(e);
        }

        let dropped = shared
            .message_cache
            .invalidate_where(|key| key.conversation == conversation_key);
        shared.conversation_cache.clear();
        debug!(pages = dropped, "Invalidated cached message pages");

        shared
            .conversations
            .entry(conversation_key.to_string())
            .or_insert_with(|| Conversation::from_first_message(&message))
            .record_reply(&message);

        crate::metrics::record_message_sent("success");
        info!(delivery_id = %receipt.delivery_id, message_id = %message.id, "Message sent");
        Ok(message)
    }

    /// Assign a conversation to an operator; `pending` becomes `active`.
    #[tracing::instrument(skip(self))]
    pub async fn assign_conversation(&self, conversation_id: &str, operator_id: &str) -> Result<Conversation, SyncError> {
        if operator_id.trim().is_empty() {
            return Err(SyncError::Validation("operator id is empty".into()));
        }
        self.shared
            .update_status("assign_conversation", conversation_id, |c| c.assign(operator_id))
            .await
    }

    #[tracing::instrument(skip(self))]
    pub async fn close_conversation(&self, conversation_id: &str) -> Result<Conversation, SyncError> {
        self.shared
            .update_status("close_conversation", conversation_id, Conversation::close)
            .await
    }
}

fn validate_text(text: &str) -> Result<String, SyncError> {
    let trimmed = text.trim();
    if trimmed.is_empty() {
        return Err(SyncError::Validation("message text is empty".into()));
    }
    if trimmed.chars().count() > MAX_MESSAGE_CHARS {
        return Err(SyncError::Validation(format!(
            "message text exceeds {} characters",
            MAX_MESSAGE_CHARS
        )));
    }
    Ok(trimmed.to_string())
}

fn outbound_message(
    conversation_key: &str,
    recipient: &str,
    conversation: Option<&Conversation>,
    text: String,
) -> UnifiedMessage {
    UnifiedMessage {
        id: Uuid::new_v4().to_string(),
        conversation_key: conversation_key.to_string(),
        counterparty_id: recipient.to_string(),
        display_name: conversation
            .map(|c| c.counterparty_name.clone())
            .unwrap_or_else(|| UNKNOWN_CUSTOMER.to_string()),
        subject: UNKNOWN_SUBJECT.to_string(),
        category: Category::default(),
        free_text: text,
        occurred_at: now_millis(),
        origin: Origin::LiveStore,
        sender_role: SenderRole::Operator,
        direction: Direction::Outbound,
    }
}

fn conversation_update(message: &UnifiedMessage, session: &Session) -> Map<String, Value> {
    let value = json!({
        "lastMessageAt": message.occurred_at,
        "unreadCount": 0,
        "lastMessage": message.free_text,
        "lastSender": session.operator_id,
    });
    match value {
        Value::Object(map) => map,
        _ => Map::new(),
    }
}
