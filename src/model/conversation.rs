// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Conversation state and its transitions.
//!
//! ```text
//! pending ──assign──▶ active
//!    │                  │
//!    └──────close───────┴──▶ closed
//! ```

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

use super::message::{Direction, Origin, UnifiedMessage};
use crate::remote::Document;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConversationStatus {
    #[default]
    Pending,
    Active,
    Closed,
}

impl ConversationStatus {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Active => "active",
            Self::Closed => "closed",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "active" | "open" | "assigned" => Self::Active,
            "closed" | "resolved" | "done" => Self::Closed,
            _ => Self::Pending,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Priority {
    Low,
    #[default]
    Medium,
    High,
}

impl Priority {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Low => "low",
            Self::Medium => "medium",
            Self::High => "high",
        }
    }

    fn parse(raw: &str) -> Self {
        match raw.trim().to_ascii_lowercase().as_str() {
            "low" => Self::Low,
            "high" | "urgent" => Self::High,
            _ => Self::Medium,
        }
    }
}

/// A thread with one counterparty.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Conversation {
    pub id: String,
    pub counterparty_id: String,
    pub counterparty_name: String,
    pub assigned_operator_id: Option<String>,
    pub status: ConversationStatus,
    /// Epoch millis
    pub last_message_at: i64,
    pub unread_count: u32,
    pub priority: Priority,
    pub tags: BTreeSet<String>,
    #[serde(skip)]
    applied_through: Option<AppliedThrough>,
}

/// Newest message folded into a conversation's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct AppliedThrough {
    occurred_at: i64,
    fingerprint: u64,
    origin: Option<Origin>,
}

impl AppliedThrough {
    fn of(message: &UnifiedMessage) -> Self {
        Self {
            occurred_at: message.occurred_at,
            fingerprint: message.content_fingerprint(),
            origin: Some(message.origin),
        }
    }

    /// Strictly after this mark, and not another origin's copy of it.
    fn admits(&self, next: &Self) -> bool {
        let cross_origin_copy = next.fingerprint == self.fingerprint && next.origin != self.origin;
        (next.occurred_at, next.fingerprint) > (self.occurred_at, self.fingerprint) && !cross_origin_copy
    }
}

impl Conversation {
    /// Start a conversation from the first message seen for a counterparty.
    #[must_use]
    pub fn from_first_message(message: &UnifiedMessage) -> Self {
        Self {
            id: message.conversation_key.clone(),
            counterparty_id: message.counterparty_id.clone(),
            counterparty_name: message.display_name.clone(),
            assigned_operator_id: None,
            status: ConversationStatus::Pending,
            last_message_at: message.occurred_at,
            unread_count: 0,
            priority: Priority::default(),
            tags: BTreeSet::new(),
            applied_through: None,
        }
    }

    /// Read a conversation document, tolerating legacy field names.
    #[must_use]
    pub fn from_document(doc: &Document) -> Self {
        let counterparty_id = doc
            .first_str(&["customerPhone", "phone", "Phone", "counterpartyId"])
            .unwrap_or_else(|| doc.id.clone());
        let tags = doc
            .first_present(&["tags", "Tags"])
            .and_then(|(_, v)| v.as_array())
            .map(|items| {
                items
                    .iter()
                    .filter_map(Value::as_str)
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let last_message_at = doc
            .first_timestamp(&["lastMessageAt", "lastMessageTime", "updatedAt"])
            .unwrap_or(0);

        Self {
            id: doc.id.clone(),
            counterparty_name: doc
                .first_str(&["customerName", "name", "Name", "profileName"])
                .unwrap_or_else(|| crate::feed::UNKNOWN_CUSTOMER.to_string()),
            counterparty_id,
            assigned_operator_id: doc.first_str(&["assignedTo", "assignedOperatorId", "agentId"]),
            status: doc
                .first_str(&["status", "Status"])
                .map(|s| ConversationStatus::parse(&s))
                .unwrap_or_default(),
            last_message_at,
            unread_count: doc
                .first_u64(&["unreadCount", "unread"])
                .map(|n| n.min(u32::MAX as u64) as u32)
                .unwrap_or(0),
            priority: doc
                .first_str(&["priority", "Priority"])
                .map(|s| Priority::parse(&s))
                .unwrap_or_default(),
            tags,
            // the stored counters already cover everything up to lastMessageAt
            applied_through: Some(AppliedThrough {
                occurred_at: last_message_at,
                fingerprint: u64::MAX,
                origin: None,
            }),
        }
    }

    /// Fold a message into the conversation counters.
    ///
    /// Inbound increments `unread_count`; outbound resets it to zero. Only
    /// messages newer than the last one folded count, so replays, older
    /// history and another origin's copy of the newest message leave the
    /// counters alone. Returns whether the message was counted.
    pub fn apply_message(&mut self, message: &UnifiedMessage) -> bool {
        let position = AppliedThrough::of(message);
        if self.applied_through.is_some_and(|through| !through.admits(&position)) {
            return false;
        }
        self.applied_through = Some(position);
        self.last_message_at = self.last_message_at.max(message.occurred_at);
        match message.direction {
            Direction::Inbound => self.unread_count = self.unread_count.saturating_add(1),
            Direction::Outbound => self.unread_count = 0,
        }
        true
    }

    /// A reply sent from this session. Clears the unread count even when
    /// the local clock trails the newest folded message.
    pub fn record_reply(&mut self, message: &UnifiedMessage) {
        if !self.apply_message(message) {
            self.unread_count = 0;
        }
    }

    /// Assign to an operator. `pending` becomes `active`; a closed
    /// conversation keeps its status.
    pub fn assign(&mut self, operator_id: &str) {
        self.assigned_operator_id = Some(operator_id.to_string());
        if self.status == ConversationStatus::Pending {
            self.status = ConversationStatus::Active;
        }
    }

    pub fn close(&mut self) {
        self.status = ConversationStatus::Closed;
    }

    /// Fields that assignment / close write back.
    pub(crate) fn status_fields(&self) -> Map<String, Value> {
        let value = json!({
            "status": self.status.as_str(),
            "assignedTo": self.assigned_operator_id,
        });
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{Category, Origin, SenderRole};

    fn message(direction: Direction, at: i64) -> UnifiedMessage {
        UnifiedMessage {
            id: format!("m-{at}"),
            conversation_key: "+44".into(),
            counterparty_id: "+44".into(),
            display_name: "Ava".into(),
            subject: "Tee".into(),
            category: Category::NewOrder,
            free_text: "hello".into(),
            occurred_at: at,
            origin: Origin::LiveStore,
            sender_role: match direction {
                Direction::Inbound => SenderRole::Customer,
                Direction::Outbound => SenderRole::Operator,
            },
            direction,
        }
    }

    #[test]
    fn test_inbound_increments_outbound_resets() {
        let first = message(Direction::Inbound, 10);
        let mut conv = Conversation::from_first_message(&first);
        conv.apply_message(&first);
        conv.apply_message(&message(Direction::Inbound, 20));
        assert_eq!(conv.unread_count, 2);
        assert_eq!(conv.last_message_at, 20);

        conv.apply_message(&message(Direction::Outbound, 30));
        assert_eq!(conv.unread_count, 0);
        assert_eq!(conv.last_message_at, 30);
    }

    #[test]
    fn test_older_message_leaves_counters_alone() {
        let newest = message(Direction::Inbound, 50);
        let mut conv = Conversation::from_first_message(&newest);
        assert!(conv.apply_message(&newest));
        assert!(!conv.apply_message(&message(Direction::Inbound, 10)));
        assert!(!conv.apply_message(&message(Direction::Outbound, 20)));
        assert_eq!(conv.last_message_at, 50);
        assert_eq!(conv.unread_count, 1);
    }

    #[test]
    fn test_reply_clears_unread_despite_clock_skew() {
        let newest = message(Direction::Inbound, 50);
        let mut conv = Conversation::from_first_message(&newest);
        conv.apply_message(&newest);
        conv.record_reply(&message(Direction::Outbound, 40));
        assert_eq!(conv.unread_count, 0);
        assert_eq!(conv.last_message_at, 50);
    }

    #[test]
    fn test_replay_is_not_counted_twice() {
        let first = message(Direction::Inbound, 10);
        let mut conv = Conversation::from_first_message(&first);
        conv.apply_message(&first);
        assert!(!conv.apply_message(&first));
        assert_eq!(conv.unread_count, 1);
    }

    #[test]
    fn test_other_origin_copy_is_not_counted() {
        let live = message(Direction::Inbound, 10);
        let mut conv = Conversation::from_first_message(&live);
        conv.apply_message(&live);

        let webhook = UnifiedMessage {
            id: "wamid.1".into(),
            origin: Origin::Webhook,
            occurred_at: 12,
            ..live.clone()
        };
        assert!(!conv.apply_message(&webhook));
        assert_eq!(conv.unread_count, 1);

        // same text again from the same origin is a new message
        let repeat = UnifiedMessage {
            id: "m-again".into(),
            occurred_at: 15,
            ..live
        };
        assert!(conv.apply_message(&repeat));
        assert_eq!(conv.unread_count, 2);
    }

    #[test]
    fn test_document_counters_cover_messages_up_to_last_message_at() {
        let at = 1_700_000_000_000_i64;
        let doc = Document::from_json("+44", json!({ "phone": "+44", "unreadCount": 2, "lastMessageAt": at }));
        let mut conv = Conversation::from_document(&doc);
        assert!(!conv.apply_message(&message(Direction::Inbound, at)));
        assert!(conv.apply_message(&message(Direction::Inbound, at + 1)));
        assert_eq!(conv.unread_count, 3);
    }

    #[test]
    fn test_status_transitions() {
        let mut conv = Conversation::from_first_message(&message(Direction::Inbound, 1));
        assert_eq!(conv.status, ConversationStatus::Pending);

        conv.assign("op-1");
        assert_eq!(conv.status, ConversationStatus::Active);
        assert_eq!(conv.assigned_operator_id.as_deref(), Some("op-1"));

        conv.close();
        assert_eq!(conv.status, ConversationStatus::Closed);

        conv.assign("op-2");
        assert_eq!(conv.status, ConversationStatus::Closed);
    }

    #[test]
    fn test_from_document_reads_legacy_names() {
        let doc = Document::from_json(
            "c1",
            json!({
                "phone": "+1",
                "Name": "Bo",
                "status": "Active",
                "unread": 3,
                "priority": "urgent",
                "lastMessageTime": 1_700_000_000_000_i64,
                "tags": ["vip", "wholesale"],
            }),
        );
        let conv = Conversation::from_document(&doc);
        assert_eq!(conv.counterparty_id, "+1");
        assert_eq!(conv.counterparty_name, "Bo");
        assert_eq!(conv.status, ConversationStatus::Active);
        assert_eq!(conv.unread_count, 3);
        assert_eq!(conv.priority, Priority::High);
        assert_eq!(conv.last_message_at, 1_700_000_000_000);
        assert!(conv.tags.contains("vip"));
    }

    #[test]
    fn test_from_document_defaults() {
        let conv = Conversation::from_document(&Document::from_json("c2", json!({})));
        assert_eq!(conv.counterparty_id, "c2");
        assert_eq!(conv.counterparty_name, "Unknown Customer");
        assert_eq!(conv.status, ConversationStatus::Pending);
        assert_eq!(conv.priority, Priority::Medium);
    }
}
