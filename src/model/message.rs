// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! The canonical message record every feed is normalized into.

use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};

use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};

/// Upstream source a message was read from.
///
/// Declaration order here is only the default; the enabled-origin list in
/// [`crate::SyncConfig`] decides aggregation priority.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Origin {
    /// Push-updated live document store
    LiveStore,
    /// Inbound carrier webhook, persisted as raw payloads
    Webhook,
    /// Spreadsheet rows, polled
    Sheet,
}

impl Origin {
    pub const ALL: [Origin; 3] = [Origin::LiveStore, Origin::Webhook, Origin::Sheet];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::LiveStore => "live_store",
            Self::Webhook => "webhook",
            Self::Sheet => "sheet",
        }
    }
}

impl std::fmt::Display for Origin {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Order-workflow category of a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Category {
    NewOrder,
    #[default]
    Enquiry,
    FollowUp,
    Complaint,
    Return,
}

impl Category {
    pub const ALL: [Category; 5] = [
        Category::NewOrder,
        Category::Enquiry,
        Category::FollowUp,
        Category::Complaint,
        Category::Return,
    ];

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::NewOrder => "new_order",
            Self::Enquiry => "enquiry",
            Self::FollowUp => "follow_up",
            Self::Complaint => "complaint",
            Self::Return => "return",
        }
    }
}

impl std::fmt::Display for Category {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SenderRole {
    Operator,
    Customer,
}

impl SenderRole {
    /// Direction implied by the role when a record carries no explicit direction.
    #[must_use]
    pub fn implied_direction(&self) -> Direction {
        match self {
            Self::Operator => Direction::Outbound,
            Self::Customer => Direction::Inbound,
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Operator => "operator",
            Self::Customer => "customer",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    Inbound,
    Outbound,
}

impl Direction {
    #[must_use]
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Inbound => "inbound",
            Self::Outbound => "outbound",
        }
    }
}

/// One message, whatever feed it came from.
///
/// `id` is unique within an origin only. Identity across origins is the
/// [`content_key`](Self::content_key).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UnifiedMessage {
    pub id: String,
    pub conversation_key: String,
    pub counterparty_id: String,
    pub display_name: String,
    pub subject: String,
    pub category: Category,
    pub free_text: String,
    /// Epoch millis
    pub occurred_at: i64,
    pub origin: Origin,
    pub sender_role: SenderRole,
    pub direction: Direction,
}

/// Cross-origin identity: `(counterparty_id, free_text, subject)`.
pub type ContentKey<'a> = (&'a str, &'a str, &'a str);

impl UnifiedMessage {
    #[must_use]
    pub fn content_key(&self) -> ContentKey<'_> {
        (&self.counterparty_id, &self.free_text, &self.subject)
    }

    /// Hash of the [`content_key`](Self::content_key), stable for the
    /// lifetime of the process.
    #[must_use]
    pub fn content_fingerprint(&self) -> u64 {
        let mut hasher = DefaultHasher::new();
        self.content_key().hash(&mut hasher);
        hasher.finish()
    }

    #[must_use]
    pub fn is_inbound(&self) -> bool {
        self.direction == Direction::Inbound
    }

    /// Fields as written to the live store's message collection.
    pub(crate) fn to_live_fields(&self, delivery_id: &str, operator_id: &str) -> Map<String, Value> {
        let value = json!({
            "conversationId": self.conversation_key,
            "phone": self.counterparty_id,
            "name": self.display_name,
            "product": self.subject,
            "category": self.category.as_str(),
            "message": self.free_text,
            "timestamp": self.occurred_at,
            "sender": self.sender_role.as_str(),
            "direction": self.direction.as_str(),
            "operatorId": operator_id,
            "deliveryId": delivery_id,
        });
        match value {
            Value::Object(map) => map,
            _ => Map::new(),
        }
    }
}

/// Current wall-clock time in epoch millis.
pub(crate) fn now_millis() -> i64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as i64
}
