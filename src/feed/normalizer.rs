// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Per-origin field tables and the resolution that turns a raw document into
//! a [`UnifiedMessage`].
//!
//! Each logical field lists its candidate source names in priority order.
//! Modern and legacy casings of the same field both appear, modern first,
//! so a record from either era resolves to the same value.

use crate::model::{Direction, Origin, SenderRole, UnifiedMessage};
use crate::remote::Document;

use super::category::classify;
use super::{NO_CONTENT, UNKNOWN_COUNTERPARTY, UNKNOWN_CUSTOMER, UNKNOWN_SUBJECT};

/// Source names per logical field for one origin.
pub(crate) struct FieldTable {
    /// Empty means the document id is the message id
    id: &'static [&'static str],
    conversation: &'static [&'static str],
    counterparty: &'static [&'static str],
    display_name: &'static [&'static str],
    subject: &'static [&'static str],
    category: &'static [&'static str],
    text: &'static [&'static str],
    timestamp: &'static [&'static str],
    role: &'static [&'static str],
    direction: &'static [&'static str],
    from_me: &'static [&'static str],
}

const LIVE_STORE: FieldTable = FieldTable {
    id: &[],
    conversation: &["conversationId", "conversation_id", "ConversationId"],
    counterparty: &["phone", "Phone", "customerPhone", "from"],
    display_name: &["name", "Name", "customerName", "profileName"],
    subject: &["product", "Product", "subject"],
    category: &["category", "Category", "type", "orderType"],
    text: &["message", "Message", "text", "body"],
    timestamp: &["timestamp", "Timestamp", "createdAt", "created_at"],
    role: &["sender", "Sender", "senderRole", "role"],
    direction: &["direction", "Direction"],
    from_me: &["fromMe"],
};

const WEBHOOK: FieldTable = FieldTable {
    id: &["Message ID", "message_id", "messageId", "wamid"],
    conversation: &[],
    counterparty: &["Phone Number", "phone_number", "phone", "from"],
    display_name: &["Profile Name", "profile_name", "name"],
    subject: &["product", "Product"],
    category: &["Category", "category"],
    text: &["Message", "message", "Body", "text"],
    timestamp: &["Timestamp", "timestamp", "receivedAt"],
    role: &[],
    direction: &["direction"],
    from_me: &["fromMe", "from_me"],
};

const SHEET: FieldTable = FieldTable {
    id: &[],
    conversation: &[],
    counterparty: &["Phone", "phone", "Phone Number", "Mobile"],
    display_name: &["Customer Name", "Name", "name"],
    subject: &["Product", "Item", "product"],
    category: &["Type", "Category", "category"],
    text: &["Notes", "Message", "Details", "message"],
    timestamp: &["Date", "Timestamp", "date", "timestamp"],
    role: &[],
    direction: &[],
    from_me: &[],
};

const OPERATOR_ROLES: &[&str] = &["operator", "agent", "admin", "staff", "business", "bot", "system"];
const CUSTOMER_ROLES: &[&str] = &["customer", "user", "client", "contact"];

pub(crate) fn table_for(origin: Origin) -> &'static FieldTable {
    match origin {
        Origin::LiveStore => &LIVE_STORE,
        Origin::Webhook => &WEBHOOK,
        Origin::Sheet => &SHEET,
    }
}

/// A normalized message and the logical fields that fell back to defaults.
#[derive(Debug, Clone, PartialEq)]
pub struct Normalized {
    pub message: UnifiedMessage,
    pub fallbacks: Vec<&'static str>,
}

impl Normalized {
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.fallbacks.is_empty()
    }
}

/// Resolve every logical field of `doc` through `origin`'s table.
#[must_use]
pub fn normalize_with_report(origin: Origin, doc: &Document) -> Normalized {
    let table = table_for(origin);
    let mut fallbacks = Vec::new();
    let mut or_default = |value: Option<String>, field: &'static str, default: &str| {
        value.unwrap_or_else(|| {
            fallbacks.push(field);
            default.to_string()
        })
    };

    let counterparty_id = or_default(doc.first_str(table.counterparty), "counterparty_id", UNKNOWN_COUNTERPARTY);
    let display_name = or_default(doc.first_str(table.display_name), "display_name", UNKNOWN_CUSTOMER);
    let subject = or_default(doc.first_str(table.subject), "subject", UNKNOWN_SUBJECT);
    let free_text = or_default(doc.first_str(table.text), "free_text", NO_CONTENT);

    let category = match doc.first_str(table.category) {
        Some(raw) => classify(&raw),
        None => {
            fallbacks.push("category");
            Default::default()
        }
    };

    let occurred_at = doc.first_timestamp(table.timestamp).unwrap_or_else(|| {
        fallbacks.push("occurred_at");
        0
    });

    let (sender_role, direction) = match resolve_sender(table, doc) {
        Some(resolved) => resolved,
        None => {
            fallbacks.push("sender_role");
            (SenderRole::Customer, Direction::Inbound)
        }
    };

    let conversation_key = doc
        .first_str(table.conversation)
        .unwrap_or_else(|| counterparty_id.clone());

    let id = doc
        .first_str(table.id)
        .or_else(|| Some(doc.id.trim().to_string()).filter(|id| !id.is_empty()))
        .unwrap_or_else(|| format!("{}:{}:{}", origin, counterparty_id, occurred_at));

    Normalized {
        message: UnifiedMessage {
            id,
            conversation_key,
            counterparty_id,
            display_name,
            subject,
            category,
            free_text,
            occurred_at,
            origin,
            sender_role,
            direction,
        },
        fallbacks,
    }
}

/// Role and direction from whatever the record carries: an explicit role,
/// an explicit direction, or a `fromMe` flag.
fn resolve_sender(table: &FieldTable, doc: &Document) -> Option<(SenderRole, Direction)> {
    let role = doc.first_str(table.role).and_then(|r| parse_role(&r));
    let direction = doc.first_str(table.direction).and_then(|d| parse_direction(&d));
    let from_me = doc.first_bool(table.from_me);

    match (role, direction, from_me) {
        (Some(role), Some(direction), _) => Some((role, direction)),
        (Some(role), None, _) => Some((role, role.implied_direction())),
        (None, Some(Direction::Outbound), _) => Some((SenderRole::Operator, Direction::Outbound)),
        (None, Some(Direction::Inbound), _) => Some((SenderRole::Customer, Direction::Inbound)),
        (None, None, Some(true)) => Some((SenderRole::Operator, Direction::Outbound)),
        (None, None, Some(false)) => Some((SenderRole::Customer, Direction::Inbound)),
        (None, None, None) => None,
    }
}

fn parse_role(raw: &str) -> Option<SenderRole> {
    let role = raw.trim().to_lowercase();
    if OPERATOR_ROLES.contains(&role.as_str()) {
        Some(SenderRole::Operator)
    } else if CUSTOMER_ROLES.contains(&role.as_str()) {
        Some(SenderRole::Customer)
    } else {
        None
    }
}

fn parse_direction(raw: &str) -> Option<Direction> {
    match raw.trim().to_lowercase().as_str() {
        "inbound" | "in" | "incoming" | "received" => Some(Direction::Inbound),
        "outbound" | "out" | "outgoing" | "sent" => Some(Direction::Outbound),
        _ => None,
    }
}
