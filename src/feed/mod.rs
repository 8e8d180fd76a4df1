// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Feed Normalizer
//!
//! Turns a raw record from any origin into exactly one [`UnifiedMessage`].
//! Nothing is ever rejected: a field no candidate resolves gets a default,
//! which is reported as a schema fallback (debug log + metric).
//!
//! ```text
//! RawRecord::LiveStore(doc) ─┐
//! RawRecord::Webhook(doc)  ──┼─→ FieldTable[origin] ─→ first present candidate ─→ UnifiedMessage
//! RawRecord::Sheet(doc)    ──┘                        └─→ default (fallback)
//! ```

mod category;
mod normalizer;

pub use category::classify;
pub use normalizer::{normalize_with_report, Normalized};

use tracing::debug;

use crate::model::{Origin, UnifiedMessage};
use crate::remote::Document;

pub const UNKNOWN_CUSTOMER: &str = "Unknown Customer";
pub const NO_CONTENT: &str = "No message content";
pub const UNKNOWN_SUBJECT: &str = "General";
pub const UNKNOWN_COUNTERPARTY: &str = "unknown";

/// A record as it arrived, tagged with its origin.
#[derive(Debug, Clone, PartialEq)]
pub enum RawRecord {
    LiveStore(Document),
    Webhook(Document),
    Sheet(Document),
}

impl RawRecord {
    pub fn new(origin: Origin, document: Document) -> Self {
        match origin {
            Origin::LiveStore => Self::LiveStore(document),
            Origin::Webhook => Self::Webhook(document),
            Origin::Sheet => Self::Sheet(document),
        }
    }

    #[must_use]
    pub fn origin(&self) -> Origin {
        match self {
            Self::LiveStore(_) => Origin::LiveStore,
            Self::Webhook(_) => Origin::Webhook,
            Self::Sheet(_) => Origin::Sheet,
        }
    }

    #[must_use]
    pub fn document(&self) -> &Document {
        match self {
            Self::LiveStore(doc) | Self::Webhook(doc) | Self::Sheet(doc) => doc,
        }
    }
}

/// Normalize one record. Total: every record yields a message.
#[must_use]
pub fn normalize(record: &RawRecord) -> UnifiedMessage {
    normalize_document(record.origin(), record.document())
}

#[must_use]
pub fn normalize_document(origin: Origin, doc: &Document) -> UnifiedMessage {
    let Normalized { message, fallbacks } = normalize_with_report(origin, doc);
    if !fallbacks.is_empty() {
        debug!(
            origin = %origin,
            id = %message.id,
            fields = ?fallbacks,
            "Schema fallback: fields resolved by default"
        );
        for field in &fallbacks {
            crate::metrics::record_schema_fallback(origin.as_str(), field);
        }
    }
    message
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_two_origins_same_content_key() {
        let live = RawRecord::LiveStore(Document::from_json(
            "a",
            json!({"phone": "+1", "name": "Ava", "message": "Hi", "product": "Tee"}),
        ));
        let hook = RawRecord::Webhook(Document::from_json(
            "b",
            json!({"Phone Number": "+1", "Profile Name": "Ava", "Message": "Hi", "product": "Tee"}),
        ));
        let a = normalize(&live);
        let b = normalize(&hook);
        assert_eq!(a.content_key(), b.content_key());
        assert_eq!(a.origin, Origin::LiveStore);
        assert_eq!(b.origin, Origin::Webhook);
    }

    #[test]
    fn test_raw_record_tagging() {
        let record = RawRecord::new(Origin::Sheet, Document::from_json("r1", json!({})));
        assert_eq!(record.origin(), Origin::Sheet);
        assert_eq!(record.document().id, "r1");
        assert_eq!(normalize(&record).display_name, UNKNOWN_CUSTOMER);
    }
}
