//! Property-based tests (fuzzing) for the pure parts of inbox-sync.
//!
//! Uses proptest to generate malformed records and arbitrary feeds, and
//! checks the normalizer stays total and the aggregator keeps its ordering,
//! dedup and window guarantees.
//!
//! Run with: `cargo test --test proptest_fuzz`

use std::collections::{HashMap, HashSet};

use proptest::prelude::*;
use serde_json::{Map, Value};

use inbox_sync::feed::{classify, normalize_with_report};
use inbox_sync::remote::{parse_timestamp, Document};
use inbox_sync::{
    normalize, Aggregator, Category, Direction, Origin, RawRecord, SenderRole, UnifiedMessage,
};

// =============================================================================
// Strategies for generating test data
// =============================================================================

/// Field names any origin might send, plus noise.
const FIELD_NAMES: &[&str] = &[
    "conversationId", "phone", "Phone", "Phone Number", "phone_number", "from", "name", "Name",
    "Profile Name", "Customer Name", "product", "Product", "Item", "category", "Category", "Type",
    "type", "message", "Message", "Notes", "Body", "text", "timestamp", "Timestamp", "Date",
    "createdAt", "receivedAt", "sender", "Sender", "role", "direction", "fromMe", "from_me",
    "Message ID", "wamid", "unrelated", "",
];

fn origin_strategy() -> impl Strategy<Value = Origin> {
    prop_oneof![Just(Origin::LiveStore), Just(Origin::Webhook), Just(Origin::Sheet)]
}

/// Arbitrary JSON values, nested a little
fn json_value_strategy() -> impl Strategy<Value = Value> {
    let leaf = prop_oneof![
        Just(Value::Null),
        any::<bool>().prop_map(Value::Bool),
        any::<i64>().prop_map(|n| Value::Number(n.into())),
        any::<f64>().prop_map(|f| serde_json::Number::from_f64(f).map_or(Value::Null, Value::Number)),
        ".*".prop_map(Value::String),
        "[0-9]{4}-[0-9]{2}-[0-9]{2}( [0-9]{2}:[0-9]{2})?".prop_map(Value::String),
    ];
    leaf.prop_recursive(2, 16, 4, |inner| {
        prop_oneof![
            prop::collection::vec(inner.clone(), 0..4).prop_map(Value::Array),
            prop::collection::hash_map("[a-z_]{1,8}", inner, 0..4)
                .prop_map(|m| Value::Object(m.into_iter().collect())),
        ]
    })
}

fn document_strategy() -> impl Strategy<Value = Document> {
    (
        "[ a-zA-Z0-9_-]{0,12}",
        prop::collection::vec((prop::sample::select(FIELD_NAMES), json_value_strategy()), 0..12),
    )
        .prop_map(|(id, fields)| {
            let map: Map<String, Value> = fields.into_iter().map(|(k, v)| (k.to_string(), v)).collect();
            Document::new(id, map)
        })
}

fn message_strategy(origin: Origin) -> impl Strategy<Value = UnifiedMessage> {
    (
        "[a-z0-9]{1,6}",
        prop::sample::select(vec!["+1", "+2", "+3"]),
        prop::sample::select(vec!["hi", "where is my order", "refund please"]),
        prop::sample::select(vec!["Mug", "Teapot"]),
        0i64..20,
    )
        .prop_map(move |(id, counterparty, text, subject, at)| UnifiedMessage {
            id,
            conversation_key: counterparty.to_string(),
            counterparty_id: counterparty.to_string(),
            display_name: "Ada".into(),
            subject: subject.to_string(),
            category: Category::Enquiry,
            free_text: text.to_string(),
            occurred_at: at,
            origin,
            sender_role: SenderRole::Customer,
            direction: Direction::Inbound,
        })
}

fn feeds_strategy() -> impl Strategy<Value = HashMap<Origin, Vec<UnifiedMessage>>> {
    (
        prop::collection::vec(message_strategy(Origin::LiveStore), 0..30),
        prop::collection::vec(message_strategy(Origin::Webhook), 0..30),
        prop::collection::vec(message_strategy(Origin::Sheet), 0..30),
    )
        .prop_map(|(live, webhook, sheet)| {
            HashMap::from([
                (Origin::LiveStore, live),
                (Origin::Webhook, webhook),
                (Origin::Sheet, sheet),
            ])
        })
}

const FALLBACK_FIELDS: &[&str] = &[
    "counterparty_id", "display_name", "subject", "free_text", "category", "occurred_at", "sender_role",
];

// =============================================================================
// Normalizer
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    /// Every record yields a usable message, never a panic.
    #[test]
    fn normalizer_is_total(origin in origin_strategy(), doc in document_strategy()) {
        let report = normalize_with_report(origin, &doc);
        let message = &report.message;

        prop_assert_eq!(message.origin, origin);
        prop_assert!(!message.id.is_empty());
        prop_assert!(!message.counterparty_id.is_empty());
        prop_assert!(!message.conversation_key.is_empty());
        prop_assert!(!message.display_name.is_empty());
        prop_assert!(!message.free_text.is_empty());
        prop_assert!(!message.subject.is_empty());
        prop_assert!(Category::ALL.contains(&message.category));
        prop_assert!(report.fallbacks.iter().all(|f| FALLBACK_FIELDS.contains(f)));
        prop_assert_eq!(report.is_complete(), report.fallbacks.is_empty());
    }

    /// Same record, same message.
    #[test]
    fn normalizer_is_deterministic(origin in origin_strategy(), doc in document_strategy()) {
        let record = RawRecord::new(origin, doc);
        prop_assert_eq!(normalize(&record), normalize(&record));
        prop_assert_eq!(record.origin(), origin);
    }

    #[test]
    fn classify_never_panics(raw in ".*") {
        prop_assert!(Category::ALL.contains(&classify(&raw)));
    }

    /// Case and separator style do not change the category.
    #[test]
    fn classify_ignores_case_and_separators(raw in "[a-zA-Z _-]{0,24}") {
        prop_assert_eq!(classify(&raw.to_uppercase().replace('_', " ")), classify(&raw.to_lowercase()));
    }

    #[test]
    fn parse_timestamp_never_panics(value in json_value_strategy()) {
        let _ = parse_timestamp(&value);
    }
}

// =============================================================================
// Aggregator
// =============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(300))]

    #[test]
    fn aggregate_is_sorted_and_bounded(feeds in feeds_strategy(), window in 1usize..60) {
        let aggregator = Aggregator::new(Origin::ALL.to_vec(), Origin::LiveStore, window);
        let view = aggregator.aggregate(&feeds);

        prop_assert!(view.len() <= window);
        prop_assert!(view.messages.windows(2).all(|w| w[0].occurred_at >= w[1].occurred_at));

        let total: usize = feeds.values().map(Vec::len).sum();
        prop_assert_eq!(view.len() + view.duplicates_dropped + view.truncated, total);
    }

    /// A content key never survives from two different origins, and the
    /// primary's copy always wins.
    #[test]
    fn aggregate_dedups_across_origins(feeds in feeds_strategy()) {
        let aggregator = Aggregator::new(Origin::ALL.to_vec(), Origin::LiveStore, usize::MAX);
        let view = aggregator.aggregate(&feeds);

        let mut owner: HashMap<(String, String, String), Origin> = HashMap::new();
        for message in &view.messages {
            let (a, b, c) = message.content_key();
            let key = (a.to_string(), b.to_string(), c.to_string());
            let first = *owner.entry(key).or_insert(message.origin);
            prop_assert_eq!(first, message.origin);
        }

        let primary_keys: HashSet<_> = feeds[&Origin::LiveStore].iter().map(|m| m.content_key()).collect();
        for message in &view.messages {
            if primary_keys.contains(&message.content_key()) {
                prop_assert_eq!(message.origin, Origin::LiveStore);
            }
        }
        prop_assert_eq!(view.truncated, 0);
    }

    /// Equal timestamps keep declared origin order, then feed order.
    #[test]
    fn aggregate_ties_follow_declared_order(feeds in feeds_strategy()) {
        let aggregator = Aggregator::new(
            vec![Origin::Webhook, Origin::LiveStore, Origin::Sheet],
            Origin::LiveStore,
            usize::MAX,
        );
        let view = aggregator.aggregate(&feeds);
        let rank = |o: Origin| match o {
            Origin::Webhook => 0,
            Origin::LiveStore => 1,
            Origin::Sheet => 2,
        };
        for w in view.messages.windows(2) {
            if w[0].occurred_at == w[1].occurred_at {
                prop_assert!(rank(w[0].origin) <= rank(w[1].origin));
            }
        }
    }
}
