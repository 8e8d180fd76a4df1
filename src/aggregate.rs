// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Aggregator
//!
//! Merges the normalized feeds into one bounded, newest-first view.
//!
//! # Flow
//!
//! ```text
//! feeds (per origin, declared order)
//!       │
//!       ▼
//! ┌──────────────────────────────────────────────┐
//! │ Dedup across origins on                      │
//! │ (counterparty_id, free_text, subject)        │
//! │ primary origin's copy wins, else earliest    │
//! │ declared origin's                            │
//! └──────────────────────────────────────────────┘
//!       │
//!       ▼
//! stable sort by occurred_at desc ─→ truncate to window
//! ```
//!
//! Messages with the same content key inside one origin are kept: a
//! customer can legitimately send "hi" twice.

use std::collections::{BTreeMap, HashMap};

use crate::model::{Category, Origin, UnifiedMessage};

/// Output of one aggregation pass.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct AggregateView {
    /// Newest first, at most `window` long
    pub messages: Vec<UnifiedMessage>,
    /// Cross-origin copies removed
    pub duplicates_dropped: usize,
    /// Messages removed by the window
    pub truncated: usize,
}

impl AggregateView {
    /// Per-category counts, recomputed on every call.
    #[must_use]
    pub fn category_counts(&self) -> BTreeMap<Category, usize> {
        let mut counts = BTreeMap::new();
        for message in &self.messages {
            *counts.entry(message.category).or_insert(0) += 1;
        }
        counts
    }

    /// Per-origin counts, recomputed on every call.
    #[must_use]
    pub fn origin_counts(&self) -> BTreeMap<Origin, usize> {
        let mut counts = BTreeMap::new();
        for message in &self.messages {
            *counts.entry(message.origin).or_insert(0) += 1;
        }
        counts
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.messages.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }
}

#[derive(Debug, Clone)]
pub struct Aggregator {
    origins: Vec<Origin>,
    primary: Origin,
    window: usize,
}

impl Aggregator {
    /// `origins` is the declared priority order; origins not listed are ignored.
    pub fn new(origins: Vec<Origin>, primary: Origin, window: usize) -> Self {
        Self { origins, primary, window }
    }

    #[must_use]
    pub fn window(&self) -> usize {
        self.window
    }

    #[must_use]
    pub fn origins(&self) -> &[Origin] {
        &self.origins
    }

    pub fn aggregate(&self, feeds: &HashMap<Origin, Vec<UnifiedMessage>>) -> AggregateView {
        // Primary first so its copies claim content keys before anyone else.
        let mut order: Vec<Origin> = Vec::with_capacity(self.origins.len());
        if self.origins.contains(&self.primary) {
            order.push(self.primary);
        }
        order.extend(self.origins.iter().copied().filter(|o| *o != self.primary));

        let rank = |origin: Origin| self.origins.iter().position(|o| *o == origin).unwrap_or(usize::MAX);

        // content key -> origin that owns it
        let mut owners: HashMap<(&str, &str, &str), Origin> = HashMap::new();
        // (declared rank, position in feed, message)
        let mut kept: Vec<(usize, usize, &UnifiedMessage)> = Vec::new();
        let mut duplicates_dropped = 0;

        for origin in order {
            let Some(feed) = feeds.get(&origin) else { continue };
            for (pos, message) in feed.iter().enumerate() {
                match owners.get(&message.content_key()) {
                    Some(owner) if *owner != origin => {
                        duplicates_dropped += 1;
                        continue;
                    }
                    Some(_) => {}
                    None => {
                        owners.insert(message.content_key(), origin);
                    }
                }
                kept.push((rank(origin), pos, message));
            }
        }

        kept.sort_by_key(|(rank, pos, _)| (*rank, *pos));
        // stable: equal timestamps keep declared insertion order
        kept.sort_by(|a, b| b.2.occurred_at.cmp(&a.2.occurred_at));

        let truncated = kept.len().saturating_sub(self.window);
        kept.truncate(self.window);

        let view = AggregateView {
            messages: kept.into_iter().map(|(_, _, m)| m.clone()).collect(),
            duplicates_dropped,
            truncated,
        };
        crate::metrics::record_aggregate(view.messages.len(), duplicates_dropped);
        view
    }
}
