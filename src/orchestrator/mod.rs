// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Sync orchestrator.
//!
//! The [`SyncOrchestrator`] is the facade the UI talks to. It ties together:
//! - the expiring caches (one per query shape)
//! - the usage meter guarding every metered read and write
//! - the subscription coalescer
//! - the feed normalizer and aggregator
//! - circuit breakers in front of the store and the transport
//!
//! # Read path
//!
//! ```text
//! subscribe_*(key) ─→ cached data? ─→ callback
//!        │
//!        └─→ coalescer.ensure(key) ─settle─→ under_limit? ─no─→ skip (quota)
//!                                               │yes
//!                                               ▼
//!                              store.subscribe ─→ snapshot ─→ ticket current? ─no─→ drop
//!                                                                 │yes
//!                                                    account reads, normalize, cache, callback
//! ```
//!
//! # Write path
//!
//! ```text
//! send_message ─→ validate ─→ session ─→ write ceiling ─→ transport ─→ atomic batch
//!              ─→ account writes ─→ invalidate cached pages ─→ local conversation state
//! ```
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inbox_sync::{SyncConfig, SyncOrchestrator, Session};
//! use inbox_sync::remote::memory::{InMemoryCollection, LoopbackTransport};
//!
//! # #[tokio::main]
//! # async fn main() {
//! let store = Arc::new(InMemoryCollection::new());
//! let orchestrator = SyncOrchestrator::new(
//!     SyncConfig::default(),
//!     store,
//!     Arc::new(LoopbackTransport::new()),
//! ).expect("valid config");
//!
//! orchestrator.set_session(Some(Session::new("op-1", "Dee")));
//! let _messages = orchestrator.subscribe_messages("+15550001", Arc::new(|page| {
//!     println!("{:?}", page.map(|p| p.items.len()));
//! }));
//! let sent = orchestrator.send_message("+15550001", "Your order has shipped").await;
//! assert!(sent.is_ok());
//! orchestrator.shutdown();
//! # }
//! ```

mod feed;
mod lifecycle;
mod paging;
mod presence;
mod send;
mod subscribe;
mod types;

pub use types::{
    Callback, ConversationScope, FeedKey, MessageKey, Page, Presence, Session, SyncError,
};

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::aggregate::{AggregateView, Aggregator};
use crate::cache::{CacheStats, ExpiringCache};
use crate::config::SyncConfig;
use crate::model::{Conversation, Origin, UnifiedMessage};
use crate::remote::{OutboundTransport, RemoteCollection};
use crate::resilience::RemoteCircuits;
use crate::subscription::{SubscriptionCoalescer, SubscriptionState};
use crate::usage::{UsageKind, UsageLevel, UsageMeter, UsageStats};

/// Quota-aware sync and aggregation service. One instance per signed-in UI.
///
/// # Thread Safety
///
/// `Send + Sync`. All shared state sits behind `DashMap` or `parking_lot`
/// locks that are never held across an `.await`.
pub struct SyncOrchestrator {
    pub(super) shared: Arc<Shared>,
    pub(super) coalescer: SubscriptionCoalescer,
}

/// State reachable from spawned tasks and snapshot listeners.
pub(super) struct Shared {
    pub(super) config: SyncConfig,
    pub(super) remote: Arc<dyn RemoteCollection>,
    pub(super) transport: Arc<dyn OutboundTransport>,
    pub(super) circuits: RemoteCircuits,
    pub(super) usage: UsageMeter,
    read_level: Mutex<UsageLevel>,
    write_level: Mutex<UsageLevel>,

    pub(super) conversation_cache: ExpiringCache<ConversationScope, Vec<Conversation>>,
    pub(super) message_cache: ExpiringCache<MessageKey, Page>,
    pub(super) presence_cache: ExpiringCache<String, Vec<Presence>>,
    pub(super) feed_cache: ExpiringCache<FeedKey, AggregateView>,

    /// Local conversation state, keyed by conversation key
    pub(super) conversations: DashMap<String, Conversation>,
    /// Latest normalized snapshot per origin
    pub(super) feeds: Mutex<HashMap<Origin, Vec<UnifiedMessage>>>,
    pub(super) aggregator: Aggregator,

    pub(super) session: RwLock<Option<Session>>,
    /// (operator, conversation) -> (generation, idle timer)
    pub(super) typing: DashMap<(String, String), (u64, JoinHandle<()>)>,
    generations: AtomicU64,
}

impl Shared {
    pub(super) fn session(&self) -> Result<Session, SyncError> {
        self.session.read().clone().ok_or(SyncError::Unauthenticated)
    }

    pub(super) fn next_generation(&self) -> u64 {
        self.generations.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Read gate. Counts a quota skip when closed.
    pub(super) fn reads_allowed(&self, operation: &str) -> bool {
        let allowed = self.usage.under_limit();
        if !allowed {
            crate::metrics::record_quota_skip(operation);
        }
        allowed
    }

    /// Write gate as an error for write operations.
    pub(super) fn check_write_budget(&self, operation: &str) -> Result<(), SyncError> {
        if self.usage.writes_under_limit() {
            return Ok(());
        }
        crate::metrics::record_quota_skip(operation);
        let (used, limit) = self.usage.usage_of(UsageKind::Writes);
        Err(SyncError::QuotaExceeded {
            kind: UsageKind::Writes,
            used,
            limit,
        })
    }

    pub(super) fn quota_error(&self, kind: UsageKind) -> SyncError {
        let (used, limit) = self.usage.usage_of(kind);
        SyncError::QuotaExceeded { kind, used, limit }
    }

    pub(super) fn account_reads(&self, n: u64) {
        self.usage.record_reads(n);
        self.observe_level(UsageKind::Reads);
    }

    pub(super) fn account_writes(&self, n: u64) {
        self.usage.record_writes(n);
        self.observe_level(UsageKind::Writes);
    }

    /// Log level transitions once each.
    fn observe_level(&self, kind: UsageKind) {
        let level = self.usage.level(kind);
        let slot = match kind {
            UsageKind::Reads => &self.read_level,
            UsageKind::Writes => &self.write_level,
        };
        let previous = std::mem::replace(&mut *slot.lock(), level);
        if previous == level {
            return;
        }
        crate::metrics::set_usage_level(kind.as_str(), level as u8);
        let (used, limit) = self.usage.usage_of(kind);
        match level {
            UsageLevel::Normal => info!(kind = %kind, used, limit, "Usage back to normal"),
            UsageLevel::Warn => warn!(kind = %kind, used, limit, "Usage approaching daily ceiling"),
            UsageLevel::Exceeded => warn!(
                kind = %kind,
                used,
                limit,
                resets_in_secs = self.usage.resets_in().as_secs(),
                "Daily ceiling exceeded, operations disabled until the window resets"
            ),
        }
    }

    /// Fold a batch into conversation state, oldest first. Each conversation
    /// only counts messages newer than the last one it folded.
    pub(super) fn track_messages<'a>(&self, messages: impl IntoIterator<Item = &'a UnifiedMessage>) {
        let mut batch: Vec<&UnifiedMessage> = messages.into_iter().collect();
        batch.sort_by_cached_key(|m| (m.occurred_at, m.content_fingerprint()));
        for message in batch {
            self.conversations
                .entry(message.conversation_key.clone())
                .or_insert_with(|| Conversation::from_first_message(message))
                .apply_message(message);
        }
    }
}

/// Hit/miss counters of every cache.
#[derive(Debug, Clone, PartialEq)]
pub struct CacheReport {
    pub conversations: CacheStats,
    pub messages: CacheStats,
    pub presence: CacheStats,
    pub feed: CacheStats,
}

impl SyncOrchestrator {
    /// Current usage counters.
    #[must_use]
    pub fn usage(&self) -> UsageStats {
        self.shared.usage.snapshot()
    }

    #[must_use]
    pub fn usage_level(&self, kind: UsageKind) -> UsageLevel {
        self.shared.usage.level(kind)
    }

    #[must_use]
    pub fn config(&self) -> &SyncConfig {
        &self.shared.config
    }

    /// Local state of one conversation.
    #[must_use]
    pub fn conversation(&self, id: &str) -> Option<Conversation> {
        self.shared.conversations.get(id).map(|c| c.clone())
    }

    /// Every known conversation, most recent first.
    #[must_use]
    pub fn conversations(&self) -> Vec<Conversation> {
        let mut all: Vec<Conversation> = self.shared.conversations.iter().map(|c| c.clone()).collect();
        all.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at).then_with(|| a.id.cmp(&b.id)));
        all
    }

    /// Lifecycle state of a subscription key (e.g. `messages:+15550001`).
    #[must_use]
    pub fn subscription_state(&self, key: &str) -> SubscriptionState {
        self.coalescer.state(key)
    }

    #[must_use]
    pub fn live_subscriptions(&self) -> usize {
        self.coalescer.live_count()
    }

    #[must_use]
    pub fn cache_stats(&self) -> CacheReport {
        CacheReport {
            conversations: self.shared.conversation_cache.stats(),
            messages: self.shared.message_cache.stats(),
            presence: self.shared.presence_cache.stats(),
            feed: self.shared.feed_cache.stats(),
        }
    }

    #[must_use]
    pub fn circuits(&self) -> &RemoteCircuits {
        &self.shared.circuits
    }
}
