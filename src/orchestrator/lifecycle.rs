//! Construction, session and teardown.

use std::collections::HashMap;
use std::sync::atomic::AtomicU64;
use std::sync::Arc;

use dashmap::DashMap;
use parking_lot::{Mutex, RwLock};
use tracing::{debug, info};

use crate::aggregate::Aggregator;
use crate::cache::ExpiringCache;
use crate::config::{ConfigError, SyncConfig};
use crate::remote::{OutboundTransport, RemoteCollection};
use crate::resilience::RemoteCircuits;
use crate::subscription::SubscriptionCoalescer;
use crate::usage::{UsageLevel, UsageMeter};

use super::{Session, Shared, SyncOrchestrator};

impl SyncOrchestrator {
    /// Build an orchestrator with default circuit breakers.
    pub fn new(
        config: SyncConfig,
        remote: Arc<dyn RemoteCollection>,
        transport: Arc<dyn OutboundTransport>,
    ) -> Result<Self, ConfigError> {
        Self::with_circuits(config, remote, transport, RemoteCircuits::new())
    }

    pub fn with_circuits(
        config: SyncConfig,
        remote: Arc<dyn RemoteCollection>,
        transport: Arc<dyn OutboundTransport>,
        circuits: RemoteCircuits,
    ) -> Result<Self, ConfigError> {
        config.validate()?;

        let aggregator = Aggregator::new(config.origin_order(), config.primary_origin, config.aggregate_window);
        let shared = Shared {
            remote,
            transport,
            circuits,
            usage: UsageMeter::new(config.usage_limits()),
            read_level: Mutex::new(UsageLevel::Normal),
            write_level: Mutex::new(UsageLevel::Normal),
            conversation_cache: ExpiringCache::new("conversations", config.conversations_ttl()),
            message_cache: ExpiringCache::new("messages", config.messages_ttl()),
            presence_cache: ExpiringCache::new("presence", config.presence_ttl()),
            feed_cache: ExpiringCache::new("feed", config.feed_ttl()),
            conversations: DashMap::new(),
            feeds: Mutex::new(HashMap::new()),
            aggregator,
            session: RwLock::new(None),
            typing: DashMap::new(),
            generations: AtomicU64::new(0),
            config,
        };

        info!(
            origins = ?shared.config.origin_order(),
            primary = %shared.config.primary_origin,
            daily_reads = shared.config.daily_read_limit,
            daily_writes = shared.config.daily_write_limit,
            "Sync orchestrator created"
        );

        Ok(Self {
            shared: Arc::new(shared),
            coalescer: SubscriptionCoalescer::new(),
        })
    }

    /// Install or clear the authenticated operator.
    pub fn set_session(&self, session: Option<Session>) {
        match &session {
            Some(s) => info!(operator = %s.operator_id, "Session started"),
            None => {
                info!("Session cleared");
                self.abort_typing_timers();
            }
        }
        *self.shared.session.write() = session;
    }

    #[must_use]
    pub fn session(&self) -> Option<Session> {
        self.shared.session.read().clone()
    }

    /// Tear down every subscription, poll loop and typing timer.
    ///
    /// Idempotent. Caches are kept so a re-subscribe can serve them.
    pub fn shutdown(&self) {
        let cancelled = self.coalescer.cancel_all();
        let timers = self.abort_typing_timers();
        crate::metrics::set_live_subscriptions(0);
        info!(subscriptions = cancelled, typing_timers = timers, "Sync orchestrator shut down");
    }

    fn abort_typing_timers(&self) -> usize {
        let keys: Vec<(String, String)> = self.shared.typing.iter().map(|e| e.key().clone()).collect();
        let mut aborted = 0;
        for key in keys {
            if let Some((_, (_, timer))) = self.shared.typing.remove(&key) {
                timer.abort();
                aborted += 1;
            }
        }
        aborted
    }
}

impl Drop for SyncOrchestrator {
    fn drop(&mut self) {
        let cancelled = self.coalescer.cancel_all();
        let timers = self.abort_typing_timers();
        if cancelled + timers > 0 {
            debug!(subscriptions = cancelled, typing_timers = timers, "Orchestrator dropped without shutdown");
        }
    }
}
