// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Debounce-with-cancellation for push subscriptions.
//!
//! UI navigation can ask for a new subscription on the same logical key many
//! times a second. The coalescer keeps, per key, at most one pending settle
//! timer and at most one materialized handle:
//!
//! ```text
//! ensure(k, f1) ──▶ abort pending(k) ──▶ cancel live(k) ──▶ sleep(settle) ──▶ f1(ticket)
//! ensure(k, f2) ──▶ abort pending(k) [f1 never runs] ──▶ ... ──▶ f2(ticket)
//! ```
//!
//! Every `ensure` mints a new generation. Anything that later produces data
//! for the key checks [`SubscriptionCoalescer::is_current`] with its ticket
//! first, so a payload from a torn-down source can never reach the caller.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::handle::SubscriptionHandle;

/// Identity of one materialization attempt for a key.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SubscriptionTicket {
    key: Arc<str>,
    generation: u64,
}

impl SubscriptionTicket {
    #[must_use]
    pub fn key(&self) -> &str {
        &self.key
    }

    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Lifecycle of one logical subscription key.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum SubscriptionState {
    #[default]
    Idle,
    /// Waiting for the settle timer, the factory, or the first snapshot
    Pending,
    Live,
    /// Remote failure; stays here until the owner calls `ensure` again
    Error(String),
}

impl fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Idle => write!(f, "idle"),
            Self::Pending => write!(f, "pending"),
            Self::Live => write!(f, "live"),
            Self::Error(e) => write!(f, "error: {}", e),
        }
    }
}

#[derive(Default)]
struct Slot {
    generation: u64,
    state: SubscriptionState,
    pending: Option<JoinHandle<()>>,
    live: Option<SubscriptionHandle>,
}

#[derive(Default)]
struct Inner {
    slots: Mutex<HashMap<Arc<str>, Slot>>,
    generations: AtomicU64,
}

/// Registry of keyed push subscriptions. Cheap to clone; clones share state.
#[derive(Clone, Default)]
pub struct SubscriptionCoalescer {
    inner: Arc<Inner>,
}

impl SubscriptionCoalescer {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Replace whatever is registered for `key` with `factory`, run after
    /// `settle_delay`.
    ///
    /// The previous live handle is cancelled before this returns, so it can
    /// no longer deliver by the time the new factory runs.
    ///
    /// Must be called from within a tokio runtime.
    pub fn ensure<F, Fut, E>(&self, key: &str, settle_delay: Duration, factory: F) -> SubscriptionTicket
    where
        F: FnOnce(SubscriptionTicket) -> Fut + Send + 'static,
        Fut: Future<Output = Result<SubscriptionHandle, E>> + Send + 'static,
        E: fmt::Display + Send + 'static,
    {
        let generation = self.inner.generations.fetch_add(1, Ordering::SeqCst) + 1;
        let key: Arc<str> = Arc::from(key);
        let ticket = SubscriptionTicket {
            key: Arc::clone(&key),
            generation,
        };

        let superseded = {
            let mut slots = self.inner.slots.lock();
            let slot = slots.entry(Arc::clone(&key)).or_default();
            if let Some(pending) = slot.pending.take() {
                pending.abort();
                debug!(key = %key, "Aborted pending subscription");
                crate::metrics::record_subscription_event("coalesced");
            }
            let superseded = slot.live.take();
            slot.generation = generation;
            slot.state = SubscriptionState::Pending;

            // Spawned under the lock: the task cannot observe the slot
            // before its own JoinHandle is stored.
            let inner = Arc::clone(&self.inner);
            let task_ticket = ticket.clone();
            slot.pending = Some(tokio::spawn(async move {
                tokio::time::sleep(settle_delay).await;
                inner.materialize(task_ticket, factory).await;
            }));
            superseded
        };

        if let Some(handle) = superseded {
            handle.cancel();
            debug!(key = %key, generation, "Tore down superseded subscription");
            crate::metrics::record_subscription_event("superseded");
        }
        ticket
    }

    /// True while `ticket` is the newest registration for its key.
    #[must_use]
    pub fn is_current(&self, ticket: &SubscriptionTicket) -> bool {
        self.inner
            .slots
            .lock()
            .get(ticket.key())
            .is_some_and(|slot| slot.generation == ticket.generation)
    }

    /// `Pending → Live` on first data. Returns true on the transition.
    pub fn mark_live(&self, ticket: &SubscriptionTicket) -> bool {
        let mut slots = self.inner.slots.lock();
        match slots.get_mut(ticket.key()) {
            Some(slot) if slot.generation == ticket.generation && slot.state == SubscriptionState::Pending => {
                slot.state = SubscriptionState::Live;
                crate::metrics::record_subscription_event("live");
                true
            }
            _ => false,
        }
    }

    /// Any state `→ Error`. No retry is scheduled.
    pub fn mark_error(&self, ticket: &SubscriptionTicket, error: &dyn fmt::Display) -> bool {
        let mut slots = self.inner.slots.lock();
        match slots.get_mut(ticket.key()) {
            Some(slot) if slot.generation == ticket.generation => {
                slot.state = SubscriptionState::Error(error.to_string());
                crate::metrics::record_subscription_event("error");
                true
            }
            _ => false,
        }
    }

    /// Clear the pending timer and live handle for `key`.
    pub fn cancel(&self, key: &str) -> bool {
        let removed = self.inner.slots.lock().remove(key);
        match removed {
            Some(slot) => {
                Self::teardown(key, slot);
                true
            }
            None => false,
        }
    }

    /// Cancel only if `ticket` still owns the key, so a stale owner going out
    /// of scope cannot tear down its successor.
    pub fn cancel_if_current(&self, ticket: &SubscriptionTicket) -> bool {
        let removed = {
            let mut slots = self.inner.slots.lock();
            match slots.get(ticket.key()) {
                Some(slot) if slot.generation == ticket.generation => slots.remove(ticket.key()),
                _ => None,
            }
        };
        match removed {
            Some(slot) => {
                Self::teardown(ticket.key(), slot);
                true
            }
            None => false,
        }
    }

    /// Tear down every key.
    pub fn cancel_all(&self) -> usize {
        let drained: Vec<(Arc<str>, Slot)> = self.inner.slots.lock().drain().collect();
        let count = drained.len();
        for (key, slot) in drained {
            Self::teardown(&key, slot);
        }
        count
    }

    #[must_use]
    pub fn state(&self, key: &str) -> SubscriptionState {
        self.inner
            .slots
            .lock()
            .get(key)
            .map(|slot| slot.state.clone())
            .unwrap_or_default()
    }

    /// Number of materialized handles.
    #[must_use]
    pub fn live_count(&self) -> usize {
        self.inner.slots.lock().values().filter(|s| s.live.is_some()).count()
    }

    /// Number of settle timers not yet fired.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.inner.slots.lock().values().filter(|s| s.pending.is_some()).count()
    }

    #[must_use]
    pub fn keys(&self) -> Vec<String> {
        self.inner.slots.lock().keys().map(|k| k.to_string()).collect()
    }

    fn teardown(key: &str, mut slot: Slot) {
        if let Some(pending) = slot.pending.take() {
            pending.abort();
        }
        if let Some(live) = slot.live.take() {
            live.cancel();
        }
        debug!(key = %key, "Subscription cancelled");
        crate::metrics::record_subscription_event("cancelled");
    }
}

impl Inner {
    async fn materialize<F, Fut, E>(self: Arc<Self>, ticket: SubscriptionTicket, factory: F)
    where
        F: FnOnce(SubscriptionTicket) -> Fut,
        Fut: Future<Output = Result<SubscriptionHandle, E>>,
        E: fmt::Display,
    {
        // Past this point ensure() no longer aborts us; supersession is
        // detected by generation when the factory returns.
        {
            let mut slots = self.slots.lock();
            match slots.get_mut(ticket.key()) {
                Some(slot) if slot.generation == ticket.generation => {
                    slot.pending.take();
                }
                _ => return,
            }
        }

        let result = factory(ticket.clone()).await;

        let orphan = {
            let mut slots = self.slots.lock();
            match slots.get_mut(ticket.key()) {
                Some(slot) if slot.generation == ticket.generation => match result {
                    Ok(handle) => {
                        slot.live = Some(handle);
                        None
                    }
                    Err(e) => {
                        warn!(key = %ticket.key(), error = %e, "Subscription failed to materialize");
                        slot.state = SubscriptionState::Error(e.to_string());
                        crate::metrics::record_subscription_event("error");
                        None
                    }
                },
                _ => result.ok(),
            }
        };

        if let Some(handle) = orphan {
            handle.cancel();
            debug!(key = %ticket.key(), generation = ticket.generation, "Discarded subscription superseded while materializing");
        }
    }
}
