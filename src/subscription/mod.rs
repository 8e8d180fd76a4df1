// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Keyed push subscriptions: cancellation handles, the coalescer that keeps
//! one live handle per key, and the guard handed to consumers.

mod coalescer;
mod handle;

pub use coalescer::{SubscriptionCoalescer, SubscriptionState, SubscriptionTicket};
pub use handle::SubscriptionHandle;

/// What a consumer holds for an open subscription.
///
/// Dropping it (or calling [`unsubscribe`](Self::unsubscribe)) tears down
/// every key it registered, unless a newer registration has already taken
/// the key over.
#[must_use = "dropping a Subscription unsubscribes immediately"]
pub struct Subscription {
    coalescer: SubscriptionCoalescer,
    tickets: Vec<SubscriptionTicket>,
}

impl Subscription {
    pub(crate) fn new(coalescer: SubscriptionCoalescer, tickets: Vec<SubscriptionTicket>) -> Self {
        Self { coalescer, tickets }
    }

    /// Logical keys this subscription registered.
    #[must_use]
    pub fn keys(&self) -> Vec<&str> {
        self.tickets.iter().map(SubscriptionTicket::key).collect()
    }

    /// True while every key is still owned by this subscription.
    #[must_use]
    pub fn is_current(&self) -> bool {
        self.tickets.iter().all(|t| self.coalescer.is_current(t))
    }

    pub fn unsubscribe(self) {
        drop(self);
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        for ticket in &self.tickets {
            self.coalescer.cancel_if_current(ticket);
        }
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription").field("keys", &self.keys()).finish()
    }
}
