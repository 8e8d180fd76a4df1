//! # Inbox Sync
//!
//! A quota-aware real-time sync and multi-source aggregation layer for a
//! customer-messaging inbox.
//!
//! ## Architecture
//!
//! A metered document store is billed per document read and per write, with
//! hard daily ceilings. Messages arrive from three origins with different
//! schemas. This crate keeps the UI live while staying under the ceilings:
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────┐
//! │                     SyncOrchestrator                        │
//! │  • subscribe_* / load_more / send_message / presence        │
//! │  • session gate, write ceiling, local conversation state    │
//! └─────────────────────────────────────────────────────────────┘
//!          │                    │                      │
//!          ▼                    ▼                      ▼
//! ┌─────────────────┐  ┌──────────────────┐  ┌──────────────────┐
//! │ ExpiringCache   │  │ Subscription     │  │ UsageMeter       │
//! │ • TTL per shape │  │ Coalescer        │  │ • 24h window     │
//! │ • hit/miss      │  │ • one per key    │  │ • warn / exceed  │
//! └─────────────────┘  │ • settle delay   │  └──────────────────┘
//!                      └──────────────────┘
//!                               │
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │       RemoteCollection (metered)  +  OutboundTransport      │
//! │       behind circuit breakers                               │
//! └─────────────────────────────────────────────────────────────┘
//!                               │ snapshots per origin
//!                               ▼
//! ┌─────────────────────────────────────────────────────────────┐
//! │  Feed normalizer ─→ Aggregator (dedup, newest-first, window)│
//! └─────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use inbox_sync::{SyncConfig, SyncOrchestrator, Session};
//! use inbox_sync::remote::memory::{InMemoryCollection, LoopbackTransport};
//!
//! #[tokio::main]
//! async fn main() {
//!     let orchestrator = SyncOrchestrator::new(
//!         SyncConfig::default(),
//!         Arc::new(InMemoryCollection::new()),
//!         Arc::new(LoopbackTransport::new()),
//!     )
//!     .expect("valid config");
//!     orchestrator.set_session(Some(Session::new("op-1", "Dee")));
//!
//!     // Unified inbox across every enabled origin
//!     let _feed = orchestrator.subscribe_feed(Arc::new(|view| {
//!         if let Ok(view) = view {
//!             println!("{} messages", view.len());
//!         }
//!     }));
//!
//!     orchestrator.shutdown();
//! }
//! ```
//!
//! ## Features
//!
//! - **Expiring Cache**: per-query-shape TTL caches with hit/miss stats
//! - **Usage Meter**: rolling 24h read/write counters with warn and hard ceilings
//! - **Subscription Coalescer**: one live subscription per key, settle delay, late payloads dropped
//! - **Feed Normalizer**: any origin's record becomes exactly one message, never rejected
//! - **Aggregator**: cross-origin dedup, stable newest-first order, fixed window
//! - **Circuit Breakers**: fail fast when the store or transport is down
//!
//! ## Configuration
//!
//! See [`SyncConfig`] for all configuration options.
//!
//! ## Modules
//!
//! - [`orchestrator`]: The [`SyncOrchestrator`] facade
//! - [`cache`]: TTL cache
//! - [`usage`]: Daily read/write metering
//! - [`subscription`]: Coalescer and subscription guards
//! - [`feed`]: Per-origin normalization
//! - [`aggregate`]: Multi-origin merge
//! - [`remote`]: Store and transport interfaces, in-memory implementations
//! - [`resilience`]: Circuit breakers

pub mod aggregate;
pub mod cache;
pub mod config;
pub mod feed;
pub mod metrics;
pub mod model;
pub mod orchestrator;
pub mod remote;
pub mod resilience;
pub mod subscription;
pub mod usage;

pub use aggregate::{AggregateView, Aggregator};
pub use cache::{CacheStats, ExpiringCache};
pub use config::{ConfigError, OriginConfig, SyncConfig};
pub use feed::{normalize, RawRecord};
pub use model::{Category, Conversation, ConversationStatus, Direction, Origin, SenderRole, UnifiedMessage};
pub use orchestrator::{
    CacheReport, Callback, ConversationScope, Page, Presence, Session, SyncError, SyncOrchestrator,
};
pub use remote::{Cursor, OutboundTransport, RemoteCollection, RemoteError, TransportError};
pub use resilience::{CircuitBreaker, CircuitConfig, RemoteCircuits};
pub use subscription::{Subscription, SubscriptionState};
pub use usage::{UsageKind, UsageLevel, UsageLimits, UsageMeter, UsageStats};
pub use metrics::LatencyTimer;
