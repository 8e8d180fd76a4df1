use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use super::query::{Query, Snapshot, WriteOp};
use crate::subscription::SubscriptionHandle;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum RemoteError {
    #[error("remote store unavailable: {0}")]
    Unavailable(String),
    #[error("remote operation timed out")]
    Timeout,
    #[error("permission denied: {0}")]
    PermissionDenied(String),
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    #[error("circuit '{0}' open, request rejected")]
    CircuitOpen(String),
}

impl RemoteError {
    /// Network-ish failures a later manual re-invocation may get past.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Unavailable(_) | Self::Timeout | Self::CircuitOpen(_))
    }
}

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    #[error("carrier rejected message ({status}): {message}")]
    Rejected { status: u16, message: String },
    #[error("carrier unreachable: {0}")]
    Unreachable(String),
    #[error("circuit '{0}' open, request rejected")]
    CircuitOpen(String),
}

/// Receives every snapshot (or failure) a subscription produces.
pub type SnapshotListener = Arc<dyn Fn(Result<Snapshot, RemoteError>) + Send + Sync>;

/// The metered document store.
#[async_trait]
pub trait RemoteCollection: Send + Sync {
    async fn query(&self, query: &Query) -> Result<Snapshot, RemoteError>;

    /// Register a push listener. The store calls `listener` with the current
    /// result set and again after every change that touches the collection.
    async fn subscribe(
        &self,
        query: Query,
        listener: SnapshotListener,
    ) -> Result<SubscriptionHandle, RemoteError>;

    /// Apply all ops or none.
    async fn batch_write(&self, ops: Vec<WriteOp>) -> Result<(), RemoteError>;
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeliveryReceipt {
    pub delivery_id: String,
}

/// Carrier / webhook API used for outbound messages.
#[async_trait]
pub trait OutboundTransport: Send + Sync {
    async fn send(&self, recipient_id: &str, text: &str) -> Result<DeliveryReceipt, TransportError>;
}
