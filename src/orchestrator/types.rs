//! Public types for the sync orchestrator.

use std::fmt;
use std::sync::Arc;

use serde::Serialize;
use thiserror::Error;

use crate::config::ConfigError;
use crate::model::{ConversationStatus, Origin, UnifiedMessage};
use crate::remote::{Cursor, Document, RemoteError, TransportError};
use crate::usage::UsageKind;

/// Errors surfaced by orchestrator operations.
///
/// Quota and remote failures on the read path are delivered to subscription
/// callbacks as values, never raised; only write operations return
/// `QuotaExceeded`.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SyncError {
    /// Network or store failure. Not retried; the caller decides.
    #[error("remote error: {0}")]
    Remote(#[from] RemoteError),

    #[error("{kind} quota exceeded ({used}/{limit}), disabled until the window resets")]
    QuotaExceeded { kind: UsageKind, used: u64, limit: u64 },

    /// Rejected before any remote call
    #[error("validation failed: {0}")]
    Validation(String),

    /// The carrier did not accept the message. Nothing was persisted.
    #[error("delivery failed: {0}")]
    Delivery(#[from] TransportError),

    /// An authenticated write was attempted without a session
    #[error("no authenticated session")]
    Unauthenticated,

    #[error("conversation not found: {0}")]
    ConversationNotFound(String),

    #[error(transparent)]
    Config(#[from] ConfigError),
}

impl SyncError {
    /// True for failures a later manual re-invocation may get past.
    #[must_use]
    pub fn is_transient(&self) -> bool {
        match self {
            Self::Remote(e) => e.is_transient(),
            Self::Delivery(TransportError::Unreachable(_) | TransportError::CircuitOpen(_)) => true,
            Self::QuotaExceeded { .. } => true,
            _ => false,
        }
    }
}

/// Receives every update (or failure) of one subscription.
pub type Callback<T> = Arc<dyn Fn(Result<T, SyncError>) + Send + Sync>;

/// The authenticated operator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Session {
    pub operator_id: String,
    pub display_name: String,
}

impl Session {
    pub fn new(operator_id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            operator_id: operator_id.into(),
            display_name: display_name.into(),
        }
    }
}

/// Which conversations a list subscription covers.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum ConversationScope {
    All,
    AssignedTo(String),
    Status(ConversationStatus),
}

impl fmt::Display for ConversationScope {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::All => write!(f, "all"),
            Self::AssignedTo(op) => write!(f, "assigned:{}", op),
            Self::Status(status) => write!(f, "status:{}", status.as_str()),
        }
    }
}

/// Cache key for one page of a conversation's messages.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct MessageKey {
    pub conversation: String,
    /// `None` is the newest page
    pub cursor: Option<Cursor>,
}

impl MessageKey {
    pub fn new(conversation: impl Into<String>, cursor: Option<Cursor>) -> Self {
        Self {
            conversation: conversation.into(),
            cursor,
        }
    }
}

/// Cache key for the aggregated feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FeedKey {
    Aggregate,
}

/// One page of a conversation, newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Page {
    pub items: Vec<UnifiedMessage>,
    /// Pass to `load_more` for the next (older) page; `None` at the end
    pub next_cursor: Option<Cursor>,
    /// The read budget is spent; nothing was fetched
    pub throttled: bool,
}

impl Page {
    /// Empty page that keeps the caller's place.
    #[must_use]
    pub fn throttled(cursor: Option<Cursor>) -> Self {
        Self {
            items: Vec::new(),
            next_cursor: cursor,
            throttled: true,
        }
    }
}

/// Typing / viewing state of one operator in one conversation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Presence {
    pub operator_id: String,
    pub operator_name: String,
    pub conversation_key: String,
    pub typing: bool,
    /// Epoch millis
    pub updated_at: i64,
}

impl Presence {
    pub(crate) fn from_document(doc: &Document) -> Self {
        Self {
            operator_id: doc
                .first_str(&["operatorId", "operator_id", "agentId"])
                .unwrap_or_else(|| doc.id.clone()),
            operator_name: doc
                .first_str(&["operatorName", "operator_name", "name"])
                .unwrap_or_default(),
            conversation_key: doc
                .first_str(&["conversationId", "conversation_id"])
                .unwrap_or_default(),
            typing: doc.first_bool(&["typing", "isTyping"]).unwrap_or(false),
            updated_at: doc.first_timestamp(&["updatedAt", "timestamp"]).unwrap_or(0),
        }
    }

    /// Document id of one operator's presence in one conversation.
    pub(crate) fn document_id(operator_id: &str, conversation_key: &str) -> String {
        format!("{}_{}", operator_id, conversation_key)
    }
}

/// Coalescer keys, one per query shape.
pub(crate) fn conversations_key(scope: &ConversationScope) -> String {
    format!("conversations:{}", scope)
}

pub(crate) fn messages_key(conversation_key: &str) -> String {
    format!("messages:{}", conversation_key)
}

pub(crate) fn presence_key(conversation_key: &str) -> String {
    format!("presence:{}", conversation_key)
}

pub(crate) fn feed_key(origin: Origin) -> String {
    format!("feed:{}", origin)
}
