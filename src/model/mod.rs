// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Domain records owned by the orchestrator.

mod conversation;
mod message;

pub use conversation::{Conversation, ConversationStatus, Priority};
pub use message::{Category, ContentKey, Direction, Origin, SenderRole, UnifiedMessage};

pub(crate) use message::now_millis;
