// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Interfaces to the external collaborators: the metered document store and
//! the outbound delivery transport, plus in-process implementations of both.

mod document;
pub mod memory;
mod query;
mod traits;

pub use document::{parse_timestamp, Document, Fields, DOCUMENT_ID};
pub use query::{Cursor, Filter, OrderBy, Query, Snapshot, SortDirection, WriteOp};
pub use traits::{
    DeliveryReceipt, OutboundTransport, RemoteCollection, RemoteError, SnapshotListener,
    TransportError,
};
