// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Query, snapshot and write-op shapes exchanged with the remote store.

use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::document::{Document, Fields, DOCUMENT_ID};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SortDirection {
    Asc,
    Desc,
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct OrderBy {
    pub field: String,
    pub direction: SortDirection,
}

/// Equality filter. `DOCUMENT_ID` as the field matches the document id.
#[derive(Debug, Clone, PartialEq)]
pub struct Filter {
    pub field: String,
    pub value: Value,
}

impl Filter {
    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }

    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        if self.field == DOCUMENT_ID {
            return self.value.as_str() == Some(doc.id.as_str());
        }
        doc.get(&self.field) == Some(&self.value)
    }
}

/// Page boundary: the ordering position and id of the last item seen.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Cursor {
    pub position: i64,
    pub id: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Query {
    pub collection: String,
    pub filters: Vec<Filter>,
    pub order_by: Option<OrderBy>,
    pub limit: Option<usize>,
    pub start_after: Option<Cursor>,
}

impl Query {
    pub fn collection(name: impl Into<String>) -> Self {
        Self {
            collection: name.into(),
            filters: Vec::new(),
            order_by: None,
            limit: None,
            start_after: None,
        }
    }

    #[must_use]
    pub fn filter_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.filters.push(Filter::eq(field, value));
        self
    }

    /// Order by a numeric or timestamp field; ties break on document id.
    #[must_use]
    pub fn order_by(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.order_by = Some(OrderBy {
            field: field.into(),
            direction,
        });
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn start_after(mut self, cursor: Option<Cursor>) -> Self {
        self.start_after = cursor;
        self
    }

    #[must_use]
    pub fn matches(&self, doc: &Document) -> bool {
        self.filters.iter().all(|f| f.matches(doc))
    }

    /// Compare two documents under this query's ordering.
    pub(crate) fn compare(&self, a: &Document, b: &Document) -> Ordering {
        self.compare_keys((a.position_for(self), &a.id), (b.position_for(self), &b.id))
    }

    /// True if `doc` sorts strictly after the cursor.
    pub(crate) fn is_after_cursor(&self, doc: &Document, cursor: &Cursor) -> bool {
        self.compare_keys((doc.position_for(self), &doc.id), (cursor.position, &cursor.id))
            == Ordering::Greater
    }

    fn compare_keys(&self, a: (i64, &String), b: (i64, &String)) -> Ordering {
        match &self.order_by {
            Some(order) if order.direction == SortDirection::Desc => {
                b.0.cmp(&a.0).then_with(|| a.1.cmp(b.1))
            }
            Some(_) => a.0.cmp(&b.0).then_with(|| a.1.cmp(b.1)),
            None => a.1.cmp(b.1),
        }
    }
}

impl Document {
    fn position_for(&self, query: &Query) -> i64 {
        query
            .order_by
            .as_ref()
            .map(|order| self.position(&order.field))
            .unwrap_or(0)
    }
}

/// Result set of a query, in query order.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Snapshot {
    pub documents: Vec<Document>,
}

impl Snapshot {
    pub fn new(documents: Vec<Document>) -> Self {
        Self { documents }
    }

    /// Metered read cost: one per document, minimum one per query.
    #[must_use]
    pub fn read_cost(&self) -> u64 {
        self.documents.len().max(1) as u64
    }

    /// Metered cost of a push update following `previous`: one per document
    /// added, changed or removed, minimum one.
    #[must_use]
    pub fn changed_cost(&self, previous: &Snapshot) -> u64 {
        let before: HashMap<&str, &Document> = previous.documents.iter().map(|d| (d.id.as_str(), d)).collect();
        let now: HashSet<&str> = self.documents.iter().map(|d| d.id.as_str()).collect();
        let changed = self
            .documents
            .iter()
            .filter(|d| before.get(d.id.as_str()).copied() != Some(*d))
            .count();
        let removed = before.keys().filter(|id| !now.contains(*id)).count();
        (changed + removed).max(1) as u64
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.documents.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }
}

/// One operation of an atomic batch.
#[derive(Debug, Clone, PartialEq)]
pub enum WriteOp {
    /// Replace the document
    Set {
        collection: String,
        id: String,
        fields: Fields,
    },
    /// Upsert the given fields, leaving others untouched
    Merge {
        collection: String,
        id: String,
        fields: Fields,
    },
    Delete {
        collection: String,
        id: String,
    },
}

impl WriteOp {
    #[must_use]
    pub fn collection(&self) -> &str {
        match self {
            Self::Set { collection, .. } | Self::Merge { collection, .. } | Self::Delete { collection, .. } => {
                collection
            }
        }
    }

    #[must_use]
    pub fn id(&self) -> &str {
        match self {
            Self::Set { id, .. } | Self::Merge { id, .. } | Self::Delete { id, .. } => id,
        }
    }
}
