// Copyright (c) 2025-2026 Adrian Robinson. Licensed under the AGPL-3.0.
// See LICENSE file in the project root for full license text.

//! Loosely-typed documents and field resolution.
//!
//! Remote records are JSON objects whose field names drift between origins
//! and between eras of the same origin. Every lookup here takes a priority
//! list of candidate names and returns the first one that resolves to a
//! usable value. `null`, empty and whitespace-only strings never resolve.

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

pub type Fields = Map<String, Value>;

/// Pseudo field name that addresses a document's id in filters.
pub const DOCUMENT_ID: &str = "__name__";

/// Epoch values below this are treated as seconds, not millis.
const SECONDS_CUTOFF: i64 = 100_000_000_000;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub fields: Fields,
}

impl Document {
    pub fn new(id: impl Into<String>, fields: Fields) -> Self {
        Self { id: id.into(), fields }
    }

    /// Build from any JSON value; non-objects become an empty document.
    pub fn from_json(id: impl Into<String>, value: Value) -> Self {
        let fields = match value {
            Value::Object(map) => map,
            _ => Map::new(),
        };
        Self::new(id, fields)
    }

    /// Field value; `null` counts as absent.
    #[must_use]
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.fields.get(name).filter(|v| !v.is_null())
    }

    /// First candidate holding a non-null, non-blank value.
    #[must_use]
    pub fn first_present<'a>(&'a self, names: &[&'a str]) -> Option<(&'a str, &'a Value)> {
        names.iter().find_map(|name| {
            self.get(name)
                .filter(|v| !matches!(v, Value::String(s) if s.trim().is_empty()))
                .map(|v| (*name, v))
        })
    }

    /// First candidate readable as text. Numbers are rendered, since
    /// spreadsheets hand phone numbers over as numbers.
    #[must_use]
    pub fn first_str(&self, names: &[&str]) -> Option<String> {
        names.iter().find_map(|name| match self.get(name)? {
            Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
            Value::Number(n) => Some(n.to_string()),
            _ => None,
        })
    }

    #[must_use]
    pub fn first_u64(&self, names: &[&str]) -> Option<u64> {
        names.iter().find_map(|name| match self.get(name)? {
            Value::Number(n) => n.as_u64().or_else(|| n.as_f64().filter(|f| *f >= 0.0).map(|f| f as u64)),
            Value::String(s) => s.trim().parse().ok(),
            _ => None,
        })
    }

    #[must_use]
    pub fn first_bool(&self, names: &[&str]) -> Option<bool> {
        names.iter().find_map(|name| match self.get(name)? {
            Value::Bool(b) => Some(*b),
            Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
                "true" | "yes" | "1" => Some(true),
                "false" | "no" | "0" => Some(false),
                _ => None,
            },
            _ => None,
        })
    }

    /// First candidate that parses as a timestamp, in epoch millis.
    #[must_use]
    pub fn first_timestamp(&self, names: &[&str]) -> Option<i64> {
        names.iter().find_map(|name| self.get(name).and_then(parse_timestamp))
    }

    /// Numeric ordering position of a field (timestamps and plain numbers).
    pub(crate) fn position(&self, field: &str) -> i64 {
        if field == DOCUMENT_ID {
            return 0;
        }
        self.get(field).and_then(parse_timestamp).unwrap_or(0)
    }
}

/// Parse the timestamp shapes seen across feeds into epoch millis.
///
/// Accepts epoch numbers (seconds or millis), numeric strings,
/// `{seconds, nanoseconds}` objects, RFC 3339 and `YYYY-MM-DD[ HH:MM[:SS]]`.
pub fn parse_timestamp(value: &Value) -> Option<i64> {
    match value {
        Value::Number(n) => n
            .as_i64()
            .or_else(|| n.as_f64().map(|f| f as i64))
            .map(epoch_to_millis),
        Value::String(s) => parse_timestamp_str(s.trim()),
        Value::Object(obj) => {
            let secs = obj
                .get("seconds")
                .or_else(|| obj.get("_seconds"))
                .and_then(Value::as_i64)?;
            let nanos = obj
                .get("nanoseconds")
                .or_else(|| obj.get("_nanoseconds"))
                .and_then(Value::as_i64)
                .unwrap_or(0);
            Some(secs.saturating_mul(1000).saturating_add(nanos / 1_000_000))
        }
        _ => None,
    }
}

fn epoch_to_millis(raw: i64) -> i64 {
    if raw.unsigned_abs() < SECONDS_CUTOFF as u64 {
        raw * 1000
    } else {
        raw
    }
}

fn parse_timestamp_str(s: &str) -> Option<i64> {
    if s.is_empty() {
        return None;
    }
    if let Ok(n) = s.parse::<i64>() {
        return Some(epoch_to_millis(n));
    }
    if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
        return Some(dt.timestamp_millis());
    }
    for format in ["%Y-%m-%d %H:%M:%S", "%Y-%m-%d %H:%M", "%Y-%m-%dT%H:%M:%S"] {
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, format) {
            return Some(dt.and_utc().timestamp_millis());
        }
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d")
        .ok()
        .and_then(|d| d.and_hms_opt(0, 0, 0))
        .map(|dt| dt.and_utc().timestamp_millis())
}
