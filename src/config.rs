//! Configuration for the sync orchestrator.
//!
//! # Example
//!
//! ```
//! use inbox_sync::{Origin, SyncConfig};
//!
//! // Minimal config (uses defaults)
//! let config = SyncConfig::default();
//! assert_eq!(config.aggregate_window, 100);
//! assert_eq!(config.primary_origin, Origin::LiveStore);
//!
//! // From JSON, overriding a few fields
//! let config = SyncConfig::from_json_str(r#"{"daily_read_limit": 1000, "settle_delay_ms": 50}"#).unwrap();
//! assert_eq!(config.daily_read_limit, 1000);
//! assert_eq!(config.page_size, 25);
//! ```

use serde::Deserialize;
use std::time::Duration;
use thiserror::Error;

use crate::model::Origin;
use crate::usage::UsageLimits;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum ConfigError {
    #[error("invalid config: {0}")]
    Invalid(String),
    #[error("config parse error: {0}")]
    Parse(String),
}

/// One enabled feed.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct OriginConfig {
    pub origin: Origin,
    /// Remote collection holding this origin's records
    pub collection: String,
    /// Poll instead of subscribing (spreadsheet-style sources)
    #[serde(default)]
    pub poll_interval_ms: Option<u64>,
}

impl OriginConfig {
    pub fn push(origin: Origin, collection: impl Into<String>) -> Self {
        Self {
            origin,
            collection: collection.into(),
            poll_interval_ms: None,
        }
    }

    pub fn poll(origin: Origin, collection: impl Into<String>, interval: Duration) -> Self {
        Self {
            origin,
            collection: collection.into(),
            poll_interval_ms: Some(interval.as_millis() as u64),
        }
    }

    #[must_use]
    pub fn poll_interval(&self) -> Option<Duration> {
        self.poll_interval_ms.map(Duration::from_millis)
    }
}

/// Configuration for the sync orchestrator.
///
/// All fields have defaults matching the free tier of a metered document
/// store.
#[derive(Debug, Clone, Deserialize)]
pub struct SyncConfig {
    /// Cache TTLs per query shape
    #[serde(default = "default_conversations_ttl_ms")]
    pub conversations_ttl_ms: u64,
    #[serde(default = "default_messages_ttl_ms")]
    pub messages_ttl_ms: u64,
    #[serde(default = "default_presence_ttl_ms")]
    pub presence_ttl_ms: u64,
    #[serde(default = "default_feed_ttl_ms")]
    pub feed_ttl_ms: u64,

    /// Quiet period before a subscription materializes
    #[serde(default = "default_settle_delay_ms")]
    pub settle_delay_ms: u64,

    /// Idle time after which a typing indicator is cleared
    #[serde(default = "default_typing_idle_ms")]
    pub typing_idle_ms: u64,

    /// Daily metered ceilings
    #[serde(default = "default_daily_read_limit")]
    pub daily_read_limit: u64,
    #[serde(default = "default_daily_write_limit")]
    pub daily_write_limit: u64,
    #[serde(default = "default_usage_warn_ratio")]
    pub usage_warn_ratio: f64,

    /// Maximum messages in the aggregated view
    #[serde(default = "default_aggregate_window")]
    pub aggregate_window: usize,

    /// Messages per page for a conversation
    #[serde(default = "default_page_size")]
    pub page_size: usize,

    /// Conversations per scope subscription
    #[serde(default = "default_conversation_limit")]
    pub conversation_limit: usize,

    /// Remote collection names
    #[serde(default = "default_conversations_collection")]
    pub conversations_collection: String,
    #[serde(default = "default_messages_collection")]
    pub messages_collection: String,
    #[serde(default = "default_presence_collection")]
    pub presence_collection: String,

    /// Enabled feeds, in aggregation priority order
    #[serde(default = "default_origins")]
    pub origins: Vec<OriginConfig>,

    /// Origin whose copy wins cross-origin dedup
    #[serde(default = "default_primary_origin")]
    pub primary_origin: Origin,
}

fn default_conversations_ttl_ms() -> u64 { 30_000 }
fn default_messages_ttl_ms() -> u64 { 60_000 }
fn default_presence_ttl_ms() -> u64 { 10_000 }
fn default_feed_ttl_ms() -> u64 { 30_000 }
fn default_settle_delay_ms() -> u64 { 300 }
fn default_typing_idle_ms() -> u64 { 3_000 }
fn default_daily_read_limit() -> u64 { 50_000 }
fn default_daily_write_limit() -> u64 { 20_000 }
fn default_usage_warn_ratio() -> f64 { 0.8 }
fn default_aggregate_window() -> usize { 100 }
fn default_page_size() -> usize { 25 }
fn default_conversation_limit() -> usize { 50 }
fn default_conversations_collection() -> String { "conversations".into() }
fn default_messages_collection() -> String { "messages".into() }
fn default_presence_collection() -> String { "presence".into() }
fn default_primary_origin() -> Origin { Origin::LiveStore }
fn default_origins() -> Vec<OriginConfig> {
    vec![
        OriginConfig::push(Origin::LiveStore, "messages"),
        OriginConfig::push(Origin::Webhook, "webhook_messages"),
        OriginConfig::poll(Origin::Sheet, "sheet_orders", Duration::from_secs(60)),
    ]
}

impl Default for SyncConfig {
    fn default() -> Self {
        Self {
            conversations_ttl_ms: default_conversations_ttl_ms(),
            messages_ttl_ms: default_messages_ttl_ms(),
            presence_ttl_ms: default_presence_ttl_ms(),
            feed_ttl_ms: default_feed_ttl_ms(),
            settle_delay_ms: default_settle_delay_ms(),
            typing_idle_ms: default_typing_idle_ms(),
            daily_read_limit: default_daily_read_limit(),
            daily_write_limit: default_daily_write_limit(),
            usage_warn_ratio: default_usage_warn_ratio(),
            aggregate_window: default_aggregate_window(),
            page_size: default_page_size(),
            conversation_limit: default_conversation_limit(),
            conversations_collection: default_conversations_collection(),
            messages_collection: default_messages_collection(),
            presence_collection: default_presence_collection(),
            origins: default_origins(),
            primary_origin: default_primary_origin(),
        }
    }
}

impl SyncConfig {
    pub fn from_json_str(raw: &str) -> Result<Self, ConfigError> {
        let config: Self = serde_json::from_str(raw).map_err(|e| ConfigError::Parse(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.aggregate_window == 0 {
            return Err(ConfigError::Invalid("aggregate_window must be > 0".into()));
        }
        if self.page_size == 0 {
            return Err(ConfigError::Invalid("page_size must be > 0".into()));
        }
        if self.conversation_limit == 0 {
            return Err(ConfigError::Invalid("conversation_limit must be > 0".into()));
        }
        if self.daily_read_limit == 0 || self.daily_write_limit == 0 {
            return Err(ConfigError::Invalid("daily limits must be > 0".into()));
        }
        if !(self.usage_warn_ratio > 0.0 && self.usage_warn_ratio <= 1.0) {
            return Err(ConfigError::Invalid(format!(
                "usage_warn_ratio must be in (0, 1], got {}",
                self.usage_warn_ratio
            )));
        }
        if self.origins.is_empty() {
            return Err(ConfigError::Invalid("at least one origin must be enabled".into()));
        }
        for (i, origin) in self.origins.iter().enumerate() {
            if origin.collection.trim().is_empty() {
                return Err(ConfigError::Invalid(format!("origin '{}' has no collection", origin.origin)));
            }
            if origin.poll_interval_ms == Some(0) {
                return Err(ConfigError::Invalid(format!("origin '{}' poll interval must be > 0", origin.origin)));
            }
            if self.origins[..i].iter().any(|o| o.origin == origin.origin) {
                return Err(ConfigError::Invalid(format!("origin '{}' listed twice", origin.origin)));
            }
        }
        if !self.origins.iter().any(|o| o.origin == self.primary_origin) {
            return Err(ConfigError::Invalid(format!(
                "primary origin '{}' is not enabled",
                self.primary_origin
            )));
        }
        Ok(())
    }

    #[must_use]
    pub fn usage_limits(&self) -> UsageLimits {
        UsageLimits {
            daily_reads: self.daily_read_limit,
            daily_writes: self.daily_write_limit,
            warn_ratio: self.usage_warn_ratio,
        }
    }

    #[must_use]
    pub fn settle_delay(&self) -> Duration {
        Duration::from_millis(self.settle_delay_ms)
    }

    #[must_use]
    pub fn typing_idle(&self) -> Duration {
        Duration::from_millis(self.typing_idle_ms)
    }

    #[must_use]
    pub fn conversations_ttl(&self) -> Duration {
        Duration::from_millis(self.conversations_ttl_ms)
    }

    #[must_use]
    pub fn messages_ttl(&self) -> Duration {
        Duration::from_millis(self.messages_ttl_ms)
    }

    #[must_use]
    pub fn presence_ttl(&self) -> Duration {
        Duration::from_millis(self.presence_ttl_ms)
    }

    #[must_use]
    pub fn feed_ttl(&self) -> Duration {
        Duration::from_millis(self.feed_ttl_ms)
    }

    /// Enabled origins in declared order.
    #[must_use]
    pub fn origin_order(&self) -> Vec<Origin> {
        self.origins.iter().map(|o| o.origin).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_validate() {
        let config = SyncConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.settle_delay(), Duration::from_millis(300));
        assert_eq!(
            config.origin_order(),
            vec![Origin::LiveStore, Origin::Webhook, Origin::Sheet]
        );
        assert_eq!(config.origins[2].poll_interval(), Some(Duration::from_secs(60)));
    }

    #[test]
    fn test_primary_must_be_enabled() {
        let config = SyncConfig {
            origins: vec![OriginConfig::push(Origin::Webhook, "webhook_messages")],
            ..Default::default()
        };
        assert!(matches!(config.validate(), Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn test_rejects_bad_values() {
        let zero_window = SyncConfig {
            aggregate_window: 0,
            ..Default::default()
        };
        assert!(zero_window.validate().is_err());

        let bad_ratio = SyncConfig {
            usage_warn_ratio: 1.5,
            ..Default::default()
        };
        assert!(bad_ratio.validate().is_err());

        let duplicate = SyncConfig {
            origins: vec![
                OriginConfig::push(Origin::LiveStore, "a"),
                OriginConfig::push(Origin::LiveStore, "b"),
            ],
            ..Default::default()
        };
        assert!(duplicate.validate().is_err());
    }

    #[test]
    fn test_json_origins() {
        let raw = r#"{
            "origins": [
                {"origin": "webhook", "collection": "hooks"},
                {"origin": "live_store", "collection": "messages"}
            ]
        }"#;
        let config = SyncConfig::from_json_str(raw).unwrap();
        assert_eq!(config.origin_order(), vec![Origin::Webhook, Origin::LiveStore]);
        assert_eq!(config.origins[0].poll_interval(), None);
    }

    #[test]
    fn test_json_parse_error() {
        assert!(matches!(
            SyncConfig::from_json_str("{not json"),
            Err(ConfigError::Parse(_))
        ));
    }
}
